//! Session handshake: IDENTIFY on HELLO, fresh reconnect when the server
//! asks for one or invalidates the session.

use std::sync::Arc;

use frames::{GatewayFrame, Opcode};
use serde_json::json;
use tracing::{info, warn};

use crate::config::Config;
use crate::observer::{FrameObserver, GatewayLink};

const LARGE_THRESHOLD: u32 = 250;

pub struct SessionNegotiator {
    link: Arc<dyn GatewayLink>,
    config: Arc<Config>,
}

impl SessionNegotiator {
    #[must_use]
    pub fn new(link: Arc<dyn GatewayLink>, config: Arc<Config>) -> Self {
        Self { link, config }
    }

    /// IDENTIFY frame for this client's token and shard pair.
    #[must_use]
    pub fn identify_frame(&self) -> GatewayFrame {
        GatewayFrame::identify(json!({
            "token": self.config.token(),
            "properties": {
                "$os": std::env::consts::OS,
                "$browser": env!("CARGO_PKG_NAME"),
                "$device": env!("CARGO_PKG_NAME"),
            },
            "compress": false,
            "large_threshold": LARGE_THRESHOLD,
            "shard": [self.config.current_shard(), self.config.shard_count()],
        }))
    }

    fn identify(&self) {
        match self.link.send_frame(&self.identify_frame()) {
            Ok(()) => info!(
                shard = self.config.current_shard(),
                shards = self.config.shard_count(),
                "gateway: identify sent"
            ),
            Err(e) => warn!(error = %e, "gateway: identify send failed"),
        }
    }
}

impl FrameObserver for SessionNegotiator {
    fn on_frame(&self, frame: &GatewayFrame) {
        match frame.opcode() {
            Some(Opcode::Hello) => self.identify(),
            Some(Opcode::Reconnect) => {
                info!("gateway: server requested reconnect");
                self.link.request_reconnect();
            }
            Some(Opcode::InvalidSession) => {
                warn!(resumable = %frame.d, "gateway: session invalidated, reconnecting");
                self.link.request_reconnect();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
