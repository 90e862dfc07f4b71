//! Seams between the gateway socket and the components reacting to it.
//!
//! DESIGN
//! ======
//! - `FrameObserver`: every inbound frame is fanned out, in registration
//!   order, to every observer. Observers run synchronously on the read loop.
//! - `GatewayLink`: the narrow command surface observers use to talk back
//!   to the connection (send a frame, ask for a reconnect). Observers never
//!   own the socket.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use frames::GatewayFrame;
use tracing::error;

use crate::error::Error;

/// Receives every inbound gateway frame.
pub trait FrameObserver: Send + Sync {
    fn on_frame(&self, frame: &GatewayFrame);
}

impl<F> FrameObserver for F
where
    F: Fn(&GatewayFrame) + Send + Sync,
{
    fn on_frame(&self, frame: &GatewayFrame) {
        self(frame);
    }
}

/// Commands an observer may issue against the live connection.
pub trait GatewayLink: Send + Sync {
    /// Queue a frame on the open socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] when no socket is open, including
    /// while a reconnect is in progress.
    fn send_frame(&self, frame: &GatewayFrame) -> Result<(), Error>;

    /// Ask the connection to drop the socket and open a new one.
    fn request_reconnect(&self);
}

/// Invoke each observer in order. A panicking observer is logged and
/// skipped; the remaining observers still see the frame.
pub fn fan_out(observers: &[Arc<dyn FrameObserver>], frame: &GatewayFrame) {
    for (index, observer) in observers.iter().enumerate() {
        let result = catch_unwind(AssertUnwindSafe(|| observer.on_frame(frame)));
        if result.is_err() {
            error!(observer = index, op = frame.op, "gateway: frame observer panicked");
        }
    }
}

#[cfg(test)]
#[path = "observer_test.rs"]
mod tests;
