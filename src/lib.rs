//! Minimal bot client for a Discord-v6-shaped gateway.
//!
//! Two independent subsystems share one [`Config`]:
//!
//! - the gateway: a websocket carrying JSON frames, kept alive by the
//!   HELLO-driven [`HeartbeatMonitor`] and reconnected on missed acks;
//! - REST: calls classified into rate-limit buckets, serialized per bucket
//!   by the [`RateLimiter`], and retried once on a 429.
//!
//! [`Client`] wires both together.

pub mod bucket;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod heartbeat;
pub mod http;
pub mod observer;
pub mod rate_limit;
pub mod rest;
pub mod sequence;
pub mod session;

#[cfg(test)]
mod test_helpers;

pub use bucket::{BucketClassifier, BucketKey};
pub use client::Client;
pub use config::{Config, ConfigError};
pub use error::{Error, HttpFailure};
pub use frames::{GatewayFrame, Opcode};
pub use gateway::GatewayConnection;
pub use heartbeat::{HeartbeatMonitor, HeartbeatPhase};
pub use http::{Attachment, HttpTransport, RequestBody};
pub use observer::{FrameObserver, GatewayLink};
pub use rate_limit::RateLimiter;
pub use rest::RestClient;
pub use sequence::SequenceTracker;
