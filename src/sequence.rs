//! Last sequence number seen on DISPATCH frames.

use std::sync::{Arc, Mutex, PoisonError};

use frames::{GatewayFrame, Opcode};

use crate::observer::FrameObserver;

/// Shared, cloneable holder of the last seen sequence number.
///
/// Only DISPATCH frames update it, and within one connection epoch the
/// value never decreases. The connection resets it whenever a new socket
/// is opened.
#[derive(Clone, Debug, Default)]
pub struct SequenceTracker {
    last_seen: Arc<Mutex<Option<u64>>>,
}

impl SequenceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn last_seen(&self) -> Option<u64> {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `seq` unless a larger value was already seen.
    pub fn observe(&self, seq: u64) {
        let mut last_seen = self.last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        if last_seen.is_none_or(|prev| seq > prev) {
            *last_seen = Some(seq);
        }
    }

    pub fn reset(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl FrameObserver for SequenceTracker {
    fn on_frame(&self, frame: &GatewayFrame) {
        if frame.opcode() != Some(Opcode::Dispatch) {
            return;
        }
        if let Some(seq) = frame.s {
            self.observe(seq);
        }
    }
}

#[cfg(test)]
#[path = "sequence_test.rs"]
mod tests;
