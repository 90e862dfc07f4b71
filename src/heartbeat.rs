//! Gateway keep-alive state machine.
//!
//! DESIGN
//! ======
//! `Idle → AwaitingFirstHeartbeat → Heartbeating`, with `Reconnecting` as a
//! terminal state until the next HELLO recreates the schedule.
//!
//! - HELLO starts a new epoch: the previous tick task is aborted, the ack
//!   flag is reset to "received" and a task sleeping exactly `interval`
//!   between ticks is spawned for the new epoch.
//! - A tick first checks its epoch under the state lock. A schedule that was
//!   superseded never sends, even if it fires while being aborted.
//! - A tick that finds the previous heartbeat unacknowledged asks the link
//!   for a reconnect instead of sending, and ends the schedule.
//! - A server-initiated HEARTBEAT is answered immediately, outside the timer.
//!
//! All state (epoch, ack flag, phase, task handle) lives behind one mutex;
//! the read loop and the tick task are the only writers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use frames::{GatewayFrame, Opcode};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::observer::{FrameObserver, GatewayLink};
use crate::sequence::SequenceTracker;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeartbeatPhase {
    /// No HELLO received on the current socket.
    Idle,
    /// HELLO received, first heartbeat not yet sent.
    AwaitingFirstHeartbeat,
    /// At least one heartbeat sent on the current schedule.
    Heartbeating,
    /// An ack was missed and a reconnect was requested.
    Reconnecting,
}

struct HeartbeatState {
    epoch: u64,
    interval: Option<Duration>,
    ack_received: bool,
    phase: HeartbeatPhase,
    task: Option<JoinHandle<()>>,
}

enum Tick {
    Sent,
    Reconnect,
    Superseded,
}

/// Drives heartbeats for one gateway connection.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    link: Arc<dyn GatewayLink>,
    sequence: SequenceTracker,
    state: Arc<Mutex<HeartbeatState>>,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(link: Arc<dyn GatewayLink>, sequence: SequenceTracker) -> Self {
        Self {
            link,
            sequence,
            state: Arc::new(Mutex::new(HeartbeatState {
                epoch: 0,
                interval: None,
                ack_received: true,
                phase: HeartbeatPhase::Idle,
                task: None,
            })),
        }
    }

    #[must_use]
    pub fn phase(&self) -> HeartbeatPhase {
        self.lock().phase
    }

    /// Interval announced by the most recent HELLO.
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        self.lock().interval
    }

    /// Cancel the current schedule. Safe to call at any time, any number of times.
    pub fn stop(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.interval = None;
        state.ack_received = true;
        state.phase = HeartbeatPhase::Idle;
    }

    fn lock(&self) -> MutexGuard<'_, HeartbeatState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_hello(&self, frame: &GatewayFrame) {
        let Some(interval_ms) = frame.heartbeat_interval().filter(|ms| *ms > 0) else {
            warn!(d = %frame.d, "gateway: HELLO without a usable heartbeat_interval");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("gateway: HELLO received outside a tokio runtime; heartbeats disabled");
            return;
        };
        let interval = Duration::from_millis(interval_ms);

        let mut state = self.lock();
        state.epoch += 1;
        if let Some(task) = state.task.take() {
            task.abort();
        }
        state.interval = Some(interval);
        state.ack_received = true;
        state.phase = HeartbeatPhase::AwaitingFirstHeartbeat;

        let epoch = state.epoch;
        let monitor = self.clone();
        state.task = Some(runtime.spawn(run_schedule(monitor, epoch, interval)));
        info!(interval_ms, epoch, "gateway: heartbeat scheduled");
    }

    fn on_ack(&self) {
        self.lock().ack_received = true;
    }

    fn tick(&self, epoch: u64) -> Tick {
        let mut state = self.lock();
        if state.epoch != epoch {
            return Tick::Superseded;
        }
        if !state.ack_received {
            state.phase = HeartbeatPhase::Reconnecting;
            state.task = None;
            return Tick::Reconnect;
        }
        state.ack_received = false;
        state.phase = HeartbeatPhase::Heartbeating;
        // Sent under the lock so a concurrent HELLO cannot interleave.
        self.send_heartbeat();
        Tick::Sent
    }

    fn send_heartbeat(&self) {
        let last_sequence = self.sequence.last_seen();
        match self.link.send_frame(&GatewayFrame::heartbeat(last_sequence)) {
            Ok(()) => debug!(?last_sequence, "gateway: heartbeat sent"),
            Err(e) => warn!(error = %e, "gateway: heartbeat send failed"),
        }
    }
}

impl FrameObserver for HeartbeatMonitor {
    fn on_frame(&self, frame: &GatewayFrame) {
        match frame.opcode() {
            Some(Opcode::Hello) => self.on_hello(frame),
            Some(Opcode::Heartbeat) => self.send_heartbeat(),
            Some(Opcode::HeartbeatAck) => self.on_ack(),
            _ => {}
        }
    }
}

async fn run_schedule(monitor: HeartbeatMonitor, epoch: u64, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        match monitor.tick(epoch) {
            Tick::Sent => {}
            Tick::Superseded => return,
            Tick::Reconnect => {
                warn!(epoch, "gateway: heartbeat ack missed, reconnecting");
                monitor.link.request_reconnect();
                return;
            }
        }
    }
}

#[cfg(test)]
#[path = "heartbeat_test.rs"]
mod tests;
