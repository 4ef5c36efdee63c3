//! Backpressure: exporter acknowledgement tracking and the exponential
//! read-pause schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::info;

use crate::error::AckError;

/// Pause bootstrap value in milliseconds.
const PAUSE_FLOOR_MS: u32 = 100;
/// Pause ceiling in milliseconds.
const PAUSE_CEIL_MS: u32 = 8_000;
/// Pauses at or above this emit a `receiver_pause` event.
const PAUSE_REPORT_MS: u32 = 2_000;

#[derive(Debug, Default)]
struct AckState {
    enabled: bool,
    acked_block: u32,
    max_unconfirmed: u32,
    slowdown_requested: bool,
}

/// Snapshot of the acknowledgement state at pause-evaluation time.
#[derive(Debug, Clone, Copy)]
pub struct AckSnapshot {
    pub enabled: bool,
    pub acked_block: u32,
    pub max_unconfirmed: u32,
}

/// Shared handle through which exporters and the supervisor steer the read
/// loop: acknowledgements, slowdown hints, and the abort flag.
#[derive(Debug, Default)]
pub struct ReceiverControl {
    ack: Mutex<AckState>,
    aborting: AtomicBool,
}

impl ReceiverControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// One-shot: announce that the exporter will acknowledge blocks, pausing
    /// the reader whenever more than `max_unconfirmed` blocks are in flight.
    pub fn exporter_will_ack(&self, max_unconfirmed: u32) -> Result<(), AckError> {
        if max_unconfirmed == 0 {
            return Err(AckError::WindowZero);
        }
        let mut ack = self.ack.lock().unwrap();
        if ack.enabled {
            return Err(AckError::AlreadyEnabled);
        }
        ack.enabled = true;
        ack.max_unconfirmed = max_unconfirmed;
        info!(max_unconfirmed, "receiver will pause on unacknowledged blocks");
        Ok(())
    }

    /// Acknowledge every block up to `block_num`. Must not regress.
    pub fn ack_block(&self, block_num: u32) -> Result<(), AckError> {
        let mut ack = self.ack.lock().unwrap();
        if !ack.enabled {
            return Err(AckError::NotEnabled);
        }
        if block_num < ack.acked_block {
            return Err(AckError::Regression {
                block_num,
                acked: ack.acked_block,
            });
        }
        ack.acked_block = block_num;
        Ok(())
    }

    /// One-shot hint forcing the next read through the pause path.
    pub fn slowdown(&self) {
        self.ack.lock().unwrap().slowdown_requested = true;
    }

    /// Finish the current frame without pushing it, then stop the loop.
    pub fn abort(&self) {
        self.aborting.store(true, Ordering::SeqCst);
    }

    pub fn is_aborting(&self) -> bool {
        self.aborting.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> AckSnapshot {
        let ack = self.ack.lock().unwrap();
        AckSnapshot {
            enabled: ack.enabled,
            acked_block: ack.acked_block,
            max_unconfirmed: ack.max_unconfirmed,
        }
    }

    /// Consume a pending slowdown hint.
    pub(crate) fn take_slowdown(&self) -> bool {
        let mut ack = self.ack.lock().unwrap();
        std::mem::take(&mut ack.slowdown_requested)
    }

    /// Startup recovery resets the ack cursor to the recovered head.
    pub(crate) fn reset_acked(&self, block_num: u32) {
        self.ack.lock().unwrap().acked_block = block_num;
    }
}

/// What the read loop should do before the next read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseDecision {
    ReadNow,
    Pause {
        delay: Duration,
        /// Publish a `receiver_pause` event before sleeping.
        report: bool,
    },
}

/// The exponential pause schedule: 0 → 100 ms, doubling to an 8 s ceiling,
/// reset to 0 by any unpaused read.
#[derive(Debug, Default)]
pub struct PauseController {
    pause_ms: u32,
}

impl PauseController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current_pause_ms(&self) -> u32 {
        self.pause_ms
    }

    /// Decide whether to read immediately or back off.
    pub fn evaluate(
        &mut self,
        head: u32,
        control: &ReceiverControl,
        queue_depth: usize,
        max_queue_size: u32,
    ) -> PauseDecision {
        let slowdown = control.take_slowdown();
        let ack = control.snapshot();
        let exporter_behind =
            ack.enabled && head.saturating_sub(ack.acked_block) >= ack.max_unconfirmed;
        let queue_full = queue_depth > max_queue_size as usize;

        if !(slowdown || exporter_behind || queue_full) {
            self.pause_ms = 0;
            return PauseDecision::ReadNow;
        }

        self.pause_ms = if self.pause_ms == 0 {
            PAUSE_FLOOR_MS
        } else {
            (self.pause_ms * 2).min(PAUSE_CEIL_MS)
        };
        PauseDecision::Pause {
            delay: Duration::from_millis(self.pause_ms as u64),
            report: self.pause_ms >= PAUSE_REPORT_MS,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
