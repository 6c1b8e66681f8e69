//! Tool-call confirmation lifecycle
//!
//! A batch that cannot run on its own becomes a [`ToolConfirmation`]:
//!
//! ```text
//! Pending ──confirm / countdown elapsed──▶ Confirmed
//!    └─────────────cancel / stop────────▶ Cancelled
//! ```
//!
//! Both outcomes are terminal. Confirming or cancelling a batch that already
//! left `Pending` does nothing, which is what makes the auto-execute
//! countdown fire at most once.

use super::safety::{classify_batch, is_safe_batch, Sensitivity};
use super::types::ToolCall;

/// How an incoming batch must be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchDecision {
    /// Every call is read-only: run it immediately
    AutoExecute,
    /// Ask the user; a countdown runs only for non-sensitive batches
    Confirm(Sensitivity),
}

pub fn evaluate_batch(calls: &[ToolCall]) -> BatchDecision {
    if is_safe_batch(calls) {
        BatchDecision::AutoExecute
    } else {
        BatchDecision::Confirm(classify_batch(calls))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationPhase {
    Pending,
    Confirmed,
    Cancelled,
}

/// Auto-execute countdown of a pending batch.
///
/// Every (re)start gets a fresh run id; ticks carrying another run id are stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    /// Sensitive batch, or auto-execution turned off
    Disabled,
    Ready { remaining: u32 },
    Running { remaining: u32, run: u64 },
    Paused { remaining: u32 },
    Elapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue { remaining: u32 },
    /// The countdown reached zero on this tick
    Expired,
    /// The tick belongs to a run that was paused, restarted or finished
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolConfirmation {
    batch_id: u64,
    calls: Vec<ToolCall>,
    sensitivity: Sensitivity,
    phase: ConfirmationPhase,
    countdown: Countdown,
}

impl ToolConfirmation {
    /// A zero tick budget disables the countdown
    pub fn new(batch_id: u64, calls: Vec<ToolCall>, sensitivity: Sensitivity, ticks: u32) -> Self {
        let countdown = if sensitivity.is_sensitive() || ticks == 0 {
            Countdown::Disabled
        } else {
            Countdown::Ready { remaining: ticks }
        };
        Self {
            batch_id,
            calls,
            sensitivity,
            phase: ConfirmationPhase::Pending,
            countdown,
        }
    }

    pub fn batch_id(&self) -> u64 {
        self.batch_id
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn sensitivity(&self) -> Sensitivity {
        self.sensitivity
    }

    pub fn phase(&self) -> ConfirmationPhase {
        self.phase
    }

    pub fn countdown(&self) -> Countdown {
        self.countdown
    }

    pub fn is_pending(&self) -> bool {
        self.phase == ConfirmationPhase::Pending
    }

    /// Ticks left before auto-execution, while a countdown is live
    pub fn remaining(&self) -> Option<u32> {
        match self.countdown {
            Countdown::Ready { remaining }
            | Countdown::Running { remaining, .. }
            | Countdown::Paused { remaining } => Some(remaining),
            Countdown::Disabled | Countdown::Elapsed => None,
        }
    }

    /// Same calls, by id, as `calls`
    pub fn covers(&self, calls: &[ToolCall]) -> bool {
        self.calls.len() == calls.len()
            && self.calls.iter().zip(calls).all(|(a, b)| a.id == b.id)
    }

    /// Start or resume the countdown under `run`. Returns `false` if it is already
    /// running, disabled, finished, or the batch is no longer pending.
    pub fn start_countdown(&mut self, run: u64) -> bool {
        if !self.is_pending() {
            return false;
        }
        match self.countdown {
            Countdown::Ready { remaining } | Countdown::Paused { remaining } => {
                self.countdown = Countdown::Running { remaining, run };
                true
            }
            _ => false,
        }
    }

    pub fn pause_countdown(&mut self) -> bool {
        match self.countdown {
            Countdown::Running { remaining, .. } => {
                self.countdown = Countdown::Paused { remaining };
                true
            }
            _ => false,
        }
    }

    pub fn tick(&mut self, run: u64) -> TickOutcome {
        if !self.is_pending() {
            return TickOutcome::Stale;
        }
        match self.countdown {
            Countdown::Running { remaining, run: current } if current == run => {
                let remaining = remaining.saturating_sub(1);
                if remaining == 0 {
                    self.countdown = Countdown::Elapsed;
                    TickOutcome::Expired
                } else {
                    self.countdown = Countdown::Running { remaining, run };
                    TickOutcome::Continue { remaining }
                }
            }
            _ => TickOutcome::Stale,
        }
    }

    /// Move to `Confirmed` and hand back the ids to execute, once
    pub fn confirm(&mut self) -> Option<Vec<String>> {
        if !self.is_pending() {
            return None;
        }
        self.phase = ConfirmationPhase::Confirmed;
        self.stop_countdown();
        Some(self.calls.iter().map(|call| call.id.clone()).collect())
    }

    pub fn cancel(&mut self) -> bool {
        if !self.is_pending() {
            return false;
        }
        self.phase = ConfirmationPhase::Cancelled;
        self.stop_countdown();
        true
    }

    fn stop_countdown(&mut self) {
        if self.countdown != Countdown::Disabled {
            self.countdown = Countdown::Elapsed;
        }
    }
}
