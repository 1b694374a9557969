// Failsafe latch and its watchdog
// Note: once engaged, nothing but Stop may reach the robot until the operator
// releases the latch. The latch remembers why it was engaged so that a
// returning link only clears its own reason.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::link::LinkState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailsafeReason {
    /// Operator pressed the failsafe / all-stop button
    Operator,
    /// Link is not Ready
    LinkDown,
    /// Motion input went stale
    InputTimeout,
}

/// Snapshot of the latch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FailsafeLatch {
    operator: bool,
    link_down: bool,
    input_timeout: bool,
}

impl FailsafeLatch {
    pub fn engaged(&self) -> bool {
        self.operator || self.link_down || self.input_timeout
    }

    pub fn has(&self, reason: FailsafeReason) -> bool {
        match reason {
            FailsafeReason::Operator => self.operator,
            FailsafeReason::LinkDown => self.link_down,
            FailsafeReason::InputTimeout => self.input_timeout,
        }
    }

    fn set(&mut self, reason: FailsafeReason, value: bool) {
        match reason {
            FailsafeReason::Operator => self.operator = value,
            FailsafeReason::LinkDown => self.link_down = value,
            FailsafeReason::InputTimeout => self.input_timeout = value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailsafeError {
    #[error("Cannot release failsafe while link is {state:?}")]
    NotReady { state: LinkState },

    #[error("Cannot release failsafe without fresh control input")]
    StaleInput,
}

pub struct FailsafeMonitor {
    latch: FailsafeLatch,
    input_timeout: Duration,
    last_input_at: Option<Instant>,
    // Only a non-zero command can go stale
    watchdog_armed: bool,
}

impl FailsafeMonitor {
    /// New monitor; the link starts Idle so the latch starts engaged
    pub fn new(input_timeout: Duration) -> Self {
        let mut latch = FailsafeLatch::default();
        latch.set(FailsafeReason::LinkDown, true);
        Self {
            latch,
            input_timeout,
            last_input_at: None,
            watchdog_armed: false,
        }
    }

    pub fn latch(&self) -> FailsafeLatch {
        self.latch
    }

    pub fn is_engaged(&self) -> bool {
        self.latch.engaged()
    }

    /// Engage for `reason`; returns true if this reason was not already set
    pub fn engage(&mut self, reason: FailsafeReason) -> bool {
        if self.latch.has(reason) {
            return false;
        }
        warn!("Failsafe engaged: {:?}", reason);
        self.latch.set(reason, true);
        self.watchdog_armed = false;
        true
    }

    /// Feed a link state change
    ///
    /// Returns true if the change engaged the latch.
    pub fn on_link_state(&mut self, state: LinkState) -> bool {
        if state == LinkState::Ready {
            if self.latch.has(FailsafeReason::LinkDown) {
                self.latch.set(FailsafeReason::LinkDown, false);
                info!(
                    "Link ready, link failsafe cleared (still engaged: {})",
                    self.latch.engaged()
                );
            }
            false
        } else {
            self.engage(FailsafeReason::LinkDown)
        }
    }

    /// Feed an input heartbeat from the authoritative source
    pub fn record_input(&mut self, now: Instant, commanding_motion: bool) {
        self.last_input_at = Some(now);
        self.watchdog_armed = commanding_motion && !self.latch.engaged();
    }

    /// Forget the motion being watched; the next input rearms it
    pub fn disarm_watchdog(&mut self) {
        self.watchdog_armed = false;
    }

    /// Check the input watchdog; returns true if it just fired
    pub fn check_input(&mut self, now: Instant) -> bool {
        if !self.watchdog_armed {
            return false;
        }
        let stale = self
            .last_input_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.input_timeout);
        if stale {
            self.engage(FailsafeReason::InputTimeout);
        }
        stale
    }

    fn input_is_fresh(&self, now: Instant) -> bool {
        self.last_input_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.input_timeout)
    }

    /// Operator release; needs a Ready link and fresh input
    pub fn release(&mut self, link: LinkState, now: Instant) -> Result<(), FailsafeError> {
        if link != LinkState::Ready {
            return Err(FailsafeError::NotReady { state: link });
        }
        if !self.input_is_fresh(now) {
            return Err(FailsafeError::StaleInput);
        }
        if self.latch.engaged() {
            info!("Failsafe released");
        }
        self.latch = FailsafeLatch::default();
        self.watchdog_armed = false;
        Ok(())
    }
}
