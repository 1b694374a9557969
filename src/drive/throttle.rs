// Outbound command rate limiting
//
// Regular directives are held in a single slot and released by the control
// loop tick once the minimum interval since the previous send has passed.
// A newer directive overwrites a still-pending one. Stop skips the slot.

use std::time::{Duration, Instant};

use tracing::debug;

use super::encoder::ControlDirective;

pub struct CommandThrottler {
    interval: Duration,
    pending: Option<ControlDirective>,
    last_sent_at: Option<Instant>,
}

impl CommandThrottler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            last_sent_at: None,
        }
    }

    /// Offer a directive for sending
    ///
    /// Returns the directive to put on the wire right now, if any. Only
    /// `Stop` is ever returned here; everything else waits for [`tick`].
    ///
    /// [`tick`]: CommandThrottler::tick
    pub fn submit(&mut self, directive: ControlDirective, now: Instant) -> Option<ControlDirective> {
        if directive.is_stop() {
            if let Some(dropped) = self.pending.take() {
                debug!("Stop cancels pending {:?}", dropped);
            }
            self.last_sent_at = Some(now);
            return Some(ControlDirective::Stop);
        }

        if let Some(previous) = self.pending.replace(directive) {
            debug!("Coalesced {:?} -> {:?}", previous, directive);
        }
        None
    }

    /// Release the pending directive if the interval has elapsed
    pub fn tick(&mut self, now: Instant) -> Option<ControlDirective> {
        let gate_open = match self.last_sent_at {
            Some(at) => now.saturating_duration_since(at) >= self.interval,
            None => true,
        };
        if !gate_open {
            return None;
        }

        let directive = self.pending.take()?;
        self.last_sent_at = Some(now);
        Some(directive)
    }

    /// Drop anything waiting without sending it
    pub fn cancel(&mut self) -> Option<ControlDirective> {
        self.pending.take()
    }

    pub fn pending(&self) -> Option<&ControlDirective> {
        self.pending.as_ref()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
