//! Flush scheduling under the host's freeze/thaw execution model.
//!
//! The host freezes the execution environment once the runtime and every
//! extension are idle, for arbitrarily long. A frozen environment must not
//! accumulate "owed" ticks: at most one tick fires per thaw, no matter how
//! many interval multiples elapsed while frozen.

use crate::config::Config;
use std::time::{Duration, Instant};

/// Decides, per invocation, whether the engine may flush now.
pub trait Ticker: Send {
    /// Returns true when a report is due.
    fn tick(&mut self) -> bool;
}

pub(crate) trait Clock: Send {
    fn now(&self) -> Instant;
}

pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Interval gate that deliberately does not accumulate missed intervals
/// across suspension. The next eligible time is always computed from the
/// current instant, never from the previous deadline.
pub struct LossyTicker {
    tick_after: Option<Instant>,
    interval: Duration,
    clock: Box<dyn Clock>,
}

impl LossyTicker {
    /// Creates a ticker with the given reporting interval.
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, Box::new(SystemClock))
    }

    pub(crate) fn with_clock(interval: Duration, clock: Box<dyn Clock>) -> Self {
        Self {
            tick_after: None,
            interval,
            clock,
        }
    }
}

impl Ticker for LossyTicker {
    fn tick(&mut self) -> bool {
        let now = self.clock.now();

        let fired = match self.tick_after {
            None => {
                self.tick_after = Some(now);
                true
            }
            Some(after) => now > after,
        };

        // Re-arm from now whenever the deadline is not strictly in the
        // future. A long freeze therefore yields one tick, not a burst.
        if self.tick_after.is_some_and(|after| after <= now) {
            self.tick_after = Some(now + self.interval);
        }

        fired
    }
}

/// Reports on every invocation (fast-ingest policy).
pub struct AlwaysTicker;

impl Ticker for AlwaysTicker {
    fn tick(&mut self) -> bool {
        true
    }
}

/// Selects the ticker matching the reporting configuration.
pub fn ticker_for(config: &Config) -> Box<dyn Ticker> {
    if config.reporting.fast_ingest {
        Box::new(AlwaysTicker)
    } else {
        Box::new(LossyTicker::new(config.reporting.interval))
    }
}
