//! Pure delay computation for one aimpoint in one tick
//!
//! The tick window is `W = P + O` (system periodicity plus overlap). An
//! aimpoint polled every `p` seconds gets the delays `0, f, 2f, …` strictly
//! below `W`, where `f` is `p` floored to a multiple of 10 s. Flooring
//! under-spaces on purpose: consecutive ticks overlap rather than gap.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::hours;
use crate::config::SchedulerConfig;
use crate::model::Aimpoint;

const STEP_GRANULARITY: u64 = 10;

/// Tick geometry shared by every aimpoint in a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    pub period: Duration,
    pub overlap: Duration,
    pub min_poll: Duration,
}

/// Effective spacing between orders for one aimpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub every: Duration,
    /// Poll frequency was below the minimum and has been raised
    pub raised: bool,
}

impl Cadence {
    pub fn new(period: Duration, overlap: Duration) -> Self {
        Self {
            period,
            overlap,
            min_poll: Duration::from_secs(STEP_GRANULARITY),
        }
    }

    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            period: config.period(),
            overlap: Duration::from_secs(config.overlap_secs),
            min_poll: Duration::from_secs(config.min_poll_secs),
        }
    }

    pub fn window(&self) -> Duration {
        self.period + self.overlap
    }

    pub fn step(&self, poll_frequency: u64) -> Step {
        let min = self.min_poll.as_secs().max(1);
        if poll_frequency < min {
            return Step {
                every: Duration::from_secs(min),
                raised: true,
            };
        }
        if poll_frequency >= self.period.as_secs() {
            return Step {
                every: self.window(),
                raised: false,
            };
        }
        let floored = (poll_frequency / STEP_GRANULARITY * STEP_GRANULARITY).max(min);
        Step {
            every: Duration::from_secs(floored),
            raised: false,
        }
    }

    /// `0, f, 2f, …` below the window; a single delay when `single_collector`
    pub fn delays(&self, poll_frequency: u64, single_collector: bool) -> Vec<Duration> {
        let step = self.step(poll_frequency).every;
        let window = self.window();

        let mut delays = Vec::new();
        let mut delay = Duration::ZERO;
        while delay < window {
            delays.push(delay);
            if single_collector {
                break;
            }
            delay += step;
        }
        delays
    }
}

/// Delays for one aimpoint at tick time `now`, after working hours and
/// single-collector truncation. Disabled aimpoints get nothing.
pub fn fetch_delays(aimpoint: &Aimpoint, cadence: &Cadence, now: DateTime<Utc>) -> Vec<Duration> {
    if !aimpoint.enabled {
        return Vec::new();
    }

    let mut delays = cadence.delays(aimpoint.poll_frequency, false);

    if let Some(working_hours) = &aimpoint.hours {
        let open = hours::open_windows(working_hours, now, cadence.window());
        delays.retain(|d| open.iter().any(|w| w.contains(d)));
    }

    if aimpoint.single_collector {
        delays.truncate(1);
    }
    delays
}
