use crate::config::{MonitorConfig, MonitorTrigger};
use rand::Rng;
use std::time::Duration;

/// Timing of the fee monitor's re-evaluation cycles, with randomized jitter.
#[derive(Debug, Clone)]
pub struct Cadence {
    interval: Duration,
    jitter_secs: u64,
    trigger: MonitorTrigger,
}

impl Cadence {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            jitter_secs: config.jitter_secs,
            trigger: config.trigger,
        }
    }

    /// Wait before the next cycle: the interval plus up to `jitter_secs` more.
    pub fn next_delay(&self) -> Duration {
        if self.jitter_secs == 0 {
            return self.interval;
        }
        let mut rng = rand::thread_rng();
        self.interval + Duration::from_millis(rng.gen_range(0..=self.jitter_secs * 1000))
    }

    /// Should the monitor also wake on node events?
    pub fn wants_events(&self) -> bool {
        self.trigger == MonitorTrigger::Events
    }
}
