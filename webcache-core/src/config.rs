//! The configuration options enumerated in spec §6.

use std::time::Duration;

/// Tunables for the freshness window, backoff, and body/iteration limits.
/// `webcache-server` builds one of these from the environment; tests and
/// examples can construct it directly.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Both the internal expiry window and the outbound `max-age`.
    pub freshness_window: Duration,
    /// Base of the waiter backoff formula.
    pub backoff_base: Duration,
    /// Cap of the waiter backoff formula.
    pub backoff_cap: Duration,
    /// Origin responses larger than this bypass the cache entirely.
    pub max_body_bytes: usize,
    /// Bounded retry counter across the `LOOKUP` state.
    pub max_lookup_iterations: u32,
    /// Loopback port the origin listens on.
    pub origin_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            freshness_window: Duration::from_secs(60),
            backoff_base: Duration::from_millis(50),
            backoff_cap: Duration::from_millis(2000),
            max_body_bytes: 1_048_576,
            max_lookup_iterations: 5,
            origin_port: 8080,
        }
    }
}

impl Config {
    /// `backoff(r - last_noted)`, sub-linear per spec §4.E: grows with
    /// queue depth but never past `backoff_cap`.
    pub fn backoff_for(&self, reservation: u64, last_noted: u64) -> Duration {
        let depth = reservation.saturating_sub(last_noted);
        let scaled = self.backoff_base.saturating_mul(depth as u32);
        scaled.min(self.backoff_cap)
    }

    /// TTL for a freshly created placeholder, per the redesign note in
    /// spec §9: short enough that a crashed fetcher does not durably
    /// block a URL.
    pub fn placeholder_ttl(&self) -> Duration {
        self.backoff_cap * 5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_with_queue_depth_and_saturates_at_cap() {
        let c = Config::default();
        assert_eq!(c.backoff_for(1, 0), Duration::from_millis(50));
        assert_eq!(c.backoff_for(3, 0), Duration::from_millis(150));
        assert_eq!(c.backoff_for(1000, 0), c.backoff_cap);
    }
}
