//! Reconnect policy with jittered exponential back-off.

use std::time::Duration;

/// Controls how the client reconnects after a connection drop.
///
/// Delays grow geometrically up to `max_delay`, with deterministic jitter
/// spread on top so a fleet restarting together does not retry in lock
/// step. The attempt counter resets only after a connection survives for
/// `stable_after`, so a link that flaps right after connecting keeps its
/// accumulated backoff.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Delay before the first reconnect attempt.
    pub initial_delay: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub backoff_factor: f64,
    /// Consecutive failures before giving up. `0` means retry forever.
    pub max_attempts: u32,
    /// Connected time after which the attempt counter resets to zero.
    pub stable_after: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
            max_attempts: 0,
            stable_after: Duration::from_secs(30),
        }
    }
}

impl ReconnectBackoff {
    /// Pre-jitter delay for the given attempt (0-indexed): monotonically
    /// non-decreasing, capped at `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = base_ms * self.backoff_factor.powi(attempt.min(64) as i32);
        Duration::from_millis(delay_ms.min(self.max_delay.as_millis() as f64) as u64)
    }

    /// Jittered delay actually slept: base plus up to 25% spread.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_ms = self.base_delay(attempt).as_millis() as f64;
        let jitter = base_ms * 0.25 * pseudo_random_fraction(attempt);
        Duration::from_millis((base_ms + jitter) as u64)
    }

    /// Whether the given attempt number exceeds the configured maximum.
    pub fn should_give_up(&self, attempt: u32) -> bool {
        self.max_attempts > 0 && attempt >= self.max_attempts
    }

    /// Whether a connection that lasted `connected_for` counts as stable,
    /// resetting the backoff to its minimum.
    pub fn is_stable(&self, connected_for: Duration) -> bool {
        connected_for >= self.stable_after
    }
}

/// Cheap deterministic "random" fraction [0, 1) from the attempt number.
/// Not cryptographically secure, just enough to spread reconnect storms.
fn pseudo_random_fraction(attempt: u32) -> f64 {
    let hash = attempt.wrapping_mul(2654435761); // Knuth multiplicative hash
    (hash as f64) / (u32::MAX as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_delay_is_monotone_up_to_cap() {
        let p = ReconnectBackoff::default();
        let mut prev = Duration::ZERO;
        for attempt in 0..20 {
            let d = p.base_delay(attempt);
            assert!(d >= prev, "attempt {attempt}: {d:?} < {prev:?}");
            assert!(d <= p.max_delay);
            prev = d;
        }
        assert_eq!(p.base_delay(19), p.max_delay);
    }

    #[test]
    fn jitter_stays_within_a_quarter_of_base() {
        let p = ReconnectBackoff::default();
        for attempt in 0..20 {
            let base = p.base_delay(attempt);
            let jittered = p.delay_for_attempt(attempt);
            assert!(jittered >= base);
            assert!(jittered <= base + base.mul_f64(0.25) + Duration::from_millis(1));
        }
    }

    #[test]
    fn huge_attempt_numbers_do_not_overflow() {
        let p = ReconnectBackoff::default();
        assert_eq!(p.base_delay(u32::MAX), p.max_delay);
    }

    #[test]
    fn should_give_up_when_limited() {
        let p = ReconnectBackoff {
            max_attempts: 5,
            ..Default::default()
        };
        assert!(!p.should_give_up(4));
        assert!(p.should_give_up(5));
        assert!(p.should_give_up(6));
    }

    #[test]
    fn unlimited_never_gives_up() {
        let p = ReconnectBackoff::default();
        assert!(!p.should_give_up(1_000_000));
    }

    #[test]
    fn stability_requires_sustained_connection() {
        let p = ReconnectBackoff {
            stable_after: Duration::from_secs(30),
            ..Default::default()
        };
        assert!(!p.is_stable(Duration::from_secs(2)));
        assert!(p.is_stable(Duration::from_secs(30)));
        assert!(p.is_stable(Duration::from_secs(300)));
    }
}
