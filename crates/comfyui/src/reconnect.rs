//! Exponential-backoff timing for event-stream reconnection.
//!
//! The delay doubles after every failed attempt up to a cap and is reset
//! after a successful connection. Each wait is jittered so that listeners
//! for several devices do not reconnect in lockstep after a shared backend
//! restart.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts (before jitter).
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random (0.0 disables).
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Spread `delay` uniformly over `delay * (1 +- jitter)`.
pub fn jittered(delay: Duration, config: &ReconnectConfig) -> Duration {
    let jitter = config.jitter.clamp(0.0, 1.0);
    if jitter == 0.0 || delay.is_zero() {
        return delay;
    }
    let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
    delay.mul_f64(factor)
}

/// Sleep for `delay`, returning `false` if `cancel` fires first.
pub async fn wait(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_delay_doubles() {
        let config = ReconnectConfig::default();
        let d = next_delay(Duration::from_secs(1), &config);
        assert_eq!(d, Duration::from_secs(2));
    }

    #[test]
    fn next_delay_clamps_at_max() {
        let config = ReconnectConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        let d = next_delay(Duration::from_secs(8), &config);
        assert_eq!(d, Duration::from_secs(10));
    }

    #[test]
    fn full_backoff_sequence() {
        let config = ReconnectConfig::default();
        let mut delay = config.initial_delay;
        let expected = [1, 2, 4, 8, 16, 30, 30, 30];

        for &expected_secs in &expected {
            assert_eq!(delay.as_secs(), expected_secs);
            delay = next_delay(delay, &config);
        }
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = ReconnectConfig::default();
        let base = Duration::from_secs(10);
        for _ in 0..200 {
            let d = jittered(base, &config);
            assert!(d >= Duration::from_secs(8), "{d:?} below lower bound");
            assert!(d <= Duration::from_secs(12), "{d:?} above upper bound");
        }
    }

    #[test]
    fn zero_jitter_is_exact() {
        let config = ReconnectConfig {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(jittered(Duration::from_millis(750), &config), Duration::from_millis(750));
    }

    #[tokio::test]
    async fn cancelled_wait_returns_false() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!wait(Duration::from_secs(60), &cancel).await);
    }

    #[tokio::test]
    async fn completed_wait_returns_true() {
        let cancel = CancellationToken::new();
        assert!(wait(Duration::from_millis(1), &cancel).await);
    }
}
