//! Quadratic reconnect backoff.

use std::time::Duration;

use rand::Rng;

/// Reconnect/backoff policy shared by the session and signaling clients.
#[derive(Clone, Copy, Debug)]
pub struct BackoffConfig {
    /// Number of waits granted before the budget is exhausted.
    pub max_retries: u32,
    /// Delay unit, scaled by the square of the retry count.
    pub base_interval: Duration,
    /// Maximum random delay unit, scaled by the square of the retry count.
    pub jitter: Duration,
}

impl BackoffConfig {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.base_interval.is_zero() {
            return Err("Backoff base interval must be > 0".to_string());
        }
        Ok(())
    }
}

/// Delay for `retry_count` given a random sample in `[0, 1)`.
///
/// `retry_count² × base_interval + retry_count² × jitter × sample`
pub(crate) fn calculate_backoff(config: BackoffConfig, retry_count: u32, sample: f64) -> Duration {
    let squared = retry_count.saturating_mul(retry_count);
    let base = config.base_interval.saturating_mul(squared);
    let jitter = config.jitter.as_secs_f64() * f64::from(squared) * sample.clamp(0.0, 1.0);
    base.saturating_add(Duration::try_from_secs_f64(jitter).unwrap_or(Duration::MAX))
}

/// Retry counter with a budget.
///
/// Owned and mutated by a single reconnect loop; [`Backoff::wait`] consumes
/// one unit of the budget per call.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    retry_count: u32,
}

impl Backoff {
    /// Create a backoff with a zeroed retry count.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            retry_count: 0,
        }
    }

    /// Number of waits performed since the last reset.
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Whether the retry budget is used up.
    pub fn is_exhausted(&self) -> bool {
        self.retry_count >= self.config.max_retries
    }

    /// Minimum possible delay for the given retry count.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        calculate_backoff(self.config, retry_count, 0.0)
    }

    /// Jittered delay for the current retry count.
    pub fn sample_delay(&self) -> Duration {
        if self.config.jitter.is_zero() {
            return self.delay_for(self.retry_count);
        }
        let sample = rand::rng().random::<f64>();
        calculate_backoff(self.config, self.retry_count, sample)
    }

    /// Sleep for the current backoff delay, then count the retry.
    ///
    /// Returns `false` without sleeping once the budget is exhausted.
    pub async fn wait(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        let delay = self.sample_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.retry_count += 1;
        true
    }

    /// Zero the retry count after a successful reconnect.
    pub fn reset(&mut self) {
        self.retry_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::*;

    fn config(max_retries: u32, jitter: Duration) -> BackoffConfig {
        BackoffConfig {
            max_retries,
            base_interval: Duration::from_millis(100),
            jitter,
        }
    }

    #[test]
    fn calculate_backoff_is_quadratic() {
        let config = config(10, Duration::from_millis(50));

        assert_eq!(calculate_backoff(config, 0, 0.5), Duration::ZERO);
        assert_eq!(calculate_backoff(config, 1, 0.0), Duration::from_millis(100));
        assert_eq!(calculate_backoff(config, 2, 0.0), Duration::from_millis(400));
        assert_eq!(calculate_backoff(config, 3, 0.0), Duration::from_millis(900));
        // 3² × 50ms × 0.5
        assert_eq!(calculate_backoff(config, 3, 0.5), Duration::from_millis(1125));
    }

    #[test]
    fn minimum_delay_is_monotonic() {
        let backoff = Backoff::new(config(10, Duration::from_millis(50)));
        let delays: Vec<_> = (0..10).map(|n| backoff.delay_for(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn sampled_delay_stays_within_bounds() {
        let mut backoff = Backoff::new(config(10, Duration::from_millis(50)));
        backoff.retry_count = 2;
        for _ in 0..100 {
            let delay = backoff.sample_delay();
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(600));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sleeps_then_counts() {
        let mut backoff = Backoff::new(config(3, Duration::ZERO));

        let start = Instant::now();
        assert!(backoff.wait().await);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(backoff.retry_count(), 1);

        let start = Instant::now();
        assert!(backoff.wait().await);
        assert_eq!(start.elapsed(), Duration::from_millis(100));

        let start = Instant::now();
        assert!(backoff.wait().await);
        assert_eq!(start.elapsed(), Duration::from_millis(400));
        assert!(backoff.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_false_once_exhausted() {
        let mut backoff = Backoff::new(config(2, Duration::from_millis(10)));
        assert!(backoff.wait().await);
        assert!(backoff.wait().await);

        let start = Instant::now();
        assert!(!backoff.wait().await);
        assert!(!backoff.wait().await);
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(backoff.retry_count(), 2);

        backoff.reset();
        assert_eq!(backoff.retry_count(), 0);
        assert!(!backoff.is_exhausted());
        assert!(backoff.wait().await);
    }

    #[test]
    fn validate_rejects_zero_interval() {
        let mut config = config(1, Duration::ZERO);
        config.base_interval = Duration::ZERO;
        assert_eq!(
            config.validate().unwrap_err(),
            "Backoff base interval must be > 0"
        );
    }
}
