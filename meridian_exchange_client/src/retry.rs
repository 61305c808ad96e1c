//! The Exchange Client's retry backoff sequence (§4.7): initial 100 ms,
//! doubling each attempt, capped at 10 s, with ±20% jitter applied around
//! each step rather than full-jitter over the whole range — deliberately
//! different from `backoff::Backoff`'s shape (see `DESIGN.md`).

use std::time::Duration;

use rand::Rng;

/// Tunables for [`RetrySequence`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExchangeBackoffConfig {
    /// First retry's un-jittered delay.
    pub init_backoff: Duration,
    /// Delay ceiling; once reached, later retries stay at this value
    /// (still jittered).
    pub max_backoff: Duration,
    /// Multiplier applied to the un-jittered delay after each retry.
    pub factor: f64,
    /// Fractional jitter applied symmetrically around the un-jittered
    /// delay, e.g. `0.2` means the actual delay is drawn uniformly from
    /// `[delay * 0.8, delay * 1.2]`.
    pub jitter: f64,
}

impl Default for ExchangeBackoffConfig {
    fn default() -> Self {
        Self {
            init_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            factor: 2.0,
            jitter: 0.2,
        }
    }
}

/// Produces successive retry delays per [`ExchangeBackoffConfig`]. Unlike
/// `backoff::Backoff`, the un-jittered delay grows deterministically
/// (`* factor` each step, capped at `max_backoff`) and jitter is applied as
/// a symmetric band around that value rather than a full-jitter draw over
/// `[init, prev * factor)` — the two retry shapes this workspace needs are
/// different enough that sharing one implementation would mean threading a
/// jitter-strategy enum through `backoff::Backoff` for a single caller.
#[derive(Debug)]
pub struct RetrySequence {
    config: ExchangeBackoffConfig,
    next_delay_secs: f64,
}

impl RetrySequence {
    /// Construct a fresh sequence; the first call to [`Self::next_delay`]
    /// returns a value jittered around `config.init_backoff`.
    pub fn new(config: ExchangeBackoffConfig) -> Self {
        let next_delay_secs = config.init_backoff.as_secs_f64();
        Self {
            config,
            next_delay_secs,
        }
    }

    /// Reset to the initial delay, e.g. after a successful request.
    pub fn reset(&mut self) {
        self.next_delay_secs = self.config.init_backoff.as_secs_f64();
    }

    /// The jittered delay to wait before the next retry, advancing the
    /// sequence's un-jittered delay for the call after that.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with_rng(&mut rand::thread_rng())
    }

    /// Same as [`Self::next_delay`] with an injected RNG, for deterministic
    /// tests.
    pub fn next_delay_with_rng(&mut self, rng: &mut impl Rng) -> Duration {
        let base = self.next_delay_secs;
        let span = base * self.config.jitter;
        let low = (base - span).max(0.0);
        let high = base + span;
        let actual = if high > low {
            rng.gen_range(low..=high)
        } else {
            base
        };

        let max_secs = self.config.max_backoff.as_secs_f64();
        self.next_delay_secs = (base * self.config.factor).min(max_secs);

        Duration::from_secs_f64(actual.clamp(0.0, max_secs * (1.0 + self.config.jitter)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn first_delay_is_jittered_around_init_backoff() {
        let config = ExchangeBackoffConfig::default();
        let mut seq = RetrySequence::new(config);

        // StepRng::new(0, 0) always returns the low end of any gen_range.
        let mut low_rng = StepRng::new(0, 0);
        let delay = seq.next_delay_with_rng(&mut low_rng);
        assert!((delay.as_secs_f64() - 0.08).abs() < 1e-6, "{delay:?}");
    }

    #[test]
    fn delay_grows_by_factor_each_step_until_capped() {
        let config = ExchangeBackoffConfig::default();
        let mut seq = RetrySequence::new(config);
        let mut mid_rng = StepRng::new(u64::MAX / 2, 0);

        let mut expected = config.init_backoff.as_secs_f64();
        for _ in 0..10 {
            let delay = seq.next_delay_with_rng(&mut mid_rng);
            assert!((delay.as_secs_f64() - expected).abs() < 1e-3, "{delay:?} vs {expected}");
            expected = (expected * config.factor).min(config.max_backoff.as_secs_f64());
        }
    }

    #[test]
    fn delay_never_exceeds_max_backoff_plus_jitter_band() {
        let config = ExchangeBackoffConfig::default();
        let mut seq = RetrySequence::new(config);
        let mut high_rng = StepRng::new(u64::MAX, 0);

        for _ in 0..50 {
            let delay = seq.next_delay_with_rng(&mut high_rng);
            assert!(delay <= config.max_backoff.mul_f64(1.0 + config.jitter));
        }
    }

    #[test]
    fn reset_returns_to_initial_delay() {
        let config = ExchangeBackoffConfig::default();
        let mut seq = RetrySequence::new(config);
        let mut rng = StepRng::new(0, 0);
        seq.next_delay_with_rng(&mut rng);
        seq.next_delay_with_rng(&mut rng);
        seq.reset();
        let delay = seq.next_delay_with_rng(&mut rng);
        assert!((delay.as_secs_f64() - 0.08).abs() < 1e-6);
    }
}
