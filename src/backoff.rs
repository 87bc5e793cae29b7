//! Exponential backoff with additive jitter.
//!
//! `delay(attempt) = capped + uniform(0, 0.1 * capped)` where
//! `capped = min(max_delay, base_delay * 2^attempt)`. The jitter is only ever added,
//! so the realized delay lies in `[capped, 1.1 * capped]`.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::LLMError;

/// Upper bound of the jitter term, as a fraction of the capped delay.
pub const JITTER_RATIO: f64 = 0.1;

/// Pure delay calculator; holds no retry state of its own.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
}

impl Backoff {
    /// Builds a policy after validating the two bounds.
    ///
    /// # Errors
    ///
    /// Returns [`LLMError::InvalidConfig`] when `base_delay` is zero or
    /// `max_delay < base_delay`.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Result<Self, LLMError> {
        if base_delay.is_zero() {
            return Err(LLMError::InvalidConfig {
                field: "base_delay".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if max_delay < base_delay {
            return Err(LLMError::InvalidConfig {
                field: "max_delay".to_string(),
                reason: format!(
                    "must be at least base_delay ({base_delay:?}), got {max_delay:?}"
                ),
            });
        }
        Ok(Self {
            base_delay,
            max_delay,
        })
    }

    /// Builds the policy described by a [`RetryConfig`].
    pub fn from_config(config: &RetryConfig) -> Result<Self, LLMError> {
        Self::new(config.base_delay, config.max_delay)
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Exponential term without jitter, capped at `max_delay`.
    ///
    /// `attempt` is 0-indexed: the first failure waits `capped_delay(0) == base_delay`.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let factor = 2f64.powi(attempt.min(i32::MAX as u32) as i32);
        let exponential = self.base_delay.as_secs_f64() * factor;
        let capped = exponential.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Delay for `attempt` with a jitter draw taken from `rng`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    /// use rand::SeedableRng;
    /// use rand::rngs::StdRng;
    /// use wilma_llm::backoff::Backoff;
    ///
    /// let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(20)).unwrap();
    /// let mut rng = StdRng::seed_from_u64(7);
    /// let delay = backoff.delay(2, &mut rng);
    /// assert!(delay >= Duration::from_secs(4));
    /// assert!(delay <= Duration::from_secs_f64(4.4));
    /// ```
    pub fn delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        self.delay_with_jitter(attempt, rng.gen_range(0.0..=1.0))
    }

    /// Deterministic form of [`Backoff::delay`]: `fraction` in `[0, 1]` selects the
    /// point inside the jitter window. Out-of-range fractions are clamped.
    pub fn delay_with_jitter(&self, attempt: u32, fraction: f64) -> Duration {
        let capped = self.capped_delay(attempt);
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        capped + capped.mul_f64(JITTER_RATIO * fraction)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: crate::config::DEFAULT_BASE_DELAY,
            max_delay: crate::config::DEFAULT_MAX_DELAY,
        }
    }
}
