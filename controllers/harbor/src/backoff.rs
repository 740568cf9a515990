//! # Exponential Backoff
//!
//! Provides a doubling backoff for requeues.
//!
//! Two sequences are in use by the reconciler framework:
//! - progress polling while children converge: 2s, 4s, 8s, 16s, 30s (max)
//! - transient failures: 1s, 2s, 4s, ... capped at the configured
//!   `max-requeue-backoff` (5m by default)

use std::time::Duration;

/// Exponential backoff calculator
///
/// Each call to `next_backoff()` returns the current delay and doubles it for
/// the following call, never exceeding `max`.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Minimum backoff (for reset)
    min: Duration,
    /// Backoff returned by the next call
    current: Duration,
    /// Maximum backoff
    max: Duration,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified minimum and maximum values
    ///
    /// # Arguments
    ///
    /// * `min` - First delay returned, and the value restored by `reset()`
    /// * `max` - Ceiling of the sequence; a `max` below `min` is raised to `min`
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            current: min,
            max: max.max(min),
        }
    }

    /// Get the next backoff duration and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        result
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(2), Duration::from_secs(30));

        // Progress sequence: 2s, 4s, 8s, 16s, 30s (max)
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(4));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(8));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(16));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(30));
        // Should stay at max
        assert_eq!(backoff.next_backoff(), Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(300));

        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(4));

        backoff.reset();

        // Should restart from beginning after success
        assert_eq!(backoff.next_backoff(), Duration::from_secs(1));
        assert_eq!(backoff.next_backoff(), Duration::from_secs(2));
    }
}
