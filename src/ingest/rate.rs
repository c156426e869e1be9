//! Output frame rate cap and reconnect backoff

use std::time::{Duration, Instant};

/// Drops frames arriving faster than a configured rate
///
/// The upstream keeps sending at its own pace; surplus frames are simply not
/// forwarded.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Option<Duration>,
    last_forwarded: Option<Instant>,
}

impl RateLimiter {
    /// Create a limiter for `rate` frames per second; zero, negative or
    /// non-finite rates mean unlimited
    pub fn new(rate: f64) -> Self {
        let interval = (rate.is_finite() && rate > 0.0)
            .then(|| Duration::try_from_secs_f64(1.0 / rate).unwrap_or(Duration::MAX));

        Self {
            interval,
            last_forwarded: None,
        }
    }

    /// Minimum spacing between forwarded frames
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Decide whether a frame decoded at `now` is forwarded
    pub fn admit(&mut self, now: Instant) -> bool {
        let Some(interval) = self.interval else {
            return true;
        };

        if let Some(last) = self.last_forwarded {
            if now.saturating_duration_since(last) < interval {
                return false;
            }
        }

        self.last_forwarded = Some(now);
        true
    }
}

/// Bounded exponential backoff between reconnect attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            current: initial,
        }
    }

    /// Delay before the next attempt; doubles on every call up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Start over after a healthy session
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_admits_everything() {
        let mut limiter = RateLimiter::new(0.0);
        let now = Instant::now();

        assert!(limiter.interval().is_none());
        assert!((0..100).all(|_| limiter.admit(now)));
    }

    #[test]
    fn test_forwarded_frames_are_spaced() {
        let rate = 4.0;
        let mut limiter = RateLimiter::new(rate);
        let start = Instant::now();

        // Upstream at 30 fps for three seconds
        let forwarded: Vec<Instant> = (0..90)
            .map(|i| start + Duration::from_millis(i * 1000 / 30))
            .filter(|t| limiter.admit(*t))
            .collect();

        assert!(forwarded.len() >= 10 && forwarded.len() <= 12);
        for pair in forwarded.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_secs_f64(1.0 / rate));
        }
    }

    #[test]
    fn test_invalid_rates_are_unlimited() {
        assert!(RateLimiter::new(-3.0).interval().is_none());
        assert!(RateLimiter::new(f64::NAN).interval().is_none());
        assert!(RateLimiter::new(f64::INFINITY).interval().is_none());
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }
}
