//! Request pacing.
//!
//! Before every upstream request the fetch client pauses for a random
//! duration inside the configured range. This keeps request spacing
//! irregular and at least `min` apart; it has no bearing on correctness, so
//! tests swap in [`NoPacing`].

use rand::Rng;
use std::time::Duration;
use tracing::debug;

use super::network::{NetworkOptions, MAX_BACKOFF};

/// Something that may block the caller before a request goes out.
pub trait Pacer: Send + Sync {
    fn pause(&self);
}

/// Sleeps for a uniformly random duration in `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitteredPacer {
    min: Duration,
    max: Duration,
}

impl JitteredPacer {
    /// Bounds are in seconds. Negative, reversed or oversized bounds are
    /// clamped so that `0 <= min <= max <= MAX_BACKOFF`.
    pub fn new(min_secs: f64, max_secs: f64) -> Self {
        let ceiling = MAX_BACKOFF.as_secs_f64();
        let min = if min_secs.is_finite() { min_secs.clamp(0.0, ceiling) } else { 0.0 };
        let max = if max_secs.is_finite() { max_secs.clamp(min, ceiling) } else { min };
        Self {
            min: Duration::from_secs_f64(min),
            max: Duration::from_secs_f64(max),
        }
    }

    pub fn from_options(options: &NetworkOptions) -> Self {
        let (min, max) = options.jittered_delay_range;
        Self::new(min, max)
    }

    pub fn bounds(&self) -> (Duration, Duration) {
        (self.min, self.max)
    }

    /// Draw one delay.
    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let secs = rand::thread_rng().gen_range(self.min.as_secs_f64()..=self.max.as_secs_f64());
        // f64 round-trips can land a nanosecond outside the range.
        Duration::from_secs_f64(secs).clamp(self.min, self.max)
    }
}

impl Pacer for JitteredPacer {
    fn pause(&self) {
        let delay = self.sample();
        if !delay.is_zero() {
            debug!(delay_ms = delay.as_millis() as u64, "pacing before request");
            std::thread::sleep(delay);
        }
    }
}

/// No delay at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacing;

impl Pacer for NoPacing {
    fn pause(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_stay_in_bounds() {
        let pacer = JitteredPacer::new(0.25, 0.75);
        for _ in 0..200 {
            let d = pacer.sample();
            assert!(d >= Duration::from_millis(250), "{d:?} below min");
            assert!(d <= Duration::from_millis(750), "{d:?} above max");
        }
    }

    #[test]
    fn degenerate_range_is_fixed() {
        let pacer = JitteredPacer::new(0.0, 0.0);
        assert_eq!(pacer.sample(), Duration::ZERO);
        pacer.pause();
    }

    #[test]
    fn bad_bounds_are_clamped() {
        let pacer = JitteredPacer::new(-1.0, -2.0);
        assert_eq!(pacer.bounds(), (Duration::ZERO, Duration::ZERO));

        let pacer = JitteredPacer::new(2.0, 1.0);
        assert_eq!(pacer.bounds(), (Duration::from_secs(2), Duration::from_secs(2)));
    }

    #[test]
    fn oversized_bounds_are_capped() {
        let pacer = JitteredPacer::new(0.0, 1e20);
        assert_eq!(pacer.bounds(), (Duration::ZERO, MAX_BACKOFF));

        let pacer = JitteredPacer::new(1e20, f64::INFINITY);
        assert_eq!(pacer.bounds(), (MAX_BACKOFF, MAX_BACKOFF));
    }

    #[test]
    fn built_from_network_options() {
        let pacer = JitteredPacer::from_options(&NetworkOptions::default());
        assert_eq!(
            pacer.bounds(),
            (Duration::from_millis(500), Duration::from_secs(2))
        );
    }
}
