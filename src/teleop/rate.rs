use std::time::{Duration, Instant};

/// Paces a loop to a fixed wall-clock frequency.
///
/// `sleep` waits out the remainder of the current period and then restarts
/// the period from *now*: a late tick is never compensated by faster
/// subsequent ticks (soft real time, no debt).
#[derive(Debug)]
pub struct RateLimiter {
    period: Duration,
    dt: f64,
    last: Instant,
}

impl RateLimiter {
    pub fn new(frequency: f64) -> RateLimiter {
        let dt = 1.0 / frequency;
        RateLimiter {
            period: Duration::from_secs_f64(dt),
            dt,
            last: Instant::now(),
        }
    }

    /// Timestep in seconds matching the configured frequency.
    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn sleep(&mut self) {
        let elapsed = self.last.elapsed();
        if elapsed < self.period {
            std::thread::sleep(self.period - elapsed);
        }
        self.last = Instant::now();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_dt() {
        let rate = RateLimiter::new(200.0);
        assert!((rate.dt() - 0.005).abs() < 1e-12);
    }

    #[test]
    fn test_sleep_fills_the_period() {
        let mut rate = RateLimiter::new(100.0);
        let start = Instant::now();
        rate.sleep();
        assert!(start.elapsed() >= Duration::from_millis(9));
    }

    #[test]
    fn test_missed_time_is_dropped() {
        let mut rate = RateLimiter::new(100.0);
        std::thread::sleep(Duration::from_millis(30));
        let start = Instant::now();
        rate.sleep();
        // already late: returns immediately instead of banking the overrun
        assert!(start.elapsed() < Duration::from_millis(10));
    }
}
