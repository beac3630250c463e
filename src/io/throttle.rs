use std::time::{Duration, Instant};

/// Delays a transfer so its average rate stays below a limit.
///
/// Call [`consume`](Self::consume) after each chunk; it sleeps just long
/// enough for the bytes seen so far to fit the configured KiB/s.
pub struct Throttle {
    bytes_per_sec: f64,
    started: Instant,
    transferred: u64,
}

impl Throttle {
    pub fn new(kib_per_sec: u64) -> Self {
        Self {
            bytes_per_sec: (kib_per_sec.max(1) * 1024) as f64,
            started: Instant::now(),
            transferred: 0,
        }
    }

    /// How long to wait after `transferred` bytes, given `elapsed` so far.
    fn delay(&self, elapsed: Duration) -> Duration {
        let target = Duration::from_secs_f64(self.transferred as f64 / self.bytes_per_sec);
        target.saturating_sub(elapsed)
    }

    pub async fn consume(&mut self, bytes: usize) {
        self.transferred += bytes as u64;
        let delay = self.delay(self.started.elapsed());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_tracks_average_rate() {
        let mut throttle = Throttle::new(1);
        throttle.transferred = 2048;

        assert_eq!(throttle.delay(Duration::ZERO), Duration::from_secs(2));
        assert_eq!(
            throttle.delay(Duration::from_millis(500)),
            Duration::from_millis(1500)
        );
        assert_eq!(throttle.delay(Duration::from_secs(3)), Duration::ZERO);
    }
}
