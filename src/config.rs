use std::time::Duration;

/// Tuning knobs for fetching remote data.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Capacity of buffered readers over downloaded data, in bytes
    pub buffer_size: usize,
    /// Maximum download speed in KiB/s. `None` disables throttling.
    pub download_speed: Option<u64>,
    /// Timeout for establishing HTTP connections
    pub connect_timeout: Duration,
}

impl UpdateConfig {
    pub const DEFAULT_BUFFER_SIZE: usize = 8192;

    /// Set the download speed limit; `0` means unlimited.
    pub fn with_download_speed(mut self, kib_per_sec: u64) -> Self {
        self.download_speed = (kib_per_sec > 0).then_some(kib_per_sec);
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            buffer_size: Self::DEFAULT_BUFFER_SIZE,
            download_speed: None,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_speed_disables_throttling() {
        let config = UpdateConfig::default().with_download_speed(0);
        assert_eq!(config.download_speed, None);

        let config = UpdateConfig::default().with_download_speed(64);
        assert_eq!(config.download_speed, Some(64));
    }

    #[test]
    fn buffer_size_is_never_zero() {
        let config = UpdateConfig::default().with_buffer_size(0);
        assert_eq!(config.buffer_size, 1);
    }
}
