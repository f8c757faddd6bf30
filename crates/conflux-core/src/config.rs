//! Runtime configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for a [`Runtime`](../index.html) instance.
///
/// Queue-pool bounds and synchronization pacing live here; everything else
/// (device properties, kernel binaries) comes from the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Number of devices to bring up.
    pub device_count: usize,
    /// Size hint forwarded to hardware-queue creation.
    pub queue_size_hint: u32,
    /// Maximum hardware queues per `(priority, cu-mask, cooperative)`
    /// bucket. Streams beyond the cap multiplex existing queues.
    pub max_queues_per_bucket: usize,
    /// Completion signals pre-populated per device.
    pub signal_pool_seed: usize,
    /// Upper bound for blocking waits, in milliseconds. `None` waits
    /// indefinitely.
    pub sync_timeout_ms: Option<u64>,
    /// Poll interval for the active-poll fallback, in microseconds.
    pub poll_interval_us: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            device_count: 1,
            queue_size_hint: 1024,
            max_queues_per_bucket: 4,
            signal_pool_seed: 16,
            sync_timeout_ms: None,
            poll_interval_us: 50,
        }
    }
}

impl RuntimeConfig {
    /// Minimal configuration: one device, one queue per bucket.
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            device_count: 1,
            queue_size_hint: 64,
            max_queues_per_bucket: 1,
            signal_pool_seed: 4,
            sync_timeout_ms: None,
            poll_interval_us: 50,
        }
    }

    /// Blocking-wait bound as a [`Duration`].
    #[must_use]
    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_ms.map(Duration::from_millis)
    }

    /// Active-poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_us)
    }
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Creates a builder seeded with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the device count.
    #[must_use]
    pub fn with_devices(mut self, count: usize) -> Self {
        self.config.device_count = count;
        self
    }

    /// Sets the hardware-queue size hint.
    #[must_use]
    pub fn with_queue_size_hint(mut self, hint: u32) -> Self {
        self.config.queue_size_hint = hint;
        self
    }

    /// Sets the per-bucket queue cap.
    #[must_use]
    pub fn with_max_queues_per_bucket(mut self, max: usize) -> Self {
        self.config.max_queues_per_bucket = max;
        self
    }

    /// Sets the signal-pool seed size.
    #[must_use]
    pub fn with_signal_pool_seed(mut self, seed: usize) -> Self {
        self.config.signal_pool_seed = seed;
        self
    }

    /// Bounds blocking waits.
    #[must_use]
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.config.sync_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    /// Sets the active-poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_us = interval.as_micros() as u64;
        self
    }

    /// Builds the configuration.
    #[must_use]
    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.device_count, 1);
        assert_eq!(config.max_queues_per_bucket, 4);
        assert_eq!(config.sync_timeout(), None);
    }

    #[test]
    fn test_config_builder() {
        let config = RuntimeConfigBuilder::new()
            .with_devices(2)
            .with_max_queues_per_bucket(8)
            .with_sync_timeout(Duration::from_secs(5))
            .build();

        assert_eq!(config.device_count, 2);
        assert_eq!(config.max_queues_per_bucket, 8);
        assert_eq!(config.sync_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_config_roundtrip() {
        let config = RuntimeConfig::minimal();
        let json = serde_json::to_string(&config).unwrap();
        let back: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_queues_per_bucket, 1);
        assert_eq!(back.queue_size_hint, 64);
    }
}
