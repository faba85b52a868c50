use std::time::Duration;

use super::types::SessionConfig;
use crate::error::{Error, Result};
use crate::protocols::kv::DEFAULT_MAX_FRAME_SIZE;

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_list_timeout: Duration::from_secs(2),
            result_base_timeout: Duration::from_secs(2),
            result_per_device_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device_list_timeout(mut self, timeout: Duration) -> Self {
        self.device_list_timeout = timeout;
        self
    }

    pub fn with_result_base_timeout(mut self, timeout: Duration) -> Self {
        self.result_base_timeout = timeout;
        self
    }

    pub fn with_result_per_device_timeout(mut self, timeout: Duration) -> Self {
        self.result_per_device_timeout = timeout;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Bound on the wait for the `updated=` frame. The server flashes the
    /// targets one after another, so the bound grows with the target count.
    pub fn result_timeout(&self, target_count: usize) -> Duration {
        let count = u32::try_from(target_count).unwrap_or(u32::MAX);
        self.result_base_timeout
            .saturating_add(self.result_per_device_timeout.saturating_mul(count))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size == 0 {
            return Err(Error::Configuration("maximum frame size must be non-zero".into()));
        }

        Ok(())
    }
}
