use crate::config::types::{ImgboxError, Result};
use crate::region::HEADER_SIZE;
/// Loader configuration, passed explicitly into every spawn
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const BYTES_PER_MB: usize = 1024 * 1024;

/// Unprivileged identity the worker drops to (traditional `nobody`)
pub const DEFAULT_SANDBOX_ID: u32 = 65534;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Result region capacity per job, in MiB
    pub max_region_mb: usize,
    /// Install the syscall allow-list inside the worker
    pub syscall_filter: bool,
    pub sandbox_uid: u32,
    pub sandbox_gid: u32,
    /// Upper bound on the reap that follows a forced kill in reset
    pub reap_timeout_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_region_mb: 64,
            syscall_filter: true,
            sandbox_uid: DEFAULT_SANDBOX_ID,
            sandbox_gid: DEFAULT_SANDBOX_ID,
            reap_timeout_ms: 5_000,
        }
    }
}

impl LoaderConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ImgboxError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: LoaderConfig = serde_json::from_str(&content).map_err(|e| {
            ImgboxError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_max_region_mb(mut self, mb: usize) -> Self {
        self.max_region_mb = mb;
        self
    }

    pub fn with_syscall_filter(mut self, enabled: bool) -> Self {
        self.syscall_filter = enabled;
        self
    }

    /// Region capacity in bytes
    pub fn capacity_bytes(&self) -> Result<usize> {
        self.max_region_mb
            .checked_mul(BYTES_PER_MB)
            .ok_or_else(|| {
                ImgboxError::Config(format!(
                    "max_region_mb={} overflows the address space",
                    self.max_region_mb
                ))
            })
    }

    pub fn reap_timeout(&self) -> Duration {
        Duration::from_millis(self.reap_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_region_mb == 0 {
            return Err(ImgboxError::Config(
                "max_region_mb must be greater than zero".to_string(),
            ));
        }

        let capacity = self.capacity_bytes()?;
        if capacity <= HEADER_SIZE {
            return Err(ImgboxError::Config(format!(
                "region capacity {} leaves no room after the {}-byte header",
                capacity, HEADER_SIZE
            )));
        }

        if self.reap_timeout_ms == 0 {
            return Err(ImgboxError::Config(
                "reap_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
