//! Storage backend selection.

use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use crate::error::{StorageError, StorageResult};
use crate::local::LocalStore;
use crate::s3::{S3Config, S3Store};
use crate::store::ObjectStore;

/// Which object store to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    /// S3-compatible endpoint
    S3,
    /// Mounted directory
    #[default]
    Local,
}

impl FromStr for StorageBackend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "s3" | "r2" => Ok(Self::S3),
            "local" | "mount" => Ok(Self::Local),
            other => Err(StorageError::config_error(format!(
                "Unknown storage backend '{}'",
                other
            ))),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root of the mounted store (local backend)
    pub mount_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            mount_dir: "/data".to_string(),
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let backend = match std::env::var("STORAGE_BACKEND") {
            Ok(v) => v.parse()?,
            Err(_) => StorageBackend::default(),
        };

        Ok(Self {
            backend,
            mount_dir: std::env::var("MOUNT_DIR").unwrap_or_else(|_| "/data".to_string()),
        })
    }
}

/// Build the configured store.
///
/// The S3 backend reads its credentials from the environment; missing
/// credentials are a configuration error.
pub fn connect(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config.backend {
        StorageBackend::S3 => {
            let s3 = S3Config::from_env()?;
            info!("Using S3 object store bucket={} endpoint={}", s3.bucket_name, s3.endpoint_url);
            Ok(Arc::new(S3Store::new(s3)))
        }
        StorageBackend::Local => {
            info!("Using mounted object store at {}", config.mount_dir);
            Ok(Arc::new(LocalStore::new(&config.mount_dir)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("S3".parse::<StorageBackend>().unwrap(), StorageBackend::S3);
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert!("azure".parse::<StorageBackend>().is_err());
    }
}
