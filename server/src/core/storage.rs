//! Platform-aware data storage directory management
//!
//! ## Platform Paths
//!
//! | Type | Windows | macOS | Linux |
//! |------|---------|-------|-------|
//! | Data | `%APPDATA%\engauge\` | `~/Library/Application Support/engauge/` | `$XDG_DATA_HOME/engauge/` |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

use super::constants::{APP_DOT_FOLDER, APP_NAME, ENV_DATA_DIR};
use crate::domain::storage::Resource;
use crate::utils::file::expand_path;

const ALL_RESOURCES: [Resource; 11] = [
    Resource::Interactions,
    Resource::Endpoints,
    Resource::EndpointStats,
    Resource::Origins,
    Resource::OriginStats,
    Resource::Entities,
    Resource::EntityStats,
    Resource::Properties,
    Resource::PropertyStats,
    Resource::Summaries,
    Resource::Settings,
];

/// Application storage manager: resolves the root data directory and
/// ensures every resource subdirectory exists before anything
/// else touches it.
#[derive(Debug, Clone)]
pub struct AppStorage {
    data_dir: PathBuf,
}

impl AppStorage {
    /// Initialize storage with a platform-appropriate data directory,
    /// or `data_dir_override` (from `--data-dir`/`ENGAUGE_DATA_DIR`) when set.
    pub async fn init(data_dir_override: Option<&Path>) -> Result<Self> {
        let data_dir = match data_dir_override {
            Some(p) => p.to_path_buf(),
            None => Self::resolve_data_dir(),
        };

        Self::ensure_directories_static(&data_dir).await?;

        // Canonicalize after creation so logging shows the real path.
        let data_dir = data_dir.canonicalize().unwrap_or(data_dir);
        tracing::debug!(data_dir = %data_dir.display(), "Storage initialized");

        Ok(Self { data_dir })
    }

    /// Resolve data directory from env var or platform default
    pub fn resolve_data_dir() -> PathBuf {
        // Check env var override first
        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            return expand_path(&dir);
        }

        // Use platform-specific directory
        if let Some(proj_dirs) = ProjectDirs::from("", "", APP_NAME) {
            return proj_dirs.data_dir().to_path_buf();
        }

        // Fallback to local .engauge
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        cwd.join(APP_DOT_FOLDER)
    }

    /// Create the data directory and one subdirectory per resource.
    async fn ensure_directories_static(data_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        for resource in ALL_RESOURCES {
            let path = data_dir.join(resource.dir_name());
            tokio::fs::create_dir_all(&path).await.with_context(|| {
                format!(
                    "Failed to create {} directory: {}",
                    resource.dir_name(),
                    path.display()
                )
            })?;
        }

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get path to a resource's subdirectory (canonicalized)
    pub fn resource_dir(&self, resource: Resource) -> PathBuf {
        let path = self.data_dir.join(resource.dir_name());
        path.canonicalize().unwrap_or(path)
    }

    /// Create AppStorage for testing with a specific data directory
    #[cfg(test)]
    pub fn init_for_test(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_data_dir_fallback() {
        // SAFETY: Test runs single-threaded, no concurrent access to env var
        unsafe { std::env::remove_var(ENV_DATA_DIR) };
        let path = AppStorage::resolve_data_dir();
        assert!(!path.as_os_str().is_empty());
    }

    #[tokio::test]
    async fn init_creates_every_resource_subdir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = AppStorage::init(Some(dir.path())).await.unwrap();
        for resource in ALL_RESOURCES {
            assert!(storage.resource_dir(resource).is_dir());
        }
    }
}
