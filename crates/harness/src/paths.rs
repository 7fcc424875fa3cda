//! Locating test applications on disk

use std::path::{Path, PathBuf};

use crate::config::FixtureConfig;
use crate::error::{HarnessError, HarnessResult};

/// Walk up from `start` to the first directory containing `marker`
pub fn find_workspace_root(start: &Path, marker: &str) -> HarnessResult<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(marker).is_file())
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            HarnessError::Configuration(format!(
                "Workspace root containing {} could not be found above {}",
                marker,
                start.display()
            ))
        })
}

/// Directory layout for test applications
#[derive(Debug, Clone)]
pub struct ApplicationPaths {
    root: PathBuf,
    apps_dir: String,
}

impl ApplicationPaths {
    pub fn new(root: impl Into<PathBuf>, apps_dir: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            apps_dir: apps_dir.into(),
        }
    }

    /// Discover the workspace from `start` using the fixture configuration
    pub fn discover(start: &Path, config: &FixtureConfig) -> HarnessResult<Self> {
        let root = find_workspace_root(start, &config.workspace_marker)?;
        Ok(Self::new(root, config.apps_dir.clone()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_packages_dir(&self) -> PathBuf {
        self.root.join("artifacts").join("build")
    }

    pub fn test_app_dir(&self, application_name: &str) -> PathBuf {
        self.root.join(&self.apps_dir).join(application_name)
    }
}
