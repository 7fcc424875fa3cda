//! Package restore collaborators

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, info_span, Instrument};

use crate::command::run_to_completion;
use crate::config::ToolchainConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::output::TracingSink;

/// Restores an application's packages into a cache directory
#[async_trait]
pub trait Restorer: Send + Sync {
    async fn restore(&self, application_path: &Path, package_cache: &Path) -> HarnessResult<()>;
}

/// Restores with `<toolchain> restore --packages <cache> [-s <feed>]...`
#[derive(Debug, Clone)]
pub struct ToolchainRestorer {
    toolchain: ToolchainConfig,
}

impl ToolchainRestorer {
    pub fn new(toolchain: ToolchainConfig) -> Self {
        Self { toolchain }
    }

    pub fn restore_args(&self, package_cache: &Path) -> Vec<String> {
        let mut args = vec![
            "restore".to_string(),
            "--packages".to_string(),
            package_cache.display().to_string(),
        ];
        for feed in &self.toolchain.restore_feeds {
            args.push("-s".to_string());
            args.push(feed.clone());
        }
        args
    }
}

#[async_trait]
impl Restorer for ToolchainRestorer {
    async fn restore(&self, application_path: &Path, package_cache: &Path) -> HarnessResult<()> {
        let application = application_path.display().to_string();
        let args = self.restore_args(package_cache);

        let mut cmd = Command::new(&self.toolchain.program);
        cmd.args(&args).current_dir(application_path);
        for (name, value) in &self.toolchain.environment {
            cmd.env(name, value);
        }

        let span = info_span!("restore", app = %application);
        async {
            info!("Executing command {} {}", self.toolchain.program.display(), args.join(" "));

            let sink = Arc::new(TracingSink::new("restore"));
            let completed = run_to_completion(cmd, sink)
                .await
                .map_err(|e| HarnessError::RestoreFailure {
                    application: application.clone(),
                    reason: e.to_string(),
                })?;

            if !completed.status.success() {
                return Err(HarnessError::RestoreFailure {
                    application: application.clone(),
                    reason: format!(
                        "exit code {}\n{}",
                        completed.exit_code(),
                        completed.output.text()
                    ),
                });
            }
            Ok(())
        }
        .instrument(span)
        .await
    }
}

/// Restorer that does nothing, for prebuilt applications
#[derive(Debug, Clone, Copy, Default)]
pub struct SkipRestore;

#[async_trait]
impl Restorer for SkipRestore {
    async fn restore(&self, _application_path: &Path, _package_cache: &Path) -> HarnessResult<()> {
        Ok(())
    }
}
