//! Publishing an application with the external toolchain

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::process::Command;
use tracing::{error, info, info_span, Instrument};

use crate::command::run_to_completion;
use crate::config::{HarnessConfig, ToolchainConfig};
use crate::error::{HarnessError, HarnessResult};
use crate::output::{OutputSink, TracingSink};
use crate::params::DeploymentParameters;

/// Runs `<toolchain> publish` for a set of deployment parameters
#[derive(Debug, Clone)]
pub struct Publisher {
    toolchain: ToolchainConfig,
    environment_variable: String,
}

impl Publisher {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            toolchain: config.toolchain.clone(),
            environment_variable: config.host.environment_variable.clone(),
        }
    }

    /// Project file for the application
    pub fn project_path(&self, params: &DeploymentParameters) -> PathBuf {
        let name = Path::new(params.application_name())
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| params.application_name().to_string());
        params
            .application_path()
            .join(format!("{}.{}", name, self.toolchain.project_extension))
    }

    /// Arguments passed to the toolchain, in order
    pub fn publish_args(&self, params: &DeploymentParameters) -> Vec<String> {
        let mut args = vec![
            "publish".to_string(),
            self.project_path(params).display().to_string(),
            "--output".to_string(),
            params.published_root().display().to_string(),
            "--framework".to_string(),
            params.target_framework().to_string(),
            "--configuration".to_string(),
            params.configuration().to_string(),
        ];
        args.extend(params.additional_publish_args().iter().cloned());
        args
    }

    /// Publish the application, logging its output
    pub async fn publish(&self, params: &DeploymentParameters) -> HarnessResult<()> {
        let sink = Arc::new(TracingSink::new(format!("{}-publish", params.application_name())));
        self.publish_with_sink(params, sink).await
    }

    /// Publish the application and forward its output to `sink`.
    ///
    /// Returns once the toolchain has exited and both of its streams are
    /// drained.
    pub async fn publish_with_sink(
        &self,
        params: &DeploymentParameters,
        sink: Arc<dyn OutputSink>,
    ) -> HarnessResult<()> {
        if params.target_framework().is_empty() {
            return Err(HarnessError::Configuration(
                "A target framework must be specified in the deployment parameters for applications that require publishing before deployment".to_string(),
            ));
        }

        let span = info_span!("publish", app = %params.application_name(), flavor = %params.runtime_flavor());
        self.run(params, sink).instrument(span).await
    }

    async fn run(&self, params: &DeploymentParameters, sink: Arc<dyn OutputSink>) -> HarnessResult<()> {
        let program = self.toolchain.program.display().to_string();
        let args = self.publish_args(params);

        let mut cmd = Command::new(&self.toolchain.program);
        cmd.args(&args).current_dir(params.application_path());
        for (name, value) in &self.toolchain.environment {
            cmd.env(name, value);
        }
        cmd.env(&self.environment_variable, params.environment_name());
        params.publish_environment().apply_to(&mut cmd);

        info!("Executing command {} {}", program, args.join(" "));

        let completed = run_to_completion(cmd, sink).await.map_err(|e| HarnessError::BuildFailure {
            program: program.clone(),
            exit_code: -1,
            output: format!("failed to start {}: {}", program, e),
        })?;

        let exit_code = completed.exit_code();
        if !completed.status.success() {
            error!("{} publish exited with exit code : {}", program, exit_code);
            return Err(HarnessError::BuildFailure {
                program,
                exit_code,
                output: completed.output.text(),
            });
        }

        info!("{} publish finished with exit code : {}", program, exit_code);
        Ok(())
    }
}
