//! Test fixtures owning restore state and isolated directories
//!
//! An [`ApplicationFixture`] is created once per application under test. It
//! restores packages the first time a deployment is requested, hands out
//! [`Deployer`]s whose publish roots live in the fixture's private working
//! directory, and on disposal stops every host it launched before removing
//! its directories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::launcher::{DeploymentResult, HostController, Launcher, Supervisor};
use crate::output::{OutputSink, TracingSink};
use crate::params::{DeploymentParameters, RuntimeFlavor};
use crate::probe::HttpProbe;
use crate::publish::Publisher;
use crate::restore::{Restorer, ToolchainRestorer};
use crate::state::{DeploymentState, StateCell};

/// Inputs available to a parameter strategy
#[derive(Debug)]
pub struct FixtureContext<'a> {
    pub application_name: &'a str,
    pub application_path: &'a Path,
    pub package_cache: &'a Path,
    /// Fresh publish root for this deployment
    pub publish_root: PathBuf,
    pub config: &'a HarnessConfig,
}

/// Produces deployment parameters for a flavor
pub type ParameterStrategy =
    Arc<dyn Fn(&FixtureContext<'_>, RuntimeFlavor) -> DeploymentParameters + Send + Sync>;

/// Standard parameters: per-flavor framework, isolated package cache and the
/// toolchain variables injected into both publish and host.
pub fn default_parameters(ctx: &FixtureContext<'_>, flavor: RuntimeFlavor) -> DeploymentParameters {
    let config = ctx.config;
    let package_cache = ctx.package_cache.display().to_string();

    let mut builder = DeploymentParameters::builder(ctx.application_path, ctx.application_name, flavor)
        .target_framework(config.toolchain.framework_for(flavor))
        .configuration(config.toolchain.configuration.as_str())
        .published_root(ctx.publish_root.clone())
        .environment_name(config.host.environment_name.as_str())
        .base_uri_hint(config.host.base_uri_hint.as_str())
        .env(&config.toolchain.package_cache_variable, &package_cache);

    for (name, value) in &config.toolchain.environment {
        builder = builder.env(name, value);
    }

    builder.build()
}

/// Per-application fixture state
pub struct ApplicationFixture {
    application_name: String,
    application_path: PathBuf,
    working_dir: PathBuf,
    package_cache: PathBuf,
    owns_package_cache: bool,
    restored: bool,
    restorer: Arc<dyn Restorer>,
    strategy: ParameterStrategy,
    config: HarnessConfig,
    hosts: Arc<Mutex<Vec<HostController>>>,
    disposed: bool,
}

impl ApplicationFixture {
    /// Create a fixture with fresh working and package-cache directories
    pub fn new(
        application_name: impl Into<String>,
        application_path: impl Into<PathBuf>,
        config: HarnessConfig,
    ) -> HarnessResult<Self> {
        let application_name = application_name.into();
        let temp_root = &config.fixture.temp_root;

        let working_dir = create_unique_dir(temp_root, "apphost")?;
        let (package_cache, owns_package_cache) = match &config.fixture.shared_package_cache {
            Some(shared) => {
                std::fs::create_dir_all(shared)?;
                (shared.clone(), false)
            }
            None => match create_unique_dir(temp_root, "apphost-packages") {
                Ok(dir) => (dir, true),
                Err(e) => {
                    let _ = std::fs::remove_dir_all(&working_dir);
                    return Err(e);
                }
            },
        };

        debug!(
            "Fixture {} using working dir {} and package cache {}",
            application_name,
            working_dir.display(),
            package_cache.display()
        );

        Ok(Self {
            restorer: Arc::new(ToolchainRestorer::new(config.toolchain.clone())),
            strategy: Arc::new(default_parameters),
            application_name,
            application_path: application_path.into(),
            working_dir,
            package_cache,
            owns_package_cache,
            restored: false,
            config,
            hosts: Arc::new(Mutex::new(Vec::new())),
            disposed: false,
        })
    }

    pub fn with_restorer(mut self, restorer: Arc<dyn Restorer>) -> Self {
        self.restorer = restorer;
        self
    }

    pub fn with_strategy(mut self, strategy: ParameterStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn application_path(&self) -> &Path {
        &self.application_path
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn package_cache(&self) -> &Path {
        &self.package_cache
    }

    pub fn is_restored(&self) -> bool {
        self.restored
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// HTTP probe using the configured retry policy
    pub fn http_probe(&self) -> HarnessResult<HttpProbe> {
        HttpProbe::new(self.config.probe.clone())
    }

    /// Restore packages unless a previous call already did
    pub async fn prepare(&mut self) -> HarnessResult<()> {
        if self.disposed {
            return Err(HarnessError::Configuration(format!(
                "Fixture for {} has been disposed",
                self.application_name
            )));
        }
        if !self.restored {
            info!("Restoring {}", self.application_name);
            self.restorer
                .restore(&self.application_path, &self.package_cache)
                .await?;
            self.restored = true;
        }
        Ok(())
    }

    /// Parameters for `flavor` with a fresh publish root
    pub fn parameters(&self, flavor: RuntimeFlavor) -> DeploymentParameters {
        let ctx = FixtureContext {
            application_name: &self.application_name,
            application_path: &self.application_path,
            package_cache: &self.package_cache,
            publish_root: self.working_dir.join(Uuid::new_v4().simple().to_string()),
            config: &self.config,
        };
        (self.strategy)(&ctx, flavor)
    }

    /// Deployer for explicit parameters; hosts it launches are stopped on
    /// fixture disposal.
    pub fn deployer(&self, params: DeploymentParameters) -> Deployer {
        Deployer {
            sink: Arc::new(TracingSink::new(format!(
                "{}:{}",
                params.application_name(),
                params.runtime_flavor()
            ))),
            publisher: Publisher::new(&self.config),
            launcher: Launcher::new(&self.config),
            state: StateCell::new(),
            supervisor: None,
            hosts: self.hosts.clone(),
            params,
        }
    }

    /// Restore once, then build a deployer for `flavor`
    pub async fn create_deployment(&mut self, flavor: RuntimeFlavor) -> HarnessResult<Deployer> {
        self.prepare().await?;
        let params = self.parameters(flavor);
        Ok(self.deployer(params))
    }

    /// Stop launched hosts, then remove the fixture's directories.
    ///
    /// Never fails: termination is best-effort and deletion errors are only
    /// logged.
    pub async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        let hosts: Vec<HostController> = self.hosts.lock().drain(..).collect();
        for host in hosts {
            if host.is_running() {
                host.terminate().await;
            }
        }

        remove_dir(&self.working_dir).await;
        if self.owns_package_cache {
            remove_dir(&self.package_cache).await;
        }
    }
}

impl Drop for ApplicationFixture {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }

        let running: Vec<HostController> = self
            .hosts
            .lock()
            .drain(..)
            .filter(HostController::is_running)
            .collect();
        let mut dirs = vec![self.working_dir.clone()];
        if self.owns_package_cache {
            dirs.push(self.package_cache.clone());
        }

        // Hosts still running are stopped before their directories go away
        if !running.is_empty() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    for host in running {
                        host.terminate().await;
                    }
                    for dir in dirs {
                        remove_dir(&dir).await;
                    }
                });
                return;
            }
            warn!("Fixture dropped outside a runtime; hosts are killed on drop");
            for host in &running {
                host.request_stop();
            }
        }

        for dir in dirs {
            let _ = std::fs::remove_dir_all(&dir);
        }
    }
}

async fn remove_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", dir.display(), e),
    }
}

fn create_unique_dir(parent: &Path, prefix: &str) -> HarnessResult<PathBuf> {
    let dir = parent.join(format!("{}-{}", prefix, Uuid::new_v4().simple()));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Publishes and launches one deployment
pub struct Deployer {
    params: DeploymentParameters,
    publisher: Publisher,
    launcher: Launcher,
    state: StateCell,
    sink: Arc<dyn OutputSink>,
    supervisor: Option<Supervisor>,
    hosts: Arc<Mutex<Vec<HostController>>>,
}

impl Deployer {
    pub fn parameters(&self) -> &DeploymentParameters {
        &self.params
    }

    pub fn state(&self) -> DeploymentState {
        self.state.get()
    }

    /// Forward publish and host output to `sink` instead of the log
    pub fn with_output(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn supervisor(&self) -> Option<&Supervisor> {
        self.supervisor.as_ref()
    }

    /// Publish (when requested by the parameters) and launch the host
    pub async fn deploy(&mut self) -> HarnessResult<DeploymentResult> {
        self.state.advance(DeploymentState::Publishing)?;

        if self.params.publish_before_deploy() {
            if let Err(e) = self
                .publisher
                .publish_with_sink(&self.params, self.sink.clone())
                .await
            {
                let _ = self.state.advance(DeploymentState::Failed);
                return Err(e);
            }
        }

        self.state.advance(DeploymentState::Launched)?;
        let (result, supervisor) = self
            .launcher
            .launch_with(&self.params, self.sink.clone(), Some(self.state.clone()))
            .await?;

        self.hosts.lock().push(supervisor.controller());
        self.supervisor = Some(supervisor);
        Ok(result)
    }

    /// Publish without launching; returns the content root
    pub async fn publish_only(&mut self) -> HarnessResult<PathBuf> {
        self.state.advance(DeploymentState::Publishing)?;
        match self
            .publisher
            .publish_with_sink(&self.params, self.sink.clone())
            .await
        {
            Ok(()) => {
                self.state.advance(DeploymentState::Published)?;
                Ok(self.params.published_root().to_path_buf())
            }
            Err(e) => {
                let _ = self.state.advance(DeploymentState::Failed);
                Err(e)
            }
        }
    }

    /// Stop the host if it is still running
    pub async fn dispose(&mut self) {
        if let Some(mut supervisor) = self.supervisor.take() {
            supervisor.terminate().await;
        }
    }
}
