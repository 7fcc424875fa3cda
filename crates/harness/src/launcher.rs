//! Host process launch and supervision
//!
//! The launcher resolves how a published artifact is started, spawns it with
//! both output streams drained by dedicated readers, and rejects hosts that
//! die during startup. A successful launch hands back a [`Supervisor`] that
//! owns the child through an exit-watcher task; the watcher fires the
//! deployment's [`ShutdownSignal`] exactly once when the host goes away.

use std::net::{Ipv4Addr, TcpListener, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::Url;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};
use url::Host;

use crate::config::{HarnessConfig, HostConfig};
use crate::error::{HarnessError, HarnessResult};
use crate::output::{spawn_reader, OutputCapture, OutputSink, StreamKind, Tee, TracingSink};
use crate::params::{ApplicationType, DeploymentParameters, RuntimeFlavor};
use crate::state::{DeploymentState, StateCell};

/// Extension of the published entry artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArtifactExtension {
    /// Platform executable suffix (`.exe` on Windows, none elsewhere)
    Platform,
    Fixed(&'static str),
}

impl ArtifactExtension {
    fn as_str(self) -> &'static str {
        match self {
            ArtifactExtension::Platform => std::env::consts::EXE_SUFFIX,
            ArtifactExtension::Fixed(ext) => ext,
        }
    }
}

struct LaunchRule {
    flavor: RuntimeFlavor,
    application_type: ApplicationType,
    extension: ArtifactExtension,
    /// Artifact is passed to the host launcher instead of being executed
    via_host: bool,
}

const LAUNCH_RULES: &[LaunchRule] = &[
    LaunchRule {
        flavor: RuntimeFlavor::Native,
        application_type: ApplicationType::Portable,
        extension: ArtifactExtension::Fixed(".exe"),
        via_host: false,
    },
    LaunchRule {
        flavor: RuntimeFlavor::Native,
        application_type: ApplicationType::Standalone,
        extension: ArtifactExtension::Fixed(".exe"),
        via_host: false,
    },
    LaunchRule {
        flavor: RuntimeFlavor::Managed,
        application_type: ApplicationType::Portable,
        extension: ArtifactExtension::Fixed(".dll"),
        via_host: true,
    },
    LaunchRule {
        flavor: RuntimeFlavor::Managed,
        application_type: ApplicationType::Standalone,
        extension: ArtifactExtension::Platform,
        via_host: false,
    },
];

fn launch_rule(flavor: RuntimeFlavor, application_type: ApplicationType) -> &'static LaunchRule {
    LAUNCH_RULES
        .iter()
        .find(|rule| rule.flavor == flavor && rule.application_type == application_type)
        .unwrap_or(&LAUNCH_RULES[LAUNCH_RULES.len() - 1])
}

/// Program and arguments used to start a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Published entry artifact
    pub artifact: PathBuf,
}

impl Invocation {
    /// Resolve the invocation for `params` listening on `uri`
    pub fn resolve(params: &DeploymentParameters, host: &HostConfig, uri: &str) -> Self {
        let rule = launch_rule(params.runtime_flavor(), params.application_type());
        let artifact = params
            .published_root()
            .join(format!("{}{}", params.artifact_stem(), rule.extension.as_str()));

        let (program, mut args) = if rule.via_host {
            (
                host.host_program.clone(),
                vec![artifact.display().to_string()],
            )
        } else {
            (artifact.clone(), Vec::new())
        };

        args.extend([
            "--server.urls".to_string(),
            uri.to_string(),
            "--server".to_string(),
            host.server_implementation.clone(),
        ]);

        Self {
            program,
            args,
            artifact,
        }
    }
}

/// How a host process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostExit {
    /// Exit code, absent when ended by a signal
    pub code: Option<i32>,
    /// The harness asked the host to stop
    pub killed: bool,
}

/// One-shot notification that a host process has terminated.
///
/// Clones observe the same signal; observers cannot fire it.
#[derive(Debug, Clone)]
pub struct ShutdownSignal(CancellationToken);

impl ShutdownSignal {
    pub fn is_fired(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Completes once the host has exited
    pub async fn fired(&self) {
        self.0.cancelled().await
    }

    /// A child token cancelled with this signal, for APIs that take one
    pub fn token(&self) -> CancellationToken {
        self.0.child_token()
    }
}

/// What a successful deployment hands to the caller
#[derive(Debug, Clone)]
pub struct DeploymentResult {
    pub content_root: PathBuf,
    pub application_base_uri: Url,
    pub host_shutdown: ShutdownSignal,
    pub parameters: DeploymentParameters,
}

/// Cloneable control over a supervised host
#[derive(Debug, Clone)]
pub struct HostController {
    stop: CancellationToken,
    shutdown: CancellationToken,
    exit: Arc<Mutex<Option<HostExit>>>,
    termination_grace: Duration,
}

impl HostController {
    fn new(termination_grace: Duration) -> Self {
        Self {
            stop: CancellationToken::new(),
            shutdown: CancellationToken::new(),
            exit: Arc::new(Mutex::new(None)),
            termination_grace,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    pub fn exit(&self) -> Option<HostExit> {
        *self.exit.lock()
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal(self.shutdown.clone())
    }

    /// Ask the watcher to stop the host without waiting
    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    /// Stop the host and wait for it to be gone. Never fails; a host that
    /// outlives the wait is left to kill-on-drop.
    pub async fn terminate(&self) -> Option<HostExit> {
        if self.is_running() {
            self.request_stop();
            let wait = self.termination_grace + Duration::from_secs(5);
            if timeout(wait, self.shutdown.cancelled()).await.is_err() {
                warn!("Host process did not report exit within {:?}", wait);
            }
        }
        self.exit()
    }

    /// Wait for the host to exit on its own
    pub async fn wait(&self) -> Option<HostExit> {
        self.shutdown.cancelled().await;
        self.exit()
    }
}

/// Owns a launched host process
pub struct Supervisor {
    pid: Option<u32>,
    executable: PathBuf,
    controller: HostController,
    watcher: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    pub fn controller(&self) -> HostController {
        self.controller.clone()
    }

    pub fn is_running(&self) -> bool {
        self.controller.is_running()
    }

    pub fn exit(&self) -> Option<HostExit> {
        self.controller.exit()
    }

    /// Stop the host (SIGTERM, then kill after the grace period)
    pub async fn terminate(&mut self) -> Option<HostExit> {
        let exit = self.controller.terminate().await;
        if let Some(watcher) = self.watcher.take() {
            let _ = timeout(Duration::from_secs(1), watcher).await;
        }
        exit
    }

    pub async fn wait(&self) -> Option<HostExit> {
        self.controller.wait().await
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.controller.is_running() {
            self.controller.request_stop();
        }
    }
}

/// Starts published applications as host processes
#[derive(Debug, Clone)]
pub struct Launcher {
    host: HostConfig,
}

impl Launcher {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            host: config.host.clone(),
        }
    }

    pub fn host_config(&self) -> &HostConfig {
        &self.host
    }

    /// Launch the published application, logging its output
    pub async fn launch(
        &self,
        params: &DeploymentParameters,
    ) -> HarnessResult<(DeploymentResult, Supervisor)> {
        let sink = Arc::new(TracingSink::new(format!(
            "{}:{}",
            params.application_name(),
            params.runtime_flavor()
        )));
        self.launch_with(params, sink, None).await
    }

    /// Launch with an explicit output sink, optionally tracking state.
    ///
    /// When `state` is given it must be in `Launched`; it moves to `Running`
    /// on success and `Failed` otherwise, and later to `Exited` or `Killed`.
    pub async fn launch_with(
        &self,
        params: &DeploymentParameters,
        sink: Arc<dyn OutputSink>,
        state: Option<StateCell>,
    ) -> HarnessResult<(DeploymentResult, Supervisor)> {
        let span = info_span!("host", app = %params.application_name(), flavor = %params.runtime_flavor());
        let result = self
            .start(params, sink, state.clone())
            .instrument(span)
            .await;
        if result.is_err() {
            if let Some(state) = &state {
                let _ = state.advance(DeploymentState::Failed);
            }
        }
        result
    }

    async fn start(
        &self,
        params: &DeploymentParameters,
        sink: Arc<dyn OutputSink>,
        state: Option<StateCell>,
    ) -> HarnessResult<(DeploymentResult, Supervisor)> {
        let uri = select_base_uri(params.base_uri_hint().unwrap_or(&self.host.base_uri_hint))?;
        let invocation = Invocation::resolve(params, &self.host, uri.as_str());

        info!(
            "Executing {} {}",
            invocation.program.display(),
            invocation.args.join(" ")
        );

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(params.published_root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.env(&self.host.environment_variable, params.environment_name());
        params.environment().apply_to(&mut cmd);

        let mut child = cmd.spawn().map_err(|e| {
            error!(
                "Host process {} failed to start: {}",
                invocation.program.display(),
                e
            );
            HarnessError::LaunchFailure {
                executable: invocation.program.clone(),
                exit_code: None,
                reason: e.to_string(),
            }
        })?;
        let pid = child.id();

        let capture = Arc::new(OutputCapture::new(50));
        let tee: Arc<dyn OutputSink> = Arc::new(Tee::new(vec![sink, capture.clone()]));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, StreamKind::Stdout, tee.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, StreamKind::Stderr, tee));
        }

        self.check_startup(&mut child, &invocation.program, readers, &capture)
            .await?;

        info!(
            "Started {}. Process Id : {}",
            invocation.program.display(),
            pid.map(|p| p.to_string()).unwrap_or_default()
        );

        if let Some(state) = &state {
            state.advance(DeploymentState::Running)?;
        }

        let controller = HostController::new(self.host.termination_grace());
        let watcher = tokio::spawn(
            watch(child, pid, controller.clone(), state).in_current_span(),
        );

        let result = DeploymentResult {
            content_root: params.published_root().to_path_buf(),
            application_base_uri: uri,
            host_shutdown: controller.signal(),
            parameters: params.clone(),
        };

        Ok((
            result,
            Supervisor {
                pid,
                executable: invocation.program,
                controller,
                watcher: Some(watcher),
            },
        ))
    }

    /// Fail if the host exits within the startup grace period
    async fn check_startup(
        &self,
        child: &mut Child,
        program: &Path,
        readers: Vec<JoinHandle<()>>,
        capture: &OutputCapture,
    ) -> HarnessResult<()> {
        match timeout(self.host.startup_grace(), child.wait()).await {
            Err(_) => Ok(()),
            Ok(Ok(status)) => {
                // Pipes are closed; collect the last words for the error
                for reader in readers {
                    let _ = timeout(Duration::from_secs(1), reader).await;
                }
                error!(
                    "Host process {} exited with code {:?} or failed to start.",
                    program.display(),
                    status.code()
                );
                Err(HarnessError::LaunchFailure {
                    executable: program.to_path_buf(),
                    exit_code: status.code(),
                    reason: format!("exited during startup\n{}", capture.text()),
                })
            }
            Ok(Err(e)) => {
                let _ = child.kill().await;
                Err(HarnessError::LaunchFailure {
                    executable: program.to_path_buf(),
                    exit_code: None,
                    reason: e.to_string(),
                })
            }
        }
    }
}

/// Own the child until it exits, then record the exit and fire the signal
async fn watch(mut child: Child, pid: Option<u32>, controller: HostController, state: Option<StateCell>) {
    let (status, killed) = tokio::select! {
        status = child.wait() => (status, false),
        _ = controller.stop.cancelled() => {
            (stop_child(&mut child, pid, controller.termination_grace).await, true)
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("Failed to wait for host process: {}", e);
            None
        }
    };

    *controller.exit.lock() = Some(HostExit { code, killed });

    if let Some(state) = state {
        let next = if killed {
            DeploymentState::Killed
        } else {
            DeploymentState::Exited
        };
        if let Err(e) = state.advance(next) {
            warn!("{}", e);
        }
    }

    info!("Host process shutting down.");
    controller.shutdown.cancel();
}

/// Graceful stop first, then force kill
async fn stop_child(child: &mut Child, pid: Option<u32>, grace: Duration) -> std::io::Result<ExitStatus> {
    info!("Stopping host (pid: {:?})", pid);

    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = pid {
            if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok() {
                if let Ok(status) = timeout(grace, child.wait()).await {
                    return status;
                }
            }
        }
    }
    #[cfg(not(unix))]
    let _ = (pid, grace);

    if let Err(e) = child.kill().await {
        warn!("Failed to kill host process: {}", e);
    }
    child.wait().await
}

/// Parse the URI hint, replacing a missing or zero port with a free one
pub fn select_base_uri(hint: &str) -> HarnessResult<Url> {
    let mut uri = Url::parse(hint)
        .map_err(|e| HarnessError::Configuration(format!("Invalid base URI '{}': {}", hint, e)))?;

    // `Url::port` hides a port equal to the scheme default
    let needs_port = match uri.port() {
        Some(0) => true,
        Some(_) => false,
        None => !authority_has_port(hint),
    };

    if needs_port {
        let port = match uri.host() {
            Some(Host::Ipv4(addr)) => find_free_port((addr, 0))?,
            Some(Host::Ipv6(addr)) => find_free_port((addr, 0))?,
            Some(Host::Domain(name)) if name != "localhost" => find_free_port((name, 0))?,
            _ => find_free_port((Ipv4Addr::LOCALHOST, 0))?,
        };
        uri.set_port(Some(port))
            .map_err(|_| HarnessError::Configuration(format!("Cannot set a port on '{}'", hint)))?;
    }

    Ok(uri)
}

/// Whether the authority of `hint` spells out a port
fn authority_has_port(hint: &str) -> bool {
    let rest = hint.split_once("://").map_or(hint, |(_, rest)| rest);
    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let after_host = match host_port.rfind(']') {
        Some(end) => &host_port[end + 1..],
        None => host_port,
    };
    after_host.contains(':')
}

/// Find a free port to use
fn find_free_port(addr: impl ToSocketAddrs) -> std::io::Result<u16> {
    let listener = TcpListener::bind(addr)?;
    Ok(listener.local_addr()?.port())
}
