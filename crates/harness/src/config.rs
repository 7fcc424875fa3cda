//! Harness configuration
//!
//! Everything the harness needs to know about the toolchain and the host is
//! carried here explicitly; nothing in the deployment path consults the
//! ambient process environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::HarnessResult;
use crate::params::RuntimeFlavor;

/// Top-level harness configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Build toolchain used for restore and publish
    pub toolchain: ToolchainConfig,

    /// How launched hosts are invoked and supervised
    pub host: HostConfig,

    /// HTTP probe retry policy
    pub probe: ProbeConfig,

    /// Fixture directory layout
    pub fixture: FixtureConfig,
}

impl HarnessConfig {
    /// Parse a configuration from TOML text
    pub fn from_toml_str(text: &str) -> HarnessResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file
    pub fn load(path: &Path) -> HarnessResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

/// Build toolchain configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Toolchain executable (`dotnet`)
    pub program: PathBuf,

    /// Project file extension appended to the application name
    pub project_extension: String,

    /// Build configuration used when a strategy does not override it
    pub configuration: String,

    /// Target framework for managed-runtime deployments
    pub managed_framework: String,

    /// Target framework for native-runtime deployments
    pub native_framework: String,

    /// Variable that points the toolchain at a package cache
    pub package_cache_variable: String,

    /// Variables applied to every toolchain invocation (first-run, telemetry)
    pub environment: BTreeMap<String, String>,

    /// Additional package feeds passed to restore
    pub restore_feeds: Vec<String>,
}

impl ToolchainConfig {
    pub fn framework_for(&self, flavor: RuntimeFlavor) -> &str {
        match flavor {
            RuntimeFlavor::Managed => &self.managed_framework,
            RuntimeFlavor::Native => &self.native_framework,
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        let mut environment = BTreeMap::new();
        environment.insert("DOTNET_SKIP_FIRST_TIME_EXPERIENCE".to_string(), "true".to_string());
        environment.insert("DOTNET_CLI_TELEMETRY_OPTOUT".to_string(), "1".to_string());

        Self {
            program: PathBuf::from("dotnet"),
            project_extension: "csproj".to_string(),
            configuration: "Release".to_string(),
            managed_framework: "netcoreapp2.0".to_string(),
            native_framework: "net461".to_string(),
            package_cache_variable: "NUGET_PACKAGES".to_string(),
            environment,
            restore_feeds: Vec::new(),
        }
    }
}

/// Host process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Launcher for managed-portable artifacts
    pub host_program: PathBuf,

    /// Value passed to `--server`
    pub server_implementation: String,

    /// Variable carrying the environment name
    pub environment_variable: String,

    /// Environment name given to the host
    pub environment_name: String,

    /// Listener URI hint; port 0 selects a free port
    pub base_uri_hint: String,

    /// How long a freshly spawned host is watched for an immediate exit
    pub startup_grace_ms: u64,

    /// Time between SIGTERM and a forced kill
    pub termination_grace_ms: u64,
}

impl HostConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host_program: PathBuf::from("dotnet"),
            server_implementation: "Microsoft.AspNetCore.Server.Kestrel".to_string(),
            environment_variable: "ASPNETCORE_ENVIRONMENT".to_string(),
            environment_name: "Production".to_string(),
            base_uri_hint: "http://127.0.0.1:0".to_string(),
            startup_grace_ms: 250,
            termination_grace_ms: 500,
        }
    }
}

/// Delay growth between probe attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    #[default]
    Fixed,
    /// Delay grows by the base delay after every failed attempt
    Linear,
}

/// HTTP probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub max_attempts: usize,
    pub delay_ms: u64,
    pub backoff: Backoff,
    pub request_timeout_ms: u64,
}

impl ProbeConfig {
    /// Delay before the attempt following `attempt` (1-based)
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let base = Duration::from_millis(self.delay_ms);
        match self.backoff {
            Backoff::Fixed => base,
            Backoff::Linear => base.saturating_mul(u32::try_from(attempt.max(1)).unwrap_or(u32::MAX)),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 1000,
            backoff: Backoff::Fixed,
            request_timeout_ms: 10_000,
        }
    }
}

/// Fixture directory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureConfig {
    /// Parent of the per-fixture working directories
    pub temp_root: PathBuf,

    /// Process-wide package cache shared across fixtures.
    /// Access to it is not synchronized.
    pub shared_package_cache: Option<PathBuf>,

    /// File identifying the workspace root
    pub workspace_marker: String,

    /// Directory below the workspace root holding test applications
    pub apps_dir: String,
}

impl Default for FixtureConfig {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir(),
            shared_package_cache: None,
            workspace_marker: "apphost.toml".to_string(),
            apps_dir: "testapps".to_string(),
        }
    }
}
