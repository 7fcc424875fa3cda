//! Deployment parameters
//!
//! `DeploymentParameters` describes how one application instance is built
//! and run. It is assembled once through [`DeploymentParametersBuilder`] and
//! is read-only afterwards.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

/// Runtime the application is built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeFlavor {
    /// Desktop runtime; the build produces a platform-native executable
    Native,
    /// Portable managed runtime
    Managed,
}

impl RuntimeFlavor {
    /// Flavors that can run on the current platform
    pub fn supported() -> Vec<RuntimeFlavor> {
        let mut flavors = vec![RuntimeFlavor::Managed];
        if cfg!(windows) {
            flavors.push(RuntimeFlavor::Native);
        }
        flavors
    }
}

impl fmt::Display for RuntimeFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeFlavor::Native => f.write_str("native"),
            RuntimeFlavor::Managed => f.write_str("managed"),
        }
    }
}

/// Shape of the published artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    /// Needs a host launcher to run
    #[default]
    Portable,
    /// Self-contained executable
    Standalone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    #[default]
    X64,
    X86,
    Arm64,
}

/// Ordered environment overrides. A `None` value removes the variable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides(Vec<(String, Option<String>)>);

impl EnvOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.0.push((name.into(), Some(value.into())));
        self
    }

    pub fn remove(&mut self, name: impl Into<String>) -> &mut Self {
        self.0.push((name.into(), None));
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Effective value after all overrides, if the name was mentioned
    pub fn get(&self, name: &str) -> Option<Option<&str>> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_deref())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply the overrides to a command in order
    pub fn apply_to(&self, cmd: &mut Command) {
        for (name, value) in self.iter() {
            match value {
                Some(value) => {
                    debug!("SET {}={}", name, value);
                    cmd.env(name, value);
                }
                None => {
                    debug!("Removing environment variable {}", name);
                    cmd.env_remove(name);
                }
            }
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EnvOverrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), Some(v.into())))
                .collect(),
        )
    }
}

/// How to build and run one application instance
#[derive(Debug, Clone)]
pub struct DeploymentParameters {
    application_path: PathBuf,
    application_name: String,
    runtime_flavor: RuntimeFlavor,
    application_type: ApplicationType,
    architecture: Architecture,
    target_framework: String,
    configuration: String,
    published_root: PathBuf,
    publish_environment: EnvOverrides,
    environment: EnvOverrides,
    environment_name: String,
    base_uri_hint: Option<String>,
    additional_publish_args: Vec<String>,
    publish_before_deploy: bool,
}

impl DeploymentParameters {
    pub fn builder(
        application_path: impl Into<PathBuf>,
        application_name: impl Into<String>,
        runtime_flavor: RuntimeFlavor,
    ) -> DeploymentParametersBuilder {
        DeploymentParametersBuilder::new(application_path, application_name, runtime_flavor)
    }

    pub fn application_path(&self) -> &Path {
        &self.application_path
    }

    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    pub fn runtime_flavor(&self) -> RuntimeFlavor {
        self.runtime_flavor
    }

    pub fn application_type(&self) -> ApplicationType {
        self.application_type
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    pub fn target_framework(&self) -> &str {
        &self.target_framework
    }

    pub fn configuration(&self) -> &str {
        &self.configuration
    }

    pub fn published_root(&self) -> &Path {
        &self.published_root
    }

    /// Overrides for the publish step
    pub fn publish_environment(&self) -> &EnvOverrides {
        &self.publish_environment
    }

    /// Overrides for the launched host
    pub fn environment(&self) -> &EnvOverrides {
        &self.environment
    }

    pub fn environment_name(&self) -> &str {
        &self.environment_name
    }

    pub fn base_uri_hint(&self) -> Option<&str> {
        self.base_uri_hint.as_deref()
    }

    pub fn additional_publish_args(&self) -> &[String] {
        &self.additional_publish_args
    }

    pub fn publish_before_deploy(&self) -> bool {
        self.publish_before_deploy
    }

    /// Name of the application directory, which is also the artifact stem
    pub fn artifact_stem(&self) -> String {
        self.application_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.application_name.clone())
    }

    /// Start a builder pre-filled with these parameters
    pub fn to_builder(&self) -> DeploymentParametersBuilder {
        DeploymentParametersBuilder {
            params: self.clone(),
        }
    }
}

/// Builder for [`DeploymentParameters`]
#[derive(Debug, Clone)]
pub struct DeploymentParametersBuilder {
    params: DeploymentParameters,
}

impl DeploymentParametersBuilder {
    pub fn new(
        application_path: impl Into<PathBuf>,
        application_name: impl Into<String>,
        runtime_flavor: RuntimeFlavor,
    ) -> Self {
        let application_path = application_path.into();
        let published_root = application_path.join("bin").join("publish");
        Self {
            params: DeploymentParameters {
                application_path,
                application_name: application_name.into(),
                runtime_flavor,
                application_type: ApplicationType::default(),
                architecture: Architecture::default(),
                target_framework: String::new(),
                configuration: "Release".to_string(),
                published_root,
                publish_environment: EnvOverrides::new(),
                environment: EnvOverrides::new(),
                environment_name: "Production".to_string(),
                base_uri_hint: None,
                additional_publish_args: Vec::new(),
                publish_before_deploy: true,
            },
        }
    }

    pub fn application_type(mut self, application_type: ApplicationType) -> Self {
        self.params.application_type = application_type;
        self
    }

    pub fn architecture(mut self, architecture: Architecture) -> Self {
        self.params.architecture = architecture;
        self
    }

    pub fn target_framework(mut self, framework: impl Into<String>) -> Self {
        self.params.target_framework = framework.into();
        self
    }

    pub fn configuration(mut self, configuration: impl Into<String>) -> Self {
        self.params.configuration = configuration.into();
        self
    }

    pub fn published_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.params.published_root = root.into();
        self
    }

    pub fn environment_name(mut self, name: impl Into<String>) -> Self {
        self.params.environment_name = name.into();
        self
    }

    pub fn base_uri_hint(mut self, hint: impl Into<String>) -> Self {
        self.params.base_uri_hint = Some(hint.into());
        self
    }

    pub fn publish_arg(mut self, arg: impl Into<String>) -> Self {
        self.params.additional_publish_args.push(arg.into());
        self
    }

    pub fn publish_before_deploy(mut self, publish: bool) -> Self {
        self.params.publish_before_deploy = publish;
        self
    }

    /// Set a variable for both the publish step and the host
    pub fn env(mut self, name: &str, value: &str) -> Self {
        self.params.publish_environment.set(name, value);
        self.params.environment.set(name, value);
        self
    }

    pub fn publish_env(mut self, name: &str, value: &str) -> Self {
        self.params.publish_environment.set(name, value);
        self
    }

    pub fn host_env(mut self, name: &str, value: &str) -> Self {
        self.params.environment.set(name, value);
        self
    }

    pub fn remove_host_env(mut self, name: &str) -> Self {
        self.params.environment.remove(name);
        self
    }

    pub fn build(self) -> DeploymentParameters {
        self.params
    }
}
