//! Deploy an application and probe it

use std::path::PathBuf;

use anyhow::{Context, Result};
use apphost_harness::paths::ApplicationPaths;
use apphost_harness::{ApplicationFixture, DeploymentResult, HarnessConfig, RuntimeFlavor};
use clap::{Args, ValueEnum};
use serde::Serialize;
use tracing::info;

use crate::output::{print_info, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Flavor {
    Managed,
    Native,
}

impl From<Flavor> for RuntimeFlavor {
    fn from(flavor: Flavor) -> Self {
        match flavor {
            Flavor::Managed => RuntimeFlavor::Managed,
            Flavor::Native => RuntimeFlavor::Native,
        }
    }
}

#[derive(Args)]
pub struct DeployArgs {
    /// Application name
    pub app: String,

    /// Application directory (default: <workspace>/<apps_dir>/<app>)
    #[arg(long)]
    pub app_path: Option<PathBuf>,

    /// Runtime flavor to deploy
    #[arg(long, value_enum, default_value = "managed")]
    pub flavor: Flavor,

    /// Build configuration (overrides the configured default)
    #[arg(long)]
    pub configuration: Option<String>,

    /// Paths or URLs to GET once the host is up
    #[arg(long = "probe")]
    pub probes: Vec<String>,

    /// Publish only, do not launch
    #[arg(long)]
    pub publish_only: bool,

    /// Keep the host running until Ctrl-C or until it exits
    #[arg(long)]
    pub keep_running: bool,
}

#[derive(Serialize)]
struct ProbeRow {
    path: String,
    bytes: usize,
    preview: String,
}

impl TableDisplay for ProbeRow {
    fn headers() -> Vec<&'static str> {
        vec!["Path", "Bytes", "Body"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.path.clone(), self.bytes.to_string(), self.preview.clone()]
    }
}

pub async fn execute(args: DeployArgs, mut config: HarnessConfig, format: OutputFormat) -> Result<()> {
    if let Some(configuration) = &args.configuration {
        config.toolchain.configuration = configuration.clone();
    }

    let app_path = match &args.app_path {
        Some(path) => path.clone(),
        None => {
            let cwd = std::env::current_dir()?;
            ApplicationPaths::discover(&cwd, &config.fixture)?.test_app_dir(&args.app)
        }
    };

    let mut fixture = ApplicationFixture::new(&args.app, app_path, config)?;
    let outcome = run(&mut fixture, &args, format).await;
    fixture.dispose().await;
    outcome
}

async fn run(fixture: &mut ApplicationFixture, args: &DeployArgs, format: OutputFormat) -> Result<()> {
    let mut deployer = fixture
        .create_deployment(args.flavor.into())
        .await
        .with_context(|| format!("preparing {}", args.app))?;

    if args.publish_only {
        let content_root = deployer.publish_only().await?;
        print_success(&format!("Published {} to {}", args.app, content_root.display()));
        return Ok(());
    }

    let result = deployer.deploy().await?;
    print_success(&format!(
        "{} listening on {} (content root {})",
        args.app,
        result.application_base_uri,
        result.content_root.display()
    ));

    probe_all(fixture, &result, &args.probes, format).await?;

    if args.keep_running {
        print_info("Press Ctrl-C to stop the host");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            _ = result.host_shutdown.fired() => info!("Host exited"),
        }
    }

    deployer.dispose().await;
    Ok(())
}

async fn probe_all(
    fixture: &ApplicationFixture,
    result: &DeploymentResult,
    probes: &[String],
    format: OutputFormat,
) -> Result<()> {
    let probe = fixture.http_probe()?.until(result.host_shutdown.token());
    let mut rows = Vec::new();
    for path in probes {
        let body = probe.get_path(&result.application_base_uri, path).await?;
        rows.push(ProbeRow {
            path: path.clone(),
            bytes: body.len(),
            preview: body.lines().next().unwrap_or_default().chars().take(60).collect(),
        });
    }

    print_list(&rows, format, "No probe paths requested");
    Ok(())
}
