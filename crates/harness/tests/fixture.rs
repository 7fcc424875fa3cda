//! Fixture lifecycle: restore-once, isolation and teardown
#![cfg(unix)]

mod common;

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use apphost_harness::fixture::{default_parameters, FixtureContext, ParameterStrategy};
use apphost_harness::restore::{Restorer, SkipRestore};
use apphost_harness::state::DeploymentState;
use apphost_harness::{
    ApplicationFixture, ApplicationType, DeploymentParameters, HarnessError, HarnessResult, RuntimeFlavor,
};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio::time::timeout;

use common::{failing_toolchain, fake_toolchain, init_tracing, test_config, toolchain_calls, WAIT};

#[derive(Default)]
struct CountingRestorer {
    calls: AtomicUsize,
}

#[async_trait]
impl Restorer for CountingRestorer {
    async fn restore(&self, _application_path: &Path, package_cache: &Path) -> HarnessResult<()> {
        assert!(package_cache.is_dir());
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn standalone_parameters(ctx: &FixtureContext<'_>, flavor: RuntimeFlavor) -> DeploymentParameters {
    default_parameters(ctx, flavor)
        .to_builder()
        .application_type(ApplicationType::Standalone)
        .build()
}

fn standalone_strategy() -> ParameterStrategy {
    Arc::new(standalone_parameters)
}

fn app_dir(tmp: &TempDir) -> std::path::PathBuf {
    let app = tmp.path().join("SimpleApp");
    std::fs::create_dir_all(&app).unwrap();
    app
}

#[tokio::test]
async fn restore_runs_once_per_fixture() {
    let tmp = TempDir::new().unwrap();
    let toolchain = fake_toolchain(tmp.path(), "SimpleApp", "exec sleep 30");
    let restorer = Arc::new(CountingRestorer::default());

    let mut fixture = ApplicationFixture::new("SimpleApp", app_dir(&tmp), test_config(tmp.path(), &toolchain))
        .unwrap()
        .with_restorer(restorer.clone());

    for _ in 0..3 {
        let _deployer = fixture.create_deployment(RuntimeFlavor::Managed).await.unwrap();
    }

    assert_eq!(restorer.calls.load(Ordering::SeqCst), 1);
    assert!(fixture.is_restored());
    fixture.dispose().await;
}

#[tokio::test]
async fn toolchain_restore_uses_the_fixture_package_cache() {
    let tmp = TempDir::new().unwrap();
    let toolchain = fake_toolchain(tmp.path(), "SimpleApp", "exec sleep 30");

    let mut fixture =
        ApplicationFixture::new("SimpleApp", app_dir(&tmp), test_config(tmp.path(), &toolchain)).unwrap();
    fixture.create_deployment(RuntimeFlavor::Managed).await.unwrap();
    fixture.create_deployment(RuntimeFlavor::Managed).await.unwrap();

    assert_eq!(toolchain_calls(tmp.path(), "restore"), 1);
    let calls = std::fs::read_to_string(tmp.path().join("calls.log")).unwrap();
    assert!(calls.contains(&format!("--packages {}", fixture.package_cache().display())));
    fixture.dispose().await;
}

#[tokio::test]
async fn concurrent_fixtures_use_disjoint_directories() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(tmp.path(), Path::new("/bin/true"));

    let a = ApplicationFixture::new("SimpleApp", app_dir(&tmp), config.clone()).unwrap();
    let b = ApplicationFixture::new("SimpleApp", app_dir(&tmp), config).unwrap();

    let dirs = [
        a.working_dir(),
        a.package_cache(),
        b.working_dir(),
        b.package_cache(),
    ];
    for (i, x) in dirs.iter().enumerate() {
        assert!(x.is_dir());
        for y in &dirs[i + 1..] {
            assert!(!x.starts_with(y) && !y.starts_with(x), "{} overlaps {}", x.display(), y.display());
        }
    }
}

#[tokio::test]
async fn deploy_publishes_launches_and_disposal_cleans_up() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let toolchain = fake_toolchain(tmp.path(), "SimpleApp", "echo \"listening on $2\"\nexec sleep 30");

    let mut fixture = ApplicationFixture::new("SimpleApp", app_dir(&tmp), test_config(tmp.path(), &toolchain))
        .unwrap()
        .with_restorer(Arc::new(SkipRestore))
        .with_strategy(standalone_strategy());
    let working_dir = fixture.working_dir().to_path_buf();
    let package_cache = fixture.package_cache().to_path_buf();

    let mut deployer = fixture.create_deployment(RuntimeFlavor::Managed).await.unwrap();
    assert_eq!(deployer.state(), DeploymentState::Created);

    let result = deployer.deploy().await.unwrap();

    assert_eq!(deployer.state(), DeploymentState::Running);
    assert!(result.content_root.starts_with(&working_dir));
    assert!(result.content_root.join("SimpleApp").is_file());
    assert!(!result.host_shutdown.is_fired());
    assert_eq!(toolchain_calls(tmp.path(), "publish"), 1);

    fixture.dispose().await;

    timeout(WAIT, result.host_shutdown.fired())
        .await
        .expect("host stopped by fixture disposal");
    assert_eq!(deployer.state(), DeploymentState::Killed);
    assert!(!working_dir.exists());
    assert!(!package_cache.exists());
}

#[tokio::test]
async fn host_exit_moves_deployment_to_exited() {
    let tmp = TempDir::new().unwrap();
    let toolchain = fake_toolchain(tmp.path(), "SimpleApp", "sleep 1\nexit 0");

    let mut fixture = ApplicationFixture::new("SimpleApp", app_dir(&tmp), test_config(tmp.path(), &toolchain))
        .unwrap()
        .with_restorer(Arc::new(SkipRestore))
        .with_strategy(standalone_strategy());

    let mut deployer = fixture.create_deployment(RuntimeFlavor::Managed).await.unwrap();
    let result = deployer.deploy().await.unwrap();

    timeout(WAIT, result.host_shutdown.fired()).await.expect("host exits");
    assert_eq!(deployer.state(), DeploymentState::Exited);

    fixture.dispose().await;
}

#[tokio::test]
async fn disposal_cleans_up_after_build_failure() {
    let tmp = TempDir::new().unwrap();
    let toolchain = failing_toolchain(tmp.path(), 1);

    let mut fixture = ApplicationFixture::new("SimpleApp", app_dir(&tmp), test_config(tmp.path(), &toolchain))
        .unwrap()
        .with_restorer(Arc::new(SkipRestore));
    let working_dir = fixture.working_dir().to_path_buf();
    let package_cache = fixture.package_cache().to_path_buf();

    let mut deployer = fixture.create_deployment(RuntimeFlavor::Managed).await.unwrap();
    let err = deployer.deploy().await.unwrap_err();

    assert!(matches!(err, HarnessError::BuildFailure { exit_code: 1, .. }));
    assert_eq!(deployer.state(), DeploymentState::Failed);
    assert!(deployer.supervisor().is_none());

    fixture.dispose().await;
    assert!(!working_dir.exists());
    assert!(!package_cache.exists());
}

#[tokio::test]
async fn disposal_cleans_up_after_launch_failure() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let toolchain = fake_toolchain(tmp.path(), "SimpleApp", "exit 7");

    let mut fixture = ApplicationFixture::new("SimpleApp", app_dir(&tmp), test_config(tmp.path(), &toolchain))
        .unwrap()
        .with_restorer(Arc::new(SkipRestore))
        .with_strategy(standalone_strategy());
    let working_dir = fixture.working_dir().to_path_buf();

    let mut deployer = fixture.create_deployment(RuntimeFlavor::Managed).await.unwrap();
    let err = deployer.deploy().await.unwrap_err();

    assert!(matches!(err, HarnessError::LaunchFailure { exit_code: Some(7), .. }));
    assert_eq!(deployer.state(), DeploymentState::Failed);

    fixture.dispose().await;
    assert!(!working_dir.exists());
}

#[tokio::test]
async fn publish_only_returns_content_root() {
    let tmp = TempDir::new().unwrap();
    let toolchain = fake_toolchain(tmp.path(), "SimpleApp", "exec sleep 30");

    let mut fixture = ApplicationFixture::new("SimpleApp", app_dir(&tmp), test_config(tmp.path(), &toolchain))
        .unwrap()
        .with_restorer(Arc::new(SkipRestore));

    let mut deployer = fixture.create_deployment(RuntimeFlavor::Managed).await.unwrap();
    let content_root = deployer.publish_only().await.unwrap();

    assert!(content_root.join("SimpleApp").is_file());
    assert_eq!(deployer.state(), DeploymentState::Published);
    assert!(deployer.supervisor().is_none());
    fixture.dispose().await;
}

#[tokio::test]
async fn disposed_fixture_refuses_new_deployments() {
    let tmp = TempDir::new().unwrap();
    let mut fixture =
        ApplicationFixture::new("SimpleApp", app_dir(&tmp), test_config(tmp.path(), Path::new("/bin/true")))
            .unwrap()
            .with_restorer(Arc::new(SkipRestore));

    fixture.dispose().await;
    fixture.dispose().await;

    assert!(matches!(
        fixture.create_deployment(RuntimeFlavor::Managed).await,
        Err(HarnessError::Configuration(_))
    ));
}

#[tokio::test]
async fn undeletable_working_dir_does_not_stop_cleanup() {
    init_tracing();
    let tmp = TempDir::new().unwrap();
    let mut fixture =
        ApplicationFixture::new("SimpleApp", app_dir(&tmp), test_config(tmp.path(), Path::new("/bin/true")))
            .unwrap()
            .with_restorer(Arc::new(SkipRestore));
    let package_cache = fixture.package_cache().to_path_buf();

    let locked = fixture.working_dir().join("locked");
    std::fs::create_dir_all(&locked).unwrap();
    std::fs::write(locked.join("view.cshtml"), "@model Person").unwrap();
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();

    timeout(WAIT, fixture.dispose()).await.expect("dispose completes");

    assert!(!package_cache.exists());
    assert!(matches!(
        fixture.create_deployment(RuntimeFlavor::Managed).await,
        Err(HarnessError::Configuration(_))
    ));

    if locked.exists() {
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
}

#[tokio::test]
async fn dropped_fixture_stops_hosts_before_removing_directories() {
    let tmp = TempDir::new().unwrap();
    let toolchain = fake_toolchain(tmp.path(), "SimpleApp", "exec sleep 30");

    let mut fixture = ApplicationFixture::new("SimpleApp", app_dir(&tmp), test_config(tmp.path(), &toolchain))
        .unwrap()
        .with_restorer(Arc::new(SkipRestore))
        .with_strategy(standalone_strategy());
    let working_dir = fixture.working_dir().to_path_buf();

    let mut deployer = fixture.create_deployment(RuntimeFlavor::Managed).await.unwrap();
    let result = deployer.deploy().await.unwrap();
    drop(fixture);

    // The content root lives in the working dir and outlasts the host
    assert!(result.content_root.exists());

    timeout(WAIT, result.host_shutdown.fired())
        .await
        .expect("host stopped after fixture drop");
    assert_eq!(deployer.state(), DeploymentState::Killed);

    let deadline = std::time::Instant::now() + WAIT;
    while working_dir.exists() && std::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    assert!(!working_dir.exists());
}
