//! Publishing through a scripted toolchain
#![cfg(unix)]

mod common;

use std::sync::Arc;

use apphost_harness::output::{OutputCapture, StreamKind};
use apphost_harness::{DeploymentParameters, HarnessError, Publisher, RuntimeFlavor};
use tempfile::TempDir;

use common::{failing_toolchain, fake_toolchain, test_config, write_script};

fn params(tmp: &TempDir) -> DeploymentParameters {
    let app = tmp.path().join("SimpleApp");
    std::fs::create_dir_all(&app).unwrap();
    DeploymentParameters::builder(&app, "SimpleApp", RuntimeFlavor::Managed)
        .target_framework("netcoreapp2.0")
        .published_root(tmp.path().join("published"))
        .env("NUGET_PACKAGES", "/tmp/isolated-cache")
        .build()
}

#[tokio::test]
async fn nonzero_exit_is_a_build_failure_with_output() {
    let tmp = TempDir::new().unwrap();
    let toolchain = failing_toolchain(tmp.path(), 1);
    let publisher = Publisher::new(&test_config(tmp.path(), &toolchain));

    let err = publisher.publish(&params(&tmp)).await.unwrap_err();

    match err {
        HarnessError::BuildFailure {
            exit_code, output, ..
        } => {
            assert_eq!(exit_code, 1);
            assert!(output.contains("error CS1002"), "output was: {output}");
            assert!(output.contains("Build FAILED."), "output was: {output}");
        }
        other => panic!("expected build failure, got {other}"),
    }
}

#[tokio::test]
async fn publish_writes_to_the_published_root() {
    let tmp = TempDir::new().unwrap();
    let toolchain = fake_toolchain(tmp.path(), "SimpleApp", "exec sleep 30");
    let publisher = Publisher::new(&test_config(tmp.path(), &toolchain));
    let params = params(&tmp);
    let capture = Arc::new(OutputCapture::default());

    publisher
        .publish_with_sink(&params, capture.clone())
        .await
        .unwrap();

    assert!(params.published_root().join("SimpleApp").is_file());

    let calls = std::fs::read_to_string(tmp.path().join("calls.log")).unwrap();
    assert!(calls.contains("--framework netcoreapp2.0"));
    assert!(calls.contains("--configuration Release"));
    assert!(calls.contains("SimpleApp.csproj"));

    let lines = capture.lines();
    assert!(lines
        .iter()
        .any(|(s, l)| *s == StreamKind::Stdout && l.starts_with("published SimpleApp")));
    assert!(lines
        .iter()
        .any(|(s, l)| *s == StreamKind::Stderr && l == "cache at /tmp/isolated-cache"));
}

#[tokio::test]
async fn output_is_captured_line_by_line_under_volume() {
    let tmp = TempDir::new().unwrap();
    let toolchain = write_script(
        &tmp.path().join("toolchain"),
        r#"i=0
while [ $i -lt 5000 ]; do
  echo "out $i ........................................................"
  echo "err $i ........................................................" >&2
  i=$((i+1))
done
exit 0"#,
    );
    let publisher = Publisher::new(&test_config(tmp.path(), &toolchain));
    let capture = Arc::new(OutputCapture::new(20_000));

    publisher
        .publish_with_sink(&params(&tmp), capture.clone())
        .await
        .unwrap();

    let lines = capture.lines();
    assert_eq!(lines.len(), 10_000);
    assert_eq!(lines.iter().filter(|(s, _)| *s == StreamKind::Stderr).count(), 5_000);
}

#[tokio::test]
async fn missing_toolchain_is_a_build_failure() {
    let tmp = TempDir::new().unwrap();
    let publisher = Publisher::new(&test_config(tmp.path(), &tmp.path().join("no-such-toolchain")));

    let err = publisher.publish(&params(&tmp)).await.unwrap_err();
    assert!(matches!(err, HarnessError::BuildFailure { .. }));
}
