//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use apphost_harness::config::{FixtureConfig, HarnessConfig, HostConfig, ProbeConfig, ToolchainConfig};

/// Write an executable shell script
pub fn write_script(path: &Path, body: &str) -> PathBuf {
    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
    let mut perms = std::fs::metadata(path).expect("stat script").permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).expect("chmod script");
    path.to_path_buf()
}

/// Fake toolchain: `publish` writes `<output>/<app>` using `host_body` as the
/// host script, `restore` succeeds. Every invocation is appended to `calls.log`.
pub fn fake_toolchain(dir: &Path, app_name: &str, host_body: &str) -> PathBuf {
    let log = dir.join("calls.log");
    let host = dir.join("host-template.sh");
    std::fs::write(&host, format!("#!/bin/sh\n{}\n", host_body)).expect("write host template");

    write_script(
        &dir.join("toolchain"),
        &format!(
            r#"echo "$@" >> "{log}"
command="$1"
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
if [ "$command" = "publish" ]; then
  mkdir -p "$out"
  cp "{host}" "$out/{app}"
  chmod +x "$out/{app}"
  echo "published {app} to $out"
  echo "cache at $NUGET_PACKAGES" >&2
fi
exit 0"#,
            log = log.display(),
            host = host.display(),
            app = app_name,
        ),
    )
}

/// Fake toolchain that always fails publishing
pub fn failing_toolchain(dir: &Path, exit_code: i32) -> PathBuf {
    write_script(
        &dir.join("toolchain"),
        &format!(
            "echo \"error CS1002: ; expected\"\necho \"Build FAILED.\" >&2\nexit {}",
            exit_code
        ),
    )
}

/// Configuration pointing the harness at `toolchain` with short timings
pub fn test_config(temp_root: &Path, toolchain: &Path) -> HarnessConfig {
    HarnessConfig {
        toolchain: ToolchainConfig {
            program: toolchain.to_path_buf(),
            ..Default::default()
        },
        host: HostConfig {
            startup_grace_ms: 250,
            termination_grace_ms: 200,
            ..Default::default()
        },
        probe: ProbeConfig {
            max_attempts: 3,
            delay_ms: 20,
            request_timeout_ms: 2_000,
            ..Default::default()
        },
        fixture: FixtureConfig {
            temp_root: temp_root.to_path_buf(),
            ..Default::default()
        },
    }
}

/// Count non-empty lines in the fake toolchain's call log starting with `command`
pub fn toolchain_calls(dir: &Path, command: &str) -> usize {
    std::fs::read_to_string(dir.join("calls.log"))
        .unwrap_or_default()
        .lines()
        .filter(|line| line.starts_with(command))
        .count()
}

pub const WAIT: Duration = Duration::from_secs(10);

/// Route harness logs to the test output; `RUST_LOG` selects the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
