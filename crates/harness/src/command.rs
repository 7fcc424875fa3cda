//! Running toolchain commands to completion with streamed output

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::process::Command;

use crate::output::{spawn_reader, OutputCapture, OutputSink, StreamKind, Tee};

/// Outcome of a finished command
pub(crate) struct Completed {
    pub status: ExitStatus,
    pub output: Arc<OutputCapture>,
}

impl Completed {
    /// Exit code, with signal terminations reported as -1
    pub fn exit_code(&self) -> i32 {
        self.status.code().unwrap_or(-1)
    }
}

/// Spawn `cmd`, drain both streams into `sink` and a bounded capture, and
/// wait for the process and both readers to finish.
pub(crate) async fn run_to_completion(
    mut cmd: Command,
    sink: Arc<dyn OutputSink>,
) -> std::io::Result<Completed> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn()?;

    let capture = Arc::new(OutputCapture::default());
    let tee: Arc<dyn OutputSink> = Arc::new(Tee::new(vec![sink, capture.clone()]));

    let stdout_task = child
        .stdout
        .take()
        .map(|out| spawn_reader(out, StreamKind::Stdout, tee.clone()));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| spawn_reader(err, StreamKind::Stderr, tee.clone()));

    let status = child.wait().await?;

    // Readers finish once the pipes close
    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    if let Some(task) = stderr_task {
        let _ = task.await;
    }

    Ok(Completed {
        status,
        output: capture,
    })
}
