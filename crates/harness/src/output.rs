//! Child process output handling
//!
//! Each redirected stream gets its own reader task that drains the pipe line
//! by line and forwards every line to an [`OutputSink`]. Readers never share
//! a buffer; sinks are responsible for their own synchronization.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};

/// Which stream a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// Receives child process output. Called concurrently from both readers.
pub trait OutputSink: Send + Sync + 'static {
    fn line(&self, stream: StreamKind, line: &str);
}

/// Forwards stdout to `info!` and stderr to `error!`
#[derive(Debug, Clone)]
pub struct TracingSink {
    source: String,
}

impl TracingSink {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

impl OutputSink for TracingSink {
    fn line(&self, stream: StreamKind, line: &str) {
        match stream {
            StreamKind::Stdout => info!(source = %self.source, "{}", line),
            StreamKind::Stderr => error!(source = %self.source, "{}", line),
        }
    }
}

/// Keeps the most recent lines of both streams, interleaved in arrival order
#[derive(Debug)]
pub struct OutputCapture {
    lines: Mutex<VecDeque<(StreamKind, String)>>,
    limit: usize,
}

impl OutputCapture {
    pub const DEFAULT_LIMIT: usize = 200;

    pub fn new(limit: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            limit: limit.max(1),
        }
    }

    pub fn lines(&self) -> Vec<(StreamKind, String)> {
        self.lines.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Captured lines joined with newlines
    pub fn text(&self) -> String {
        self.lines
            .lock()
            .iter()
            .map(|(_, line)| line.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for OutputCapture {
    fn default() -> Self {
        Self::new(Self::DEFAULT_LIMIT)
    }
}

impl OutputSink for OutputCapture {
    fn line(&self, stream: StreamKind, line: &str) {
        let mut lines = self.lines.lock();
        if lines.len() == self.limit {
            lines.pop_front();
        }
        lines.push_back((stream, line.to_string()));
    }
}

/// Fans a line out to several sinks
pub struct Tee(Vec<Arc<dyn OutputSink>>);

impl Tee {
    pub fn new(sinks: Vec<Arc<dyn OutputSink>>) -> Self {
        Self(sinks)
    }
}

impl OutputSink for Tee {
    fn line(&self, stream: StreamKind, line: &str) {
        for sink in &self.0 {
            sink.line(stream, line);
        }
    }
}

/// Drain `reader` until EOF on a dedicated task.
///
/// Invalid UTF-8 is replaced rather than ending the read, so the pipe keeps
/// draining whatever the child writes.
pub(crate) fn spawn_reader<R>(reader: R, stream: StreamKind, sink: Arc<dyn OutputSink>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(
        async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let line = String::from_utf8_lossy(&buf);
                        sink.line(stream, line.trim_end_matches(['\r', '\n']));
                    }
                    Err(e) => {
                        warn!("Failed to read child {}: {}", stream.as_str(), e);
                        break;
                    }
                }
            }
        }
        .in_current_span(),
    )
}
