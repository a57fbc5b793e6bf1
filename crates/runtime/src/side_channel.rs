//! Out-of-band crash reporting.
//!
//! When a renderer callback fails and the failure cannot be sent through a
//! frame, it is written to a [`SideChannel`] instead: a per-process log file,
//! a pipe read by the host, or a chain trying several in order.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cefbridge_protocol::{Envelope, ProcessMessage, UnhandledException};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::transport::PipeSender;

/// Extension of per-process renderer crash logs.
pub const RENDER_LOG_EXTENSION: &str = "cefrenderlog";

/// Destination for failures that could not be reported through a frame.
pub trait SideChannel: Send + Sync {
	fn report(&self, exception: &UnhandledException) -> Result<()>;
}

/// Appends reports to a log file.
#[derive(Debug, Clone)]
pub struct LogFileSideChannel {
	path: PathBuf,
}

impl LogFileSideChannel {
	/// Writes to `path` as given.
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// Derives `<dir>/<stem>-<pid>.cefrenderlog` from the engine's log file
	/// so each renderer process gets its own file.
	pub fn for_process(log_file: &Path) -> Self {
		Self::new(process_log_path(log_file, std::process::id()))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}
}

fn process_log_path(log_file: &Path, pid: u32) -> PathBuf {
	let stem = log_file
		.file_stem()
		.map(|s| s.to_string_lossy().into_owned())
		.unwrap_or_else(|| "renderer".to_string());
	let file_name = format!("{stem}-{pid}.{RENDER_LOG_EXTENSION}");
	match log_file.parent() {
		Some(dir) => dir.join(file_name),
		None => PathBuf::from(file_name),
	}
}

impl SideChannel for LogFileSideChannel {
	fn report(&self, exception: &UnhandledException) -> Result<()> {
		if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
			std::fs::create_dir_all(dir)?;
		}
		let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
		writeln!(file, "{exception}")?;
		tracing::debug!(path = %self.path.display(), "wrote crash report to log file");
		Ok(())
	}
}

/// Sends reports as `UnhandledException` frames over a pipe.
///
/// A background task owns the writer, so [`report`](SideChannel::report)
/// never blocks the calling thread.
#[derive(Debug, Clone)]
pub struct PipeSideChannel {
	tx: mpsc::UnboundedSender<ProcessMessage>,
}

impl PipeSideChannel {
	/// Spawns the writer task on the current tokio runtime.
	pub fn spawn<W>(writer: W) -> Result<(Self, JoinHandle<Result<()>>)>
	where
		W: AsyncWrite + Unpin + Send + 'static,
	{
		let handle = tokio::runtime::Handle::try_current()
			.map_err(|e| Error::RuntimeUnavailable(e.to_string()))?;
		let (tx, mut rx) = mpsc::unbounded_channel::<ProcessMessage>();
		let task = handle.spawn(async move {
			let mut sender = PipeSender::new(writer);
			while let Some(message) = rx.recv().await {
				sender.send(&message).await?;
			}
			Ok(())
		});
		Ok((Self { tx }, task))
	}
}

impl SideChannel for PipeSideChannel {
	fn report(&self, exception: &UnhandledException) -> Result<()> {
		self.tx
			.send(exception.to_process_message())
			.map_err(|_| Error::PeerUnreachable("side channel pipe closed".into()))
	}
}

/// Discards reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSideChannel;

impl SideChannel for NullSideChannel {
	fn report(&self, exception: &UnhandledException) -> Result<()> {
		tracing::warn!(%exception, "no side channel configured; dropping crash report");
		Ok(())
	}
}

/// Tries each channel in order until one accepts the report.
#[derive(Clone, Default)]
pub struct FallbackChain {
	channels: Vec<Arc<dyn SideChannel>>,
}

impl FallbackChain {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, channel: Arc<dyn SideChannel>) -> Self {
		self.channels.push(channel);
		self
	}

	pub fn push(&mut self, channel: Arc<dyn SideChannel>) {
		self.channels.push(channel);
	}

	pub fn len(&self) -> usize {
		self.channels.len()
	}

	pub fn is_empty(&self) -> bool {
		self.channels.is_empty()
	}
}

impl SideChannel for FallbackChain {
	fn report(&self, exception: &UnhandledException) -> Result<()> {
		if self.channels.is_empty() {
			return NullSideChannel.report(exception);
		}
		let mut last_err = None;
		for channel in &self.channels {
			match channel.report(exception) {
				Ok(()) => return Ok(()),
				Err(err) => {
					tracing::warn!(error = %err, "side channel failed; trying next");
					last_err = Some(err);
				}
			}
		}
		Err(last_err.unwrap_or_else(|| Error::Transport("no side channel accepted the report".into())))
	}
}

impl std::fmt::Debug for FallbackChain {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("FallbackChain")
			.field("channels", &self.channels.len())
			.finish()
	}
}
