//! Bridge configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::side_channel::{FallbackChain, LogFileSideChannel};

/// Engine switch naming its log file. The renderer derives its crash log from it.
pub const LOG_FILE_ARG: &str = "--log-file=";

/// Settings shared by the host and renderer bridges. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
	/// Applied to evaluations that do not pass their own timeout. Zero disables it.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub default_evaluation_timeout_ms: Option<u64>,

	/// Engine log file; crash reports go next to it as `<stem>-<pid>.cefrenderlog`.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub crash_log_file: Option<PathBuf>,

	/// Name of the pipe the host listens on for crash reports.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub side_channel_pipe: Option<String>,
}

impl BridgeConfig {
	pub fn from_json_str(json: &str) -> Result<Self> {
		serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))
	}

	/// Picks up the engine's `--log-file=<path>` switch. Surrounding quotes are trimmed.
	pub fn from_args<I, S>(args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let crash_log_file = args
			.into_iter()
			.find_map(|arg| arg.as_ref().strip_prefix(LOG_FILE_ARG).map(str::to_string))
			.map(|path| path.trim_matches('"').to_string())
			.filter(|path| !path.is_empty())
			.map(PathBuf::from);

		Self {
			crash_log_file,
			..Self::default()
		}
	}

	/// Fields set in `other` win.
	pub fn merge(self, other: BridgeConfig) -> Self {
		Self {
			default_evaluation_timeout_ms: other
				.default_evaluation_timeout_ms
				.or(self.default_evaluation_timeout_ms),
			crash_log_file: other.crash_log_file.or(self.crash_log_file),
			side_channel_pipe: other.side_channel_pipe.or(self.side_channel_pipe),
		}
	}

	pub fn default_evaluation_timeout(&self) -> Option<Duration> {
		self.default_evaluation_timeout_ms
			.filter(|ms| *ms > 0)
			.map(Duration::from_millis)
	}

	/// Side channels derivable from configuration alone.
	pub fn side_channel(&self) -> FallbackChain {
		let mut chain = FallbackChain::new();
		if let Some(log_file) = &self.crash_log_file {
			chain.push(Arc::new(LogFileSideChannel::for_process(log_file)));
		}
		chain
	}
}
