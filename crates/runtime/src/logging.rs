use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Installs the global subscriber. `RUST_LOG` overrides the verbosity preset.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_logging(verbosity: u8) -> bool {
	// 0 = errors only, bridge internals silent
	// 1 = info for the bridge, warn for dispatch noise
	// 2+ = debug for everything
	let filter = match verbosity {
		0 => "error,cefbridge_runtime=off",
		1 => "info,cefbridge_runtime::dispatcher=warn,cefbridge_runtime::pending=warn",
		_ => "debug",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.try_init()
		.is_ok()
}
