use crate::error::{ClientError, Result};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "beeper_cli=warn";
const DEBUG_FILTER: &str = "beeper_cli=debug";

/// Initialize tracing/logging on stderr.
///
/// `RUST_LOG` wins when set; otherwise `debug` selects between warnings
/// only and per-attempt events. Stdout is left for command output.
pub fn init_tracing(debug: bool) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter(debug).into());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| ClientError::Config(format!("Failed to initialize tracing: {}", e)))
}

fn default_filter(debug: bool) -> &'static str {
    if debug {
        DEBUG_FILTER
    } else {
        DEFAULT_FILTER
    }
}
