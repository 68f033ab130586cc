//! # Node Logging
//!
//! One `tracing` subscriber per process, installed by whichever subcommand
//! runs. `run` picks its output format from `--log-format`; `init` always
//! logs in the pretty form.
//!
//! Logs go to stderr. Stdout belongs to `init`, which prints the generated
//! devnet accounts there for copy-paste.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used by `run` when `RUST_LOG` is unset: marketplace transitions at
/// info, HTTP request spans at debug.
pub const DEFAULT_FILTER: &str = "agora_node=info,agora_contracts=info,tower_http=debug";

/// Filter used by `init` when `RUST_LOG` is unset.
pub const INIT_FILTER: &str = "agora_node=info";

/// How log lines are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-field text with source locations, for a terminal.
    Pretty,
    /// One JSON object per event, for a log shipper.
    Json,
}

impl LogFormat {
    /// `"json"` in any case selects [`LogFormat::Json`]. Everything else,
    /// including typos, falls back to [`LogFormat::Pretty`] so a bad flag
    /// never keeps the node from starting.
    pub fn from_str_lossy(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// `RUST_LOG` if it is set and parses, `fallback` otherwise.
fn build_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
}

/// Installs the process-wide subscriber.
///
/// `fallback` is an [`EnvFilter`] directive string such as
/// [`DEFAULT_FILTER`]; a set `RUST_LOG` replaces it entirely, e.g.
///
/// ```text
/// RUST_LOG=agora_contracts=debug,agora_protocol=trace agora-node run
/// ```
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(fallback: &str, format: LogFormat) -> Result<(), TryInitError> {
    let filter = build_filter(fallback);

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()?,
    }

    tracing::debug!(?format, "logging ready");
    Ok(())
}
