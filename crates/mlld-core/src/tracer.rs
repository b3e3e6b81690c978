//! Debug tracing (§6.4): `MLLD_DEBUG`, `MLLD_DEBUG_IDS`, `MLLD_DEBUG_FIX`.
//!
//! Unlike a bytecode VM's hot instruction-dispatch loop, directive evaluation
//! has no inner loop worth a zero-cost trait abstraction — a directive fires
//! a handful of times per document, not millions. So tracing here is plain
//! [`tracing`] spans and events, gated by the usual `RUST_LOG`-style
//! `EnvFilter` machinery; a driver calls [`init`] once at startup and the
//! rest of the crate just calls `tracing::debug!`/`tracing::trace!` at
//! directive dispatch, guard consultation, and pipeline stage transitions.
//!
//! `MLLD_DEBUG` turns on verbose tracing crate-wide; `MLLD_DEBUG_IDS` and
//! `MLLD_DEBUG_FIX` are narrower channels a caller can turn on independently
//! (e.g. tracing just variable-identity resolution, or just a specific
//! retry-fix investigation) without the full firehose.

use tracing_subscriber::EnvFilter;

/// Installs a stderr-writing `tracing_subscriber` using [`env_filter`]. A CLI
/// driver calls this once at startup; a library embedder is free to install
/// its own subscriber instead and skip this entirely.
pub fn init() {
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter()).with_writer(std::io::stderr).try_init();
}

/// Target name used for `MLLD_DEBUG_IDS` tracing (variable lookup and field
/// resolution — §4.3's resolution algorithm).
pub const TARGET_IDS: &str = "mlld_core::ids";

/// Target name used for `MLLD_DEBUG_FIX` tracing (pipeline retry/reset
/// decisions — §4.5).
pub const TARGET_FIX: &str = "mlld_core::fix";

/// Builds an `EnvFilter` from the `MLLD_DEBUG*` environment variables. Falls
/// back to `warn` if none are set, so a driver that never calls this still
/// gets sane default verbosity from whatever subscriber it installs.
///
/// Does not install a subscriber itself — a CLI driver owns that decision
/// (plain formatted output vs. JSON, stdout vs. a file).
#[must_use]
pub fn env_filter() -> EnvFilter {
    let mut directives = Vec::new();
    if std::env::var("MLLD_DEBUG").is_ok() {
        directives.push("mlld_core=debug".to_string());
    }
    if std::env::var("MLLD_DEBUG_IDS").is_ok() {
        directives.push(format!("{TARGET_IDS}=trace"));
    }
    if std::env::var("MLLD_DEBUG_FIX").is_ok() {
        directives.push(format!("{TARGET_FIX}=trace"));
    }
    if directives.is_empty() {
        directives.push("mlld_core=warn".to_string());
    }
    EnvFilter::new(directives.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_builds_without_panicking_when_no_debug_vars_are_set() {
        let filter = env_filter();
        assert!(!filter.to_string().is_empty());
    }
}
