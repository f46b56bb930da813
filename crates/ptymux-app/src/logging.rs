use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset
pub fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "ptymux=debug,tower_http=debug"
    } else {
        "ptymux=info,tower_http=info"
    }
}

fn env_filter(fallback: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into())
}

/// Log to stderr.
pub fn init(verbose: bool) {
    tracing_subscriber::registry()
        .with(env_filter(default_directives(verbose)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Logging while the multiplexer owns the terminal: everything goes to
/// `log_file` if one is given, otherwise only warnings and errors reach
/// stderr.
pub fn init_for_mux(log_file: Option<&Path>, verbose: bool) -> Result<()> {
    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(env_filter("warn"))
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(());
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    tracing_subscriber::registry()
        .with(env_filter(default_directives(verbose)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
    Ok(())
}
