// ABOUTME: Shared logging setup for the supervisor and its worker processes
// ABOUTME: Workers log to stderr only because their stdout carries the control channel

use tracing_subscriber::EnvFilter;

fn filter(default: tracing::Level) -> EnvFilter {
    EnvFilter::from_default_env().add_directive(default.into())
}

/// Supervisor logging to stderr. Default: INFO level, RUST_LOG override.
pub fn init() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter(tracing::Level::INFO))
        .init();
}

/// Worker logging. Stderr only, no ANSI, since it is usually interleaved
/// with the supervisor's own output. Default: INFO level, RUST_LOG override.
pub fn init_worker(deployment_id: &str) {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(filter(tracing::Level::INFO))
        .init();
    tracing::debug!(deployment = %deployment_id, "Worker logging initialized");
}

/// File-based logging for long-running supervisors. Default: INFO level, RUST_LOG override.
/// Logs to ~/.config/coven/{app_name}/{app_name}.log
/// If setup fails, prints a warning to stderr and falls back to `init()`.
pub fn init_file(app_name: &str) {
    if let Err(e) = init_file_inner(app_name) {
        eprintln!("Warning: failed to set up file logging: {e}");
        init();
    }
}

fn init_file_inner(app_name: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = dirs::config_dir().ok_or("could not determine config directory")?;
    let log_dir = config_dir.join("coven").join(app_name);
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(format!("{app_name}.log")))?;

    tracing_subscriber::fmt()
        .with_writer(std::sync::Mutex::new(log_file))
        .with_env_filter(filter(tracing::Level::INFO))
        .with_ansi(false)
        .init();

    Ok(())
}
