use clap::Parser;
use md_recorder_core::config::RecorderConfig;
use md_recorder_core::error::RecorderError;
use tracing_subscriber::EnvFilter;

/// Entrypoint (§10.2): initializes tracing, parses configuration, runs the
/// recorder's trading-window loop, and maps fatal error kinds to nonzero
/// exit codes (§6 "Exit codes").
fn main() -> eyre::Result<()> {
    let _guard = init_tracing();

    let config = RecorderConfig::try_parse().map_err(|e| RecorderError::ConfigInvalid(e.to_string()));
    let config = match config {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    loop {
        let result = runtime.block_on(md_recorder_core::orchestrator::run(config.clone()));
        match result {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::error!(error = %e, kind = ?e.kind(), "recorder session ended with error");
                if e.is_transient() {
                    // Transient kinds are already absorbed inside the session loop;
                    // reaching here means the whole session unwound, so restart it.
                    continue;
                }
                std::process::exit(1);
            }
        }
    }
}

fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let file_appender = tracing_appender::rolling::never(".", "md-recorder.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(non_blocking)
        .init();

    guard
}
