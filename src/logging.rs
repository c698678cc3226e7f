use anyhow::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize tracing to a log file so the interactive console stays clean.
/// `PLANWEAVER_LOG` overrides the level passed on the command line.
pub fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_env("PLANWEAVER_LOG")
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let log_file = std::sync::Arc::new(std::fs::File::create("./planweaver.log")?);
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(log_file)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    info!("logging initialized");
    Ok(())
}
