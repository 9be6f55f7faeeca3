use std::fs;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Console logs for the operator plus daily-rotated JSON files for later
/// inspection of a scrape run. Call once, before any scraping starts.
pub fn init_logging() {
    let log_dir = std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string());
    let _ = fs::create_dir_all(&log_dir);

    let file_appender = tracing_appender::rolling::daily(&log_dir, "boxoffice.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(
            EnvFilter::from_default_env()
                .add_directive("boxoffice_scraper=info".parse().unwrap()),
        )
        .with(fmt::layer().json().with_writer(file_writer))
        .with(fmt::layer().with_writer(std::io::stdout))
        .init();

    // The writer guard must outlive the process or buffered lines are lost
    std::mem::forget(guard);
}
