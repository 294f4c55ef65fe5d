//! Logging setup
//!
//! `RUST_LOG` wins over the configured level. With a log directory, output
//! goes to daily rolling files named `loyalty-server.YYYY-MM-DD`.

use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber. Call once, from the binary.
pub fn init_logger(log_level: &str, log_dir: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(log_level)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_target(false);

    if let Some(dir) = log_dir {
        let log_path = Path::new(dir);
        match std::fs::create_dir_all(log_path) {
            Ok(()) => {
                let file_appender = tracing_appender::rolling::daily(log_path, "loyalty-server");
                subscriber.with_ansi(false).with_writer(file_appender).init();
                return;
            }
            Err(e) => {
                // Subscriber is not up yet
                eprintln!("Cannot create log directory {dir}: {e}, logging to stdout");
            }
        }
    }

    subscriber.init();
}

fn default_directives(level: &str) -> String {
    format!("loyalty_server={level},shared={level},tower_http={level},sqlx=warn")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_parse() {
        let directives = default_directives("debug");
        assert!(directives.starts_with("loyalty_server=debug"));
        assert!(EnvFilter::try_new(directives).is_ok());
    }
}
