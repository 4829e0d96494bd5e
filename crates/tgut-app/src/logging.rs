//! Logging setup for the window processes.
//!
//! In debug mode each role logs to `<role>.log` in the working directory so
//! the terminal stays free for the window itself. Otherwise logs go to
//! stderr at INFO. `RUST_LOG` overrides either level.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Log file for `role` inside `dir`.
pub fn log_path(dir: &Path, role: &str) -> PathBuf {
    dir.join(format!("{}.log", role))
}

/// Default filter directives.
fn directives(debug: bool, log_rpc: bool) -> String {
    let mut directives = if debug { "debug" } else { "info" }.to_string();
    if log_rpc && !debug {
        directives.push_str(",tower_http=debug");
    }
    directives
}

fn filter(debug: bool, log_rpc: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives(debug, log_rpc)))
}

/// Install the global subscriber.
pub fn init(role: &str, debug: bool, log_rpc: bool) -> Result<()> {
    if debug {
        let path = log_path(Path::new("."), role);
        let file = File::create(&path)
            .with_context(|| format!("Failed to create log file {}", path.display()))?;
        FmtSubscriber::builder()
            .with_env_filter(filter(debug, log_rpc))
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        FmtSubscriber::builder()
            .with_env_filter(filter(debug, log_rpc))
            .with_target(false)
            .with_thread_ids(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_log_path_per_role() {
        let dir = TempDir::new().unwrap();
        let path = log_path(dir.path(), "camera-window");
        assert!(path.ends_with("camera-window.log"));
        File::create(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_directives() {
        assert_eq!(directives(true, true), "debug");
        assert_eq!(directives(false, false), "info");
        assert_eq!(directives(false, true), "info,tower_http=debug");
    }
}
