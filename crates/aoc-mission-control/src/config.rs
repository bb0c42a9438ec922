use std::env;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub const DB_PATH_ENV: &str = "AOC_MISSION_CONTROL_DB";
pub const DB_FILE_NAME: &str = "mission-control.db";

/// Store path, in order: explicit flag, `AOC_MISSION_CONTROL_DB`, then
/// `aoc/mission-control.db` under the per-user data directory.
pub fn resolve_db_path(explicit: Option<PathBuf>) -> PathBuf {
    resolve_db_path_with(explicit, |key| env::var(key).ok())
}

fn resolve_db_path_with(
    explicit: Option<PathBuf>,
    lookup: impl Fn(&str) -> Option<String>,
) -> PathBuf {
    if let Some(path) = explicit {
        return path;
    }
    if let Some(path) = lookup(DB_PATH_ENV).filter(|value| !value.trim().is_empty()) {
        return PathBuf::from(path);
    }
    data_dir(&lookup).join("aoc").join(DB_FILE_NAME)
}

fn data_dir(lookup: &impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(path) = lookup("XDG_DATA_HOME").filter(|value| !value.is_empty()) {
        return PathBuf::from(path);
    }
    lookup("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".local/share")
}

/// Logs go to stderr so stdout stays free for response frames, and only
/// when `AOC_LOG_STDERR` is set; otherwise they are discarded.
pub fn init_logging() {
    let level = env::var("AOC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stderr_enabled = matches!(
        env::var("AOC_LOG_STDERR").ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("yes") | Some("YES")
    );
    if stderr_enabled {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}
