use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::MAX_SECONDS;

const ZINO_CONFIG: &str = "ZINO_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "zino.toml";

/// Config file path, honouring the `ZINO_CONFIG` environment override
pub fn get_config_path(from_args: Option<PathBuf>) -> PathBuf {
    from_args
        .or_else(|| std::env::var(ZINO_CONFIG).ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

const ZINO_POLLDEVS: &str = "ZINO_POLLDEVS";

pub fn get_polldevs_path(from_args: Option<PathBuf>) -> Option<PathBuf> {
    from_args.or_else(|| std::env::var(ZINO_POLLDEVS).ok().map(PathBuf::from))
}

/// Whether "other" has read permission on the file
#[cfg(unix)]
pub fn file_is_world_readable(path: &Path) -> std::io::Result<bool> {
    use std::os::unix::fs::PermissionsExt;

    let mode = std::fs::metadata(path)?.permissions().mode();
    Ok(mode & 0o004 != 0)
}

#[cfg(not(unix))]
pub fn file_is_world_readable(path: &Path) -> std::io::Result<bool> {
    std::fs::metadata(path).map(|_| false)
}

/// Clamp a timer period to the longest one the daemon accepts
pub fn bounded_period(period: Duration) -> Duration {
    period.min(Duration::from_secs(MAX_SECONDS))
}
