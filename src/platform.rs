//! Platform glue: cache directory resolution, file timestamps, monotonic
//! timing.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::consts::CACHE_SUBDIR;
use crate::error::{CrispyError, Result};

/// Returns the default cache directory, creating it (mode 0755) if absent.
pub fn default_cache_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "crispy").ok_or_else(|| {
        CrispyError::Cache("could not determine a user cache directory".into())
    })?;
    let path = dirs.cache_dir().join(CACHE_SUBDIR);
    create_dir_mode(&path)?;
    Ok(path)
}

#[cfg(unix)]
fn create_dir_mode(path: &Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    if path.is_dir() {
        return Ok(());
    }
    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_dir_mode(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

/// Last-modified time of a file, in milliseconds since the Unix epoch.
/// A stat failure is reported to the caller as `None`, not as an error — the
/// cache provider treats that as "invalid".
pub fn file_modified_ms(path: &Path) -> Option<u64> {
    let meta = fs::metadata(path).ok()?;
    let modified = meta.modified().ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_millis() as u64)
}

/// Current wall-clock time, in milliseconds since the Unix epoch.
pub fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A cheap monotonic stopwatch used to time pipeline phases in microseconds,
/// attached to the hook context.
#[derive(Debug)]
pub struct Stopwatch(Instant);

impl Stopwatch {
    pub fn start() -> Self {
        Stopwatch(Instant::now())
    }

    pub fn elapsed_micros(&self) -> u64 {
        self.0.elapsed().as_micros() as u64
    }
}
