//! Cache provider: content-addressed hash, path layout, validity +
//! freshness, purge. See DESIGN.md for how this relates to the prior
//! hashing scheme this was generalized from.

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::consts::ARTIFACT_SUFFIX;
use crate::error::{CrispyError, Result};
use crate::platform::file_modified_ms;

/// Capability set: compute hash, get path for hash, validate presence +
/// freshness, purge all.
pub trait CacheProvider: Send + Sync {
    /// Deterministic hex digest over source bytes, optional extra-flags
    /// string, and the required compiler version string. NUL-separated
    /// concatenation to prevent boundary ambiguity.
    fn compute_hash(&self, source: &[u8], flags: Option<&str>, compiler_version: &str) -> String;

    /// Pure function from hex digest to filesystem path.
    fn path_for_hash(&self, hash: &str) -> PathBuf;

    /// The directory this provider manages artifacts under, exposed to hook
    /// callbacks as read-only pipeline state.
    fn cache_dir(&self) -> &Path;

    /// Reports whether a usable artifact is present for `hash`. Without a
    /// source path, presence of a regular file suffices. With one, the
    /// artifact's mtime must be at least the source's mtime. A stat failure
    /// on either side is "invalid", not an error.
    fn has_valid(&self, hash: &str, source_path: Option<&Path>) -> bool;

    /// Removes every artifact this provider manages. An empty, successful
    /// purge is not an error.
    fn purge(&self) -> Result<()>;
}

/// Default filesystem-backed implementation: one regular file per artifact,
/// directly under `cache_dir`, named `<hex_digest><suffix>`.
pub struct FsCache {
    cache_dir: PathBuf,
    suffix: String,
}

impl FsCache {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&cache_dir)?;
        Ok(FsCache {
            cache_dir,
            suffix: ARTIFACT_SUFFIX.to_string(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Removes every artifact whose mtime is older than `max_age_ms`. Runs
    /// opportunistically on startup rather than against a sidecar metadata
    /// file, applied directly to artifact mtimes.
    pub fn sweep_stale(&self, max_age_ms: u64) -> Result<()> {
        let cutoff = crate::platform::current_time_ms().saturating_sub(max_age_ms);
        for entry in fs::read_dir(&self.cache_dir).map_err(|e| CrispyError::Cache(e.to_string()))? {
            let entry = entry.map_err(|e| CrispyError::Cache(e.to_string()))?;
            let path = entry.path();
            if !is_artifact(&path, &self.suffix) {
                continue;
            }
            if let Some(mtime) = file_modified_ms(&path) {
                if mtime < cutoff {
                    let _ = fs::remove_file(&path);
                }
            }
        }
        Ok(())
    }
}

impl CacheProvider for FsCache {
    fn compute_hash(&self, source: &[u8], flags: Option<&str>, compiler_version: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source);
        hasher.update([0u8]);
        hasher.update(flags.unwrap_or("").as_bytes());
        hasher.update([0u8]);
        hasher.update(compiler_version.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn path_for_hash(&self, hash: &str) -> PathBuf {
        self.cache_dir.join(format!("{}{}", hash, self.suffix))
    }

    fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn has_valid(&self, hash: &str, source_path: Option<&Path>) -> bool {
        let artifact = self.path_for_hash(hash);
        if !artifact.is_file() {
            return false;
        }
        match source_path {
            None => true,
            Some(src) => match (file_modified_ms(&artifact), file_modified_ms(src)) {
                (Some(artifact_mtime), Some(src_mtime)) => artifact_mtime >= src_mtime,
                _ => false,
            },
        }
    }

    fn purge(&self) -> Result<()> {
        let dir = match fs::read_dir(&self.cache_dir) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CrispyError::Cache(e.to_string())),
        };
        for entry in dir {
            let entry = entry.map_err(|e| CrispyError::Cache(e.to_string()))?;
            let path = entry.path();
            if is_artifact(&path, &self.suffix) {
                fs::remove_file(&path).map_err(|e| CrispyError::Cache(e.to_string()))?;
            }
        }
        Ok(())
    }
}

fn is_artifact(path: &Path, suffix: &str) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.ends_with(suffix))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn cache() -> (FsCache, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let cache = FsCache::new(dir.path().to_path_buf()).unwrap();
        (cache, dir)
    }

    #[test]
    fn hash_is_deterministic() {
        let (cache, _dir) = cache();
        let a = cache.compute_hash(b"int main(){}", Some("-lm"), "v1");
        let b = cache.compute_hash(b"int main(){}", Some("-lm"), "v1");
        assert_eq!(a, b);
    }

    #[test]
    fn hash_changes_with_any_input() {
        let (cache, _dir) = cache();
        let base = cache.compute_hash(b"int main(){}", Some("-lm"), "v1");
        assert_ne!(base, cache.compute_hash(b"int main(){ }", Some("-lm"), "v1"));
        assert_ne!(base, cache.compute_hash(b"int main(){}", Some("-lpthread"), "v1"));
        assert_ne!(base, cache.compute_hash(b"int main(){}", Some("-lm"), "v2"));
    }

    #[test]
    fn missing_and_empty_flags_hash_the_same() {
        let (cache, _dir) = cache();
        let none = cache.compute_hash(b"x", None, "v1");
        let empty = cache.compute_hash(b"x", Some(""), "v1");
        assert_eq!(none, empty);
    }

    #[test]
    fn has_valid_false_when_missing() {
        let (cache, _dir) = cache();
        assert!(!cache.has_valid("deadbeef", None));
    }

    #[test]
    fn has_valid_true_for_inline_input_once_present() {
        let (cache, _dir) = cache();
        let path = cache.path_for_hash("deadbeef");
        fs::write(&path, b"fake").unwrap();
        assert!(cache.has_valid("deadbeef", None));
    }

    #[test]
    fn purge_is_idempotent_on_empty_dir() {
        let (cache, _dir) = cache();
        cache.purge().unwrap();
        cache.purge().unwrap();
    }

    #[test]
    fn purge_removes_only_artifacts() {
        let (cache, dir) = cache();
        let artifact = cache.path_for_hash("abc123");
        fs::write(&artifact, b"fake").unwrap();
        let other = dir.path().join("not-an-artifact.txt");
        fs::write(&other, b"keep me").unwrap();

        cache.purge().unwrap();

        assert!(!artifact.exists());
        assert!(other.exists());
    }
}
