//! Temporary file store for large prompt payloads
//!
//! Serialized results are written to a process-scoped directory and handed
//! to the AI backend by path, so payloads containing quotes, newlines or
//! non-ASCII text never go through command-line escaping.

use crate::error::{ErrorExt, PipelineError};
use chrono::Utc;
use rand::Rng;
use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const DIR_PREFIX: &str = "promptflow-";

/// Registry of files written by one store
type Registry = Arc<Mutex<HashSet<PathBuf>>>;

/// Writes and tracks temp files under a process-scoped directory
#[derive(Debug)]
pub struct TempFileStore {
    base_dir: PathBuf,
    registry: Registry,
}

impl Default for TempFileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TempFileStore {
    /// Store rooted at `<system temp>/promptflow-<pid>`; created on first write
    pub fn new() -> Self {
        Self::with_base_dir(
            std::env::temp_dir().join(format!("{}{}", DIR_PREFIX, std::process::id())),
        )
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            registry: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Write `content` verbatim to a fresh file and return a handle to it
    pub fn write(
        &self,
        content: &str,
        prefix: Option<&str>,
        extension: Option<&str>,
    ) -> Result<TempFileHandle, PipelineError> {
        fs::create_dir_all(&self.base_dir)
            .to_storage_error(format!("Failed to create {}", self.base_dir.display()))?;

        let file_path = self.base_dir.join(Self::file_name(
            prefix.unwrap_or("temp"),
            extension.unwrap_or("txt"),
        ));
        fs::write(&file_path, content.as_bytes())
            .to_storage_error(format!("Failed to write {}", file_path.display()))?;

        let file_path = fs::canonicalize(&file_path).unwrap_or(file_path);
        if let Ok(mut registry) = self.registry.lock() {
            registry.insert(file_path.clone());
        }
        debug!("Wrote {} bytes to {}", content.len(), file_path.display());

        Ok(TempFileHandle {
            file_path,
            registry: self.registry.clone(),
            keep: false,
        })
    }

    /// `prefix_<millis>_<random>.ext`
    fn file_name(prefix: &str, extension: &str) -> String {
        let random: u32 = rand::rng().random();
        format!(
            "{}_{}_{:08x}.{}",
            prefix,
            Utc::now().timestamp_millis(),
            random,
            extension.trim_start_matches('.')
        )
    }

    /// Read a file back; `None` if it cannot be read
    pub fn read(&self, file_path: impl AsRef<Path>) -> Option<String> {
        match fs::read_to_string(file_path.as_ref()) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!("Could not read {}: {}", file_path.as_ref().display(), e);
                None
            }
        }
    }

    /// Remove one file; succeeds if it is already gone
    pub fn cleanup(&self, file_path: impl AsRef<Path>) -> bool {
        let path = file_path.as_ref();
        if let Ok(mut registry) = self.registry.lock() {
            registry.remove(path);
        }
        remove_file_quietly(path)
    }

    /// Remove every file this store has written and its directory if empty
    pub fn cleanup_all(&self) -> bool {
        let paths: Vec<PathBuf> = match self.registry.lock() {
            Ok(mut registry) => registry.drain().collect(),
            Err(_) => return false,
        };

        let all_removed = paths
            .iter()
            .map(|path| remove_file_quietly(path))
            .fold(true, |acc, removed| acc && removed);

        // Only succeeds when no foreign files remain in the directory
        let _ = fs::remove_dir(&self.base_dir);
        all_removed
    }

    /// Number of files written and not yet cleaned up
    pub fn tracked_count(&self) -> usize {
        self.registry.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Best-effort removal of store directories left behind by earlier runs
    ///
    /// Only directories under `root` named `promptflow-<pid>` whose last
    /// modification is older than `max_age` are removed. Returns the number
    /// of directories removed.
    pub fn sweep_orphans(root: impl AsRef<Path>, max_age: Duration) -> usize {
        let own = format!("{}{}", DIR_PREFIX, std::process::id());
        let Ok(entries) = fs::read_dir(root.as_ref()) else {
            return 0;
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_store_dir = name
                .strip_prefix(DIR_PREFIX)
                .is_some_and(|pid| !pid.is_empty() && pid.chars().all(|c| c.is_ascii_digit()));
            if !is_store_dir || name == own {
                continue;
            }

            let stale = entry
                .metadata()
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age >= max_age);
            if !stale {
                continue;
            }

            match fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Failed to sweep {}: {}", entry.path().display(), e),
            }
        }
        removed
    }
}

fn remove_file_quietly(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            warn!("Failed to remove temp file {}: {}", path.display(), e);
            false
        }
    }
}

/// Handle to a written temp file
///
/// Dropping the handle removes the file unless [`TempFileHandle::keep`] was
/// called, so a run releases its files even on early return.
#[derive(Debug)]
pub struct TempFileHandle {
    file_path: PathBuf,
    registry: Registry,
    keep: bool,
}

impl TempFileHandle {
    /// Absolute path of the file
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Remove the file; safe to call more than once
    pub fn cleanup(&self) -> bool {
        if let Ok(mut registry) = self.registry.lock() {
            registry.remove(&self.file_path);
        }
        remove_file_quietly(&self.file_path)
    }

    /// Leave the file in place when the handle is dropped
    ///
    /// The store still removes it in `cleanup_all`.
    pub fn keep(mut self) -> PathBuf {
        self.keep = true;
        self.file_path.clone()
    }
}

impl Drop for TempFileHandle {
    fn drop(&mut self) {
        if !self.keep {
            self.cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> TempFileStore {
        TempFileStore::with_base_dir(dir.path().join("store"))
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let content = r#"[{"title": "He said \"hi\"", "path": "C:\\tmp"}]"#;

        let handle = store.write(content, Some("results"), Some("json")).unwrap();
        assert!(handle.file_path().is_absolute());
        assert_eq!(store.read(handle.file_path()).as_deref(), Some(content));

        let name = handle.file_path().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with("results_"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn test_file_names_do_not_collide() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let a = store.write("a", None, None).unwrap();
        let b = store.write("b", None, None).unwrap();
        assert_ne!(a.file_path(), b.file_path());
    }

    #[test]
    fn test_cleanup_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let handle = store.write("x", None, None).unwrap();
        let path = handle.file_path().to_path_buf();

        assert!(handle.cleanup());
        assert!(handle.cleanup());
        assert!(!path.exists());
        assert!(store.cleanup(&path));
    }

    #[test]
    fn test_read_missing_file_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.read(dir.path().join("missing.txt")).is_none());
    }

    #[test]
    fn test_drop_removes_file_unless_kept() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let dropped = store.write("x", None, None).unwrap().file_path().to_path_buf();
        assert!(!dropped.exists());

        let kept = store.write("y", None, None).unwrap().keep();
        assert!(kept.exists());
        assert_eq!(store.tracked_count(), 1);

        assert!(store.cleanup_all());
        assert!(!kept.exists());
        assert_eq!(store.tracked_count(), 0);
    }

    #[test]
    fn test_sweep_orphans_skips_fresh_and_foreign_dirs() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("promptflow-999999")).unwrap();
        fs::create_dir(root.path().join("promptflow-notapid")).unwrap();
        fs::create_dir(root.path().join("unrelated")).unwrap();

        assert_eq!(
            TempFileStore::sweep_orphans(root.path(), Duration::from_secs(3600)),
            0
        );
        assert_eq!(TempFileStore::sweep_orphans(root.path(), Duration::ZERO), 1);
        assert!(root.path().join("promptflow-notapid").exists());
        assert!(root.path().join("unrelated").exists());
    }

    proptest! {
        #[test]
        fn test_round_trip_preserves_content(content in "\\PC*", suffix in "[\"'\\\\\n\t$`é漢🎉]{0,16}") {
            let dir = TempDir::new().unwrap();
            let store = store(&dir);
            let text = format!("{}{}", content, suffix);
            let handle = store.write(&text, Some("prop"), Some("json")).unwrap();
            prop_assert_eq!(store.read(handle.file_path()), Some(text));
        }
    }
}
