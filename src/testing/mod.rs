//! Testing utilities and fixtures
//!
//! Mock collaborators for the AI and process-tracking ports, plus a small
//! filesystem fixture for pipeline tests. Shared by unit tests and the
//! integration tests under `tests/`.

pub mod mocks;

pub use mocks::{MockAiInvoker, RecordedGroup, RecordedProcess, RecordingTracker};

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temporary working directory for pipeline fixtures
pub struct TestContext {
    pub temp_dir: TempDir,
}

impl TestContext {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp_dir: TempDir::new()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Write a file relative to the fixture root, creating parent directories
    pub fn write_file(&self, relative: &str, content: &str) -> Result<PathBuf> {
        let file_path = self.temp_dir.path().join(relative);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&file_path, content)?;
        Ok(file_path)
    }
}
