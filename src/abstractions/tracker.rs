//! Process tracking port
//!
//! An optional observer that mirrors executor activity into an external
//! process list. The engine behaves identically whether or not one is
//! supplied.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Lifecycle state reported for a tracked process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessStatus::Running => "running",
            ProcessStatus::Completed => "completed",
            ProcessStatus::Failed => "failed",
            ProcessStatus::Cancelled => "cancelled",
        }
    }
}

/// Summary numbers attached to a completed group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub total_items: usize,
    pub successful_items: usize,
    pub failed_items: usize,
}

/// Observer for executor activity
pub trait ProcessTracker: Send + Sync {
    /// Register a process, optionally nested under a group; returns its id
    fn register_process(&self, description: &str, parent_group_id: Option<&str>) -> String;

    fn update_process(
        &self,
        id: &str,
        status: ProcessStatus,
        response: Option<&str>,
        error: Option<&str>,
        structured_result: Option<&Value>,
    );

    /// Register a group that processes can be nested under; returns its id
    fn register_group(&self, description: &str) -> String;

    fn complete_group(&self, id: &str, summary: &str, stats: &GroupStats);
}

/// Tracker that mirrors process activity into the tracing log
#[derive(Debug, Default)]
pub struct LoggingProcessTracker {
    next_id: AtomicU64,
}

impl LoggingProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self, prefix: &str) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", prefix, id)
    }
}

impl ProcessTracker for LoggingProcessTracker {
    fn register_process(&self, description: &str, parent_group_id: Option<&str>) -> String {
        let id = self.next("process");
        debug!(process_id = %id, parent = ?parent_group_id, "Started: {}", description);
        id
    }

    fn update_process(
        &self,
        id: &str,
        status: ProcessStatus,
        _response: Option<&str>,
        error: Option<&str>,
        _structured_result: Option<&Value>,
    ) {
        match (status, error) {
            (ProcessStatus::Failed, Some(error)) => {
                warn!(process_id = %id, "Process failed: {}", error)
            }
            _ => debug!(process_id = %id, status = status.as_str(), "Process updated"),
        }
    }

    fn register_group(&self, description: &str) -> String {
        let id = self.next("group");
        info!(group_id = %id, "Started {}", description);
        id
    }

    fn complete_group(&self, id: &str, summary: &str, stats: &GroupStats) {
        info!(
            group_id = %id,
            total = stats.total_items,
            successful = stats.successful_items,
            failed = stats.failed_items,
            "{}",
            summary
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_tracker_ids_are_unique() {
        let tracker = LoggingProcessTracker::new();
        let group = tracker.register_group("run");
        let a = tracker.register_process("a", Some(&group));
        let b = tracker.register_process("b", Some(&group));
        assert_ne!(a, b);
        assert!(group.starts_with("group-"));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&ProcessStatus::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }
}
