//! Process tracker that records every call

use crate::abstractions::{GroupStats, ProcessStatus, ProcessTracker};
use serde_json::Value;
use std::sync::Mutex;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedProcess {
    pub id: String,
    pub description: String,
    pub parent_group_id: Option<String>,
    pub status: ProcessStatus,
    pub response: Option<String>,
    pub error: Option<String>,
    pub structured_result: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedGroup {
    pub id: String,
    pub description: String,
    /// Set once the group is completed
    pub summary: Option<String>,
    pub stats: Option<GroupStats>,
}

#[derive(Debug, Default)]
pub struct RecordingTracker {
    processes: Mutex<Vec<RecordedProcess>>,
    groups: Mutex<Vec<RecordedGroup>>,
}

impl RecordingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes in registration order, with their latest state
    pub fn processes(&self) -> Vec<RecordedProcess> {
        self.processes.lock().unwrap().clone()
    }

    pub fn groups(&self) -> Vec<RecordedGroup> {
        self.groups.lock().unwrap().clone()
    }
}

impl ProcessTracker for RecordingTracker {
    fn register_process(&self, description: &str, parent_group_id: Option<&str>) -> String {
        let mut processes = self.processes.lock().unwrap();
        let id = format!("process-{}", processes.len() + 1);
        processes.push(RecordedProcess {
            id: id.clone(),
            description: description.to_string(),
            parent_group_id: parent_group_id.map(str::to_string),
            status: ProcessStatus::Running,
            response: None,
            error: None,
            structured_result: None,
        });
        id
    }

    fn update_process(
        &self,
        id: &str,
        status: ProcessStatus,
        response: Option<&str>,
        error: Option<&str>,
        structured_result: Option<&Value>,
    ) {
        let mut processes = self.processes.lock().unwrap();
        if let Some(process) = processes.iter_mut().find(|p| p.id == id) {
            process.status = status;
            process.response = response.map(str::to_string);
            process.error = error.map(str::to_string);
            process.structured_result = structured_result.cloned();
        }
    }

    fn register_group(&self, description: &str) -> String {
        let mut groups = self.groups.lock().unwrap();
        let id = format!("group-{}", groups.len() + 1);
        groups.push(RecordedGroup {
            id: id.clone(),
            description: description.to_string(),
            summary: None,
            stats: None,
        });
        id
    }

    fn complete_group(&self, id: &str, summary: &str, stats: &GroupStats) {
        let mut groups = self.groups.lock().unwrap();
        if let Some(group) = groups.iter_mut().find(|g| g.id == id) {
            group.summary = Some(summary.to_string());
            group.stats = Some(stats.clone());
        }
    }
}
