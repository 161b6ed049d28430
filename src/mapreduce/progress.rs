//! Progress reporting for executor runs

use crate::mapreduce::types::{JobPhase, JobProgress};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Callback receiving progress snapshots
pub type ProgressCallback = Arc<dyn Fn(JobProgress) + Send + Sync>;

const MAP_START: u8 = 5;
const MAP_END: u8 = 90;
const REDUCE_START: u8 = 92;

/// Per-run progress state
///
/// Percentages never decrease within a run, and 100 is reported only by
/// [`ProgressReporter::complete`].
pub struct ProgressReporter {
    callback: Option<ProgressCallback>,
    total_items: AtomicUsize,
    completed_items: AtomicUsize,
    failed_items: AtomicUsize,
    last_percentage: Mutex<u8>,
}

impl ProgressReporter {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            callback,
            total_items: AtomicUsize::new(0),
            completed_items: AtomicUsize::new(0),
            failed_items: AtomicUsize::new(0),
            last_percentage: Mutex::new(0),
        }
    }

    pub fn splitting(&self) {
        self.emit(JobPhase::Splitting, 0, Some("Splitting input".to_string()));
    }

    pub fn mapping_started(&self, total_items: usize) {
        self.total_items.store(total_items, Ordering::SeqCst);
        self.emit(
            JobPhase::Mapping,
            MAP_START,
            Some(format!("Mapping {} items", total_items)),
        );
    }

    /// Record one finished item
    pub fn item_finished(&self, success: bool) {
        let completed = self.completed_items.fetch_add(1, Ordering::SeqCst) + 1;
        if !success {
            self.failed_items.fetch_add(1, Ordering::SeqCst);
        }
        let total = self.total_items.load(Ordering::SeqCst).max(1);
        let span = (MAP_END - MAP_START) as usize;
        let percentage = MAP_START as usize + span * completed.min(total) / total;
        self.emit(JobPhase::Mapping, percentage as u8, None);
    }

    pub fn reducing(&self) {
        self.emit(JobPhase::Reducing, REDUCE_START, Some("Reducing results".to_string()));
    }

    pub fn complete(&self) {
        self.emit(JobPhase::Complete, 100, Some("Complete".to_string()));
    }

    pub fn failed(&self, message: impl Into<String>) {
        self.emit(JobPhase::Failed, 0, Some(message.into()));
    }

    fn emit(&self, phase: JobPhase, percentage: u8, message: Option<String>) {
        let percentage = {
            let mut last = match self.last_percentage.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let capped = if phase == JobPhase::Complete {
                100
            } else {
                percentage.min(99)
            };
            *last = (*last).max(capped);
            *last
        };

        if let Some(callback) = &self.callback {
            callback(JobProgress {
                phase,
                percentage,
                total_items: self.total_items.load(Ordering::SeqCst),
                completed_items: self.completed_items.load(Ordering::SeqCst),
                failed_items: self.failed_items.load(Ordering::SeqCst),
                message,
            });
        }
    }
}
