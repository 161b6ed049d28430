//! Mock implementations of the engine's ports

pub mod ai;
pub mod tracker;

pub use ai::MockAiInvoker;
pub use tracker::{RecordedGroup, RecordedProcess, RecordingTracker};
