//! Abstraction layers for external collaborators
//!
//! This module provides the trait-based ports the engine depends on (the AI
//! backend and an optional process tracker) so they can be injected
//! explicitly and replaced with mocks in tests.

pub mod ai;
pub mod tracker;

pub use ai::{AiInvocationResult, AiInvoker, CommandAiInvoker, InvokeOptions};
pub use tracker::{GroupStats, LoggingProcessTracker, ProcessStatus, ProcessTracker};
