use std::fmt::Display;
use std::path::PathBuf;
use thiserror::Error;

pub mod codes;
pub mod helpers;

pub use codes::{describe_error_code, ErrorCode};
pub use helpers::ErrorExt;

/// Message used for every cancellation surfaced by the engine
pub const CANCELLATION_MESSAGE: &str = "Operation cancelled";

/// The unified error type for promptflow
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("[E{code:04}] Configuration error: {message}")]
    Config {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Validation error: {message}")]
    Validation {
        code: u16,
        message: String,
        field: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Execution error: {message}")]
    Execution {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] AI invocation failed: {message}")]
    AiInvocation {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Reduce error: {message}")]
    Reduce {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] Storage error: {message}")]
    Storage {
        code: u16,
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("[E{code:04}] {message}")]
    Cancelled { code: u16, message: String },

    #[error("[E{code:04}] {message}")]
    Other {
        code: u16,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl PipelineError {
    /// Create a configuration error with default code
    pub fn config(message: impl Into<String>) -> Self {
        Self::config_with_code(ErrorCode::CONFIG_GENERIC, message)
    }

    /// Create a configuration error with specific code
    pub fn config_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Config {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a validation error for a specific config field
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::validation_with_code(ErrorCode::VALIDATION_GENERIC, field, message)
    }

    /// Create a validation error with specific code and field
    pub fn validation_with_code(
        code: u16,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation {
            code,
            message: message.into(),
            field: Some(field.into()),
            source: None,
        }
    }

    /// Create an execution error with default code
    pub fn execution(message: impl Into<String>) -> Self {
        Self::execution_with_code(ErrorCode::EXEC_GENERIC, message)
    }

    /// Create an execution error with specific code
    pub fn execution_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Execution {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create an AI invocation error
    pub fn ai_invocation(message: impl Into<String>) -> Self {
        Self::AiInvocation {
            code: ErrorCode::AI_INVOCATION_FAILED,
            message: message.into(),
            source: None,
        }
    }

    /// Create an AI invocation error with specific code
    pub fn ai_invocation_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::AiInvocation {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a reduce error with default code
    pub fn reduce(message: impl Into<String>) -> Self {
        Self::reduce_with_code(ErrorCode::REDUCE_GENERIC, message)
    }

    /// Create a reduce error with specific code
    pub fn reduce_with_code(code: u16, message: impl Into<String>) -> Self {
        Self::Reduce {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a storage error with default code
    pub fn storage(message: impl Into<String>) -> Self {
        Self::storage_with_code(ErrorCode::STORAGE_GENERIC, message, None)
    }

    /// Create a storage error with specific code and path
    pub fn storage_with_code(code: u16, message: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self::Storage {
            code,
            message: message.into(),
            path,
            source: None,
        }
    }

    /// Create the cancellation error
    pub fn cancelled() -> Self {
        Self::Cancelled {
            code: ErrorCode::CANCELLED,
            message: CANCELLATION_MESSAGE.to_string(),
        }
    }

    /// Create a generic other error
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            code: ErrorCode::OTHER_GENERIC,
            message: message.into(),
            source: None,
        }
    }

    /// Add a source error to this error
    pub fn with_source(
        mut self,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        match &mut self {
            Self::Config { source: src, .. }
            | Self::Validation { source: src, .. }
            | Self::Execution { source: src, .. }
            | Self::AiInvocation { source: src, .. }
            | Self::Reduce { source: src, .. }
            | Self::Storage { source: src, .. }
            | Self::Other { source: src, .. } => {
                *src = Some(source.into());
            }
            Self::Cancelled { .. } => {}
        }
        self
    }

    /// Add context to the error message
    pub fn with_context(mut self, context: impl Display) -> Self {
        match &mut self {
            Self::Config { message, .. }
            | Self::Validation { message, .. }
            | Self::Execution { message, .. }
            | Self::AiInvocation { message, .. }
            | Self::Reduce { message, .. }
            | Self::Storage { message, .. }
            | Self::Cancelled { message, .. }
            | Self::Other { message, .. } => {
                *message = format!("{}: {}", message, context);
            }
        }
        self
    }

    /// Get the error code
    pub fn code(&self) -> u16 {
        match self {
            Self::Config { code, .. }
            | Self::Validation { code, .. }
            | Self::Execution { code, .. }
            | Self::AiInvocation { code, .. }
            | Self::Reduce { code, .. }
            | Self::Storage { code, .. }
            | Self::Cancelled { code, .. }
            | Self::Other { code, .. } => *code,
        }
    }

    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::Validation { .. } => 3,
            Self::Execution { .. } => 4,
            Self::AiInvocation { .. } => 5,
            Self::Reduce { .. } => 6,
            Self::Storage { .. } => 7,
            Self::Cancelled { .. } => 130,
            Self::Other { .. } => 1,
        }
    }

    /// The config field a validation error refers to
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => field.as_deref(),
            _ => None,
        }
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    pub fn is_timeout(&self) -> bool {
        self.code() == ErrorCode::EXEC_TIMEOUT
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Config { message, .. } => format!("Configuration problem: {}", message),
            Self::Validation { message, field, .. } => match field {
                Some(f) => format!("Invalid pipeline at '{}': {}", f, message),
                None => format!("Invalid pipeline: {}", message),
            },
            Self::Execution { message, .. } => format!("Execution error: {}", message),
            Self::AiInvocation { message, .. } => format!("AI call failed: {}", message),
            Self::Reduce { message, .. } => format!("Reduce failed: {}", message),
            Self::Storage { message, path, .. } => match path {
                Some(p) => format!("Storage error at {}: {}", p.display(), message),
                None => format!("Storage error: {}", message),
            },
            Self::Cancelled { message, .. } | Self::Other { message, .. } => message.clone(),
        }
    }
}

/// Type alias for Results using PipelineError
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Returned by the concurrency limiter when a queued task observes cancellation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{}", CANCELLATION_MESSAGE)]
pub struct CancellationError;

impl From<CancellationError> for PipelineError {
    fn from(_: CancellationError) -> Self {
        PipelineError::cancelled()
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, message) = match err.kind() {
            ErrorKind::NotFound => (ErrorCode::STORAGE_NOT_FOUND, "File or directory not found"),
            ErrorKind::PermissionDenied => {
                (ErrorCode::STORAGE_PERMISSION_DENIED, "Permission denied")
            }
            ErrorKind::TimedOut => (ErrorCode::EXEC_TIMEOUT, "Operation timed out"),
            _ => (ErrorCode::STORAGE_IO_ERROR, "IO operation failed"),
        };

        PipelineError::storage_with_code(code, message, None).with_source(err)
    }
}

impl From<serde_yaml::Error> for PipelineError {
    fn from(err: serde_yaml::Error) -> Self {
        PipelineError::config_with_code(ErrorCode::CONFIG_INVALID_YAML, "Invalid YAML syntax")
            .with_source(err)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::config_with_code(ErrorCode::CONFIG_INVALID_JSON, "Invalid JSON syntax")
            .with_source(err)
    }
}
