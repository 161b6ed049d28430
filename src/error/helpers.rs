use super::{ErrorCode, PipelineError};
use std::path::Path;

/// Extension trait for convenient error conversion
pub trait ErrorExt<T> {
    /// Convert to PipelineError with context
    fn to_pipeline(self, context: impl Into<String>) -> Result<T, PipelineError>;

    fn to_config_error(self, message: impl Into<String>) -> Result<T, PipelineError>;
    fn to_storage_error(self, message: impl Into<String>) -> Result<T, PipelineError>;
    fn to_execution_error(self, message: impl Into<String>) -> Result<T, PipelineError>;
}

impl<T, E> ErrorExt<T> for Result<T, E>
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn to_pipeline(self, context: impl Into<String>) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::other(context).with_source(e))
    }

    fn to_config_error(self, message: impl Into<String>) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::config(message).with_source(e))
    }

    fn to_storage_error(self, message: impl Into<String>) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::storage(message).with_source(e))
    }

    fn to_execution_error(self, message: impl Into<String>) -> Result<T, PipelineError> {
        self.map_err(|e| PipelineError::execution(message).with_source(e))
    }
}

/// Not-found error for a file the pipeline references
pub fn file_not_found(path: impl AsRef<Path>, what: &str) -> PipelineError {
    PipelineError::storage_with_code(
        ErrorCode::STORAGE_NOT_FOUND,
        format!("{} not found: {}", what, path.as_ref().display()),
        Some(path.as_ref().to_path_buf()),
    )
}

/// Timeout error for a single operation
pub fn timed_out(operation: &str, timeout_ms: u64) -> PipelineError {
    PipelineError::execution_with_code(
        ErrorCode::EXEC_TIMEOUT,
        format!("{} timed out after {}ms", operation, timeout_ms),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_ext_wraps_source() {
        let res: Result<(), std::io::Error> = Err(std::io::Error::other("boom"));
        let err = res.to_storage_error("write failed").unwrap_err();
        assert_eq!(err.code(), ErrorCode::STORAGE_GENERIC);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_timed_out_is_timeout() {
        let err = timed_out("Map item-1", 500);
        assert!(err.is_timeout());
        assert!(err.to_string().contains("timed out after 500ms"));
    }
}
