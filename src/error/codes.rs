/// Error code registry for promptflow
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Pipeline validation errors
/// - 3000-3999: Execution errors
/// - 4000-4999: AI invocation errors
/// - 5000-5999: Reduce errors
/// - 6000-6999: Storage errors
/// - 7000-7999: Cancellation
/// - 9000-9999: Other errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_INVALID_YAML: u16 = 1002;
    pub const CONFIG_INVALID_JSON: u16 = 1003;
    pub const CONFIG_INVALID_TOML: u16 = 1004;
    pub const CONFIG_INVALID_VALUE: u16 = 1005;

    // Pipeline validation errors (2000-2999)
    pub const VALIDATION_GENERIC: u16 = 2000;
    pub const VALIDATION_REQUIRED_FIELD: u16 = 2001;
    pub const VALIDATION_MUTUALLY_EXCLUSIVE: u16 = 2002;
    pub const VALIDATION_INVALID_VALUE: u16 = 2003;
    pub const VALIDATION_DUPLICATE_VALUE: u16 = 2004;
    pub const VALIDATION_MISSING_VARIABLE: u16 = 2005;
    pub const VALIDATION_INVALID_PATTERN: u16 = 2006;
    pub const VALIDATION_CSV: u16 = 2007;

    // Execution errors (3000-3999)
    pub const EXEC_GENERIC: u16 = 3000;
    pub const EXEC_TIMEOUT: u16 = 3001;
    pub const EXEC_MAP_FAILED: u16 = 3002;
    pub const EXEC_SPAWN_FAILED: u16 = 3003;
    pub const EXEC_INVALID_CONCURRENCY: u16 = 3004;

    // AI invocation errors (4000-4999)
    pub const AI_GENERIC: u16 = 4000;
    pub const AI_INVOCATION_FAILED: u16 = 4001;
    pub const AI_EMPTY_RESPONSE: u16 = 4002;
    pub const AI_UNPARSEABLE_RESPONSE: u16 = 4003;

    // Reduce errors (5000-5999)
    pub const REDUCE_GENERIC: u16 = 5000;
    pub const REDUCE_AI_FAILED: u16 = 5001;
    pub const REDUCE_MISSING_INVOKER: u16 = 5002;

    // Storage errors (6000-6999)
    pub const STORAGE_GENERIC: u16 = 6000;
    pub const STORAGE_IO_ERROR: u16 = 6001;
    pub const STORAGE_NOT_FOUND: u16 = 6002;
    pub const STORAGE_PERMISSION_DENIED: u16 = 6003;

    // Cancellation (7000-7999)
    pub const CANCELLED: u16 = 7000;

    // Other errors (9000-9999)
    pub const OTHER_GENERIC: u16 = 9000;
    pub const OTHER_INTERNAL_ERROR: u16 = 9001;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Invalid YAML syntax",
        1003 => "Invalid JSON syntax",
        1004 => "Invalid TOML syntax",
        1005 => "Invalid value in configuration",

        2000 => "Generic pipeline validation error",
        2001 => "Required field is missing",
        2002 => "Mutually exclusive fields were both set",
        2003 => "Invalid value",
        2004 => "Duplicate value not allowed",
        2005 => "Template variable cannot be resolved",
        2006 => "Invalid regular expression",
        2007 => "Invalid CSV input",

        3000 => "Generic execution error",
        3001 => "Operation timed out",
        3002 => "Map operation failed",
        3003 => "Failed to spawn subprocess",
        3004 => "Invalid concurrency limit",

        4000 => "Generic AI invocation error",
        4001 => "AI invocation failed",
        4002 => "AI returned an empty response",
        4003 => "AI response could not be parsed",

        5000 => "Generic reduce error",
        5001 => "AI reduce failed",
        5002 => "AI reduce requires an AI invoker",

        6000 => "Generic storage error",
        6001 => "Storage I/O error",
        6002 => "File not found",
        6003 => "Permission denied",

        7000 => "Operation cancelled",

        9000 => "Generic error",
        9001 => "Internal error",

        _ => "Unknown error code",
    }
}
