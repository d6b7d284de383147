//! Error types for the shim

/// Result type for shim operations
pub type ShimResult<T> = Result<T, ShimError>;

/// Failures reported by the shim
///
/// Image validation errors are produced before the VM sees any body bytes.
/// Everything raised inside the VM arrives as [`ShimError::ScriptError`]
/// after passing through the exception slot.
#[derive(Debug, thiserror::Error)]
pub enum ShimError {
    /// Unknown identifier or unsupported format version
    #[error("Invalid image header")]
    InvalidImageHeader,

    /// Buffer or declared size not larger than the header
    #[error("Image too small: {size} bytes")]
    ImageTooSmall {
        /// Offending size
        size: usize,
    },

    /// Declared size larger than the buffer
    #[error("Image truncated: header declares {declared} bytes, buffer holds {available}")]
    ImageTruncated {
        /// Size from the header
        declared: usize,
        /// Bytes available
        available: usize,
    },

    /// Exception raised inside the VM, rendered with its backtrace
    #[error("{0}")]
    ScriptError(String),

    /// Value or payload of the wrong kind
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// Recovery points were not restored in nesting order
    #[error("Stale jump state: recovery points restored out of order")]
    StaleJumpState,

    /// Class not declared as data-object represented
    #[error("Class {0} does not hold data objects")]
    InstanceRepresentation(String),

    /// Value is not a procedure
    #[error("Not a procedure")]
    NotAProcedure,

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ShimError {
    /// Type mismatch from two displayable names
    pub fn mismatch(expected: impl Into<String>, got: impl Into<String>) -> Self {
        ShimError::TypeMismatch {
            expected: expected.into(),
            got: got.into(),
        }
    }
}
