//! Error types for device operations

/// Result type for device operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors that can occur while talking to a device
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Invalid buffer handle
    #[error("invalid buffer handle: {0}")]
    InvalidBufferHandle(u64),

    /// Invalid stream handle
    #[error("invalid stream handle: {0}")]
    InvalidStreamHandle(u64),

    /// Buffer access out of bounds
    #[error("buffer access out of bounds: offset {offset} + size {size} > buffer size {buffer_size}")]
    BufferOutOfBounds {
        offset: usize,
        size: usize,
        buffer_size: usize,
    },

    /// Device allocation failed
    #[error("out of device memory: requested {requested} bytes ({reason})")]
    OutOfDeviceMemory { requested: usize, reason: String },

    /// Invalid launch configuration or platform limits
    #[error("invalid launch configuration: {0}")]
    InvalidLaunchConfig(String),

    /// Unsupported operation
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Create an out-of-memory error
    pub fn out_of_memory(requested: usize, reason: impl Into<String>) -> Self {
        Self::OutOfDeviceMemory {
            requested,
            reason: reason.into(),
        }
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Whether this error reports an exhausted device
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfDeviceMemory { .. })
    }
}
