//! Error types for fieldgrid-core operations

use fieldgrid_backends::BackendError;
use std::fmt;

/// Result type for fieldgrid-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration parameter group named by [`Error::InvalidArgument`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamGroup {
    GridSize,
    CellSize,
    Pbc,
}

impl fmt::Display for ParamGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GridSize => "GridSize",
            Self::CellSize => "CellSize",
            Self::Pbc => "PBC",
        };
        f.write_str(name)
    }
}

/// Errors that can occur in fieldgrid-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration value violates its invariant; nothing was mutated
    #[error("{group}: illegal argument ({reason})")]
    InvalidArgument { group: ParamGroup, reason: String },

    /// The operation needs state that does not exist yet (or no longer)
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A device allocation failed while (re)building mesh resources
    #[error("failed to allocate {resource}: {source}")]
    ResourceExhaustion {
        resource: String,
        #[source]
        source: BackendError,
    },

    /// Buffer size mismatch
    #[error("buffer size mismatch: expected {expected}, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Transfer pipeline failure
    #[error("transfer error: {0}")]
    Transfer(String),

    /// Any other device error
    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl Error {
    pub(crate) fn invalid(group: ParamGroup, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            group,
            reason: reason.into(),
        }
    }

    /// Map an allocation failure for `resource`; out-of-memory becomes
    /// [`Error::ResourceExhaustion`], everything else stays a device error.
    pub(crate) fn allocation(resource: impl Into<String>, source: BackendError) -> Self {
        if source.is_out_of_memory() {
            Self::ResourceExhaustion {
                resource: resource.into(),
                source,
            }
        } else {
            Self::Backend(source)
        }
    }

    /// Whether this error leaves the mesh resources unusable
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ResourceExhaustion { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_argument_names_group() {
        let err = Error::invalid(ParamGroup::Pbc, "repetition count -1 < 0");
        assert_eq!(err.to_string(), "PBC: illegal argument (repetition count -1 < 0)");
    }

    #[test]
    fn test_allocation_mapping() {
        let oom = Error::allocation("magnetization", BackendError::out_of_memory(64, "full"));
        assert!(oom.is_fatal());
        assert!(oom.to_string().starts_with("failed to allocate magnetization"));

        let other = Error::allocation("regions", BackendError::InvalidBufferHandle(3));
        assert!(!other.is_fatal());
        assert!(matches!(other, Error::Backend(BackendError::InvalidBufferHandle(3))));
    }
}
