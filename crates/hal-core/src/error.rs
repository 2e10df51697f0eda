use thiserror::Error;

/// Errors raised while describing tensors and building graphs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GraphError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("matmul dimension mismatch: [{m}x{k}] @ [{k2}x{n}]")]
    MatmulMismatch {
        m: usize,
        k: usize,
        k2: usize,
        n: usize,
    },
    #[error("unknown tensor id {0}")]
    UnknownTensor(usize),
    #[error("{0}")]
    Other(String),
}

/// Error taxonomy of the buffer/backend/device contracts.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("failed to allocate {requested} bytes from '{buft}': {reason}")]
    AllocationFailure {
        buft: String,
        requested: usize,
        reason: String,
    },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("execution failed at node {node} ({op}): {reason}")]
    ExecutionFailure {
        node: usize,
        op: String,
        reason: String,
    },
    #[error("initialization failed: {0}")]
    InitializationFailure(String),
    #[error("tensor '{0}' has no buffer")]
    Unallocated(String),
    #[error("tensor '{0}' does not live in this buffer")]
    ForeignTensor(String),
    #[error("range {offset}+{len} out of bounds for {size} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("offset {offset} is not aligned to {alignment}")]
    Misaligned { offset: usize, alignment: usize },
    #[error("{0} belongs to a different backend or device")]
    Foreign(String),
    #[error("buffer '{0}' is read-only")]
    ReadOnly(String),
    #[error("event has not been recorded")]
    EventNotRecorded,
    #[error("plan topology mismatch: {0}")]
    TopologyMismatch(String),
    #[error("invalid params '{params}': {reason}")]
    InvalidParams { params: String, reason: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),
    #[error("{0}")]
    Other(String),
}

/// Coarse class of a [`BackendError`], used by callers that route failures
/// (schedulers, the C boundary) without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Allocation,
    Unsupported,
    Execution,
    Initialization,
    Usage,
}

impl BackendError {
    pub fn class(&self) -> ErrorClass {
        match self {
            BackendError::AllocationFailure { .. } => ErrorClass::Allocation,
            BackendError::Unsupported(_) => ErrorClass::Unsupported,
            BackendError::ExecutionFailure { .. } | BackendError::Other(_) => {
                ErrorClass::Execution
            }
            BackendError::InitializationFailure(_) | BackendError::InvalidParams { .. } => {
                ErrorClass::Initialization
            }
            BackendError::Unallocated(_)
            | BackendError::ForeignTensor(_)
            | BackendError::OutOfBounds { .. }
            | BackendError::Misaligned { .. }
            | BackendError::Foreign(_)
            | BackendError::ReadOnly(_)
            | BackendError::EventNotRecorded
            | BackendError::TopologyMismatch(_)
            | BackendError::Io(_)
            | BackendError::Graph(_) => ErrorClass::Usage,
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        let e = BackendError::AllocationFailure {
            buft: "CPU".into(),
            requested: 10,
            reason: "too big".into(),
        };
        assert_eq!(e.class(), ErrorClass::Allocation);
        assert_eq!(
            BackendError::InvalidParams {
                params: "x".into(),
                reason: "bad".into()
            }
            .class(),
            ErrorClass::Initialization
        );
        assert_eq!(BackendError::EventNotRecorded.class(), ErrorClass::Usage);
    }

    #[test]
    fn test_graph_error_converts() {
        let e: BackendError = GraphError::UnknownTensor(3).into();
        assert!(matches!(e, BackendError::Graph(GraphError::UnknownTensor(3))));
        assert!(e.to_string().contains("unknown tensor id 3"));
    }
}
