use thiserror::Error;
use uuid::Uuid;

/// Errors from snapshot store operations (used by trait definitions in anvil-core).
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("storage connection error: {0}")]
    Connection(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(String),

    #[error("corrupt snapshot for execution {execution_id}: {reason}")]
    Corrupt { execution_id: Uuid, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persistence_error_display() {
        let err = PersistenceError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_corrupt_error_names_execution() {
        let err = PersistenceError::Corrupt {
            execution_id: Uuid::nil(),
            reason: "bad index".to_string(),
        };
        assert!(err.to_string().contains("00000000-0000-0000-0000-000000000000"));
        assert!(err.to_string().contains("bad index"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: PersistenceError = io.into();
        assert!(matches!(err, PersistenceError::Io(_)));
    }
}
