//! CINDER - Error Types
//! Defines the error taxonomy surfaced by option validation and the engine.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the Cinder engine.
///
/// A missing key is not an error: `Db::get` returns `Ok(None)`.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incompatible option value (e.g. unknown compression code).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// `create_if_missing` / `error_if_exists` policy violated at open.
    #[error("Existence conflict: {0}")]
    ExistenceConflict(String),

    /// Persisted comparator or filter-policy name differs from the supplied one.
    #[error("{kind} mismatch: database was created with {stored:?}, opened with {supplied:?}")]
    IdentityMismatch {
        kind: &'static str,
        stored: String,
        supplied: String,
    },

    /// Checksum or structural inconsistency in a log, table or manifest.
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// Storage or file-handle exhaustion.
    #[error("Resource exhausted: {0}")]
    Resource(String),

    /// Argument that does not belong to this engine instance.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O errors from file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest encoding/decoding errors.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl Error {
    /// Classify an I/O error, turning descriptor exhaustion into `Resource`.
    pub(crate) fn from_open(err: std::io::Error, what: &str) -> Self {
        // EMFILE (24) and ENFILE (23) on unix-likes.
        match err.raw_os_error() {
            Some(23) | Some(24) => Error::Resource(format!("cannot open {}: {}", what, err)),
            _ => Error::Io(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_exhaustion_is_resource_error() {
        let err = Error::from_open(std::io::Error::from_raw_os_error(24), "000007.sst");
        assert!(matches!(err, Error::Resource(_)));

        let err = Error::from_open(std::io::Error::from(std::io::ErrorKind::NotFound), "x");
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_identity_mismatch_display() {
        let err = Error::IdentityMismatch {
            kind: "comparator",
            stored: "A".into(),
            supplied: "B".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("comparator"));
        assert!(msg.contains("\"A\""));
        assert!(msg.contains("\"B\""));
    }
}
