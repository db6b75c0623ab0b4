/// Core error types shared by every bindbox layer
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// How a caller should react to a failure
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorClass {
    /// Re-issue the call with at least the reported capacity
    #[serde(rename = "retry_with_capacity")]
    RetryWithCapacity,
    /// Resource exhaustion; may succeed later without changing the request
    #[serde(rename = "transient")]
    Transient,
    /// Misconfiguration, missing privilege or unsupported platform
    #[serde(rename = "fatal")]
    Fatal,
}

/// Custom error types for bindbox
#[derive(Error, Debug)]
pub enum BindError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to create OS resource: {0}")]
    ResourceCreation(String),

    #[error("Resources exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Parent of virtual root is not mapped: {}", .0.display())]
    PathNotFound(PathBuf),

    #[error("Virtual root already mapped with incompatible policy: {}", .0.display())]
    AlreadyMapped(PathBuf),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Buffer too small: {required} bytes required")]
    BufferTooSmall { required: u32 },

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid batch configuration: {0}")]
    InvalidConfig(String),

    #[error("Malformed mapping listing: {0}")]
    MalformedListing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("Loader correction failed: {0}")]
    LoaderPatch(String),

    #[error("{operation} failed with status 0x{code:08X}")]
    Service { operation: &'static str, code: u32 },
}

impl BindError {
    /// Classify the error so callers can tell "grow the buffer" from "give up"
    pub fn class(&self) -> ErrorClass {
        match self {
            BindError::BufferTooSmall { .. } => ErrorClass::RetryWithCapacity,
            BindError::ResourceExhausted(_) => ErrorClass::Transient,
            BindError::Io(e) if e.kind() == std::io::ErrorKind::OutOfMemory => {
                ErrorClass::Transient
            }
            _ => ErrorClass::Fatal,
        }
    }

    /// Required capacity carried by a `BufferTooSmall` error
    pub fn required_capacity(&self) -> Option<u32> {
        match self {
            BindError::BufferTooSmall { required } => Some(*required),
            _ => None,
        }
    }
}

/// Result type alias for bindbox operations
pub type Result<T> = std::result::Result<T, BindError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(
            BindError::BufferTooSmall { required: 64 }.class(),
            ErrorClass::RetryWithCapacity
        );
        assert_eq!(
            BindError::ResourceExhausted("job".to_string()).class(),
            ErrorClass::Transient
        );
        assert_eq!(
            BindError::NotFound("D:\\v".to_string()).class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            BindError::AccessDenied("silo".to_string()).class(),
            ErrorClass::Fatal
        );
    }

    #[test]
    fn test_required_capacity() {
        assert_eq!(
            BindError::BufferTooSmall { required: 128 }.required_capacity(),
            Some(128)
        );
        assert_eq!(
            BindError::Unsupported("x".to_string()).required_capacity(),
            None
        );
    }

    #[test]
    fn test_service_error_display() {
        let err = BindError::Service {
            operation: "BfSetupFilter",
            code: 0x8000_4005,
        };
        assert_eq!(err.to_string(), "BfSetupFilter failed with status 0x80004005");
    }
}
