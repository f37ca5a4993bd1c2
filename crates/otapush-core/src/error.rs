use thiserror::Error;

/// Fault classes the update agent distinguishes in behavior, not just in
/// message text. `MalformedPackage` triggers a full state reset (the binary
/// bundle is always a safe fallback); `DataIntegrity` aborts the operation
/// that hit it; `Configuration` is surfaced at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error("malformed package data: {message}")]
    MalformedPackage { message: String },

    #[error("data integrity violation: {message}")]
    DataIntegrity { message: String },

    #[error("invalid agent configuration: {message}")]
    Configuration { message: String },
}

impl UpdateError {
    pub fn malformed_package(message: impl Into<String>) -> Self {
        Self::MalformedPackage {
            message: message.into(),
        }
    }

    pub fn data_integrity(message: impl Into<String>) -> Self {
        Self::DataIntegrity {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}
