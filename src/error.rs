//! Error types for the Careerfolio core.

use crate::attachments::AttachmentKind;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Attachment error: {0}")]
    Attachment(#[from] AttachmentError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Backend transport error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport-level failures from the remote record or object store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode backend response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid endpoint URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Identity-backend errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Email address has not been confirmed yet")]
    UnconfirmedEmail,

    #[error("Not authorized to perform this action")]
    Unauthorized,

    #[error("Identity backend request failed: {0}")]
    Backend(String),

    #[error("Identity backend transport error: {0}")]
    Transport(#[from] StoreError),
}

/// Profile read/write errors.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("Profile not found for id {id}")]
    NotFound { id: String },

    #[error("Profile row is malformed: {0}")]
    Malformed(String),

    #[error("Profile backend error: {0}")]
    Backend(#[from] StoreError),

    #[error("{field} entry cannot be empty")]
    EmptyEntry { field: &'static str },

    #[error("No {field} entry at index {index} (length {len})")]
    IndexOutOfRange {
        field: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Another write is in flight for profile {id}")]
    Busy { id: String },
}

/// Attachment lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum AttachmentError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("{kind} upload failed: {reason}")]
    Upload { kind: AttachmentKind, reason: String },
}

/// Client-side validation failures. Raised before any backend call is made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("Phone must be exactly 10 digits")]
    PhoneFormat,

    #[error("At least one education entry is required")]
    MissingEducation,

    #[error("All address fields are required")]
    IncompleteAddress,

    #[error("{0} is required")]
    MissingAttachment(AttachmentKind),

    #[error("File size {size} bytes exceeds the {max} byte limit")]
    FileTooLarge { size: u64, max: u64 },

    #[error("{kind} does not accept files of type {content_type}")]
    UnsupportedType {
        kind: AttachmentKind,
        content_type: String,
    },
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_render_field_names() {
        let err = ValidationError::MissingField("full_name");
        assert_eq!(err.to_string(), "full_name is required");

        let err = ValidationError::MissingAttachment(AttachmentKind::Resume);
        assert_eq!(err.to_string(), "resume is required");
    }

    #[test]
    fn store_errors_convert_into_profile_errors() {
        let err: ProfileError = StoreError::Status {
            status: 503,
            body: "unavailable".to_string(),
        }
        .into();
        assert!(matches!(err, ProfileError::Backend(_)));
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn busy_error_names_the_profile() {
        let err = ProfileError::Busy {
            id: "u-42".to_string(),
        };
        assert!(err.to_string().contains("u-42"));
    }
}
