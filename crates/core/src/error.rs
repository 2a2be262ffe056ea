use thiserror::Error;

/// The closed error vocabulary that crosses every boundary in AGFS.
///
/// Every plugin, the mount table, the handle registry, and the HTTP
/// dispatcher all speak this single type — nothing downstream is allowed to
/// invent a new kind or recover one by matching on a message string.
#[derive(Debug, Error, Clone)]
pub enum AgfsError {
    #[error("not found: {context}")]
    NotFound { context: String },

    #[error("permission denied: {context}")]
    PermissionDenied { context: String },

    #[error("invalid argument: {context}")]
    InvalidArgument { context: String },

    #[error("already exists: {context}")]
    AlreadyExists { context: String },

    #[error("not supported: {context}")]
    NotSupported { context: String },

    #[error("internal error: {context}")]
    Internal { context: String },
}

pub type AgfsResult<T> = Result<T, AgfsError>;

impl AgfsError {
    pub fn not_found(context: impl Into<String>) -> Self {
        Self::NotFound { context: context.into() }
    }

    pub fn permission_denied(context: impl Into<String>) -> Self {
        Self::PermissionDenied { context: context.into() }
    }

    pub fn invalid_argument(context: impl Into<String>) -> Self {
        Self::InvalidArgument { context: context.into() }
    }

    pub fn already_exists(context: impl Into<String>) -> Self {
        Self::AlreadyExists { context: context.into() }
    }

    pub fn not_supported(context: impl Into<String>) -> Self {
        Self::NotSupported { context: context.into() }
    }

    pub fn internal(context: impl Into<String>) -> Self {
        Self::Internal { context: context.into() }
    }

    /// Short machine-readable tag for the kind, used as the `"error"` field
    /// of the JSON error body and in structured log fields.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::InvalidArgument { .. } => "invalid_argument",
            Self::AlreadyExists { .. } => "already_exists",
            Self::NotSupported { .. } => "not_supported",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn context(&self) -> &str {
        match self {
            Self::NotFound { context }
            | Self::PermissionDenied { context }
            | Self::InvalidArgument { context }
            | Self::AlreadyExists { context }
            | Self::NotSupported { context }
            | Self::Internal { context } => context,
        }
    }
}

impl From<std::io::Error> for AgfsError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::NotFound => AgfsError::not_found(e.to_string()),
            ErrorKind::AlreadyExists => AgfsError::already_exists(e.to_string()),
            ErrorKind::PermissionDenied => AgfsError::permission_denied(e.to_string()),
            ErrorKind::InvalidInput | ErrorKind::InvalidData => {
                AgfsError::invalid_argument(e.to_string())
            }
            _ => AgfsError::internal(e.to_string()),
        }
    }
}

impl From<rusqlite::Error> for AgfsError {
    fn from(e: rusqlite::Error) -> Self {
        AgfsError::internal(format!("sql backend: {e}"))
    }
}

impl From<serde_json::Error> for AgfsError {
    fn from(e: serde_json::Error) -> Self {
        AgfsError::invalid_argument(format!("json: {e}"))
    }
}
