use thiserror::Error;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures reported by the document store. Listener error channels carry
/// the same type, so it stays `Clone`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Rejected by the access rules.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The query mixes equality and ordering on different fields and no
    /// composite index covers it.
    #[error("query on {collection} requires a composite index on ({fields})")]
    FailedPrecondition { collection: String, fields: String },

    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },

    #[error("document {collection}/{id} already exists")]
    AlreadyExists { collection: String, id: String },

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("storage failure: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::PermissionDenied(_) => "permission-denied",
            Self::FailedPrecondition { .. } => "failed-precondition",
            Self::NotFound { .. } => "not-found",
            Self::AlreadyExists { .. } => "already-exists",
            Self::Malformed(_) => "data-loss",
            Self::Unavailable(_) => "unavailable",
            Self::Internal(_) => "internal",
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }

    pub fn is_missing_index(&self) -> bool {
        matches!(self, Self::FailedPrecondition { .. })
    }

    pub(crate) fn denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied(reason.into())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Malformed(e.to_string())
    }
}
