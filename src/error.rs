use thiserror::Error;

/// Result alias used throughout the crate.
pub type AtomicResult<T> = Result<T, AtomicError>;

/// Every failure the store, its resources, and its collaborators can produce.
///
/// The type is `Clone` so one failure can reject the caller's future and land
/// in the store's error sink at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AtomicError {
    /// Malformed JSON-AD payload. Fatal to the resource it was parsed into.
    #[error("{0}")]
    StructuralParse(String),
    /// A stored value could not be viewed as the requested type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },
    /// A value was requested as a resource array but is not one.
    #[error("not a resource array: {0}")]
    NotAResourceArray(String),
    /// A local edit violates the constraints of its Property.
    #[error("validation failed: {0}")]
    Validation(String),
    /// No agent is available to sign a commit.
    #[error("signing failed: {0}")]
    Signing(String),
    /// The server refused a commit (conflict, stale previous commit, rights).
    #[error("server rejected commit ({status}): {message}")]
    ServerRejected { status: u16, message: String },
    /// The transport failed to reach the server.
    #[error("network error: {0}")]
    Network(String),
    /// The server answered with an Error resource.
    #[error("server error: {0}")]
    Server(String),
    /// The subject does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Store configuration could not be read.
    #[error("config error: {0}")]
    Config(String),
}

impl AtomicError {
    pub fn parse(message: impl Into<String>) -> Self {
        AtomicError::StructuralParse(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AtomicError::Validation(message.into())
    }

    pub fn network(message: impl Into<String>) -> Self {
        AtomicError::Network(message.into())
    }

    /// Prefixes the message with extra context, keeping the variant.
    ///
    /// Used by the parser at every recursion level so the final message reads
    /// outermost-first.
    pub fn with_context(self, context: impl AsRef<str>) -> Self {
        let context = context.as_ref();
        match self {
            AtomicError::StructuralParse(msg) => {
                AtomicError::StructuralParse(format!("{context} {msg}"))
            }
            AtomicError::Validation(msg) => AtomicError::Validation(format!("{context} {msg}")),
            AtomicError::Network(msg) => AtomicError::Network(format!("{context} {msg}")),
            AtomicError::Server(msg) => AtomicError::Server(format!("{context} {msg}")),
            other => AtomicError::StructuralParse(format!("{context} {other}")),
        }
    }

    /// Whether the caller can reasonably recover (retry, fall back, re-edit).
    ///
    /// Structural parse errors are fatal to the resource they belong to.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, AtomicError::StructuralParse(_))
    }

    /// True for conflicts the caller should resolve by refetching first.
    pub fn is_conflict(&self) -> bool {
        matches!(self, AtomicError::ServerRejected { status: 409, .. })
    }
}

impl From<serde_json::Error> for AtomicError {
    fn from(err: serde_json::Error) -> Self {
        AtomicError::StructuralParse(err.to_string())
    }
}
