/// Error returned by a task source or metadata store, with retry
/// classification.
///
/// Workers use `is_retryable()` to decide whether to back off and poll again
/// or to report the error and stop. Registration uses `is_already_exists()` to
/// treat "type already registered" as success.
///
/// **Retryable**: throttling, connection resets, busy/locked databases.
///
/// **Permanent**: unknown domains or task tokens, malformed payloads,
/// duplicate registrations.
///
/// ```rust
/// use taskchain::providers::{ProviderError, ProviderErrorKind};
///
/// let busy = ProviderError::retryable("poll_decision_task", "throttled");
/// assert!(busy.is_retryable());
///
/// let dup = ProviderError::already_exists("register_activity_type", "charge@1.0.0");
/// assert!(dup.is_already_exists());
/// assert_eq!(dup.kind, ProviderErrorKind::TypeAlreadyExists);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderError {
    /// Operation that failed (e.g. "poll_decision_task", "put")
    pub operation: String,
    pub message: String,
    pub retryable: bool,
    pub kind: ProviderErrorKind,
}

/// Coarse classification the runtime branches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderErrorKind {
    /// Domain or type is already registered remotely.
    TypeAlreadyExists,
    /// Domain, namespace, execution or task token does not exist.
    UnknownResource,
    /// Task token was already used for a response.
    AlreadyResponded,
    #[default]
    Other,
}

impl ProviderError {
    /// Transient error: throttling, timeouts, busy store.
    pub fn retryable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: true,
            kind: ProviderErrorKind::Other,
        }
    }

    /// Error that will not succeed on retry.
    pub fn permanent(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
            retryable: false,
            kind: ProviderErrorKind::Other,
        }
    }

    pub fn already_exists(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::permanent(operation, message).with_kind(ProviderErrorKind::TypeAlreadyExists)
    }

    pub fn unknown_resource(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::permanent(operation, message).with_kind(ProviderErrorKind::UnknownResource)
    }

    pub fn with_kind(mut self, kind: ProviderErrorKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn is_already_exists(&self) -> bool {
        self.kind == ProviderErrorKind::TypeAlreadyExists
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.operation, self.message)
    }
}

impl std::error::Error for ProviderError {}

/// String errors are treated as retryable.
impl From<String> for ProviderError {
    fn from(s: String) -> Self {
        Self::retryable("unknown", s)
    }
}

impl From<&str> for ProviderError {
    fn from(s: &str) -> Self {
        s.to_string().into()
    }
}
