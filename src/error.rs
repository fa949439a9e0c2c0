//! Error types for the dispatcher.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Responder error: {0}")]
    Responder(#[from] ResponderError),

    #[error("State error: {0}")]
    State(#[from] StateError),
}

impl Error {
    /// Failure kind for collaborator errors, `None` for local ones.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            Self::Source(e) => Some(e.kind()),
            Self::Responder(e) => Some(e.kind()),
            Self::Config(_) | Self::State(_) => None,
        }
    }
}

/// Configuration-related errors. Always fatal, raised before any state is touched.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingEnvVars(Vec<String>),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Invalid {intent} pattern '{pattern}': {source}")]
    InvalidPattern {
        intent: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Coarse classification of a collaborator failure.
///
/// The engine branches on this instead of inspecting error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Transport-level failure (DNS, TLS, connection reset, timeout).
    Network,
    /// The remote side asked us to slow down.
    RateLimited,
    /// Credentials were rejected; every further call will fail the same way.
    Auth,
    /// The target item no longer exists.
    NotFound,
    /// The remote side refused the request (locked thread, banned, bad input).
    Rejected,
    /// The remote side answered with something we could not interpret.
    InvalidResponse,
}

impl FailureKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimited => "rate_limited",
            Self::Auth => "auth",
            Self::NotFound => "not_found",
            Self::Rejected => "rejected",
            Self::InvalidResponse => "invalid_response",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Content source (data-source client) errors.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Source {source_name} request failed: {reason}")]
    Network { source_name: String, reason: String },

    #[error("Source {source_name} rate limited, retry after {retry_after:?}")]
    RateLimited {
        source_name: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication failed for source {source_name}: {reason}")]
    AuthFailed { source_name: String, reason: String },

    #[error("Item {id} not found on source {source_name}")]
    NotFound { source_name: String, id: String },

    #[error("Source {source_name} rejected the request: {reason}")]
    Rejected { source_name: String, reason: String },

    #[error("Invalid response from source {source_name}: {reason}")]
    InvalidResponse { source_name: String, reason: String },
}

impl SourceError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Network { .. } => FailureKind::Network,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::AuthFailed { .. } => FailureKind::Auth,
            Self::NotFound { .. } => FailureKind::NotFound,
            Self::Rejected { .. } => FailureKind::Rejected,
            Self::InvalidResponse { .. } => FailureKind::InvalidResponse,
        }
    }
}

/// Text-generation backend errors.
#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    #[error("Responder {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Responder {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication failed for responder {provider}")]
    AuthFailed { provider: String },

    #[error("Responder {provider} refused to generate: {reason}")]
    Blocked { provider: String, reason: String },

    #[error("Invalid response from responder {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl ResponderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::RequestFailed { .. } => FailureKind::Network,
            Self::RateLimited { .. } => FailureKind::RateLimited,
            Self::AuthFailed { .. } => FailureKind::Auth,
            Self::Blocked { .. } => FailureKind::Rejected,
            Self::InvalidResponse { .. } => FailureKind::InvalidResponse,
        }
    }
}

/// Persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Failed to open state store: {0}")]
    Open(String),

    #[error("Failed to read state: {0}")]
    Read(String),

    #[error("Failed to write state: {0}")]
    Write(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the dispatcher.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_vars_lists_all_names() {
        let err = ConfigError::MissingEnvVars(vec![
            "REDDIT_CLIENT_ID".into(),
            "GEMINI_API_KEY".into(),
        ]);
        assert_eq!(
            err.to_string(),
            "Missing required environment variables: REDDIT_CLIENT_ID, GEMINI_API_KEY"
        );
    }

    #[test]
    fn source_error_kinds() {
        let err = SourceError::RateLimited {
            source_name: "reddit".into(),
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.kind(), FailureKind::RateLimited);

        let err = SourceError::AuthFailed {
            source_name: "reddit".into(),
            reason: "401".into(),
        };
        assert_eq!(err.kind(), FailureKind::Auth);
    }

    #[test]
    fn responder_error_kinds() {
        let err = ResponderError::Blocked {
            provider: "gemini".into(),
            reason: "SAFETY".into(),
        };
        assert_eq!(err.kind(), FailureKind::Rejected);
        assert_eq!(err.kind().label(), "rejected");
    }

    #[test]
    fn top_level_failure_kind() {
        let err: Error = SourceError::NotFound {
            source_name: "reddit".into(),
            id: "t1_x".into(),
        }
        .into();
        assert_eq!(err.failure_kind(), Some(FailureKind::NotFound));

        let err: Error = StateError::Read("locked".into()).into();
        assert_eq!(err.failure_kind(), None);
    }

    #[test]
    fn top_level_wraps_state_error() {
        let err: Error = StateError::Write("disk full".into()).into();
        assert!(err.to_string().contains("disk full"));
    }
}
