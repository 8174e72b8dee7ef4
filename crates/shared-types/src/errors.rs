//! # Error Types
//!
//! Every failure that crosses a crate boundary is an [`MqError`]. Callers
//! branch on [`ErrorKind`] (or the stable `code`) instead of matching on the
//! message text.

use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Result alias used across the workspace.
pub type MqResult<T> = Result<T, MqError>;

type BoxedCause = Box<dyn StdError + Send + Sync + 'static>;

/// Classification of an [`MqError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Dial or session failure.
    Connection,
    /// Malformed input: empty topic list, bad topic name, empty batch,
    /// wrong broker type for an adapter.
    Validation,
    /// Deadline exceeded.
    Timeout,
    /// Credentials rejected.
    Auth,
    /// Referenced entity does not exist.
    NotFound,
    /// Catch-all for unexpected faults.
    Internal,
    /// Transport-level failure after a session was established.
    Network,
    /// Bad or unsupported configuration.
    Config,
    /// Subscribe or consume start-up failure.
    Subscription,
}

impl ErrorKind {
    /// Wire name of the kind, as shown in the rendered error.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "CONNECTION",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Auth => "AUTHENTICATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Internal => "INTERNAL",
            ErrorKind::Network => "NETWORK",
            ErrorKind::Config => "CONFIG",
            ErrorKind::Subscription => "SUBSCRIPTION",
        }
    }

    /// Stable code attached to errors of this kind.
    pub fn default_code(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "CONN_001",
            ErrorKind::Validation => "VAL_001",
            ErrorKind::Timeout => "TIMEOUT_001",
            ErrorKind::Auth => "AUTH_001",
            ErrorKind::NotFound => "NOT_FOUND_001",
            ErrorKind::Internal => "INT_001",
            ErrorKind::Network => "NET_001",
            ErrorKind::Config => "CFG_001",
            ErrorKind::Subscription => "SUB_001",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Code used by [`MqError::wrap`] for foreign errors.
pub const WRAP_CODE: &str = "WRAP_001";

/// Typed error carried through the messaging core.
///
/// Rendered as `[KIND:CODE] message` or `[KIND:CODE] message - details`.
#[derive(Debug, Error)]
#[error("[{kind}:{code}] {message}{}", render_details(.details))]
pub struct MqError {
    kind: ErrorKind,
    code: &'static str,
    message: String,
    details: Option<String>,
    #[source]
    cause: Option<BoxedCause>,
    peer_closed: bool,
}

fn render_details(details: &Option<String>) -> String {
    details
        .as_deref()
        .map(|d| format!(" - {}", d))
        .unwrap_or_default()
}

impl MqError {
    /// Create an error of the given kind with its default code.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: kind.default_code(),
            message: message.into(),
            details: None,
            cause: None,
            peer_closed: false,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn subscription(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Subscription, message)
    }

    /// Wrap a foreign error as an Internal error with code `WRAP_001`.
    pub fn wrap<E>(cause: E, message: impl Into<String>) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            code: WRAP_CODE,
            ..Self::new(ErrorKind::Internal, message)
        }
        .with_cause(cause)
    }

    /// Attach human-readable details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Attach the underlying cause, exposed through `source()`.
    #[must_use]
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        if self.details.is_none() {
            self.details = Some(cause.to_string());
        }
        self.cause = Some(Box::new(cause));
        self
    }

    /// Override the stable code.
    #[must_use]
    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = code;
        self
    }

    /// Mark this error as a broker-initiated clean close.
    #[must_use]
    pub fn peer_closed(mut self) -> Self {
        self.peer_closed = true;
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    pub fn is_kind(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }

    /// True when the broker closed the session on its own terms.
    pub fn is_peer_closed(&self) -> bool {
        self.peer_closed
    }
}

impl From<serde_json::Error> for MqError {
    fn from(err: serde_json::Error) -> Self {
        MqError::validation("invalid JSON").with_cause(err)
    }
}

impl From<std::io::Error> for MqError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let base = match err.kind() {
            Io::TimedOut => MqError::timeout("I/O timed out"),
            Io::ConnectionRefused | Io::NotConnected | Io::AddrNotAvailable => {
                MqError::connection("connection failed")
            }
            Io::ConnectionReset | Io::ConnectionAborted | Io::BrokenPipe | Io::UnexpectedEof => {
                MqError::network("connection lost")
            }
            _ => MqError::network("I/O error"),
        };
        base.with_cause(err)
    }
}
