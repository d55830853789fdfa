use thiserror::Error;

/// How a caller should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The session is unusable (or the call can never succeed); close and reopen.
    Fatal,
    /// Repeating the operation may succeed; whether to do so is up to the caller.
    ///
    /// A reply read that timed out or lost its framing desynchronizes the
    /// session (see `ScopeClient::is_synchronized`), so the repeat has to go
    /// through a newly opened session.
    Retryable,
    /// Reported by the instrument; the triggering command was not failed.
    Advisory,
}

#[derive(Error, Debug)]
pub enum ScopeError {
    #[error("Connection to {endpoint} failed: {reason}")]
    ConnectionFailure { endpoint: String, reason: String },
    #[error("Timed out waiting for reply to '{command}'")]
    LinkTimeout { command: String },
    #[error("Link failure during '{command}': {source}")]
    LinkFailure {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed reply to '{command}': {reason}")]
    MalformedReply {
        command: String,
        reason: String,
        raw: Vec<u8>,
    },
    #[error("Unknown operation: {0}")]
    UnknownOperation(String),
    #[error("Instrument error {code}: {message}")]
    Instrument { code: i32, message: String },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl ScopeError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ScopeError::ConnectionFailure { .. }
            | ScopeError::LinkFailure { .. }
            | ScopeError::UnknownOperation(_)
            | ScopeError::InvalidArgument(_) => ErrorClass::Fatal,
            ScopeError::LinkTimeout { .. } | ScopeError::MalformedReply { .. } => {
                ErrorClass::Retryable
            }
            ScopeError::Instrument { .. } => ErrorClass::Advisory,
        }
    }

    /// Classify an I/O failure that happened while `command` was in flight.
    pub fn from_io(command: &str, source: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match source.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ScopeError::LinkTimeout {
                command: command.to_string(),
            },
            ErrorKind::InvalidData => ScopeError::MalformedReply {
                command: command.to_string(),
                reason: source.to_string(),
                raw: Vec::new(),
            },
            _ => ScopeError::LinkFailure {
                command: command.to_string(),
                source,
            },
        }
    }

    pub(crate) fn malformed(command: &str, reason: impl Into<String>, raw: &[u8]) -> Self {
        ScopeError::MalformedReply {
            command: command.to_string(),
            reason: reason.into(),
            raw: raw.to_vec(),
        }
    }
}
