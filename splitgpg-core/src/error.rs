//! Protocol errors.
//!
//! All errors are terminal. There is no recovery.
//! When an error occurs, the connection to both the client and the agent
//! must be closed.

use thiserror::Error;

/// Wire code sent to the client when a command is filtered.
///
/// `GPG_ERR_SOURCE_GPGAGENT << 24 | GPG_ERR_FORBIDDEN`
pub const FILTERED_ERROR_CODE: u32 = (4 << 24) | 1024;

/// The single error line a client ever sees for rejected input.
pub const FILTERED_RESPONSE: &[u8] = b"ERR 67109888 Command filtered by split-gpg2.\n";

/// All possible protocol errors.
///
/// Each error variant causes immediate session termination.
/// No error is "recoverable" or "retryable".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Untrusted input violated an allow-list or grammar rule.
    ///
    /// The reason is a fixed string and never carries client bytes.
    #[error("command filtered: {0}")]
    Filtered(&'static str),

    /// The trusted agent sent something outside the expected grammar.
    #[error("agent protocol violation: {0}")]
    Agent(&'static str),

    /// An event arrived that is not valid in the current session state.
    #[error("unexpected event in current state")]
    UnexpectedEvent,

    /// Session has already terminated.
    #[error("session terminated")]
    SessionTerminated,
}

impl ProtocolError {
    /// Whether this error must be answered with [`FILTERED_RESPONSE`].
    pub fn is_filtered(&self) -> bool {
        matches!(self, Self::Filtered(_))
    }
}

/// S-expression layer errors.
///
/// These never reach the client as-is; one level up they become
/// [`ProtocolError::Filtered`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SexpError {
    /// Input is not a well-formed expression.
    #[error("malformed expression: {0}")]
    Malformed(&'static str),

    /// Expression is well-formed but has the wrong structure.
    #[error("invalid shape: {0}")]
    InvalidShape(&'static str),
}

impl From<SexpError> for ProtocolError {
    fn from(e: SexpError) -> Self {
        match e {
            SexpError::Malformed(reason) | SexpError::InvalidShape(reason) => {
                Self::Filtered(reason)
            }
        }
    }
}
