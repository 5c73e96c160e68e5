//! Transport errors.

use std::fmt;

use splitgpg_core::ProtocolError;
use thiserror::Error;

/// Which end of the relay a stream belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The untrusted client.
    Client,
    /// gpg-agent.
    Agent,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::Agent => f.write_str("agent"),
        }
    }
}

/// Errors that end a relay session or prevent it from starting.
///
/// Every error is terminal for the session it occurs in.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Protocol-level error from splitgpg-core.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Stream I/O failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A stream ended in the middle of a line or an exchange.
    #[error("{0} disconnected unexpectedly")]
    Disconnected(Side),

    /// Configuration is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Secret key listing could not be obtained.
    #[error("key listing failed: {0}")]
    KeyListing(String),

    /// gpg-agent could not be started or located.
    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),
}

impl ServerError {
    /// Whether this error must be answered with the filtered ERR line.
    pub fn is_filtered(&self) -> bool {
        matches!(self, Self::Protocol(e) if e.is_filtered())
    }
}
