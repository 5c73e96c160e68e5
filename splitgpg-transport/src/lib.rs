//! split-gpg2 Transport
//!
//! Async driver for `splitgpg-core`: relays one untrusted client
//! connection to gpg-agent.
//!
//! This crate wraps the core state machine with:
//! - Bounded line I/O over any `AsyncRead`/`AsyncWrite` pair
//! - Agent connections over unix sockets
//! - Per-client TOML configuration
//! - Key listing, confirmation prompts and notifications as trait seams
//!
//! # Security Invariants & Hard Failures
//!
//! - **One Strike**: a filtered command is answered with the filtered ERR
//!   line and the connection is closed. Nothing is retried.
//! - **Fixed Limits**: client lines are capped at 1002 bytes before they
//!   are buffered in full.
//! - **Reconstruction**: the agent only ever receives lines rebuilt by
//!   the core validators.
//! - **Zeroization**: relayed lines are held in zeroizing buffers.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod agent;
pub mod config;
pub mod error;
pub mod io;
pub mod keys;
pub mod prompt;
pub mod session;

pub use agent::{AgentConnection, AgentSockets};
pub use config::{AutoAccept, LoadedConfig, SessionConfig};
pub use error::{ServerError, Side};
pub use keys::{GpgKeyLister, KeyCache, KeyLister};
pub use prompt::{ConfirmationGate, Notifier, NotifySend, Prompt, ZenityPrompt};
pub use session::{Collaborators, ProxySession};
