//! split-gpg2 Protocol Core
//!
//! Fail-closed Assuan filter between an untrusted client and gpg-agent.
//!
//! This crate provides:
//! - Line primitives with strict bounds checking
//! - Canonical S-expression parser and serializer
//! - One validator per allow-listed command
//! - INQUIRE sub-protocol handling
//! - Secret key metadata for SETKEYDESC
//! - Relay state machine with hard failure semantics
//!
//! # Security Invariants
//!
//! - Any unknown or malformed client input terminates the session
//! - Inquire payloads are parsed and reserialized, never passed through
//! - Unexpected agent output terminates the session
//! - Direct use of `unsafe` is forbidden (#![forbid(unsafe_code)])
//! - No I/O in this crate; the transport drives it line by line

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod command;
pub mod error;
pub mod inquire;
pub mod keyinfo;
pub mod line;
pub mod sexp;
pub mod state;

pub use command::{CommandAction, CommandKind, Forward, Operation, Policy};
pub use error::{ProtocolError, SexpError, FILTERED_RESPONSE};
pub use inquire::{InquireKind, InquireReply};
pub use keyinfo::KeyRing;
pub use line::Keygrip;
pub use sexp::Sexp;
pub use state::{AgentAction, Session, SessionState};
