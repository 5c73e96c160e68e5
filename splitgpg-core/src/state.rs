//! Per-connection relay state machine.
//!
//! States: CONNECTING → AWAITING_COMMAND ⇄ AWAITING_AGENT ⇄ AWAITING_INQUIRE_REPLY
//!
//! Any error transitions immediately to TERMINATED.
//! No retries. No recovery.
//!
//! The machine does no I/O. The driver feeds it client and agent lines
//! (without their newline) and performs the returned action.

use chrono::{DateTime, Utc};

use crate::command::{self, CommandAction, CommandKind, Policy};
use crate::error::ProtocolError;
use crate::inquire::{InquireExchange, InquireReply};
use crate::line::{split_command, MAX_LINE_LENGTH};

/// Session state enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the agent's greeting.
    Connecting,
    /// Reading the next client command.
    AwaitingCommand,
    /// A command was forwarded; relaying the agent's response.
    AwaitingAgent,
    /// The client must answer an INQUIRE.
    AwaitingInquireReply,
    /// Session terminated. Final state.
    Terminated,
}

/// What to do with one agent line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentAction {
    /// Comment; drop it.
    Skip,
    /// Pass the line to the client and keep reading the agent.
    Relay,
    /// Pass the line to the client; the command is finished.
    Complete,
    /// Send this line to the client and read its inquire reply.
    Inquire(Vec<u8>),
}

/// A protocol session.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    policy: Policy,
    command: Option<CommandKind>,
    inquire: Option<InquireExchange>,
}

impl Session {
    /// Create a new session for a client with `policy`.
    pub fn new(policy: Policy) -> Self {
        Self {
            state: SessionState::Connecting,
            policy,
            command: None,
            inquire: None,
        }
    }

    /// Get current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Client permissions.
    pub fn policy(&self) -> Policy {
        self.policy
    }

    /// Command whose response is being relayed.
    pub fn in_flight(&self) -> Option<CommandKind> {
        self.command
    }

    /// The agent greeted us.
    ///
    /// Transitions: Connecting → AwaitingCommand
    pub fn on_connected(&mut self) -> Result<(), ProtocolError> {
        self.expect(SessionState::Connecting)?;
        self.state = SessionState::AwaitingCommand;
        Ok(())
    }

    /// Validate one client command.
    ///
    /// Transitions: AwaitingCommand → AwaitingAgent when forwarded.
    pub fn on_command(&mut self, line: &[u8], now: DateTime<Utc>) -> Result<CommandAction, ProtocolError> {
        self.expect(SessionState::AwaitingCommand)?;
        self.check_length(line)?;

        let action = command::validate(line, self.policy, now).map_err(|e| self.fail(e))?;
        if let CommandAction::Forward(forward) = &action {
            self.command = Some(forward.kind);
            self.state = SessionState::AwaitingAgent;
        }
        Ok(action)
    }

    /// Classify one agent line while a command is in flight.
    ///
    /// Transitions: AwaitingAgent → AwaitingCommand on OK/ERR (Terminated
    /// after BYE), AwaitingAgent → AwaitingInquireReply on INQUIRE.
    pub fn on_agent_line(&mut self, line: &[u8]) -> Result<AgentAction, ProtocolError> {
        self.expect(SessionState::AwaitingAgent)?;

        if line.first() == Some(&b'#') {
            return Ok(AgentAction::Skip);
        }

        let (name, args) = split_command(line, b' ');
        match name {
            b"D" | b"S" => Ok(AgentAction::Relay),
            b"OK" | b"ERR" => {
                self.state = match self.command.take() {
                    Some(CommandKind::Bye) => SessionState::Terminated,
                    _ => SessionState::AwaitingCommand,
                };
                Ok(AgentAction::Complete)
            }
            b"INQUIRE" => {
                let command = self.command.ok_or(ProtocolError::UnexpectedEvent);
                let (exchange, client_line) = command
                    .and_then(|c| InquireExchange::start(c, args))
                    .map_err(|e| self.fail(e))?;
                self.inquire = Some(exchange);
                self.state = SessionState::AwaitingInquireReply;
                Ok(AgentAction::Inquire(client_line))
            }
            _ => Err(self.fail(ProtocolError::Agent("unexpected agent response"))),
        }
    }

    /// Validate one client line answering an INQUIRE.
    ///
    /// Transitions: AwaitingInquireReply → AwaitingAgent on END.
    pub fn on_inquire_reply(&mut self, line: &[u8]) -> Result<InquireReply, ProtocolError> {
        self.expect(SessionState::AwaitingInquireReply)?;
        self.check_length(line)?;

        let reply = match self.inquire.as_mut() {
            Some(exchange) => exchange.on_client_line(line),
            None => Err(ProtocolError::UnexpectedEvent),
        }
        .map_err(|e| self.fail(e))?;

        if reply == InquireReply::End {
            self.inquire = None;
            self.state = SessionState::AwaitingAgent;
        }
        Ok(reply)
    }

    /// Terminate the session immediately.
    pub fn terminate(&mut self) {
        self.command = None;
        self.inquire = None;
        self.state = SessionState::Terminated;
    }

    fn expect(&mut self, state: SessionState) -> Result<(), ProtocolError> {
        match self.state {
            SessionState::Terminated => Err(ProtocolError::SessionTerminated),
            s if s == state => Ok(()),
            _ => Err(self.fail(ProtocolError::UnexpectedEvent)),
        }
    }

    fn check_length(&mut self, line: &[u8]) -> Result<(), ProtocolError> {
        // Bounds check: line length
        if line.len() > MAX_LINE_LENGTH {
            return Err(self.fail(ProtocolError::Filtered("line too long")));
        }
        Ok(())
    }

    fn fail(&mut self, error: ProtocolError) -> ProtocolError {
        self.terminate();
        error
    }
}
