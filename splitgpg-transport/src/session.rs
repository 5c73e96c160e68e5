//! Per-connection relay loop.
//!
//! Drives a [`Session`] over the client stream and the agent connection.
//!
//! # Security Invariants
//!
//! - Only lines produced by splitgpg-core reach the agent
//! - One command in flight; the next client line is read only after the
//!   agent's OK/ERR
//! - Any error closes both streams; a filtered command first gets the
//!   filtered ERR line
//! - If the client goes away mid-response, remaining agent output is
//!   drained and discarded

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use splitgpg_core::command::{check_key_description_reply, key_description_command};
use splitgpg_core::line::sanitize_for_log;
use splitgpg_core::{AgentAction, CommandAction, Forward, InquireReply, Session, SessionState, FILTERED_RESPONSE};
use zeroize::Zeroizing;

use crate::agent::{AgentConnection, AgentSockets};
use crate::config::SessionConfig;
use crate::error::{ServerError, Side};
use crate::io::{BoxReader, BoxWriter, LineReader, LineWriter};
use crate::keys::{GpgKeyLister, KeyCache, KeyLister};
use crate::prompt::{ConfirmationGate, Notifier, NotifySend, Prompt, ZenityPrompt};

/// External programs a session talks to besides the agent.
#[derive(Clone)]
pub struct Collaborators {
    /// Secret key listing.
    pub keys: Arc<dyn KeyLister>,
    /// Operator confirmation.
    pub prompt: Arc<dyn Prompt>,
    /// Desktop notifications.
    pub notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}

impl Collaborators {
    /// gpg, zenity and notify-send.
    pub fn system(config: &SessionConfig) -> Self {
        Self {
            keys: Arc::new(GpgKeyLister::new(&config.gnupghome)),
            prompt: Arc::new(ZenityPrompt),
            notifier: Arc::new(NotifySend),
        }
    }
}

struct Peer {
    reader: LineReader,
    writer: LineWriter,
    open: bool,
}

impl Peer {
    async fn read_line(&mut self) -> Result<Option<Zeroizing<Vec<u8>>>, ServerError> {
        self.reader.read_line().await
    }

    /// Write to the client unless it is gone. A failed write marks it gone.
    async fn send(&mut self, data: &[u8]) {
        if !self.open {
            return;
        }
        if let Err(e) = self.writer.write_line(data).await {
            tracing::debug!(error = %e, "client write failed; discarding agent output");
            self.open = false;
        }
    }
}

fn terminated(line: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut out = Zeroizing::new(Vec::with_capacity(line.len() + 1));
    out.extend_from_slice(line);
    out.push(b'\n');
    out
}

/// One client connection.
pub struct ProxySession {
    config: SessionConfig,
    privileged: Option<PathBuf>,
    keys: KeyCache,
    gate: ConfirmationGate,
    session: Session,
}

impl std::fmt::Debug for ProxySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySession")
            .field("domain", &self.config.domain)
            .field("state", &self.session.state())
            .finish()
    }
}

impl ProxySession {
    /// Session for `config`, talking to the agent behind `sockets`.
    pub fn new(config: SessionConfig, sockets: &AgentSockets, collaborators: &Collaborators) -> Self {
        // A restricted main connection needs the privileged socket for listings.
        let privileged = (!config.allow_keygen).then(|| sockets.privileged.clone());
        let gate = ConfirmationGate::new(
            &config,
            sockets.main(config.allow_keygen),
            collaborators.prompt.clone(),
            collaborators.notifier.clone(),
        );
        Self {
            session: Session::new(config.policy()),
            keys: KeyCache::new(collaborators.keys.clone()),
            privileged,
            gate,
            config,
        }
    }

    /// Relay until the client leaves, says BYE, or something fails.
    ///
    /// Both streams are closed on return.
    pub async fn run(
        mut self,
        client_reader: BoxReader,
        client_writer: BoxWriter,
        mut agent: AgentConnection,
    ) -> Result<(), ServerError> {
        let mut peer = Peer {
            reader: LineReader::client(client_reader),
            writer: LineWriter::new(client_writer, Side::Client),
            open: true,
        };

        let result = self.relay(&mut peer, &mut agent).await;
        if let Err(e) = &result {
            self.session.terminate();
            if e.is_filtered() {
                tracing::warn!(domain = %self.config.domain, reason = %e, "command filtered out");
                peer.send(FILTERED_RESPONSE).await;
                self.gate.notifier().notify("command filtered out").await;
            }
        }

        peer.writer.shutdown().await;
        agent.shutdown().await;
        result
    }

    async fn relay(&mut self, peer: &mut Peer, agent: &mut AgentConnection) -> Result<(), ServerError> {
        if self.config.verbose_notifications {
            self.gate.notifier().notify("connected").await;
        }
        let hello = agent.handshake().await?;
        self.session.on_connected()?;
        peer.send(&terminated(&hello)).await;

        loop {
            let Some(line) = peer.read_line().await? else {
                tracing::info!(domain = %self.config.domain, "client closed connection");
                return Ok(());
            };

            let action = match self.session.on_command(&line, Utc::now()) {
                Ok(action) => action,
                Err(e) => {
                    if e.is_filtered() {
                        tracing::warn!(line = %sanitize_for_log(&line), "rejected client command");
                    }
                    return Err(e.into());
                }
            };

            match action {
                CommandAction::Respond(reply) => peer.send(reply).await,
                CommandAction::Forward(forward) => {
                    let closes = forward.closes;
                    self.forward(peer, agent, forward).await?;
                    if closes || self.session.state() == SessionState::Terminated {
                        tracing::info!(domain = %self.config.domain, "client sent BYE");
                        return Ok(());
                    }
                }
            }
            if !peer.open {
                return Err(ServerError::Disconnected(Side::Client));
            }
        }
    }

    async fn forward(
        &mut self,
        peer: &mut Peer,
        agent: &mut AgentConnection,
        forward: Forward,
    ) -> Result<(), ServerError> {
        if let Some(op) = forward.confirm {
            self.gate.request(op).await?;
        }

        // Unknown keys are refused before the agent sees the keygrip.
        let description = match &forward.describe {
            Some(grip) => Some(self.keys.describe(grip, self.config.allow_keygen).await?),
            None => None,
        };

        if let (true, Some(path)) = (forward.needs_privileged, &self.privileged) {
            let mut listing = AgentConnection::connect(path).await?;
            listing.handshake().await?;
            listing.send(&forward.line).await?;
            let result = relay_response(&mut self.session, peer, &mut listing).await;
            listing.shutdown().await;
            return result;
        }

        agent.send(&forward.line).await?;
        relay_response(&mut self.session, peer, agent).await?;

        if let Some(description) = description {
            agent.send(&key_description_command(&description)).await?;
            let reply = agent.recv_line().await?;
            check_key_description_reply(&reply)?;
        }
        Ok(())
    }
}

/// Relay one command's response, including INQUIRE exchanges.
async fn relay_response(
    session: &mut Session,
    peer: &mut Peer,
    agent: &mut AgentConnection,
) -> Result<(), ServerError> {
    loop {
        let line = agent.recv_raw_line().await?;
        match session.on_agent_line(&line)? {
            AgentAction::Skip => {}
            AgentAction::Relay => peer.send(&terminated(&line)).await,
            AgentAction::Complete => {
                peer.send(&terminated(&line)).await;
                return Ok(());
            }
            AgentAction::Inquire(client_line) => {
                peer.send(&client_line).await;
                loop {
                    let reply = peer
                        .read_line()
                        .await?
                        .ok_or(ServerError::Disconnected(Side::Client))?;
                    let answer = match session.on_inquire_reply(&reply) {
                        Ok(answer) => answer,
                        Err(e) => {
                            if e.is_filtered() {
                                tracing::warn!(line = %sanitize_for_log(&reply), "rejected inquire reply");
                            }
                            return Err(e.into());
                        }
                    };
                    match answer {
                        InquireReply::Data(data) => agent.send(&data).await?,
                        InquireReply::End => {
                            agent.send(b"END\n").await?;
                            break;
                        }
                    }
                }
            }
        }
    }
}
