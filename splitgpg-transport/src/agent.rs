//! Connection to gpg-agent.

use std::path::{Path, PathBuf};

use splitgpg_core::ProtocolError;
use tokio::net::UnixStream;

use crate::error::{ServerError, Side};
use crate::io::{BoxReader, BoxWriter, Line, LineReader, LineWriter};

/// Paths of the agent's listening sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSockets {
    /// Unrestricted socket (`agent-socket`).
    pub privileged: PathBuf,
    /// Restricted socket (`agent-extra-socket`).
    pub restricted: PathBuf,
}

impl AgentSockets {
    /// Socket the main connection of a session uses.
    pub fn main(&self, allow_keygen: bool) -> &Path {
        if allow_keygen {
            &self.privileged
        } else {
            &self.restricted
        }
    }
}

/// One Assuan connection to gpg-agent.
#[derive(Debug)]
pub struct AgentConnection {
    reader: LineReader,
    writer: LineWriter,
}

impl AgentConnection {
    /// Wrap an already connected stream.
    pub fn new(reader: BoxReader, writer: BoxWriter) -> Self {
        Self {
            reader: LineReader::agent(reader),
            writer: LineWriter::new(writer, Side::Agent),
        }
    }

    /// Connect to the agent socket at `path`.
    pub async fn connect(path: &Path) -> Result<Self, ServerError> {
        let stream = UnixStream::connect(path).await.map_err(|e| {
            ServerError::AgentUnavailable(format!("{}: {e}", path.display()))
        })?;
        let (reader, writer) = stream.into_split();
        Ok(Self::new(Box::new(reader), Box::new(writer)))
    }

    /// Wait for the agent's greeting and return it.
    pub async fn handshake(&mut self) -> Result<Line, ServerError> {
        let hello = self.recv_line().await?;
        if hello.as_slice() == b"OK" || hello.starts_with(b"OK ") {
            Ok(hello)
        } else {
            Err(ProtocolError::Agent("unexpected agent greeting").into())
        }
    }

    /// Send one newline-terminated line.
    pub async fn send(&mut self, line: &[u8]) -> Result<(), ServerError> {
        self.writer.write_line(line).await
    }

    /// Next non-comment line. EOF is an error: the agent never hangs up first.
    pub async fn recv_line(&mut self) -> Result<Line, ServerError> {
        loop {
            let line = self
                .reader
                .read_line()
                .await?
                .ok_or(ServerError::Disconnected(Side::Agent))?;
            if line.first() != Some(&b'#') {
                return Ok(line);
            }
        }
    }

    /// Next line including comments.
    pub async fn recv_raw_line(&mut self) -> Result<Line, ServerError> {
        self.reader
            .read_line()
            .await?
            .ok_or(ServerError::Disconnected(Side::Agent))
    }

    /// Best-effort close.
    pub async fn shutdown(&mut self) {
        self.writer.shutdown().await;
    }
}
