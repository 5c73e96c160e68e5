//! Bounded, newline-framed line I/O.
//!
//! # Framing Invariants
//!
//! - One `read_line()` = exactly one `\n`-terminated line, newline stripped
//! - A line longer than the limit fails before the rest is buffered
//! - EOF between lines is a clean end; EOF inside a line is an error
//! - Line buffers are zeroized on drop

use splitgpg_core::line::sanitize_for_log;
use splitgpg_core::ProtocolError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use zeroize::Zeroizing;

use crate::error::{ServerError, Side};

/// Limit for lines coming from gpg-agent.
pub const MAX_AGENT_LINE_LENGTH: usize = 64 * 1024;

/// A received line that zeroizes on drop.
pub type Line = Zeroizing<Vec<u8>>;

/// Boxed read half of a stream.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of a stream.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Reads bounded lines from one side of the relay.
pub struct LineReader {
    inner: BufReader<BoxReader>,
    side: Side,
    limit: usize,
    overflow: ProtocolError,
}

impl std::fmt::Debug for LineReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineReader")
            .field("side", &self.side)
            .field("limit", &self.limit)
            .finish()
    }
}

impl LineReader {
    /// Reader for untrusted client input. Overlong lines are filtered.
    pub fn client(reader: BoxReader) -> Self {
        Self {
            inner: BufReader::new(reader),
            side: Side::Client,
            limit: splitgpg_core::line::MAX_LINE_LENGTH,
            overflow: ProtocolError::Filtered("line too long"),
        }
    }

    /// Reader for agent output.
    pub fn agent(reader: BoxReader) -> Self {
        Self {
            inner: BufReader::new(reader),
            side: Side::Agent,
            limit: MAX_AGENT_LINE_LENGTH,
            overflow: ProtocolError::Agent("agent line too long"),
        }
    }

    /// Read one line without its newline. `None` on clean EOF.
    pub async fn read_line(&mut self) -> Result<Option<Line>, ServerError> {
        let mut line = Zeroizing::new(Vec::new());
        loop {
            let (used, done) = {
                let buf = self.inner.fill_buf().await?;
                if buf.is_empty() {
                    if line.is_empty() {
                        return Ok(None);
                    }
                    return Err(ServerError::Disconnected(self.side));
                }
                let (chunk, done) = match buf.iter().position(|&b| b == b'\n') {
                    Some(i) => (&buf[..i], true),
                    None => (buf, false),
                };
                // Bounds check: line length
                if line.len() + chunk.len() > self.limit {
                    return Err(self.overflow.into());
                }
                line.extend_from_slice(chunk);
                (chunk.len() + usize::from(done), done)
            };
            self.inner.consume(used);
            if done {
                tracing::debug!("{} >>> {}", self.side.log_prefix(), sanitize_for_log(&line));
                return Ok(Some(line));
            }
        }
    }
}

/// Writes whole lines to one side of the relay.
pub struct LineWriter {
    inner: BoxWriter,
    side: Side,
}

impl std::fmt::Debug for LineWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineWriter").field("side", &self.side).finish()
    }
}

impl LineWriter {
    /// Wrap a write half.
    pub fn new(writer: BoxWriter, side: Side) -> Self {
        Self { inner: writer, side }
    }

    /// Write `data` (newline included) and flush.
    pub async fn write_line(&mut self, data: &[u8]) -> Result<(), ServerError> {
        tracing::debug!(
            "{} <<< {}",
            self.side.log_prefix(),
            sanitize_for_log(data.strip_suffix(b"\n").unwrap_or(data))
        );
        self.inner.write_all(data).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Best-effort close.
    pub async fn shutdown(&mut self) {
        let _ = self.inner.shutdown().await;
    }
}

impl Side {
    fn log_prefix(self) -> &'static str {
        match self {
            Self::Client => "C",
            Self::Agent => "A",
        }
    }
}
