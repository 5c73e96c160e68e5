//! split-gpg2 Server
//!
//! Process glue around `splitgpg-transport`: agent discovery and the two
//! serving modes.
//!
//! - [`serve_stdio`]: one session over inherited stdin/stdout, as run by
//!   the qrexec service.
//! - [`run_server`]: a unix socket listener, one session per connection.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

pub mod bootstrap;

use std::sync::Arc;

use splitgpg_transport::io::{BoxReader, BoxWriter};
use splitgpg_transport::{AgentConnection, AgentSockets, Collaborators, ProxySession, ServerError, SessionConfig};
use tokio::net::UnixListener;

/// Relay one client over `reader`/`writer` to the agent behind `sockets`.
pub async fn serve_connection(
    config: SessionConfig,
    sockets: &AgentSockets,
    collaborators: &Collaborators,
    reader: BoxReader,
    writer: BoxWriter,
) -> Result<(), ServerError> {
    let agent = AgentConnection::connect(sockets.main(config.allow_keygen)).await?;
    ProxySession::new(config, sockets, collaborators)
        .run(reader, writer, agent)
        .await
}

/// Serve a single client on stdin/stdout.
pub async fn serve_stdio(
    config: SessionConfig,
    sockets: &AgentSockets,
    collaborators: &Collaborators,
) -> Result<(), ServerError> {
    serve_connection(
        config,
        sockets,
        collaborators,
        Box::new(tokio::io::stdin()),
        Box::new(tokio::io::stdout()),
    )
    .await
}

/// Accept clients on `listener` until accepting fails.
///
/// Every connection gets its own session; a failing session does not
/// affect the others.
pub async fn run_server(
    listener: UnixListener,
    config: SessionConfig,
    sockets: AgentSockets,
    collaborators: Collaborators,
) {
    let sockets = Arc::new(sockets);
    loop {
        let stream = match listener.accept().await {
            Ok((stream, _)) => stream,
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
                break;
            }
        };
        let config = config.clone();
        let sockets = sockets.clone();
        let collaborators = collaborators.clone();
        tokio::spawn(async move {
            let domain = config.domain.clone();
            let (reader, writer) = stream.into_split();
            match serve_connection(config, &sockets, &collaborators, Box::new(reader), Box::new(writer)).await {
                Ok(()) => tracing::debug!(%domain, "connection closed"),
                Err(e) if e.is_filtered() => {}
                Err(e) => tracing::warn!(%domain, error = %e, "connection failed"),
            }
        });
    }
}
