use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::Context;
use clap::Parser;
use splitgpg_server::{bootstrap, run_server, serve_stdio};
use splitgpg_transport::{config, Collaborators, SessionConfig};
use tokio::net::UnixListener;
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: u8 = 1;
const EXIT_CONFIG: u8 = 2;

/// Restricted gpg-agent access for an untrusted domain.
#[derive(Parser, Debug)]
#[command(name = "split-gpg2", version, about)]
struct Cli {
    /// Name of the client domain.
    #[arg(long, env = "QREXEC_REMOTE_DOMAIN")]
    domain: String,

    /// Serve clients on this unix socket instead of stdin/stdout.
    #[arg(long, value_name = "PATH")]
    listen: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match config::load(&cli.domain) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("split-gpg2: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    if let Err(e) = init_logging(loaded.config.debug_log.as_deref()) {
        eprintln!("split-gpg2: {e:#}");
        return ExitCode::from(EXIT_CONFIG);
    }
    for warning in &loaded.warnings {
        tracing::warn!("{warning}");
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!(error = %e, "cannot start runtime");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    match runtime.block_on(run(cli.listen, loaded.config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn run(listen: Option<PathBuf>, config: SessionConfig) -> anyhow::Result<()> {
    let collaborators = Collaborators::system(&config);
    let sockets = bootstrap::start_agent(&config.gnupghome)
        .await
        .context("starting gpg-agent")?;
    tracing::info!(domain = %config.domain, home = %config.gnupghome.display(), "serving");

    match listen {
        Some(path) => {
            let listener =
                UnixListener::bind(&path).with_context(|| format!("cannot listen on {}", path.display()))?;
            run_server(listener, config, sockets, collaborators).await;
            Ok(())
        }
        None => serve_stdio(config, &sockets, &collaborators)
            .await
            .context("session failed"),
    }
}

/// Logs go to stderr; stdout carries the protocol.
///
/// With a debug log configured everything down to DEBUG, including the
/// relayed lines, is appended to that file instead.
fn init_logging(debug_log: Option<&Path>) -> anyhow::Result<()> {
    match debug_log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open debug log {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::new("debug"))
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
