//! Operator confirmation and desktop notifications.
//!
//! PKSIGN and PKDECRYPT pass through [`ConfirmationGate`]. An allowed
//! operation touches a per-(operation, domain) timestamp file next to the
//! agent socket; within the configured window the next request is allowed
//! without asking.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use splitgpg_core::{Operation, ProtocolError};
use tokio::process::Command;

use crate::config::{AutoAccept, SessionConfig};
use crate::error::ServerError;

/// How long the confirmation dialog stays up.
pub const PROMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Asks the operator a yes/no question.
#[async_trait]
pub trait Prompt: Send + Sync {
    /// `true` if the operator allowed it.
    async fn confirm(&self, title: &str, question: &str) -> Result<bool, ServerError>;
}

/// Shows a desktop notification. Failures are not reported.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Show `message`.
    async fn notify(&self, message: &str);
}

/// `zenity --question` dialog.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZenityPrompt;

#[async_trait]
impl Prompt for ZenityPrompt {
    async fn confirm(&self, title: &str, question: &str) -> Result<bool, ServerError> {
        let status = Command::new("zenity")
            .args(["--question", "--title", title, "--text", question, "--timeout"])
            .arg(PROMPT_TIMEOUT.as_secs().to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await?;
        Ok(status.success())
    }
}

/// `notify-send` notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifySend;

#[async_trait]
impl Notifier for NotifySend {
    async fn notify(&self, message: &str) {
        let result = Command::new("notify-send")
            .arg(format!("split-gpg2: {message}"))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            tracing::debug!(error = %e, "notify-send failed");
        }
    }
}

/// Decides whether a guarded operation may run.
pub struct ConfirmationGate {
    domain: String,
    socket: PathBuf,
    pksign: AutoAccept,
    pkdecrypt: AutoAccept,
    prompt: Arc<dyn Prompt>,
    notifier: Arc<dyn Notifier>,
}

impl std::fmt::Debug for ConfirmationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfirmationGate")
            .field("domain", &self.domain)
            .field("socket", &self.socket)
            .field("pksign", &self.pksign)
            .field("pkdecrypt", &self.pkdecrypt)
            .finish()
    }
}

impl ConfirmationGate {
    /// Gate for `config.domain`; timestamps live next to `socket`.
    pub fn new(
        config: &SessionConfig,
        socket: &Path,
        prompt: Arc<dyn Prompt>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            domain: config.domain.clone(),
            socket: socket.to_path_buf(),
            pksign: config.autoaccept(Operation::PkSign),
            pkdecrypt: config.autoaccept(Operation::PkDecrypt),
            prompt,
            notifier,
        }
    }

    /// Notification sink shared with the session.
    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Timestamp file for `op`.
    pub fn timestamp_path(&self, op: Operation) -> PathBuf {
        let mut path = self.socket.clone().into_os_string();
        path.push(format!("_split-gpg2-timestamp_{}_{}", op.name(), self.domain));
        PathBuf::from(path)
    }

    /// Allow `op` or fail with `Filtered`.
    pub async fn request(&self, op: Operation) -> Result<(), ServerError> {
        let policy = match op {
            Operation::PkSign => self.pksign,
            Operation::PkDecrypt => self.pkdecrypt,
        };
        let timestamp = self.timestamp_path(op);

        let window = match policy {
            AutoAccept::Always => {
                self.notify_auto(op).await;
                return Ok(());
            }
            AutoAccept::Within(window) => {
                if recently_allowed(&timestamp, window, SystemTime::now()) {
                    self.notify_auto(op).await;
                    return Ok(());
                }
                Some(window)
            }
            AutoAccept::Prompt => None,
        };

        let title = format!("split-gpg2: '{}' wants to execute {}", self.domain, op.name());
        let question = match window {
            Some(w) => format!("{title}\nDo you want to allow this for the next {}s?", w.as_secs()),
            None => format!("{title}\nDo you want to allow this?"),
        };
        if !self.prompt.confirm(&title, &question).await? {
            tracing::info!(domain = %self.domain, op = op.name(), "operation denied");
            return Err(ProtocolError::Filtered("operation denied").into());
        }

        self.notifier.notify(&format!("command {} allowed", op.name())).await;
        touch(&timestamp)?;
        Ok(())
    }

    async fn notify_auto(&self, op: Operation) {
        self.notifier
            .notify(&format!("command {} automatically allowed", op.name()))
            .await;
    }
}

fn recently_allowed(path: &Path, window: Duration, now: SystemTime) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .is_ok_and(|mtime| mtime.checked_add(window).is_some_and(|until| until > now))
}

fn touch(path: &Path) -> Result<(), ServerError> {
    use std::os::unix::fs::OpenOptionsExt;

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)?;
    file.set_modified(SystemTime::now())?;
    Ok(())
}
