//! gpg-agent startup and socket discovery via `gpgconf`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use splitgpg_transport::{AgentSockets, ServerError};
use tokio::process::Command;

/// Launch the agent for `gnupghome` and return its sockets.
pub async fn start_agent(gnupghome: &Path) -> Result<AgentSockets, ServerError> {
    launch_agent(gnupghome).await?;
    let sockets = discover_sockets(gnupghome).await?;
    tracing::debug!(
        privileged = %sockets.privileged.display(),
        restricted = %sockets.restricted.display(),
        "agent sockets"
    );
    Ok(sockets)
}

/// `gpgconf --launch gpg-agent`.
pub async fn launch_agent(gnupghome: &Path) -> Result<(), ServerError> {
    let status = gpgconf(gnupghome)
        .args(["--launch", "gpg-agent"])
        .stdout(Stdio::null())
        .status()
        .await
        .map_err(|e| ServerError::AgentUnavailable(format!("cannot run gpgconf: {e}")))?;
    if !status.success() {
        return Err(ServerError::AgentUnavailable(format!(
            "gpgconf --launch gpg-agent exited with {status}"
        )));
    }
    Ok(())
}

/// `gpgconf --list-dirs`, parsed.
pub async fn discover_sockets(gnupghome: &Path) -> Result<AgentSockets, ServerError> {
    let output = gpgconf(gnupghome)
        .arg("--list-dirs")
        .stdout(Stdio::piped())
        .output()
        .await
        .map_err(|e| ServerError::AgentUnavailable(format!("cannot run gpgconf: {e}")))?;
    if !output.status.success() {
        return Err(ServerError::AgentUnavailable(format!(
            "gpgconf --list-dirs exited with {}",
            output.status
        )));
    }
    parse_list_dirs(&output.stdout)
}

fn gpgconf(gnupghome: &Path) -> Command {
    let mut cmd = Command::new("gpgconf");
    cmd.arg("--homedir").arg(gnupghome).stdin(Stdio::null()).stderr(Stdio::inherit());
    cmd
}

/// Pick the agent sockets out of `gpgconf --list-dirs` output.
///
/// Values are percent-escaped by gpgconf (`%3a` for `:`).
pub fn parse_list_dirs(output: &[u8]) -> Result<AgentSockets, ServerError> {
    let text = String::from_utf8_lossy(output);
    let mut privileged = None;
    let mut restricted = None;
    for line in text.lines() {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match name {
            "agent-socket" => privileged = Some(unescape_path(value)?),
            "agent-extra-socket" => restricted = Some(unescape_path(value)?),
            _ => {}
        }
    }
    match (privileged, restricted) {
        (Some(privileged), Some(restricted)) => Ok(AgentSockets {
            privileged,
            restricted,
        }),
        (None, _) => Err(ServerError::AgentUnavailable("gpgconf did not report agent-socket".into())),
        (_, None) => Err(ServerError::AgentUnavailable(
            "gpgconf did not report agent-extra-socket".into(),
        )),
    }
}

fn unescape_path(value: &str) -> Result<PathBuf, ServerError> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let byte = bytes
                .get(i + 1..i + 3)
                .and_then(|hex| std::str::from_utf8(hex).ok())
                .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                .ok_or_else(|| ServerError::AgentUnavailable(format!("bad escape in gpgconf output: {value}")))?;
            out.push(byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    let path = PathBuf::from(String::from_utf8_lossy(&out).into_owned());
    if !path.is_absolute() {
        return Err(ServerError::AgentUnavailable(format!(
            "agent socket is not an absolute path: {}",
            path.display()
        )));
    }
    Ok(path)
}
