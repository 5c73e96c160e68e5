//! Secret key listing and the per-session key cache.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use splitgpg_core::{KeyRing, Keygrip};
use tokio::process::Command;

use crate::error::ServerError;

/// Source of `gpg --list-secret-keys --with-colons` output.
#[async_trait]
pub trait KeyLister: Send + Sync {
    /// Return the raw colon listing.
    async fn list_secret_keys(&self) -> Result<Vec<u8>, ServerError>;
}

/// Runs gpg against a home directory.
#[derive(Debug, Clone)]
pub struct GpgKeyLister {
    homedir: PathBuf,
}

impl GpgKeyLister {
    /// Lister for `homedir`.
    pub fn new(homedir: impl Into<PathBuf>) -> Self {
        Self {
            homedir: homedir.into(),
        }
    }
}

#[async_trait]
impl KeyLister for GpgKeyLister {
    async fn list_secret_keys(&self) -> Result<Vec<u8>, ServerError> {
        let output = Command::new("gpg")
            .arg("--homedir")
            .arg(&self.homedir)
            .args(["--list-secret-keys", "--with-colons"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .await
            .map_err(|e| ServerError::KeyListing(format!("cannot run gpg: {e}")))?;
        if !output.status.success() {
            return Err(ServerError::KeyListing(format!("gpg exited with {}", output.status)));
        }
        Ok(output.stdout)
    }
}

/// Key metadata, rebuilt lazily on a lookup miss.
pub struct KeyCache {
    lister: Arc<dyn KeyLister>,
    ring: Option<KeyRing>,
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("loaded", &self.ring.is_some())
            .finish()
    }
}

impl KeyCache {
    /// Empty cache backed by `lister`.
    pub fn new(lister: Arc<dyn KeyLister>) -> Self {
        Self { lister, ring: None }
    }

    /// Replace the cache with a fresh listing.
    pub async fn refresh(&mut self) -> Result<(), ServerError> {
        let listing = self.lister.list_secret_keys().await?;
        let ring = KeyRing::parse(&listing)?;
        tracing::debug!(keys = ring.keys().len(), "key cache refreshed");
        self.ring = Some(ring);
        Ok(())
    }

    /// Describe `grip` for SETKEYDESC, refreshing once if it is unknown.
    pub async fn describe(&mut self, grip: &Keygrip, allow_keygen: bool) -> Result<Vec<u8>, ServerError> {
        let known = self.ring.as_ref().is_some_and(|ring| ring.contains(grip));
        if !known {
            self.refresh().await?;
        }
        match &self.ring {
            Some(ring) => Ok(ring.describe(grip, allow_keygen)?),
            None => Err(ServerError::KeyListing("no key listing".into())),
        }
    }
}
