//! Per-client configuration.
//!
//! Sources, later wins per key:
//! ```text
//! /etc/qubes-split-gpg2/qubes-split-gpg2.toml
//! $XDG_CONFIG_HOME/qubes-split-gpg2/conf.d/*.toml   (lexical order)
//! $XDG_CONFIG_HOME/qubes-split-gpg2/qubes-split-gpg2.toml
//! ```
//!
//! Each file has a `[default]` table and `[client.<domain>]` tables. The
//! client table of the connecting domain overrides the default table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use splitgpg_core::{Operation, Policy};
use toml::{Table, Value};

use crate::error::ServerError;

/// System-wide configuration file.
pub const SYSTEM_CONFIG_FILE: &str = "/etc/qubes-split-gpg2/qubes-split-gpg2.toml";

const CONFIG_DIR_NAME: &str = "qubes-split-gpg2";
const CONFIG_FILE_NAME: &str = "qubes-split-gpg2.toml";

/// PKDECRYPT auto-accept window when nothing is configured.
pub const DEFAULT_PKDECRYPT_WINDOW: Duration = Duration::from_secs(300);

/// Longest configurable auto-accept window: one year.
pub const MAX_AUTOACCEPT_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

const KNOWN_OPTIONS: &[&str] = &[
    "autoaccept",
    "pksign_autoaccept",
    "pkdecrypt_autoaccept",
    "verbose_notifications",
    "allow_keygen",
    "gnupghome",
    "isolated_gnupghome_dirs",
    "debug_log",
];

/// When a guarded operation may proceed without asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoAccept {
    /// Always ask.
    Prompt,
    /// Never ask.
    Always,
    /// Skip asking if the operation was allowed within this window.
    Within(Duration),
}

/// Resolved settings for one client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Client domain name, as supplied by the transport.
    pub domain: String,
    /// GnuPG home directory of the agent serving this client.
    pub gnupghome: PathBuf,
    /// Permit GENKEY/READKEY and the unrestricted agent socket.
    pub allow_keygen: bool,
    /// Show a notification when a client connects.
    pub verbose_notifications: bool,
    /// PKSIGN confirmation policy.
    pub pksign: AutoAccept,
    /// PKDECRYPT confirmation policy.
    pub pkdecrypt: AutoAccept,
    /// Log every relayed line to this file.
    pub debug_log: Option<PathBuf>,
}

impl SessionConfig {
    /// Create a configuration with built-in defaults.
    pub fn new(domain: impl Into<String>, gnupghome: impl Into<PathBuf>) -> Self {
        Self {
            domain: domain.into(),
            gnupghome: gnupghome.into(),
            allow_keygen: false,
            verbose_notifications: false,
            pksign: AutoAccept::Prompt,
            pkdecrypt: AutoAccept::Within(DEFAULT_PKDECRYPT_WINDOW),
            debug_log: None,
        }
    }

    /// Permit key generation.
    pub fn with_allow_keygen(mut self) -> Self {
        self.allow_keygen = true;
        self
    }

    /// Set the confirmation policy for `op`.
    pub fn with_autoaccept(mut self, op: Operation, policy: AutoAccept) -> Self {
        match op {
            Operation::PkSign => self.pksign = policy,
            Operation::PkDecrypt => self.pkdecrypt = policy,
        }
        self
    }

    /// Confirmation policy for `op`.
    pub fn autoaccept(&self, op: Operation) -> AutoAccept {
        match op {
            Operation::PkSign => self.pksign,
            Operation::PkDecrypt => self.pkdecrypt,
        }
    }

    /// Command filter policy for this client.
    pub fn policy(&self) -> Policy {
        Policy {
            allow_keygen: self.allow_keygen,
        }
    }
}

/// A configuration plus the non-fatal issues found while loading it.
#[derive(Debug)]
pub struct LoadedConfig {
    /// The resolved configuration.
    pub config: SessionConfig,
    /// Unknown options and similar; for logging.
    pub warnings: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    default: Table,
    #[serde(default)]
    client: HashMap<String, Table>,
}

fn config_error(message: impl Into<String>) -> ServerError {
    ServerError::Config(message.into())
}

/// Configuration files in load order. Missing files are fine.
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG_FILE)];
    if let Some(base) = dirs::config_dir() {
        let dir = base.join(CONFIG_DIR_NAME);
        if let Ok(entries) = std::fs::read_dir(dir.join("conf.d")) {
            let mut dropins: Vec<PathBuf> = entries
                .filter_map(Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
                .collect();
            dropins.sort();
            paths.extend(dropins);
        }
        paths.push(dir.join(CONFIG_FILE_NAME));
    }
    paths
}

/// Load the configuration for `domain` from the standard locations.
pub fn load(domain: &str) -> Result<LoadedConfig, ServerError> {
    load_from(&config_paths(), domain)
}

/// Load the configuration for `domain` from `paths`, in order.
pub fn load_from(paths: &[PathBuf], domain: &str) -> Result<LoadedConfig, ServerError> {
    validate_domain(domain)?;

    let mut default = Table::new();
    let mut client = Table::new();
    for path in paths {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(config_error(format!("{}: {e}", path.display()))),
        };
        let mut file: ConfigFile =
            toml::from_str(&text).map_err(|e| config_error(format!("{}: {e}", path.display())))?;
        default.extend(file.default);
        if let Some(table) = file.client.remove(domain) {
            client.extend(table);
        }
    }

    let mut merged = default;
    merged.extend(client);
    from_table(&merged, domain)
}

/// Resolve a merged option table.
pub fn from_table(table: &Table, domain: &str) -> Result<LoadedConfig, ServerError> {
    let warnings = table
        .keys()
        .filter(|k| !KNOWN_OPTIONS.contains(&k.as_str()))
        .map(|k| format!("unsupported config option: {k}"))
        .collect();

    let autoaccept = match table.get("autoaccept") {
        Some(v) => parse_autoaccept("autoaccept", v)?,
        None => AutoAccept::Prompt,
    };
    let pksign = match table.get("pksign_autoaccept") {
        Some(v) => parse_autoaccept("pksign_autoaccept", v)?,
        None => autoaccept,
    };
    let pkdecrypt = match table.get("pkdecrypt_autoaccept") {
        Some(v) => parse_autoaccept("pkdecrypt_autoaccept", v)?,
        None => autoaccept,
    };

    let gnupghome = match (table.get("gnupghome"), table.get("isolated_gnupghome_dirs")) {
        (Some(home), _) => parse_path("gnupghome", home)?,
        (None, Some(dirs)) => parse_path("isolated_gnupghome_dirs", dirs)?.join(domain),
        (None, None) => dirs::config_dir()
            .map(|d| d.join(CONFIG_DIR_NAME).join("gnupg"))
            .ok_or_else(|| config_error("cannot determine default gnupghome"))?,
    };

    let debug_log = table
        .get("debug_log")
        .map(|v| parse_path("debug_log", v))
        .transpose()?;

    let config = SessionConfig {
        domain: domain.to_string(),
        gnupghome,
        allow_keygen: parse_bool_option(table, "allow_keygen")?,
        verbose_notifications: parse_bool_option(table, "verbose_notifications")?,
        pksign,
        pkdecrypt,
        debug_log,
    };
    Ok(LoadedConfig { config, warnings })
}

/// Client domain names end up in file names.
fn validate_domain(domain: &str) -> Result<(), ServerError> {
    let valid = !domain.is_empty()
        && !domain.starts_with(['-', '.'])
        && domain
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    if valid {
        Ok(())
    } else {
        Err(config_error(format!("invalid client domain name: {domain:?}")))
    }
}

fn parse_autoaccept(key: &str, value: &Value) -> Result<AutoAccept, ServerError> {
    let invalid = || {
        config_error(format!(
            "{key}: expected \"yes\", \"no\" or a number of seconds between 1 and {}",
            MAX_AUTOACCEPT_WINDOW.as_secs()
        ))
    };
    let seconds = |n: u64| {
        if n == 0 || n > MAX_AUTOACCEPT_WINDOW.as_secs() {
            Err(invalid())
        } else {
            Ok(AutoAccept::Within(Duration::from_secs(n)))
        }
    };
    match value {
        Value::Boolean(true) => Ok(AutoAccept::Always),
        Value::Boolean(false) => Ok(AutoAccept::Prompt),
        Value::Integer(n) => seconds(u64::try_from(*n).map_err(|_| invalid())?),
        Value::String(s) => match s.as_str() {
            "yes" => Ok(AutoAccept::Always),
            "no" => Ok(AutoAccept::Prompt),
            digits if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) => {
                seconds(digits.parse().map_err(|_| invalid())?)
            }
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}

fn parse_bool_option(table: &Table, key: &str) -> Result<bool, ServerError> {
    match table.get(key) {
        None => Ok(false),
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::String(s)) => match s.as_str() {
            "yes" | "true" => Ok(true),
            "no" | "false" => Ok(false),
            _ => Err(config_error(format!("{key}: expected a boolean"))),
        },
        Some(_) => Err(config_error(format!("{key}: expected a boolean"))),
    }
}

fn parse_path(key: &str, value: &Value) -> Result<PathBuf, ServerError> {
    let raw = value
        .as_str()
        .ok_or_else(|| config_error(format!("{key}: expected a path")))?;
    let path = expand_home(raw)?;
    if !path.is_absolute() {
        return Err(config_error(format!("{key}: path must be absolute")));
    }
    Ok(path)
}

fn expand_home(raw: &str) -> Result<PathBuf, ServerError> {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .ok_or_else(|| config_error("cannot determine home directory")),
        None if raw == "~" => dirs::home_dir().ok_or_else(|| config_error("cannot determine home directory")),
        None => Ok(Path::new(raw).to_path_buf()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn table(text: &str) -> Table {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let config = SessionConfig::new("work", "/home/user/.gnupg");
        assert_eq!(config.autoaccept(Operation::PkSign), AutoAccept::Prompt);
        assert_eq!(
            config.autoaccept(Operation::PkDecrypt),
            AutoAccept::Within(DEFAULT_PKDECRYPT_WINDOW)
        );
        assert!(!config.policy().allow_keygen);

        let config = config
            .with_allow_keygen()
            .with_autoaccept(Operation::PkSign, AutoAccept::Always);
        assert!(config.policy().allow_keygen);
        assert_eq!(config.autoaccept(Operation::PkSign), AutoAccept::Always);
    }

    #[test]
    fn test_autoaccept_values() {
        let loaded = from_table(
            &table("gnupghome = '/g'\nautoaccept = 'yes'\npkdecrypt_autoaccept = 120"),
            "work",
        )
        .unwrap();
        assert_eq!(loaded.config.pksign, AutoAccept::Always);
        assert_eq!(loaded.config.pkdecrypt, AutoAccept::Within(Duration::from_secs(120)));

        let loaded = from_table(&table("gnupghome = '/g'\npksign_autoaccept = '60'"), "work").unwrap();
        assert_eq!(loaded.config.pksign, AutoAccept::Within(Duration::from_secs(60)));
        assert_eq!(loaded.config.pkdecrypt, AutoAccept::Prompt);

        let loaded = from_table(&table("gnupghome = '/g'\nautoaccept = false"), "work").unwrap();
        assert_eq!(loaded.config.pksign, AutoAccept::Prompt);

        let loaded = from_table(&table("gnupghome = '/g'\npkdecrypt_autoaccept = 31536000"), "work").unwrap();
        assert_eq!(loaded.config.pkdecrypt, AutoAccept::Within(MAX_AUTOACCEPT_WINDOW));

        for bad in [
            "autoaccept = 0",
            "autoaccept = -5",
            "autoaccept = 'maybe'",
            "autoaccept = '0'",
            "pkdecrypt_autoaccept = 31536001",
            "pkdecrypt_autoaccept = 9223372036854775807",
            "pksign_autoaccept = '99999999999999999999999'",
        ] {
            let text = format!("gnupghome = '/g'\n{bad}");
            assert!(from_table(&table(&text), "work").is_err(), "{bad}");
        }
    }

    #[test]
    fn test_booleans_and_warnings() {
        let loaded = from_table(
            &table("gnupghome = '/g'\nallow_keygen = 'yes'\nverbose_notifications = true\nfrobnicate = 1"),
            "work",
        )
        .unwrap();
        assert!(loaded.config.allow_keygen);
        assert!(loaded.config.verbose_notifications);
        assert_eq!(loaded.warnings, vec!["unsupported config option: frobnicate".to_string()]);

        assert!(from_table(&table("gnupghome = '/g'\nallow_keygen = 'sure'"), "work").is_err());
    }

    #[test]
    fn test_gnupghome_resolution() {
        let loaded = from_table(&table("isolated_gnupghome_dirs = '/srv/homes'"), "work").unwrap();
        assert_eq!(loaded.config.gnupghome, PathBuf::from("/srv/homes/work"));

        let loaded = from_table(
            &table("gnupghome = '/g'\nisolated_gnupghome_dirs = '/srv/homes'"),
            "work",
        )
        .unwrap();
        assert_eq!(loaded.config.gnupghome, PathBuf::from("/g"));

        assert!(from_table(&table("gnupghome = 'relative/dir'"), "work").is_err());
        assert!(from_table(&table("gnupghome = 7"), "work").is_err());
    }

    #[test]
    fn test_load_from_merges_files() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("first.toml");
        let second = dir.path().join("second.toml");
        let missing = dir.path().join("missing.toml");
        fs::write(
            &first,
            "[default]\ngnupghome = '/first'\nautoaccept = 'yes'\n\n[client.work]\nallow_keygen = true\n",
        )
        .unwrap();
        fs::write(
            &second,
            "[default]\nautoaccept = 'no'\n\n[client.work]\npksign_autoaccept = 30\n\n[client.other]\ngnupghome = '/other'\n",
        )
        .unwrap();

        let loaded = load_from(&[first.clone(), missing, second.clone()], "work").unwrap();
        assert_eq!(loaded.config.gnupghome, PathBuf::from("/first"));
        assert!(loaded.config.allow_keygen);
        assert_eq!(loaded.config.pksign, AutoAccept::Within(Duration::from_secs(30)));
        assert_eq!(loaded.config.pkdecrypt, AutoAccept::Prompt);

        let loaded = load_from(&[first, second], "other").unwrap();
        assert_eq!(loaded.config.gnupghome, PathBuf::from("/other"));
        assert!(!loaded.config.allow_keygen);
    }

    #[test]
    fn test_client_overrides_later_default() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.toml");
        let second = dir.path().join("b.toml");
        fs::write(&first, "[client.work]\nautoaccept = 'yes'\n").unwrap();
        fs::write(&second, "[default]\ngnupghome = '/g'\nautoaccept = 'no'\n").unwrap();

        let loaded = load_from(&[first, second], "work").unwrap();
        assert_eq!(loaded.config.pksign, AutoAccept::Always);
    }

    #[test]
    fn test_invalid_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("broken.toml");
        fs::write(&broken, "[default\n").unwrap();
        assert!(load_from(&[broken], "work").is_err());

        assert!(load_from(&[], "").is_err());
        assert!(load_from(&[], "../etc").is_err());
        assert!(load_from(&[], "-rf").is_err());
    }
}
