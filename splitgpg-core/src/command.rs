//! Client command allow-list.
//!
//! Every command a client may send is a [`CommandKind`] variant. Validation
//! turns an untrusted line into a [`CommandAction`]: either a canned
//! response that never reaches the agent, or a [`Forward`] whose command line
//! is rebuilt entirely from validated pieces.

use chrono::{DateTime, Utc};

use crate::error::ProtocolError;
use crate::line::{is_cache_nonce, is_upper_hex, sanitize_int, split_command, verify_keygrip_list, Keygrip};

/// Response to `AGENT_ID`. `GPG_ERR_SOURCE_GPGAGENT << 24 | GPG_ERR_ASS_UNKNOWN_CMD`
pub const UNKNOWN_IPC_COMMAND: &[u8] = b"ERR 67109139 unknown IPC command\n";

/// Response to `SCD SERIALNO`. `GPG_ERR_SOURCE_GPGAGENT << 24 | GPG_ERR_NO_SCDAEMON`
pub const NO_SMARTCARD_DAEMON: &[u8] = b"ERR 67108983 No SmartCard daemon\n";

/// Upper bound on keygrips in one `HAVEKEY`.
pub const MAX_HAVEKEY_KEYGRIPS: usize = 200;

/// Upper bound on `--list=N` (gpg's own default).
pub const MAX_LIST_LIMIT: u64 = 1000;

const OK: &[u8] = b"OK\n";

/// Operations guarded by operator confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Signing with a secret key.
    PkSign,
    /// Decrypting a session key.
    PkDecrypt,
}

impl Operation {
    /// Wire name, also used in prompts and timestamp file names.
    pub fn name(self) -> &'static str {
        match self {
            Self::PkSign => "PKSIGN",
            Self::PkDecrypt => "PKDECRYPT",
        }
    }
}

/// Allow-listed client commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// `RESET`
    Reset,
    /// `OPTION name[=value]`
    Option,
    /// `AGENT_ID`
    AgentId,
    /// `HAVEKEY`
    HaveKey,
    /// `KEYINFO`
    KeyInfo,
    /// `GENKEY`
    GenKey,
    /// `SIGKEY`
    SigKey,
    /// `SETKEY`
    SetKey,
    /// `SETKEYDESC`
    SetKeyDesc,
    /// `PKDECRYPT`
    PkDecrypt,
    /// `SETHASH`
    SetHash,
    /// `PKSIGN`
    PkSign,
    /// `GETINFO`
    GetInfo,
    /// `BYE`
    Bye,
    /// `SCD`
    Scd,
    /// `READKEY`
    ReadKey,
    /// `NOP`
    Nop,
}

impl CommandKind {
    /// Look up a command by its exact wire name.
    pub fn from_name(name: &[u8]) -> Option<Self> {
        Some(match name {
            b"RESET" => Self::Reset,
            b"OPTION" => Self::Option,
            b"AGENT_ID" => Self::AgentId,
            b"HAVEKEY" => Self::HaveKey,
            b"KEYINFO" => Self::KeyInfo,
            b"GENKEY" => Self::GenKey,
            b"SIGKEY" => Self::SigKey,
            b"SETKEY" => Self::SetKey,
            b"SETKEYDESC" => Self::SetKeyDesc,
            b"PKDECRYPT" => Self::PkDecrypt,
            b"SETHASH" => Self::SetHash,
            b"PKSIGN" => Self::PkSign,
            b"GETINFO" => Self::GetInfo,
            b"BYE" => Self::Bye,
            b"SCD" => Self::Scd,
            b"READKEY" => Self::ReadKey,
            b"NOP" => Self::Nop,
            _ => return None,
        })
    }

    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Reset => "RESET",
            Self::Option => "OPTION",
            Self::AgentId => "AGENT_ID",
            Self::HaveKey => "HAVEKEY",
            Self::KeyInfo => "KEYINFO",
            Self::GenKey => "GENKEY",
            Self::SigKey => "SIGKEY",
            Self::SetKey => "SETKEY",
            Self::SetKeyDesc => "SETKEYDESC",
            Self::PkDecrypt => "PKDECRYPT",
            Self::SetHash => "SETHASH",
            Self::PkSign => "PKSIGN",
            Self::GetInfo => "GETINFO",
            Self::Bye => "BYE",
            Self::Scd => "SCD",
            Self::ReadKey => "READKEY",
            Self::Nop => "NOP",
        }
    }
}

/// How an `OPTION` is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionRule {
    /// Answer directly; never forwarded.
    Fake(&'static [u8]),
    /// Forward with a fixed value, whatever the client sent.
    Override(&'static [u8]),
    /// Forward only if the client value equals this one exactly.
    Exact(Option<&'static [u8]>),
}

fn option_rule(name: &[u8]) -> Option<OptionRule> {
    Some(match name {
        b"ttyname" | b"ttytype" | b"lc-ctype" | b"lc-messages" | b"putenv" => {
            OptionRule::Fake(OK)
        }
        b"display" => OptionRule::Override(b":0"),
        b"pinentry-mode" => OptionRule::Fake(b"ERR 67108924 Not supported <GPG Agent>\n"),
        b"allow-pinentry-notify" => OptionRule::Exact(None),
        b"agent-awareness" => OptionRule::Exact(Some(b"2.1.0")),
        _ => return None,
    })
}

/// Hex digest length for each accepted `SETHASH` algorithm id.
fn hash_digest_length(algorithm: u64) -> Option<usize> {
    match algorithm {
        2 => Some(40),   // sha1
        3 => Some(40),   // rmd160
        8 => Some(64),   // sha256
        9 => Some(96),   // sha384
        10 => Some(128), // sha512
        11 => Some(56),  // sha224
        _ => None,
    }
}

/// Per-client permissions that change what validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Policy {
    /// Whether GENKEY and READKEY are permitted.
    pub allow_keygen: bool,
}

/// A validated command to send to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Forward {
    /// Which command this is; decides the acceptable inquires.
    pub kind: CommandKind,
    /// Full line for the agent, newline terminated.
    pub line: Vec<u8>,
    /// Operator confirmation required before sending.
    pub confirm: Option<Operation>,
    /// Key to describe to the agent with SETKEYDESC after the reply.
    pub describe: Option<Keygrip>,
    /// Listing that needs the unrestricted agent socket.
    pub needs_privileged: bool,
    /// Connection closes after the reply.
    pub closes: bool,
}

impl Forward {
    fn new(kind: CommandKind, args: Option<&[u8]>) -> Self {
        let mut line = kind.name().as_bytes().to_vec();
        if let Some(args) = args.filter(|a| !a.is_empty()) {
            line.push(b' ');
            line.extend_from_slice(args);
        }
        line.push(b'\n');
        Self {
            kind,
            line,
            confirm: None,
            describe: None,
            needs_privileged: false,
            closes: false,
        }
    }
}

/// Outcome of validating one client line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAction {
    /// Answer the client directly with this line.
    Respond(&'static [u8]),
    /// Send to the agent and relay its response.
    Forward(Forward),
}

fn filtered(reason: &'static str) -> ProtocolError {
    ProtocolError::Filtered(reason)
}

fn no_args(args: Option<&[u8]>) -> Result<(), ProtocolError> {
    match args {
        None => Ok(()),
        Some(_) => Err(filtered("unexpected arguments")),
    }
}

/// Validate one untrusted client line (without its newline).
///
/// `now` is used for the GENKEY creation timestamp.
pub fn validate(line: &[u8], policy: Policy, now: DateTime<Utc>) -> Result<CommandAction, ProtocolError> {
    let (name, args) = split_command(line, b' ');
    let kind = CommandKind::from_name(name).ok_or(filtered("unknown command"))?;

    match kind {
        CommandKind::Reset | CommandKind::Bye | CommandKind::PkDecrypt => {
            no_args(args)?;
            let mut forward = Forward::new(kind, None);
            forward.closes = kind == CommandKind::Bye;
            if kind == CommandKind::PkDecrypt {
                forward.confirm = Some(Operation::PkDecrypt);
            }
            Ok(CommandAction::Forward(forward))
        }
        CommandKind::Option => validate_option(args),
        CommandKind::AgentId => Ok(CommandAction::Respond(UNKNOWN_IPC_COMMAND)),
        CommandKind::HaveKey => validate_key_query(kind, args, MAX_HAVEKEY_KEYGRIPS),
        CommandKind::KeyInfo => validate_key_query(kind, args, 1),
        CommandKind::GenKey => validate_genkey(args, policy, now),
        CommandKind::SigKey | CommandKind::SetKey => {
            let grip = Keygrip::parse(args.ok_or(filtered("missing keygrip"))?)?;
            let mut forward = Forward::new(kind, Some(grip.as_bytes()));
            forward.describe = Some(grip);
            Ok(CommandAction::Forward(forward))
        }
        // We always send our own SETKEYDESC after SIGKEY/SETKEY.
        CommandKind::SetKeyDesc | CommandKind::Nop => Ok(CommandAction::Respond(OK)),
        CommandKind::SetHash => validate_sethash(args),
        CommandKind::PkSign => {
            let nonce = match args {
                None => None,
                Some(args) => {
                    let nonce = args.strip_prefix(b"-- ").ok_or(filtered("bad PKSIGN arguments"))?;
                    if !is_cache_nonce(nonce) {
                        return Err(filtered("bad cache nonce"));
                    }
                    Some(args)
                }
            };
            let mut forward = Forward::new(kind, nonce);
            forward.confirm = Some(Operation::PkSign);
            Ok(CommandAction::Forward(forward))
        }
        CommandKind::GetInfo => match args {
            Some(what @ (b"version" | b"restricted" | b"s2k_count")) => {
                Ok(CommandAction::Forward(Forward::new(kind, Some(what))))
            }
            _ => Err(filtered("unsupported GETINFO")),
        },
        CommandKind::Scd => match args {
            Some(b"SERIALNO" | b"SERIALNO openpgp") => Ok(CommandAction::Respond(NO_SMARTCARD_DAEMON)),
            _ => Err(filtered("unsupported SCD")),
        },
        CommandKind::ReadKey => {
            if !policy.allow_keygen {
                return Err(filtered("key generation not allowed"));
            }
            let args = args.ok_or(filtered("missing keygrip"))?;
            let grip = Keygrip::parse(args.strip_prefix(b"-- ").unwrap_or(args))?;
            let mut forwarded = b"-- ".to_vec();
            forwarded.extend_from_slice(grip.as_bytes());
            Ok(CommandAction::Forward(Forward::new(kind, Some(&forwarded))))
        }
    }
}

fn validate_option(args: Option<&[u8]>) -> Result<CommandAction, ProtocolError> {
    let args = args.filter(|a| !a.is_empty()).ok_or(filtered("missing option"))?;
    let (name, value) = split_command(args, b'=');
    let rule = option_rule(name).ok_or(filtered("unknown option"))?;

    let forwarded_value = match rule {
        OptionRule::Fake(response) => return Ok(CommandAction::Respond(response)),
        OptionRule::Override(fixed) => Some(fixed),
        OptionRule::Exact(expected) => {
            if value != expected {
                return Err(filtered("option value not allowed"));
            }
            expected
        }
    };

    let mut option = name.to_vec();
    if let Some(value) = forwarded_value {
        option.push(b'=');
        option.extend_from_slice(value);
    }
    Ok(CommandAction::Forward(Forward::new(CommandKind::Option, Some(&option))))
}

/// HAVEKEY and KEYINFO: a keygrip list or a `--list` request.
fn validate_key_query(
    kind: CommandKind,
    args: Option<&[u8]>,
    max_keygrips: usize,
) -> Result<CommandAction, ProtocolError> {
    let args = args.ok_or(filtered("missing keygrip"))?;

    if args == b"--list" {
        let mut forward = Forward::new(kind, Some(args));
        forward.needs_privileged = true;
        return Ok(CommandAction::Forward(forward));
    }

    if let Some(limit) = args.strip_prefix(b"--list=") {
        let limit = sanitize_int(limit, 1, MAX_LIST_LIMIT)?;
        let mut forward = Forward::new(kind, Some(format!("--list={}", limit).as_bytes()));
        forward.needs_privileged = true;
        return Ok(CommandAction::Forward(forward));
    }

    verify_keygrip_list(args, max_keygrips)?;
    Ok(CommandAction::Forward(Forward::new(kind, Some(args))))
}

fn validate_genkey(
    args: Option<&[u8]>,
    policy: Policy,
    now: DateTime<Utc>,
) -> Result<CommandAction, ProtocolError> {
    if !policy.allow_keygen {
        return Err(filtered("key generation not allowed"));
    }

    let mut kept: Vec<Vec<u8>> = Vec::new();
    if let Some(args) = args {
        let mut nonce_seen = false;
        let mut protection_seen = false;

        for token in args.split(|&b| b == b' ') {
            if token == b"--no-protection" || token == b"--inq-passwd" {
                // Must come before the cache nonce, and only once.
                if nonce_seen || protection_seen {
                    return Err(filtered("misplaced GENKEY option"));
                }
                protection_seen = true;
                kept.push(token.to_vec());
            } else if token.starts_with(b"--timestamp=") {
                if nonce_seen {
                    return Err(filtered("misplaced GENKEY option"));
                }
                // The client's creation time is ignored.
                kept.push(now.format("--timestamp=%Y%m%dT%H%M%S").to_string().into_bytes());
            } else if is_cache_nonce(token) && !nonce_seen {
                // Never forwarded: it would let the client set the
                // passphrase of another unlocked key.
                nonce_seen = true;
            } else {
                return Err(filtered("bad GENKEY argument"));
            }
        }
    }

    let joined = kept.join(&b' ');
    Ok(CommandAction::Forward(Forward::new(CommandKind::GenKey, Some(&joined))))
}

fn validate_sethash(args: Option<&[u8]>) -> Result<CommandAction, ProtocolError> {
    let args = args.ok_or(filtered("missing SETHASH arguments"))?;
    let (algorithm, digest) = split_command(args, b' ');
    let digest = digest.ok_or(filtered("missing digest"))?;

    // OpenPGP algorithm ids are one byte.
    let algorithm = sanitize_int(algorithm, 2, 255)?;
    let length = hash_digest_length(algorithm).ok_or(filtered("unknown hash algorithm"))?;
    if !is_upper_hex(digest, length) {
        return Err(filtered("bad digest"));
    }

    let mut forwarded = algorithm.to_string().into_bytes();
    forwarded.push(b' ');
    forwarded.extend_from_slice(digest);
    Ok(CommandAction::Forward(Forward::new(CommandKind::SetHash, Some(&forwarded))))
}

/// The SETKEYDESC line sent to the agent after SIGKEY/SETKEY.
pub fn key_description_command(description: &[u8]) -> Vec<u8> {
    let mut line = b"SETKEYDESC ".to_vec();
    line.extend_from_slice(&crate::line::percent_plus_escape(description));
    line.push(b'\n');
    line
}

/// Check the agent's reply to our SETKEYDESC.
pub fn check_key_description_reply(line: &[u8]) -> Result<(), ProtocolError> {
    if line == b"OK" {
        Ok(())
    } else {
        Err(ProtocolError::Agent("SETKEYDESC failed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const GRIP: &str = "0123456789ABCDEF0123456789ABCDEF01234567";
    const NONCE: &str = "0123456789ABCDEF01234567";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap()
    }

    fn check(line: &str) -> Result<CommandAction, ProtocolError> {
        validate(line.as_bytes(), Policy::default(), now())
    }

    fn check_keygen(line: &str) -> Result<CommandAction, ProtocolError> {
        validate(line.as_bytes(), Policy { allow_keygen: true }, now())
    }

    fn forwarded(action: Result<CommandAction, ProtocolError>) -> Forward {
        match action {
            Ok(CommandAction::Forward(f)) => f,
            other => panic!("expected forward, got {:?}", other),
        }
    }

    fn line_of(action: Result<CommandAction, ProtocolError>) -> String {
        String::from_utf8(forwarded(action).line).unwrap()
    }

    #[test]
    fn test_unknown_commands_filtered() {
        for line in ["FOO", "reset", "GETINFO_", "", " RESET", "IMPORT_KEY", "EXPORT_KEY x", "PRESET_PASSPHRASE"] {
            assert_eq!(check(line), Err(ProtocolError::Filtered("unknown command")), "{line}");
        }
    }

    #[test]
    fn test_no_argument_commands() {
        assert_eq!(line_of(check("RESET")), "RESET\n");
        assert!(check("RESET ").is_err());
        assert!(check("RESET x").is_err());

        let bye = forwarded(check("BYE"));
        assert!(bye.closes);
        assert!(check("BYE now").is_err());

        let decrypt = forwarded(check("PKDECRYPT"));
        assert_eq!(decrypt.confirm, Some(Operation::PkDecrypt));
        assert!(check("PKDECRYPT --x").is_err());
    }

    #[test]
    fn test_option_table() {
        assert_eq!(check("OPTION ttyname=/dev/pts/1"), Ok(CommandAction::Respond(b"OK\n")));
        assert_eq!(check("OPTION putenv=FOO=bar"), Ok(CommandAction::Respond(b"OK\n")));
        assert_eq!(
            check("OPTION pinentry-mode=loopback"),
            Ok(CommandAction::Respond(b"ERR 67108924 Not supported <GPG Agent>\n"))
        );
        assert_eq!(line_of(check("OPTION display=:1337")), "OPTION display=:0\n");
        assert_eq!(line_of(check("OPTION display")), "OPTION display=:0\n");
        assert_eq!(line_of(check("OPTION allow-pinentry-notify")), "OPTION allow-pinentry-notify\n");
        assert!(check("OPTION allow-pinentry-notify=1").is_err());
        assert_eq!(line_of(check("OPTION agent-awareness=2.1.0")), "OPTION agent-awareness=2.1.0\n");
        assert!(check("OPTION agent-awareness=2.2.0").is_err());
        assert!(check("OPTION agent-awareness").is_err());
        assert!(check("OPTION").is_err());
        assert!(check("OPTION ").is_err());
        assert!(check("OPTION no-grab").is_err());
    }

    #[test]
    fn test_canned_responses() {
        assert_eq!(check("AGENT_ID"), Ok(CommandAction::Respond(UNKNOWN_IPC_COMMAND)));
        assert_eq!(check("SETKEYDESC anything+at+all"), Ok(CommandAction::Respond(b"OK\n")));
        assert_eq!(check("NOP whatever"), Ok(CommandAction::Respond(b"OK\n")));
        assert_eq!(check("SCD SERIALNO"), Ok(CommandAction::Respond(NO_SMARTCARD_DAEMON)));
        assert_eq!(check("SCD SERIALNO openpgp"), Ok(CommandAction::Respond(NO_SMARTCARD_DAEMON)));
        assert!(check("SCD LEARN").is_err());
        assert!(check("SCD").is_err());
    }

    #[test]
    fn test_havekey() {
        assert_eq!(line_of(check(&format!("HAVEKEY {GRIP}"))), format!("HAVEKEY {GRIP}\n"));
        assert_eq!(line_of(check(&format!("HAVEKEY {GRIP} {GRIP}"))), format!("HAVEKEY {GRIP} {GRIP}\n"));

        let list = forwarded(check("HAVEKEY --list=1000"));
        assert!(list.needs_privileged);
        assert_eq!(list.line, b"HAVEKEY --list=1000\n".to_vec());
        assert_eq!(line_of(check("HAVEKEY --list")), "HAVEKEY --list\n");

        assert!(check("HAVEKEY --list=0").is_err());
        assert!(check("HAVEKEY --list=1001").is_err());
        assert!(check("HAVEKEY --list=01").is_err());
        assert!(check("HAVEKEY --listing").is_err());
        assert!(check("HAVEKEY").is_err());
        assert!(check(&format!("HAVEKEY {}", &GRIP.to_lowercase())).is_err());

        let too_many = vec![GRIP; 201].join(" ");
        assert!(check(&format!("HAVEKEY {too_many}")).is_err());
        let max = vec![GRIP; 200].join(" ");
        assert!(check(&format!("HAVEKEY {max}")).is_ok());
    }

    #[test]
    fn test_keyinfo() {
        let single = forwarded(check(&format!("KEYINFO {GRIP}")));
        assert!(!single.needs_privileged);
        assert!(check(&format!("KEYINFO {GRIP} {GRIP}")).is_err());
        assert!(forwarded(check("KEYINFO --list")).needs_privileged);
        assert!(check("KEYINFO --ssh-list").is_err());
    }

    #[test]
    fn test_sigkey_describes_key() {
        for cmd in ["SIGKEY", "SETKEY"] {
            let f = forwarded(check(&format!("{cmd} {GRIP}")));
            assert_eq!(f.line, format!("{cmd} {GRIP}\n").into_bytes());
            assert_eq!(f.describe, Some(Keygrip::parse(GRIP.as_bytes()).unwrap()));
            assert!(check(cmd).is_err());
            assert!(check(&format!("{cmd} {GRIP} {GRIP}")).is_err());
        }
    }

    #[test]
    fn test_sethash() {
        let sha256 = "A".repeat(64);
        assert_eq!(line_of(check(&format!("SETHASH 8 {sha256}"))), format!("SETHASH 8 {sha256}\n"));
        assert!(check(&format!("SETHASH 2 {}", "F".repeat(40))).is_ok());
        assert!(check(&format!("SETHASH 10 {}", "0".repeat(128))).is_ok());
        // Wrong length for the algorithm.
        assert!(check(&format!("SETHASH 2 {sha256}")).is_err());
        assert!(check(&format!("SETHASH 8 {}", sha256.to_lowercase())).is_err());
        assert!(check(&format!("SETHASH 1 {sha256}")).is_err());
        assert!(check(&format!("SETHASH 08 {sha256}")).is_err());
        assert!(check("SETHASH 8").is_err());
        assert!(check("SETHASH 8 ").is_err());
        assert!(check(&format!("SETHASH --hash=sha256 {sha256}")).is_err());
    }

    #[test]
    fn test_pksign() {
        let plain = forwarded(check("PKSIGN"));
        assert_eq!(plain.line, b"PKSIGN\n".to_vec());
        assert_eq!(plain.confirm, Some(Operation::PkSign));

        assert_eq!(line_of(check(&format!("PKSIGN -- {NONCE}"))), format!("PKSIGN -- {NONCE}\n"));
        assert!(check(&format!("PKSIGN {NONCE}")).is_err());
        assert!(check(&format!("PKSIGN -- {}", NONCE.to_lowercase())).is_err());
        assert!(check("PKSIGN --").is_err());
        assert!(check("PKSIGN ").is_err());
    }

    #[test]
    fn test_getinfo() {
        assert_eq!(line_of(check("GETINFO version")), "GETINFO version\n");
        assert_eq!(line_of(check("GETINFO restricted")), "GETINFO restricted\n");
        assert_eq!(line_of(check("GETINFO s2k_count")), "GETINFO s2k_count\n");
        assert!(check("GETINFO asdf").is_err());
        assert!(check("GETINFO").is_err());
        assert!(check("GETINFO version ").is_err());
    }

    #[test]
    fn test_readkey_requires_keygen() {
        assert!(check(&format!("READKEY {GRIP}")).is_err());
        assert_eq!(line_of(check_keygen(&format!("READKEY {GRIP}"))), format!("READKEY -- {GRIP}\n"));
        assert_eq!(line_of(check_keygen(&format!("READKEY -- {GRIP}"))), format!("READKEY -- {GRIP}\n"));
        assert!(check_keygen("READKEY").is_err());
        assert!(check_keygen("READKEY --").is_err());
    }

    #[test]
    fn test_genkey_requires_keygen() {
        assert_eq!(check("GENKEY"), Err(ProtocolError::Filtered("key generation not allowed")));
        assert_eq!(line_of(check_keygen("GENKEY")), "GENKEY\n");
    }

    #[test]
    fn test_genkey_rewrites_timestamp_and_drops_nonce() {
        let line = line_of(check_keygen(&format!(
            "GENKEY --no-protection --timestamp=19700101T000000 {NONCE}"
        )));
        assert_eq!(line, "GENKEY --no-protection --timestamp=20240305T070809\n");

        assert_eq!(line_of(check_keygen(&format!("GENKEY {NONCE}"))), "GENKEY\n");
        assert_eq!(line_of(check_keygen("GENKEY --inq-passwd")), "GENKEY --inq-passwd\n");
    }

    #[test]
    fn test_genkey_nonce_ordering() {
        assert!(check_keygen(&format!("GENKEY {NONCE} --no-protection")).is_err());
        assert!(check_keygen(&format!("GENKEY {NONCE} --timestamp=1")).is_err());
        assert!(check_keygen(&format!("GENKEY {NONCE} {NONCE}")).is_err());
        assert!(check_keygen("GENKEY --no-protection --no-protection").is_err());
        assert!(check_keygen("GENKEY --no-protection --inq-passwd").is_err());
        assert!(check_keygen("GENKEY --no-protection  ").is_err());
        assert!(check_keygen("GENKEY --preset").is_err());
        assert!(check_keygen("GENKEY ").is_err());
    }

    #[test]
    fn test_key_description_command() {
        assert_eq!(
            key_description_command(b"UID: A <a@b>\nFingerprint: 0A"),
            b"SETKEYDESC UID:+A+<a@b>%0aFingerprint:+0A\n".to_vec()
        );
        assert!(check_key_description_reply(b"OK").is_ok());
        assert!(check_key_description_reply(b"OK ").is_err());
        assert!(check_key_description_reply(b"ERR 1 x").is_err());
    }
}
