//! Secret key metadata, indexed by keygrip.
//!
//! Built from `gpg --list-secret-keys --with-colons`. Keys own their
//! subkeys; a subkey refers back to its key by index into the ring, so the
//! whole ring is replaced at once on refresh and never patched in place.
//!
//! Record fields used (0-based):
//! ```text
//! sec/ssb : [11] capabilities
//! fpr/grp : [9]  fingerprint / keygrip of the open subkey, else the key
//! uid     : [9]  user id, estream-escaped; first one wins
//! ```

use std::collections::HashMap;

use crate::error::ProtocolError;
use crate::line::Keygrip;

const FIELD_VALUE: usize = 9;
const FIELD_CAPABILITIES: usize = 11;

/// A primary secret key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Key {
    /// Hex fingerprint.
    pub fingerprint: Option<Vec<u8>>,
    /// Keygrip.
    pub keygrip: Option<Keygrip>,
    /// Capability letters as listed by gpg.
    pub capabilities: Vec<u8>,
    /// First user id, unescaped.
    pub first_uid: Option<Vec<u8>>,
    /// Subkeys in listing order.
    pub subkeys: Vec<SubKey>,
}

/// A secret subkey.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubKey {
    /// Hex fingerprint.
    pub fingerprint: Option<Vec<u8>>,
    /// Keygrip.
    pub keygrip: Option<Keygrip>,
    /// Capability letters as listed by gpg.
    pub capabilities: Vec<u8>,
    /// Index of the owning [`Key`] in its [`KeyRing`].
    pub parent: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Entry {
    Primary(usize),
    Subkey { key: usize, subkey: usize },
}

/// All secret keys of one GnuPG home, indexed by keygrip.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: Vec<Key>,
    by_keygrip: HashMap<Keygrip, Entry>,
}

fn malformed(reason: &'static str) -> ProtocolError {
    ProtocolError::Agent(reason)
}

fn parse_keygrip(value: &[u8]) -> Result<Keygrip, ProtocolError> {
    Keygrip::parse(value).map_err(|_| malformed("invalid keygrip in key listing"))
}

impl KeyRing {
    /// Parse a colon-delimited secret key listing.
    pub fn parse(listing: &[u8]) -> Result<Self, ProtocolError> {
        let mut keys: Vec<Key> = Vec::new();
        let mut key: Option<Key> = None;
        let mut subkey: Option<SubKey> = None;

        for line in listing.split(|&b| b == b'\n') {
            let fields: Vec<&[u8]> = line.split(|&b| b == b':').collect();
            let record = fields.first().copied().unwrap_or_default();
            let field = |i: usize| fields.get(i).copied().unwrap_or_default();

            // A new key, a new subkey or a blank line closes the open subkey.
            if matches!(record, b"sec" | b"ssb" | b"") {
                if let Some(done) = subkey.take() {
                    key.as_mut()
                        .ok_or(malformed("subkey without key"))?
                        .subkeys
                        .push(done);
                }
            }
            if matches!(record, b"sec" | b"") {
                keys.extend(key.take());
            }

            match record {
                b"sec" => {
                    key = Some(Key {
                        capabilities: field(FIELD_CAPABILITIES).to_vec(),
                        ..Key::default()
                    });
                }
                b"ssb" => {
                    if key.is_none() {
                        return Err(malformed("subkey before primary key"));
                    }
                    subkey = Some(SubKey {
                        fingerprint: None,
                        keygrip: None,
                        capabilities: field(FIELD_CAPABILITIES).to_vec(),
                        // The open key is pushed next.
                        parent: keys.len(),
                    });
                }
                b"fpr" => {
                    let value = field(FIELD_VALUE).to_vec();
                    match (subkey.as_mut(), key.as_mut()) {
                        (Some(sub), _) => sub.fingerprint = Some(value),
                        (None, Some(k)) => k.fingerprint = Some(value),
                        (None, None) => return Err(malformed("fingerprint before key")),
                    }
                }
                b"grp" => {
                    let grip = parse_keygrip(field(FIELD_VALUE))?;
                    match (subkey.as_mut(), key.as_mut()) {
                        (Some(sub), _) => sub.keygrip = Some(grip),
                        (None, Some(k)) => k.keygrip = Some(grip),
                        (None, None) => return Err(malformed("keygrip before key")),
                    }
                }
                b"uid" => {
                    let k = key.as_mut().ok_or(malformed("uid before primary key"))?;
                    if k.first_uid.is_none() {
                        k.first_uid = Some(estream_unescape(field(FIELD_VALUE)));
                    }
                }
                _ => {}
            }
        }

        if let Some(done) = subkey.take() {
            key.as_mut().ok_or(malformed("subkey without key"))?.subkeys.push(done);
        }
        keys.extend(key.take());

        let mut by_keygrip = HashMap::new();
        for (i, k) in keys.iter().enumerate() {
            let grip = k.keygrip.ok_or(malformed("key without keygrip"))?;
            by_keygrip.insert(grip, Entry::Primary(i));
            for (j, sub) in k.subkeys.iter().enumerate() {
                let grip = sub.keygrip.ok_or(malformed("subkey without keygrip"))?;
                by_keygrip.insert(grip, Entry::Subkey { key: i, subkey: j });
            }
        }

        Ok(Self { keys, by_keygrip })
    }

    /// Primary keys in listing order.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Whether `grip` belongs to a key or subkey in the ring.
    pub fn contains(&self, grip: &Keygrip) -> bool {
        self.by_keygrip.contains_key(grip)
    }

    fn lookup(&self, grip: &Keygrip) -> Option<(&Key, Option<&SubKey>)> {
        match *self.by_keygrip.get(grip)? {
            Entry::Primary(i) => Some((self.keys.get(i)?, None)),
            Entry::Subkey { key, subkey } => {
                let sub = self.keys.get(key)?.subkeys.get(subkey)?;
                Some((self.keys.get(sub.parent)?, Some(sub)))
            }
        }
    }

    /// Human readable description of `grip` for the agent's pinentry.
    ///
    /// Unknown keys are only described by keygrip when key generation is
    /// allowed (a freshly generated key is not listed yet).
    pub fn describe(&self, grip: &Keygrip, allow_keygen: bool) -> Result<Vec<u8>, ProtocolError> {
        let Some((key, subkey)) = self.lookup(grip) else {
            if !allow_keygen {
                return Err(ProtocolError::Filtered("unknown key"));
            }
            let mut desc = b"Keygrip: ".to_vec();
            desc.extend_from_slice(grip.as_bytes());
            return Ok(desc);
        };

        let mut desc = Vec::new();
        if let Some(uid) = &key.first_uid {
            desc.extend_from_slice(b"UID: ");
            desc.extend_from_slice(uid.split(|&b| b == b'\n').next().unwrap_or_default());
            desc.push(b'\n');
        }
        desc.extend_from_slice(b"Fingerprint: ");
        desc.extend_from_slice(key.fingerprint.as_deref().unwrap_or_default());
        if let Some(sub) = subkey {
            desc.extend_from_slice(b"\nSubkey Fingerprint: ");
            desc.extend_from_slice(sub.fingerprint.as_deref().unwrap_or_default());
        }
        Ok(desc)
    }
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        _ => None,
    }
}

/// Undo gpg's `es_write_sanitized` escaping of colon-listing fields.
pub fn estream_unescape(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'\\' {
            let decoded = match input.get(i + 1) {
                Some(b'\\') => Some((b'\\', 2)),
                Some(b'n') => Some((b'\n', 2)),
                Some(b'r') => Some((b'\r', 2)),
                Some(b'f') => Some((0x0c, 2)),
                Some(b'v') => Some((0x0b, 2)),
                Some(b'b') => Some((0x08, 2)),
                Some(b'0') => Some((0x00, 2)),
                Some(b'x') => match (
                    input.get(i + 2).copied().and_then(hex_value),
                    input.get(i + 3).copied().and_then(hex_value),
                ) {
                    (Some(hi), Some(lo)) => Some(((hi << 4) | lo, 4)),
                    _ => None,
                },
                _ => None,
            };
            if let Some((byte, consumed)) = decoded {
                out.push(byte);
                i += consumed;
                continue;
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PRIMARY_GRIP: &str = "1111111111111111111111111111111111111111";
    const SIGN_GRIP: &str = "2222222222222222222222222222222222222222";
    const ENCRYPT_GRIP: &str = "3333333333333333333333333333333333333333";
    const OTHER_GRIP: &str = "4444444444444444444444444444444444444444";

    fn listing() -> String {
        [
            "sec:u:255:22:AAAAAAAAAAAAAAAA:1600000000:::u:::cC:::+:::23::0:",
            "fpr:::::::::AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA:",
            &format!("grp:::::::::{PRIMARY_GRIP}:"),
            "uid:u::::1600000000::HASH::Alice \\x3calice@example.org\\x3e\\nsecond line::::::::::0:",
            "uid:u::::1600000000::HASH::Alice Second::::::::::0:",
            "ssb:u:255:22:BBBBBBBBBBBBBBBB:1600000000::::::s:::+:::23:",
            "fpr:::::::::BBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBBB:",
            &format!("grp:::::::::{SIGN_GRIP}:"),
            "ssb:u:255:18:CCCCCCCCCCCCCCCC:1600000000::::::e:::+:::cv25519::",
            "fpr:::::::::CCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCCC:",
            &format!("grp:::::::::{ENCRYPT_GRIP}:"),
            "",
        ]
        .join("\n")
    }

    fn grip(s: &str) -> Keygrip {
        Keygrip::parse(s.as_bytes()).unwrap()
    }

    #[test]
    fn test_parse_listing() {
        let ring = KeyRing::parse(listing().as_bytes()).unwrap();
        assert_eq!(ring.keys().len(), 1);

        let key = &ring.keys()[0];
        assert_eq!(key.capabilities, b"cC".to_vec());
        assert_eq!(key.first_uid.as_deref(), Some(&b"Alice <alice@example.org>\nsecond line"[..]));
        assert_eq!(key.subkeys.len(), 2);
        assert_eq!(key.subkeys[0].capabilities, b"s".to_vec());
        assert_eq!(key.subkeys[1].parent, 0);

        assert!(ring.contains(&grip(PRIMARY_GRIP)));
        assert!(ring.contains(&grip(SIGN_GRIP)));
        assert!(ring.contains(&grip(ENCRYPT_GRIP)));
        assert!(!ring.contains(&grip(OTHER_GRIP)));
    }

    #[test]
    fn test_describe_primary_and_subkey() {
        let ring = KeyRing::parse(listing().as_bytes()).unwrap();
        assert_eq!(
            ring.describe(&grip(PRIMARY_GRIP), false).unwrap(),
            format!("UID: Alice <alice@example.org>\nFingerprint: {}", "A".repeat(40)).into_bytes()
        );
        assert_eq!(
            ring.describe(&grip(ENCRYPT_GRIP), false).unwrap(),
            format!(
                "UID: Alice <alice@example.org>\nFingerprint: {}\nSubkey Fingerprint: {}",
                "A".repeat(40),
                "C".repeat(40)
            )
            .into_bytes()
        );
    }

    #[test]
    fn test_describe_unknown_key() {
        let ring = KeyRing::parse(listing().as_bytes()).unwrap();
        assert_eq!(
            ring.describe(&grip(OTHER_GRIP), false),
            Err(ProtocolError::Filtered("unknown key"))
        );
        assert_eq!(
            ring.describe(&grip(OTHER_GRIP), true).unwrap(),
            format!("Keygrip: {OTHER_GRIP}").into_bytes()
        );
    }

    #[test]
    fn test_multiple_keys_without_trailing_newline() {
        let text = format!(
            "sec:::::::::::sc:\nfpr:::::::::F1:\ngrp:::::::::{PRIMARY_GRIP}:\n\
             sec:::::::::::sc:\nfpr:::::::::F2:\ngrp:::::::::{OTHER_GRIP}:\n\
             ssb:::::::::::e:\nfpr:::::::::F3:\ngrp:::::::::{SIGN_GRIP}:"
        );
        let ring = KeyRing::parse(text.as_bytes()).unwrap();
        assert_eq!(ring.keys().len(), 2);
        assert_eq!(ring.keys()[1].subkeys[0].parent, 1);
        assert_eq!(
            ring.describe(&grip(SIGN_GRIP), false).unwrap(),
            b"Fingerprint: F2\nSubkey Fingerprint: F3".to_vec()
        );
    }

    #[test]
    fn test_malformed_listing() {
        assert!(KeyRing::parse(b"ssb:::::::::::e:\n").is_err());
        assert!(KeyRing::parse(b"fpr:::::::::F1:\n").is_err());
        assert!(KeyRing::parse(b"sec:::::::::::sc:\nfpr:::::::::F1:\n").is_err());
        assert!(KeyRing::parse(b"sec:::::::::::sc:\ngrp:::::::::nothex:\n").is_err());
        assert!(KeyRing::parse(b"").unwrap().keys().is_empty());
    }

    #[test]
    fn test_estream_unescape() {
        assert_eq!(estream_unescape(b"a\\\\b\\n\\0\\x41\\x4"), b"a\\b\n\0A\\x4".to_vec());
        assert_eq!(estream_unescape(b"\\q\\"), b"\\q\\".to_vec());
        // Uppercase hex is not produced by gpg and is left alone.
        assert_eq!(estream_unescape(b"\\x4A"), b"\\x4A".to_vec());
    }
}
