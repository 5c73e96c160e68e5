//! Assuan line primitives and bounds checking.
//!
//! Line format (both directions):
//! ```text
//! +-----------+-----+-------------------+----+
//! | NAME      | SP  | ARGUMENTS         | LF |
//! +-----------+-----+-------------------+----+
//!   <= 1002 bytes, excluding LF
//! ```
//!
//! Everything in this module is a pure function over byte slices.

use std::fmt;

use crate::error::ProtocolError;

/// Maximum line length accepted from the client, excluding the newline.
pub const MAX_LINE_LENGTH: usize = 1002;

/// Keygrip length in hex digits.
pub const KEYGRIP_LENGTH: usize = 40;

/// Cache nonce length in hex digits.
pub const CACHE_NONCE_LENGTH: usize = 24;

/// Split a line at the first `separator`.
///
/// Returns the head and, if the separator was present, everything after it.
pub fn split_command(line: &[u8], separator: u8) -> (&[u8], Option<&[u8]>) {
    match line.iter().position(|&b| b == separator) {
        Some(i) => (&line[..i], Some(&line[i + 1..])),
        None => (line, None),
    }
}

fn digit_count(mut n: u64) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

/// Parse an untrusted decimal integer in `[min, max]`.
///
/// Only `[1-9][0-9]*` is accepted: no sign, no leading zero, no whitespace,
/// and never more digits than `max` has.
pub fn sanitize_int(token: &[u8], min: u64, max: u64) -> Result<u64, ProtocolError> {
    // Bounds check: length
    if token.is_empty() || token.len() > digit_count(max) {
        return Err(ProtocolError::Filtered("integer out of range"));
    }

    if !(b'1'..=b'9').contains(&token[0]) || !token.iter().all(u8::is_ascii_digit) {
        return Err(ProtocolError::Filtered("invalid integer"));
    }

    let value = token.iter().try_fold(0u64, |acc, &b| {
        acc.checked_mul(10)?.checked_add(u64::from(b - b'0'))
    });

    match value {
        Some(v) if (min..=max).contains(&v) => Ok(v),
        _ => Err(ProtocolError::Filtered("integer out of range")),
    }
}

/// Whether `token` is exactly `len` uppercase hex digits.
pub fn is_upper_hex(token: &[u8], len: usize) -> bool {
    token.len() == len && token.iter().all(|b| matches!(b, b'0'..=b'9' | b'A'..=b'F'))
}

/// Whether `token` is a well-formed cache nonce.
pub fn is_cache_nonce(token: &[u8]) -> bool {
    is_upper_hex(token, CACHE_NONCE_LENGTH)
}

/// A validated keygrip: 40 uppercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Keygrip([u8; KEYGRIP_LENGTH]);

impl Keygrip {
    /// Validate an untrusted keygrip token.
    pub fn parse(token: &[u8]) -> Result<Self, ProtocolError> {
        if !is_upper_hex(token, KEYGRIP_LENGTH) {
            return Err(ProtocolError::Filtered("invalid keygrip"));
        }
        let mut grip = [0u8; KEYGRIP_LENGTH];
        grip.copy_from_slice(token);
        Ok(Self(grip))
    }

    /// Raw hex bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Keygrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only ever constructed from ASCII hex.
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for Keygrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Keygrip({})", self)
    }
}

/// Validate a space-separated list of `1..=max` keygrips.
///
/// Exactly one space between keygrips, none leading or trailing.
pub fn verify_keygrip_list(args: &[u8], max: usize) -> Result<(), ProtocolError> {
    let mut count = 0;
    for token in args.split(|&b| b == b' ') {
        Keygrip::parse(token)?;
        count += 1;
        if count > max {
            return Err(ProtocolError::Filtered("too many keygrips"));
        }
    }
    Ok(())
}

/// Escape a human readable string for SETKEYDESC.
///
/// Space becomes `+`; printable ASCII other than `+ " %` is kept;
/// everything else becomes `%xx`.
pub fn percent_plus_escape(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    for &b in input {
        match b {
            b' ' => out.push(b'+'),
            b'+' | b'"' | b'%' => push_hex_escape(&mut out, b),
            0x21..=0x7d => out.push(b),
            _ => push_hex_escape(&mut out, b),
        }
    }
    out
}

/// Escape an inquire data payload for a `D` line to the agent.
pub fn escape_data(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    for &b in input {
        match b {
            b'%' | b'\r' | b'\n' => push_hex_escape(&mut out, b),
            _ => out.push(b),
        }
    }
    out
}

fn push_hex_escape(out: &mut Vec<u8>, b: u8) {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    out.push(b'%');
    out.push(HEX[usize::from(b >> 4)]);
    out.push(HEX[usize::from(b & 0x0f)]);
}

fn upper_hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Decode `%XX` (uppercase hex) sequences in a client `D` line.
///
/// Anything that is not a complete uppercase escape is copied as-is.
pub fn percent_unescape(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' && i + 2 < input.len() {
            if let (Some(hi), Some(lo)) =
                (upper_hex_value(input[i + 1]), upper_hex_value(input[i + 2]))
            {
                out.push((hi << 4) | lo);
                i += 3;
                continue;
            }
        }
        out.push(input[i]);
        i += 1;
    }
    out
}

/// Render bytes for a log line: non-printable bytes become `.`.
pub fn sanitize_for_log(input: &[u8]) -> String {
    input
        .iter()
        .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
        .collect()
}
