//! INQUIRE sub-protocol.
//!
//! While a command is in flight the agent may ask the client for more data.
//! Only GENKEY, PKDECRYPT and PKSIGN register inquires; everything else
//! treats an INQUIRE as filtered.
//!
//! ```text
//! agent  -> INQUIRE KEYPARAM
//! client <- INQUIRE KEYPARAM
//! client -> D (genkey(rsa(nbits 4:2048)))     at most once, validated
//! agent  <- D (6:genkey(3:rsa(5:nbits4:2048))) reserialized
//! client -> END
//! agent  <- END
//! ```

use crate::command::CommandKind;
use crate::error::{ProtocolError, SexpError};
use crate::line::{escape_data, percent_unescape, sanitize_int, split_command};
use crate::sexp::{self, Sexp};

/// Inquires the agent may send while a command is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InquireKind {
    /// Key generation parameters (GENKEY).
    KeyParam,
    /// New passphrase (GENKEY); only an empty answer is accepted.
    NewPasswd,
    /// Ciphertext to decrypt (PKDECRYPT).
    Ciphertext,
    /// Informational: a pinentry was started.
    PinentryLaunched,
}

impl InquireKind {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"KEYPARAM" => Some(Self::KeyParam),
            b"NEWPASSWD" => Some(Self::NewPasswd),
            b"CIPHERTEXT" => Some(Self::Ciphertext),
            b"PINENTRY_LAUNCHED" => Some(Self::PinentryLaunched),
            _ => None,
        }
    }

    /// Wire name.
    pub fn name(self) -> &'static str {
        match self {
            Self::KeyParam => "KEYPARAM",
            Self::NewPasswd => "NEWPASSWD",
            Self::Ciphertext => "CIPHERTEXT",
            Self::PinentryLaunched => "PINENTRY_LAUNCHED",
        }
    }

    fn accepts_data(self) -> bool {
        matches!(self, Self::KeyParam | Self::Ciphertext)
    }
}

/// Inquires acceptable while `command` is in flight.
pub fn expected_inquires(command: CommandKind) -> &'static [InquireKind] {
    match command {
        CommandKind::GenKey => &[
            InquireKind::KeyParam,
            InquireKind::PinentryLaunched,
            InquireKind::NewPasswd,
        ],
        CommandKind::PkDecrypt => &[InquireKind::Ciphertext, InquireKind::PinentryLaunched],
        CommandKind::PkSign => &[InquireKind::PinentryLaunched],
        _ => &[],
    }
}

/// One INQUIRE exchange with the client.
#[derive(Debug)]
pub struct InquireExchange {
    kind: InquireKind,
    seen_data: bool,
}

/// What to send to the agent after a client inquire reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InquireReply {
    /// A validated, reserialized `D` line. More client lines follow.
    Data(Vec<u8>),
    /// `END`; the exchange is over.
    End,
}

impl InquireExchange {
    /// Accept an agent `INQUIRE` for `command`.
    ///
    /// `args` is everything after `INQUIRE `. Returns the exchange and the
    /// line to show the client.
    pub fn start(command: CommandKind, args: Option<&[u8]>) -> Result<(Self, Vec<u8>), ProtocolError> {
        let args = args
            .filter(|a| !a.is_empty())
            .ok_or(ProtocolError::Filtered("empty inquire"))?;
        let (name, extra) = split_command(args, b' ');

        let kind = InquireKind::from_name(name)
            .filter(|k| expected_inquires(command).contains(k))
            .ok_or(ProtocolError::Filtered("unexpected inquire"))?;

        let mut client_line = b"INQUIRE ".to_vec();
        client_line.extend_from_slice(kind.name().as_bytes());
        match kind {
            // Agent-originated; the client only gets it echoed back.
            InquireKind::PinentryLaunched => {
                client_line.push(b' ');
                client_line.extend_from_slice(extra.unwrap_or_default());
            }
            _ => {
                if extra.is_some_and(|e| !e.is_empty()) {
                    return Err(ProtocolError::Filtered("unexpected inquire arguments"));
                }
            }
        }
        client_line.push(b'\n');

        Ok((
            Self {
                kind,
                seen_data: false,
            },
            client_line,
        ))
    }

    /// Which inquire this is.
    pub fn kind(&self) -> InquireKind {
        self.kind
    }

    /// Handle one untrusted client line during the exchange.
    pub fn on_client_line(&mut self, line: &[u8]) -> Result<InquireReply, ProtocolError> {
        let (name, args) = split_command(line, b' ');
        match name {
            b"END" => {
                if args.is_some_and(|a| !a.is_empty()) {
                    return Err(ProtocolError::Filtered("unexpected arguments to END"));
                }
                Ok(InquireReply::End)
            }
            b"D" if self.kind.accepts_data() => {
                if self.seen_data {
                    return Err(ProtocolError::Filtered("more than one data line"));
                }
                let payload = percent_unescape(args.unwrap_or_default());
                let parsed = sexp::parse(&payload)?;
                match self.kind {
                    InquireKind::KeyParam => validate_keyparam(&parsed)?,
                    _ => validate_ciphertext(&parsed)?,
                }
                self.seen_data = true;

                let mut out = b"D ".to_vec();
                out.extend_from_slice(&escape_data(&sexp::serialize(&parsed)?));
                out.push(b'\n');
                Ok(InquireReply::Data(out))
            }
            _ => Err(ProtocolError::Filtered("unexpected inquire response")),
        }
    }
}

fn shape(reason: &'static str) -> SexpError {
    SexpError::InvalidShape(reason)
}

/// `(head value)`: return `value`.
fn tagged<'a>(head: &[u8], sexp: &'a Sexp) -> Result<&'a Sexp, SexpError> {
    match sexp.as_list() {
        Some([first, value]) if first.as_atom() == Some(head) => Ok(value),
        _ => Err(shape("unexpected element")),
    }
}

fn tagged_atom<'a>(head: &[u8], sexp: &'a Sexp) -> Result<&'a [u8], SexpError> {
    tagged(head, sexp)?.as_atom().ok_or(shape("expected a byte string"))
}

/// Key generation algorithms accepted in KEYPARAM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAlgorithm {
    Rsa,
    OpenPgpElg,
    Dsa,
    Ecc,
}

impl KeyAlgorithm {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"rsa" => Some(Self::Rsa),
            b"openpgp-elg" => Some(Self::OpenPgpElg),
            b"dsa" => Some(Self::Dsa),
            b"ecc" => Some(Self::Ecc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CurveClass {
    Edwards,
    SafeEcdh,
    Other,
}

impl CurveClass {
    fn of(curve: &[u8]) -> Option<Self> {
        match curve {
            b"Ed25519" | b"Ed448" => Some(Self::Edwards),
            b"Curve25519" | b"X448" => Some(Self::SafeEcdh),
            b"NIST P-256" | b"NIST P-384" | b"NIST P-521" | b"brainpoolP256r1"
            | b"brainpoolP384r1" | b"brainpoolP512r1" | b"secp256k1" => Some(Self::Other),
            _ => None,
        }
    }

    fn allowed_flags(self) -> &'static [&'static [u8]] {
        match self {
            Self::Edwards => &[b"eddsa", b"comp"],
            Self::SafeEcdh => &[b"comp", b"djb-tweak"],
            Self::Other => &[],
        }
    }
}

fn validate_nbits(sexp: &Sexp) -> Result<(), SexpError> {
    let bits = tagged_atom(b"nbits", sexp)?;
    sanitize_int(bits, 1024, 4096).map_err(|_| shape("key size out of range"))?;
    Ok(())
}

fn validate_curve_flags(curve: &[u8], flags: &[Sexp]) -> Result<(), SexpError> {
    let class = CurveClass::of(curve).ok_or(shape("unknown elliptic curve"))?;

    let flags = flags
        .iter()
        .map(|f| f.as_atom().ok_or(shape("flag is not a byte string")))
        .collect::<Result<Vec<_>, _>>()?;

    if flags == [&b"nocomp"[..]] {
        return Ok(());
    }
    if class == CurveClass::Other {
        return Err(shape("flags not allowed for this curve"));
    }
    if flags.len() > 2 {
        return Err(shape("too many flags"));
    }
    if !flags.contains(&&b"comp"[..]) {
        return Err(shape("keys must be compressed"));
    }
    if !flags.iter().all(|f| class.allowed_flags().contains(f)) {
        return Err(shape("forbidden flag"));
    }
    Ok(())
}

/// Validate `(genkey (<alg> <params>...))`.
pub fn validate_keyparam(sexp: &Sexp) -> Result<(), SexpError> {
    let body = tagged(b"genkey", sexp)?.as_list().ok_or(shape("expected key parameters"))?;
    let (algorithm, params) = body.split_first().ok_or(shape("no key parameters"))?;
    if params.is_empty() {
        return Err(shape("no key parameters"));
    }

    let algorithm = algorithm
        .as_atom()
        .and_then(KeyAlgorithm::from_name)
        .ok_or(shape("unsupported key algorithm"))?;

    match (algorithm, params) {
        (KeyAlgorithm::Rsa | KeyAlgorithm::OpenPgpElg, [nbits]) => validate_nbits(nbits),
        (KeyAlgorithm::Dsa, [nbits, qbits]) => {
            if tagged_atom(b"qbits", qbits)? != b"256" {
                return Err(shape("invalid DSA parameters"));
            }
            validate_nbits(nbits)
        }
        (KeyAlgorithm::Ecc, [curve, flags]) => {
            let curve = tagged_atom(b"curve", curve)?;
            match flags.as_list() {
                Some([head, flags @ ..]) if head.as_atom() == Some(&b"flags"[..]) && !flags.is_empty() => {
                    validate_curve_flags(curve, flags)
                }
                _ => Err(shape("key generation flags must begin with flags")),
            }
        }
        _ => Err(shape("invalid parameter count")),
    }
}

/// Ciphertext algorithms accepted in CIPHERTEXT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CipherAlgorithm {
    Ecdh,
    Rsa,
    Elg,
}

impl CipherAlgorithm {
    fn from_name(name: &[u8]) -> Option<Self> {
        match name {
            b"ecdh" => Some(Self::Ecdh),
            b"rsa" => Some(Self::Rsa),
            b"elg" => Some(Self::Elg),
            _ => None,
        }
    }

    fn mpi_names(self) -> &'static [&'static [u8]] {
        match self {
            Self::Ecdh => &[b"s", b"e"],
            Self::Rsa => &[b"a"],
            Self::Elg => &[b"a", b"b"],
        }
    }
}

/// Validate `(enc-val (<alg> (<name> <mpi>)...))`.
pub fn validate_ciphertext(sexp: &Sexp) -> Result<(), SexpError> {
    let body = tagged(b"enc-val", sexp)?.as_list().ok_or(shape("expected ciphertext"))?;
    let (algorithm, mpis) = body.split_first().ok_or(shape("no MPIs found"))?;
    if mpis.is_empty() {
        return Err(shape("no MPIs found"));
    }

    let algorithm = algorithm
        .as_atom()
        .and_then(CipherAlgorithm::from_name)
        .ok_or(shape("unknown encryption algorithm"))?;

    let names = algorithm.mpi_names();
    if names.len() != mpis.len() {
        return Err(shape("wrong number of MPIs"));
    }
    for (name, mpi) in names.iter().zip(mpis) {
        tagged_atom(name, mpi)?;
    }
    Ok(())
}
