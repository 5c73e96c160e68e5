//! Canonical S-expression codec.
//!
//! Only the subset gpg-agent exchanges in inquires is supported:
//! ```text
//! expr  := '(' item* ')' ' '*
//! item  := expr | N ':' <N raw bytes> | token ' '?
//! token := [0-9A-Za-z_-]+
//! ```
//!
//! Parsing is iterative with an explicit stack bounded by
//! [`MAX_NESTING`]. A successful parse always yields a [`Sexp::List`].
//! Serialization always emits the canonical (length-prefixed) form.

use crate::error::SexpError;
use crate::line::sanitize_int;

/// Maximum list nesting depth.
pub const MAX_NESTING: usize = 20;

/// A parsed S-expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sexp {
    /// Raw byte string.
    Atom(Vec<u8>),
    /// Ordered list of expressions.
    List(Vec<Sexp>),
}

impl Sexp {
    /// Atom contents, if this is an atom.
    pub fn as_atom(&self) -> Option<&[u8]> {
        match self {
            Self::Atom(bytes) => Some(bytes),
            Self::List(_) => None,
        }
    }

    /// List items, if this is a list.
    pub fn as_list(&self) -> Option<&[Sexp]> {
        match self {
            Self::List(items) => Some(items),
            Self::Atom(_) => None,
        }
    }
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'-'
}

/// Parse an untrusted buffer into a single top-level list.
pub fn parse(input: &[u8]) -> Result<Sexp, SexpError> {
    // Bounds check: not empty
    if input.is_empty() {
        return Err(SexpError::Malformed("no expression"));
    }

    // stack[0] collects top-level items; every open list pushes a frame.
    let mut stack: Vec<Vec<Sexp>> = vec![Vec::new()];
    let mut pos = 0;

    while pos < input.len() {
        match input[pos] {
            b')' => {
                if stack.len() == 1 {
                    return Err(SexpError::Malformed("unbalanced closing parenthesis"));
                }
                let items = stack.pop().unwrap_or_default();
                push_item(&mut stack, Sexp::List(items))?;
                pos += 1;
                while input.get(pos) == Some(&b' ') {
                    pos += 1;
                }
            }
            b'(' => {
                if stack.len() > MAX_NESTING {
                    return Err(SexpError::Malformed("nesting too deep"));
                }
                stack.push(Vec::new());
                pos += 1;
            }
            0x30..=0x3f => {
                let colon = input[pos..]
                    .iter()
                    .position(|&b| b == b':')
                    .map(|i| pos + i)
                    .ok_or(SexpError::Malformed("missing length separator"))?;
                let start = colon + 1;
                let remaining = input.len() - start;
                let length = sanitize_int(&input[pos..colon], 1, remaining as u64)
                    .map_err(|_| SexpError::Malformed("invalid atom length"))?;
                // sanitize_int bounds length by `remaining`.
                let end = start + length as usize;
                push_item(&mut stack, Sexp::Atom(input[start..end].to_vec()))?;
                pos = end;
            }
            b if is_token_byte(b) => {
                let len = input[pos..].iter().take_while(|&&b| is_token_byte(b)).count();
                push_item(&mut stack, Sexp::Atom(input[pos..pos + len].to_vec()))?;
                pos += len;
                if input.get(pos) == Some(&b' ') {
                    pos += 1;
                }
            }
            _ => return Err(SexpError::Malformed("invalid literal")),
        }
    }

    if stack.len() != 1 {
        return Err(SexpError::Malformed("missing closing parenthesis"));
    }

    let mut top = stack.pop().unwrap_or_default();
    if top.len() != 1 {
        return Err(SexpError::Malformed("expected exactly one top-level expression"));
    }
    match top.pop() {
        Some(list @ Sexp::List(_)) => Ok(list),
        _ => Err(SexpError::Malformed("top-level expression is not a list")),
    }
}

fn push_item(stack: &mut [Vec<Sexp>], item: Sexp) -> Result<(), SexpError> {
    stack
        .last_mut()
        .map(|items| items.push(item))
        .ok_or(SexpError::Malformed("parser stack empty"))
}

/// Serialize a top-level list in canonical form.
pub fn serialize(value: &Sexp) -> Result<Vec<u8>, SexpError> {
    if value.as_list().is_none() {
        return Err(SexpError::InvalidShape("top-level expression is not a list"));
    }
    let mut out = Vec::new();
    write_canonical(value, &mut out);
    Ok(out)
}

fn write_canonical(value: &Sexp, out: &mut Vec<u8>) {
    match value {
        Sexp::List(items) => {
            out.push(b'(');
            for item in items {
                write_canonical(item, out);
            }
            out.push(b')');
        }
        Sexp::Atom(bytes) => {
            out.extend_from_slice(bytes.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(bytes);
        }
    }
}
