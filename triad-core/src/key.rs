//! Structured entity keys and their encoded cache form.
//!
//! A [`Key`] names an entity by kind, optional ancestor path and an id that is
//! either numeric or a string. A key whose id has not been assigned yet is
//! *incomplete*; the datastore assigns the id on first write and the key never
//! becomes incomplete again.
//!
//! # Encoded Format
//!
//! [`Key::encode`] produces the string used by both cache tiers. Path segments
//! run from the root ancestor to the key itself, separated by `/`:
//!
//! - `Kind:i42` for a numeric id
//! - `Kind:nsome%2Fname` for a string id
//! - `Kind:?` for an incomplete id (only valid on the last segment)
//!
//! Within kinds and names, `%`, `:` and `/` are percent-escaped so the
//! separators stay unambiguous and [`Key::decode`] can invert the encoding.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::KeyError;

/// Separator between path segments.
const SEGMENT_SEPARATOR: char = '/';

/// Separator between the kind and the id inside a segment.
const ID_SEPARATOR: char = ':';

/// Identifier part of a [`Key`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyId {
    /// No id assigned yet; the datastore allocates one on write.
    Incomplete,
    /// Numeric id. Zero is reserved for "unassigned" and rejected.
    Int(i64),
    /// String id. Must not be empty.
    Name(String),
}

impl KeyId {
    /// Returns true if an id has been assigned.
    pub fn is_assigned(&self) -> bool {
        !matches!(self, Self::Incomplete)
    }
}

/// Structured key identifying one entity.
///
/// Keys can only be built through the validating constructors, so every
/// `Key` in circulation has a non-empty kind, a complete ancestor path and a
/// well-formed id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawKey")]
pub struct Key {
    kind: String,
    id: KeyId,
    parent: Option<Box<Key>>,
}

/// Unvalidated serialized form of a [`Key`].
#[derive(Deserialize)]
struct RawKey {
    kind: String,
    id: KeyId,
    parent: Option<Box<Key>>,
}

impl TryFrom<RawKey> for Key {
    type Error = KeyError;

    fn try_from(raw: RawKey) -> Result<Self, Self::Error> {
        Key::new(raw.kind, raw.id, raw.parent.map(|parent| *parent))
    }
}

impl Key {
    /// Create a key, validating kind, id and parent.
    ///
    /// Fails if the kind is empty, the id is `Int(0)` or an empty name, or the
    /// parent is incomplete.
    pub fn new(kind: impl Into<String>, id: KeyId, parent: Option<Key>) -> Result<Self, KeyError> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(KeyError::EmptyKind);
        }
        match &id {
            KeyId::Int(0) => return Err(KeyError::ZeroId { kind }),
            KeyId::Name(name) if name.is_empty() => return Err(KeyError::EmptyName { kind }),
            _ => {}
        }
        if let Some(parent) = &parent {
            if !parent.is_complete() {
                return Err(KeyError::IncompleteParent { kind });
            }
        }
        Ok(Self {
            kind,
            id,
            parent: parent.map(Box::new),
        })
    }

    /// Create an incomplete key for `kind` under `parent`.
    pub fn incomplete(kind: impl Into<String>, parent: Option<Key>) -> Result<Self, KeyError> {
        Self::new(kind, KeyId::Incomplete, parent)
    }

    /// Create a key with a numeric id.
    pub fn with_id(kind: impl Into<String>, id: i64, parent: Option<Key>) -> Result<Self, KeyError> {
        Self::new(kind, KeyId::Int(id), parent)
    }

    /// Create a key with a string id.
    pub fn with_name(
        kind: impl Into<String>,
        name: impl Into<String>,
        parent: Option<Key>,
    ) -> Result<Self, KeyError> {
        Self::new(kind, KeyId::Name(name.into()), parent)
    }

    /// The entity kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The id part.
    pub fn id(&self) -> &KeyId {
        &self.id
    }

    /// The numeric id, if this key has one.
    pub fn int_id(&self) -> Option<i64> {
        match self.id {
            KeyId::Int(id) => Some(id),
            _ => None,
        }
    }

    /// The string id, if this key has one.
    pub fn name(&self) -> Option<&str> {
        match &self.id {
            KeyId::Name(name) => Some(name),
            _ => None,
        }
    }

    /// The direct ancestor, if any.
    pub fn parent(&self) -> Option<&Key> {
        self.parent.as_deref()
    }

    /// Returns true once an id has been assigned.
    ///
    /// Ancestors are always complete, so only the last segment is checked.
    pub fn is_complete(&self) -> bool {
        self.id.is_assigned()
    }

    /// Return the complete key obtained by assigning `id` to this
    /// incomplete key.
    pub fn complete_with(&self, id: KeyId) -> Result<Key, KeyError> {
        if self.is_complete() {
            return Err(KeyError::AlreadyComplete {
                key: self.encode(),
            });
        }
        if !id.is_assigned() {
            return Err(KeyError::Unresolvable {
                reason: format!("cannot complete {} with an unassigned id", self.kind),
            });
        }
        Key::new(self.kind.clone(), id, self.parent().cloned())
    }

    /// Encode to the cache key string.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut String) {
        if let Some(parent) = &self.parent {
            parent.encode_into(out);
            out.push(SEGMENT_SEPARATOR);
        }
        escape_into(&self.kind, out);
        out.push(ID_SEPARATOR);
        match &self.id {
            KeyId::Incomplete => out.push('?'),
            KeyId::Int(id) => {
                out.push('i');
                out.push_str(&id.to_string());
            }
            KeyId::Name(name) => {
                out.push('n');
                escape_into(name, out);
            }
        }
    }

    /// Decode a string produced by [`Key::encode`].
    pub fn decode(input: &str) -> Result<Key, KeyError> {
        if input.is_empty() {
            return Err(malformed(input, "empty input"));
        }

        let mut key: Option<Key> = None;
        for segment in input.split(SEGMENT_SEPARATOR) {
            let (kind, id) = segment
                .split_once(ID_SEPARATOR)
                .ok_or_else(|| malformed(input, "segment without id separator"))?;
            let kind = unescape(kind, input)?;
            let id = decode_id(id, input)?;
            key = Some(Key::new(kind, id, key.take())?);
        }

        key.ok_or_else(|| malformed(input, "no segments"))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn decode_id(id: &str, input: &str) -> Result<KeyId, KeyError> {
    if id == "?" {
        return Ok(KeyId::Incomplete);
    }
    if let Some(digits) = id.strip_prefix('i') {
        return digits
            .parse::<i64>()
            .map(KeyId::Int)
            .map_err(|e| malformed(input, &format!("bad numeric id: {}", e)));
    }
    if let Some(name) = id.strip_prefix('n') {
        return Ok(KeyId::Name(unescape(name, input)?));
    }
    Err(malformed(input, "unknown id tag"))
}

fn escape_into(raw: &str, out: &mut String) {
    for c in raw.chars() {
        match c {
            '%' => out.push_str("%25"),
            ':' => out.push_str("%3A"),
            '/' => out.push_str("%2F"),
            other => out.push(other),
        }
    }
}

fn unescape(escaped: &str, input: &str) -> Result<String, KeyError> {
    let bytes = escaped.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .ok_or_else(|| malformed(input, "truncated escape"))?;
                if !hex.iter().all(u8::is_ascii_hexdigit) {
                    return Err(malformed(input, "invalid escape"));
                }
                let high = hex_value(hex[0]);
                let low = hex_value(hex[1]);
                out.push(high << 4 | low);
                i += 3;
            }
            b':' | b'/' => return Err(malformed(input, "unescaped separator")),
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(out).map_err(|_| malformed(input, "escape produced invalid utf-8"))
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

fn malformed(input: &str, reason: &str) -> KeyError {
    KeyError::Malformed {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}
