//! Dynamic term tree.
//!
//! Payloads stay dynamic end to end: the decoder produces a [`Term`], the
//! session and broker layers read fields out of it, and the encoder consumes
//! it. No higher-level typing is layered on top.

use std::{cmp::Ordering, collections::BTreeMap};

use bytes::Bytes;

/// A decoded ETF value.
///
/// # Invariants
///
/// - Exactly one active variant.
/// - `Str` holds raw bytes; `BINARY` carries both text and opaque blobs, so
///   UTF-8 is never required.
/// - Map keys are ordered by [`Term::cmp`]: variant ordinal first (in the
///   declaration order below), then the payload's natural order. The encoder
///   iterates maps in this order and the decoder rebuilds them under it, so
///   encoding is deterministic.
///
/// Terms are value-semantic: `clone` yields an independent copy.
#[derive(Debug, Clone, Default)]
pub enum Term {
    /// Absent/poisoned value. Produced by a failed decode.
    #[default]
    Undefined,
    /// The `nil`/`null` atom.
    Null,
    /// The `true`/`false` atoms.
    Bool(bool),
    /// INTEGER (tag 98) and negative small bigs.
    Int32(i32),
    /// SMALL_INTEGER (tag 97) and non-negative small bigs.
    UInt32(u32),
    /// NEW_FLOAT / legacy FLOAT.
    Double(f64),
    /// BINARY (tag 109) and non-literal atoms.
    Str(Bytes),
    /// Lists, tuples and STRING byte sequences.
    Array(Vec<Term>),
    /// MAP (tag 116).
    Map(BTreeMap<Term, Term>),
}

impl Term {
    /// Build a `Str` term from anything byte-like.
    pub fn str(bytes: impl Into<Bytes>) -> Self {
        Self::Str(bytes.into())
    }

    /// Build a `Map` term from key/value pairs. Later duplicates win.
    pub fn map(pairs: impl IntoIterator<Item = (Term, Term)>) -> Self {
        Self::Map(pairs.into_iter().collect())
    }

    /// Variant ordinal used as the primary sort key for map ordering.
    const fn ordinal(&self) -> u8 {
        match self {
            Self::Undefined => 0,
            Self::Null => 1,
            Self::Bool(_) => 2,
            Self::Int32(_) => 3,
            Self::UInt32(_) => 4,
            Self::Double(_) => 5,
            Self::Str(_) => 6,
            Self::Array(_) => 7,
            Self::Map(_) => 8,
        }
    }

    /// Length of `Str`/`Array`/`Map`; 0 for every scalar.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Str(bytes) => bytes.len(),
            Self::Array(items) => items.len(),
            Self::Map(entries) => entries.len(),
            _ => 0,
        }
    }

    /// Whether [`Term::len`] is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether this is `Undefined`.
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Whether this is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Whether this is a map.
    #[must_use]
    pub fn is_map(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    /// Whether this is an array.
    #[must_use]
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Array element at `index`. `None` for non-arrays and out-of-range.
    #[must_use]
    pub fn element(&self, index: usize) -> Option<&Term> {
        match self {
            Self::Array(items) => items.get(index),
            _ => None,
        }
    }

    /// Map value under `key`. `None` for non-maps and missing keys.
    #[must_use]
    pub fn get(&self, key: &Term) -> Option<&Term> {
        match self {
            Self::Map(entries) => entries.get(key),
            _ => None,
        }
    }

    /// Map value under a string key.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&Term> {
        self.get(&Term::str(key.as_bytes().to_vec()))
    }

    /// Boolean payload, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// Integer payload widened to `i64` (`Int32` or `UInt32`).
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int32(value) => Some(i64::from(*value)),
            Self::UInt32(value) => Some(i64::from(*value)),
            _ => None,
        }
    }

    /// Float payload, if this is a `Double`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(value) => Some(*value),
            _ => None,
        }
    }

    /// Raw bytes of a `Str`.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Str(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// `Str` payload as UTF-8, when it happens to be valid.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|bytes| std::str::from_utf8(bytes).ok())
    }
}

// The total order drives BTreeMap key placement, so Eq/PartialEq must agree
// with it. Double uses `total_cmp`, making NaN keys well-defined (the source
// format never produces them, but untrusted input may).
impl Ord for Term {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int32(a), Self::Int32(b)) => a.cmp(b),
            (Self::UInt32(a), Self::UInt32(b)) => a.cmp(b),
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => a.cmp(b),
            (Self::Map(a), Self::Map(b)) => a.cmp(b),
            (a, b) => a.ordinal().cmp(&b.ordinal()),
        }
    }
}

impl PartialOrd for Term {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Term {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Term {}

impl From<bool> for Term {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Term {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<u32> for Term {
    fn from(value: u32) -> Self {
        Self::UInt32(value)
    }
}

impl From<f64> for Term {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Term {
    fn from(value: &str) -> Self {
        Self::Str(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for Term {
    fn from(value: String) -> Self {
        Self::Str(Bytes::from(value))
    }
}

impl From<Vec<Term>> for Term {
    fn from(items: Vec<Term>) -> Self {
        Self::Array(items)
    }
}

impl From<BTreeMap<Term, Term>> for Term {
    fn from(entries: BTreeMap<Term, Term>) -> Self {
        Self::Map(entries)
    }
}
