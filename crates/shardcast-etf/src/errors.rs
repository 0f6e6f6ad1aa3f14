//! Codec error types.
//!
//! Decode errors are terminal: the first structural error poisons the decoder
//! and no partial result is ever produced. Encode errors only arise from
//! values that the wire format cannot represent (overlong collections) or
//! from exceeding the nesting budget.

use thiserror::Error;

/// Errors raised while parsing an ETF byte stream.
///
/// Any of these leaves the [`crate::Decoder`] permanently invalid; subsequent
/// reads return zero values and [`crate::Term::Undefined`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// First byte of an uncompressed frame was not the version marker `131`.
    #[error("bad version byte: expected 131, found {0}")]
    BadVersion(u8),

    /// A read would pass the end of the buffer.
    #[error("truncated term: read of {needed} byte(s) at offset {offset} passes end of buffer")]
    Truncated {
        /// Bytes the read required.
        needed: usize,
        /// Offset the read started at.
        offset: usize,
    },

    /// Term tag outside the supported set.
    #[error("unsupported term tag {0}")]
    UnknownTag(u8),

    /// A LIST term whose tail is not NIL.
    #[error("list tail marker is {found}, expected NIL")]
    BadListTail {
        /// Tag found in the tail position.
        found: u8,
    },

    /// SMALL_BIG/LARGE_BIG wider than the 64-bit accumulator.
    #[error("big integer of {digits} bytes exceeds the 8-byte limit")]
    BigIntTooWide {
        /// Digit-byte count from the wire.
        digits: u32,
    },

    /// Legacy FLOAT payload that does not parse as a decimal float.
    #[error("invalid legacy float encoding")]
    InvalidFloat,

    /// zlib inflate failure inside a COMPRESSED term.
    #[error("failed to inflate compressed term: {0}")]
    Inflate(String),

    /// Nesting deeper than [`crate::DEPTH_LIMIT`].
    #[error("term nesting exceeds the depth budget")]
    DepthLimitExceeded,
}

/// Errors raised while serializing a [`crate::Term`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// Collection or binary too long for its length field.
    #[error("{kind} of {len} elements exceeds the wire format limit")]
    LengthOverflow {
        /// Which construct overflowed ("list", "map" or "binary").
        kind: &'static str,
        /// Offending length.
        len: usize,
    },

    /// Nesting deeper than the recursion budget.
    #[error("term nesting exceeds the depth budget")]
    DepthLimitExceeded,
}
