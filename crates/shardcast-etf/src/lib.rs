//! External Term Format codec.
//!
//! The gateway speaks ETF (Erlang's external binary term format) rather than
//! JSON. This crate implements the subset the gateway uses: a dynamic term
//! tree ([`Term`]), a bounds-checked decoder with zlib support, and a
//! deterministic encoder.
//!
//! # Components
//!
//! - [`Term`]: tagged dynamic value with a total order (map keys rely on it)
//! - [`decode`] / [`Decoder`]: wire bytes → term tree
//! - [`encode`] / [`Encoder`]: term tree → wire bytes
//!
//! # Wire format
//!
//! Every top-level frame starts with the version byte `131`. Multi-byte
//! integers are big-endian. A `COMPRESSED` (tag 80) term wraps a zlib stream
//! whose inflated contents are a version-less term.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod decoder;
mod encoder;
mod errors;
mod term;

pub use decoder::{Decoder, decode};
pub use encoder::{Encoder, encode};
pub use errors::{DecodeError, EncodeError};
pub use term::Term;

/// ETF format version byte; the first byte of every uncompressed frame.
pub const FORMAT_VERSION: u8 = 131;

/// Depth budget shared by encoder and decoder.
///
/// The wire format is a tree; nesting deeper than this is treated as
/// malformed input rather than a reason to exhaust the stack.
pub const DEPTH_LIMIT: u32 = 256;

/// ETF term tags used by the gateway subset.
pub(crate) mod tags {
    pub const NEW_FLOAT: u8 = 70; // [u64 BE IEEE-754]
    pub const COMPRESSED: u8 = 80; // [u32 inflated size, zlib stream]
    pub const SMALL_INTEGER: u8 = 97; // [u8]
    pub const INTEGER: u8 = 98; // [i32]
    pub const FLOAT: u8 = 99; // [31-byte "%.20e" string]
    pub const ATOM: u8 = 100; // [u16 len, bytes]
    pub const REFERENCE: u8 = 101; // [atom node, u32 id, u8 creation]
    pub const PORT: u8 = 102; // [atom node, u32 id, u8 creation]
    pub const PID: u8 = 103; // [atom node, u32 id, u32 serial, u8 creation]
    pub const SMALL_TUPLE: u8 = 104; // [u8 arity, elements]
    pub const LARGE_TUPLE: u8 = 105; // [u32 arity, elements]
    pub const NIL: u8 = 106; // empty list
    pub const STRING: u8 = 107; // [u16 len, bytes]
    pub const LIST: u8 = 108; // [u32 len, elements, tail]
    pub const BINARY: u8 = 109; // [u32 len, bytes]
    pub const SMALL_BIG: u8 = 110; // [u8 n, u8 sign, n LE bytes]
    pub const LARGE_BIG: u8 = 111; // [u32 n, u8 sign, n LE bytes]
    pub const EXPORT: u8 = 113; // [atom module, atom function, small int arity]
    pub const NEW_REFERENCE: u8 = 114; // [u16 len, atom node, u8 creation, len*u32]
    pub const SMALL_ATOM: u8 = 115; // [u8 len, bytes]
    pub const MAP: u8 = 116; // [u32 arity, pairs]
}
