//! ETF encoder.
//!
//! Serializes a [`Term`] tree into a self-contained frame starting with the
//! version byte. Encoding is a pure function of the term: scalars have a
//! single canonical form and maps iterate in the [`Term`] total order.

use crate::{DEPTH_LIMIT, FORMAT_VERSION, Term, errors::EncodeError, tags};

/// Initial output capacity; the buffer grows geometrically past this.
const INITIAL_CAPACITY: usize = 1024;

/// Encode a term into a complete ETF frame.
///
/// # Errors
///
/// - [`EncodeError::DepthLimitExceeded`] for nesting past [`DEPTH_LIMIT`]
/// - [`EncodeError::LengthOverflow`] for collections the wire cannot carry
pub fn encode(term: &Term) -> Result<Vec<u8>, EncodeError> {
    let mut encoder = Encoder::new();
    encoder.write(term)?;
    Ok(encoder.into_bytes())
}

/// Incremental frame builder.
///
/// Starts with the version byte already appended; [`Encoder::write`] may be
/// called repeatedly to concatenate terms into one buffer (the gateway only
/// ever sends one term per frame, but nothing here requires that).
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    /// Fresh buffer holding only the version byte.
    #[must_use]
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(INITIAL_CAPACITY);
        buf.push(FORMAT_VERSION);
        Self { buf }
    }

    /// Append one term.
    ///
    /// # Errors
    ///
    /// See [`encode`]. The buffer contents are unspecified after an error.
    pub fn write(&mut self, term: &Term) -> Result<(), EncodeError> {
        self.pack(term, DEPTH_LIMIT as i32)
    }

    /// Finish and take the encoded bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    fn pack(&mut self, term: &Term, budget: i32) -> Result<(), EncodeError> {
        if budget < 0 {
            return Err(EncodeError::DepthLimitExceeded);
        }

        match term {
            // `undefined` has no wire form of its own; both absent variants
            // travel as the nil atom.
            Term::Undefined | Term::Null => self.append_small_atom(b"nil"),
            Term::Bool(true) => self.append_small_atom(b"true"),
            Term::Bool(false) => self.append_small_atom(b"false"),
            Term::Int32(value) => {
                if (0..=255).contains(value) {
                    self.append_small_integer(*value as u8);
                } else {
                    self.buf.push(tags::INTEGER);
                    self.buf.extend_from_slice(&value.to_be_bytes());
                }
            },
            Term::UInt32(value) => {
                if *value <= 255 {
                    self.append_small_integer(*value as u8);
                } else {
                    self.append_small_big(*value);
                }
            },
            Term::Double(value) => {
                self.buf.push(tags::NEW_FLOAT);
                self.buf.extend_from_slice(&value.to_bits().to_be_bytes());
            },
            Term::Str(bytes) => {
                let len = u32::try_from(bytes.len()).map_err(|_| EncodeError::LengthOverflow {
                    kind: "binary",
                    len: bytes.len(),
                })?;
                self.buf.push(tags::BINARY);
                self.buf.extend_from_slice(&len.to_be_bytes());
                self.buf.extend_from_slice(bytes);
            },
            Term::Array(items) => {
                if items.is_empty() {
                    self.buf.push(tags::NIL);
                } else {
                    let len = check_len("list", items.len())?;
                    self.buf.push(tags::LIST);
                    self.buf.extend_from_slice(&len.to_be_bytes());
                    for item in items {
                        self.pack(item, budget - 1)?;
                    }
                    self.buf.push(tags::NIL);
                }
            },
            Term::Map(entries) => {
                let len = check_len("map", entries.len())?;
                self.buf.push(tags::MAP);
                self.buf.extend_from_slice(&len.to_be_bytes());
                for (key, value) in entries {
                    self.pack(key, budget - 1)?;
                    self.pack(value, budget - 1)?;
                }
            },
        }

        Ok(())
    }

    fn append_small_atom(&mut self, name: &[u8]) {
        self.buf.push(tags::SMALL_ATOM);
        self.buf.push(name.len() as u8);
        self.buf.extend_from_slice(name);
    }

    fn append_small_integer(&mut self, value: u8) {
        self.buf.push(tags::SMALL_INTEGER);
        self.buf.push(value);
    }

    /// Unsigned values past the small-integer range travel as SMALL_BIG with
    /// little-endian magnitude bytes and sign 0.
    fn append_small_big(&mut self, value: u32) {
        let mut magnitude = value;
        let mut digits = [0u8; 4];
        let mut count = 0;
        while magnitude > 0 {
            digits[count] = (magnitude & 0xFF) as u8;
            magnitude >>= 8;
            count += 1;
        }

        self.buf.push(tags::SMALL_BIG);
        self.buf.push(count as u8);
        self.buf.push(0);
        self.buf.extend_from_slice(&digits[..count]);
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Collection lengths use a u32 field, with the maximum reserved.
fn check_len(kind: &'static str, len: usize) -> Result<u32, EncodeError> {
    if len > (u32::MAX - 1) as usize {
        return Err(EncodeError::LengthOverflow { kind, len });
    }

    Ok(len as u32)
}
