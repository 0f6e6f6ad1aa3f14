//! ETF decoder.
//!
//! Single-pass, bounds-checked parse of a byte buffer into a [`Term`] tree.
//! The decoder is poisoned by the first structural error: every later read
//! returns zero and every later term is [`Term::Undefined`]. There is no
//! recoverable partial parse.
//!
//! Nesting is bounded by [`DEPTH_LIMIT`] so adversarial input cannot grow the
//! stack without limit.

use bytes::Bytes;
use flate2::{Decompress, FlushDecompress, Status};

use crate::{DEPTH_LIMIT, FORMAT_VERSION, Term, errors::DecodeError, tags};

/// Byte length of the legacy `FLOAT` (tag 99) payload.
const LEGACY_FLOAT_LEN: usize = 31;

/// Decode a complete ETF frame (leading version byte included).
///
/// Thin wrapper over [`Decoder`] that surfaces the poison state as a
/// `Result`.
///
/// # Errors
///
/// Any [`DecodeError`]; the partial term is discarded.
pub fn decode(bytes: &[u8]) -> Result<Term, DecodeError> {
    let mut decoder = Decoder::new(bytes, false);
    let term = decoder.decode_term();
    match decoder.into_error() {
        Some(error) => Err(error),
        None => Ok(term),
    }
}

/// Streaming ETF term reader.
///
/// # Invariants
///
/// - Reads never pass the end of the input; an out-of-bounds read poisons the
///   decoder and yields zero.
/// - Once poisoned, [`Decoder::decode_term`] returns [`Term::Undefined`]
///   forever and [`Decoder::error`] reports the first failure.
pub struct Decoder<'a> {
    data: &'a [u8],
    offset: usize,
    depth: u32,
    error: Option<DecodeError>,
}

impl<'a> Decoder<'a> {
    /// Create a decoder over `data`.
    ///
    /// When `skip_version` is false the first byte must be the
    /// [`FORMAT_VERSION`] marker; inflated `COMPRESSED` subtrees carry no
    /// marker and are parsed with `skip_version = true`.
    #[must_use]
    pub fn new(data: &'a [u8], skip_version: bool) -> Self {
        let mut decoder = Self { data, offset: 0, depth: 0, error: None };

        if !skip_version {
            let version = decoder.read_u8();
            if decoder.error.is_none() && version != FORMAT_VERSION {
                decoder.fail(DecodeError::BadVersion(version));
            }
        }

        decoder
    }

    /// Parse one term at the current offset.
    ///
    /// Returns [`Term::Undefined`] if the decoder is (or becomes) poisoned.
    pub fn decode_term(&mut self) -> Term {
        if self.error.is_some() {
            return Term::Undefined;
        }

        if self.depth >= DEPTH_LIMIT {
            self.fail(DecodeError::DepthLimitExceeded);
            return Term::Undefined;
        }

        if self.offset >= self.data.len() {
            self.fail(DecodeError::Truncated { needed: 1, offset: self.offset });
            return Term::Undefined;
        }

        self.depth += 1;
        let tag = self.read_u8();
        let term = match tag {
            tags::SMALL_INTEGER => Term::UInt32(u32::from(self.read_u8())),
            tags::INTEGER => Term::Int32(self.read_u32() as i32),
            tags::FLOAT => self.legacy_float(),
            tags::NEW_FLOAT => Term::Double(f64::from_bits(self.read_u64())),
            tags::ATOM => {
                let len = usize::from(self.read_u16());
                self.atom(len)
            },
            tags::SMALL_ATOM => {
                let len = usize::from(self.read_u8());
                self.atom(len)
            },
            tags::SMALL_TUPLE => {
                let arity = u32::from(self.read_u8());
                self.sequence(arity)
            },
            tags::LARGE_TUPLE => {
                let arity = self.read_u32();
                self.sequence(arity)
            },
            tags::NIL => Term::Array(Vec::new()),
            tags::STRING => self.byte_list(),
            tags::LIST => self.list(),
            tags::MAP => self.map(),
            tags::BINARY => self.binary(),
            tags::SMALL_BIG => {
                let digits = u32::from(self.read_u8());
                self.big(digits)
            },
            tags::LARGE_BIG => {
                let digits = self.read_u32();
                self.big(digits)
            },
            tags::REFERENCE => self.reference(),
            tags::NEW_REFERENCE => self.new_reference(),
            tags::PORT => self.port(),
            tags::PID => self.pid(),
            tags::EXPORT => self.export(),
            tags::COMPRESSED => self.compressed(),
            other => {
                self.fail(DecodeError::UnknownTag(other));
                Term::Undefined
            },
        };
        self.depth -= 1;

        if self.error.is_some() { Term::Undefined } else { term }
    }

    /// First error encountered, if the decoder is poisoned.
    #[must_use]
    pub fn error(&self) -> Option<&DecodeError> {
        self.error.as_ref()
    }

    /// Whether the decoder has been poisoned.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        self.error.is_some()
    }

    /// Consume the decoder, yielding the poison error if any.
    #[must_use]
    pub fn into_error(self) -> Option<DecodeError> {
        self.error
    }

    fn fail(&mut self, error: DecodeError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.offset)
    }

    fn read_u8(&mut self) -> u8 {
        match self.data.get(self.offset) {
            Some(&byte) => {
                self.offset += 1;
                byte
            },
            None => {
                self.fail(DecodeError::Truncated { needed: 1, offset: self.offset });
                0
            },
        }
    }

    fn read_u16(&mut self) -> u16 {
        self.read_slice(2).map_or(0, |bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32(&mut self) -> u32 {
        self.read_slice(4)
            .map_or(0, |bytes| u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_u64(&mut self) -> u64 {
        self.read_slice(8).map_or(0, |bytes| {
            let mut be = [0u8; 8];
            be.copy_from_slice(bytes);
            u64::from_be_bytes(be)
        })
    }

    /// Borrow `len` bytes at the cursor, or poison on a short buffer.
    fn read_slice(&mut self, len: usize) -> Option<&'a [u8]> {
        let end = self.offset.checked_add(len);
        match end {
            Some(end) if end <= self.data.len() => {
                let slice = &self.data[self.offset..end];
                self.offset = end;
                Some(slice)
            },
            _ => {
                self.fail(DecodeError::Truncated { needed: len, offset: self.offset });
                None
            },
        }
    }

    /// Atom payloads map onto term literals; anything else is kept as bytes.
    fn atom(&mut self, len: usize) -> Term {
        let Some(bytes) = self.read_slice(len) else {
            return Term::Undefined;
        };

        match bytes {
            b"nil" | b"null" => Term::Null,
            b"true" => Term::Bool(true),
            b"false" => Term::Bool(false),
            _ => Term::Str(Bytes::copy_from_slice(bytes)),
        }
    }

    /// Shared body of tuples and list elements.
    fn sequence(&mut self, count: u32) -> Term {
        // Every element costs at least one tag byte, which caps any honest
        // arity claim at the remaining input length.
        let mut items = Vec::with_capacity((count as usize).min(self.remaining()));
        for _ in 0..count {
            let value = self.decode_term();
            if self.error.is_some() {
                return Term::Undefined;
            }
            items.push(value);
        }

        Term::Array(items)
    }

    fn list(&mut self) -> Term {
        let len = self.read_u32();
        let items = self.sequence(len);
        if self.error.is_some() {
            return Term::Undefined;
        }

        let tail = self.read_u8();
        if self.error.is_none() && tail != tags::NIL {
            self.fail(DecodeError::BadListTail { found: tail });
            return Term::Undefined;
        }

        items
    }

    /// STRING (tag 107): a compact byte list, surfaced as an array of
    /// integers like any other list.
    fn byte_list(&mut self) -> Term {
        let len = usize::from(self.read_u16());
        let Some(bytes) = self.read_slice(len) else {
            return Term::Undefined;
        };

        Term::Array(bytes.iter().map(|&byte| Term::UInt32(u32::from(byte))).collect())
    }

    fn map(&mut self) -> Term {
        let len = self.read_u32();
        let mut entries = std::collections::BTreeMap::new();

        for _ in 0..len {
            let key = self.decode_term();
            let value = self.decode_term();
            if self.error.is_some() {
                return Term::Undefined;
            }
            entries.insert(key, value);
        }

        Term::Map(entries)
    }

    fn binary(&mut self) -> Term {
        let len = self.read_u32() as usize;
        let Some(bytes) = self.read_slice(len) else {
            return Term::Undefined;
        };

        Term::Str(Bytes::copy_from_slice(bytes))
    }

    /// SMALL_BIG / LARGE_BIG.
    ///
    /// Digits are little-endian; anything wider than the 64-bit accumulator
    /// is rejected. Values that fit a 32-bit integer collapse into
    /// `UInt32`/`Int32`; wider magnitudes are surfaced as their decimal ASCII
    /// rendering, matching how the gateway transmits snowflake IDs.
    fn big(&mut self, digits: u32) -> Term {
        let sign = self.read_u8();

        if digits > 8 {
            self.fail(DecodeError::BigIntTooWide { digits });
            return Term::Undefined;
        }

        let mut value: u64 = 0;
        for i in 0..digits {
            value |= u64::from(self.read_u8()) << (8 * i);
        }
        if self.error.is_some() {
            return Term::Undefined;
        }

        if digits <= 4 {
            if sign == 0 {
                return Term::UInt32(value as u32);
            }
            // Negation only when the 32-bit sign bit is free to carry it.
            if value & (1 << 31) == 0 {
                return Term::Int32(-(value as i32));
            }
        }

        let decimal = if sign == 0 { format!("{value}") } else { format!("-{value}") };
        Term::Str(Bytes::from(decimal))
    }

    /// Legacy FLOAT (tag 99): 31 bytes of `%.20e` ASCII, NUL-padded.
    fn legacy_float(&mut self) -> Term {
        let Some(raw) = self.read_slice(LEGACY_FLOAT_LEN) else {
            return Term::Undefined;
        };

        let end = raw.iter().position(|&byte| byte == 0).unwrap_or(raw.len());
        let parsed = std::str::from_utf8(&raw[..end])
            .ok()
            .and_then(|text| text.trim().parse::<f64>().ok());

        match parsed {
            Some(value) => Term::Double(value),
            None => {
                self.fail(DecodeError::InvalidFloat);
                Term::Undefined
            },
        }
    }

    /// COMPRESSED (tag 80): u32 inflated size, then a zlib stream. The outer
    /// cursor advances by exactly the bytes the inflater consumed.
    fn compressed(&mut self) -> Term {
        let inflated_len = self.read_u32() as usize;
        if self.error.is_some() {
            return Term::Undefined;
        }

        let mut inflated = vec![0u8; inflated_len];
        let mut stream = Decompress::new(true);
        match stream.decompress(&self.data[self.offset..], &mut inflated, FlushDecompress::Finish)
        {
            Ok(Status::StreamEnd) => {},
            Ok(_) => {
                self.fail(DecodeError::Inflate("zlib stream did not finish".to_owned()));
                return Term::Undefined;
            },
            Err(error) => {
                self.fail(DecodeError::Inflate(error.to_string()));
                return Term::Undefined;
            },
        }
        self.offset += stream.total_in() as usize;

        let produced = stream.total_out() as usize;
        let mut child = Decoder::new(&inflated[..produced], true);
        child.depth = self.depth;
        let term = child.decode_term();
        if let Some(error) = child.into_error() {
            self.fail(error);
            return Term::Undefined;
        }

        term
    }

    fn reference(&mut self) -> Term {
        let node = self.decode_term();
        let id = Term::Array(vec![Term::UInt32(self.read_u32())]);
        let creation = Term::UInt32(u32::from(self.read_u8()));
        if self.error.is_some() {
            return Term::Undefined;
        }

        Term::map([
            (Term::from("node"), node),
            (Term::from("id"), id),
            (Term::from("creation"), creation),
        ])
    }

    fn new_reference(&mut self) -> Term {
        let len = self.read_u16();
        let node = self.decode_term();
        let creation = Term::UInt32(u32::from(self.read_u8()));

        let mut ids = Vec::with_capacity(usize::from(len));
        for _ in 0..len {
            ids.push(Term::UInt32(self.read_u32()));
        }
        if self.error.is_some() {
            return Term::Undefined;
        }

        Term::map([
            (Term::from("node"), node),
            (Term::from("creation"), creation),
            (Term::from("id"), Term::Array(ids)),
        ])
    }

    fn port(&mut self) -> Term {
        let node = self.decode_term();
        let id = Term::UInt32(self.read_u32());
        let creation = Term::UInt32(u32::from(self.read_u8()));
        if self.error.is_some() {
            return Term::Undefined;
        }

        Term::map([
            (Term::from("node"), node),
            (Term::from("id"), id),
            (Term::from("creation"), creation),
        ])
    }

    fn pid(&mut self) -> Term {
        let node = self.decode_term();
        let id = Term::UInt32(self.read_u32());
        let serial = Term::UInt32(self.read_u32());
        let creation = Term::UInt32(u32::from(self.read_u8()));
        if self.error.is_some() {
            return Term::Undefined;
        }

        Term::map([
            (Term::from("node"), node),
            (Term::from("id"), id),
            (Term::from("serial"), serial),
            (Term::from("creation"), creation),
        ])
    }

    fn export(&mut self) -> Term {
        let module = self.decode_term();
        let function = self.decode_term();
        let arity = self.decode_term();
        if self.error.is_some() {
            return Term::Undefined;
        }

        Term::map([
            (Term::from("mod"), module),
            (Term::from("fun"), function),
            (Term::from("arity"), arity),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(tail: &[u8]) -> Vec<u8> {
        let mut frame = vec![FORMAT_VERSION];
        frame.extend_from_slice(tail);
        frame
    }

    #[test]
    fn rejects_wrong_version_byte() {
        let result = decode(&[130, 106]);
        assert_eq!(result, Err(DecodeError::BadVersion(130)));
    }

    #[test]
    fn rejects_empty_input() {
        assert!(matches!(decode(&[]), Err(DecodeError::Truncated { .. })));
        assert!(matches!(decode(&[FORMAT_VERSION]), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn atom_literals_fold_to_terms() {
        assert_eq!(decode(&framed(&[115, 3, b'n', b'i', b'l'])), Ok(Term::Null));
        assert_eq!(decode(&framed(&[115, 4, b'n', b'u', b'l', b'l'])), Ok(Term::Null));
        assert_eq!(decode(&framed(&[115, 4, b't', b'r', b'u', b'e'])), Ok(Term::Bool(true)));
        assert_eq!(
            decode(&framed(&[100, 0, 5, b'f', b'a', b'l', b's', b'e'])),
            Ok(Term::Bool(false))
        );
        assert_eq!(decode(&framed(&[115, 2, b'o', b'k'])), Ok(Term::from("ok")));
    }

    #[test]
    fn small_integer_is_unsigned() {
        assert_eq!(decode(&framed(&[97, 255])), Ok(Term::UInt32(255)));
    }

    #[test]
    fn integer_is_signed() {
        assert_eq!(decode(&framed(&[98, 0xFF, 0xFF, 0xFF, 0xFF])), Ok(Term::Int32(-1)));
    }

    #[test]
    fn string_becomes_integer_array() {
        let term = decode(&framed(&[107, 0, 2, 65, 66])).unwrap();
        assert_eq!(term, Term::Array(vec![Term::UInt32(65), Term::UInt32(66)]));
    }

    #[test]
    fn list_requires_nil_tail() {
        // [1 | 2] — improper list, tail is a small integer instead of NIL.
        let result = decode(&framed(&[108, 0, 0, 0, 1, 97, 1, 97, 2]));
        assert_eq!(result, Err(DecodeError::BadListTail { found: 97 }));
    }

    #[test]
    fn small_big_sign_reconstruction() {
        // 2 digits, sign 1, magnitude 0x0201 = 513.
        assert_eq!(decode(&framed(&[110, 2, 1, 0x01, 0x02])), Ok(Term::Int32(-513)));
        // Same magnitude unsigned.
        assert_eq!(decode(&framed(&[110, 2, 0, 0x01, 0x02])), Ok(Term::UInt32(513)));
    }

    #[test]
    fn negative_big_with_sign_bit_set_falls_back_to_decimal() {
        // 4 digits, sign 1, magnitude 0x80000000: cannot negate in i32.
        let term = decode(&framed(&[110, 4, 1, 0, 0, 0, 0x80])).unwrap();
        assert_eq!(term, Term::from("-2147483648"));
    }

    #[test]
    fn wide_big_renders_as_decimal_string() {
        // A snowflake-sized value: 8 digits, unsigned.
        let value: u64 = 290_926_792_518_094_274;
        let mut payload = vec![110, 8, 0];
        payload.extend_from_slice(&value.to_le_bytes());
        assert_eq!(decode(&framed(&payload)), Ok(Term::from("290926792518094274")));
    }

    #[test]
    fn big_wider_than_eight_bytes_is_fatal() {
        let mut payload = vec![110, 9, 0];
        payload.extend_from_slice(&[0; 9]);
        assert_eq!(decode(&framed(&payload)), Err(DecodeError::BigIntTooWide { digits: 9 }));
    }

    #[test]
    fn legacy_float_parses_scientific_notation() {
        let mut payload = vec![99];
        payload.extend_from_slice(b"2.50000000000000000000e+00\0\0\0\0\0");
        assert_eq!(decode(&framed(&payload)), Ok(Term::Double(2.5)));
    }

    #[test]
    fn legacy_float_garbage_is_fatal() {
        let mut payload = vec![99];
        payload.extend_from_slice(&[b'x'; LEGACY_FLOAT_LEN]);
        assert_eq!(decode(&framed(&payload)), Err(DecodeError::InvalidFloat));
    }

    #[test]
    fn unknown_tag_is_fatal() {
        assert_eq!(decode(&framed(&[77, 0])), Err(DecodeError::UnknownTag(77)));
    }

    #[test]
    fn poisoned_decoder_stays_poisoned() {
        let mut decoder = Decoder::new(&[FORMAT_VERSION, 97], false);
        assert_eq!(decoder.decode_term(), Term::Undefined);
        assert!(decoder.is_invalid());

        // Later calls keep yielding Undefined and the original error.
        assert_eq!(decoder.decode_term(), Term::Undefined);
        assert!(matches!(decoder.error(), Some(DecodeError::Truncated { .. })));
    }

    #[test]
    fn nesting_bounded_by_depth_budget() {
        // 300 one-element list headers, never terminated: deeper than the
        // budget before the truncation would even be noticed.
        let mut payload = Vec::new();
        for _ in 0..300 {
            payload.extend_from_slice(&[108, 0, 0, 0, 1]);
        }
        assert_eq!(decode(&framed(&payload)), Err(DecodeError::DepthLimitExceeded));
    }

    #[test]
    fn pid_becomes_structured_map() {
        let mut payload = vec![103];
        payload.extend_from_slice(&[115, 4, b'n', b'o', b'd', b'e']); // node atom
        payload.extend_from_slice(&[0, 0, 0, 7]); // id
        payload.extend_from_slice(&[0, 0, 0, 1]); // serial
        payload.push(3); // creation

        let term = decode(&framed(&payload)).unwrap();
        assert_eq!(term.get_str("node"), Some(&Term::from("node")));
        assert_eq!(term.get_str("id"), Some(&Term::UInt32(7)));
        assert_eq!(term.get_str("serial"), Some(&Term::UInt32(1)));
        assert_eq!(term.get_str("creation"), Some(&Term::UInt32(3)));
    }

    #[test]
    fn new_reference_collects_id_words() {
        let mut payload = vec![114, 0, 2]; // two id words
        payload.extend_from_slice(&[115, 1, b'n']); // node atom
        payload.push(1); // creation
        payload.extend_from_slice(&[0, 0, 0, 5, 0, 0, 0, 6]);

        let term = decode(&framed(&payload)).unwrap();
        assert_eq!(
            term.get_str("id"),
            Some(&Term::Array(vec![Term::UInt32(5), Term::UInt32(6)]))
        );
        assert_eq!(term.get_str("creation"), Some(&Term::UInt32(1)));
    }
}
