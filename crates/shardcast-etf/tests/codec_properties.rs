//! Property-based tests for the ETF codec.
//!
//! The codec laws, checked for ALL representable terms rather than specific
//! examples:
//!
//! 1. `decode(encode(v)) == v` after integer normalization (a non-negative
//!    value ≤ 255 always comes back as `UInt32`, whichever signed variant it
//!    left as)
//! 2. every encoding leads with the version byte
//! 3. malformed input fails without panicking or reading past the buffer
//! 4. a zlib-wrapped encoding decodes to the same term

use std::io::Write;

use flate2::{Compression, write::ZlibEncoder};
use proptest::prelude::*;
use shardcast_etf::{FORMAT_VERSION, Term, decode, encode};

/// Arbitrary terms, excluding `Undefined` (it has no wire form of its own:
/// it shares the nil atom and decodes back as `Null`).
fn arbitrary_term() -> impl Strategy<Value = Term> {
    let leaf = prop_oneof![
        Just(Term::Null),
        any::<bool>().prop_map(Term::Bool),
        any::<i32>().prop_map(Term::Int32),
        any::<u32>().prop_map(Term::UInt32),
        any::<f64>().prop_map(Term::Double),
        prop::collection::vec(any::<u8>(), 0..64).prop_map(Term::str),
    ];

    leaf.prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..8).prop_map(Term::Array),
            prop::collection::vec((inner.clone(), inner), 0..8).prop_map(Term::map),
        ]
    })
}

/// Law 1's normalization: the small-integer window is unsigned on the wire,
/// so a round trip folds `Int32(0..=255)` into `UInt32`.
fn normalize(term: Term) -> Term {
    match term {
        Term::Int32(value) if (0..=255).contains(&value) => Term::UInt32(value as u32),
        Term::Array(items) => Term::Array(items.into_iter().map(normalize).collect()),
        Term::Map(entries) => {
            Term::map(entries.into_iter().map(|(key, value)| (normalize(key), normalize(value))))
        },
        other => other,
    }
}

/// Wrap an encoded frame's body in a COMPRESSED (tag 80) envelope.
fn compress_frame(encoded: &[u8]) -> Vec<u8> {
    let body = &encoded[1..]; // compressed payloads carry no version byte

    let mut deflater = ZlibEncoder::new(Vec::new(), Compression::default());
    deflater.write_all(body).expect("in-memory deflate cannot fail");
    let stream = deflater.finish().expect("in-memory deflate cannot fail");

    let mut frame = vec![FORMAT_VERSION, 80];
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&stream);
    frame
}

proptest! {
    #[test]
    fn encode_decode_round_trip(term in arbitrary_term()) {
        let wire = encode(&term).expect("generated terms stay within limits");
        prop_assert_eq!(wire[0], FORMAT_VERSION);

        let back = decode(&wire).expect("own encodings must decode");
        prop_assert_eq!(back, normalize(term));
    }

    #[test]
    fn compressed_round_trip(term in arbitrary_term()) {
        let wire = encode(&term).expect("generated terms stay within limits");
        let squeezed = compress_frame(&wire);

        let back = decode(&squeezed).expect("compressed encodings must decode");
        prop_assert_eq!(back, normalize(term));
    }

    #[test]
    fn strict_prefixes_never_decode(term in arbitrary_term()) {
        let wire = encode(&term).expect("generated terms stay within limits");

        // A term is self-delimiting, so chopping any suffix leaves the parser
        // mid-term. The cut just past the version byte is the base case.
        for cut in [1, wire.len() / 2, wire.len() - 1] {
            prop_assert!(decode(&wire[..cut]).is_err(), "prefix of {cut} bytes decoded");
        }
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
        // Fuzz-shaped smoke test: any outcome is fine except a panic or an
        // out-of-bounds read.
        let _ = decode(&bytes);
    }
}

#[test]
fn undefined_decodes_as_null() {
    let wire = encode(&Term::Undefined).expect("scalar encode");
    assert_eq!(decode(&wire), Ok(Term::Null));
}

#[test]
fn unsigned_values_round_trip_through_small_big() {
    for value in [256u32, 65_536, u32::MAX] {
        let wire = encode(&Term::UInt32(value)).expect("scalar encode");
        assert_eq!(decode(&wire), Ok(Term::UInt32(value)), "value {value}");
    }
}

#[test]
fn compressed_dispatch_frame() {
    // The shape the gateway actually compresses: a full dispatch envelope.
    let payload = Term::map([
        (Term::from("op"), Term::UInt32(0)),
        (Term::from("s"), Term::UInt32(42)),
        (Term::from("t"), Term::from("MESSAGE_CREATE")),
        (
            Term::from("d"),
            Term::map([(Term::from("content"), Term::from("hello world"))]),
        ),
    ]);

    let wire = encode(&payload).expect("payload encode");
    assert_eq!(decode(&compress_frame(&wire)), Ok(payload));
}
