//! Fuzz target for codec round-trip consistency
//!
//! Builds arbitrary term trees, encodes them, and decodes the result. Any
//! term the encoder accepts must decode back to the same tree (modulo the
//! small-integer normalization: non-negative values ≤ 255 always come back
//! unsigned). Encoder rejections (depth budget) are acceptable; mismatches
//! and panics are not.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use shardcast_etf::{Term, decode, encode};

#[derive(Debug, Arbitrary)]
enum FuzzTerm {
    Null,
    Bool(bool),
    Int32(i32),
    UInt32(u32),
    Double(f64),
    Str(Vec<u8>),
    Array(Vec<FuzzTerm>),
    Map(Vec<(FuzzTerm, FuzzTerm)>),
}

fn build(input: FuzzTerm) -> Term {
    match input {
        FuzzTerm::Null => Term::Null,
        FuzzTerm::Bool(value) => Term::Bool(value),
        FuzzTerm::Int32(value) => Term::Int32(value),
        FuzzTerm::UInt32(value) => Term::UInt32(value),
        FuzzTerm::Double(value) => Term::Double(value),
        FuzzTerm::Str(bytes) => Term::str(bytes),
        FuzzTerm::Array(items) => Term::Array(items.into_iter().map(build).collect()),
        FuzzTerm::Map(pairs) => {
            Term::map(pairs.into_iter().map(|(key, value)| (build(key), build(value))))
        }
    }
}

fn normalize(term: Term) -> Term {
    match term {
        Term::Int32(value) if (0..=255).contains(&value) => Term::UInt32(value as u32),
        Term::Array(items) => Term::Array(items.into_iter().map(normalize).collect()),
        Term::Map(entries) => {
            Term::map(entries.into_iter().map(|(key, value)| (normalize(key), normalize(value))))
        }
        other => other,
    }
}

fuzz_target!(|input: FuzzTerm| {
    let term = build(input);

    if let Ok(wire) = encode(&term) {
        let back = decode(&wire).expect("own encodings must decode");
        assert_eq!(back, normalize(term));
    }
});
