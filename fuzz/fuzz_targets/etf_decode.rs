//! Fuzz target for the ETF decoder
//!
//! Feeds arbitrary byte sequences through `decode` to find:
//! - Parser crashes or panics
//! - Integer overflows in length calculations
//! - Buffer over-reads
//! - Unbounded recursion on nested containers
//!
//! The decoder should NEVER panic. All invalid inputs must poison the
//! decoder and surface a structured error.

#![no_main]

use libfuzzer_sys::fuzz_target;
use shardcast_etf::decode;

fuzz_target!(|data: &[u8]| {
    // Any outcome except a panic or an out-of-bounds read is acceptable.
    let _ = decode(data);
});
