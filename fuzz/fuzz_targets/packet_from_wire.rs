//! Fuzz target for packet envelope extraction
//!
//! Arbitrary bytes through `Packet::from_wire`: the envelope reader sits
//! directly behind both the gateway socket and broker deliveries, so it sees
//! fully untrusted input. It must never panic, and on success `s`/`t` may
//! only be populated for dispatches.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use shardcast_gateway::Packet;

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = Packet::from_wire(Bytes::copy_from_slice(data)) {
        if packet.op != 0 {
            assert_eq!(packet.s, -1);
            assert!(packet.t.is_empty());
        }
    }
});
