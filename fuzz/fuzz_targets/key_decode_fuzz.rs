//! Fuzz target for the encoded key format.
//!
//! Arbitrary input must either decode into a key whose encoding decodes
//! back to the same key, or be rejected with an error. It must never panic.
//!
//! Run with: cargo +nightly fuzz run key_decode_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use triad_core::Key;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(key) = Key::decode(input) {
            let encoded = key.encode();
            let again = Key::decode(&encoded).expect("encoded keys always decode");
            assert_eq!(again, key, "decode(encode(k)) must equal k");
            assert!(!key.kind().is_empty(), "decoded keys always carry a kind");
        }
    }
});
