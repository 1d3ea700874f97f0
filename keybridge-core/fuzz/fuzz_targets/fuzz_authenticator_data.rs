#![no_main]

//! Fuzz target for AuthenticatorData::parse()
//!
//! Run with: cargo +nightly fuzz run fuzz_authenticator_data

use keybridge_core::verify::authenticator_data::AuthenticatorData;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(parsed) = AuthenticatorData::parse(data) {
        // Whatever parses must keep the exact input bytes for signature checks
        assert_eq!(parsed.as_bytes(), data);
    }
});
