#![no_main]

//! Fuzz target for the raw U2F registration and signature messages
//!
//! Run with: cargo +nightly fuzz run fuzz_u2f_messages

use keybridge_core::fido::messages::{RegistrationData, SignatureData};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(registration) = RegistrationData::parse(data) {
        let _ = registration.to_bytes();
    }
    let _ = SignatureData::parse(data);
});
