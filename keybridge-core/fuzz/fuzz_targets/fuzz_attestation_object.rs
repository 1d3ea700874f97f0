#![no_main]

//! Fuzz target for AttestationObject::parse() and statement verification
//!
//! Run with: cargo +nightly fuzz run fuzz_attestation_object

use keybridge_core::verify::authenticator_data::AuthenticatorData;
use keybridge_core::webauthn::attestation::AttestationObject;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(object) = AttestationObject::parse(data) else {
        return;
    };
    if let Ok(auth_data) = AuthenticatorData::parse(&object.auth_data) {
        // Must fail cleanly, never panic
        let _ = object.verify(&auth_data, b"{}");
    }
});
