//! Authenticator model lookup by AAGUID
//!
//! Static table of common roaming security keys. Authenticators that report an
//! all-zero AAGUID (U2F-era keys, privacy-preserving attestation) are not
//! identifiable and yield `None`.

use super::types::DeviceModel;

/// Known authenticator AAGUIDs with their descriptions
static KNOWN_AUTHENTICATORS: &[(&str, &str, &str)] = &[
    // Yubico
    (
        "2fc0579f-8113-47ea-b116-bb5a8db9202a",
        "YubiKey 5 NFC",
        "Yubico",
    ),
    (
        "c5ef55ff-ad9a-4b9f-b580-adebafe026d0",
        "YubiKey 5Ci",
        "Yubico",
    ),
    (
        "fa2b99dc-9e39-4257-8f92-4a30d23c4118",
        "YubiKey 5 FIPS",
        "Yubico",
    ),
    (
        "73bb0cd4-e502-49b8-9c6f-b59445bf720b",
        "YubiKey 5 Bio",
        "Yubico",
    ),
    // Google
    (
        "ea9b8d66-4d01-1d21-3ce4-b6b48cb575d4",
        "Google Titan Security Key",
        "Google",
    ),
    // Feitian
    (
        "77010bd7-212a-4fc9-b236-d2ca5e9d4084",
        "Feitian BioPass K27",
        "Feitian",
    ),
    (
        "3e22415d-7fdf-4ea4-8a0c-dd60c4249b9d",
        "Feitian ePass FIDO2",
        "Feitian",
    ),
];

const ZERO_AAGUID: &str = "00000000-0000-0000-0000-000000000000";

/// Lookup device model by AAGUID (lowercase UUID form).
pub fn lookup_device_model(aaguid: &str) -> Option<DeviceModel> {
    if aaguid == ZERO_AAGUID {
        return None;
    }
    KNOWN_AUTHENTICATORS
        .iter()
        .find(|(known, _, _)| known.eq_ignore_ascii_case(aaguid))
        .map(|(known, description, vendor)| DeviceModel {
            aaguid: known.to_string(),
            description: description.to_string(),
            vendor: vendor.to_string(),
        })
}
