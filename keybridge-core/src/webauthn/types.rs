//! WebAuthn request/response types
//!
//! Mirrors the browser's `navigator.credentials.create/get` dictionaries so the
//! JSON can be handed to a client unchanged. Binary fields are base64url.

use serde::{Deserialize, Serialize};

use crate::encoding::{b64, b64_opt};
use crate::registry::{AuthenticatorTransport, Credential, CredentialDescriptor};

pub const PUBLIC_KEY_CREDENTIAL_TYPE: &str = "public-key";

/// Whether the relying party wants user verification (PIN, biometrics).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerificationRequirement {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

/// Attestation the relying party asks for at registration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationConveyancePreference {
    #[default]
    None,
    Indirect,
    Direct,
    Enterprise,
}

/// Type of WebAuthn authenticator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorAttachment {
    /// Platform authenticator (TouchID, Windows Hello)
    Platform,
    /// Roaming authenticator (USB/NFC security key)
    CrossPlatform,
}

/// WebAuthn attestation statement format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationFormat {
    /// Standard packed format (self or x5c)
    Packed,
    /// FIDO U2F
    FidoU2f,
    /// No attestation
    #[default]
    None,
}

impl AttestationFormat {
    /// Map the `fmt` string of an attestation object.
    pub fn from_fmt(fmt: &str) -> Option<Self> {
        match fmt {
            "packed" => Some(Self::Packed),
            "fido-u2f" => Some(Self::FidoU2f),
            "none" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_fmt(&self) -> &'static str {
        match self {
            Self::Packed => "packed",
            Self::FidoU2f => "fido-u2f",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelyingPartyEntity {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// Opaque user handle
    #[serde(with = "b64")]
    pub id: Vec<u8>,
    pub name: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyCredentialParameters {
    #[serde(rename = "type")]
    pub kind: String,
    pub alg: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorSelectionCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator_attachment: Option<AuthenticatorAttachment>,
    pub require_resident_key: bool,
    pub user_verification: UserVerificationRequirement,
}

/// Argument for `navigator.credentials.create({ publicKey })`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredentialCreationOptions {
    pub rp: RelyingPartyEntity,
    pub user: UserEntity,
    /// Base64url challenge
    pub challenge: String,
    pub pub_key_cred_params: Vec<PublicKeyCredentialParameters>,
    pub timeout: u64,
    pub authenticator_selection: AuthenticatorSelectionCriteria,
    pub attestation: AttestationConveyancePreference,
}

/// Argument for `navigator.credentials.get({ publicKey })`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyCredentialRequestOptions {
    pub challenge: String,
    pub timeout: u64,
    pub rp_id: String,
    /// Newest registration first
    pub allow_credentials: Vec<CredentialDescriptor>,
    pub user_verification: UserVerificationRequirement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAttestationResponse {
    #[serde(rename = "clientDataJSON", with = "b64")]
    pub client_data_json: Vec<u8>,
    #[serde(with = "b64")]
    pub attestation_object: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<AuthenticatorTransport>,
}

/// Result of `navigator.credentials.create()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationCredential {
    pub id: String,
    #[serde(with = "b64")]
    pub raw_id: Vec<u8>,
    #[serde(rename = "type")]
    pub kind: String,
    pub response: AuthenticatorAttestationResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatorAssertionResponse {
    #[serde(rename = "clientDataJSON", with = "b64")]
    pub client_data_json: Vec<u8>,
    #[serde(with = "b64")]
    pub authenticator_data: Vec<u8>,
    #[serde(with = "b64")]
    pub signature: Vec<u8>,
    #[serde(default, with = "b64_opt", skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<Vec<u8>>,
}

/// Result of `navigator.credentials.get()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionCredential {
    pub id: String,
    #[serde(with = "b64")]
    pub raw_id: Vec<u8>,
    #[serde(rename = "type")]
    pub kind: String,
    pub response: AuthenticatorAssertionResponse,
}

/// Device model information for a known AAGUID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceModel {
    pub aaguid: String,
    /// Human-readable description
    pub description: String,
    /// Device manufacturer
    pub vendor: String,
}

/// Outcome of a successful WebAuthn registration.
#[derive(Debug, Clone)]
pub struct WebAuthnRegistration {
    pub credential: Credential,
    pub evicted: Option<Credential>,
    pub attestation_format: AttestationFormat,
    pub device_model: Option<DeviceModel>,
}

/// Outcome of a successful WebAuthn authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebAuthnAuthentication {
    pub credential_id: Vec<u8>,
    /// Counter value now stored for the credential
    pub sign_count: u32,
    pub user_verified: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attestation_format_serialization() {
        let format = AttestationFormat::Packed;
        let json = serde_json::to_string(&format).unwrap();
        assert_eq!(json, "\"packed\"");

        assert_eq!(AttestationFormat::from_fmt("fido-u2f"), Some(AttestationFormat::FidoU2f));
        assert_eq!(AttestationFormat::from_fmt("tpm"), None);
        assert_eq!(AttestationFormat::FidoU2f.as_fmt(), "fido-u2f");
    }

    #[test]
    fn test_attachment_is_kebab_case() {
        let json = serde_json::to_string(&AuthenticatorAttachment::CrossPlatform).unwrap();
        assert_eq!(json, "\"cross-platform\"");
    }

    #[test]
    fn test_assertion_response_field_names() {
        let response = AuthenticatorAssertionResponse {
            client_data_json: b"{}".to_vec(),
            authenticator_data: vec![0u8; 37],
            signature: vec![0x30, 0x00],
            user_handle: None,
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("clientDataJSON").is_some());
        assert!(json.get("authenticatorData").is_some());
        assert!(json.get("userHandle").is_none());

        let back: AuthenticatorAssertionResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn test_user_verification_default() {
        assert_eq!(
            UserVerificationRequirement::default(),
            UserVerificationRequirement::Preferred
        );
        assert_eq!(
            serde_json::to_string(&UserVerificationRequirement::Required).unwrap(),
            "\"required\""
        );
    }
}
