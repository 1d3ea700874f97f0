//! Client data collected by the browser (WebAuthn) or the U2F client.
//!
//! WebAuthn names the type field `type`; U2F uses `typ`. Both are accepted.

use serde::{Deserialize, Serialize};

use crate::encoding::b64url_decode;
use crate::error::{KeybridgeError, Result};

pub const TYPE_U2F_REGISTER: &str = "navigator.id.finishEnrollment";
pub const TYPE_U2F_SIGN: &str = "navigator.id.getAssertion";
pub const TYPE_WEBAUTHN_CREATE: &str = "webauthn.create";
pub const TYPE_WEBAUTHN_GET: &str = "webauthn.get";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectedClientData {
    #[serde(rename = "type", alias = "typ")]
    pub kind: String,
    /// Base64url challenge as echoed by the client
    pub challenge: String,
    pub origin: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cross_origin: Option<bool>,
}

impl CollectedClientData {
    pub fn parse(json: &[u8]) -> Result<Self> {
        serde_json::from_slice(json)
            .map_err(|e| KeybridgeError::parse(format!("invalid client data: {e}")))
    }

    pub fn expect_type(&self, expected: &str) -> Result<()> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(KeybridgeError::parse(format!(
                "client data type '{}', expected '{expected}'",
                self.kind
            )))
        }
    }

    pub fn expect_origin(&self, expected: &str) -> Result<()> {
        if self.origin.trim_end_matches('/') == expected.trim_end_matches('/') {
            Ok(())
        } else {
            Err(KeybridgeError::OriginMismatch {
                expected: expected.to_string(),
                actual: self.origin.clone(),
            })
        }
    }

    pub fn challenge_bytes(&self) -> Result<Vec<u8>> {
        b64url_decode(&self.challenge)
    }
}
