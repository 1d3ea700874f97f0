//! WebAuthn authenticator data (W3C WebAuthn §6.1).
//!
//! Layout: `rpIdHash(32) ‖ flags(1) ‖ signCount(4, BE) ‖ [attestedCredentialData] ‖ [extensions]`.

use std::io::Cursor;

use ciborium::value::Value;

use super::cose::CoseKey;
use crate::error::{KeybridgeError, Result};

pub const FLAG_USER_PRESENT: u8 = 0x01;
pub const FLAG_USER_VERIFIED: u8 = 0x04;
pub const FLAG_ATTESTED_CREDENTIAL_DATA: u8 = 0x40;
pub const FLAG_EXTENSION_DATA: u8 = 0x80;

const HEADER_LEN: usize = 37;

/// Credential material embedded at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestedCredentialData {
    pub aaguid: [u8; 16],
    pub credential_id: Vec<u8>,
    pub public_key: CoseKey,
}

impl AttestedCredentialData {
    /// AAGUID formatted as a lowercase UUID string.
    pub fn aaguid_string(&self) -> String {
        let h = hex::encode(self.aaguid);
        format!(
            "{}-{}-{}-{}-{}",
            &h[0..8],
            &h[8..12],
            &h[12..16],
            &h[16..20],
            &h[20..32]
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; 32],
    pub flags: u8,
    pub sign_count: u32,
    pub attested: Option<AttestedCredentialData>,
    raw: Vec<u8>,
}

impl AuthenticatorData {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(KeybridgeError::parse("authenticator data too short"));
        }
        let mut rp_id_hash = [0u8; 32];
        rp_id_hash.copy_from_slice(&bytes[..32]);
        let flags = bytes[32];
        let sign_count = u32::from_be_bytes([bytes[33], bytes[34], bytes[35], bytes[36]]);

        let attested = if flags & FLAG_ATTESTED_CREDENTIAL_DATA != 0 {
            Some(parse_attested(&bytes[HEADER_LEN..])?)
        } else {
            None
        };

        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested,
            raw: bytes.to_vec(),
        })
    }

    /// Serialize header and optional attested credential data.
    pub fn build(
        rp_id_hash: [u8; 32],
        flags: u8,
        sign_count: u32,
        attested: Option<AttestedCredentialData>,
    ) -> Result<Self> {
        let mut raw = Vec::with_capacity(HEADER_LEN + 128);
        raw.extend_from_slice(&rp_id_hash);
        let flags = if attested.is_some() {
            flags | FLAG_ATTESTED_CREDENTIAL_DATA
        } else {
            flags & !FLAG_ATTESTED_CREDENTIAL_DATA
        };
        raw.push(flags);
        raw.extend_from_slice(&sign_count.to_be_bytes());
        if let Some(data) = &attested {
            let id_len = u16::try_from(data.credential_id.len())
                .map_err(|_| KeybridgeError::parse("credential id too long"))?;
            raw.extend_from_slice(&data.aaguid);
            raw.extend_from_slice(&id_len.to_be_bytes());
            raw.extend_from_slice(&data.credential_id);
            raw.extend_from_slice(&data.public_key.to_cbor()?);
        }
        Ok(Self {
            rp_id_hash,
            flags,
            sign_count,
            attested,
            raw,
        })
    }

    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }

    /// The exact bytes that were signed.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }
}

fn parse_attested(bytes: &[u8]) -> Result<AttestedCredentialData> {
    if bytes.len() < 18 {
        return Err(KeybridgeError::parse("attested credential data too short"));
    }
    let mut aaguid = [0u8; 16];
    aaguid.copy_from_slice(&bytes[..16]);
    let id_len = usize::from(u16::from_be_bytes([bytes[16], bytes[17]]));
    let credential_id = bytes
        .get(18..18 + id_len)
        .ok_or_else(|| KeybridgeError::parse("credential id truncated"))?
        .to_vec();

    // Extensions, if any, follow the key; reading one CBOR item leaves them unread.
    let mut cursor = Cursor::new(&bytes[18 + id_len..]);
    let key: Value = ciborium::de::from_reader(&mut cursor)
        .map_err(|e| KeybridgeError::parse(format!("invalid credential public key: {e}")))?;

    Ok(AttestedCredentialData {
        aaguid,
        credential_id,
        public_key: CoseKey::from_value(&key)?,
    })
}
