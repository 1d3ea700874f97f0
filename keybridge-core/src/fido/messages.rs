//! Raw U2F binary messages (FIDO U2F Raw Message Formats v1.2).

use crate::encoding::der_element_len;
use crate::error::{KeybridgeError, Result};

const REGISTRATION_RESERVED: u8 = 0x05;
const USER_PUBLIC_KEY_LEN: usize = 65;

/// `0x05 ‖ userPublicKey(65) ‖ L ‖ keyHandle(L) ‖ attestationCert(DER) ‖ signature(DER)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationData {
    pub user_public_key: Vec<u8>,
    pub key_handle: Vec<u8>,
    pub attestation_cert: Vec<u8>,
    pub signature: Vec<u8>,
}

impl RegistrationData {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let (&reserved, rest) = bytes
            .split_first()
            .ok_or_else(|| KeybridgeError::parse("empty registration data"))?;
        if reserved != REGISTRATION_RESERVED {
            return Err(KeybridgeError::parse(format!(
                "registration data starts with {reserved:#04x}, expected 0x05"
            )));
        }
        if rest.len() < USER_PUBLIC_KEY_LEN + 1 {
            return Err(KeybridgeError::parse("registration data truncated"));
        }
        let (user_public_key, rest) = rest.split_at(USER_PUBLIC_KEY_LEN);
        if user_public_key[0] != 0x04 {
            return Err(KeybridgeError::parse("user public key is not an uncompressed point"));
        }

        let handle_len = usize::from(rest[0]);
        let rest = &rest[1..];
        if rest.len() < handle_len {
            return Err(KeybridgeError::parse("key handle truncated"));
        }
        let (key_handle, rest) = rest.split_at(handle_len);

        let cert_len = der_element_len(rest)?;
        let (attestation_cert, signature) = rest.split_at(cert_len);
        if signature.is_empty() {
            return Err(KeybridgeError::parse("registration signature missing"));
        }

        Ok(Self {
            user_public_key: user_public_key.to_vec(),
            key_handle: key_handle.to_vec(),
            attestation_cert: attestation_cert.to_vec(),
            signature: signature.to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let handle_len = u8::try_from(self.key_handle.len())
            .map_err(|_| KeybridgeError::parse("key handle longer than 255 bytes"))?;
        let mut out = Vec::with_capacity(
            1 + USER_PUBLIC_KEY_LEN
                + 1
                + self.key_handle.len()
                + self.attestation_cert.len()
                + self.signature.len(),
        );
        out.push(REGISTRATION_RESERVED);
        out.extend_from_slice(&self.user_public_key);
        out.push(handle_len);
        out.extend_from_slice(&self.key_handle);
        out.extend_from_slice(&self.attestation_cert);
        out.extend_from_slice(&self.signature);
        Ok(out)
    }
}

/// `flags(1) ‖ counter(4, BE) ‖ signature(DER)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureData {
    pub flags: u8,
    pub counter: u32,
    pub signature: Vec<u8>,
}

impl SignatureData {
    pub const USER_PRESENCE: u8 = 0x01;

    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 6 {
            return Err(KeybridgeError::parse("signature data truncated"));
        }
        Ok(Self {
            flags: bytes[0],
            counter: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            signature: bytes[5..].to_vec(),
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(5 + self.signature.len());
        out.push(self.flags);
        out.extend_from_slice(&self.counter.to_be_bytes());
        out.extend_from_slice(&self.signature);
        out
    }

    pub fn user_present(&self) -> bool {
        self.flags & Self::USER_PRESENCE != 0
    }
}
