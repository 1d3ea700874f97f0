//! Raw digest signing, as used by PIV / OpenPGP challenge-response logins.

use std::str::FromStr;

use tokio_util::sync::CancellationToken;

use super::{PublicKeyMaterial, SecurityKeyAuthenticator};
use crate::error::{KeybridgeError, Result};

/// Hash functions accepted by [`DigestSigner::sign_with_digest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

// DER DigestInfo prefixes from RFC 8017 §9.2, note 1.
const SHA1_PREFIX: &[u8] = &[
    0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04, 0x14,
];
const SHA256_PREFIX: &[u8] = &[
    0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
    0x00, 0x04, 0x20,
];
const SHA384_PREFIX: &[u8] = &[
    0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02, 0x05,
    0x00, 0x04, 0x30,
];
const SHA512_PREFIX: &[u8] = &[
    0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03, 0x05,
    0x00, 0x04, 0x40,
];

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => openssl::sha::sha1(data).to_vec(),
            Self::Sha256 => openssl::sha::sha256(data).to_vec(),
            Self::Sha384 => openssl::sha::sha384(data).to_vec(),
            Self::Sha512 => openssl::sha::sha512(data).to_vec(),
        }
    }

    fn digest_info_prefix(&self) -> &'static [u8] {
        match self {
            Self::Sha1 => SHA1_PREFIX,
            Self::Sha256 => SHA256_PREFIX,
            Self::Sha384 => SHA384_PREFIX,
            Self::Sha512 => SHA512_PREFIX,
        }
    }

    /// DER `DigestInfo` wrapping the digest of `data`, as signed by RSA keys.
    pub fn digest_info(&self, data: &[u8]) -> Vec<u8> {
        let mut out = self.digest_info_prefix().to_vec();
        out.extend_from_slice(&self.digest(data));
        out
    }
}

impl FromStr for DigestAlgorithm {
    type Err = KeybridgeError;

    /// Accepts `SHA-256` as well as `SHA256` / `sha256`.
    fn from_str(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().replace('-', "").as_str() {
            "SHA1" => Ok(Self::Sha1),
            "SHA256" => Ok(Self::Sha256),
            "SHA384" => Ok(Self::Sha384),
            "SHA512" => Ok(Self::Sha512),
            _ => Err(KeybridgeError::UnsupportedDigest(name.to_string())),
        }
    }
}

impl std::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Signs the digest of a challenge with the security key, no framing.
pub struct DigestSigner {
    authenticator: SecurityKeyAuthenticator,
    cancel: CancellationToken,
}

impl DigestSigner {
    pub fn new(authenticator: SecurityKeyAuthenticator, cancel: CancellationToken) -> Self {
        Self {
            authenticator,
            cancel,
        }
    }

    /// Hash `payload` with `digest` and return the card's raw signature.
    ///
    /// ECDSA signatures are DER, RSA signatures PKCS#1 v1.5. Ed25519 keys sign
    /// the digest bytes themselves.
    pub fn sign_with_digest(&self, payload: &[u8], digest: &str) -> Result<Vec<u8>> {
        let algorithm: DigestAlgorithm = digest.parse()?;
        let material = self.authenticator.public_key()?;
        let to_sign = match &material {
            PublicKeyMaterial::Ed25519(_) => algorithm.digest(payload),
            _ => material.signing_payload(algorithm, payload),
        };
        let signature = self.authenticator.sign(&to_sign, &self.cancel)?;
        tracing::info!(
            key = self.authenticator.security_key().kind(),
            digest = %algorithm,
            "Digest signature created"
        );
        Ok(signature)
    }
}

impl std::fmt::Debug for DigestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigestSigner")
            .field("key", &self.authenticator.security_key().kind())
            .finish()
    }
}
