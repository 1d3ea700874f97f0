//! SSH public-key authentication backed by a security key.
//!
//! Produces RFC 4253 / RFC 5656 / RFC 8709 wire blobs for the public key and
//! for signatures. RSA keys always sign with `rsa-sha2-512`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use openssl::ecdsa::EcdsaSig;
use tokio_util::sync::CancellationToken;

use super::digest::DigestAlgorithm;
use super::{HardwareError, PublicKeyMaterial, SecurityKeyAuthenticator};

const CERT_SUFFIX: &str = "-cert-v01@openssh.com";
const RSA_SIGNATURE_ALGORITHM: &str = "rsa-sha2-512";

#[derive(Debug, thiserror::Error)]
pub enum SshAuthError {
    #[error("Security key error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("OpenSSH certificate does not match the security key: {0}")]
    CertificateMismatch(String),

    #[error("Malformed OpenSSH certificate: {0}")]
    MalformedCertificate(String),

    #[error("Malformed signature from security key: {0}")]
    MalformedSignature(String),

    #[error("SSH string of {0} bytes exceeds the u32 length prefix")]
    FieldTooLong(usize),
}

/// What an SSH client needs from a public-key identity.
pub trait SshIdentity {
    /// Human-readable identity name, used as the authorized_keys comment.
    fn name(&self) -> &str;

    /// Public key algorithm announced in `SSH_MSG_USERAUTH_REQUEST`.
    fn algorithm_name(&self) -> String;

    /// Public key (or certificate) blob in SSH wire format.
    fn public_key_blob(&self) -> Vec<u8>;

    /// Sign session data, returning an SSH signature blob.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SshAuthError>;
}

/// Hash paired with each curve of the `ecdsa-sha2-*` family (RFC 5656 §6.2.1).
fn ecdsa_digest(material: &PublicKeyMaterial) -> Option<DigestAlgorithm> {
    match material {
        PublicKeyMaterial::EcdsaP256(_) => Some(DigestAlgorithm::Sha256),
        PublicKeyMaterial::EcdsaP384(_) => Some(DigestAlgorithm::Sha384),
        PublicKeyMaterial::EcdsaP521(_) => Some(DigestAlgorithm::Sha512),
        PublicKeyMaterial::Ed25519(_) | PublicKeyMaterial::Rsa { .. } => None,
    }
}

/// SSH key type name, e.g. `ecdsa-sha2-nistp256` or `ssh-rsa`.
pub fn key_type(material: &PublicKeyMaterial) -> &'static str {
    match material {
        PublicKeyMaterial::EcdsaP256(_) => "ecdsa-sha2-nistp256",
        PublicKeyMaterial::EcdsaP384(_) => "ecdsa-sha2-nistp384",
        PublicKeyMaterial::EcdsaP521(_) => "ecdsa-sha2-nistp521",
        PublicKeyMaterial::Ed25519(_) => "ssh-ed25519",
        PublicKeyMaterial::Rsa { .. } => "ssh-rsa",
    }
}

/// Key-specific public fields, i.e. the key blob without its type string.
fn public_fields(material: &PublicKeyMaterial) -> Result<Vec<u8>, SshAuthError> {
    let mut out = Vec::new();
    match material {
        PublicKeyMaterial::Ed25519(raw) => put_string(&mut out, raw)?,
        PublicKeyMaterial::Rsa { e, n } => {
            put_mpint(&mut out, e)?;
            put_mpint(&mut out, n)?;
        }
        PublicKeyMaterial::EcdsaP256(point)
        | PublicKeyMaterial::EcdsaP384(point)
        | PublicKeyMaterial::EcdsaP521(point) => {
            let curve = key_type(material).trim_start_matches("ecdsa-sha2-");
            put_string(&mut out, curve.as_bytes())?;
            put_string(&mut out, point)?;
        }
    }
    Ok(out)
}

/// Public key blob in SSH wire format.
pub fn public_key_blob(material: &PublicKeyMaterial) -> Result<Vec<u8>, SshAuthError> {
    let mut out = Vec::new();
    put_string(&mut out, key_type(material).as_bytes())?;
    out.extend_from_slice(&public_fields(material)?);
    Ok(out)
}

/// An SSH identity whose private key never leaves the security key.
#[derive(Clone)]
pub struct SecurityKeySshIdentity {
    authenticator: SecurityKeyAuthenticator,
    material: PublicKeyMaterial,
    key_blob: Vec<u8>,
    certificate: Option<Vec<u8>>,
    name: String,
    cancel: CancellationToken,
}

impl SecurityKeySshIdentity {
    /// Read the public key from the card. An OpenSSH certificate stored on the
    /// card is picked up automatically.
    pub fn from_authenticator(
        authenticator: SecurityKeyAuthenticator,
        cancel: CancellationToken,
    ) -> Result<Self, SshAuthError> {
        let material = authenticator.public_key()?;
        let key_blob = public_key_blob(&material)?;
        let stored_certificate = authenticator.openssh_certificate()?;
        let name = format!("keybridge-{}", authenticator.security_key().kind());
        let identity = Self {
            authenticator,
            material,
            key_blob,
            certificate: None,
            name,
            cancel,
        };
        match stored_certificate {
            Some(blob) => identity.with_openssh_certificate(blob),
            None => Ok(identity),
        }
    }

    /// Present an OpenSSH certificate instead of the bare key. The certificate
    /// must certify exactly this key.
    pub fn with_openssh_certificate(mut self, blob: Vec<u8>) -> Result<Self, SshAuthError> {
        let mut reader = SshReader::new(&blob);
        let cert_type = reader
            .string_utf8()
            .map_err(SshAuthError::MalformedCertificate)?;
        let expected = format!("{}{CERT_SUFFIX}", key_type(&self.material));
        if cert_type != expected {
            return Err(SshAuthError::CertificateMismatch(format!(
                "certificate type {cert_type}, key type {}",
                key_type(&self.material)
            )));
        }
        reader.string().map_err(SshAuthError::MalformedCertificate)?;
        if !reader.rest().starts_with(&public_fields(&self.material)?) {
            return Err(SshAuthError::CertificateMismatch(
                "certified public key differs from the security key".into(),
            ));
        }
        self.certificate = Some(blob);
        Ok(self)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn public_key(&self) -> &PublicKeyMaterial {
        &self.material
    }

    pub fn has_certificate(&self) -> bool {
        self.certificate.is_some()
    }

    /// `<algorithm> <base64 blob> <name>`, as written to `authorized_keys`.
    pub fn authorized_keys_line(&self) -> String {
        let kind = match &self.certificate {
            Some(_) => format!("{}{CERT_SUFFIX}", key_type(&self.material)),
            None => key_type(&self.material).to_string(),
        };
        format!(
            "{kind} {} {}",
            STANDARD.encode(self.public_key_blob()),
            self.name
        )
    }

    fn signature_algorithm(&self) -> String {
        match &self.material {
            PublicKeyMaterial::Rsa { .. } => RSA_SIGNATURE_ALGORITHM.to_string(),
            other => key_type(other).to_string(),
        }
    }
}

impl SshIdentity for SecurityKeySshIdentity {
    fn name(&self) -> &str {
        &self.name
    }

    fn algorithm_name(&self) -> String {
        match &self.certificate {
            Some(_) => format!("{}{CERT_SUFFIX}", self.signature_algorithm()),
            None => self.signature_algorithm(),
        }
    }

    fn public_key_blob(&self) -> Vec<u8> {
        match &self.certificate {
            Some(blob) => blob.clone(),
            None => self.key_blob.clone(),
        }
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SshAuthError> {
        let payload = match ecdsa_digest(&self.material) {
            Some(digest) => digest.digest(data),
            None => self.material.signing_payload(DigestAlgorithm::Sha512, data),
        };
        let raw = self.authenticator.sign(&payload, &self.cancel)?;

        let signature = match &self.material {
            PublicKeyMaterial::Ed25519(_) | PublicKeyMaterial::Rsa { .. } => raw,
            _ => {
                let sig = EcdsaSig::from_der(&raw)
                    .map_err(|e| SshAuthError::MalformedSignature(e.to_string()))?;
                let mut inner = Vec::new();
                put_mpint(&mut inner, &sig.r().to_vec())?;
                put_mpint(&mut inner, &sig.s().to_vec())?;
                inner
            }
        };

        let mut blob = Vec::new();
        put_string(&mut blob, self.signature_algorithm().as_bytes())?;
        put_string(&mut blob, &signature)?;
        tracing::debug!(
            key = self.authenticator.security_key().kind(),
            algorithm = %self.signature_algorithm(),
            "SSH signature created"
        );
        Ok(blob)
    }
}

impl std::fmt::Debug for SecurityKeySshIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityKeySshIdentity")
            .field("name", &self.name)
            .field("key_type", &key_type(&self.material))
            .field("certificate", &self.certificate.is_some())
            .finish()
    }
}

/// u32 length prefix of an SSH `string`.
fn length_prefix(len: usize) -> Result<[u8; 4], SshAuthError> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| SshAuthError::FieldTooLong(len))
}

/// Append an SSH `string`: u32 length (BE) followed by the bytes.
pub fn put_string(out: &mut Vec<u8>, bytes: &[u8]) -> Result<(), SshAuthError> {
    out.extend_from_slice(&length_prefix(bytes.len())?);
    out.extend_from_slice(bytes);
    Ok(())
}

/// Append an SSH `mpint` from unsigned big-endian bytes.
pub fn put_mpint(out: &mut Vec<u8>, unsigned: &[u8]) -> Result<(), SshAuthError> {
    let start = unsigned
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(unsigned.len());
    let digits = &unsigned[start..];
    if digits.first().is_some_and(|&b| b & 0x80 != 0) {
        let mut padded = Vec::with_capacity(digits.len() + 1);
        padded.push(0);
        padded.extend_from_slice(digits);
        put_string(out, &padded)
    } else {
        put_string(out, digits)
    }
}

/// Cursor over SSH wire data.
#[derive(Debug)]
pub struct SshReader<'a> {
    buf: &'a [u8],
}

impl<'a> SshReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn string(&mut self) -> Result<&'a [u8], String> {
        if self.buf.len() < 4 {
            return Err("truncated length".into());
        }
        let (len, rest) = self.buf.split_at(4);
        let len = u32::from_be_bytes([len[0], len[1], len[2], len[3]]) as usize;
        if rest.len() < len {
            return Err(format!("string of {len} bytes exceeds remaining {}", rest.len()));
        }
        let (value, rest) = rest.split_at(len);
        self.buf = rest;
        Ok(value)
    }

    pub fn string_utf8(&mut self) -> Result<&'a str, String> {
        let bytes = self.string()?;
        std::str::from_utf8(bytes).map_err(|_| "string is not UTF-8".to_string())
    }

    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
