//! Signing bridge between a hardware security key and authentication clients.
//!
//! The security key only knows how to sign bytes. This module wraps that
//! primitive:
//!
//! - [`SecurityKey`] selects the card application (PIV or OpenPGP) once per
//!   session and hands out a [`SecurityKeyAuthenticator`] bound to a PIN.
//! - [`ssh::SecurityKeySshIdentity`] turns the authenticator into an SSH
//!   public-key identity with RFC 4253/5656 wire blobs.
//! - [`digest::DigestSigner`] produces raw signatures over a message digest.
//!
//! Payload convention for [`HardwareToken::sign`]: ECDSA keys sign a message
//! digest, RSA keys sign a DER `DigestInfo`, Ed25519 keys sign the message.

pub mod digest;
#[cfg(any(test, feature = "software-authenticators"))]
pub mod software;
pub mod ssh;

use std::ops::RangeInclusive;
use std::sync::Arc;

use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Public};
use openssl::x509::X509;
use tokio_util::sync::CancellationToken;
use zeroize::{Zeroize, ZeroizeOnDrop};

use digest::DigestAlgorithm;

/// PIV slot holding the authentication key and certificate.
pub const PIV_AUTHENTICATION_SLOT: u8 = 0x9A;

/// Failures reported by the security key or its transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HardwareError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Wrong PIN, {retries_left} attempts left")]
    PinRejected { retries_left: u8 },

    #[error("PIN is blocked")]
    Locked,

    #[error("PIN does not satisfy the card's rules: {0}")]
    InvalidPin(String),

    #[error("Malformed key material: {0}")]
    MalformedKey(String),

    #[error("Unsupported by this security key: {0}")]
    Unsupported(String),
}

pub type HardwareResult<T> = std::result::Result<T, HardwareError>;

/// The primitive operations of a security key application.
///
/// Implemented by the card driver (outside this crate) and by
/// [`software::SoftwareToken`]. Calls may block on USB/NFC I/O.
pub trait HardwareToken: Send + Sync {
    fn verify_pin(&self, pin: &Pin) -> HardwareResult<()>;

    /// Sign `payload` with the authentication key.
    fn sign(&self, payload: &[u8]) -> HardwareResult<Vec<u8>>;

    /// DER X.509 certificate (PIV) or SubjectPublicKeyInfo (OpenPGP).
    fn public_key_or_certificate(&self) -> HardwareResult<Vec<u8>>;

    /// OpenSSH certificate blob stored alongside the key, if any.
    fn openssh_certificate(&self) -> HardwareResult<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// A PIN, wiped from memory on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Pin(String);

impl Pin {
    pub fn new(pin: impl Into<String>) -> Self {
        Self(pin.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Pin(<redacted>)")
    }
}

/// A security key with the card application chosen at session setup.
#[derive(Clone)]
pub enum SecurityKey {
    /// PIV applet, authentication slot 9A
    Piv { token: Arc<dyn HardwareToken> },
    /// OpenPGP card, authentication key
    OpenPgp { token: Arc<dyn HardwareToken> },
}

impl SecurityKey {
    pub fn piv(token: Arc<dyn HardwareToken>) -> Self {
        Self::Piv { token }
    }

    pub fn openpgp(token: Arc<dyn HardwareToken>) -> Self {
        Self::OpenPgp { token }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Piv { .. } => "piv",
            Self::OpenPgp { .. } => "openpgp",
        }
    }

    fn token(&self) -> &Arc<dyn HardwareToken> {
        match self {
            Self::Piv { token } | Self::OpenPgp { token } => token,
        }
    }

    /// Accepted PIN lengths, in characters.
    pub fn pin_length(&self) -> RangeInclusive<usize> {
        match self {
            Self::Piv { .. } => 6..=8,
            Self::OpenPgp { .. } => 6..=127,
        }
    }

    /// Bind a PIN to this key. The PIN is only checked for format here; the
    /// card verifies it right before the first signature.
    pub fn create_authenticator(&self, pin: Pin) -> HardwareResult<SecurityKeyAuthenticator> {
        let allowed = self.pin_length();
        if !allowed.contains(&pin.len()) {
            return Err(HardwareError::InvalidPin(format!(
                "{} PIN must be {}-{} characters",
                self.kind(),
                allowed.start(),
                allowed.end()
            )));
        }
        Ok(SecurityKeyAuthenticator {
            key: self.clone(),
            pin,
        })
    }
}

impl std::fmt::Debug for SecurityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SecurityKey").field(&self.kind()).finish()
    }
}

/// Public key of the authentication key, decoded from the card's DER output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKeyMaterial {
    /// Uncompressed SEC1 point
    EcdsaP256(Vec<u8>),
    EcdsaP384(Vec<u8>),
    EcdsaP521(Vec<u8>),
    Ed25519([u8; 32]),
    /// Big-endian exponent and modulus
    Rsa { e: Vec<u8>, n: Vec<u8> },
}

impl PublicKeyMaterial {
    pub fn from_pkey(key: &PKey<Public>) -> HardwareResult<Self> {
        let malformed = |e: openssl::error::ErrorStack| HardwareError::MalformedKey(e.to_string());
        match key.id() {
            Id::EC => {
                let ec = key.ec_key().map_err(malformed)?;
                let group = ec.group();
                let mut ctx = openssl::bn::BigNumContext::new().map_err(malformed)?;
                let point = ec
                    .public_key()
                    .to_bytes(
                        group,
                        openssl::ec::PointConversionForm::UNCOMPRESSED,
                        &mut ctx,
                    )
                    .map_err(malformed)?;
                match group.curve_name() {
                    Some(Nid::X9_62_PRIME256V1) => Ok(Self::EcdsaP256(point)),
                    Some(Nid::SECP384R1) => Ok(Self::EcdsaP384(point)),
                    Some(Nid::SECP521R1) => Ok(Self::EcdsaP521(point)),
                    other => Err(HardwareError::Unsupported(format!("EC curve {other:?}"))),
                }
            }
            Id::ED25519 => {
                let raw = key.raw_public_key().map_err(malformed)?;
                let raw: [u8; 32] = raw
                    .try_into()
                    .map_err(|_| HardwareError::MalformedKey("Ed25519 key is not 32 bytes".into()))?;
                Ok(Self::Ed25519(raw))
            }
            Id::RSA => {
                let rsa = key.rsa().map_err(malformed)?;
                Ok(Self::Rsa {
                    e: rsa.e().to_vec(),
                    n: rsa.n().to_vec(),
                })
            }
            other => Err(HardwareError::Unsupported(format!("key type {other:?}"))),
        }
    }

    /// Decode a DER certificate or SubjectPublicKeyInfo.
    pub fn from_der(der: &[u8]) -> HardwareResult<Self> {
        let key = match X509::from_der(der) {
            Ok(cert) => cert
                .public_key()
                .map_err(|e| HardwareError::MalformedKey(e.to_string()))?,
            Err(_) => PKey::public_key_from_der(der)
                .map_err(|e| HardwareError::MalformedKey(e.to_string()))?,
        };
        Self::from_pkey(&key)
    }

    /// Build the payload the card expects for `message` under the key's
    /// signing convention.
    pub fn signing_payload(&self, digest: DigestAlgorithm, message: &[u8]) -> Vec<u8> {
        match self {
            Self::EcdsaP256(_) | Self::EcdsaP384(_) | Self::EcdsaP521(_) => digest.digest(message),
            Self::Rsa { .. } => digest.digest_info(message),
            Self::Ed25519(_) => message.to_vec(),
        }
    }
}

/// A security key unlocked by a PIN, ready to sign.
///
/// Signing is synchronous and may block on the card; run it off the async
/// executor and cancel through the [`CancellationToken`].
#[derive(Clone, Debug)]
pub struct SecurityKeyAuthenticator {
    key: SecurityKey,
    pin: Pin,
}

impl SecurityKeyAuthenticator {
    pub fn security_key(&self) -> &SecurityKey {
        &self.key
    }

    pub fn public_key(&self) -> HardwareResult<PublicKeyMaterial> {
        let der = self.key.token().public_key_or_certificate()?;
        PublicKeyMaterial::from_der(&der)
    }

    pub fn openssh_certificate(&self) -> HardwareResult<Option<Vec<u8>>> {
        self.key.token().openssh_certificate()
    }

    /// Verify the PIN and sign `payload`, checking for cancellation before each step.
    pub fn sign(&self, payload: &[u8], cancel: &CancellationToken) -> HardwareResult<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(HardwareError::Cancelled);
        }
        let token = self.key.token();
        token.verify_pin(&self.pin)?;
        if cancel.is_cancelled() {
            return Err(HardwareError::Cancelled);
        }
        let signature = token.sign(payload)?;
        tracing::debug!(
            key = self.key.kind(),
            payload_len = payload.len(),
            "Security key produced signature"
        );
        Ok(signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use software::{SoftwareKeyAlgorithm, SoftwareToken};

    #[test]
    fn test_pin_length_rules() {
        let token: Arc<dyn HardwareToken> =
            Arc::new(SoftwareToken::generate(SoftwareKeyAlgorithm::EcdsaP256).unwrap());
        let piv = SecurityKey::piv(Arc::clone(&token));
        let pgp = SecurityKey::openpgp(token);

        assert!(piv.create_authenticator(Pin::new("12345")).is_err());
        assert!(piv.create_authenticator(Pin::new("123456")).is_ok());
        assert!(piv.create_authenticator(Pin::new("123456789")).is_err());
        assert!(pgp.create_authenticator(Pin::new("123456789")).is_ok());
    }

    #[test]
    fn test_cancelled_before_sign() {
        let token = Arc::new(SoftwareToken::generate(SoftwareKeyAlgorithm::Ed25519).unwrap());
        let auth = SecurityKey::openpgp(token)
            .create_authenticator(Pin::new("123456"))
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(auth.sign(b"data", &cancel), Err(HardwareError::Cancelled));
    }

    #[test]
    fn test_public_key_material_from_spki_and_certificate() {
        let token = SoftwareToken::generate(SoftwareKeyAlgorithm::EcdsaP384)
            .unwrap()
            .with_self_signed_certificate("PIV Authentication")
            .unwrap();
        let der = token.public_key_or_certificate().unwrap();
        assert!(X509::from_der(&der).is_ok());
        assert!(matches!(
            PublicKeyMaterial::from_der(&der).unwrap(),
            PublicKeyMaterial::EcdsaP384(point) if point.len() == 97
        ));

        let rsa = SoftwareToken::generate(SoftwareKeyAlgorithm::Rsa2048).unwrap();
        let material = PublicKeyMaterial::from_der(&rsa.public_key_or_certificate().unwrap()).unwrap();
        assert!(matches!(material, PublicKeyMaterial::Rsa { n, .. } if n.len() == 256));
    }

    #[test]
    fn test_pin_debug_is_redacted() {
        let pin = Pin::new("123456");
        assert!(!format!("{pin:?}").contains("123456"));
    }
}
