//! In-memory stand-in for a security key.
//!
//! **WARNING**: the private key lives in process memory. Use for tests, demos
//! and development only.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use openssl::asn1::Asn1Time;
use openssl::bn::BigNum;
use openssl::ec::{EcGroup, EcKey};
use openssl::ecdsa::EcdsaSig;
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::rsa::{Padding, Rsa};
use openssl::sign::Signer;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::{X509Builder, X509NameBuilder, X509};

use super::{HardwareError, HardwareResult, HardwareToken, Pin};
use crate::error::{KeybridgeError, Result};

/// Default number of PIN attempts before the token locks.
pub const DEFAULT_PIN_RETRIES: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftwareKeyAlgorithm {
    EcdsaP256,
    EcdsaP384,
    EcdsaP521,
    Ed25519,
    Rsa2048,
}

pub struct SoftwareToken {
    key: PKey<Private>,
    certificate: Option<X509>,
    openssh_certificate: Option<Vec<u8>>,
    pin: Option<Pin>,
    retries_left: AtomicU8,
    max_retries: u8,
    connected: AtomicBool,
}

impl SoftwareToken {
    pub fn generate(algorithm: SoftwareKeyAlgorithm) -> Result<Self> {
        let ec = |nid: Nid| -> std::result::Result<PKey<Private>, ErrorStack> {
            let group = EcGroup::from_curve_name(nid)?;
            PKey::from_ec_key(EcKey::generate(&group)?)
        };
        let key = match algorithm {
            SoftwareKeyAlgorithm::EcdsaP256 => ec(Nid::X9_62_PRIME256V1)?,
            SoftwareKeyAlgorithm::EcdsaP384 => ec(Nid::SECP384R1)?,
            SoftwareKeyAlgorithm::EcdsaP521 => ec(Nid::SECP521R1)?,
            SoftwareKeyAlgorithm::Ed25519 => PKey::generate_ed25519()?,
            SoftwareKeyAlgorithm::Rsa2048 => PKey::from_rsa(Rsa::generate(2048)?)?,
        };
        Ok(Self::from_key(key))
    }

    /// Load a PEM private key (PKCS#8, SEC1 or PKCS#1).
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let key = PKey::private_key_from_pem(pem)
            .map_err(|_| KeybridgeError::parse("unreadable PEM private key"))?;
        Ok(Self::from_key(key))
    }

    fn from_key(key: PKey<Private>) -> Self {
        Self {
            key,
            certificate: None,
            openssh_certificate: None,
            pin: None,
            retries_left: AtomicU8::new(DEFAULT_PIN_RETRIES),
            max_retries: DEFAULT_PIN_RETRIES,
            connected: AtomicBool::new(true),
        }
    }

    /// Require `pin` before signing, locking after `retries` wrong attempts.
    pub fn with_pin(mut self, pin: Pin, retries: u8) -> Self {
        self.pin = Some(pin);
        self.max_retries = retries;
        self.retries_left = AtomicU8::new(retries);
        self
    }

    /// Present a self-signed certificate instead of a bare public key, as a
    /// PIV authentication slot does.
    pub fn with_self_signed_certificate(mut self, common_name: &str) -> Result<Self> {
        self.certificate = Some(self_signed_certificate(&self.key, common_name)?);
        Ok(self)
    }

    pub fn with_openssh_certificate(mut self, blob: Vec<u8>) -> Self {
        self.openssh_certificate = Some(blob);
        self
    }

    /// Simulate pulling the key out of the reader.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn private_key_pem(&self) -> Result<Vec<u8>> {
        Ok(self.key.private_key_to_pem_pkcs8()?)
    }

    fn ensure_connected(&self) -> HardwareResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HardwareError::Transport("security key not connected".into()))
        }
    }
}

impl HardwareToken for SoftwareToken {
    fn verify_pin(&self, pin: &Pin) -> HardwareResult<()> {
        self.ensure_connected()?;
        let Some(expected) = &self.pin else {
            return Ok(());
        };
        if self.retries_left.load(Ordering::SeqCst) == 0 {
            return Err(HardwareError::Locked);
        }
        let matches = expected.as_str().len() == pin.as_str().len()
            && openssl::memcmp::eq(expected.as_str().as_bytes(), pin.as_str().as_bytes());
        if matches {
            self.retries_left.store(self.max_retries, Ordering::SeqCst);
            return Ok(());
        }
        let left = self
            .retries_left
            .fetch_sub(1, Ordering::SeqCst)
            .saturating_sub(1);
        if left == 0 {
            Err(HardwareError::Locked)
        } else {
            Err(HardwareError::PinRejected { retries_left: left })
        }
    }

    fn sign(&self, payload: &[u8]) -> HardwareResult<Vec<u8>> {
        self.ensure_connected()?;
        let failed = |e: ErrorStack| HardwareError::Transport(format!("signing failed: {e}"));
        match self.key.id() {
            Id::EC => {
                let ec = self.key.ec_key().map_err(failed)?;
                EcdsaSig::sign(payload, &ec)
                    .and_then(|sig| sig.to_der())
                    .map_err(failed)
            }
            Id::RSA => {
                let rsa = self.key.rsa().map_err(failed)?;
                let mut out = vec![0u8; rsa.size() as usize];
                let len = rsa
                    .private_encrypt(payload, &mut out, Padding::PKCS1)
                    .map_err(failed)?;
                out.truncate(len);
                Ok(out)
            }
            Id::ED25519 => {
                let mut signer = Signer::new_without_digest(&self.key).map_err(failed)?;
                signer.sign_oneshot_to_vec(payload).map_err(failed)
            }
            other => Err(HardwareError::Unsupported(format!("key type {other:?}"))),
        }
    }

    fn public_key_or_certificate(&self) -> HardwareResult<Vec<u8>> {
        self.ensure_connected()?;
        let der = match &self.certificate {
            Some(cert) => cert.to_der(),
            None => self.key.public_key_to_der(),
        };
        der.map_err(|e| HardwareError::MalformedKey(e.to_string()))
    }

    fn openssh_certificate(&self) -> HardwareResult<Option<Vec<u8>>> {
        self.ensure_connected()?;
        Ok(self.openssh_certificate.clone())
    }
}

impl std::fmt::Debug for SoftwareToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareToken")
            .field("key", &self.key.id())
            .field("certificate", &self.certificate.is_some())
            .field("pin", &self.pin.is_some())
            .field("retries_left", &self.retries_left.load(Ordering::SeqCst))
            .finish()
    }
}

/// Self-signed X.509 certificate over `key`, valid for a year.
pub(crate) fn self_signed_certificate(
    key: &PKey<Private>,
    common_name: &str,
) -> std::result::Result<X509, ErrorStack> {
    let mut x509_builder = X509Builder::new()?;
    x509_builder.set_version(2)?;

    let serial = BigNum::from_u32(1)?.to_asn1_integer()?;
    x509_builder.set_serial_number(&serial)?;

    let mut name_builder = X509NameBuilder::new()?;
    name_builder.append_entry_by_text("O", "keybridge")?;
    name_builder.append_entry_by_text("CN", common_name)?;
    let name = name_builder.build();
    x509_builder.set_subject_name(&name)?;
    x509_builder.set_issuer_name(&name)?;

    let not_before = Asn1Time::days_from_now(0)?;
    let not_after = Asn1Time::days_from_now(365)?;
    x509_builder.set_not_before(&not_before)?;
    x509_builder.set_not_after(&not_after)?;

    x509_builder.set_pubkey(key)?;
    x509_builder.append_extension(BasicConstraints::new().build()?)?;
    x509_builder.append_extension(KeyUsage::new().critical().digital_signature().build()?)?;

    // Ed25519 certificates are signed without a separate digest
    let digest = if key.id() == Id::ED25519 {
        MessageDigest::null()
    } else {
        MessageDigest::sha256()
    };
    x509_builder.sign(key, digest)?;
    Ok(x509_builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::digest::DigestAlgorithm;
    use openssl::sign::Verifier;

    #[test]
    fn test_ecdsa_signs_digest() {
        let token = SoftwareToken::generate(SoftwareKeyAlgorithm::EcdsaP256).unwrap();
        let digest = DigestAlgorithm::Sha256.digest(b"message");
        let der = token.sign(&digest).unwrap();

        let public = PKey::public_key_from_der(&token.public_key_or_certificate().unwrap()).unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha256(), &public).unwrap();
        verifier.update(b"message").unwrap();
        assert!(verifier.verify(&der).unwrap());
    }

    #[test]
    fn test_rsa_signs_digest_info() {
        let token = SoftwareToken::generate(SoftwareKeyAlgorithm::Rsa2048).unwrap();
        let info = DigestAlgorithm::Sha512.digest_info(b"message");
        let sig = token.sign(&info).unwrap();
        assert_eq!(sig.len(), 256);

        let public = PKey::public_key_from_der(&token.public_key_or_certificate().unwrap()).unwrap();
        let mut verifier = Verifier::new(MessageDigest::sha512(), &public).unwrap();
        verifier.update(b"message").unwrap();
        assert!(verifier.verify(&sig).unwrap());
    }

    #[test]
    fn test_ed25519_signs_message() {
        let token = SoftwareToken::generate(SoftwareKeyAlgorithm::Ed25519).unwrap();
        let sig = token.sign(b"message").unwrap();
        assert_eq!(sig.len(), 64);

        let public = PKey::public_key_from_der(&token.public_key_or_certificate().unwrap()).unwrap();
        let mut verifier = Verifier::new_without_digest(&public).unwrap();
        assert!(verifier.verify_oneshot(&sig, b"message").unwrap());
    }

    #[test]
    fn test_pin_retry_counter() {
        let token = SoftwareToken::generate(SoftwareKeyAlgorithm::EcdsaP256)
            .unwrap()
            .with_pin(Pin::new("123456"), 3);

        assert_eq!(
            token.verify_pin(&Pin::new("000000")),
            Err(HardwareError::PinRejected { retries_left: 2 })
        );
        assert!(token.verify_pin(&Pin::new("123456")).is_ok());
        assert_eq!(
            token.verify_pin(&Pin::new("000000")),
            Err(HardwareError::PinRejected { retries_left: 2 })
        );
        assert_eq!(
            token.verify_pin(&Pin::new("000000")),
            Err(HardwareError::PinRejected { retries_left: 1 })
        );
        assert_eq!(token.verify_pin(&Pin::new("000000")), Err(HardwareError::Locked));
        assert_eq!(token.verify_pin(&Pin::new("123456")), Err(HardwareError::Locked));
    }

    #[test]
    fn test_disconnected_token_reports_transport_error() {
        let token = SoftwareToken::generate(SoftwareKeyAlgorithm::EcdsaP256).unwrap();
        token.set_connected(false);
        assert!(matches!(token.sign(&[0u8; 32]), Err(HardwareError::Transport(_))));
    }

    #[test]
    fn test_pem_round_trip() {
        let token = SoftwareToken::generate(SoftwareKeyAlgorithm::EcdsaP384).unwrap();
        let pem = token.private_key_pem().unwrap();
        let loaded = SoftwareToken::from_pem(&pem).unwrap();
        assert_eq!(
            loaded.public_key_or_certificate().unwrap(),
            token.public_key_or_certificate().unwrap()
        );
        assert!(SoftwareToken::from_pem(b"garbage").is_err());
    }
}
