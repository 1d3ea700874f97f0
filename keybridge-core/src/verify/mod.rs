//! Signature verification for U2F and WebAuthn responses.
//!
//! Every signed message in both protocols is an ECDSA P-256 / SHA-256
//! signature in DER form. [`SignatureVerifier`] knows how each protocol lays
//! out the signed bytes; [`VerifyingKey`] does the actual check through OpenSSL.

pub mod authenticator_data;
pub mod client_data;
pub mod cose;

use openssl::bn::BigNumContext;
use openssl::ec::{EcGroup, EcKey, EcPoint};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Public};
use openssl::sign::Verifier;
use openssl::x509::X509;

use crate::error::{KeybridgeError, Result};
use authenticator_data::AuthenticatorData;
use cose::CoseKey;

/// A public key that verifies ECDSA/SHA-256 signatures.
#[derive(Clone)]
pub struct VerifyingKey {
    key: PKey<Public>,
}

impl VerifyingKey {
    /// From an uncompressed SEC1 P-256 point (65 bytes).
    pub fn from_sec1_p256(point: &[u8]) -> Result<Self> {
        let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
        let mut ctx = BigNumContext::new()?;
        let point = EcPoint::from_bytes(&group, point, &mut ctx)
            .map_err(|_| KeybridgeError::parse("public key is not a valid P-256 point"))?;
        let ec_key = EcKey::from_public_key(&group, &point)?;
        ec_key
            .check_key()
            .map_err(|_| KeybridgeError::parse("public key is not on the P-256 curve"))?;
        Ok(Self {
            key: PKey::from_ec_key(ec_key)?,
        })
    }

    pub fn from_cose(key: &CoseKey) -> Result<Self> {
        Self::from_sec1_p256(&key.to_sec1())
    }

    /// Subject public key of a DER X.509 certificate (attestation certificates).
    pub fn from_x509_der(der: &[u8]) -> Result<Self> {
        let cert = X509::from_der(der)
            .map_err(|_| KeybridgeError::parse("invalid attestation certificate"))?;
        Ok(Self {
            key: cert.public_key()?,
        })
    }

    /// Verify a DER signature over `data` (hashed with SHA-256).
    ///
    /// Malformed signatures are rejected as `SignatureInvalid`, never as a parse error.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        let mut verifier = Verifier::new(MessageDigest::sha256(), &self.key)?;
        verifier.update(data)?;
        match verifier.verify(signature) {
            Ok(true) => Ok(()),
            Ok(false) | Err(_) => Err(KeybridgeError::SignatureInvalid),
        }
    }
}

impl std::fmt::Debug for VerifyingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerifyingKey")
            .field("id", &self.key.id())
            .field("bits", &self.key.bits())
            .finish()
    }
}

/// Protocol-specific layouts of the signed data.
pub struct SignatureVerifier;

impl SignatureVerifier {
    /// `0x00 ‖ SHA256(appId) ‖ SHA256(clientData) ‖ keyHandle ‖ userPublicKey`
    pub fn u2f_registration_data(
        app_id_hash: &[u8; 32],
        client_data: &[u8],
        key_handle: &[u8],
        user_public_key: &[u8],
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + 64 + key_handle.len() + user_public_key.len());
        out.push(0x00);
        out.extend_from_slice(app_id_hash);
        out.extend_from_slice(&openssl::sha::sha256(client_data));
        out.extend_from_slice(key_handle);
        out.extend_from_slice(user_public_key);
        out
    }

    /// `SHA256(appId) ‖ flags ‖ counter(BE) ‖ SHA256(clientData)`
    pub fn u2f_authentication_data(
        app_id_hash: &[u8; 32],
        flags: u8,
        counter: u32,
        client_data: &[u8],
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 1 + 4 + 32);
        out.extend_from_slice(app_id_hash);
        out.push(flags);
        out.extend_from_slice(&counter.to_be_bytes());
        out.extend_from_slice(&openssl::sha::sha256(client_data));
        out
    }

    /// `authenticatorData ‖ SHA256(clientDataJSON)`
    pub fn webauthn_data(authenticator_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(authenticator_data.len() + 32);
        out.extend_from_slice(authenticator_data);
        out.extend_from_slice(&openssl::sha::sha256(client_data_json));
        out
    }

    pub fn verify_u2f_registration(
        attestation_cert: &[u8],
        app_id_hash: &[u8; 32],
        client_data: &[u8],
        key_handle: &[u8],
        user_public_key: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let key = VerifyingKey::from_x509_der(attestation_cert)?;
        let data =
            Self::u2f_registration_data(app_id_hash, client_data, key_handle, user_public_key);
        key.verify(&data, signature)
    }

    pub fn verify_u2f_authentication(
        key: &VerifyingKey,
        app_id_hash: &[u8; 32],
        flags: u8,
        counter: u32,
        client_data: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let data = Self::u2f_authentication_data(app_id_hash, flags, counter, client_data);
        key.verify(&data, signature)
    }

    pub fn verify_webauthn(
        key: &VerifyingKey,
        authenticator_data: &AuthenticatorData,
        client_data_json: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let data = Self::webauthn_data(authenticator_data.as_bytes(), client_data_json);
        key.verify(&data, signature)
    }
}
