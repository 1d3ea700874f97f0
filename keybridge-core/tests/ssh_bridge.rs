//! Signing bridge: SSH identities and digest signatures over software tokens.

use std::sync::Arc;

use keybridge_core::bridge::ssh::SshReader;
use keybridge_core::{
    DigestAlgorithm, DigestSigner, HardwareError, HardwareToken, KeybridgeError, Pin,
    PublicKeyMaterial, SecurityKey, SecurityKeySshIdentity, SoftwareKeyAlgorithm, SoftwareToken,
    SshAuthError, SshIdentity,
};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::sign::Verifier;
use openssl::x509::X509;
use tokio_util::sync::CancellationToken;

fn piv_token(alg: SoftwareKeyAlgorithm) -> Arc<SoftwareToken> {
    Arc::new(
        SoftwareToken::generate(alg)
            .unwrap()
            .with_pin(Pin::new("123456"), 3)
            .with_self_signed_certificate("PIV Authentication")
            .unwrap(),
    )
}

fn verifying_key(token: &SoftwareToken) -> PKey<openssl::pkey::Public> {
    let der = token.public_key_or_certificate().unwrap();
    match X509::from_der(&der) {
        Ok(cert) => cert.public_key().unwrap(),
        Err(_) => PKey::public_key_from_der(&der).unwrap(),
    }
}

#[test]
fn test_digest_signatures_verify_per_algorithm() {
    let cases = [
        (SoftwareKeyAlgorithm::EcdsaP256, "SHA-256", MessageDigest::sha256()),
        (SoftwareKeyAlgorithm::EcdsaP384, "SHA-384", MessageDigest::sha384()),
        (SoftwareKeyAlgorithm::Rsa2048, "SHA-512", MessageDigest::sha512()),
        (SoftwareKeyAlgorithm::Rsa2048, "SHA-1", MessageDigest::sha1()),
    ];
    for (alg, digest, md) in cases {
        let token = piv_token(alg);
        let auth = SecurityKey::piv(Arc::clone(&token) as Arc<dyn HardwareToken>)
            .create_authenticator(Pin::new("123456"))
            .unwrap();
        let signer = DigestSigner::new(auth, CancellationToken::new());
        let signature = signer.sign_with_digest(b"login challenge", digest).unwrap();

        let key = verifying_key(&token);
        let mut verifier = Verifier::new(md, &key).unwrap();
        verifier.update(b"login challenge").unwrap();
        assert!(verifier.verify(&signature).unwrap(), "{alg:?} {digest}");
    }
}

#[test]
fn test_digest_signer_ed25519_signs_digest_bytes() {
    let token = Arc::new(SoftwareToken::generate(SoftwareKeyAlgorithm::Ed25519).unwrap());
    let auth = SecurityKey::openpgp(Arc::clone(&token) as Arc<dyn HardwareToken>)
        .create_authenticator(Pin::new("123456"))
        .unwrap();
    let signature = DigestSigner::new(auth, CancellationToken::new())
        .sign_with_digest(b"payload", "SHA-256")
        .unwrap();

    let key = verifying_key(&token);
    let mut verifier = Verifier::new_without_digest(&key).unwrap();
    let digest = DigestAlgorithm::Sha256.digest(b"payload");
    assert!(verifier.verify_oneshot(&signature, &digest).unwrap());
}

#[test]
fn test_digest_signer_rejects_unknown_digest() {
    let token = piv_token(SoftwareKeyAlgorithm::EcdsaP256);
    let auth = SecurityKey::piv(token)
        .create_authenticator(Pin::new("123456"))
        .unwrap();
    let err = DigestSigner::new(auth, CancellationToken::new())
        .sign_with_digest(b"payload", "MD5")
        .unwrap_err();
    assert!(matches!(err, KeybridgeError::UnsupportedDigest(_)));
}

#[test]
fn test_wrong_pin_locks_after_retries() {
    let token = piv_token(SoftwareKeyAlgorithm::EcdsaP256);
    let auth = SecurityKey::piv(token)
        .create_authenticator(Pin::new("654321"))
        .unwrap();
    let signer = DigestSigner::new(auth, CancellationToken::new());

    let err = signer.sign_with_digest(b"x", "SHA-256").unwrap_err();
    assert!(matches!(
        err,
        KeybridgeError::HardwareIo(HardwareError::PinRejected { retries_left: 2 })
    ));
    assert!(err.is_retryable());
    signer.sign_with_digest(b"x", "SHA-256").unwrap_err();
    let err = signer.sign_with_digest(b"x", "SHA-256").unwrap_err();
    assert!(matches!(err, KeybridgeError::HardwareIo(HardwareError::Locked)));
}

#[test]
fn test_cancelled_digest_signature() {
    let token = piv_token(SoftwareKeyAlgorithm::EcdsaP256);
    let auth = SecurityKey::piv(token)
        .create_authenticator(Pin::new("123456"))
        .unwrap();
    let cancel = CancellationToken::new();
    let signer = DigestSigner::new(auth, cancel.clone());
    cancel.cancel();

    let err = signer.sign_with_digest(b"x", "SHA-256").unwrap_err();
    assert!(matches!(err, KeybridgeError::HardwareIo(HardwareError::Cancelled)));
}

#[test]
fn test_ssh_identity_from_piv_certificate() {
    let token = piv_token(SoftwareKeyAlgorithm::EcdsaP521);
    let auth = SecurityKey::piv(token)
        .create_authenticator(Pin::new("123456"))
        .unwrap();
    let identity = SecurityKeySshIdentity::from_authenticator(auth, CancellationToken::new())
        .unwrap()
        .with_name("alice@host");

    assert!(matches!(identity.public_key(), PublicKeyMaterial::EcdsaP521(_)));
    assert_eq!(identity.algorithm_name(), "ecdsa-sha2-nistp521");
    assert_eq!(identity.name(), "alice@host");
    assert!(identity
        .authorized_keys_line()
        .starts_with("ecdsa-sha2-nistp521 AAAAE2VjZHNhLXNoYTItbmlzdHA1MjE"));

    let blob = identity.sign(b"session").unwrap();
    let mut reader = SshReader::new(&blob);
    assert_eq!(reader.string_utf8().unwrap(), "ecdsa-sha2-nistp521");
    let mut inner = SshReader::new(reader.string().unwrap());
    assert!(inner.string().is_ok());
    assert!(inner.string().is_ok());
    assert!(inner.is_empty());
}

#[test]
fn test_ssh_identity_picks_up_stored_certificate() {
    let base = SoftwareToken::generate(SoftwareKeyAlgorithm::Ed25519).unwrap();
    let PublicKeyMaterial::Ed25519(raw) = PublicKeyMaterial::from_der(
        &base.public_key_or_certificate().unwrap(),
    )
    .unwrap() else {
        panic!("expected Ed25519");
    };

    let fields: [&[u8]; 3] = [b"ssh-ed25519-cert-v01@openssh.com", &[3u8; 32], &raw];
    let mut cert = Vec::new();
    for field in fields {
        cert.extend_from_slice(&(field.len() as u32).to_be_bytes());
        cert.extend_from_slice(field);
    }
    let token = Arc::new(base.with_openssh_certificate(cert.clone()));
    let auth = SecurityKey::openpgp(token)
        .create_authenticator(Pin::new("123456"))
        .unwrap();
    let identity =
        SecurityKeySshIdentity::from_authenticator(auth, CancellationToken::new()).unwrap();

    assert!(identity.has_certificate());
    assert_eq!(identity.public_key_blob(), cert);
    assert_eq!(identity.algorithm_name(), "ssh-ed25519-cert-v01@openssh.com");
}

#[test]
fn test_ssh_identity_rejects_certificate_for_other_key_type() {
    let token = Arc::new(
        SoftwareToken::generate(SoftwareKeyAlgorithm::EcdsaP256)
            .unwrap()
            .with_openssh_certificate({
                let mut cert = Vec::new();
                let kind = b"ssh-rsa-cert-v01@openssh.com";
                cert.extend_from_slice(&(kind.len() as u32).to_be_bytes());
                cert.extend_from_slice(kind);
                cert
            }),
    );
    let auth = SecurityKey::piv(token)
        .create_authenticator(Pin::new("123456"))
        .unwrap();
    let err = SecurityKeySshIdentity::from_authenticator(auth, CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, SshAuthError::CertificateMismatch(_)));
}
