//! Software authenticators speaking U2F and WebAuthn.
//!
//! **WARNING**: keys are held in process memory. These emulators exist for
//! tests and the CLI demos, never for real logins.

use ciborium::value::Value;
use openssl::bn::BigNumContext;
use openssl::ec::{EcGroup, EcKey, PointConversionForm};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::sign::Signer;
use openssl::x509::X509;

use crate::bridge::software::self_signed_certificate;
use crate::encoding::{b64url_decode, b64url_encode};
use crate::error::{KeybridgeError, Result};
use crate::fido::messages::{RegistrationData, SignatureData};
use crate::fido::{
    FidoAuthenticateRequest, FidoAuthenticateResponse, FidoRegisterRequest, FidoRegisterResponse,
};
use crate::registry::{AuthenticatorTransport, COSE_ALG_ES256};
use crate::verify::authenticator_data::{
    AttestedCredentialData, AuthenticatorData, FLAG_USER_PRESENT, FLAG_USER_VERIFIED,
};
use crate::verify::client_data::{
    CollectedClientData, TYPE_U2F_REGISTER, TYPE_U2F_SIGN, TYPE_WEBAUTHN_CREATE,
    TYPE_WEBAUTHN_GET,
};
use crate::verify::cose::CoseKey;
use crate::verify::SignatureVerifier;
use crate::webauthn::attestation::AttestationObject;
use crate::webauthn::{
    AssertionCredential, AttestationFormat, AuthenticatorAssertionResponse,
    AuthenticatorAttestationResponse, PublicKeyCredentialCreationOptions,
    PublicKeyCredentialRequestOptions, RegistrationCredential, PUBLIC_KEY_CREDENTIAL_TYPE,
};

const KEY_HANDLE_LEN: usize = 64;
const CREDENTIAL_ID_LEN: usize = 32;

fn generate_p256() -> Result<PKey<Private>> {
    let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
    Ok(PKey::from_ec_key(EcKey::generate(&group)?)?)
}

fn sec1_point(key: &PKey<Private>) -> Result<Vec<u8>> {
    let ec = key.ec_key()?;
    let mut ctx = BigNumContext::new()?;
    Ok(ec
        .public_key()
        .to_bytes(ec.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)?)
}

/// DER ECDSA/SHA-256 signature.
fn sign_sha256(key: &PKey<Private>, data: &[u8]) -> Result<Vec<u8>> {
    let mut signer = Signer::new(MessageDigest::sha256(), key)?;
    Ok(signer.sign_oneshot_to_vec(data)?)
}

fn random_bytes<const N: usize>() -> Result<Vec<u8>> {
    let mut out = vec![0u8; N];
    openssl::rand::rand_bytes(&mut out)?;
    Ok(out)
}

fn json_bytes(value: &impl serde::Serialize) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| KeybridgeError::parse(format!("client data: {e}")))
}

struct U2fKey {
    key_handle: Vec<u8>,
    app_id_hash: [u8; 32],
    key: PKey<Private>,
}

/// A U2F security key with a self-signed attestation certificate.
pub struct SoftU2fAuthenticator {
    attestation_key: PKey<Private>,
    attestation_cert: X509,
    keys: Vec<U2fKey>,
    counter: u32,
    user_present: bool,
}

impl SoftU2fAuthenticator {
    pub fn new() -> Result<Self> {
        let attestation_key = generate_p256()?;
        let attestation_cert = self_signed_certificate(&attestation_key, "Soft U2F Attestation")?;
        Ok(Self {
            attestation_key,
            attestation_cert,
            keys: Vec::new(),
            counter: 0,
            user_present: true,
        })
    }

    /// Simulate the user not touching the key: the presence bit is cleared but
    /// the key still signs.
    pub fn set_user_present(&mut self, present: bool) {
        self.user_present = present;
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    pub fn register(&mut self, request: &FidoRegisterRequest) -> Result<FidoRegisterResponse> {
        let client_data = json_bytes(&serde_json::json!({
            "typ": TYPE_U2F_REGISTER,
            "challenge": request.challenge,
            "origin": request.facet_id,
        }))?;
        let app_id_hash = openssl::sha::sha256(request.app_id.as_bytes());

        let key = generate_p256()?;
        let user_public_key = sec1_point(&key)?;
        let key_handle = random_bytes::<KEY_HANDLE_LEN>()?;
        let signed = SignatureVerifier::u2f_registration_data(
            &app_id_hash,
            &client_data,
            &key_handle,
            &user_public_key,
        );
        let registration = RegistrationData {
            user_public_key,
            key_handle: key_handle.clone(),
            attestation_cert: self.attestation_cert.to_der()?,
            signature: sign_sha256(&self.attestation_key, &signed)?,
        };
        self.keys.push(U2fKey {
            key_handle,
            app_id_hash,
            key,
        });

        Ok(FidoRegisterResponse {
            client_data,
            registration_data: registration.to_bytes()?,
        })
    }

    /// Sign with the first requested key handle this authenticator owns.
    pub fn authenticate(
        &mut self,
        request: &FidoAuthenticateRequest,
    ) -> Result<FidoAuthenticateResponse> {
        let app_id_hash = openssl::sha::sha256(request.app_id.as_bytes());
        let wanted = request
            .key_handles
            .iter()
            .map(|h| b64url_decode(h))
            .collect::<Result<Vec<_>>>()?;
        let key = wanted
            .iter()
            .find_map(|handle| {
                self.keys
                    .iter()
                    .find(|k| &k.key_handle == handle && k.app_id_hash == app_id_hash)
            })
            .ok_or(KeybridgeError::UnknownCredential)?;

        let client_data = json_bytes(&serde_json::json!({
            "typ": TYPE_U2F_SIGN,
            "challenge": request.challenge,
            "origin": request.facet_id,
        }))?;
        self.counter = self.counter.wrapping_add(1);
        let flags = if self.user_present {
            SignatureData::USER_PRESENCE
        } else {
            0
        };
        let signed = SignatureVerifier::u2f_authentication_data(
            &app_id_hash,
            flags,
            self.counter,
            &client_data,
        );
        let signature = SignatureData {
            flags,
            counter: self.counter,
            signature: sign_sha256(&key.key, &signed)?,
        };

        Ok(FidoAuthenticateResponse {
            key_handle: key.key_handle.clone(),
            client_data,
            signature_data: signature.to_bytes(),
        })
    }
}

impl std::fmt::Debug for SoftU2fAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftU2fAuthenticator")
            .field("keys", &self.keys.len())
            .field("counter", &self.counter)
            .finish()
    }
}

struct WebAuthnKey {
    credential_id: Vec<u8>,
    rp_id_hash: [u8; 32],
    user_handle: Vec<u8>,
    key: PKey<Private>,
}

/// A roaming FIDO2 authenticator with a single global signature counter.
pub struct SoftWebAuthnAuthenticator {
    aaguid: [u8; 16],
    attestation: AttestationFormat,
    attestation_key: PKey<Private>,
    attestation_cert: X509,
    transports: Vec<AuthenticatorTransport>,
    keys: Vec<WebAuthnKey>,
    sign_count: u32,
    counter_supported: bool,
    user_present: bool,
    user_verified: bool,
}

impl SoftWebAuthnAuthenticator {
    /// `none` attestation, zero AAGUID, counter starting at 0.
    pub fn new() -> Result<Self> {
        let attestation_key = generate_p256()?;
        let attestation_cert =
            self_signed_certificate(&attestation_key, "Soft WebAuthn Attestation")?;
        Ok(Self {
            aaguid: [0u8; 16],
            attestation: AttestationFormat::None,
            attestation_key,
            attestation_cert,
            transports: Vec::new(),
            keys: Vec::new(),
            sign_count: 0,
            counter_supported: true,
            user_present: true,
            user_verified: true,
        })
    }

    pub fn with_aaguid(mut self, aaguid: [u8; 16]) -> Self {
        self.aaguid = aaguid;
        self
    }

    pub fn with_attestation(mut self, format: AttestationFormat) -> Self {
        self.attestation = format;
        self
    }

    pub fn with_transports(mut self, transports: Vec<AuthenticatorTransport>) -> Self {
        self.transports = transports;
        self
    }

    /// Always report a signature counter of 0.
    pub fn without_counter(mut self) -> Self {
        self.counter_supported = false;
        self
    }

    /// Set the counter; the next assertion reports `count + 1`.
    pub fn set_sign_count(&mut self, count: u32) {
        self.sign_count = count;
    }

    pub fn set_user_present(&mut self, present: bool) {
        self.user_present = present;
    }

    pub fn set_user_verified(&mut self, verified: bool) {
        self.user_verified = verified;
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.user_present {
            flags |= FLAG_USER_PRESENT;
        }
        if self.user_verified {
            flags |= FLAG_USER_VERIFIED;
        }
        flags
    }

    fn reported_count(&self) -> u32 {
        if self.counter_supported {
            self.sign_count
        } else {
            0
        }
    }

    /// `navigator.credentials.create()` as seen from `origin`.
    pub fn create(
        &mut self,
        options: &PublicKeyCredentialCreationOptions,
        origin: &str,
    ) -> Result<RegistrationCredential> {
        if !options
            .pub_key_cred_params
            .iter()
            .any(|p| p.alg == COSE_ALG_ES256)
        {
            let offered = options.pub_key_cred_params.first().map_or(0, |p| p.alg);
            return Err(KeybridgeError::UnsupportedAlgorithm(offered));
        }
        let client_data_json = json_bytes(&CollectedClientData {
            kind: TYPE_WEBAUTHN_CREATE.to_string(),
            challenge: options.challenge.clone(),
            origin: origin.to_string(),
            cross_origin: Some(false),
        })?;
        let rp_id_hash = openssl::sha::sha256(options.rp.id.as_bytes());

        let key = generate_p256()?;
        let public_point = sec1_point(&key)?;
        let credential_id = random_bytes::<CREDENTIAL_ID_LEN>()?;
        let auth_data = AuthenticatorData::build(
            rp_id_hash,
            self.flags(),
            self.reported_count(),
            Some(AttestedCredentialData {
                aaguid: self.aaguid,
                credential_id: credential_id.clone(),
                public_key: CoseKey::from_sec1(&public_point)?,
            }),
        )?;
        let raw = auth_data.as_bytes().to_vec();

        let object = match self.attestation {
            AttestationFormat::None => AttestationObject::none(raw),
            AttestationFormat::Packed => {
                let signed = SignatureVerifier::webauthn_data(&raw, &client_data_json);
                AttestationObject::packed_self(raw, sign_sha256(&key, &signed)?)
            }
            AttestationFormat::FidoU2f => {
                let signed = SignatureVerifier::u2f_registration_data(
                    &rp_id_hash,
                    &client_data_json,
                    &credential_id,
                    &public_point,
                );
                AttestationObject {
                    fmt: AttestationFormat::FidoU2f.as_fmt().to_string(),
                    att_stmt: Value::Map(vec![
                        (
                            Value::Text("sig".into()),
                            Value::Bytes(sign_sha256(&self.attestation_key, &signed)?),
                        ),
                        (
                            Value::Text("x5c".into()),
                            Value::Array(vec![Value::Bytes(self.attestation_cert.to_der()?)]),
                        ),
                    ]),
                    auth_data: raw,
                }
            }
        };

        self.keys.push(WebAuthnKey {
            credential_id: credential_id.clone(),
            rp_id_hash,
            user_handle: options.user.id.clone(),
            key,
        });

        Ok(RegistrationCredential {
            id: b64url_encode(&credential_id),
            raw_id: credential_id,
            kind: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
            response: AuthenticatorAttestationResponse {
                client_data_json,
                attestation_object: object.to_cbor()?,
                transports: self.transports.clone(),
            },
        })
    }

    /// `navigator.credentials.get()` as seen from `origin`. Uses the first
    /// allowed credential this authenticator holds for the RP.
    pub fn get(
        &mut self,
        options: &PublicKeyCredentialRequestOptions,
        origin: &str,
    ) -> Result<AssertionCredential> {
        let rp_id_hash = openssl::sha::sha256(options.rp_id.as_bytes());
        let key = if options.allow_credentials.is_empty() {
            self.keys.iter().find(|k| k.rp_id_hash == rp_id_hash)
        } else {
            options.allow_credentials.iter().find_map(|allowed| {
                self.keys
                    .iter()
                    .find(|k| k.credential_id == allowed.id && k.rp_id_hash == rp_id_hash)
            })
        }
        .ok_or(KeybridgeError::UnknownCredential)?;

        if self.counter_supported {
            self.sign_count = self.sign_count.wrapping_add(1);
        }
        let client_data_json = json_bytes(&CollectedClientData {
            kind: TYPE_WEBAUTHN_GET.to_string(),
            challenge: options.challenge.clone(),
            origin: origin.to_string(),
            cross_origin: Some(false),
        })?;
        let auth_data =
            AuthenticatorData::build(rp_id_hash, self.flags(), self.reported_count(), None)?;
        let signed = SignatureVerifier::webauthn_data(auth_data.as_bytes(), &client_data_json);

        Ok(AssertionCredential {
            id: b64url_encode(&key.credential_id),
            raw_id: key.credential_id.clone(),
            kind: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
            response: AuthenticatorAssertionResponse {
                client_data_json,
                authenticator_data: auth_data.as_bytes().to_vec(),
                signature: sign_sha256(&key.key, &signed)?,
                user_handle: Some(key.user_handle.clone()),
            },
        })
    }
}

impl std::fmt::Debug for SoftWebAuthnAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftWebAuthnAuthenticator")
            .field("attestation", &self.attestation)
            .field("credentials", &self.keys.len())
            .field("sign_count", &self.sign_count)
            .finish()
    }
}
