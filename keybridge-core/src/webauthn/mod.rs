//! WebAuthn / FIDO2 relying party
//!
//! Builds `PublicKeyCredentialCreationOptions` / `RequestOptions` for a user and
//! verifies the credentials returned by the browser. Authentication enforces
//! the signature counter: a non-zero counter that does not move forward is
//! treated as a cloned authenticator.

pub mod attestation;
pub mod metadata;
pub mod types;

use std::sync::Arc;

pub use types::*;

use crate::challenge::{against_pending, ChallengeStore, Purpose};
use crate::config::RelyingPartyConfig;
use crate::encoding::b64url_encode;
use crate::entropy::{random_array, EntropySource};
use crate::error::{KeybridgeError, Result};
use crate::registry::{AuthenticatorTransport, Credential, CredentialProtocol, COSE_ALG_ES256};
use crate::store::UserRepository;
use crate::verify::authenticator_data::AuthenticatorData;
use crate::verify::client_data::{CollectedClientData, TYPE_WEBAUTHN_CREATE, TYPE_WEBAUTHN_GET};
use crate::verify::{SignatureVerifier, VerifyingKey};
use attestation::AttestationObject;

/// Transports assumed for a roaming key that did not report any.
const DEFAULT_TRANSPORTS: [AuthenticatorTransport; 2] =
    [AuthenticatorTransport::Usb, AuthenticatorTransport::Nfc];

pub struct WebAuthnProtocolHandler<R> {
    config: RelyingPartyConfig,
    repo: Arc<R>,
    entropy: Arc<dyn EntropySource>,
    challenges: ChallengeStore<R>,
}

impl<R: UserRepository> WebAuthnProtocolHandler<R> {
    pub fn new(config: RelyingPartyConfig, repo: Arc<R>, entropy: Arc<dyn EntropySource>) -> Self {
        let challenges = ChallengeStore::new(
            Arc::clone(&repo),
            Arc::clone(&entropy),
            config.challenge_policy(),
        );
        Self {
            config,
            repo,
            entropy,
            challenges,
        }
    }

    pub fn config(&self) -> &RelyingPartyConfig {
        &self.config
    }

    /// Build creation options for `username`, issuing a registration challenge.
    ///
    /// The user handle is generated on the first call for a user and reused
    /// afterwards.
    pub fn register_request(
        &self,
        username: &str,
        user_verification: UserVerificationRequirement,
        attestation: AttestationConveyancePreference,
    ) -> Result<PublicKeyCredentialCreationOptions> {
        let uv_required = user_verification == UserVerificationRequirement::Required;
        let (user_handle, challenge) = self.repo.with_user(username, |record| {
            let handle = match record.user_handle {
                Some(handle) => handle,
                None => {
                    let handle: [u8; 16] = random_array(self.entropy.as_ref())?;
                    record.user_handle = Some(handle);
                    handle
                }
            };
            let challenge =
                self.challenges
                    .issue_locked(record, Purpose::Registration, uv_required)?;
            Ok::<_, KeybridgeError>((handle, challenge))
        })??;
        tracing::debug!(username, ?user_verification, "WebAuthn registration challenge issued");

        Ok(PublicKeyCredentialCreationOptions {
            rp: RelyingPartyEntity {
                id: self.config.rp_id().to_string(),
                name: self.config.rp_name().to_string(),
            },
            user: UserEntity {
                id: user_handle.to_vec(),
                name: username.to_string(),
                display_name: username.to_string(),
            },
            challenge: challenge.to_base64url(),
            pub_key_cred_params: vec![PublicKeyCredentialParameters {
                kind: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
                alg: COSE_ALG_ES256,
            }],
            timeout: self.config.timeout_ms(),
            authenticator_selection: AuthenticatorSelectionCriteria {
                authenticator_attachment: Some(AuthenticatorAttachment::CrossPlatform),
                require_resident_key: false,
                user_verification,
            },
            attestation,
        })
    }

    /// Verify a new credential and store it with its initial counter.
    pub fn register_finish(
        &self,
        username: &str,
        credential: &RegistrationCredential,
    ) -> Result<WebAuthnRegistration> {
        let response = &credential.response;
        let client_data = CollectedClientData::parse(&response.client_data_json)?;
        client_data.expect_type(TYPE_WEBAUTHN_CREATE)?;
        client_data.expect_origin(self.config.origin())?;
        let echoed = client_data.challenge_bytes()?;

        let object = AttestationObject::parse(&response.attestation_object)?;
        let auth_data = AuthenticatorData::parse(&object.auth_data)?;
        let attested = auth_data
            .attested
            .as_ref()
            .ok_or_else(|| KeybridgeError::parse("attested credential data missing"))?;
        if attested.credential_id != credential.raw_id {
            return Err(KeybridgeError::parse("rawId does not match attested credential id"));
        }
        let rp_id_hash = self.config.rp_id_hash();
        let policy = self.config.challenge_policy();
        let transports = if response.transports.is_empty() {
            DEFAULT_TRANSPORTS.to_vec()
        } else {
            response.transports.clone()
        };

        let result = self.repo.with_user(username, |record| {
            against_pending(record, Purpose::Registration, &policy, |pending, credentials| {
                pending.check(&echoed)?;
                check_flags(&auth_data, &rp_id_hash, pending.user_verification_required)?;
                let format = object.verify(&auth_data, &response.client_data_json)?;

                let mut stored = Credential::new(
                    CredentialProtocol::WebAuthn,
                    attested.credential_id.clone(),
                    attested.public_key.to_sec1(),
                    auth_data.sign_count,
                );
                stored.algorithm = attested.public_key.alg;
                stored.transports = transports;
                stored.aaguid = Some(attested.aaguid_string());
                let evicted = credentials.add(stored.clone());

                Ok(WebAuthnRegistration {
                    device_model: metadata::lookup_device_model(&attested.aaguid_string()),
                    credential: stored,
                    evicted,
                    attestation_format: format,
                })
            })
        })?;

        match &result {
            Ok(reg) => tracing::info!(
                username,
                credential_id = %reg.credential.id_base64url(),
                sign_count = reg.credential.sign_count,
                format = reg.attestation_format.as_fmt(),
                "WebAuthn registration verified"
            ),
            Err(e) => tracing::warn!(username, purpose = %Purpose::Registration, error = %e, "WebAuthn registration rejected"),
        }
        result
    }

    /// Build request options listing the user's credentials, newest first.
    pub fn authenticate_request(
        &self,
        username: &str,
        user_verification: UserVerificationRequirement,
    ) -> Result<PublicKeyCredentialRequestOptions> {
        let uv_required = user_verification == UserVerificationRequirement::Required;
        let (challenge, allow_credentials) = self.repo.with_user(username, |record| {
            if !record.credentials.has_protocol(CredentialProtocol::WebAuthn) {
                return Err(KeybridgeError::NoRegisteredCredentials);
            }
            let descriptors = record.credentials.descriptors_for(CredentialProtocol::WebAuthn);
            let challenge =
                self.challenges
                    .issue_locked(record, Purpose::Authentication, uv_required)?;
            Ok((challenge, descriptors))
        })??;
        tracing::debug!(
            username,
            credentials = allow_credentials.len(),
            "WebAuthn authentication challenge issued"
        );

        Ok(PublicKeyCredentialRequestOptions {
            challenge: challenge.to_base64url(),
            timeout: self.config.timeout_ms(),
            rp_id: self.config.rp_id().to_string(),
            allow_credentials,
            user_verification,
        })
    }

    /// Verify an assertion and advance the stored signature counter.
    pub fn authenticate_finish(
        &self,
        username: &str,
        credential: &AssertionCredential,
    ) -> Result<WebAuthnAuthentication> {
        let response = &credential.response;
        let credential_id = credential.raw_id.as_slice();
        let client_data = CollectedClientData::parse(&response.client_data_json)?;
        client_data.expect_type(TYPE_WEBAUTHN_GET)?;
        client_data.expect_origin(self.config.origin())?;
        let echoed = client_data.challenge_bytes()?;
        let auth_data = AuthenticatorData::parse(&response.authenticator_data)?;
        let rp_id_hash = self.config.rp_id_hash();
        let policy = self.config.challenge_policy();

        let result = self.repo.with_user(username, |record| {
            let known = record
                .credentials
                .find_for(CredentialProtocol::WebAuthn, credential_id)
                .is_some();
            if !known {
                return Err(KeybridgeError::UnknownCredential);
            }
            if let Some(handle) = &response.user_handle {
                if record.user_handle.map(|h| h.to_vec()).as_ref() != Some(handle) {
                    return Err(KeybridgeError::UnknownCredential);
                }
            }
            against_pending(record, Purpose::Authentication, &policy, |pending, credentials| {
                pending.check(&echoed)?;
                let stored = credentials
                    .find_mut_for(CredentialProtocol::WebAuthn, credential_id)
                    .ok_or(KeybridgeError::UnknownCredential)?;
                let key = VerifyingKey::from_sec1_p256(&stored.public_key)?;
                SignatureVerifier::verify_webauthn(
                    &key,
                    &auth_data,
                    &response.client_data_json,
                    &response.signature,
                )?;
                check_flags(&auth_data, &rp_id_hash, pending.user_verification_required)?;

                stored.sign_count = next_sign_count(stored.sign_count, auth_data.sign_count)?;
                Ok(WebAuthnAuthentication {
                    credential_id: credential_id.to_vec(),
                    sign_count: stored.sign_count,
                    user_verified: auth_data.user_verified(),
                })
            })
        })?;

        match &result {
            Ok(auth) => tracing::info!(
                username,
                credential_id = %b64url_encode(&auth.credential_id),
                sign_count = auth.sign_count,
                "WebAuthn authentication verified"
            ),
            Err(KeybridgeError::PossibleCloneDetected { stored, reported }) => tracing::warn!(
                username,
                credential_id = %b64url_encode(credential_id),
                stored,
                reported,
                "Signature counter went backwards, possible cloned authenticator"
            ),
            Err(e) => tracing::warn!(username, purpose = %Purpose::Authentication, error = %e, "WebAuthn authentication rejected"),
        }
        result
    }
}

/// rpIdHash, user presence and (when requested) user verification.
fn check_flags(auth_data: &AuthenticatorData, rp_id_hash: &[u8; 32], uv_required: bool) -> Result<()> {
    if !openssl::memcmp::eq(&auth_data.rp_id_hash, rp_id_hash) {
        return Err(KeybridgeError::RelyingPartyMismatch);
    }
    if !auth_data.user_present() {
        return Err(KeybridgeError::UserPresenceMissing);
    }
    if uv_required && !auth_data.user_verified() {
        return Err(KeybridgeError::UserVerificationMissing);
    }
    Ok(())
}

/// Counter rule: a non-zero report must exceed the stored value. Zero means the
/// authenticator has no counter and leaves the stored value untouched.
fn next_sign_count(stored: u32, reported: u32) -> Result<u32> {
    match reported {
        0 => Ok(stored),
        n if n > stored => Ok(n),
        _ => Err(KeybridgeError::PossibleCloneDetected { stored, reported }),
    }
}

impl<R> std::fmt::Debug for WebAuthnProtocolHandler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebAuthnProtocolHandler")
            .field("config", &self.config)
            .field("entropy", &self.entropy.source_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::SoftWebAuthnAuthenticator;
    use crate::entropy::MockEntropy;
    use crate::store::MemoryUserStore;

    fn handler() -> WebAuthnProtocolHandler<MemoryUserStore> {
        WebAuthnProtocolHandler::new(
            RelyingPartyConfig::default(),
            Arc::new(MemoryUserStore::new()),
            Arc::new(MockEntropy::default_test()),
        )
    }

    fn register(
        handler: &WebAuthnProtocolHandler<MemoryUserStore>,
        key: &mut SoftWebAuthnAuthenticator,
        username: &str,
    ) -> WebAuthnRegistration {
        let options = handler
            .register_request(
                username,
                UserVerificationRequirement::Discouraged,
                AttestationConveyancePreference::None,
            )
            .unwrap();
        let credential = key.create(&options, "https://fido-login.example.com").unwrap();
        handler.register_finish(username, &credential).unwrap()
    }

    #[test]
    fn test_sign_count_rule() {
        assert_eq!(next_sign_count(0, 0).unwrap(), 0);
        assert_eq!(next_sign_count(0, 5).unwrap(), 5);
        assert_eq!(next_sign_count(5, 0).unwrap(), 5);
        assert!(matches!(
            next_sign_count(5, 5),
            Err(KeybridgeError::PossibleCloneDetected { stored: 5, reported: 5 })
        ));
        assert!(next_sign_count(5, 3).is_err());
        assert_eq!(next_sign_count(5, 6).unwrap(), 6);
    }

    #[test]
    fn test_creation_options_shape() {
        let handler = handler();
        let options = handler
            .register_request(
                "alice",
                UserVerificationRequirement::Preferred,
                AttestationConveyancePreference::Direct,
            )
            .unwrap();

        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json["rp"]["id"], "fido-login.example.com");
        assert_eq!(json["rp"]["name"], "FIDO-Example Relying Party");
        assert_eq!(json["user"]["name"], "alice");
        assert_eq!(json["user"]["displayName"], "alice");
        assert_eq!(json["pubKeyCredParams"][0]["type"], "public-key");
        assert_eq!(json["pubKeyCredParams"][0]["alg"], -7);
        assert_eq!(json["timeout"], 60000);
        assert_eq!(
            json["authenticatorSelection"]["authenticatorAttachment"],
            "cross-platform"
        );
        assert_eq!(json["authenticatorSelection"]["requireResidentKey"], false);
        assert_eq!(json["authenticatorSelection"]["userVerification"], "preferred");
        assert_eq!(json["attestation"], "direct");
    }

    #[test]
    fn test_user_handle_is_stable() {
        let handler = handler();
        let first = handler
            .register_request("alice", Default::default(), Default::default())
            .unwrap();
        let second = handler
            .register_request("alice", Default::default(), Default::default())
            .unwrap();
        let other = handler
            .register_request("bob", Default::default(), Default::default())
            .unwrap();

        assert_eq!(first.user.id, second.user.id);
        assert_ne!(first.user.id, other.user.id);
        assert_eq!(first.user.id.len(), 16);
        assert_ne!(first.challenge, second.challenge);
    }

    #[test]
    fn test_origin_mismatch() {
        let handler = handler();
        let mut key = SoftWebAuthnAuthenticator::new().unwrap();
        let options = handler
            .register_request("alice", Default::default(), Default::default())
            .unwrap();
        let credential = key.create(&options, "https://evil.example.com").unwrap();

        let err = handler.register_finish("alice", &credential).unwrap_err();
        assert!(matches!(err, KeybridgeError::OriginMismatch { .. }));
    }

    #[test]
    fn test_registration_records_default_transports() {
        let handler = handler();
        let mut key = SoftWebAuthnAuthenticator::new().unwrap();
        let reg = register(&handler, &mut key, "alice");

        assert_eq!(reg.credential.transports, DEFAULT_TRANSPORTS.to_vec());
        assert_eq!(reg.attestation_format, AttestationFormat::None);
        assert_eq!(reg.credential.protocol, CredentialProtocol::WebAuthn);
    }

    #[test]
    fn test_user_verification_required() {
        let handler = handler();
        let mut key = SoftWebAuthnAuthenticator::new().unwrap();
        register(&handler, &mut key, "alice");

        let options = handler
            .authenticate_request("alice", UserVerificationRequirement::Required)
            .unwrap();
        key.set_user_verified(false);
        let assertion = key.get(&options, "https://fido-login.example.com").unwrap();
        let err = handler.authenticate_finish("alice", &assertion).unwrap_err();
        assert!(matches!(err, KeybridgeError::UserVerificationMissing));

        key.set_user_verified(true);
        let assertion = key.get(&options, "https://fido-login.example.com").unwrap();
        let auth = handler.authenticate_finish("alice", &assertion).unwrap();
        assert!(auth.user_verified);
    }

    #[test]
    fn test_foreign_user_handle_is_unknown_credential() {
        let handler = handler();
        let mut key = SoftWebAuthnAuthenticator::new().unwrap();
        register(&handler, &mut key, "alice");

        let options = handler
            .authenticate_request("alice", Default::default())
            .unwrap();
        let mut assertion = key.get(&options, "https://fido-login.example.com").unwrap();
        assertion.response.user_handle = Some(vec![0xEE; 16]);

        let err = handler.authenticate_finish("alice", &assertion).unwrap_err();
        assert!(matches!(err, KeybridgeError::UnknownCredential));
    }
}
