//! FIDO U2F relying party
//!
//! Orchestrates U2F registration and authentication:
//!
//! 1. `register_request` / `authenticate_request` issue a challenge for the user.
//! 2. The caller hands it to a security key and gets back a signed response.
//! 3. `register_finish` / `authenticate_finish` check the client data, the
//!    challenge and the signature, then commit the result and consume the
//!    challenge.
//!
//! Parsing happens before the user's lock is taken; challenge check,
//! signature verification and the state update happen under it.

pub mod messages;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::challenge::{against_pending, ChallengeStore, Purpose};
use crate::config::RelyingPartyConfig;
use crate::encoding::{b64, b64url_encode};
use crate::entropy::EntropySource;
use crate::error::{KeybridgeError, Result};
use crate::registry::{Credential, CredentialProtocol};
use crate::store::UserRepository;
use crate::verify::client_data::{CollectedClientData, TYPE_U2F_REGISTER, TYPE_U2F_SIGN};
use crate::verify::{SignatureVerifier, VerifyingKey};
use messages::{RegistrationData, SignatureData};

/// Protocol version string of every U2F request.
pub const U2F_VERSION: &str = "U2F_V2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FidoRegisterRequest {
    pub version: String,
    pub app_id: String,
    pub facet_id: String,
    pub challenge: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FidoRegisterResponse {
    /// Client data JSON
    #[serde(with = "b64")]
    pub client_data: Vec<u8>,
    /// Raw U2F registration message
    #[serde(with = "b64")]
    pub registration_data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FidoAuthenticateRequest {
    pub version: String,
    pub app_id: String,
    pub facet_id: String,
    pub challenge: String,
    /// Base64url key handles, newest registration first
    pub key_handles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FidoAuthenticateResponse {
    #[serde(with = "b64")]
    pub key_handle: Vec<u8>,
    #[serde(with = "b64")]
    pub client_data: Vec<u8>,
    /// Raw U2F signature message
    #[serde(with = "b64")]
    pub signature_data: Vec<u8>,
}

/// Outcome of a successful registration.
#[derive(Debug, Clone)]
pub struct FidoRegistration {
    pub credential: Credential,
    /// Oldest credential dropped to make room, if any.
    pub evicted: Option<Credential>,
}

/// Outcome of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FidoAuthentication {
    pub key_handle: Vec<u8>,
    pub counter: u32,
}

pub struct FidoProtocolHandler<R> {
    config: RelyingPartyConfig,
    repo: Arc<R>,
    challenges: ChallengeStore<R>,
}

impl<R: UserRepository> FidoProtocolHandler<R> {
    pub fn new(config: RelyingPartyConfig, repo: Arc<R>, entropy: Arc<dyn EntropySource>) -> Self {
        let challenges = ChallengeStore::new(Arc::clone(&repo), entropy, config.challenge_policy());
        Self {
            config,
            repo,
            challenges,
        }
    }

    pub fn config(&self) -> &RelyingPartyConfig {
        &self.config
    }

    /// Start a registration: issue (or replace) the user's registration challenge.
    pub fn register_request(&self, username: &str) -> Result<FidoRegisterRequest> {
        let challenge = self
            .repo
            .with_user(username, |record| {
                self.challenges
                    .issue_locked(record, Purpose::Registration, false)
            })??;
        tracing::debug!(username, "U2F registration challenge issued");

        Ok(FidoRegisterRequest {
            version: U2F_VERSION.to_string(),
            app_id: self.config.app_id().to_string(),
            facet_id: self.config.facet_id().to_string(),
            challenge: challenge.to_base64url(),
        })
    }

    /// Finish a registration and store the new credential.
    pub fn register_finish(
        &self,
        username: &str,
        response: &FidoRegisterResponse,
    ) -> Result<FidoRegistration> {
        let client_data = CollectedClientData::parse(&response.client_data)?;
        client_data.expect_type(TYPE_U2F_REGISTER)?;
        client_data.expect_origin(self.config.facet_id())?;
        let echoed = client_data.challenge_bytes()?;

        let registration = RegistrationData::parse(&response.registration_data)?;
        VerifyingKey::from_sec1_p256(&registration.user_public_key)?;
        let app_id_hash = self.config.app_id_hash();
        let policy = self.config.challenge_policy();

        let result = self.repo.with_user(username, |record| {
            against_pending(record, Purpose::Registration, &policy, |pending, credentials| {
                pending.check(&echoed)?;
                SignatureVerifier::verify_u2f_registration(
                    &registration.attestation_cert,
                    &app_id_hash,
                    &response.client_data,
                    &registration.key_handle,
                    &registration.user_public_key,
                    &registration.signature,
                )?;

                let credential = Credential::new(
                    CredentialProtocol::U2f,
                    registration.key_handle.clone(),
                    registration.user_public_key.clone(),
                    0,
                );
                let evicted = credentials.add(credential.clone());
                Ok(FidoRegistration {
                    credential,
                    evicted,
                })
            })
        })?;

        match &result {
            Ok(reg) => tracing::info!(
                username,
                credential_id = %reg.credential.id_base64url(),
                evicted = reg.evicted.is_some(),
                "U2F registration verified"
            ),
            Err(e) => tracing::warn!(username, purpose = %Purpose::Registration, error = %e, "U2F registration rejected"),
        }
        result
    }

    /// Start an authentication for a user with at least one credential.
    pub fn authenticate_request(&self, username: &str) -> Result<FidoAuthenticateRequest> {
        let (challenge, key_handles) = self.repo.with_user(username, |record| {
            if !record.credentials.has_protocol(CredentialProtocol::U2f) {
                return Err(KeybridgeError::NoRegisteredCredentials);
            }
            let key_handles: Vec<String> = record
                .credentials
                .newest_first_for(CredentialProtocol::U2f)
                .map(|c| b64url_encode(&c.credential_id))
                .collect();
            let challenge =
                self.challenges
                    .issue_locked(record, Purpose::Authentication, false)?;
            Ok((challenge, key_handles))
        })??;
        tracing::debug!(username, handles = key_handles.len(), "U2F authentication challenge issued");

        Ok(FidoAuthenticateRequest {
            version: U2F_VERSION.to_string(),
            app_id: self.config.app_id().to_string(),
            facet_id: self.config.facet_id().to_string(),
            challenge: challenge.to_base64url(),
            key_handles,
        })
    }

    /// Finish an authentication against a stored key handle.
    pub fn authenticate_finish(
        &self,
        username: &str,
        response: &FidoAuthenticateResponse,
    ) -> Result<FidoAuthentication> {
        let client_data = CollectedClientData::parse(&response.client_data)?;
        client_data.expect_type(TYPE_U2F_SIGN)?;
        client_data.expect_origin(self.config.facet_id())?;
        let echoed = client_data.challenge_bytes()?;

        let signature = SignatureData::parse(&response.signature_data)?;
        let app_id_hash = self.config.app_id_hash();
        let policy = self.config.challenge_policy();
        let key_handle = response.key_handle.as_slice();

        let result = self.repo.with_user(username, |record| {
            let known = record
                .credentials
                .find_for(CredentialProtocol::U2f, key_handle)
                .is_some();
            if !known {
                return Err(KeybridgeError::UnknownCredential);
            }
            against_pending(record, Purpose::Authentication, &policy, |pending, credentials| {
                pending.check(&echoed)?;
                let credential = credentials
                    .find_mut_for(CredentialProtocol::U2f, key_handle)
                    .ok_or(KeybridgeError::UnknownCredential)?;
                let key = VerifyingKey::from_sec1_p256(&credential.public_key)?;
                SignatureVerifier::verify_u2f_authentication(
                    &key,
                    &app_id_hash,
                    signature.flags,
                    signature.counter,
                    &response.client_data,
                    &signature.signature,
                )?;
                if !signature.user_present() {
                    return Err(KeybridgeError::UserPresenceMissing);
                }

                credential.sign_count = credential.sign_count.max(signature.counter);
                Ok(FidoAuthentication {
                    key_handle: key_handle.to_vec(),
                    counter: signature.counter,
                })
            })
        })?;

        match &result {
            Ok(auth) => tracing::info!(
                username,
                credential_id = %b64url_encode(&auth.key_handle),
                sign_count = auth.counter,
                "U2F authentication verified"
            ),
            Err(e) => tracing::warn!(username, purpose = %Purpose::Authentication, error = %e, "U2F authentication rejected"),
        }
        result
    }
}

impl<R> std::fmt::Debug for FidoProtocolHandler<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FidoProtocolHandler")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::SoftU2fAuthenticator;
    use crate::entropy::MockEntropy;
    use crate::store::MemoryUserStore;

    fn handler() -> FidoProtocolHandler<MemoryUserStore> {
        FidoProtocolHandler::new(
            RelyingPartyConfig::default(),
            Arc::new(MemoryUserStore::new()),
            Arc::new(MockEntropy::default_test()),
        )
    }

    #[test]
    fn test_register_request_shape() {
        let handler = handler();
        let request = handler.register_request("alice").unwrap();

        assert_eq!(request.version, "U2F_V2");
        assert_eq!(request.app_id, "https://fido-login.example.com/app-id.json");
        assert_eq!(request.facet_id, "https://fido-login.example.com");
        assert_eq!(request.challenge.len(), 22);

        let json = serde_json::to_value(&request).unwrap();
        assert!(json.get("appId").is_some());
    }

    #[test]
    fn test_register_then_authenticate() {
        let handler = handler();
        let mut key = SoftU2fAuthenticator::new().unwrap();

        let request = handler.register_request("alice").unwrap();
        let response = key.register(&request).unwrap();
        let registration = handler.register_finish("alice", &response).unwrap();
        assert!(registration.evicted.is_none());

        let request = handler.authenticate_request("alice").unwrap();
        assert_eq!(request.key_handles.len(), 1);
        let response = key.authenticate(&request).unwrap();
        let auth = handler.authenticate_finish("alice", &response).unwrap();
        assert_eq!(auth.key_handle, registration.credential.credential_id);
    }

    #[test]
    fn test_wrong_client_data_type() {
        let handler = handler();
        let mut key = SoftU2fAuthenticator::new().unwrap();
        let request = handler.register_request("alice").unwrap();
        let mut response = key.register(&request).unwrap();
        response.client_data = serde_json::to_vec(&serde_json::json!({
            "typ": "navigator.id.getAssertion",
            "challenge": request.challenge,
            "origin": request.facet_id,
        }))
        .unwrap();

        let err = handler.register_finish("alice", &response).unwrap_err();
        assert!(matches!(err, KeybridgeError::ProtocolParseFailure(_)));
    }

    #[test]
    fn test_missing_user_presence() {
        let handler = handler();
        let mut key = SoftU2fAuthenticator::new().unwrap();
        let request = handler.register_request("alice").unwrap();
        handler
            .register_finish("alice", &key.register(&request).unwrap())
            .unwrap();

        key.set_user_present(false);
        let request = handler.authenticate_request("alice").unwrap();
        let response = key.authenticate(&request).unwrap();
        let err = handler.authenticate_finish("alice", &response).unwrap_err();
        assert!(matches!(err, KeybridgeError::UserPresenceMissing));

        // Challenge survives the rejection
        key.set_user_present(true);
        let response = key.authenticate(&request).unwrap();
        assert!(handler.authenticate_finish("alice", &response).is_ok());
    }

    #[test]
    fn test_unknown_key_handle() {
        let handler = handler();
        let mut key = SoftU2fAuthenticator::new().unwrap();
        let request = handler.register_request("alice").unwrap();
        handler
            .register_finish("alice", &key.register(&request).unwrap())
            .unwrap();

        let request = handler.authenticate_request("alice").unwrap();
        let mut response = key.authenticate(&request).unwrap();
        response.key_handle = vec![0u8; 64];
        let err = handler.authenticate_finish("alice", &response).unwrap_err();
        assert!(matches!(err, KeybridgeError::UnknownCredential));
    }
}
