//! Registered credentials
//!
//! Each user owns a bounded, ordered [`CredentialSet`]: at most
//! [`MAX_CREDENTIALS_PER_USER`] entries in registration order. Adding one more
//! evicts the oldest. Allow-lists are presented newest first.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoding::b64;
use crate::error::Result;
use crate::store::UserRepository;

/// Maximum number of credentials kept per user.
pub const MAX_CREDENTIALS_PER_USER: usize = 3;

/// COSE algorithm identifier for ECDSA P-256 with SHA-256.
pub const COSE_ALG_ES256: i64 = -7;

/// Which protocol registered a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialProtocol {
    /// FIDO U2F (key handle + raw P-256 key)
    U2f,
    /// WebAuthn / FIDO2
    #[serde(rename = "webauthn")]
    WebAuthn,
}

/// How the client can reach an authenticator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthenticatorTransport {
    Usb,
    Nfc,
    Ble,
    Hybrid,
    Internal,
}

/// A credential bound to one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    /// Credential id (WebAuthn) or key handle (U2F)
    #[serde(with = "b64")]
    pub credential_id: Vec<u8>,
    /// Uncompressed SEC1 P-256 point (65 bytes)
    #[serde(with = "b64")]
    pub public_key: Vec<u8>,
    /// COSE algorithm of `public_key`
    pub algorithm: i64,
    /// Last signature counter accepted for this credential
    pub sign_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<AuthenticatorTransport>,
    pub protocol: CredentialProtocol,
    pub registered_at: DateTime<Utc>,
    /// Authenticator model id (WebAuthn only), formatted as a UUID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aaguid: Option<String>,
}

impl Credential {
    pub fn new(
        protocol: CredentialProtocol,
        credential_id: Vec<u8>,
        public_key: Vec<u8>,
        sign_count: u32,
    ) -> Self {
        Self {
            credential_id,
            public_key,
            algorithm: COSE_ALG_ES256,
            sign_count,
            transports: Vec::new(),
            protocol,
            registered_at: Utc::now(),
            aaguid: None,
        }
    }

    pub fn id_base64url(&self) -> String {
        crate::encoding::b64url_encode(&self.credential_id)
    }

    pub fn descriptor(&self) -> CredentialDescriptor {
        CredentialDescriptor {
            kind: PUBLIC_KEY_TYPE.to_string(),
            id: self.credential_id.clone(),
            transports: self.transports.clone(),
        }
    }
}

const PUBLIC_KEY_TYPE: &str = "public-key";

/// Entry of a WebAuthn `allowCredentials` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(with = "b64")]
    pub id: Vec<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transports: Vec<AuthenticatorTransport>,
}

/// Bounded FIFO of a user's credentials, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialSet(Vec<Credential>);

impl CredentialSet {
    /// Append a credential and return the one evicted to stay within the bound.
    ///
    /// A credential whose id is already present replaces that entry and
    /// becomes the newest.
    pub fn add(&mut self, credential: Credential) -> Option<Credential> {
        if let Some(pos) = self
            .0
            .iter()
            .position(|c| c.credential_id == credential.credential_id)
        {
            self.0.remove(pos);
        }
        self.0.push(credential);
        if self.0.len() > MAX_CREDENTIALS_PER_USER {
            Some(self.0.remove(0))
        } else {
            None
        }
    }

    pub fn find(&self, credential_id: &[u8]) -> Option<&Credential> {
        self.0.iter().find(|c| c.credential_id == credential_id)
    }

    pub fn find_mut(&mut self, credential_id: &[u8]) -> Option<&mut Credential> {
        self.0.iter_mut().find(|c| c.credential_id == credential_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.0.iter()
    }

    /// Newest first.
    pub fn newest_first(&self) -> impl Iterator<Item = &Credential> {
        self.0.iter().rev()
    }

    pub fn descriptors(&self) -> Vec<CredentialDescriptor> {
        self.newest_first().map(Credential::descriptor).collect()
    }

    /// Newest first, only credentials registered over `protocol`.
    pub fn newest_first_for(
        &self,
        protocol: CredentialProtocol,
    ) -> impl Iterator<Item = &Credential> {
        self.newest_first().filter(move |c| c.protocol == protocol)
    }

    pub fn has_protocol(&self, protocol: CredentialProtocol) -> bool {
        self.0.iter().any(|c| c.protocol == protocol)
    }

    pub fn find_for(&self, protocol: CredentialProtocol, credential_id: &[u8]) -> Option<&Credential> {
        self.find(credential_id).filter(|c| c.protocol == protocol)
    }

    pub fn find_mut_for(
        &mut self,
        protocol: CredentialProtocol,
        credential_id: &[u8],
    ) -> Option<&mut Credential> {
        self.find_mut(credential_id)
            .filter(|c| c.protocol == protocol)
    }

    /// Allow-list for one protocol, newest first.
    pub fn descriptors_for(&self, protocol: CredentialProtocol) -> Vec<CredentialDescriptor> {
        self.newest_first_for(protocol)
            .map(Credential::descriptor)
            .collect()
    }
}

/// Repository-backed view of every user's credentials.
pub struct CredentialRegistry<R> {
    repo: Arc<R>,
}

impl<R: UserRepository> CredentialRegistry<R> {
    pub fn new(repo: Arc<R>) -> Self {
        Self { repo }
    }

    /// Add a credential, returning the evicted one if the set was full.
    pub fn add(&self, username: &str, credential: Credential) -> Result<Option<Credential>> {
        let credential_id = credential.id_base64url();
        let evicted = self
            .repo
            .with_user(username, |record| record.credentials.add(credential))?;
        tracing::info!(username, credential_id = %credential_id, "Credential registered");
        if let Some(old) = &evicted {
            tracing::info!(
                username,
                credential_id = %old.id_base64url(),
                "Evicted oldest credential"
            );
        }
        Ok(evicted)
    }

    pub fn has_any(&self, username: &str) -> Result<bool> {
        Ok(self
            .repo
            .with_user(username, |record| !record.credentials.is_empty())?)
    }

    pub fn find_by_handle(&self, username: &str, handle: &[u8]) -> Result<Option<Credential>> {
        Ok(self
            .repo
            .with_user(username, |record| record.credentials.find(handle).cloned())?)
    }

    /// Descriptors for every credential of `username`, newest first.
    pub fn list_descriptors(&self, username: &str) -> Result<Vec<CredentialDescriptor>> {
        Ok(self
            .repo
            .with_user(username, |record| record.credentials.descriptors())?)
    }
}

impl<R> std::fmt::Debug for CredentialRegistry<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryUserStore;

    fn cred(id: u8) -> Credential {
        Credential::new(CredentialProtocol::WebAuthn, vec![id; 8], vec![4u8; 65], 0)
    }

    #[test]
    fn test_fifo_eviction() {
        let mut set = CredentialSet::default();
        assert!(set.add(cred(1)).is_none());
        assert!(set.add(cred(2)).is_none());
        assert!(set.add(cred(3)).is_none());

        let evicted = set.add(cred(4)).unwrap();
        assert_eq!(evicted.credential_id, vec![1u8; 8]);
        assert_eq!(set.len(), MAX_CREDENTIALS_PER_USER);

        let ids: Vec<u8> = set.descriptors().iter().map(|d| d.id[0]).collect();
        assert_eq!(ids, vec![4, 3, 2]);
    }

    #[test]
    fn test_protocol_filtered_views() {
        let mut set = CredentialSet::default();
        set.add(cred(1));
        set.add(Credential::new(CredentialProtocol::U2f, vec![2; 8], vec![4u8; 65], 0));
        set.add(cred(3));

        let ids: Vec<u8> = set
            .descriptors_for(CredentialProtocol::WebAuthn)
            .iter()
            .map(|d| d.id[0])
            .collect();
        assert_eq!(ids, vec![3, 1]);
        assert!(set.has_protocol(CredentialProtocol::U2f));
        assert!(set.find_for(CredentialProtocol::U2f, &[2; 8]).is_some());
        assert!(set.find_for(CredentialProtocol::WebAuthn, &[2; 8]).is_none());
        assert!(set.find_mut_for(CredentialProtocol::U2f, &[1; 8]).is_none());
    }

    #[test]
    fn test_same_id_replaces_entry() {
        let mut set = CredentialSet::default();
        set.add(cred(1));
        set.add(cred(2));

        let mut again = cred(1);
        again.sign_count = 9;
        assert!(set.add(again).is_none());

        assert_eq!(set.len(), 2);
        let newest = set.newest_first().next().unwrap();
        assert_eq!(newest.credential_id, vec![1u8; 8]);
        assert_eq!(newest.sign_count, 9);
    }

    #[test]
    fn test_descriptor_json_shape() {
        let mut c = cred(7);
        c.transports = vec![AuthenticatorTransport::Usb, AuthenticatorTransport::Nfc];
        let json = serde_json::to_value(c.descriptor()).unwrap();

        assert_eq!(json["type"], "public-key");
        assert_eq!(json["id"], "BwcHBwcHBwc");
        assert_eq!(json["transports"], serde_json::json!(["usb", "nfc"]));
    }

    #[test]
    fn test_registry_over_repository() {
        let registry = CredentialRegistry::new(Arc::new(MemoryUserStore::new()));
        assert!(!registry.has_any("alice").unwrap());

        registry.add("alice", cred(1)).unwrap();
        registry.add("alice", cred(2)).unwrap();

        assert!(registry.has_any("alice").unwrap());
        assert!(!registry.has_any("bob").unwrap());
        assert!(registry.find_by_handle("alice", &[2u8; 8]).unwrap().is_some());
        assert!(registry.find_by_handle("bob", &[2u8; 8]).unwrap().is_none());
        assert_eq!(registry.list_descriptors("alice").unwrap()[0].id, vec![2u8; 8]);
    }

    #[test]
    fn test_protocol_serialization() {
        assert_eq!(
            serde_json::to_string(&CredentialProtocol::WebAuthn).unwrap(),
            "\"webauthn\""
        );
        assert_eq!(
            serde_json::to_string(&CredentialProtocol::U2f).unwrap(),
            "\"u2f\""
        );
    }
}
