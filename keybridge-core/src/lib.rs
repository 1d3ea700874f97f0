//! Keybridge Core - relying-party library for hardware security keys
//!
//! This crate issues and tracks single-use challenges, stores per-user
//! hardware-backed credentials and verifies the signed responses a security key
//! returns. It also bridges a key's raw signing primitive into SSH public-key
//! identities and digest signatures.
//!
//! # Features
//!
//! - FIDO U2F registration and authentication (`U2F_V2`)
//! - WebAuthn / FIDO2 with `none`, `packed` and `fido-u2f` attestation and
//!   signature-counter clone detection
//! - At most three credentials per user, oldest evicted first
//! - In-memory or JSON-file user repositories with per-user locking
//! - PIV / OpenPGP signing bridge with cancellable, PIN-guarded signatures
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use keybridge_core::{
//!     FidoProtocolHandler, MemoryUserStore, OsEntropy, RelyingPartyConfig, SoftU2fAuthenticator,
//! };
//!
//! # fn example() -> keybridge_core::Result<()> {
//! let handler = FidoProtocolHandler::new(
//!     RelyingPartyConfig::default(),
//!     Arc::new(MemoryUserStore::new()),
//!     Arc::new(OsEntropy),
//! );
//!
//! // The software authenticator stands in for a real security key
//! let mut key = SoftU2fAuthenticator::new()?;
//!
//! let request = handler.register_request("alice")?;
//! handler.register_finish("alice", &key.register(&request)?)?;
//!
//! let request = handler.authenticate_request("alice")?;
//! let auth = handler.authenticate_finish("alice", &key.authenticate(&request)?)?;
//! assert_eq!(auth.counter, 1);
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod challenge;
pub mod config;
pub mod encoding;
pub mod entropy;
pub mod error;
pub mod fido;
pub mod registry;
pub mod store;
pub mod verify;
pub mod webauthn;

#[cfg(any(test, feature = "software-authenticators"))]
pub mod emulator;

// Re-export main types for convenience
pub use bridge::digest::{DigestAlgorithm, DigestSigner};
pub use bridge::ssh::{SecurityKeySshIdentity, SshAuthError, SshIdentity};
pub use bridge::{
    HardwareError, HardwareToken, Pin, PublicKeyMaterial, SecurityKey, SecurityKeyAuthenticator,
};
pub use challenge::{Challenge, ChallengePolicy, ChallengeStore, Purpose, CHALLENGE_LEN};
pub use config::{ConfigError, RelyingPartyConfig};
pub use entropy::{EntropySource, EntropySourceId, MockEntropy, OsEntropy};
pub use error::{KeybridgeError, Result};
pub use fido::{FidoAuthentication, FidoProtocolHandler, FidoRegistration};
pub use registry::{
    AuthenticatorTransport, Credential, CredentialDescriptor, CredentialProtocol,
    CredentialRegistry, CredentialSet, MAX_CREDENTIALS_PER_USER,
};
pub use store::{
    FileUserStore, MemoryUserStore, StorageError, UserRecord, UserRepository, UserStore,
};
pub use webauthn::{
    AttestationConveyancePreference, AttestationFormat, UserVerificationRequirement,
    WebAuthnAuthentication, WebAuthnProtocolHandler, WebAuthnRegistration,
};

#[cfg(any(test, feature = "software-authenticators"))]
pub use bridge::software::{SoftwareKeyAlgorithm, SoftwareToken};
#[cfg(any(test, feature = "software-authenticators"))]
pub use emulator::{SoftU2fAuthenticator, SoftWebAuthnAuthenticator};
