use thiserror::Error;

use crate::bridge::HardwareError;
use crate::challenge::Purpose;
use crate::store::StorageError;

#[derive(Error, Debug)]
pub enum KeybridgeError {
    #[error("Challenge in response does not match the pending {0} challenge")]
    ChallengeMismatch(Purpose),

    #[error("No {0} challenge is pending for this user")]
    ChallengeNotPending(Purpose),

    #[error("The pending {0} challenge has expired")]
    ChallengeExpired(Purpose),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Credential is not registered for this user")]
    UnknownCredential,

    #[error("User has no registered credentials")]
    NoRegisteredCredentials,

    #[error("User presence flag not set")]
    UserPresenceMissing,

    #[error("User verification required but flag not set")]
    UserVerificationMissing,

    #[error("Signature counter did not increase (stored={stored}, reported={reported}): possible cloned authenticator")]
    PossibleCloneDetected { stored: u32, reported: u32 },

    #[error("Malformed protocol message: {0}")]
    ProtocolParseFailure(String),

    #[error("Origin mismatch: expected {expected}, got {actual}")]
    OriginMismatch { expected: String, actual: String },

    #[error("Relying party id hash does not match configuration")]
    RelyingPartyMismatch,

    #[error("Unsupported COSE algorithm: {0}")]
    UnsupportedAlgorithm(i64),

    #[error("Unsupported digest algorithm: {0}")]
    UnsupportedDigest(String),

    #[error("Security key I/O failure: {0}")]
    HardwareIo(#[from] HardwareError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Entropy source error: {0}")]
    Entropy(String),

    #[error("Cryptographic backend error: {0}")]
    Crypto(#[from] openssl::error::ErrorStack),
}

impl KeybridgeError {
    pub(crate) fn parse(message: impl Into<String>) -> Self {
        Self::ProtocolParseFailure(message.into())
    }

    /// True when the failure came from the security key itself rather than from
    /// rejecting the response, so the caller should offer "try again".
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::HardwareIo(_))
    }

    /// True for failures that count as a rejected attempt against a pending challenge.
    pub(crate) fn is_verification_failure(&self) -> bool {
        matches!(
            self,
            Self::ChallengeMismatch(_)
                | Self::SignatureInvalid
                | Self::UserPresenceMissing
                | Self::UserVerificationMissing
                | Self::PossibleCloneDetected { .. }
                | Self::RelyingPartyMismatch
        )
    }
}

pub type Result<T> = std::result::Result<T, KeybridgeError>;
