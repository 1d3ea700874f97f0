//! Single-use challenges.
//!
//! Each user holds at most one pending challenge per [`Purpose`]. Issuing a new
//! one overwrites the old one (last writer wins). A challenge leaves the user
//! record only when a response against it verifies, when it expires, or when
//! the optional failed-attempt limit is reached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::entropy::{random_array, EntropySource};
use crate::error::{KeybridgeError, Result};
use crate::registry::CredentialSet;
use crate::store::{UserRecord, UserRepository};

/// Number of random bytes in every challenge.
pub const CHALLENGE_LEN: usize = 16;

/// Default lifetime of a pending challenge (5 minutes)
pub const CHALLENGE_EXPIRY_SECS: u64 = 300;

/// What a challenge was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Registration,
    Authentication,
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Registration => write!(f, "registration"),
            Self::Authentication => write!(f, "authentication"),
        }
    }
}

/// A freshly issued challenge.
#[derive(Clone, PartialEq, Eq)]
pub struct Challenge {
    bytes: [u8; CHALLENGE_LEN],
    purpose: Purpose,
}

impl Challenge {
    pub fn new(bytes: [u8; CHALLENGE_LEN], purpose: Purpose) -> Self {
        Self { bytes, purpose }
    }

    pub fn as_bytes(&self) -> &[u8; CHALLENGE_LEN] {
        &self.bytes
    }

    pub fn purpose(&self) -> Purpose {
        self.purpose
    }

    /// Websafe base64 without padding, as sent to clients.
    pub fn to_base64url(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.bytes)
    }

    /// Constant-time comparison against a candidate echoed back by a client.
    pub fn matches(&self, candidate: &[u8]) -> bool {
        candidate.len() == CHALLENGE_LEN && openssl::memcmp::eq(&self.bytes, candidate)
    }
}

impl std::fmt::Debug for Challenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Challenge")
            .field("purpose", &self.purpose)
            .field("value", &self.to_base64url())
            .finish()
    }
}

/// Expiry and attempt-limit rules applied to pending challenges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChallengePolicy {
    /// `None` disables expiry.
    pub ttl: Option<Duration>,
    /// Drop the pending challenge after this many rejected responses.
    /// `None` keeps it until success or expiry.
    pub max_failed_attempts: Option<u32>,
}

impl Default for ChallengePolicy {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::from_secs(CHALLENGE_EXPIRY_SECS)),
            max_failed_attempts: None,
        }
    }
}

/// A challenge waiting for its response.
#[derive(Debug, Clone)]
pub struct PendingChallenge {
    pub challenge: Challenge,
    /// WebAuthn only: whether the request asked for `userVerification: required`.
    pub user_verification_required: bool,
    issued_at: Instant,
    failed_attempts: u32,
}

impl PendingChallenge {
    pub fn new(challenge: Challenge, user_verification_required: bool) -> Self {
        Self {
            challenge,
            user_verification_required,
            issued_at: Instant::now(),
            failed_attempts: 0,
        }
    }

    fn is_expired(&self, policy: &ChallengePolicy) -> bool {
        policy
            .ttl
            .is_some_and(|ttl| self.issued_at.elapsed() >= ttl)
    }

    /// Fails with `ChallengeMismatch` unless `candidate` equals this challenge.
    pub(crate) fn check(&self, candidate: &[u8]) -> Result<()> {
        if self.challenge.matches(candidate) {
            Ok(())
        } else {
            Err(KeybridgeError::ChallengeMismatch(self.challenge.purpose()))
        }
    }
}

/// Pending challenges of one user, at most one per purpose.
#[derive(Debug, Default, Clone)]
pub struct PendingChallenges {
    registration: Option<PendingChallenge>,
    authentication: Option<PendingChallenge>,
}

impl PendingChallenges {
    fn slot(&mut self, purpose: Purpose) -> &mut Option<PendingChallenge> {
        match purpose {
            Purpose::Registration => &mut self.registration,
            Purpose::Authentication => &mut self.authentication,
        }
    }

    /// Store a challenge, replacing any pending one of the same purpose.
    pub fn insert(&mut self, pending: PendingChallenge) {
        let purpose = pending.challenge.purpose();
        *self.slot(purpose) = Some(pending);
    }

    pub fn is_pending(&self, purpose: Purpose) -> bool {
        match purpose {
            Purpose::Registration => self.registration.is_some(),
            Purpose::Authentication => self.authentication.is_some(),
        }
    }

    /// Returns a copy of the live pending challenge.
    ///
    /// An expired challenge is dropped and reported as `ChallengeExpired`.
    pub(crate) fn active(
        &mut self,
        purpose: Purpose,
        policy: &ChallengePolicy,
    ) -> Result<PendingChallenge> {
        let slot = self.slot(purpose);
        let expired = match slot.as_ref() {
            None => return Err(KeybridgeError::ChallengeNotPending(purpose)),
            Some(pending) => pending.is_expired(policy),
        };
        if expired {
            *slot = None;
            tracing::debug!(%purpose, "Dropped expired challenge");
            return Err(KeybridgeError::ChallengeExpired(purpose));
        }
        slot.clone()
            .ok_or(KeybridgeError::ChallengeNotPending(purpose))
    }

    /// Apply the outcome of a verification to the pending challenge.
    ///
    /// Success consumes it. A rejected response counts against the attempt
    /// limit. Other failures (parse errors, hardware I/O) leave it untouched.
    pub(crate) fn settle<T>(
        &mut self,
        purpose: Purpose,
        outcome: &Result<T>,
        policy: &ChallengePolicy,
    ) {
        match outcome {
            Ok(_) => {
                *self.slot(purpose) = None;
            }
            Err(err) if err.is_verification_failure() => self.record_failure(purpose, policy),
            Err(_) => {}
        }
    }

    fn record_failure(&mut self, purpose: Purpose, policy: &ChallengePolicy) {
        let slot = self.slot(purpose);
        let Some(pending) = slot.as_mut() else {
            return;
        };
        pending.failed_attempts = pending.failed_attempts.saturating_add(1);
        if let Some(limit) = policy.max_failed_attempts {
            if pending.failed_attempts >= limit {
                tracing::warn!(
                    %purpose,
                    attempts = pending.failed_attempts,
                    "Failed attempt limit reached, dropping challenge"
                );
                *slot = None;
            }
        }
    }
}

/// Run `verify` against the live pending challenge of `purpose`, then settle
/// the challenge with the outcome.
///
/// The closure receives the user's credentials so it can look up the signing
/// key and commit counter or registration updates on success.
pub(crate) fn against_pending<T>(
    record: &mut UserRecord,
    purpose: Purpose,
    policy: &ChallengePolicy,
    verify: impl FnOnce(&PendingChallenge, &mut CredentialSet) -> Result<T>,
) -> Result<T> {
    let pending = record.challenges.active(purpose, policy)?;
    let outcome = verify(&pending, &mut record.credentials);
    record.challenges.settle(purpose, &outcome, policy);
    outcome
}

/// Issues and consumes challenges held in a [`UserRepository`].
pub struct ChallengeStore<R> {
    repo: Arc<R>,
    entropy: Arc<dyn EntropySource>,
    policy: ChallengePolicy,
}

impl<R: UserRepository> ChallengeStore<R> {
    pub fn new(repo: Arc<R>, entropy: Arc<dyn EntropySource>, policy: ChallengePolicy) -> Self {
        Self {
            repo,
            entropy,
            policy,
        }
    }

    pub fn policy(&self) -> &ChallengePolicy {
        &self.policy
    }

    /// Draw fresh challenge bytes without storing them.
    pub fn generate(&self, purpose: Purpose) -> Result<Challenge> {
        Ok(Challenge::new(random_array(self.entropy.as_ref())?, purpose))
    }

    /// Issue a challenge for `username`, overwriting any pending one of the
    /// same purpose.
    pub fn issue(&self, username: &str, purpose: Purpose) -> Result<Challenge> {
        let challenge = self.generate(purpose)?;
        let stored = challenge.clone();
        self.repo.with_user(username, move |record| {
            record.challenges.insert(PendingChallenge::new(stored, false));
        })?;
        tracing::debug!(username, %purpose, "Issued challenge");
        Ok(challenge)
    }

    /// Issue a challenge into a record the caller already holds locked.
    pub(crate) fn issue_locked(
        &self,
        record: &mut UserRecord,
        purpose: Purpose,
        user_verification_required: bool,
    ) -> Result<Challenge> {
        let challenge = self.generate(purpose)?;
        record.challenges.insert(PendingChallenge::new(
            challenge.clone(),
            user_verification_required,
        ));
        Ok(challenge)
    }

    /// Consume the pending challenge if `candidate` matches it.
    ///
    /// Returns `Ok(false)` when nothing is pending or the candidate differs; a
    /// mismatch keeps the challenge pending unless the attempt limit is hit.
    pub fn consume(&self, username: &str, purpose: Purpose, candidate: &[u8]) -> Result<bool> {
        let policy = self.policy;
        self.repo.with_user(username, |record| {
            let pending = match record.challenges.active(purpose, &policy) {
                Ok(pending) => pending,
                Err(KeybridgeError::ChallengeNotPending(_)) => return Ok(false),
                Err(err) => return Err(err),
            };
            let outcome = pending.check(candidate);
            record.challenges.settle(purpose, &outcome, &policy);
            Ok(outcome.is_ok())
        })?
    }
}

impl<R> std::fmt::Debug for ChallengeStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChallengeStore")
            .field("entropy", &self.entropy.source_id())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::MockEntropy;
    use crate::store::MemoryUserStore;

    fn store(policy: ChallengePolicy) -> ChallengeStore<MemoryUserStore> {
        ChallengeStore::new(
            Arc::new(MemoryUserStore::new()),
            Arc::new(MockEntropy::default_test()),
            policy,
        )
    }

    #[test]
    fn test_consume_is_single_use() {
        let store = store(ChallengePolicy::default());
        let challenge = store.issue("alice", Purpose::Registration).unwrap();

        assert!(store
            .consume("alice", Purpose::Registration, challenge.as_bytes())
            .unwrap());
        assert!(!store
            .consume("alice", Purpose::Registration, challenge.as_bytes())
            .unwrap());
    }

    #[test]
    fn test_mismatch_keeps_challenge_pending() {
        let store = store(ChallengePolicy::default());
        let c1 = store.issue("alice", Purpose::Authentication).unwrap();

        assert!(!store
            .consume("alice", Purpose::Authentication, &[0u8; CHALLENGE_LEN])
            .unwrap());
        assert!(store
            .consume("alice", Purpose::Authentication, c1.as_bytes())
            .unwrap());
    }

    #[test]
    fn test_insert_files_under_challenge_purpose() {
        let mut pending = PendingChallenges::default();
        pending.insert(PendingChallenge::new(
            Challenge::new([7; CHALLENGE_LEN], Purpose::Authentication),
            false,
        ));

        assert!(pending.is_pending(Purpose::Authentication));
        assert!(!pending.is_pending(Purpose::Registration));
    }

    #[test]
    fn test_purposes_are_independent() {
        let store = store(ChallengePolicy::default());
        let reg = store.issue("alice", Purpose::Registration).unwrap();
        let auth = store.issue("alice", Purpose::Authentication).unwrap();

        assert!(!store
            .consume("alice", Purpose::Authentication, reg.as_bytes())
            .unwrap());
        assert!(store
            .consume("alice", Purpose::Authentication, auth.as_bytes())
            .unwrap());
        assert!(store
            .consume("alice", Purpose::Registration, reg.as_bytes())
            .unwrap());
    }

    #[test]
    fn test_reissue_overwrites() {
        let store = store(ChallengePolicy::default());
        let first = store.issue("bob", Purpose::Registration).unwrap();
        let second = store.issue("bob", Purpose::Registration).unwrap();
        assert_ne!(first, second);

        assert!(!store
            .consume("bob", Purpose::Registration, first.as_bytes())
            .unwrap());
        assert!(store
            .consume("bob", Purpose::Registration, second.as_bytes())
            .unwrap());
    }

    #[test]
    fn test_expired_challenge() {
        let store = store(ChallengePolicy {
            ttl: Some(Duration::ZERO),
            max_failed_attempts: None,
        });
        let challenge = store.issue("carol", Purpose::Registration).unwrap();

        let err = store
            .consume("carol", Purpose::Registration, challenge.as_bytes())
            .unwrap_err();
        assert!(matches!(err, KeybridgeError::ChallengeExpired(Purpose::Registration)));

        // Dropped on expiry
        assert!(!store
            .consume("carol", Purpose::Registration, challenge.as_bytes())
            .unwrap());
    }

    #[test]
    fn test_attempt_limit_drops_challenge() {
        let store = store(ChallengePolicy {
            ttl: None,
            max_failed_attempts: Some(2),
        });
        let challenge = store.issue("dave", Purpose::Authentication).unwrap();

        for _ in 0..2 {
            assert!(!store
                .consume("dave", Purpose::Authentication, &[1u8; CHALLENGE_LEN])
                .unwrap());
        }
        assert!(!store
            .consume("dave", Purpose::Authentication, challenge.as_bytes())
            .unwrap());
    }

    #[test]
    fn test_wrong_length_never_matches() {
        let challenge = Challenge::new([7u8; CHALLENGE_LEN], Purpose::Registration);
        assert!(!challenge.matches(&[7u8; 15]));
        assert!(challenge.matches(&[7u8; 16]));
        assert_eq!(challenge.to_base64url().len(), 22);
    }
}
