//! Relying Party configuration
//!
//! Identity of the relying party (rp id, origin, display name, U2F app id and
//! facet id) plus the challenge policy shared by both protocol handlers.

use std::time::Duration;

use url::Url;

use crate::challenge::ChallengePolicy;

/// Default timeout advertised to clients, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

const DEFAULT_RP_ID: &str = "fido-login.example.com";
const DEFAULT_RP_ORIGIN: &str = "https://fido-login.example.com";
const DEFAULT_RP_NAME: &str = "FIDO-Example Relying Party";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid origin URL: {0}")]
    InvalidOrigin(String),
    #[error("RP id '{rp_id}' is not the origin host or a parent domain of '{host}'")]
    InvalidRpId { rp_id: String, host: String },
    #[error("Invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Clone)]
pub struct RelyingPartyConfig {
    rp_id: String,
    rp_name: String,
    origin: String,
    app_id: String,
    facet_id: String,
    challenge_policy: ChallengePolicy,
    timeout_ms: u64,
}

impl RelyingPartyConfig {
    /// Create a new relying party configuration
    ///
    /// # Arguments
    ///
    /// * `rp_id` - Relying Party ID (the origin host or a parent domain of it)
    /// * `rp_origin` - Relying Party origin URL
    /// * `rp_name` - Human-readable name for the Relying Party
    ///
    /// The U2F app id defaults to `<origin>/app-id.json` and the facet id to the
    /// origin itself.
    pub fn new(rp_id: &str, rp_origin: &Url, rp_name: &str) -> Result<Self, ConfigError> {
        let host = rp_origin
            .host_str()
            .ok_or_else(|| ConfigError::InvalidOrigin(rp_origin.to_string()))?;
        if !is_registrable_suffix(rp_id, host) {
            return Err(ConfigError::InvalidRpId {
                rp_id: rp_id.to_string(),
                host: host.to_string(),
            });
        }
        let origin = rp_origin.origin().ascii_serialization();

        Ok(Self {
            rp_id: rp_id.to_string(),
            rp_name: rp_name.to_string(),
            app_id: format!("{origin}/app-id.json"),
            facet_id: origin.clone(),
            origin,
            challenge_policy: ChallengePolicy::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        })
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `KEYBRIDGE_RP_ID` - Relying Party ID (default: "fido-login.example.com")
    /// - `KEYBRIDGE_RP_ORIGIN` - RP origin URL (default: "https://fido-login.example.com")
    /// - `KEYBRIDGE_RP_NAME` - RP display name (default: "FIDO-Example Relying Party")
    /// - `KEYBRIDGE_APP_ID` - U2F app id (default: "<origin>/app-id.json")
    /// - `KEYBRIDGE_FACET_ID` - U2F facet id (default: the origin)
    /// - `KEYBRIDGE_CHALLENGE_TTL_SECS` - challenge lifetime, 0 disables expiry (default: 300)
    /// - `KEYBRIDGE_MAX_FAILED_ATTEMPTS` - drop a challenge after N rejected responses (default: unlimited)
    /// - `KEYBRIDGE_TIMEOUT_MS` - client timeout hint (default: 60000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let rp_id = env_or("KEYBRIDGE_RP_ID", DEFAULT_RP_ID);
        let rp_origin = env_or("KEYBRIDGE_RP_ORIGIN", DEFAULT_RP_ORIGIN);
        let rp_name = env_or("KEYBRIDGE_RP_NAME", DEFAULT_RP_NAME);

        let origin =
            Url::parse(&rp_origin).map_err(|e| ConfigError::InvalidOrigin(format!("{}", e)))?;
        let mut config = Self::new(&rp_id, &origin, &rp_name)?;

        if let Some(app_id) = env_opt("KEYBRIDGE_APP_ID") {
            config.app_id = app_id;
        }
        if let Some(facet_id) = env_opt("KEYBRIDGE_FACET_ID") {
            config.facet_id = facet_id;
        }
        if let Some(ttl) = env_parse::<u64>("KEYBRIDGE_CHALLENGE_TTL_SECS")? {
            config.challenge_policy.ttl = (ttl > 0).then(|| Duration::from_secs(ttl));
        }
        if let Some(max) = env_parse::<u32>("KEYBRIDGE_MAX_FAILED_ATTEMPTS")? {
            config.challenge_policy.max_failed_attempts = Some(max);
        }
        if let Some(timeout) = env_parse::<u64>("KEYBRIDGE_TIMEOUT_MS")? {
            config.timeout_ms = timeout;
        }

        Ok(config)
    }

    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn with_facet_id(mut self, facet_id: impl Into<String>) -> Self {
        self.facet_id = facet_id.into();
        self
    }

    pub fn with_challenge_policy(mut self, policy: ChallengePolicy) -> Self {
        self.challenge_policy = policy;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    pub fn rp_name(&self) -> &str {
        &self.rp_name
    }

    /// Origin without trailing slash, e.g. `https://fido-login.example.com`.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn facet_id(&self) -> &str {
        &self.facet_id
    }

    pub fn challenge_policy(&self) -> ChallengePolicy {
        self.challenge_policy
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// SHA-256 of the rp id, as found in WebAuthn authenticator data.
    pub fn rp_id_hash(&self) -> [u8; 32] {
        openssl::sha::sha256(self.rp_id.as_bytes())
    }

    /// SHA-256 of the U2F app id.
    pub fn app_id_hash(&self) -> [u8; 32] {
        openssl::sha::sha256(self.app_id.as_bytes())
    }
}

impl Default for RelyingPartyConfig {
    fn default() -> Self {
        let origin = DEFAULT_RP_ORIGIN.to_string();
        Self {
            rp_id: DEFAULT_RP_ID.to_string(),
            rp_name: DEFAULT_RP_NAME.to_string(),
            app_id: format!("{origin}/app-id.json"),
            facet_id: origin.clone(),
            origin,
            challenge_policy: ChallengePolicy::default(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl std::fmt::Debug for RelyingPartyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelyingPartyConfig")
            .field("rp_id", &self.rp_id)
            .field("origin", &self.origin)
            .field("app_id", &self.app_id)
            .field("challenge_ttl", &self.challenge_policy.ttl)
            .finish_non_exhaustive()
    }
}

fn is_registrable_suffix(rp_id: &str, host: &str) -> bool {
    let rp_id = rp_id.to_ascii_lowercase();
    let host = host.to_ascii_lowercase();
    !rp_id.is_empty()
        && (host == rp_id
            || (host.ends_with(&rp_id) && host[..host.len() - rp_id.len()].ends_with('.')))
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    env_opt(name)
        .map(|value| {
            value
                .parse()
                .map_err(|_| ConfigError::InvalidValue { name, value })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let origin = Url::parse("https://login.example.com/").unwrap();
        let config = RelyingPartyConfig::new("example.com", &origin, "Test").unwrap();

        assert_eq!(config.origin(), "https://login.example.com");
        assert_eq!(config.app_id(), "https://login.example.com/app-id.json");
        assert_eq!(config.facet_id(), "https://login.example.com");
        assert_eq!(config.timeout_ms(), DEFAULT_TIMEOUT_MS);
    }

    #[test]
    fn test_rp_id_must_match_origin_host() {
        let origin = Url::parse("https://login.example.com").unwrap();
        assert!(RelyingPartyConfig::new("login.example.com", &origin, "T").is_ok());
        assert!(matches!(
            RelyingPartyConfig::new("other.com", &origin, "T"),
            Err(ConfigError::InvalidRpId { .. })
        ));
        assert!(matches!(
            RelyingPartyConfig::new("ample.com", &origin, "T"),
            Err(ConfigError::InvalidRpId { .. })
        ));
    }

    #[test]
    fn test_default_matches_fake_relying_party() {
        let config = RelyingPartyConfig::default();
        assert_eq!(config.rp_id(), "fido-login.example.com");
        assert_eq!(
            config.app_id(),
            "https://fido-login.example.com/app-id.json"
        );
        assert_eq!(
            config.challenge_policy().ttl,
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_config_from_env_defaults() {
        // Clear any existing env vars
        for name in [
            "KEYBRIDGE_RP_ID",
            "KEYBRIDGE_RP_ORIGIN",
            "KEYBRIDGE_RP_NAME",
            "KEYBRIDGE_APP_ID",
            "KEYBRIDGE_FACET_ID",
            "KEYBRIDGE_CHALLENGE_TTL_SECS",
            "KEYBRIDGE_MAX_FAILED_ATTEMPTS",
            "KEYBRIDGE_TIMEOUT_MS",
        ] {
            std::env::remove_var(name);
        }

        let config = RelyingPartyConfig::from_env().unwrap();
        assert_eq!(config.origin(), "https://fido-login.example.com");
        assert_eq!(config.rp_name(), "FIDO-Example Relying Party");
        assert_eq!(config.challenge_policy().max_failed_attempts, None);
    }

    #[test]
    fn test_rp_id_hash() {
        let config = RelyingPartyConfig::default();
        assert_eq!(
            config.rp_id_hash(),
            openssl::sha::sha256(b"fido-login.example.com")
        );
    }
}
