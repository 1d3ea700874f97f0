//! Demo commands: full relying-party round trips against software authenticators.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use colored::Colorize;
use keybridge_core::{
    AttestationConveyancePreference, AttestationFormat, FidoProtocolHandler, KeybridgeError,
    OsEntropy, RelyingPartyConfig, SoftU2fAuthenticator, SoftWebAuthnAuthenticator,
    UserRepository, UserStore, UserVerificationRequirement, WebAuthnProtocolHandler,
};
use tracing::info;

fn open_store(dir: Option<PathBuf>) -> Result<Arc<UserStore>> {
    let store = match dir {
        Some(dir) => UserStore::open(&dir)
            .with_context(|| format!("Failed to open store: {}", dir.display()))?,
        None => UserStore::in_memory(),
    };
    info!(persistent = store.is_persistent(), "User store ready");
    Ok(Arc::new(store))
}

fn load_config() -> Result<RelyingPartyConfig> {
    RelyingPartyConfig::from_env().context("Invalid relying party configuration")
}

fn credential_count(store: &UserStore, user: &str) -> Result<usize> {
    Ok(store.with_user(user, |record| record.credentials.len())?)
}

/// Replaying a consumed response must fail; anything else is a broken relying party.
fn expect_replay_rejected<T>(result: keybridge_core::Result<T>) -> Result<KeybridgeError> {
    match result {
        Ok(_) => bail!("Replayed response was accepted"),
        Err(err) => Ok(err),
    }
}

fn step(quiet: bool, label: &str, detail: impl std::fmt::Display) {
    if !quiet {
        println!("   {} {}", format!("{label}:").dimmed(), detail);
    }
}

fn banner(quiet: bool, title: &str) {
    if !quiet {
        println!();
        println!("{}", title.cyan().bold());
        println!();
    }
}

/// Execute `demo u2f`.
pub fn u2f(user: String, store: Option<PathBuf>, quiet: bool) -> Result<()> {
    let config = load_config()?;
    let store = open_store(store)?;
    let handler = FidoProtocolHandler::new(config, Arc::clone(&store), Arc::new(OsEntropy));
    let mut key = SoftU2fAuthenticator::new().context("Failed to create software U2F token")?;

    banner(quiet, "FIDO U2F demo");
    step(quiet, "App ID", handler.config().app_id());

    let request = handler.register_request(&user)?;
    let response = key.register(&request)?;
    let registration = handler
        .register_finish(&user, &response)
        .context("Registration failed")?;
    step(
        quiet,
        "Registered",
        format!("{} ({})", user, registration.credential.id_base64url()).green(),
    );
    if let Some(evicted) = &registration.evicted {
        step(quiet, "Evicted", evicted.id_base64url().yellow());
    }

    let request = handler.authenticate_request(&user)?;
    let response = key.authenticate(&request)?;
    let auth = handler
        .authenticate_finish(&user, &response)
        .context("Authentication failed")?;
    step(quiet, "Authenticated", format!("counter {}", auth.counter).green());

    let err = expect_replay_rejected(handler.authenticate_finish(&user, &response))?;
    step(quiet, "Replay", format!("rejected ({err})").green());

    let count = credential_count(&store, &user)?;
    step(quiet, "Credentials", count);
    if quiet {
        println!("{}", registration.credential.id_base64url());
    }
    Ok(())
}

/// Execute `demo webauthn`.
pub fn webauthn(
    user: String,
    store: Option<PathBuf>,
    attestation: AttestationFormat,
    require_uv: bool,
    quiet: bool,
) -> Result<()> {
    let config = load_config()?;
    let origin = config.origin().to_string();
    let store = open_store(store)?;
    let handler = WebAuthnProtocolHandler::new(config, Arc::clone(&store), Arc::new(OsEntropy));
    let mut key = SoftWebAuthnAuthenticator::new()
        .context("Failed to create software authenticator")?
        .with_attestation(attestation);

    let user_verification = if require_uv {
        UserVerificationRequirement::Required
    } else {
        UserVerificationRequirement::Preferred
    };
    let conveyance = match attestation {
        AttestationFormat::None => AttestationConveyancePreference::None,
        _ => AttestationConveyancePreference::Direct,
    };

    banner(quiet, "WebAuthn demo");
    step(quiet, "RP ID", handler.config().rp_id());
    step(quiet, "Origin", &origin);

    let options = handler.register_request(&user, user_verification, conveyance)?;
    let credential = key.create(&options, &origin)?;
    let registration = handler
        .register_finish(&user, &credential)
        .context("Registration failed")?;
    step(
        quiet,
        "Registered",
        format!("{} ({})", user, registration.credential.id_base64url()).green(),
    );
    step(quiet, "Attestation", registration.attestation_format.as_fmt());
    if let Some(model) = &registration.device_model {
        step(quiet, "Device", format!("{} ({})", model.description, model.vendor));
    }
    if let Some(evicted) = &registration.evicted {
        step(quiet, "Evicted", evicted.id_base64url().yellow());
    }

    let options = handler.authenticate_request(&user, user_verification)?;
    let assertion = key.get(&options, &origin)?;
    let auth = handler
        .authenticate_finish(&user, &assertion)
        .context("Authentication failed")?;
    step(
        quiet,
        "Authenticated",
        format!("counter {}, user verified: {}", auth.sign_count, auth.user_verified).green(),
    );

    let err = expect_replay_rejected(handler.authenticate_finish(&user, &assertion))?;
    step(quiet, "Replay", format!("rejected ({err})").green());

    let count = credential_count(&store, &user)?;
    step(quiet, "Credentials", count);
    if quiet {
        println!("{}", registration.credential.id_base64url());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_u2f_demo_in_memory() {
        u2f("alice".into(), None, true).unwrap();
    }

    #[test]
    fn test_webauthn_demo_packed_with_uv() {
        webauthn("alice".into(), None, AttestationFormat::Packed, true, true).unwrap();
    }

    #[test]
    fn test_demo_store_accumulates_credentials() {
        let dir = TempDir::new().unwrap();
        u2f("bob".into(), Some(dir.path().to_path_buf()), true).unwrap();
        u2f("bob".into(), Some(dir.path().to_path_buf()), true).unwrap();

        let store = UserStore::open(dir.path()).unwrap();
        assert_eq!(credential_count(&store, "bob").unwrap(), 2);
    }
}
