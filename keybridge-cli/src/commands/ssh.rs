//! SSH identity command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use colored::Colorize;
use keybridge_core::{SecurityKeySshIdentity, SshIdentity};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::utils::{run_cancellable, KeySource};

/// Execute the ssh-identity command.
pub async fn execute(
    source: KeySource,
    name: String,
    sign: Option<PathBuf>,
    quiet: bool,
) -> Result<()> {
    let payload = match &sign {
        Some(path) => Some(
            std::fs::read(path)
                .with_context(|| format!("Failed to read file: {}", path.display()))?,
        ),
        None => None,
    };

    let cancel = CancellationToken::new();
    let identity = SecurityKeySshIdentity::from_authenticator(source.open()?, cancel.clone())
        .context("Failed to build SSH identity")?
        .with_name(name);
    info!(
        algorithm = %identity.algorithm_name(),
        certificate = identity.has_certificate(),
        "SSH identity loaded"
    );

    println!("{}", identity.authorized_keys_line());

    if let Some(payload) = payload {
        let blob = run_cancellable(cancel, move || {
            identity.sign(&payload).context("SSH signature failed")
        })
        .await?;
        if !quiet {
            println!();
            println!("{}", "Signature:".dimmed());
        }
        println!("{}", STANDARD.encode(blob));
    }
    Ok(())
}
