//! Digest-sign command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use colored::Colorize;
use keybridge_core::DigestSigner;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::utils::{run_cancellable, KeySource};

/// Execute the digest-sign command.
pub async fn execute(file: PathBuf, digest: String, source: KeySource, quiet: bool) -> Result<()> {
    let content =
        std::fs::read(&file).with_context(|| format!("Failed to read file: {}", file.display()))?;
    info!(path = %file.display(), bytes = content.len(), "Read file");

    let cancel = CancellationToken::new();
    let authenticator = source.open()?;
    let kind = authenticator.security_key().kind();
    let signer = DigestSigner::new(authenticator, cancel.clone());

    let algorithm = digest.clone();
    let signature = run_cancellable(cancel, move || {
        signer
            .sign_with_digest(&content, &algorithm)
            .context("Signing failed")
    })
    .await?;

    if !quiet {
        println!(
            "{} {} {}",
            "Signed with".dimmed(),
            kind.cyan(),
            format!("({digest})").dimmed()
        );
    }
    println!("{}", hex::encode(signature));
    Ok(())
}
