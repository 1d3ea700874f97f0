//! Common utility functions shared across CLI commands.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use keybridge_core::{
    HardwareToken, Pin, SecurityKey, SecurityKeyAuthenticator, SoftwareKeyAlgorithm, SoftwareToken,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Install the tracing subscriber. `RUST_LOG` wins over `-v` flags.
pub fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "keybridge_core=info,keybridge_cli=info,warn",
        2 => "keybridge_core=debug,keybridge_cli=debug,info",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// The key a signing command talks to.
pub struct KeySource {
    pub pem: Option<PathBuf>,
    pub algorithm: SoftwareKeyAlgorithm,
    pub openpgp: bool,
    pub pin: String,
}

impl KeySource {
    /// Open the software stand-in for the card and bind the PIN.
    ///
    /// The PIV applet presents a self-signed certificate, OpenPGP a bare key.
    pub fn open(self) -> Result<SecurityKeyAuthenticator> {
        let token = match &self.pem {
            Some(path) => {
                let pem = std::fs::read(path)
                    .with_context(|| format!("Failed to read key file: {}", path.display()))?;
                SoftwareToken::from_pem(&pem).context("Invalid PEM private key")?
            }
            None => {
                warn!("No --key given, using an ephemeral software key");
                SoftwareToken::generate(self.algorithm).context("Key generation failed")?
            }
        };
        let pin = Pin::new(self.pin.as_str());

        let key = if self.openpgp {
            SecurityKey::openpgp(Arc::new(token.with_pin(pin.clone(), 3)))
        } else {
            let token = token
                .with_pin(pin.clone(), 3)
                .with_self_signed_certificate("PIV Authentication")
                .context("Failed to create PIV certificate")?;
            SecurityKey::piv(Arc::new(token) as Arc<dyn HardwareToken>)
        };
        debug!(applet = key.kind(), "Security key opened");
        Ok(key.create_authenticator(pin)?)
    }
}

/// Run a blocking security key operation off the runtime. Ctrl-C cancels it.
pub async fn run_cancellable<T, F>(cancel: CancellationToken, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling security key operation");
                cancel.cancel();
            }
        })
    };
    let result = tokio::task::spawn_blocking(op)
        .await
        .context("Security key worker panicked")?;
    watcher.abort();
    result
}
