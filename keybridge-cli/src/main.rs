//! Keybridge CLI - security key demos and signing tools.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use keybridge_core::{AttestationFormat, SoftwareKeyAlgorithm};

mod commands;
mod exit_codes;
mod utils;

use exit_codes::ExitCode;

const EXIT_CODES_HELP: &str = "\
Exit codes:
  0   Success
  1   General error
  64  Usage error (unknown digest, bad PIN format)
  65  Verification failed (signature, challenge, counter)
  66  Cannot read input or key file
  69  Security key unavailable (transport, PIN, cancelled)
  74  Cannot write output";

#[derive(Parser)]
#[command(name = "keybridge")]
#[command(author, version, about = "Hardware security key relying party and signing bridge", long_about = None)]
#[command(after_help = EXIT_CODES_HELP)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only print results, no banners
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a registration + authentication round trip with a software authenticator
    Demo {
        #[command(subcommand)]
        protocol: DemoProtocol,
    },

    /// Print the SSH public key of a security key, optionally signing data
    SshIdentity {
        #[command(flatten)]
        key: KeyArgs,

        /// Comment for the authorized_keys line
        #[arg(long, default_value = "keybridge")]
        name: String,

        /// Sign this file and print the SSH signature blob (base64)
        #[arg(long, value_name = "FILE")]
        sign: Option<PathBuf>,
    },

    /// Sign the digest of a file, PIV/OpenPGP challenge-response style (hex output)
    DigestSign {
        /// File whose contents are hashed and signed
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Digest algorithm: SHA-1, SHA-256, SHA-384 or SHA-512
        #[arg(short, long, default_value = "SHA-256")]
        digest: String,

        #[command(flatten)]
        key: KeyArgs,
    },
}

#[derive(Subcommand)]
enum DemoProtocol {
    /// FIDO U2F
    U2f {
        /// Username to register
        #[arg(long, default_value = "alice")]
        user: String,

        /// Keep users in this directory instead of memory
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
    },

    /// WebAuthn / FIDO2
    Webauthn {
        /// Username to register
        #[arg(long, default_value = "alice")]
        user: String,

        /// Keep users in this directory instead of memory
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,

        /// Attestation statement the authenticator returns
        #[arg(long, default_value = "none")]
        attestation: AttestationArg,

        /// Ask for user verification
        #[arg(long)]
        require_uv: bool,
    },
}

/// Where the signing key comes from.
#[derive(clap::Args)]
struct KeyArgs {
    /// PEM private key standing in for the card (ephemeral key if omitted)
    #[arg(long, value_name = "PEM")]
    key: Option<PathBuf>,

    /// Algorithm of the ephemeral key
    #[arg(long, default_value = "ecdsa-p256")]
    algorithm: AlgorithmArg,

    /// Card application to present
    #[arg(long, default_value = "piv")]
    applet: AppletArg,

    /// Card PIN
    #[arg(long, env = "KEYBRIDGE_PIN", default_value = "123456", hide_env_values = true)]
    pin: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AttestationArg {
    None,
    Packed,
    FidoU2f,
}

impl From<AttestationArg> for AttestationFormat {
    fn from(arg: AttestationArg) -> Self {
        match arg {
            AttestationArg::None => AttestationFormat::None,
            AttestationArg::Packed => AttestationFormat::Packed,
            AttestationArg::FidoU2f => AttestationFormat::FidoU2f,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AlgorithmArg {
    EcdsaP256,
    EcdsaP384,
    EcdsaP521,
    Ed25519,
    Rsa2048,
}

impl From<AlgorithmArg> for SoftwareKeyAlgorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::EcdsaP256 => SoftwareKeyAlgorithm::EcdsaP256,
            AlgorithmArg::EcdsaP384 => SoftwareKeyAlgorithm::EcdsaP384,
            AlgorithmArg::EcdsaP521 => SoftwareKeyAlgorithm::EcdsaP521,
            AlgorithmArg::Ed25519 => SoftwareKeyAlgorithm::Ed25519,
            AlgorithmArg::Rsa2048 => SoftwareKeyAlgorithm::Rsa2048,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum AppletArg {
    Piv,
    Openpgp,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    utils::init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Demo { protocol } => match protocol {
            DemoProtocol::U2f { user, store } => commands::demo::u2f(user, store, cli.quiet),
            DemoProtocol::Webauthn {
                user,
                store,
                attestation,
                require_uv,
            } => commands::demo::webauthn(user, store, attestation.into(), require_uv, cli.quiet),
        },
        Commands::SshIdentity { key, name, sign } => {
            commands::ssh::execute(key.into(), name, sign, cli.quiet).await
        }
        Commands::DigestSign { file, digest, key } => {
            commands::digest::execute(file, digest, key.into(), cli.quiet).await
        }
    };

    if let Err(err) = result {
        let exit = ExitCode::from_anyhow(&err);
        if let Some(message) = &exit.message {
            eprintln!("{} {message}", "error:".red().bold());
        }
        std::process::exit(exit.code);
    }
}

impl From<KeyArgs> for utils::KeySource {
    fn from(args: KeyArgs) -> Self {
        Self {
            pem: args.key,
            algorithm: args.algorithm.into(),
            openpgp: args.applet == AppletArg::Openpgp,
            pin: args.pin,
        }
    }
}
