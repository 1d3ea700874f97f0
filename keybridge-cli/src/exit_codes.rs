//! Exit codes following sysexits.h conventions.
//!
//! These codes provide semantic meaning for different failure modes,
//! enabling scripts and CI systems to handle errors appropriately.

use keybridge_core::{HardwareError, KeybridgeError, SshAuthError};

/// General error (catch-all).
pub const GENERAL_ERROR: i32 = 1;

/// Command line usage error (unknown digest, PIN outside the card's rules).
/// Maps to EX_USAGE from sysexits.h.
pub const USAGE_ERROR: i32 = 64;

/// Data format error (signature, challenge or counter rejected).
/// Maps to EX_DATAERR from sysexits.h.
pub const VERIFICATION_FAILED: i32 = 65;

/// Cannot open input file.
/// Maps to EX_NOINPUT from sysexits.h.
pub const INPUT_ERROR: i32 = 66;

/// Security key unavailable (transport, wrong PIN, cancelled).
/// Maps to EX_UNAVAILABLE from sysexits.h.
pub const HARDWARE_UNAVAILABLE: i32 = 69;

/// I/O error (cannot write output).
/// Maps to EX_IOERR from sysexits.h.
pub const IO_ERROR: i32 = 74;

/// Represents an exit code with optional error context.
pub struct ExitCode {
    pub code: i32,
    pub message: Option<String>,
}

impl ExitCode {
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");

        // Typed errors first, then the context strings the commands attach
        let code = err
            .chain()
            .find_map(classify)
            .unwrap_or_else(|| {
                if message.contains("Failed to read") {
                    INPUT_ERROR
                } else if message.contains("Failed to write") || message.contains("Failed to open store") {
                    IO_ERROR
                } else {
                    GENERAL_ERROR
                }
            });

        Self {
            code,
            message: Some(message),
        }
    }
}

fn classify(cause: &(dyn std::error::Error + 'static)) -> Option<i32> {
    if let Some(err) = cause.downcast_ref::<KeybridgeError>() {
        return Some(match err {
            KeybridgeError::HardwareIo(hw) => hardware_code(hw),
            KeybridgeError::UnsupportedDigest(_) => USAGE_ERROR,
            KeybridgeError::Storage(_) => IO_ERROR,
            KeybridgeError::Entropy(_) | KeybridgeError::Crypto(_) => GENERAL_ERROR,
            _ => VERIFICATION_FAILED,
        });
    }
    if let Some(err) = cause.downcast_ref::<SshAuthError>() {
        return Some(match err {
            SshAuthError::Hardware(hw) => hardware_code(hw),
            _ => VERIFICATION_FAILED,
        });
    }
    cause.downcast_ref::<HardwareError>().map(hardware_code)
}

fn hardware_code(err: &HardwareError) -> i32 {
    match err {
        HardwareError::InvalidPin(_) => USAGE_ERROR,
        _ => HARDWARE_UNAVAILABLE,
    }
}
