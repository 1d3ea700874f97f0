//! Randomness sources for challenges and user handles.
//!
//! Every challenge handed to a client must be unpredictable, so production code
//! reads from the operating system CSPRNG. Tests can swap in [`MockEntropy`] to
//! get reproducible values.

mod mock;

pub use mock::MockEntropy;

use crate::error::{KeybridgeError, Result};

/// Trait for randomness sources.
///
/// Implementations must be thread-safe (`Send + Sync`) since handlers are
/// shared across threads.
pub trait EntropySource: Send + Sync {
    /// Fill `buf` entirely with random bytes.
    fn fill(&self, buf: &mut [u8]) -> Result<()>;

    /// Returns the source identifier, used in logs.
    fn source_id(&self) -> EntropySourceId;
}

/// Identifies where random bytes came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntropySourceId {
    /// Operating system CSPRNG (`getrandom`)
    OperatingSystem,
    /// Deterministic source for tests only
    Mock,
}

impl std::fmt::Display for EntropySourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OperatingSystem => write!(f, "OS CSPRNG"),
            Self::Mock => write!(f, "Mock (NOT RANDOM)"),
        }
    }
}

/// Operating system randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, buf: &mut [u8]) -> Result<()> {
        getrandom::fill(buf).map_err(|e| KeybridgeError::Entropy(e.to_string()))
    }

    fn source_id(&self) -> EntropySourceId {
        EntropySourceId::OperatingSystem
    }
}

/// Draw a fixed-size array from an entropy source.
pub(crate) fn random_array<const N: usize>(source: &dyn EntropySource) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    source.fill(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_entropy_fills_buffer() {
        let a: [u8; 16] = random_array(&OsEntropy).unwrap();
        let b: [u8; 16] = random_array(&OsEntropy).unwrap();
        assert_ne!(a, b, "Two OS draws should not collide");
        assert_eq!(OsEntropy.source_id(), EntropySourceId::OperatingSystem);
    }
}
