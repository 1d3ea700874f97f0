//! Byte encodings shared by the protocol types.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::error::{KeybridgeError, Result};

/// Encode bytes as websafe base64 without padding.
pub fn b64url_encode(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode websafe base64, tolerating trailing `=` padding.
pub fn b64url_decode(text: &str) -> Result<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(text.trim_end_matches('='))
        .map_err(|e| KeybridgeError::parse(format!("invalid base64url: {e}")))
}

/// Serde adapter for `Vec<u8>` fields carried as base64url strings.
pub mod b64 {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(text.trim_end_matches('='))
            .map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for `Option<Vec<u8>>` fields carried as base64url strings.
pub mod b64_opt {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&URL_SAFE_NO_PAD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .filter(|text| !text.is_empty())
            .map(|text| {
                URL_SAFE_NO_PAD
                    .decode(text.trim_end_matches('='))
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

/// Serde adapter for an optional 16-byte value carried as base64url.
pub mod b64_opt_array16 {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<[u8; 16]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => serializer.serialize_some(&URL_SAFE_NO_PAD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<[u8; 16]>, D::Error> {
        let Some(text) = Option::<String>::deserialize(deserializer)? else {
            return Ok(None);
        };
        let bytes = URL_SAFE_NO_PAD
            .decode(text.trim_end_matches('='))
            .map_err(serde::de::Error::custom)?;
        let array: [u8; 16] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("expected 16 bytes"))?;
        Ok(Some(array))
    }
}

/// Total length (header + content) of the DER element at the start of `bytes`.
///
/// Only definite lengths are accepted; X.509 certificates and ECDSA signatures
/// never use the indefinite form.
pub fn der_element_len(bytes: &[u8]) -> Result<usize> {
    let truncated = || KeybridgeError::parse("truncated DER element");
    let first_len = *bytes.get(1).ok_or_else(truncated)?;

    let (header, content) = if first_len & 0x80 == 0 {
        (2, usize::from(first_len))
    } else {
        let count = usize::from(first_len & 0x7F);
        if count == 0 || count > 4 {
            return Err(KeybridgeError::parse("unsupported DER length encoding"));
        }
        let len_bytes = bytes.get(2..2 + count).ok_or_else(truncated)?;
        let content = len_bytes
            .iter()
            .fold(0usize, |acc, b| (acc << 8) | usize::from(*b));
        (2 + count, content)
    };

    let total = header + content;
    if total > bytes.len() {
        return Err(truncated());
    }
    Ok(total)
}
