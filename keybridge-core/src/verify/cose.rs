//! COSE_Key handling (RFC 8152 §13) for EC2 P-256 keys.

use ciborium::value::{Integer, Value};

use crate::error::{KeybridgeError, Result};
use crate::registry::COSE_ALG_ES256;

const KEY_KTY: i64 = 1;
const KEY_ALG: i64 = 3;
const KEY_CRV: i64 = -1;
const KEY_X: i64 = -2;
const KEY_Y: i64 = -3;

const KTY_EC2: i64 = 2;
const CRV_P256: i64 = 1;

/// An ES256 public key as carried in attested credential data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    pub alg: i64,
    pub x: [u8; 32],
    pub y: [u8; 32],
}

impl CoseKey {
    /// Build from an uncompressed SEC1 point (`0x04 ‖ x ‖ y`).
    pub fn from_sec1(point: &[u8]) -> Result<Self> {
        if point.len() != 65 || point[0] != 0x04 {
            return Err(KeybridgeError::parse("expected uncompressed P-256 point"));
        }
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(&point[1..33]);
        y.copy_from_slice(&point[33..65]);
        Ok(Self {
            alg: COSE_ALG_ES256,
            x,
            y,
        })
    }

    /// Parse a decoded COSE_Key map. Only EC2 / P-256 / ES256 is accepted.
    pub fn from_value(value: &Value) -> Result<Self> {
        let entries = value
            .as_map()
            .ok_or_else(|| KeybridgeError::parse("COSE key is not a map"))?;
        let int_field = |label: i64| -> Option<i64> {
            lookup(entries, label)
                .and_then(|v| v.as_integer())
                .and_then(|i| i64::try_from(i).ok())
        };

        let alg = int_field(KEY_ALG).ok_or_else(|| KeybridgeError::parse("COSE key has no alg"))?;
        if alg != COSE_ALG_ES256 {
            return Err(KeybridgeError::UnsupportedAlgorithm(alg));
        }
        if int_field(KEY_KTY) != Some(KTY_EC2) || int_field(KEY_CRV) != Some(CRV_P256) {
            return Err(KeybridgeError::UnsupportedAlgorithm(alg));
        }

        let coord = |label: i64, name: &str| -> Result<[u8; 32]> {
            lookup(entries, label)
                .and_then(|v| v.as_bytes())
                .and_then(|b| <[u8; 32]>::try_from(b.as_slice()).ok())
                .ok_or_else(|| KeybridgeError::parse(format!("COSE key has no valid {name}")))
        };

        Ok(Self {
            alg,
            x: coord(KEY_X, "x")?,
            y: coord(KEY_Y, "y")?,
        })
    }

    /// Uncompressed SEC1 encoding, the form stored in the registry.
    pub fn to_sec1(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(65);
        out.push(0x04);
        out.extend_from_slice(&self.x);
        out.extend_from_slice(&self.y);
        out
    }

    pub fn to_value(&self) -> Value {
        let int = |v: i64| Value::Integer(Integer::from(v));
        Value::Map(vec![
            (int(KEY_KTY), int(KTY_EC2)),
            (int(KEY_ALG), int(self.alg)),
            (int(KEY_CRV), int(CRV_P256)),
            (int(KEY_X), Value::Bytes(self.x.to_vec())),
            (int(KEY_Y), Value::Bytes(self.y.to_vec())),
        ])
    }

    /// CBOR encoding of [`Self::to_value`].
    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        ciborium::ser::into_writer(&self.to_value(), &mut out)
            .map_err(|e| KeybridgeError::parse(format!("COSE key encoding failed: {e}")))?;
        Ok(out)
    }
}

fn lookup(entries: &[(Value, Value)], label: i64) -> Option<&Value> {
    entries.iter().find_map(|(k, v)| {
        k.as_integer()
            .filter(|i| i128::from(*i) == i128::from(label))
            .map(|_| v)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CoseKey {
        CoseKey {
            alg: COSE_ALG_ES256,
            x: [1u8; 32],
            y: [2u8; 32],
        }
    }

    #[test]
    fn test_value_round_trip() {
        let key = sample();
        assert_eq!(CoseKey::from_value(&key.to_value()).unwrap(), key);
    }

    #[test]
    fn test_rejects_other_algorithms() {
        let mut value = sample().to_value();
        if let Value::Map(entries) = &mut value {
            entries[1].1 = Value::Integer(Integer::from(-257));
        }
        let err = CoseKey::from_value(&value).unwrap_err();
        assert!(matches!(err, KeybridgeError::UnsupportedAlgorithm(-257)));
    }

    #[test]
    fn test_sec1_layout() {
        let sec1 = sample().to_sec1();
        assert_eq!(sec1.len(), 65);
        assert_eq!(sec1[0], 0x04);
        assert_eq!(CoseKey::from_sec1(&sec1).unwrap(), sample());
        assert!(CoseKey::from_sec1(&sec1[1..]).is_err());
    }
}
