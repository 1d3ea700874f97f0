//! Attestation objects and statement verification.
//!
//! Supported formats: `none`, `packed` (self attestation and x5c) and
//! `fido-u2f`. Certificates in `x5c` are used only to check the signature;
//! their chain is not validated against any trust anchor.

use ciborium::value::{Integer, Value};

use super::types::AttestationFormat;
use crate::error::{KeybridgeError, Result};
use crate::registry::COSE_ALG_ES256;
use crate::verify::authenticator_data::{AttestedCredentialData, AuthenticatorData};
use crate::verify::{SignatureVerifier, VerifyingKey};

/// Decoded CBOR attestation object.
#[derive(Debug, Clone, PartialEq)]
pub struct AttestationObject {
    pub fmt: String,
    pub att_stmt: Value,
    pub auth_data: Vec<u8>,
}

impl AttestationObject {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = ciborium::de::from_reader(bytes)
            .map_err(|e| KeybridgeError::parse(format!("invalid attestation object: {e}")))?;
        let entries = value
            .as_map()
            .ok_or_else(|| KeybridgeError::parse("attestation object is not a map"))?;

        let fmt = text_field(entries, "fmt")
            .and_then(Value::as_text)
            .ok_or_else(|| KeybridgeError::parse("attestation object has no fmt"))?
            .to_string();
        let att_stmt = text_field(entries, "attStmt")
            .cloned()
            .ok_or_else(|| KeybridgeError::parse("attestation object has no attStmt"))?;
        let auth_data = text_field(entries, "authData")
            .and_then(Value::as_bytes)
            .ok_or_else(|| KeybridgeError::parse("attestation object has no authData"))?
            .clone();

        Ok(Self {
            fmt,
            att_stmt,
            auth_data,
        })
    }

    pub fn to_cbor(&self) -> Result<Vec<u8>> {
        let value = Value::Map(vec![
            (Value::Text("fmt".into()), Value::Text(self.fmt.clone())),
            (Value::Text("attStmt".into()), self.att_stmt.clone()),
            (Value::Text("authData".into()), Value::Bytes(self.auth_data.clone())),
        ]);
        let mut out = Vec::new();
        ciborium::ser::into_writer(&value, &mut out)
            .map_err(|e| KeybridgeError::parse(format!("attestation encoding failed: {e}")))?;
        Ok(out)
    }

    /// `packed` self attestation: signature by the credential key itself.
    pub fn packed_self(auth_data: Vec<u8>, signature: Vec<u8>) -> Self {
        Self {
            fmt: AttestationFormat::Packed.as_fmt().to_string(),
            att_stmt: Value::Map(vec![
                (
                    Value::Text("alg".into()),
                    Value::Integer(Integer::from(COSE_ALG_ES256)),
                ),
                (Value::Text("sig".into()), Value::Bytes(signature)),
            ]),
            auth_data,
        }
    }

    /// `none` attestation with an empty statement.
    pub fn none(auth_data: Vec<u8>) -> Self {
        Self {
            fmt: AttestationFormat::None.as_fmt().to_string(),
            att_stmt: Value::Map(Vec::new()),
            auth_data,
        }
    }

    /// Verify the attestation statement over `authData ‖ clientDataHash`.
    pub fn verify(
        &self,
        auth_data: &AuthenticatorData,
        client_data_json: &[u8],
    ) -> Result<AttestationFormat> {
        let format = AttestationFormat::from_fmt(&self.fmt).ok_or_else(|| {
            KeybridgeError::parse(format!("unsupported attestation format '{}'", self.fmt))
        })?;
        let attested = auth_data
            .attested
            .as_ref()
            .ok_or_else(|| KeybridgeError::parse("attested credential data missing"))?;
        let stmt = self
            .att_stmt
            .as_map()
            .ok_or_else(|| KeybridgeError::parse("attStmt is not a map"))?;

        match format {
            AttestationFormat::None => {
                if !stmt.is_empty() {
                    return Err(KeybridgeError::parse("'none' attestation with a statement"));
                }
            }
            AttestationFormat::Packed => {
                verify_packed(stmt, auth_data, attested, client_data_json)?
            }
            AttestationFormat::FidoU2f => {
                verify_fido_u2f(stmt, auth_data, attested, client_data_json)?
            }
        }
        Ok(format)
    }
}

fn verify_packed(
    stmt: &[(Value, Value)],
    auth_data: &AuthenticatorData,
    attested: &AttestedCredentialData,
    client_data_json: &[u8],
) -> Result<()> {
    let alg = text_field(stmt, "alg")
        .and_then(Value::as_integer)
        .and_then(|i| i64::try_from(i).ok())
        .ok_or_else(|| KeybridgeError::parse("packed attestation has no alg"))?;
    if alg != COSE_ALG_ES256 {
        return Err(KeybridgeError::UnsupportedAlgorithm(alg));
    }
    let sig = signature(stmt)?;

    let key = match certificates(stmt)? {
        Some(chain) => VerifyingKey::from_x509_der(chain[0])?,
        None => {
            if attested.public_key.alg != alg {
                return Err(KeybridgeError::SignatureInvalid);
            }
            VerifyingKey::from_cose(&attested.public_key)?
        }
    };
    SignatureVerifier::verify_webauthn(&key, auth_data, client_data_json, sig)
}

fn verify_fido_u2f(
    stmt: &[(Value, Value)],
    auth_data: &AuthenticatorData,
    attested: &AttestedCredentialData,
    client_data_json: &[u8],
) -> Result<()> {
    let chain = certificates(stmt)?
        .filter(|chain| chain.len() == 1)
        .ok_or_else(|| KeybridgeError::parse("fido-u2f attestation needs exactly one certificate"))?;
    let key = VerifyingKey::from_x509_der(chain[0])?;

    let data = SignatureVerifier::u2f_registration_data(
        &auth_data.rp_id_hash,
        client_data_json,
        &attested.credential_id,
        &attested.public_key.to_sec1(),
    );
    key.verify(&data, signature(stmt)?)
}

fn signature(stmt: &[(Value, Value)]) -> Result<&[u8]> {
    text_field(stmt, "sig")
        .and_then(Value::as_bytes)
        .map(Vec::as_slice)
        .ok_or_else(|| KeybridgeError::parse("attestation statement has no sig"))
}

fn certificates(stmt: &[(Value, Value)]) -> Result<Option<Vec<&[u8]>>> {
    let Some(x5c) = text_field(stmt, "x5c") else {
        return Ok(None);
    };
    let chain = x5c
        .as_array()
        .ok_or_else(|| KeybridgeError::parse("x5c is not an array"))?
        .iter()
        .map(|cert| {
            cert.as_bytes()
                .map(Vec::as_slice)
                .ok_or_else(|| KeybridgeError::parse("x5c entry is not a byte string"))
        })
        .collect::<Result<Vec<_>>>()?;
    if chain.is_empty() {
        return Err(KeybridgeError::parse("x5c is empty"));
    }
    Ok(Some(chain))
}

fn text_field<'a>(entries: &'a [(Value, Value)], name: &str) -> Option<&'a Value> {
    entries
        .iter()
        .find(|(k, _)| k.as_text() == Some(name))
        .map(|(_, v)| v)
}
