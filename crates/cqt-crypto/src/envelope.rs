//! Envelope wire format
//!
//! A `.cqt` file is a small UTF-8 JSON object:
//!
//! ```json
//! { "version": 1, "salt": "<b64>", "nonce": "<b64>", "ciphertext": "<b64>" }
//! ```
//!
//! `ciphertext` is the AES-256-GCM output with the 16-byte tag appended.
//! The KDF iteration count is NOT stored here; both sides use
//! [`crate::cipher::ENVELOPE_KDF_ITERATIONS`].

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::cipher::{FORMAT_VERSION, NONCE_SIZE};
use crate::{CodecError, Result};

/// An encrypted envelope as persisted on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Version of the envelope format
    pub version: u32,
    /// PBKDF2 salt (base64)
    pub salt: String,
    /// AES-GCM nonce (base64)
    pub nonce: String,
    /// Ciphertext with the authentication tag appended (base64)
    pub ciphertext: String,
}

/// Raw envelope fields after base64 decoding
pub(crate) struct RawParts {
    pub salt: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
}

impl Envelope {
    /// Build an envelope from raw bytes
    pub fn new(salt: &[u8], nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Self {
        Self {
            version: FORMAT_VERSION,
            salt: STANDARD.encode(salt),
            nonce: STANDARD.encode(nonce),
            ciphertext: STANDARD.encode(ciphertext),
        }
    }

    /// Parse and validate an envelope from file bytes
    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(data)
            .map_err(|e| CodecError::Format(format!("envelope: {}", e)))?;
        if envelope.version != FORMAT_VERSION {
            return Err(CodecError::Format(format!(
                "unsupported envelope version {}",
                envelope.version
            )));
        }
        Ok(envelope)
    }

    /// Serialize to file bytes
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CodecError::Format(e.to_string()))
    }

    pub(crate) fn decoded_parts(&self) -> Result<RawParts> {
        if self.version != FORMAT_VERSION {
            return Err(CodecError::Format(format!(
                "unsupported envelope version {}",
                self.version
            )));
        }
        let salt = decode_field("salt", &self.salt)?;
        let nonce_vec = decode_field("nonce", &self.nonce)?;
        let ciphertext = decode_field("ciphertext", &self.ciphertext)?;

        let nonce: [u8; NONCE_SIZE] = nonce_vec.as_slice().try_into().map_err(|_| {
            CodecError::Format(format!(
                "nonce must be {} bytes, got {}",
                NONCE_SIZE,
                nonce_vec.len()
            ))
        })?;

        Ok(RawParts {
            salt,
            nonce,
            ciphertext,
        })
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value.trim())
        .map_err(|_| CodecError::Format(format!("{} is not valid base64", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_envelope() {
        let env = Envelope::new(&[1u8; 16], &[2u8; 12], b"ciphertext-and-tag");
        let bytes = env.to_vec().unwrap();
        let parsed = Envelope::from_slice(&bytes).unwrap();
        assert_eq!(parsed, env);
        assert_eq!(parsed.version, 1);
    }

    #[test]
    fn test_missing_field_is_format_error() {
        let data = br#"{"version":1,"salt":"AAAA","nonce":"AAAA"}"#;
        assert!(matches!(
            Envelope::from_slice(data),
            Err(CodecError::Format(_))
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut env = Envelope::new(&[1u8; 16], &[2u8; 12], b"x");
        env.version = 2;
        let bytes = serde_json::to_vec(&env).unwrap();
        assert!(matches!(
            Envelope::from_slice(&bytes),
            Err(CodecError::Format(_))
        ));
    }

    #[test]
    fn test_not_json_is_format_error() {
        assert!(matches!(
            Envelope::from_slice(b"PK\x03\x04 definitely a zip"),
            Err(CodecError::Format(_))
        ));
    }

    #[test]
    fn test_bad_nonce_length() {
        let mut env = Envelope::new(&[1u8; 16], &[2u8; 12], b"x");
        env.nonce = STANDARD.encode([0u8; 8]);
        assert!(matches!(env.decoded_parts(), Err(CodecError::Format(_))));
    }

    #[test]
    fn test_bad_base64() {
        let mut env = Envelope::new(&[1u8; 16], &[2u8; 12], b"x");
        env.ciphertext = "not base64 !!".to_string();
        assert!(matches!(env.decoded_parts(), Err(CodecError::Format(_))));
    }
}
