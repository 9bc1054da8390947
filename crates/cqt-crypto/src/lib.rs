//! CQT Crypto - the sealed envelope behind `.cqt` exam packages
//!
//! This crate provides:
//! - The on-disk envelope (version, salt, nonce, ciphertext)
//! - AES-256-GCM sealing under a PBKDF2-HMAC-SHA256 password key
//! - Salted password records for the evaluation gate
//!
//! Nothing here ever logs a password, a derived key, or plaintext.

pub mod cipher;
pub mod envelope;
pub mod password;

pub use cipher::{decrypt, decrypt_envelope, encrypt, encrypt_with};
pub use envelope::Envelope;
pub use password::{hash_password, hash_password_with, verify_password, PasswordRecord};

/// Errors that can occur while sealing or opening an envelope
///
/// `Authentication` deliberately covers both a wrong password and a
/// tampered file. Callers must not try to tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Malformed package: {0}")]
    Format(String),

    #[error("Wrong password or corrupted file")]
    Authentication,

    #[error("Secure random source unavailable")]
    Randomness,

    #[error("Encryption failed")]
    Encryption,
}

pub type Result<T> = std::result::Result<T, CodecError>;
