//! AES-256-GCM sealing under a password-derived key
//!
//! Key = PBKDF2-HMAC-SHA256(password, salt, 200 000 iterations, 32 bytes).
//! Salt and nonce are drawn fresh for every call to [`encrypt`], so saving
//! the same package twice never reuses a (key, nonce) pair.

use std::num::NonZeroU32;

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::envelope::Envelope;
use crate::{CodecError, Result};

/// Envelope format tag written by this crate
pub const FORMAT_VERSION: u32 = 1;
/// PBKDF2 salt length (16 bytes)
pub const SALT_SIZE: usize = 16;
/// 96-bit nonce (12 bytes)
pub const NONCE_SIZE: usize = 12;
/// 256-bit key (32 bytes)
pub const KEY_SIZE: usize = 32;
/// Iteration count for the envelope key. Fixed by convention and not
/// stored in the file, so changing it breaks every existing package.
pub const ENVELOPE_KDF_ITERATIONS: u32 = 200_000;

const ENVELOPE_ITERATIONS: NonZeroU32 = match NonZeroU32::new(ENVELOPE_KDF_ITERATIONS) {
    Some(n) => n,
    None => panic!("envelope iteration count must be non-zero"),
};

/// Fill a fixed-size buffer from the system CSPRNG
pub(crate) fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    SystemRandom::new()
        .fill(&mut buf)
        .map_err(|_| CodecError::Randomness)?;
    Ok(buf)
}

pub(crate) fn derive_key(
    password: &str,
    salt: &[u8],
    iterations: NonZeroU32,
) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    pbkdf2::derive(
        pbkdf2::PBKDF2_HMAC_SHA256,
        iterations,
        salt,
        password.as_bytes(),
        &mut *key,
    );
    key
}

fn aead_key(key: &[u8; KEY_SIZE]) -> Result<LessSafeKey> {
    let unbound = UnboundKey::new(&AES_256_GCM, key).map_err(|_| CodecError::Encryption)?;
    Ok(LessSafeKey::new(unbound))
}

/// Seal `plaintext` under `password` with a fresh salt and nonce
pub fn encrypt(plaintext: &[u8], password: &str) -> Result<Envelope> {
    let salt = random_bytes::<SALT_SIZE>()?;
    let nonce = random_bytes::<NONCE_SIZE>()?;
    encrypt_with(plaintext, password, &salt, &nonce)
}

/// Seal with caller-supplied salt and nonce
///
/// Deterministic for fixed inputs. Outside of tests, use [`encrypt`]:
/// reusing a nonce under the same key breaks AES-GCM.
pub fn encrypt_with(
    plaintext: &[u8],
    password: &str,
    salt: &[u8; SALT_SIZE],
    nonce: &[u8; NONCE_SIZE],
) -> Result<Envelope> {
    let key = derive_key(password, salt, ENVELOPE_ITERATIONS);
    let sealing = aead_key(&key)?;

    let mut in_out = plaintext.to_vec();
    sealing
        .seal_in_place_append_tag(Nonce::assume_unique_for_key(*nonce), Aad::empty(), &mut in_out)
        .map_err(|_| CodecError::Encryption)?;

    tracing::debug!(plaintext_len = plaintext.len(), "sealed package payload");
    Ok(Envelope::new(salt, nonce, &in_out))
}

/// Parse envelope bytes and open them with `password`
pub fn decrypt(envelope_bytes: &[u8], password: &str) -> Result<Zeroizing<Vec<u8>>> {
    let envelope = Envelope::from_slice(envelope_bytes)?;
    decrypt_envelope(&envelope, password)
}

/// Open an already-parsed envelope
///
/// Returns the plaintext exactly as it was sealed. A wrong password and a
/// modified salt, nonce, or ciphertext all yield [`CodecError::Authentication`].
pub fn decrypt_envelope(envelope: &Envelope, password: &str) -> Result<Zeroizing<Vec<u8>>> {
    let parts = envelope.decoded_parts()?;
    let key = derive_key(password, &parts.salt, ENVELOPE_ITERATIONS);
    let opening = aead_key(&key).map_err(|_| CodecError::Authentication)?;

    let mut in_out = Zeroizing::new(parts.ciphertext);
    let plaintext_len = opening
        .open_in_place(
            Nonce::assume_unique_for_key(parts.nonce),
            Aad::empty(),
            in_out.as_mut_slice(),
        )
        .map_err(|_| CodecError::Authentication)?
        .len();
    in_out.truncate(plaintext_len);

    tracing::debug!(plaintext_len, "opened package payload");
    Ok(in_out)
}
