//! Envelope encryption for opaque session payloads.
//!
//! Session payloads never hit the store in plaintext. [`Encryptor`] seals them
//! with AES-256-GCM under the process-wide [`Secret`], prepends the random
//! nonce, and base64-encodes the result so it can live in a string-valued
//! hash field. Decryption fails closed: a wrong key, a flipped bit, or a
//! truncated value all come back as an error, never as garbage plaintext.

use std::fmt;
use std::str::FromStr;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// The byte length of a [`Secret`].
pub const SECRET_LEN: usize = 32;

/// The byte length of an AES-GCM nonce.
const NONCE_LEN: usize = 12;

/// The process-wide symmetric secret used for sealing session payloads.
///
/// Always exactly 32 bytes (AES-256); the length is validated when the
/// configuration is parsed, so a malformed secret kills the process at boot
/// rather than at the first login.
#[derive(Clone, Copy)]
pub struct Secret([u8; SECRET_LEN]);

impl Secret {
	/// Creates a new [`Secret`] from raw bytes.
	pub const fn new(bytes: [u8; SECRET_LEN]) -> Self {
		Self(bytes)
	}

	/// Returns the raw key material.
	fn as_bytes(&self) -> &[u8; SECRET_LEN] {
		&self.0
	}
}

impl fmt::Debug for Secret {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Secret(*****)")
	}
}

/// The error returned when parsing a [`Secret`] from a string of the wrong
/// length.
#[derive(Debug, Error)]
#[error("secret must be exactly {SECRET_LEN} bytes, got {actual}")]
pub struct InvalidSecretLength {
	/// The length we actually got.
	actual: usize,
}

impl FromStr for Secret {
	type Err = InvalidSecretLength;

	fn from_str(value: &str) -> Result<Self, Self::Err> {
		let bytes = <[u8; SECRET_LEN]>::try_from(value.as_bytes())
			.map_err(|_| InvalidSecretLength { actual: value.len() })?;

		Ok(Self(bytes))
	}
}

impl<'de> Deserialize<'de> for Secret {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		String::deserialize(deserializer)?
			.parse::<Self>()
			.map_err(serde::de::Error::custom)
	}
}

/// Errors that can occur while encrypting a payload.
#[derive(Debug, Error)]
pub enum EncryptError {
	/// The AEAD implementation rejected the input.
	#[error("failed to encrypt payload")]
	Encrypt,
}

/// Errors that can occur while decrypting a payload.
///
/// All of these mean the stored value cannot be trusted. Callers are expected
/// to treat them uniformly (see the store's integrity-on-read policy).
#[derive(Debug, Error)]
pub enum DecryptError {
	/// The value was not valid base64.
	#[error("ciphertext is not valid base64")]
	Decode(#[from] base64::DecodeError),

	/// The value was too short to even contain a nonce.
	#[error("ciphertext is too short")]
	TooShort,

	/// The authentication tag did not verify.
	///
	/// Either the value was tampered with, or it was sealed under a different
	/// key. The two cases are indistinguishable by design.
	#[error("failed to authenticate ciphertext")]
	Authentication,
}

/// Seals and opens opaque payloads with AES-256-GCM.
///
/// Holds no per-request state and is freely shareable.
#[derive(Debug, Clone, Copy, Default)]
pub struct Encryptor;

impl Encryptor {
	/// Encrypts `plaintext` under `secret`.
	///
	/// The output is `base64(nonce || ciphertext)`, with a fresh random nonce
	/// per call.
	pub fn encrypt(&self, plaintext: &[u8], secret: &Secret) -> Result<String, EncryptError> {
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(secret.as_bytes()));
		let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
		let ciphertext = cipher
			.encrypt(&nonce, plaintext)
			.map_err(|_| EncryptError::Encrypt)?;

		let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
		sealed.extend_from_slice(&nonce);
		sealed.extend_from_slice(&ciphertext);

		Ok(BASE64_STANDARD.encode(sealed))
	}

	/// Decrypts a value previously produced by [`Encryptor::encrypt()`].
	pub fn decrypt(&self, sealed: &str, secret: &Secret) -> Result<Vec<u8>, DecryptError> {
		let sealed = BASE64_STANDARD.decode(sealed)?;

		if sealed.len() < NONCE_LEN {
			return Err(DecryptError::TooShort);
		}

		let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(secret.as_bytes()));

		cipher
			.decrypt(Nonce::from_slice(nonce), ciphertext)
			.map_err(|_| DecryptError::Authentication)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn secret(byte: u8) -> Secret {
		Secret::new([byte; SECRET_LEN])
	}

	#[test]
	fn round_trip() {
		let encryptor = Encryptor;
		let key = secret(0x42);
		let plaintext = br#"{"user_id":"7d4e...","role":2}"#;

		let sealed = encryptor.encrypt(plaintext, &key).unwrap();
		let opened = encryptor.decrypt(&sealed, &key).unwrap();

		assert_eq!(opened, plaintext);
	}

	#[test]
	fn nonces_are_fresh() {
		let encryptor = Encryptor;
		let key = secret(0x42);

		let first = encryptor.encrypt(b"payload", &key).unwrap();
		let second = encryptor.encrypt(b"payload", &key).unwrap();

		assert_ne!(first, second);
	}

	#[test]
	fn wrong_key_fails_closed() {
		let encryptor = Encryptor;
		let sealed = encryptor.encrypt(b"payload", &secret(0x42)).unwrap();

		let result = encryptor.decrypt(&sealed, &secret(0x43));

		assert!(matches!(result, Err(DecryptError::Authentication)));
	}

	#[test]
	fn tampered_ciphertext_fails_closed() {
		let encryptor = Encryptor;
		let key = secret(0x42);
		let sealed = encryptor.encrypt(b"payload", &key).unwrap();

		let mut bytes = BASE64_STANDARD.decode(&sealed).unwrap();
		let last = bytes.len() - 1;
		bytes[last] ^= 0xff;
		let tampered = BASE64_STANDARD.encode(bytes);

		let result = encryptor.decrypt(&tampered, &key);

		assert!(matches!(result, Err(DecryptError::Authentication)));
	}

	#[test]
	fn garbage_input_fails_closed() {
		let encryptor = Encryptor;
		let key = secret(0x42);

		assert!(matches!(
			encryptor.decrypt("corrupted", &key),
			Err(DecryptError::Decode(_) | DecryptError::TooShort)
		));
		assert!(matches!(
			encryptor.decrypt("AAAA", &key),
			Err(DecryptError::TooShort)
		));
	}

	#[test]
	fn secret_length_is_validated() {
		assert!("too short".parse::<Secret>().is_err());
		assert!("x".repeat(SECRET_LEN).parse::<Secret>().is_ok());
		assert!("x".repeat(SECRET_LEN + 1).parse::<Secret>().is_err());
	}
}
