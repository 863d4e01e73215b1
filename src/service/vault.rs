//! At-rest protection for tenant database passwords.
//!
//! Stored format is lowercase hex of `nonce || ciphertext || tag` under
//! AES-256-GCM with a fresh random nonce per encryption. A value only counts
//! as ciphertext if it authenticates under the configured key; anything else
//! is a legacy plaintext value (or corruption, when legacy support is off).

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::warn;

use crate::config::VaultConfig;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum VaultError {
    #[error("vault key must be 64 hex characters or 32 bytes, got {0} bytes")]
    InvalidKey(usize),

    #[error("encryption failed")]
    Encrypt,

    #[error("stored password is not valid ciphertext for the configured key")]
    Corrupt,
}

#[derive(Clone)]
pub struct CredentialVault {
    cipher: Arc<Aes256Gcm>,
    allow_legacy_plaintext: bool,
}

impl CredentialVault {
    pub fn new(cfg: &VaultConfig) -> Result<Self, VaultError> {
        let key_bytes = parse_key(&cfg.key)?;
        let key = Key::<Aes256Gcm>::from_slice(&key_bytes);
        Ok(Self {
            cipher: Arc::new(Aes256Gcm::new(key)),
            allow_legacy_plaintext: cfg.allow_legacy_plaintext,
        })
    }

    /// Encrypt a password for storage. Values that already authenticate as
    /// ciphertext are returned unchanged.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, VaultError> {
        if self.open(plaintext).is_some() {
            return Ok(plaintext.to_string());
        }
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&sealed);
        Ok(hex::encode(out))
    }

    /// Recover the plaintext of a stored password.
    pub fn decrypt(&self, stored: &str) -> Result<String, VaultError> {
        if let Some(plain) = self.open(stored) {
            return Ok(plain);
        }
        if self.allow_legacy_plaintext {
            warn!("stored password is not encrypted; using raw value");
            Ok(stored.to_string())
        } else {
            Err(VaultError::Corrupt)
        }
    }

    pub fn is_ciphertext(&self, stored: &str) -> bool {
        self.open(stored).is_some()
    }

    fn open(&self, stored: &str) -> Option<String> {
        let raw = hex::decode(stored).ok()?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return None;
        }
        let (nonce, sealed) = raw.split_at(NONCE_LEN);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), sealed)
            .ok()?;
        String::from_utf8(plain).ok()
    }
}

fn parse_key(key: &str) -> Result<[u8; 32], VaultError> {
    if key.len() == 64
        && let Ok(bytes) = hex::decode(key)
    {
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        return Ok(out);
    }
    let raw = key.as_bytes();
    if raw.len() == 32 {
        let mut out = [0u8; 32];
        out.copy_from_slice(raw);
        return Ok(out);
    }
    Err(VaultError::InvalidKey(raw.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn vault(legacy: bool) -> CredentialVault {
        CredentialVault::new(&VaultConfig {
            key: "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff".into(),
            allow_legacy_plaintext: legacy,
        })
        .unwrap()
    }

    #[test]
    fn rejects_short_keys() {
        let err = CredentialVault::new(&VaultConfig {
            key: "short".into(),
            allow_legacy_plaintext: true,
        })
        .err();
        assert_eq!(err, Some(VaultError::InvalidKey(5)));
    }

    #[test]
    fn accepts_raw_32_byte_key() {
        assert!(
            CredentialVault::new(&VaultConfig {
                key: "12345678901234567890123456789012".into(),
                allow_legacy_plaintext: true,
            })
            .is_ok()
        );
    }

    #[test]
    fn same_password_encrypts_differently() {
        let v = vault(true);
        let a = v.encrypt("p").unwrap();
        let b = v.encrypt("p").unwrap();
        assert_ne!(a, b);
        assert_eq!(v.decrypt(&a).unwrap(), "p");
        assert_eq!(v.decrypt(&b).unwrap(), "p");
    }

    #[test]
    fn encrypt_skips_existing_ciphertext() {
        let v = vault(true);
        let once = v.encrypt("hunter2").unwrap();
        assert_eq!(v.encrypt(&once).unwrap(), once);
    }

    #[test]
    fn hex_looking_plaintext_is_still_encrypted() {
        let v = vault(true);
        let sealed = v.encrypt("deadbeef").unwrap();
        assert_ne!(sealed, "deadbeef");
        assert_eq!(v.decrypt(&sealed).unwrap(), "deadbeef");
    }

    #[test]
    fn legacy_plaintext_passes_through() {
        let v = vault(true);
        assert_eq!(v.decrypt("not-hex!").unwrap(), "not-hex!");
        assert_eq!(v.decrypt("deadbeef").unwrap(), "deadbeef");
    }

    #[test]
    fn strict_mode_flags_corruption() {
        let v = vault(false);
        assert_eq!(v.decrypt("not-hex!"), Err(VaultError::Corrupt));
        let sealed = v.encrypt("p").unwrap();
        let mut tampered = sealed.clone();
        let last = if tampered.ends_with('0') { "1" } else { "0" };
        tampered.replace_range(tampered.len() - 1.., last);
        assert_eq!(v.decrypt(&tampered), Err(VaultError::Corrupt));
    }

    #[test]
    fn other_keys_cannot_open() {
        let v = vault(false);
        let other = CredentialVault::new(&VaultConfig {
            key: "ffeeddccbbaa99887766554433221100ffeeddccbbaa99887766554433221100".into(),
            allow_legacy_plaintext: false,
        })
        .unwrap();
        let sealed = v.encrypt("p").unwrap();
        assert!(!other.is_ciphertext(&sealed));
    }

    proptest! {
        #[test]
        fn round_trip(p in ".{0,64}") {
            let v = vault(true);
            let sealed = v.encrypt(&p).unwrap();
            prop_assert_eq!(v.decrypt(&sealed).unwrap(), p);
        }

        #[test]
        fn encrypt_is_idempotent(p in ".{0,64}") {
            let v = vault(true);
            let sealed = v.encrypt(&p).unwrap();
            prop_assert_eq!(v.encrypt(&sealed).unwrap(), sealed);
        }
    }
}
