use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CairnError, Result};

/// Encryption codec wire IDs, stored per archive (chunk payloads) and
/// implied per repository (metadata). Slot 1 is the repository cipher:
/// AES-256-GCM under an Argon2id-derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(into = "u16", try_from = "u16")]
pub enum EncryptionCodec {
    None = 0,
    #[default]
    Aes256Gcm = 1,
}

impl EncryptionCodec {
    pub fn id(&self) -> u16 {
        *self as u16
    }
}

impl From<EncryptionCodec> for u16 {
    fn from(codec: EncryptionCodec) -> u16 {
        codec as u16
    }
}

impl TryFrom<u16> for EncryptionCodec {
    type Error = String;

    fn try_from(id: u16) -> std::result::Result<Self, Self::Error> {
        match id {
            0 => Ok(EncryptionCodec::None),
            1 => Ok(EncryptionCodec::Aes256Gcm),
            other => Err(format!("unknown encryption codec id: {other}")),
        }
    }
}

/// Trait for encrypting and decrypting repository bytes.
///
/// Output of `encrypt` is self-contained: everything `decrypt` needs
/// besides the password (nonce, authentication tag) is embedded.
pub trait CryptoEngine: Send + Sync {
    fn codec(&self) -> EncryptionCodec;

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Inverse of `encrypt`. Fails with `WrongPassword` when the data was
    /// encrypted under a different password or has been tampered with.
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// No-encryption engine.
pub struct PlaintextEngine;

impl CryptoEngine for PlaintextEngine {
    fn codec(&self) -> EncryptionCodec {
        EncryptionCodec::None
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }
}

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

// Key derivation is deterministic (password -> key) so that any client
// holding the password can open the repository without a key blob. The
// salt is a fixed application context, not a secret.
const KEY_CONTEXT_SALT: &[u8; 16] = b"cairn.repokey.v1";
const ARGON2_TIME_COST: u32 = 3;
const ARGON2_MEMORY_KIB: u32 = 65536; // 64 MiB
const ARGON2_PARALLELISM: u32 = 4;

/// Derive the 32-byte repository key from the password using Argon2id.
fn derive_key(password: &str) -> Result<Zeroizing<[u8; 32]>> {
    let params = argon2::Params::new(
        ARGON2_MEMORY_KIB,
        ARGON2_TIME_COST,
        ARGON2_PARALLELISM,
        Some(32),
    )
    .map_err(|e| CairnError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(password.as_bytes(), KEY_CONTEXT_SALT, output.as_mut())
        .map_err(|e| CairnError::KeyDerivation(format!("argon2 hash: {e}")))?;
    Ok(output)
}

/// AES-256-GCM engine keyed by the repository password.
pub struct Aes256GcmEngine {
    cipher: Aes256Gcm,
}

impl Aes256GcmEngine {
    /// Derive the key from the password and build the cipher.
    pub fn derive(password: &str) -> Result<Self> {
        let key = derive_key(password)?;
        let cipher = Aes256Gcm::new_from_slice(key.as_ref())
            .map_err(|e| CairnError::KeyDerivation(format!("cipher init: {e}")))?;
        Ok(Self { cipher })
    }
}

impl CryptoEngine for Aes256GcmEngine {
    fn codec(&self) -> EncryptionCodec {
        EncryptionCodec::Aes256Gcm
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CairnError::Other(format!("AES-GCM encrypt: {e}")))?;

        // Wire format: [12-byte nonce][ciphertext with appended 16-byte tag]
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CairnError::WrongPassword);
        }
        let (nonce_bytes, ciphertext) = data.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CairnError::WrongPassword)
    }
}

/// Build the engine for a codec. The password is only touched for codecs
/// that actually encrypt.
pub fn engine_for(codec: EncryptionCodec, password: &str) -> Result<Arc<dyn CryptoEngine>> {
    match codec {
        EncryptionCodec::None => Ok(Arc::new(PlaintextEngine)),
        EncryptionCodec::Aes256Gcm => Ok(Arc::new(Aes256GcmEngine::derive(password)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let engine = Aes256GcmEngine::derive("test-password").unwrap();
        let plaintext = b"the quick brown fox";
        let ciphertext = engine.encrypt(plaintext).unwrap();
        assert_ne!(&ciphertext[NONCE_LEN..], plaintext.as_slice());
        let decrypted = engine.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn wrong_password_fails_distinctly() {
        let engine_a = Aes256GcmEngine::derive("password-one").unwrap();
        let engine_b = Aes256GcmEngine::derive("password-two").unwrap();
        let ciphertext = engine_a.encrypt(b"secret").unwrap();
        let err = engine_b.decrypt(&ciphertext).unwrap_err();
        assert!(matches!(err, CairnError::WrongPassword));
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let engine = Aes256GcmEngine::derive("pw").unwrap();
        let mut ciphertext = engine.encrypt(b"payload").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0x01;
        assert!(matches!(
            engine.decrypt(&ciphertext),
            Err(CairnError::WrongPassword)
        ));
    }

    #[test]
    fn truncated_ciphertext_rejected() {
        let engine = Aes256GcmEngine::derive("pw").unwrap();
        assert!(matches!(
            engine.decrypt(&[0u8; NONCE_LEN + TAG_LEN - 1]),
            Err(CairnError::WrongPassword)
        ));
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = derive_key("same password").unwrap();
        let b = derive_key("same password").unwrap();
        assert_eq!(a.as_ref(), b.as_ref());
        let c = derive_key("other password").unwrap();
        assert_ne!(a.as_ref(), c.as_ref());
    }

    #[test]
    fn nonces_are_fresh_per_message() {
        let engine = Aes256GcmEngine::derive("pw").unwrap();
        let a = engine.encrypt(b"same input").unwrap();
        let b = engine.encrypt(b"same input").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn plaintext_engine_is_identity() {
        let engine = PlaintextEngine;
        let data = b"untouched";
        assert_eq!(engine.encrypt(data).unwrap(), data);
        assert_eq!(engine.decrypt(data).unwrap(), data);
    }

    #[test]
    fn wire_id_roundtrip() {
        for codec in [EncryptionCodec::None, EncryptionCodec::Aes256Gcm] {
            assert_eq!(EncryptionCodec::try_from(codec.id()).unwrap(), codec);
        }
        assert!(EncryptionCodec::try_from(7u16).is_err());
    }
}
