//! Secret envelope encryption for sensitive configuration values (API
//! tokens, webhook secrets, service credentials).
//!
//! Envelope format: `enc:v1:<ivB64>.<tagB64>.<dataB64>` using AES-256-GCM.
//! Values without the prefix are legacy plaintext and are returned verbatim.
//! Decryption tries the active key first and falls back to one designated
//! legacy key, so key rotation does not break already-encrypted values;
//! re-encryption always uses the active key.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng, Payload},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use sha2::{Digest, Sha256};

use crate::config::SecretKeyConfig;

const ENVELOPE_PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Envelope cipher over the active key and an optional legacy key.
#[derive(Clone)]
pub struct SecretCipher {
    active: Option<Aes256Gcm>,
    legacy: Option<Aes256Gcm>,
}

/// Derive a 32-byte cipher key from configured key material.
fn cipher_for(material: &str) -> Aes256Gcm {
    let digest = Sha256::digest(material.as_bytes());
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&digest))
}

impl SecretCipher {
    pub fn new(keys: &SecretKeyConfig) -> Self {
        let active = keys.active.as_deref().map(cipher_for);
        // A legacy key identical to the active key adds nothing; skip it so
        // the fallback path stays meaningful.
        let legacy = match (&keys.active, &keys.legacy) {
            (Some(a), Some(l)) if a == l => None,
            (_, Some(l)) => Some(cipher_for(l)),
            _ => None,
        };
        Self { active, legacy }
    }

    /// Whether an active key is configured.
    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    /// Encrypt a secret under the active key.
    ///
    /// Returns `None` when no active key is configured. The empty string is
    /// passed through unencrypted so that "unset" round-trips as "unset".
    pub fn encrypt_secret(&self, plaintext: &str) -> Option<String> {
        let cipher = self.active.as_ref()?;
        if plaintext.is_empty() {
            return Some(String::new());
        }

        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let sealed = match cipher.encrypt(&nonce, plaintext.as_bytes()) {
            Ok(sealed) => sealed,
            Err(_) => {
                tracing::error!("Secret encryption failed");
                return None;
            }
        };

        // The aead API appends the tag to the ciphertext; the envelope
        // carries it as a separate segment.
        let (data, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        Some(format!(
            "{}{}.{}.{}",
            ENVELOPE_PREFIX,
            general_purpose::STANDARD.encode(nonce),
            general_purpose::STANDARD.encode(tag),
            general_purpose::STANDARD.encode(data),
        ))
    }

    /// Decrypt an envelope produced by [`encrypt_secret`].
    ///
    /// Values without the envelope prefix are returned verbatim (legacy
    /// plaintext). Any parse or authentication failure returns `None`;
    /// partial plaintext is never produced.
    pub fn decrypt_secret(&self, value: &str) -> Option<String> {
        let Some(body) = value.strip_prefix(ENVELOPE_PREFIX) else {
            return Some(value.to_string());
        };

        let (iv, tag, data) = parse_segments(body)?;

        let mut sealed = data;
        sealed.extend_from_slice(&tag);
        let nonce = Nonce::from_slice(&iv);

        for cipher in [self.active.as_ref(), self.legacy.as_ref()]
            .into_iter()
            .flatten()
        {
            if let Ok(plaintext) = cipher.decrypt(
                nonce,
                Payload {
                    msg: &sealed,
                    aad: &[],
                },
            ) {
                return String::from_utf8(plaintext).ok();
            }
        }

        tracing::warn!("Secret envelope failed to decrypt under all configured keys");
        None
    }
}

fn parse_segments(body: &str) -> Option<(Vec<u8>, Vec<u8>, Vec<u8>)> {
    let mut parts = body.splitn(3, '.');
    let iv = general_purpose::STANDARD.decode(parts.next()?).ok()?;
    let tag = general_purpose::STANDARD.decode(parts.next()?).ok()?;
    let data = general_purpose::STANDARD.decode(parts.next()?).ok()?;
    if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return None;
    }
    Some((iv, tag, data))
}
