// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Signed relay events and payload encryption.
//!
//! ## Event format
//!
//! ```text
//! id  = sha256(json([0, pubkey, created_at, kind, tags, content]))
//! sig = bip340_schnorr(secret, id)
//! ```
//!
//! ## Content encryption
//!
//! The shared secret is the x-coordinate of ECDH between our secret key and
//! the counterparty's x-only public key. Content is
//! `base64(aes_256_cbc_pkcs7(plaintext)) + "?iv=" + base64(iv)`.
//!
//! Derived secrets are kept in an LRU cache keyed by counterparty key so a
//! request and its response (or a burst of batch responses) derive once.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64ct::{Base64, Encoding};
use k256::schnorr::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use k256::{PublicKey, SecretKey};
use lru::LruCache;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const IV_SEPARATOR: &str = "?iv=";

/// 32-byte ECDH shared secret.
pub type SharedSecret = [u8; 32];

pub type Tags = Vec<Vec<String>>;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid secret key")]
    InvalidSecretKey,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),

    #[error("decryption failed")]
    Decrypt,

    #[error("event id does not match content")]
    IdMismatch,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("signing failed")]
    Signing,

    #[error("system randomness unavailable")]
    Random,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

// =============================================================================
// Keys
// =============================================================================

/// A secp256k1 identity: the secret for ECDH and its BIP-340 signing form.
#[derive(Clone)]
pub struct Keys {
    secret: SecretKey,
    signing: SigningKey,
    public_hex: String,
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("public_key", &self.public_hex)
            .finish_non_exhaustive()
    }
}

impl Keys {
    pub fn from_secret_bytes(bytes: &[u8]) -> EnvelopeResult<Self> {
        let secret = SecretKey::from_slice(bytes).map_err(|_| EnvelopeError::InvalidSecretKey)?;
        let signing = SigningKey::from_bytes(bytes).map_err(|_| EnvelopeError::InvalidSecretKey)?;
        let public_hex = hex::encode(signing.verifying_key().to_bytes());
        Ok(Self {
            secret,
            signing,
            public_hex,
        })
    }

    pub fn from_hex(secret_hex: &str) -> EnvelopeResult<Self> {
        let bytes = hex::decode(secret_hex.trim()).map_err(|_| EnvelopeError::InvalidSecretKey)?;
        Self::from_secret_bytes(&bytes)
    }

    /// Generate a fresh random identity.
    pub fn generate() -> EnvelopeResult<Self> {
        let rng = SystemRandom::new();
        loop {
            let mut bytes = [0u8; 32];
            rng.fill(&mut bytes).map_err(|_| EnvelopeError::Random)?;
            // Retry on the negligible chance the bytes are not a valid scalar.
            if let Ok(keys) = Self::from_secret_bytes(&bytes) {
                return Ok(keys);
            }
        }
    }

    /// Hex x-only public key.
    pub fn public_key(&self) -> &str {
        &self.public_hex
    }

    /// Derive the ECDH shared secret with a counterparty x-only key.
    pub fn shared_secret(&self, counterparty_hex: &str) -> EnvelopeResult<SharedSecret> {
        let public = parse_xonly(counterparty_hex)?;
        let shared =
            k256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), public.as_affine());
        let mut out = [0u8; 32];
        out.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(out)
    }

    /// Build and sign an event authored by these keys.
    pub fn sign_event(&self, kind: u16, tags: Tags, content: String) -> EnvelopeResult<Event> {
        let created_at = chrono::Utc::now().timestamp();
        let id = Event::compute_id(&self.public_hex, created_at, kind, &tags, &content)?;
        let sig: Signature = self
            .signing
            .sign_prehash(&id)
            .map_err(|_| EnvelopeError::Signing)?;

        Ok(Event {
            id: hex::encode(id),
            pubkey: self.public_hex.clone(),
            created_at,
            kind,
            tags,
            content,
            sig: hex::encode(sig.to_bytes()),
        })
    }
}

fn parse_xonly(hex_key: &str) -> EnvelopeResult<PublicKey> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| EnvelopeError::InvalidPublicKey(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(EnvelopeError::InvalidPublicKey(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    let mut sec1 = Vec::with_capacity(33);
    sec1.push(0x02);
    sec1.extend_from_slice(&bytes);
    PublicKey::from_sec1_bytes(&sec1).map_err(|e| EnvelopeError::InvalidPublicKey(e.to_string()))
}

// =============================================================================
// Events
// =============================================================================

/// A signed relay event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u16,
    pub tags: Tags,
    pub content: String,
    pub sig: String,
}

impl Event {
    pub fn compute_id(
        pubkey: &str,
        created_at: i64,
        kind: u16,
        tags: &Tags,
        content: &str,
    ) -> EnvelopeResult<[u8; 32]> {
        let canonical =
            serde_json::to_string(&serde_json::json!([0, pubkey, created_at, kind, tags, content]))?;
        Ok(Sha256::digest(canonical.as_bytes()).into())
    }

    /// Check that the id commits to the content and the signature is valid.
    pub fn verify(&self) -> EnvelopeResult<()> {
        let id = Self::compute_id(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        if hex::encode(id) != self.id.to_lowercase() {
            return Err(EnvelopeError::IdMismatch);
        }

        let key_bytes =
            hex::decode(&self.pubkey).map_err(|e| EnvelopeError::InvalidPublicKey(e.to_string()))?;
        let verifying = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|e| EnvelopeError::InvalidPublicKey(e.to_string()))?;
        let sig_bytes = hex::decode(&self.sig).map_err(|_| EnvelopeError::InvalidSignature)?;
        let sig = Signature::try_from(sig_bytes.as_slice())
            .map_err(|_| EnvelopeError::InvalidSignature)?;

        verifying
            .verify_prehash(&id, &sig)
            .map_err(|_| EnvelopeError::InvalidSignature)
    }

    /// Value of the first tag with the given name.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some(name))
            .and_then(|t| t.get(1))
            .map(String::as_str)
    }
}

/// Single-name tag helper, e.g. `tag("p", pubkey)`.
pub fn tag(name: &str, value: impl Into<String>) -> Vec<String> {
    vec![name.to_string(), value.into()]
}

// =============================================================================
// Content encryption
// =============================================================================

pub fn encrypt(secret: &SharedSecret, plaintext: &str) -> EnvelopeResult<String> {
    let mut iv = [0u8; 16];
    SystemRandom::new()
        .fill(&mut iv)
        .map_err(|_| EnvelopeError::Random)?;

    let cipher = Aes256CbcEnc::new(secret.into(), &iv.into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    Ok(format!(
        "{}{IV_SEPARATOR}{}",
        Base64::encode_string(&ciphertext),
        Base64::encode_string(&iv)
    ))
}

pub fn decrypt(secret: &SharedSecret, content: &str) -> EnvelopeResult<String> {
    let (ct_b64, iv_b64) = content
        .split_once(IV_SEPARATOR)
        .ok_or_else(|| EnvelopeError::MalformedCiphertext("missing iv".to_string()))?;

    let ciphertext = Base64::decode_vec(ct_b64)
        .map_err(|e| EnvelopeError::MalformedCiphertext(e.to_string()))?;
    let iv = Base64::decode_vec(iv_b64)
        .map_err(|e| EnvelopeError::MalformedCiphertext(e.to_string()))?;
    let iv: [u8; 16] = iv
        .try_into()
        .map_err(|_| EnvelopeError::MalformedCiphertext("iv must be 16 bytes".to_string()))?;

    let cipher = Aes256CbcDec::new(secret.into(), &iv.into());
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| EnvelopeError::Decrypt)?;

    String::from_utf8(plaintext).map_err(|_| EnvelopeError::Decrypt)
}

// =============================================================================
// Envelope
// =============================================================================

/// Service identity plus a cache of derived shared secrets.
pub struct Envelope {
    keys: Keys,
    secrets: Mutex<LruCache<String, SharedSecret>>,
}

impl Envelope {
    pub fn new(keys: Keys, cache_size: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Self {
            keys,
            secrets: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    pub fn public_key(&self) -> &str {
        self.keys.public_key()
    }

    /// Shared secret with `counterparty`, derived at most once while cached.
    pub fn shared_secret(&self, counterparty: &str) -> EnvelopeResult<SharedSecret> {
        let key = counterparty.to_lowercase();
        if let Ok(mut cache) = self.secrets.lock() {
            if let Some(secret) = cache.get(&key) {
                return Ok(*secret);
            }
        }

        let secret = self.keys.shared_secret(&key)?;
        if let Ok(mut cache) = self.secrets.lock() {
            cache.put(key, secret);
        }
        Ok(secret)
    }

    pub fn encrypt(&self, recipient: &str, plaintext: &str) -> EnvelopeResult<String> {
        encrypt(&self.shared_secret(recipient)?, plaintext)
    }

    pub fn decrypt(&self, sender: &str, content: &str) -> EnvelopeResult<String> {
        decrypt(&self.shared_secret(sender)?, content)
    }

    /// Encrypt `plaintext` for `recipient` and wrap it in a signed event
    /// tagged with the recipient key plus `extra_tags`.
    pub fn seal(
        &self,
        kind: u16,
        recipient: &str,
        plaintext: &str,
        extra_tags: Tags,
    ) -> EnvelopeResult<Event> {
        let content = self.encrypt(recipient, plaintext)?;
        let mut tags = vec![tag("p", recipient)];
        tags.extend(extra_tags);
        self.keys.sign_event(kind, tags, content)
    }

    pub fn cached_secrets(&self) -> usize {
        self.secrets.lock().map(|c| c.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_then_decrypt_returns_original() {
        let alice = Keys::generate().unwrap();
        let bob = Keys::generate().unwrap();

        let payload = r#"{"method":"pay_invoice","params":{"invoice":"lnbc1..."}}"#;
        let ct = encrypt(&alice.shared_secret(bob.public_key()).unwrap(), payload).unwrap();
        let pt = decrypt(&bob.shared_secret(alice.public_key()).unwrap(), &ct).unwrap();
        assert_eq!(pt, payload);
    }

    #[test]
    fn shared_secret_is_symmetric() {
        let alice = Keys::generate().unwrap();
        let bob = Keys::generate().unwrap();
        assert_eq!(
            alice.shared_secret(bob.public_key()).unwrap(),
            bob.shared_secret(alice.public_key()).unwrap()
        );
    }

    #[test]
    fn ciphertext_uses_random_iv() {
        let secret = [7u8; 32];
        let a = encrypt(&secret, "same").unwrap();
        let b = encrypt(&secret, "same").unwrap();
        assert_ne!(a, b);
        assert!(a.contains(IV_SEPARATOR));
    }

    #[test]
    fn wrong_secret_fails_to_decrypt() {
        let ct = encrypt(&[1u8; 32], "hello wallet").unwrap();
        match decrypt(&[2u8; 32], &ct) {
            Err(EnvelopeError::Decrypt) => {}
            Ok(pt) => assert_ne!(pt, "hello wallet"),
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_content_is_rejected() {
        assert!(matches!(
            decrypt(&[1u8; 32], "not-encrypted"),
            Err(EnvelopeError::MalformedCiphertext(_))
        ));
        assert!(matches!(
            decrypt(&[1u8; 32], "AAAA?iv=AAAA"),
            Err(EnvelopeError::MalformedCiphertext(_))
        ));
    }

    #[test]
    fn signed_event_verifies() {
        let keys = Keys::generate().unwrap();
        let event = keys
            .sign_event(23194, vec![tag("p", "ab")], "content".to_string())
            .unwrap();
        event.verify().unwrap();
        assert_eq!(event.pubkey, keys.public_key());
        assert_eq!(event.tag_value("p"), Some("ab"));
        assert_eq!(event.tag_value("e"), None);
    }

    #[test]
    fn tampered_event_fails_verification() {
        let keys = Keys::generate().unwrap();
        let mut event = keys.sign_event(23194, vec![], "content".to_string()).unwrap();
        event.content = "other".to_string();
        assert!(matches!(event.verify(), Err(EnvelopeError::IdMismatch)));

        let mut forged = keys.sign_event(23194, vec![], "content".to_string()).unwrap();
        let other = Keys::generate().unwrap();
        forged.sig = other
            .sign_event(23194, vec![], "content".to_string())
            .unwrap()
            .sig;
        assert!(matches!(forged.verify(), Err(EnvelopeError::InvalidSignature)));
    }

    #[test]
    fn keys_round_trip_through_hex() {
        let keys = Keys::from_hex(
            "0000000000000000000000000000000000000000000000000000000000000003",
        )
        .unwrap();
        // BIP-340 test vector 0
        assert_eq!(
            keys.public_key(),
            "f9308a019258c31049344f85f89d5229b531c845836f99b08601f113bce036f9"
        );
        assert!(Keys::from_hex("zz").is_err());
        assert!(Keys::from_hex(&"00".repeat(32)).is_err());
    }

    #[test]
    fn envelope_caches_secret_per_counterparty() {
        let service = Envelope::new(Keys::generate().unwrap(), 4);
        let client = Keys::generate().unwrap();

        let sealed = service
            .seal(23195, client.public_key(), "ok", vec![tag("e", "req")])
            .unwrap();
        sealed.verify().unwrap();
        assert_eq!(sealed.tag_value("p"), Some(client.public_key()));
        assert_eq!(sealed.tag_value("e"), Some("req"));
        assert_eq!(service.cached_secrets(), 1);

        let secret = client.shared_secret(service.public_key()).unwrap();
        assert_eq!(decrypt(&secret, &sealed.content).unwrap(), "ok");

        service.encrypt(client.public_key(), "again").unwrap();
        assert_eq!(service.cached_secrets(), 1);
    }

    #[test]
    fn invalid_counterparty_key_is_rejected() {
        let service = Envelope::new(Keys::generate().unwrap(), 4);
        assert!(matches!(
            service.encrypt("abcd", "x"),
            Err(EnvelopeError::InvalidPublicKey(_))
        ));
    }
}
