//! Crypto interface.
//!
//! This module provides the AEAD engine sitting between plaintext and the
//! frame layer: RFC 8439 ChaCha20-Poly1305 composed from the local cipher
//! cores, AES-128-GCM delegated to the host crypto library, and a `none`
//! bypass for deployments that only want the obfuscation layer.

use core::fmt::{Debug, Formatter};
use core::str::FromStr;

use aws_lc_rs::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_128_GCM};
use aws_lc_rs::digest::{digest, SHA256};
use rand::{rngs::OsRng, TryRngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::chacha20::ChaCha20;
use crate::error::CryptoFailure;
use crate::poly1305::{tags_match, Poly1305};
use crate::specification::{KEY_LEN, NONCE_LEN, TAG_LEN};

/// Authenticated Encryption with Associated Data (AEAD) cipher used to
/// protect the framed byte stream.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum CipherKind {
    /// No encryption; frames carry the plaintext verbatim and only the
    /// masking layer applies.
    None,

    /// AES-128 in GCM mode with 128-bit tags and a random 96-bit nonce
    /// carried in each frame.
    Aes128Gcm,

    /// ChaCha20-Poly1305-IETF with 128-bit tags and implicit counter-derived
    /// 96-bit nonces.
    ///
    /// This is the default cipher.
    #[default]
    ChaCha20Poly1305,
}

impl CipherKind {
    /// Fixed per-frame overhead of this cipher.
    pub(crate) fn overhead(self) -> usize {
        match self {
            CipherKind::None => 0,
            CipherKind::Aes128Gcm => NONCE_LEN + TAG_LEN,
            CipherKind::ChaCha20Poly1305 => TAG_LEN,
        }
    }
}

impl FromStr for CipherKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(CipherKind::None),
            "aes-128-gcm" => Ok(CipherKind::Aes128Gcm),
            "chacha20-poly1305" => Ok(CipherKind::ChaCha20Poly1305),
            other => Err(format!("unknown cipher: {other}")),
        }
    }
}

/// A 256-bit key shared between the two tunnel endpoints.
///
/// The `SharedKey` is typically distributed through an out-of-band mechanism.
/// Avoid populating it from low-entropy passwords; an attacker who records
/// traffic can brute-force weak keys offline.
#[derive(Clone, Eq, PartialEq, Hash, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_LEN]);

impl SharedKey {
    /// Generate a new [`SharedKey`] from system entropy.
    pub fn from_entropy() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng
            .try_fill_bytes(&mut key)
            .expect("system random source failure");
        Self(key)
    }

    /// Parse a key from its environment representation: 64 hex characters
    /// become the key bytes directly, any other string is hashed with
    /// SHA-256.
    pub fn from_env_str(s: &str) -> Self {
        if s.len() == KEY_LEN * 2 {
            if let Ok(bytes) = hex::decode(s) {
                return Self(bytes.try_into().expect("decoded length checked"));
            }
        }
        let h = digest(&SHA256, s.as_bytes());
        Self(h.as_ref().try_into().expect("SHA-256 output is 32 bytes"))
    }

    /// Extract this key's bytes for serialization.
    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.0
    }

    /// Get a reference to the key's bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl AsRef<[u8]> for SharedKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; KEY_LEN]> for SharedKey {
    fn from(value: [u8; KEY_LEN]) -> Self {
        Self(value)
    }
}

impl Debug for SharedKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedKey").field(&"*****").finish()
    }
}

/// Seals `plaintext` under ChaCha20-Poly1305 (RFC 8439), appending
/// `ciphertext || tag` to `out`.
pub(crate) fn chacha20poly1305_seal(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    plaintext: &[u8],
    out: &mut Vec<u8>,
) -> Result<(), CryptoFailure> {
    let mut cipher = ChaCha20::new(key, nonce)?;
    let poly_key = cipher.poly1305_key();

    let start = out.len();
    out.extend_from_slice(plaintext);
    cipher.xor_in_place(&mut out[start..]);

    let tag = mac_transcript(&poly_key, aad, &out[start..]);
    out.extend_from_slice(&tag);
    Ok(())
}

/// Opens a `ciphertext || tag` body, writing the plaintext into `out`
/// (which must hold exactly `body.len() - 16` bytes).
///
/// The tag is verified before any decryption; on mismatch `out` is zeroed
/// and the call fails.
pub(crate) fn chacha20poly1305_open(
    key: &[u8; KEY_LEN],
    nonce: &[u8; NONCE_LEN],
    aad: &[u8],
    body: &[u8],
    out: &mut [u8],
) -> Result<(), CryptoFailure> {
    if body.len() < TAG_LEN {
        return Err(CryptoFailure::BodyTooShort {
            received: body.len(),
        });
    }
    let (ciphertext, tag) = body.split_at(body.len() - TAG_LEN);
    debug_assert_eq!(out.len(), ciphertext.len());

    let mut cipher = ChaCha20::new(key, nonce)?;
    let poly_key = cipher.poly1305_key();

    let expected = mac_transcript(&poly_key, aad, ciphertext);
    if !tags_match(&expected, tag) {
        out.fill(0);
        return Err(CryptoFailure::TagMismatch);
    }

    out.copy_from_slice(ciphertext);
    cipher.xor_in_place(out);
    Ok(())
}

/// The RFC 8439 MAC composition:
/// `AAD || pad16(AAD) || C || pad16(C) || le64(|AAD|) || le64(|C|)`.
fn mac_transcript(poly_key: &[u8; 32], aad: &[u8], ciphertext: &[u8]) -> [u8; TAG_LEN] {
    const ZEROES: [u8; TAG_LEN] = [0u8; TAG_LEN];

    let mut mac = Poly1305::new(poly_key);
    mac.update(aad);
    if aad.len() % TAG_LEN != 0 {
        mac.update(&ZEROES[aad.len() % TAG_LEN..]);
    }
    mac.update(ciphertext);
    if ciphertext.len() % TAG_LEN != 0 {
        mac.update(&ZEROES[ciphertext.len() % TAG_LEN..]);
    }
    mac.update(&(aad.len() as u64).to_le_bytes());
    mac.update(&(ciphertext.len() as u64).to_le_bytes());
    mac.finalize()
}

/// One direction of a session's frame protection.
///
/// Owns the cipher state and the 64-bit nonce counter for that direction.
/// The counter is incremented before use, so the first frame is protected
/// with counter 1, and no `(key, counter)` pair ever repeats.
pub(crate) struct FrameCrypter {
    kind: CipherKind,
    key: SharedKey,
    gcm_key: Option<LessSafeKey>,
    counter: u64,
}

impl FrameCrypter {
    pub(crate) fn new(kind: CipherKind, key: &SharedKey) -> Self {
        let gcm_key = match kind {
            CipherKind::Aes128Gcm => Some(LessSafeKey::new(
                UnboundKey::new(&AES_128_GCM, &key.as_bytes()[..16])
                    .expect("AES-128 key length is fixed"),
            )),
            _ => None,
        };
        Self {
            kind,
            key: key.clone(),
            gcm_key,
            counter: 0,
        }
    }

    /// The counter value used by the most recent frame.
    pub(crate) fn counter(&self) -> u64 {
        self.counter
    }

    /// Advances the counter and builds the implicit nonce
    /// `key[0..4] || big_endian_u64(counter)`.
    fn next_nonce(&mut self) -> Result<[u8; NONCE_LEN], CryptoFailure> {
        if self.counter == u64::MAX {
            return Err(CryptoFailure::NonceExhausted);
        }
        self.counter += 1;
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..4].copy_from_slice(&self.key.as_bytes()[..4]);
        nonce[4..].copy_from_slice(&self.counter.to_be_bytes());
        Ok(nonce)
    }

    /// Protects one frame body.
    pub(crate) fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoFailure> {
        match self.kind {
            CipherKind::None => Ok(plaintext.to_vec()),
            CipherKind::ChaCha20Poly1305 => {
                let nonce = self.next_nonce()?;
                let mut body = Vec::with_capacity(plaintext.len() + TAG_LEN);
                chacha20poly1305_seal(self.key.as_bytes(), &nonce, &[], plaintext, &mut body)?;
                Ok(body)
            }
            CipherKind::Aes128Gcm => {
                let mut nonce = [0u8; NONCE_LEN];
                OsRng
                    .try_fill_bytes(&mut nonce)
                    .expect("system random source failure");

                let mut body = Vec::with_capacity(NONCE_LEN + plaintext.len() + TAG_LEN);
                body.extend_from_slice(&nonce);
                body.extend_from_slice(plaintext);
                let tag = self
                    .gcm_key
                    .as_ref()
                    .expect("GCM key built at construction")
                    .seal_in_place_separate_tag(
                        Nonce::assume_unique_for_key(nonce),
                        Aad::empty(),
                        &mut body[NONCE_LEN..],
                    )
                    .map_err(|_| CryptoFailure::TagMismatch)?;
                body.extend_from_slice(tag.as_ref());
                Ok(body)
            }
        }
    }

    /// Recovers one frame body's plaintext.
    pub(crate) fn open(&mut self, body: &[u8]) -> Result<Vec<u8>, CryptoFailure> {
        match self.kind {
            CipherKind::None => Ok(body.to_vec()),
            CipherKind::ChaCha20Poly1305 => {
                let nonce = self.next_nonce()?;
                if body.len() < TAG_LEN {
                    return Err(CryptoFailure::BodyTooShort {
                        received: body.len(),
                    });
                }
                let mut plaintext = vec![0u8; body.len() - TAG_LEN];
                chacha20poly1305_open(self.key.as_bytes(), &nonce, &[], body, &mut plaintext)?;
                Ok(plaintext)
            }
            CipherKind::Aes128Gcm => {
                if body.len() < self.kind.overhead() {
                    return Err(CryptoFailure::BodyTooShort {
                        received: body.len(),
                    });
                }
                let nonce: [u8; NONCE_LEN] = body[..NONCE_LEN].try_into().unwrap();
                let mut in_out = body[NONCE_LEN..].to_vec();
                let opened = self
                    .gcm_key
                    .as_ref()
                    .expect("GCM key built at construction")
                    .open_in_place(
                        Nonce::assume_unique_for_key(nonce),
                        Aad::empty(),
                        &mut in_out,
                    )
                    .map(|plaintext| plaintext.len());
                match opened {
                    Ok(plaintext_len) => {
                        in_out.truncate(plaintext_len);
                        Ok(in_out)
                    }
                    Err(_) => {
                        in_out.zeroize();
                        Err(CryptoFailure::TagMismatch)
                    }
                }
            }
        }
    }
}

impl Debug for FrameCrypter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameCrypter")
            .field("kind", &self.kind)
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}
