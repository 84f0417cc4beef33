//! Frame sealing and opening — the channel's cryptographic transform.
//!
//! Encrypt-then-MAC with verify-before-decrypt:
//!   1. AES-256-CBC with PKCS#7 padding under a fresh per-frame IV
//!   2. HMAC-SHA-256 over everything that precedes the tag
//!
//! Wire layout per frame:
//!   [iv (16 bytes)] [ciphertext (non-zero multiple of 16)] [tag (32 bytes)]
//!
//! The tag is verified in constant time before any decryption is
//! attempted, so a forged frame never reaches the padding check and
//! cannot be used as a padding oracle.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::keys::KeyMaterial;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Per-frame IV, prepended to the ciphertext and covered by the tag.
pub const IV_LEN: usize = 16;

/// HMAC-SHA-256 tag, the fixed-size suffix of every frame.
pub const TAG_LEN: usize = 32;

/// AES block size. Ciphertext length is always a non-zero multiple.
pub const BLOCK_LEN: usize = 16;

// ── WireFrame ─────────────────────────────────────────────────────────────────

/// One authenticated-ciphertext unit, ready for the wire.
///
/// Ephemeral: built per message by [`seal`], encoded, sent, and dropped.
/// `encoded_len` is `IV_LEN + ciphertext.len() + TAG_LEN`.
pub struct WireFrame {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
    pub mac_tag: [u8; TAG_LEN],
}

impl WireFrame {
    /// Serialize as `iv || ciphertext || mac_tag`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.mac_tag);
        out
    }

    pub fn encoded_len(&self) -> usize {
        IV_LEN + self.ciphertext.len() + TAG_LEN
    }
}

// ── Seal / Open ───────────────────────────────────────────────────────────────

/// Encrypt and authenticate one plaintext message.
///
/// A fresh random IV is drawn per frame, so sealing the same plaintext
/// twice under the same keys yields different wire bytes.
pub fn seal(plaintext: &[u8], keys: &KeyMaterial) -> WireFrame {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes256CbcEnc::new(keys.cipher_key().into(), (&iv).into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut mac = mac_begin(keys.mac_key());
    mac.update(&iv);
    mac.update(&ciphertext);
    let mac_tag: [u8; TAG_LEN] = mac.finalize().into_bytes().into();

    WireFrame {
        iv,
        ciphertext,
        mac_tag,
    }
}

/// Verify and decrypt one received frame.
///
/// The tag is recomputed over the frame body and compared in constant
/// time; on mismatch the ciphertext is never touched.
pub fn open(frame_bytes: &[u8], keys: &KeyMaterial) -> Result<Vec<u8>, FrameError> {
    if frame_bytes.len() < TAG_LEN {
        return Err(FrameError::TooShort);
    }
    let (body, received_tag) = frame_bytes.split_at(frame_bytes.len() - TAG_LEN);

    let mut mac = mac_begin(keys.mac_key());
    mac.update(body);
    let expected = mac.finalize().into_bytes();
    if expected.as_slice().ct_eq(received_tag).unwrap_u8() != 1 {
        return Err(FrameError::AuthenticationFailed);
    }

    // Authenticated, so a bad shape here means the sender sealed garbage
    // under our own keys. Still refuse to decrypt it.
    if body.len() < IV_LEN + BLOCK_LEN || (body.len() - IV_LEN) % BLOCK_LEN != 0 {
        return Err(FrameError::DecryptionFailed);
    }
    let (iv, ciphertext) = body.split_at(IV_LEN);

    Aes256CbcDec::new_from_slices(keys.cipher_key(), iv)
        .map_err(|_| FrameError::DecryptionFailed)?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| FrameError::DecryptionFailed)
}

fn mac_begin(mac_key: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length; with a fixed 32-byte key this
    // cannot fail.
    <HmacSha256 as Mac>::new_from_slice(mac_key).expect("HMAC key of any length is valid")
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame is shorter than the {TAG_LEN}-byte authentication tag")]
    TooShort,

    #[error("frame authentication failed")]
    AuthenticationFailed,

    #[error("frame decryption failed")]
    DecryptionFailed,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
