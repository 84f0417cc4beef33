//! Session key material.
//!
//! Two peers share three symmetric secrets out-of-band via a key file:
//! an AES-256 cipher key, a 16-byte IV slot, and an HMAC-SHA-256 key.
//! The channel never negotiates keys on the wire: one side generates
//! and persists, the other loads the same file.
//!
//! All secrets derive ZeroizeOnDrop — wiped from memory when dropped.
//! There is no unsafe code in this module.

use std::io::{BufRead, Write};
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

// ── Sizes and labels ──────────────────────────────────────────────────────────

pub const CIPHER_KEY_LEN: usize = 32;
pub const CIPHER_IV_LEN: usize = 16;
pub const MAC_KEY_LEN: usize = 32;

/// Key file section labels. Each appears as `[label]` on its own line,
/// immediately followed by one line of base64. Order in the file is
/// cipher key, IV, MAC key; unknown sections are skipped on load.
const SECTION_CIPHER_KEY: &str = "AES Key";
const SECTION_CIPHER_IV: &str = "AES IV";
const SECTION_MAC_KEY: &str = "HMAC Key";

// ── KeyMaterial ───────────────────────────────────────────────────────────────

/// The symmetric secrets for one session.
///
/// Fixed-length for the lifetime of the session; never rotated after
/// establishment. Constructed by [`KeyMaterial::generate`], by loading a
/// persisted key file, or by [`KeyMaterial::from_parts`] (the seam a key
/// exchange protocol would feed, should one ever exist).
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    cipher_key: Zeroizing<[u8; CIPHER_KEY_LEN]>,
    cipher_iv: Zeroizing<[u8; CIPHER_IV_LEN]>,
    mac_key: Zeroizing<[u8; MAC_KEY_LEN]>,
}

impl KeyMaterial {
    /// Generate fresh random key material from the OS CSPRNG.
    ///
    /// There is no error path: a failing OS random source aborts the
    /// process inside the RNG rather than handing out weak keys.
    pub fn generate() -> Self {
        let mut cipher_key = Zeroizing::new([0u8; CIPHER_KEY_LEN]);
        let mut cipher_iv = Zeroizing::new([0u8; CIPHER_IV_LEN]);
        let mut mac_key = Zeroizing::new([0u8; MAC_KEY_LEN]);
        OsRng.fill_bytes(&mut cipher_key[..]);
        OsRng.fill_bytes(&mut cipher_iv[..]);
        OsRng.fill_bytes(&mut mac_key[..]);
        Self {
            cipher_key,
            cipher_iv,
            mac_key,
        }
    }

    /// Assemble key material from raw parts.
    pub fn from_parts(
        cipher_key: [u8; CIPHER_KEY_LEN],
        cipher_iv: [u8; CIPHER_IV_LEN],
        mac_key: [u8; MAC_KEY_LEN],
    ) -> Self {
        Self {
            cipher_key: Zeroizing::new(cipher_key),
            cipher_iv: Zeroizing::new(cipher_iv),
            mac_key: Zeroizing::new(mac_key),
        }
    }

    pub fn cipher_key(&self) -> &[u8; CIPHER_KEY_LEN] {
        &self.cipher_key
    }

    /// The static IV slot from the key file. Kept for file-format
    /// compatibility; frames carry their own per-message IV.
    pub fn cipher_iv(&self) -> &[u8; CIPHER_IV_LEN] {
        &self.cipher_iv
    }

    pub fn mac_key(&self) -> &[u8; MAC_KEY_LEN] {
        &self.mac_key
    }

    /// Short hex fingerprint for status lines and logs.
    ///
    /// One-way: SHA-256 over the three secrets, first four bytes. Lets
    /// both peers eyeball that they loaded the same file without ever
    /// printing key bytes.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.cipher_key[..]);
        hasher.update(&self.cipher_iv[..]);
        hasher.update(&self.mac_key[..]);
        hex::encode(&hasher.finalize()[..4])
    }

    // ── Persistence ───────────────────────────────────────────────────────────

    /// Serialize the secrets as labeled base64 sections, in the fixed
    /// order cipher key, IV, MAC key. Overwrites existing content.
    ///
    /// The file holds secrets in plaintext at rest. Store it like a
    /// private key (mode 0600), and move it between peers out-of-band.
    pub fn save(&self, mut sink: impl Write) -> Result<(), KeyError> {
        writeln!(sink, "[{SECTION_CIPHER_KEY}]")?;
        writeln!(sink, "{}", BASE64.encode(&self.cipher_key[..]))?;
        writeln!(sink, "[{SECTION_CIPHER_IV}]")?;
        writeln!(sink, "{}", BASE64.encode(&self.cipher_iv[..]))?;
        writeln!(sink, "[{SECTION_MAC_KEY}]")?;
        writeln!(sink, "{}", BASE64.encode(&self.mac_key[..]))?;
        sink.flush()?;
        Ok(())
    }

    /// Save to a file path, creating parent directories as needed.
    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<(), KeyError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)?;
        self.save(std::io::BufWriter::new(file))
    }

    /// Parse the labeled-section key file format.
    ///
    /// Sections may appear in any order; unknown labels (for instance the
    /// `[RSA Public Key]` block some files carry) are skipped. All three
    /// required sections must be present.
    pub fn load(source: impl BufRead) -> Result<Self, KeyError> {
        let mut cipher_key: Option<Zeroizing<[u8; CIPHER_KEY_LEN]>> = None;
        let mut cipher_iv: Option<Zeroizing<[u8; CIPHER_IV_LEN]>> = None;
        let mut mac_key: Option<Zeroizing<[u8; MAC_KEY_LEN]>> = None;

        let mut lines = source.lines();
        while let Some(line) = lines.next() {
            let line = line?;
            let label = match parse_label(&line) {
                Some(l) => l,
                None => continue,
            };
            match label {
                SECTION_CIPHER_KEY => {
                    cipher_key = Some(decode_section(&mut lines, SECTION_CIPHER_KEY)?);
                }
                SECTION_CIPHER_IV => {
                    cipher_iv = Some(decode_section(&mut lines, SECTION_CIPHER_IV)?);
                }
                SECTION_MAC_KEY => {
                    mac_key = Some(decode_section(&mut lines, SECTION_MAC_KEY)?);
                }
                _ => {} // unknown section, skipped
            }
        }

        Ok(Self {
            cipher_key: cipher_key.ok_or(KeyError::MissingSection(SECTION_CIPHER_KEY))?,
            cipher_iv: cipher_iv.ok_or(KeyError::MissingSection(SECTION_CIPHER_IV))?,
            mac_key: mac_key.ok_or(KeyError::MissingSection(SECTION_MAC_KEY))?,
        })
    }

    /// Load from a file path.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, KeyError> {
        let file = std::fs::File::open(path)?;
        Self::load(std::io::BufReader::new(file))
    }
}

/// Redacted: never prints key bytes, only the fingerprint.
impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

/// Constant-time equality across all three secrets.
impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        let key_eq = self.cipher_key[..].ct_eq(&other.cipher_key[..]);
        let iv_eq = self.cipher_iv[..].ct_eq(&other.cipher_iv[..]);
        let mac_eq = self.mac_key[..].ct_eq(&other.mac_key[..]);
        (key_eq & iv_eq & mac_eq).into()
    }
}

impl Eq for KeyMaterial {}

// ── Parsing helpers ───────────────────────────────────────────────────────────

/// `"[AES Key]"` → `Some("AES Key")`, anything else → `None`.
fn parse_label(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed.strip_prefix('[')?.strip_suffix(']')
}

/// Read the base64 value line that follows a section label and decode it
/// into a fixed-size secret.
fn decode_section<const N: usize>(
    lines: &mut impl Iterator<Item = std::io::Result<String>>,
    section: &'static str,
) -> Result<Zeroizing<[u8; N]>, KeyError> {
    let line = match lines.next() {
        Some(l) => l?,
        None => return Err(KeyError::Malformed { section }),
    };
    let decoded = Zeroizing::new(
        BASE64
            .decode(line.trim())
            .map_err(|_| KeyError::Malformed { section })?,
    );
    if decoded.len() != N {
        return Err(KeyError::WrongLength {
            section,
            expected: N,
            got: decoded.len(),
        });
    }
    let mut out = Zeroizing::new([0u8; N]);
    out.copy_from_slice(&decoded);
    Ok(out)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("key file is missing the [{0}] section")]
    MissingSection(&'static str),

    #[error("value in the [{section}] section is not valid base64")]
    Malformed { section: &'static str },

    #[error("[{section}] decoded to {got} bytes, expected {expected}")]
    WrongLength {
        section: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("key file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
