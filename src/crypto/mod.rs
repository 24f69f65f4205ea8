//! Encryption at rest.
//!
//! Blobs are sealed with AES-256-GCM under a single process-wide key. Each
//! sealed blob is `nonce (12 bytes) || ciphertext || tag (16 bytes)`; the
//! nonce is drawn fresh from the OS RNG for every call, so the same plaintext
//! never produces the same blob twice.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use crate::error::{GraphError, Result};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub struct CryptoManager {
    cipher: Aes256Gcm,
}

impl CryptoManager {
    /// Load the key from `key_file`, or generate and persist a new one if the
    /// file does not exist yet.
    pub fn load_or_generate<P: AsRef<Path>>(key_file: P) -> Result<Self> {
        let key_file = key_file.as_ref();
        let key = if key_file.exists() {
            let bytes = fs::read(key_file).map_err(|e| {
                GraphError::CryptoInit(format!("cannot read {:?}: {}", key_file, e))
            })?;
            if bytes.len() != KEY_LEN {
                return Err(GraphError::CryptoInit(format!(
                    "{:?} holds {} bytes, expected {}",
                    key_file,
                    bytes.len(),
                    KEY_LEN
                )));
            }
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(&bytes);
            key
        } else {
            tracing::info!("No key file at {:?}; generating a new AES-256 key", key_file);
            let key = Self::generate_key();
            write_key_file(key_file, &key).map_err(|e| {
                GraphError::CryptoInit(format!("cannot write {:?}: {}", key_file, e))
            })?;
            key
        };
        Self::from_key(&key)
    }

    /// Build from raw key bytes without touching the filesystem.
    pub fn from_key(key: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|_| GraphError::CryptoInit(format!("key must be {} bytes", KEY_LEN)))?;
        Ok(Self { cipher })
    }

    pub fn generate_key() -> [u8; KEY_LEN] {
        let mut key = [0u8; KEY_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        key
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| GraphError::Crypto("AES-GCM encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Fails on truncated input, a wrong key, or any modified byte.
    pub fn decrypt(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_LEN + TAG_LEN {
            return Err(GraphError::Crypto(format!(
                "sealed blob too short ({} bytes)",
                sealed.len()
            )));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| GraphError::Crypto("AES-GCM authentication failed".into()))
    }
}

fn write_key_file(path: &Path, key: &[u8; KEY_LEN]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(key)?;
    file.sync_all()
}
