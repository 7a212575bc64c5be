//! Wallet file storage.
//!
//! The state is serialized to JSON and sealed with AES-256-GCM under an
//! Argon2id-derived key. File layout: magic, version, 32-byte salt, 12-byte
//! nonce, ciphertext. Writes go to a temp file beside the target and are
//! renamed over it, so a crash never leaves a half-written wallet.

use crate::error::WalletError;
use crate::state::WalletState;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const MAGIC: &[u8; 4] = b"BDXW";
const VERSION: u8 = 1;
/// magic + version + salt + nonce
const HEADER_SIZE: usize = 49;

const ARGON2_T_COST: u32 = 2;
const ARGON2_M_COST: u32 = 19 * 1024;
const ARGON2_PARALLELISM: u32 = 1;

/// Atomic load/save of a wallet state.
pub trait Keystore: Send + Sync {
    fn load(&self, path: &Path, password: &str) -> Result<WalletState, WalletError>;
    fn save(&self, path: &Path, password: &str, state: &WalletState) -> Result<(), WalletError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FileKeystore;

fn derive_key(password: &[u8], salt: &[u8]) -> Result<[u8; 32], WalletError> {
    let params = Params::new(ARGON2_M_COST, ARGON2_T_COST, ARGON2_PARALLELISM, Some(32))
        .map_err(|e| WalletError::Keystore(e.to_string()))?;
    let mut key = [0u8; 32];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| WalletError::Keystore(e.to_string()))?;
    Ok(key)
}

#[allow(deprecated)] // aes-gcm 0.10 uses generic-array 0.x
pub(crate) fn seal(plaintext: &[u8], password: &str) -> Result<Vec<u8>, WalletError> {
    let mut rng = rand::thread_rng();
    let mut salt = [0u8; 32];
    let mut nonce = [0u8; 12];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut nonce);

    let key = derive_key(password.as_bytes(), &salt)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| WalletError::Keystore(e.to_string()))?;

    let mut out = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

#[allow(deprecated)]
pub(crate) fn open(data: &[u8], password: &str) -> Result<Vec<u8>, WalletError> {
    if data.len() <= HEADER_SIZE || &data[..4] != MAGIC {
        return Err(WalletError::Keystore("not a wallet file".into()));
    }
    if data[4] != VERSION {
        return Err(WalletError::Keystore(format!("unsupported wallet file version {}", data[4])));
    }
    let key = derive_key(password.as_bytes(), &data[5..37])?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(&data[37..49]), &data[HEADER_SIZE..])
        .map_err(|_| WalletError::Keystore("wrong password or corrupted wallet file".into()))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

impl Keystore for FileKeystore {
    fn load(&self, path: &Path, password: &str) -> Result<WalletState, WalletError> {
        let data = fs::read(path).map_err(|e| WalletError::Keystore(format!("{}: {e}", path.display())))?;
        let json = open(&data, password)?;
        let mut state: WalletState =
            serde_json::from_slice(&json).map_err(|e| WalletError::Keystore(e.to_string()))?;
        state.rebuild_indices()?;
        log::info!("loaded wallet {} at height {}", path.display(), state.cursor);
        Ok(state)
    }

    fn save(&self, path: &Path, password: &str, state: &WalletState) -> Result<(), WalletError> {
        let json = serde_json::to_vec(state).map_err(|e| WalletError::Keystore(e.to_string()))?;
        let sealed = seal(&json, password)?;
        let tmp = temp_path(path);
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(&sealed)?;
            file.sync_all()?;
            fs::rename(&tmp, path)
        };
        write().map_err(|e| {
            let _ = fs::remove_file(&tmp);
            WalletError::Keystore(format!("{}: {e}", path.display()))
        })?;
        log::debug!("stored wallet {}", path.display());
        Ok(())
    }
}
