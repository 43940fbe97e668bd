//! Provider API keys at rest.
//!
//! `keys.enc.json` maps provider env-var names to AES-256-GCM envelopes
//! encrypted under a key held by the OS credential facility. When that
//! facility is unavailable each entry degrades to `{"plaintext": ...}`
//! and a warning is logged at startup.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use keyring::Error as KeyringError;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use overtype_foundation::ConfigError;

const KEY_BYTES: usize = 32;
const NONCE_BYTES: usize = 12;
const KEYRING_SERVICE: &str = "overtype.keystore";
const KEYRING_ACCOUNT: &str = "keystore-encryption-key";

pub const KEYSTORE_FILE_NAME: &str = "keys.enc.json";

/// One stored secret: encrypted envelope or plaintext fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoredKey {
    Encrypted { ciphertext: String, nonce: String },
    Plaintext { plaintext: String },
}

/// Abstraction over the OS credential facility so tests can run without one.
pub trait MasterKeySource: Send + Sync {
    /// Load the master key, creating it on first use. `Ok(None)` means the
    /// facility is genuinely unavailable and plaintext fallback applies.
    fn load_or_create(&self) -> Result<Option<[u8; KEY_BYTES]>, ConfigError>;
}

/// Keyring-backed master key.
pub struct KeyringSource;

impl MasterKeySource for KeyringSource {
    fn load_or_create(&self) -> Result<Option<[u8; KEY_BYTES]>, ConfigError> {
        let entry = match keyring::Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("OS credential facility unavailable: {err}");
                return Ok(None);
            }
        };

        match entry.get_password() {
            Ok(encoded) => {
                let raw = BASE64_STANDARD.decode(encoded).map_err(|err| {
                    ConfigError::KeyStore(format!("master key is not valid base64: {err}"))
                })?;
                let mut key = [0u8; KEY_BYTES];
                if raw.len() != KEY_BYTES {
                    return Err(ConfigError::KeyStore(format!(
                        "master key has invalid length: expected {KEY_BYTES}, got {}",
                        raw.len()
                    )));
                }
                key.copy_from_slice(&raw);
                Ok(Some(key))
            }
            Err(KeyringError::NoEntry) => {
                let mut key = [0u8; KEY_BYTES];
                rand::rngs::OsRng.fill_bytes(&mut key);
                entry
                    .set_password(&BASE64_STANDARD.encode(key))
                    .map_err(|err| {
                        ConfigError::KeyStore(format!("failed to store master key: {err}"))
                    })?;
                Ok(Some(key))
            }
            Err(err) => {
                tracing::warn!("Failed to read master key from credential facility: {err}");
                Ok(None)
            }
        }
    }
}

pub struct KeyStore {
    path: PathBuf,
    master_key: Option<[u8; KEY_BYTES]>,
    entries: BTreeMap<String, StoredKey>,
}

impl KeyStore {
    /// Open (or initialize) the store at `path` with the given key source.
    pub fn open(path: PathBuf, source: &dyn MasterKeySource) -> Result<Self, ConfigError> {
        let master_key = source.load_or_create()?;
        if master_key.is_none() {
            tracing::warn!(
                path = %path.display(),
                "Credential facility unavailable; API keys will be stored in plaintext"
            );
        }

        let entries = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|err| ConfigError::Parse {
                path: path.display().to_string(),
                reason: err.to_string(),
            })?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source: err,
                })
            }
        };

        Ok(Self {
            path,
            master_key,
            entries,
        })
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("overtype")
            .join(KEYSTORE_FILE_NAME)
    }

    pub fn is_encrypted(&self) -> bool {
        self.master_key.is_some()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn set(&mut self, name: &str, secret: &str) -> Result<(), ConfigError> {
        let stored = match &self.master_key {
            Some(key) => encrypt_entry(key, secret)?,
            None => StoredKey::Plaintext {
                plaintext: secret.to_string(),
            },
        };
        self.entries.insert(name.to_string(), stored);
        self.persist()
    }

    pub fn get(&self, name: &str) -> Result<Option<String>, ConfigError> {
        let Some(stored) = self.entries.get(name) else {
            return Ok(None);
        };
        match stored {
            StoredKey::Plaintext { plaintext } => Ok(Some(plaintext.clone())),
            StoredKey::Encrypted { ciphertext, nonce } => {
                let Some(key) = &self.master_key else {
                    return Err(ConfigError::KeyStore(format!(
                        "{name} is encrypted but the credential facility is unavailable"
                    )));
                };
                decrypt_entry(key, ciphertext, nonce).map(Some)
            }
        }
    }

    pub fn remove(&mut self, name: &str) -> Result<bool, ConfigError> {
        let existed = self.entries.remove(name).is_some();
        if existed {
            self.persist()?;
        }
        Ok(existed)
    }

    fn persist(&self) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|err| ConfigError::Read {
                path: parent.display().to_string(),
                source: err,
            })?;
        }
        let raw = serde_json::to_string_pretty(&self.entries).map_err(|err| {
            ConfigError::KeyStore(format!("failed to serialize key store: {err}"))
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, raw).map_err(|err| ConfigError::Read {
            path: tmp.display().to_string(),
            source: err,
        })?;
        fs::rename(&tmp, &self.path).map_err(|err| ConfigError::Read {
            path: self.path.display().to_string(),
            source: err,
        })?;
        Ok(())
    }
}

fn cipher(key: &[u8; KEY_BYTES]) -> Result<Aes256Gcm, ConfigError> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|err| ConfigError::KeyStore(format!("failed to initialize cipher: {err}")))
}

fn encrypt_entry(key: &[u8; KEY_BYTES], secret: &str) -> Result<StoredKey, ConfigError> {
    let mut nonce_bytes = [0u8; NONCE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = cipher(key)?
        .encrypt(Nonce::from_slice(&nonce_bytes), secret.as_bytes())
        .map_err(|_| ConfigError::KeyStore("failed to encrypt key entry".to_string()))?;

    Ok(StoredKey::Encrypted {
        ciphertext: BASE64_STANDARD.encode(ciphertext),
        nonce: BASE64_STANDARD.encode(nonce_bytes),
    })
}

fn decrypt_entry(
    key: &[u8; KEY_BYTES],
    ciphertext: &str,
    nonce: &str,
) -> Result<String, ConfigError> {
    let ciphertext = BASE64_STANDARD
        .decode(ciphertext)
        .map_err(|err| ConfigError::KeyStore(format!("ciphertext is not valid base64: {err}")))?;
    let nonce = BASE64_STANDARD
        .decode(nonce)
        .map_err(|err| ConfigError::KeyStore(format!("nonce is not valid base64: {err}")))?;
    if nonce.len() != NONCE_BYTES {
        return Err(ConfigError::KeyStore(format!(
            "nonce has invalid length: expected {NONCE_BYTES}, got {}",
            nonce.len()
        )));
    }

    let plaintext = cipher(key)?
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
        .map_err(|_| {
            ConfigError::KeyStore(
                "failed to decrypt key entry; master key rotated or payload corrupted".to_string(),
            )
        })?;
    String::from_utf8(plaintext)
        .map_err(|_| ConfigError::KeyStore("decrypted key entry is not valid UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct FixedKey;

    impl MasterKeySource for FixedKey {
        fn load_or_create(&self) -> Result<Option<[u8; KEY_BYTES]>, ConfigError> {
            Ok(Some([7u8; KEY_BYTES]))
        }
    }

    struct NoFacility;

    impl MasterKeySource for NoFacility {
        fn load_or_create(&self) -> Result<Option<[u8; KEY_BYTES]>, ConfigError> {
            Ok(None)
        }
    }

    #[test]
    fn encrypted_set_get_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(KEYSTORE_FILE_NAME);

        let mut store = KeyStore::open(path.clone(), &FixedKey).unwrap();
        assert!(store.is_encrypted());
        store.set("OPENAI_API_KEY", "sk-secret").unwrap();

        // Reopen from disk with the same master key.
        let store = KeyStore::open(path.clone(), &FixedKey).unwrap();
        assert_eq!(
            store.get("OPENAI_API_KEY").unwrap().as_deref(),
            Some("sk-secret")
        );

        // The secret never appears in the file.
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("sk-secret"));
        assert!(raw.contains("ciphertext"));
    }

    #[test]
    fn plaintext_fallback_without_facility() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(KEYSTORE_FILE_NAME);

        let mut store = KeyStore::open(path.clone(), &NoFacility).unwrap();
        assert!(!store.is_encrypted());
        store.set("GROQ_API_KEY", "gsk-123").unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("plaintext"));
        assert!(raw.contains("gsk-123"));

        let store = KeyStore::open(path, &NoFacility).unwrap();
        assert_eq!(store.get("GROQ_API_KEY").unwrap().as_deref(), Some("gsk-123"));
    }

    #[test]
    fn encrypted_entry_without_facility_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(KEYSTORE_FILE_NAME);

        let mut store = KeyStore::open(path.clone(), &FixedKey).unwrap();
        store.set("OPENAI_API_KEY", "sk-secret").unwrap();

        let store = KeyStore::open(path, &NoFacility).unwrap();
        assert!(store.get("OPENAI_API_KEY").is_err());
    }

    #[test]
    fn missing_entry_is_none() {
        let dir = tempdir().unwrap();
        let store = KeyStore::open(dir.path().join(KEYSTORE_FILE_NAME), &FixedKey).unwrap();
        assert!(store.get("NOT_THERE").unwrap().is_none());
    }

    #[test]
    fn remove_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(KEYSTORE_FILE_NAME);

        let mut store = KeyStore::open(path.clone(), &FixedKey).unwrap();
        store.set("OPENAI_API_KEY", "sk-secret").unwrap();
        assert!(store.remove("OPENAI_API_KEY").unwrap());
        assert!(!store.remove("OPENAI_API_KEY").unwrap());

        let store = KeyStore::open(path, &FixedKey).unwrap();
        assert!(store.get("OPENAI_API_KEY").unwrap().is_none());
    }
}
