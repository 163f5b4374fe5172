use std::path::Path;

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use tc_core::{CacheError, Result};

use crate::config::StoreConfig;
use crate::crypto::{self, EncryptedBlob, EncryptionKey};
use crate::secret::SecretProvider;

const SALT_LEN: usize = 32;
const META_FILE: &str = "meta.json";
const KEY_CHECK_PLAINTEXT: &[u8] = b"tc-store key check";
const KEY_CHECK_BINDING: &str = "meta|key_check";

/// Where the current key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySource {
    Keyring,
    Passphrase,
    Provided,
}

/// Metadata for key derivation and storage format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyMeta {
    pub version: u32,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub source: KeySource,
    /// Base64-encoded salt for Argon2id (if using passphrase)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub passphrase_salt: Option<String>,
    /// Known plaintext encrypted under the current key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_check: Option<EncryptedBlob>,
}

impl KeyMeta {
    fn new(source: KeySource) -> Self {
        Self {
            version: 1,
            created_at: chrono::Utc::now(),
            source,
            passphrase_salt: None,
            key_check: None,
        }
    }

    fn seal(&mut self, key: &EncryptionKey) -> Result<()> {
        self.key_check = Some(crypto::encrypt(key, KEY_CHECK_PLAINTEXT, KEY_CHECK_BINDING)?);
        Ok(())
    }

    /// Whether `key` is the one this directory was sealed with; `None` when
    /// the metadata carries no key check
    fn accepts(&self, key: &EncryptionKey) -> Option<bool> {
        self.key_check.as_ref().map(|blob| {
            crypto::decrypt(key, blob, KEY_CHECK_BINDING)
                .is_ok_and(|plaintext| plaintext.as_slice() == KEY_CHECK_PLAINTEXT)
        })
    }
}

/// A replacement key that has not been persisted yet
pub struct PendingRotation {
    key: EncryptionKey,
    meta: KeyMeta,
}

impl PendingRotation {
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }
}

/// Keyring coordinates for the store key
#[derive(Debug, Clone)]
struct KeyringSlot {
    service: String,
    user: String,
}

impl KeyringSlot {
    fn from_config(config: &StoreConfig) -> Self {
        Self {
            service: config.keyring_service.clone(),
            user: config.keyring_user.clone(),
        }
    }

    #[cfg(feature = "keyring-support")]
    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.user)
            .map_err(|e| CacheError::Keyring(format!("Failed to access keyring: {}", e)))
    }

    /// Load key from OS keyring
    #[cfg(feature = "keyring-support")]
    fn load(&self) -> Result<EncryptionKey> {
        let key_b64 = self
            .entry()?
            .get_password()
            .map_err(|e| CacheError::Keyring(format!("Failed to read from keyring: {}", e)))?;

        let key_bytes = STANDARD
            .decode(key_b64)
            .map_err(|e| CacheError::Crypto(format!("Keyring entry is not base64: {}", e)))?;

        let key: [u8; 32] = key_bytes.try_into().map_err(|bytes: Vec<u8>| {
            CacheError::Crypto(format!("Expected 32 byte key, got {}", bytes.len()))
        })?;

        Ok(EncryptionKey::from_bytes(key))
    }

    /// Save key to OS keyring
    #[cfg(feature = "keyring-support")]
    fn save(&self, key: &EncryptionKey) -> Result<()> {
        let key_b64 = STANDARD.encode(key.as_bytes());

        self.entry()?
            .set_password(&key_b64)
            .map_err(|e| CacheError::Keyring(format!("Failed to write to keyring: {}", e)))
    }

    /// Save a key that exists nowhere else and make sure it can be read back.
    ///
    /// Without a platform backend the keyring crate falls back to an
    /// in-process mock that accepts writes and forgets them.
    fn save_verified(&self, key: &EncryptionKey) -> Result<()> {
        self.save(key)?;
        match self.load() {
            Ok(stored) if stored.as_bytes() == key.as_bytes() => Ok(()),
            _ => Err(CacheError::Keyring(
                "keyring did not keep the store key; supply a passphrase instead".to_string(),
            )),
        }
    }

    #[cfg(not(feature = "keyring-support"))]
    fn load(&self) -> Result<EncryptionKey> {
        Err(CacheError::Keyring(
            "built without keyring support".to_string(),
        ))
    }

    #[cfg(not(feature = "keyring-support"))]
    fn save(&self, _key: &EncryptionKey) -> Result<()> {
        Err(CacheError::Keyring(
            "built without keyring support".to_string(),
        ))
    }
}

/// Manages the file store encryption key with OS keyring and passphrase fallback
pub struct KeyManager {
    meta: KeyMeta,
    key: EncryptionKey,
    slot: KeyringSlot,
}

impl KeyManager {
    /// Load or create the store key.
    ///
    /// Tries the OS keyring first. If no usable key is there, a key is derived
    /// from the secret provider's passphrase (reusing the salt recorded in
    /// `meta.json`) or, for a brand-new directory without a passphrase,
    /// generated at random. Either way the key is offered back to the keyring
    /// for next time.
    ///
    /// A key that fails the directory's key check is rejected with
    /// [`CacheError::KeyMismatch`].
    pub fn open(
        storage_dir: &Path,
        secret_provider: &dyn SecretProvider,
        config: &StoreConfig,
    ) -> Result<Self> {
        let slot = KeyringSlot::from_config(config);
        let existing = read_meta(storage_dir)?;

        let from_keyring = match slot.load() {
            Ok(key) if existing.as_ref().and_then(|meta| meta.accepts(&key)) != Some(false) => {
                tracing::debug!("Loaded encryption key from OS keyring");
                Some(key)
            }
            Ok(_) => {
                tracing::warn!(
                    "Keyring key does not unlock {}, using passphrase fallback",
                    storage_dir.display()
                );
                None
            }
            Err(e) => {
                tracing::debug!("Keyring unavailable ({}), using passphrase fallback", e);
                None
            }
        };

        let (key, mut meta) = match from_keyring {
            Some(key) => {
                let meta = existing.unwrap_or_else(|| KeyMeta::new(KeySource::Keyring));
                (key, meta)
            }
            None => {
                let mut meta = existing.unwrap_or_else(|| KeyMeta::new(KeySource::Passphrase));
                match derive_from_passphrase(&mut meta, secret_provider) {
                    Ok(key) => {
                        if meta.accepts(&key) == Some(false) {
                            return Err(CacheError::KeyMismatch);
                        }
                        meta.source = KeySource::Passphrase;
                        if let Err(e) = slot.save(&key) {
                            tracing::warn!("Failed to save key to keyring: {}", e);
                        }
                        (key, meta)
                    }
                    Err(CacheError::Cancelled)
                        if meta.passphrase_salt.is_none() && meta.key_check.is_none() =>
                    {
                        // Nothing was ever sealed here, so a random key is safe
                        // as long as the keyring can hold it
                        let key = EncryptionKey::generate()?;
                        slot.save_verified(&key)?;
                        (key, KeyMeta::new(KeySource::Keyring))
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        if meta.key_check.is_none() {
            meta.seal(&key)?;
        }
        write_meta(storage_dir, &meta)?;

        Ok(Self { meta, key, slot })
    }

    /// Use a caller-supplied key; the keyring and passphrase are never consulted.
    ///
    /// Existing metadata is kept as is, so a passphrase directory stays
    /// recoverable with its passphrase. The key must pass the directory's key
    /// check.
    pub fn with_key(storage_dir: &Path, key: EncryptionKey, config: &StoreConfig) -> Result<Self> {
        let meta = match read_meta(storage_dir)? {
            Some(meta) if meta.accepts(&key) == Some(false) => {
                return Err(CacheError::KeyMismatch);
            }
            Some(mut meta) => {
                if meta.key_check.is_none() {
                    meta.seal(&key)?;
                    write_meta(storage_dir, &meta)?;
                }
                meta
            }
            None => {
                let mut meta = KeyMeta::new(KeySource::Provided);
                meta.seal(&key)?;
                write_meta(storage_dir, &meta)?;
                meta
            }
        };

        Ok(Self {
            meta,
            key,
            slot: KeyringSlot::from_config(config),
        })
    }

    /// Get the encryption key
    pub fn key(&self) -> &EncryptionKey {
        &self.key
    }

    pub fn meta(&self) -> &KeyMeta {
        &self.meta
    }

    /// Pick the next key without persisting anything.
    ///
    /// Passphrase-backed keys are re-derived under a fresh salt so they stay
    /// recoverable without the keyring.
    pub fn prepare_rotation(&self, secret_provider: &dyn SecretProvider) -> Result<PendingRotation> {
        let mut meta = self.meta.clone();
        meta.version += 1;
        meta.created_at = chrono::Utc::now();

        let key = match meta.source {
            KeySource::Passphrase => {
                meta.passphrase_salt = None;
                derive_from_passphrase(&mut meta, secret_provider)?
            }
            KeySource::Keyring | KeySource::Provided => EncryptionKey::generate()?,
        };
        meta.seal(&key)?;

        Ok(PendingRotation { key, meta })
    }

    /// Persist a prepared key and make it current.
    ///
    /// On failure the previous metadata is restored and the current key
    /// stays in use.
    pub fn commit_rotation(&mut self, storage_dir: &Path, pending: PendingRotation) -> Result<()> {
        let PendingRotation { key, meta } = pending;
        write_meta(storage_dir, &meta)?;

        let saved = match meta.source {
            KeySource::Passphrase => {
                if let Err(e) = self.slot.save(&key) {
                    tracing::warn!("Failed to save new key to keyring: {}", e);
                }
                Ok(())
            }
            KeySource::Keyring => self.slot.save_verified(&key),
            KeySource::Provided => Ok(()),
        };

        if let Err(e) = saved {
            if let Err(restore) = write_meta(storage_dir, &self.meta) {
                tracing::error!("Failed to restore key metadata: {}", restore);
            }
            return Err(e);
        }

        self.meta = meta;
        self.key = key;

        Ok(())
    }

    /// Replace the key. The caller re-encrypts existing data with [`Self::key`].
    pub fn rotate(&mut self, storage_dir: &Path, secret_provider: &dyn SecretProvider) -> Result<()> {
        let pending = self.prepare_rotation(secret_provider)?;
        self.commit_rotation(storage_dir, pending)
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("meta", &self.meta)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn read_meta(storage_dir: &Path) -> Result<Option<KeyMeta>> {
    let meta_path = storage_dir.join(META_FILE);
    let content = match std::fs::read_to_string(&meta_path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::storage("read key metadata", e)),
    };
    let meta = serde_json::from_str(&content).map_err(|e| CacheError::Config {
        path: meta_path,
        reason: e.to_string(),
    })?;

    Ok(Some(meta))
}

fn write_meta(storage_dir: &Path, meta: &KeyMeta) -> Result<()> {
    let meta_json = serde_json::to_string_pretty(meta)
        .map_err(|e| CacheError::Crypto(format!("Failed to serialize key metadata: {}", e)))?;
    std::fs::write(storage_dir.join(META_FILE), meta_json)
        .map_err(|e| CacheError::storage("write key metadata", e))
}

/// Derive key from passphrase using Argon2id
fn derive_from_passphrase(
    meta: &mut KeyMeta,
    secret_provider: &dyn SecretProvider,
) -> Result<EncryptionKey> {
    let passphrase = secret_provider
        .get_passphrase("Enter passphrase for token cache storage")
        .ok_or(CacheError::Cancelled)?;

    // Get or generate salt
    let salt = match &meta.passphrase_salt {
        Some(salt_b64) => STANDARD
            .decode(salt_b64)
            .map_err(|e| CacheError::Crypto(format!("Invalid passphrase salt: {}", e)))?,
        None => {
            let mut salt = vec![0u8; SALT_LEN];
            getrandom::fill(&mut salt)
                .map_err(|e| CacheError::Crypto(format!("Random source unavailable: {}", e)))?;
            meta.passphrase_salt = Some(STANDARD.encode(&salt));
            salt
        }
    };

    // Parameters: m=64MB, t=3, p=1
    let params = Params::new(65536, 3, 1, Some(32))
        .map_err(|e| CacheError::Crypto(format!("Invalid Argon2 params: {}", e)))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(passphrase.as_bytes(), &salt, &mut key)
        .map_err(|e| CacheError::Crypto(format!("Key derivation failed: {}", e)))?;

    Ok(EncryptionKey::from_bytes(key))
}
