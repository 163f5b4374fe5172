use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit, Payload},
};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use tc_core::{CacheError, Result};
use zeroize::{Zeroizing, ZeroizeOnDrop};

/// Current additional-authenticated-data format version
pub const AAD_VERSION: &str = "v1";

/// 256-bit record encryption key, zeroed on drop
#[derive(Clone, ZeroizeOnDrop)]
pub struct EncryptionKey {
    key: [u8; 32],
}

impl EncryptionKey {
    /// Fresh key from the OS random source
    pub fn generate() -> Result<Self> {
        let mut key = [0u8; 32];
        getrandom::fill(&mut key)
            .map_err(|e| CacheError::Crypto(format!("Random source unavailable: {}", e)))?;
        Ok(Self { key })
    }

    /// Wrap key material loaded from the keyring or derived from a passphrase
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { key: bytes }
    }

    /// Raw key material; never log or persist in clear
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.key
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey([REDACTED])")
    }
}

/// Serialized form of one encrypted payload
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct EncryptedBlob {
    /// 96-bit nonce, base64url
    pub nonce: String,
    /// Ciphertext with the GCM tag appended, base64url
    pub ciphertext: String,
    /// Which AAD layout was used at encryption time
    pub aad_version: String,
}

fn aad(version: &str, binding: &str) -> String {
    format!("tc-store|{}|{}", version, binding)
}

fn cipher(key: &EncryptionKey) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| CacheError::Crypto(format!("Invalid key length: {}", e)))
}

/// Encrypt plaintext using AES-256-GCM.
///
/// `binding` is authenticated but not encrypted; decryption fails unless the
/// same value is supplied. Stores bind the record kind and id so blobs cannot
/// be swapped between files.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8], binding: &str) -> Result<EncryptedBlob> {
    let cipher = cipher(key)?;

    let mut nonce_bytes = [0u8; 12];
    getrandom::fill(&mut nonce_bytes)
        .map_err(|e| CacheError::Crypto(format!("Random source unavailable: {}", e)))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = aad(AAD_VERSION, binding);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|e| CacheError::Crypto(format!("Encryption failed: {}", e)))?;

    Ok(EncryptedBlob {
        nonce: URL_SAFE_NO_PAD.encode(nonce_bytes),
        ciphertext: URL_SAFE_NO_PAD.encode(ciphertext),
        aad_version: AAD_VERSION.to_string(),
    })
}

/// Decrypt a blob, checking it was produced for `binding`
pub fn decrypt(
    key: &EncryptionKey,
    blob: &EncryptedBlob,
    binding: &str,
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = cipher(key)?;

    let nonce_bytes = URL_SAFE_NO_PAD
        .decode(&blob.nonce)
        .map_err(|e| CacheError::Crypto(format!("Invalid nonce: {}", e)))?;

    if nonce_bytes.len() != 12 {
        return Err(CacheError::Crypto(format!(
            "Expected 12 byte nonce, got {}",
            nonce_bytes.len()
        )));
    }

    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = URL_SAFE_NO_PAD
        .decode(&blob.ciphertext)
        .map_err(|e| CacheError::Crypto(format!("Invalid ciphertext: {}", e)))?;

    let aad = aad(&blob.aad_version, binding);

    let plaintext = cipher
        .decrypt(
            nonce,
            Payload {
                msg: &ciphertext,
                aad: aad.as_bytes(),
            },
        )
        .map_err(|_| CacheError::Crypto("Integrity check failed".to_string()))?;

    Ok(Zeroizing::new(plaintext))
}
