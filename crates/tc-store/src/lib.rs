//! Storage backends for the token cache
//!
//! This crate provides the [`TokenCacheStore`] contract and two backends
//! for persisting credentials, accounts, application metadata and the
//! wipe marker.
//!
//! # In-Memory Storage (Testing)
//!
//! ```
//! use tc_core::{CacheKey, CredentialRecord, CredentialType, JsonSerializer, RequestContext};
//! use tc_store::{MemoryCacheStore, TokenCacheStore};
//!
//! # fn example() -> tc_core::Result<()> {
//! let store = MemoryCacheStore::new();
//! let context = RequestContext::new();
//!
//! let token = CredentialRecord::new(
//!     CredentialType::RefreshToken,
//!     "refresh-token",
//!     "uid.utid",
//!     "login.microsoftonline.com",
//!     "abc",
//! );
//! store.save_credential(&token, &token.cache_key(), &JsonSerializer, &context)?;
//!
//! // Partial keys return every matching record
//! let tokens = store.get_credentials(&CacheKey::any().with_client_id("abc"), &JsonSerializer, &context)?;
//! assert_eq!(tokens.len(), 1);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```
//!
//! # File-Based Encrypted Storage (Production)
//!
//! ```no_run
//! use tc_core::RequestContext;
//! use tc_store::{EnvSecretProvider, FileCacheStore, StoreConfig, TokenCacheStore};
//!
//! # fn example() -> tc_core::Result<()> {
//! // Key comes from the OS keyring, or from $TOKENCACHE_PASSPHRASE
//! let store = FileCacheStore::from_config(StoreConfig::default(), &EnvSecretProvider::default())?;
//!
//! // Records are encrypted using AES-256-GCM
//! if let Some(wipe) = store.get_wipe_info(&RequestContext::new())? {
//!     println!("Cache was wiped by {} at {}", wipe.app_id, wipe.wiped_at);
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crypto;
pub mod file_store;
pub mod key_manager;
pub mod secret;
pub mod store;

// Re-export main types
pub use config::StoreConfig;
pub use crypto::EncryptionKey;
pub use file_store::FileCacheStore;
pub use key_manager::{KeyManager, KeySource};
pub use secret::{EnvSecretProvider, NoSecretProvider, SecretProvider, StaticSecretProvider};
pub use store::{MemoryCacheStore, TokenCacheStore};
