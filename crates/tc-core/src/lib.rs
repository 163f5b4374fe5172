//! Data model for pluggable token cache storage
//!
//! This crate defines everything a cache backend and its callers share:
//!
//! - [`CacheKey`] and its partial-match predicate
//! - the three keyed record kinds ([`CredentialRecord`], [`AccountRecord`],
//!   [`AppMetadataRecord`]) and the unkeyed [`WipeInfo`] marker
//! - the serializer capability set ([`ItemSerializer`] and its three named
//!   variants), with the current JSON format and the legacy token format
//! - [`RequestContext`] for correlation and [`CacheLogger`] for diagnostics
//! - the [`CacheError`] taxonomy
//!
//! Backends live in the `tc-store` crate.
//!
//! # Example
//!
//! ```
//! use tc_core::{CacheKey, CredentialRecord, CredentialType};
//!
//! let token = CredentialRecord::new(
//!     CredentialType::RefreshToken,
//!     "refresh-token",
//!     "uid.utid",
//!     "login.microsoftonline.com",
//!     "abc",
//! )
//! .with_realm("contoso");
//!
//! // A partially populated key works as a filter
//! let query = CacheKey::any().with_client_id("abc");
//! assert!(query.matches(&token.cache_key()));
//! ```

pub mod account;
pub mod app_metadata;
pub mod context;
pub mod credential;
pub mod errors;
pub mod key;
pub mod legacy;
pub mod logging;
pub mod serializer;
pub mod wipe;

pub use account::{AccountRecord, AccountType};
pub use app_metadata::AppMetadataRecord;
pub use context::RequestContext;
pub use credential::{CredentialRecord, CredentialType, TOKEN_EXPIRY_SKEW};
pub use errors::{CacheError, ClearFailure, RecordKind, Result};
pub use key::CacheKey;
pub use legacy::LegacyCredentialSerializer;
pub use logging::{CacheLogger, LoggerConfig};
pub use serializer::{
    AccountSerializer, AppMetadataSerializer, CacheRecord, CredentialSerializer, ItemSerializer,
    JsonSerializer,
};
pub use wipe::WipeInfo;
