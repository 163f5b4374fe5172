//! Behaviour every `TokenCacheStore` backend must share

use std::collections::BTreeSet;

use tc_core::{
    AccountRecord, AccountType, AppMetadataRecord, CacheError, CacheKey, CredentialRecord,
    CredentialType, JsonSerializer, RecordKind, RequestContext,
};
use tc_store::{EncryptionKey, FileCacheStore, MemoryCacheStore, StoreConfig, TokenCacheStore};
use tempfile::TempDir;

/// A backend plus whatever keeps its storage alive
struct Backend {
    name: &'static str,
    store: Box<dyn TokenCacheStore>,
    _dir: Option<TempDir>,
}

fn backends() -> Vec<Backend> {
    let dir = TempDir::new().unwrap();
    let file_store = FileCacheStore::with_key(
        dir.path(),
        EncryptionKey::generate().unwrap(),
        StoreConfig::default(),
    )
    .unwrap();

    vec![
        Backend {
            name: "memory",
            store: Box::new(MemoryCacheStore::new()),
            _dir: None,
        },
        Backend {
            name: "file",
            store: Box::new(file_store),
            _dir: Some(dir),
        },
    ]
}

fn credential(credential_type: CredentialType, client_id: &str, realm: &str) -> CredentialRecord {
    CredentialRecord::new(
        credential_type,
        format!("{}-{}-{}", credential_type.as_str(), client_id, realm),
        "uid.utid",
        "login.microsoftonline.com",
        client_id,
    )
    .with_realm(realm)
}

fn secrets(records: &[CredentialRecord]) -> BTreeSet<String> {
    records.iter().map(|r| r.secret.clone()).collect()
}

#[test]
fn round_trip_for_every_kind() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let context = RequestContext::new().component(backend.name);

        let token = credential(CredentialType::AccessToken, "abc", "contoso")
            .with_target("User.Read Mail.Read")
            .expires_in(3600);
        store
            .save_credential(&token, &token.cache_key(), &JsonSerializer, &context)
            .unwrap();
        assert_eq!(
            store
                .get_credential(&token.cache_key(), &JsonSerializer, &context)
                .unwrap(),
            Some(token.clone()),
            "{}",
            backend.name
        );

        let account = AccountRecord::new(AccountType::Mssts, "uid.utid", "login.microsoftonline.com")
            .with_realm("contoso")
            .with_username("user@contoso.com");
        store
            .save_account(&account, &account.cache_key(), &JsonSerializer, &context)
            .unwrap();
        assert_eq!(
            store
                .get_account(&account.cache_key(), &JsonSerializer, &context)
                .unwrap(),
            Some(account),
            "{}",
            backend.name
        );

        let metadata =
            AppMetadataRecord::new("abc", "login.microsoftonline.com").with_family_id("1");
        store
            .save_app_metadata(&metadata, &metadata.cache_key(), &JsonSerializer, &context)
            .unwrap();
        assert_eq!(
            store
                .get_app_metadata_entries(&metadata.cache_key(), &JsonSerializer, &context)
                .unwrap(),
            vec![metadata],
            "{}",
            backend.name
        );
    }
}

#[test]
fn save_replaces_record_under_same_key() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let context = RequestContext::new();
        let key = CacheKey::any().with_client_id("abc").with_realm("contoso");

        let mut token = credential(CredentialType::RefreshToken, "abc", "contoso");
        store.save_credential(&token, &key, &JsonSerializer, &context).unwrap();
        token.secret = "rotated".to_string();
        store.save_credential(&token, &key, &JsonSerializer, &context).unwrap();

        let all = store
            .get_credentials(&CacheKey::any(), &JsonSerializer, &context)
            .unwrap();
        assert_eq!(secrets(&all), BTreeSet::from(["rotated".to_string()]), "{}", backend.name);
    }
}

#[test]
fn missing_record_is_not_an_error() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let context = RequestContext::new();
        let key = CacheKey::any().with_client_id("nobody");

        assert_eq!(store.get_credential(&key, &JsonSerializer, &context).unwrap(), None);
        assert_eq!(store.get_account(&key, &JsonSerializer, &context).unwrap(), None);
        assert!(store.get_credentials(&key, &JsonSerializer, &context).unwrap().is_empty());
        assert!(store.get_accounts(&key, &JsonSerializer, &context).unwrap().is_empty());
        assert!(store
            .get_app_metadata_entries(&key, &JsonSerializer, &context)
            .unwrap()
            .is_empty());
    }
}

#[test]
fn partial_key_filters_by_client_id() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let context = RequestContext::new();
        let token = credential(CredentialType::RefreshToken, "abc", "contoso");
        let key = CacheKey::any().with_client_id("abc").with_realm("contoso");

        store.save_credential(&token, &key, &JsonSerializer, &context).unwrap();

        let found = store
            .get_credentials(&CacheKey::any().with_client_id("abc"), &JsonSerializer, &context)
            .unwrap();
        assert_eq!(found, vec![token], "{}", backend.name);

        let none = store
            .get_credentials(&CacheKey::any().with_client_id("xyz"), &JsonSerializer, &context)
            .unwrap();
        assert!(none.is_empty(), "{}", backend.name);
    }
}

#[test]
fn partial_key_returns_exactly_the_matching_set() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let context = RequestContext::new();
        let tokens = [
            credential(CredentialType::AccessToken, "abc", "contoso").with_target("user.read"),
            credential(CredentialType::RefreshToken, "abc", "contoso"),
            credential(CredentialType::RefreshToken, "abc", "fabrikam"),
            credential(CredentialType::RefreshToken, "xyz", "contoso"),
        ];
        for token in &tokens {
            store
                .save_credential(token, &token.cache_key(), &JsonSerializer, &context)
                .unwrap();
        }

        let query = CacheKey::any()
            .with_client_id("abc")
            .with_credential_type(CredentialType::RefreshToken);
        let found = store.get_credentials(&query, &JsonSerializer, &context).unwrap();
        assert_eq!(secrets(&found), secrets(&tokens[1..3]), "{}", backend.name);

        // Realm comparison ignores case
        let query = CacheKey::any().with_realm("CONTOSO");
        let found = store.get_credentials(&query, &JsonSerializer, &context).unwrap();
        let expected = [tokens[0].clone(), tokens[1].clone(), tokens[3].clone()];
        assert_eq!(secrets(&found), secrets(&expected), "{}", backend.name);

        let everything = store
            .get_credentials(&CacheKey::any(), &JsonSerializer, &context)
            .unwrap();
        assert_eq!(everything.len(), tokens.len(), "{}", backend.name);
    }
}

#[test]
fn single_lookup_requires_exact_key() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let context = RequestContext::new();
        let token = credential(CredentialType::RefreshToken, "abc", "contoso");
        store
            .save_credential(&token, &token.cache_key(), &JsonSerializer, &context)
            .unwrap();

        let partial = CacheKey::any().with_client_id("abc");
        assert_eq!(
            store.get_credential(&partial, &JsonSerializer, &context).unwrap(),
            None,
            "{}",
            backend.name
        );
    }
}

#[test]
fn removal_is_idempotent() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let context = RequestContext::new();
        let token = credential(CredentialType::IdToken, "abc", "contoso");
        let key = token.cache_key();
        store.save_credential(&token, &key, &JsonSerializer, &context).unwrap();

        store.remove_by_token_key(&key, &context).unwrap();
        assert_eq!(store.get_credential(&key, &JsonSerializer, &context).unwrap(), None);

        store.remove_by_token_key(&key, &context).unwrap();
        store.remove_by_metadata_key(&key, &context).unwrap();
    }
}

#[test]
fn removal_with_partial_key_removes_all_matches() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let context = RequestContext::new();
        let keep = credential(CredentialType::RefreshToken, "xyz", "contoso");
        for token in [
            credential(CredentialType::AccessToken, "abc", "contoso"),
            credential(CredentialType::RefreshToken, "abc", "fabrikam"),
            keep.clone(),
        ] {
            store
                .save_credential(&token, &token.cache_key(), &JsonSerializer, &context)
                .unwrap();
        }

        store
            .remove_by_token_key(&CacheKey::any().with_client_id("abc"), &context)
            .unwrap();

        let left = store
            .get_credentials(&CacheKey::any(), &JsonSerializer, &context)
            .unwrap();
        assert_eq!(left, vec![keep], "{}", backend.name);
    }
}

#[test]
fn account_removal_leaves_app_metadata() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let context = RequestContext::new();

        let account = AccountRecord::new(AccountType::Msa, "uid.utid", "login.live.com");
        let account_key = account.cache_key();
        let metadata = AppMetadataRecord::new("abc", "login.microsoftonline.com");
        let metadata_key = metadata.cache_key();

        store
            .save_account(&account, &account_key, &JsonSerializer, &context)
            .unwrap();
        store
            .save_app_metadata(&metadata, &metadata_key, &JsonSerializer, &context)
            .unwrap();

        store.remove_by_account_key(&account_key, &context).unwrap();

        assert_eq!(
            store.get_account(&account_key, &JsonSerializer, &context).unwrap(),
            None,
            "{}",
            backend.name
        );
        assert_eq!(
            store
                .get_app_metadata_entries(&metadata_key, &JsonSerializer, &context)
                .unwrap(),
            vec![metadata],
            "{}",
            backend.name
        );
    }
}

#[test]
fn clear_all_empties_every_kind() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let context = RequestContext::new();

        let token = credential(CredentialType::RefreshToken, "abc", "contoso");
        let account = AccountRecord::new(AccountType::Mssts, "uid.utid", "login.microsoftonline.com");
        let metadata = AppMetadataRecord::new("abc", "login.microsoftonline.com");
        store
            .save_credential(&token, &token.cache_key(), &JsonSerializer, &context)
            .unwrap();
        store
            .save_account(&account, &account.cache_key(), &JsonSerializer, &context)
            .unwrap();
        store
            .save_app_metadata(&metadata, &metadata.cache_key(), &JsonSerializer, &context)
            .unwrap();

        store.clear_all(&context).unwrap();

        assert_eq!(
            store
                .get_credential(&token.cache_key(), &JsonSerializer, &context)
                .unwrap(),
            None
        );
        assert_eq!(
            store
                .get_account(&account.cache_key(), &JsonSerializer, &context)
                .unwrap(),
            None
        );
        assert!(store
            .get_credentials(&CacheKey::any(), &JsonSerializer, &context)
            .unwrap()
            .is_empty());
        assert!(store
            .get_accounts(&CacheKey::any(), &JsonSerializer, &context)
            .unwrap()
            .is_empty());
        assert!(store
            .get_app_metadata_entries(&CacheKey::any(), &JsonSerializer, &context)
            .unwrap()
            .is_empty());
    }
}

#[test]
fn wipe_marker_absent_until_saved() {
    for backend in backends() {
        let store = backend.store.as_ref();
        let context = RequestContext::new();

        assert_eq!(store.get_wipe_info(&context).unwrap(), None, "{}", backend.name);

        store.save_wipe_info(&context).unwrap();
        let info = store.get_wipe_info(&context).unwrap().unwrap();
        assert_eq!(info.correlation_id, context.correlation_id());
        assert!(!info.to_map().is_empty());

        // Clearing records keeps the marker
        store.clear_all(&context).unwrap();
        assert!(store.get_wipe_info(&context).unwrap().is_some(), "{}", backend.name);
    }
}

#[test]
fn corrupt_single_record_is_a_deserialization_failure() {
    let context = RequestContext::new();
    let token = credential(CredentialType::RefreshToken, "abc", "contoso");
    let key = token.cache_key();

    let memory = MemoryCacheStore::new();
    memory
        .insert_raw(RecordKind::Credential, key.clone(), b"not json".to_vec())
        .unwrap();
    let err = memory.get_credential(&key, &JsonSerializer, &context).unwrap_err();
    assert!(matches!(err, CacheError::Deserialization { .. }));

    let dir = TempDir::new().unwrap();
    let file = FileCacheStore::with_key(
        dir.path(),
        EncryptionKey::generate().unwrap(),
        StoreConfig::default(),
    )
    .unwrap();
    file.save_credential(&token, &key, &JsonSerializer, &context).unwrap();
    let path = dir
        .path()
        .join("credentials")
        .join(format!("{}.json", key.digest()));
    std::fs::write(&path, b"{ not json").unwrap();

    let err = file.get_credential(&key, &JsonSerializer, &context).unwrap_err();
    assert!(err.is_deserialization_failure());
    assert!(!err.is_storage_failure());
}

#[test]
fn io_fault_is_a_storage_failure() {
    let context = RequestContext::new();
    let key = credential(CredentialType::RefreshToken, "abc", "contoso").cache_key();

    let dir = TempDir::new().unwrap();
    let file = FileCacheStore::with_key(
        dir.path(),
        EncryptionKey::generate().unwrap(),
        StoreConfig::default(),
    )
    .unwrap();

    // A directory in place of the record file cannot be read as one
    let path = dir
        .path()
        .join("credentials")
        .join(format!("{}.json", key.digest()));
    std::fs::create_dir(&path).unwrap();

    let err = file.get_credential(&key, &JsonSerializer, &context).unwrap_err();
    assert!(err.is_storage_failure());
    assert!(!err.is_deserialization_failure());
}

#[test]
fn stores_are_usable_across_threads() {
    for backend in backends() {
        let store = backend.store.as_ref();

        std::thread::scope(|scope| {
            for client in ["a", "b", "c", "d"] {
                scope.spawn(move || {
                    let context = RequestContext::new();
                    let token = credential(CredentialType::RefreshToken, client, "contoso");
                    store
                        .save_credential(&token, &token.cache_key(), &JsonSerializer, &context)
                        .unwrap();
                });
            }
        });

        let all = store
            .get_credentials(&CacheKey::any(), &JsonSerializer, &RequestContext::new())
            .unwrap();
        assert_eq!(all.len(), 4, "{}", backend.name);
    }
}
