use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tc_core::logging;
use tc_core::{
    AccountRecord, AccountSerializer, AppMetadataRecord, AppMetadataSerializer, CacheError,
    CacheKey, CacheLogger, ClearFailure, CredentialRecord, CredentialSerializer, ItemSerializer,
    RecordKind, RequestContext, Result, WipeInfo,
};

use crate::config::StoreConfig;
use crate::crypto::{self, EncryptedBlob, EncryptionKey};
use crate::key_manager::KeyManager;
use crate::secret::SecretProvider;
use crate::store::TokenCacheStore;

const RECORD_FORMAT_VERSION: u32 = 1;
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);
const STAGED_EXTENSION: &str = "rotate";

/// One record file: the key in clear, the serialized record encrypted
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    version: u32,
    key: CacheKey,
    blob: EncryptedBlob,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

/// Held advisory lock; released when the file is closed
struct StoreLock {
    _file: File,
}

/// File-based encrypted token cache store
///
/// Stores one encrypted file per record, grouped by record kind. The
/// encryption key lives in the OS keyring with a passphrase fallback.
///
/// # Directory Structure
/// ```text
/// ~/.local/share/tokencache/tc-store/
/// ├── meta.json              # Key metadata
/// ├── lock                   # Advisory lock file
/// ├── wipe.json              # Last wipe marker
/// ├── credentials/
/// │   └── <sha256>.json      # Key in clear + encrypted credential
/// ├── accounts/
/// └── app_metadata/
/// ```
///
/// Reads take a shared lock and writes an exclusive one, so several
/// processes can share a directory. `clear_all` holds the exclusive lock
/// for its whole run.
#[derive(Debug)]
pub struct FileCacheStore {
    storage_dir: PathBuf,
    lock_file: PathBuf,
    wipe_file: PathBuf,
    config: StoreConfig,
    key_manager: RwLock<KeyManager>,
    logger: CacheLogger,
}

impl FileCacheStore {
    /// Create a file store, loading the key from the keyring or the
    /// secret provider's passphrase
    ///
    /// # Arguments
    /// * `storage_dir` - Base directory for storage
    /// * `secret_provider` - Provider for passphrase fallback
    /// * `config` - Keyring slot, lock timeout, app id and logging settings
    pub fn new(
        storage_dir: impl AsRef<Path>,
        secret_provider: &dyn SecretProvider,
        config: StoreConfig,
    ) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        prepare_dirs(&storage_dir)?;
        let key_manager = KeyManager::open(&storage_dir, secret_provider, &config)?;
        Ok(Self::assemble(storage_dir, key_manager, config))
    }

    /// Create a file store in the configured (or platform default) directory
    pub fn from_config(config: StoreConfig, secret_provider: &dyn SecretProvider) -> Result<Self> {
        let storage_dir = config.resolve_storage_dir()?;
        Self::new(storage_dir, secret_provider, config)
    }

    /// Create a file store with an explicit key, bypassing keyring and passphrase
    pub fn with_key(
        storage_dir: impl AsRef<Path>,
        key: EncryptionKey,
        config: StoreConfig,
    ) -> Result<Self> {
        let storage_dir = storage_dir.as_ref().to_path_buf();
        prepare_dirs(&storage_dir)?;
        let key_manager = KeyManager::with_key(&storage_dir, key, &config)?;
        Ok(Self::assemble(storage_dir, key_manager, config))
    }

    fn assemble(storage_dir: PathBuf, key_manager: KeyManager, config: StoreConfig) -> Self {
        Self {
            lock_file: storage_dir.join("lock"),
            wipe_file: storage_dir.join("wipe.json"),
            storage_dir,
            logger: CacheLogger::new(config.logger_config()),
            config,
            key_manager: RwLock::new(key_manager),
        }
    }

    /// Replace the logger built from the configuration
    pub fn with_logger(mut self, logger: CacheLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Number of record files of `kind` on disk
    pub fn count(&self, kind: RecordKind, context: &RequestContext) -> Result<usize> {
        let _lock = self.acquire_lock(LockMode::Shared)?;
        let result = self.record_files(kind).map(|files| files.len());
        self.report(context, "count", result)
    }

    /// Rotate encryption key and re-encrypt all records
    pub fn rotate_key(
        &self,
        secret_provider: &dyn SecretProvider,
        context: &RequestContext,
    ) -> Result<()> {
        let _span = context.span("rotate_key").entered();
        let result = self.rotate_key_locked(secret_provider);
        if let Ok(count) = &result {
            self.logger
                .info(context, format_args!("Rotated key, re-encrypted {} record(s)", count));
        }
        self.report(context, "rotate_key", result.map(|_| ()))
    }

    /// Re-encrypt into staged files, persist the new key, then move the
    /// staged files into place. Until the key is committed every record is
    /// still readable with the old key.
    fn rotate_key_locked(&self, secret_provider: &dyn SecretProvider) -> Result<usize> {
        let _lock = self.acquire_lock(LockMode::Exclusive)?;
        let mut key_manager = self.key_manager.write().map_err(|_| poisoned())?;
        let pending = key_manager.prepare_rotation(secret_provider)?;

        let mut staged = Vec::new();
        let staging = self.stage_rotation(key_manager.key(), pending.key(), &mut staged);
        if let Err(e) = staging.and_then(|()| key_manager.commit_rotation(&self.storage_dir, pending)) {
            discard_staged(&staged);
            return Err(e);
        }

        for (staged_path, path) in &staged {
            fs::rename(staged_path, path)
                .map_err(|e| CacheError::storage("move re-encrypted record", e))?;
        }

        Ok(staged.len())
    }

    fn stage_rotation(
        &self,
        current: &EncryptionKey,
        next: &EncryptionKey,
        staged: &mut Vec<(PathBuf, PathBuf)>,
    ) -> Result<()> {
        for kind in RecordKind::ALL {
            for path in self.record_files(kind)? {
                let stored = read_stored(kind, &path)?;
                let plaintext = crypto::decrypt(current, &stored.blob, &Self::binding(kind, &path))
                    .map_err(|e| CacheError::deserialization(kind, e))?;
                let sealed = seal_record(next, kind, &path, &stored.key, &plaintext)?;

                let staged_path = path.with_extension(STAGED_EXTENSION);
                atomic_write(&staged_path, &sealed)?;
                staged.push((staged_path, path));
            }
        }

        Ok(())
    }

    fn kind_dir(&self, kind: RecordKind) -> PathBuf {
        self.storage_dir.join(kind.as_str())
    }

    fn record_path(&self, kind: RecordKind, key: &CacheKey) -> PathBuf {
        self.kind_dir(kind).join(format!("{}.json", key.digest()))
    }

    /// Acquire the advisory lock, polling until the configured timeout
    fn acquire_lock(&self, mode: LockMode) -> Result<StoreLock> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_file)
            .map_err(|e| CacheError::storage("open lock file", e))?;

        let deadline = Instant::now() + self.config.lock_timeout();
        loop {
            // Called through the trait: std::fs::File has inherent lock methods too
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&file),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&file),
            };

            match attempt {
                Ok(()) => return Ok(StoreLock { _file: file }),
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    if Instant::now() >= deadline {
                        return Err(CacheError::LockTimeout);
                    }
                    std::thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) => return Err(CacheError::storage("lock cache directory", e)),
            }
        }
    }

    /// Record files of one kind; temp files from interrupted writes are ignored
    fn record_files(&self, kind: RecordKind) -> Result<Vec<PathBuf>> {
        let dir = self.kind_dir(kind);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CacheError::storage("read record directory", e)),
        };

        let mut files = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| CacheError::storage("read record directory entry", e))?
                .path();
            if path.extension().and_then(|s| s.to_str()) == Some("json") {
                files.push(path);
            }
        }

        Ok(files)
    }

    fn binding(kind: RecordKind, path: &Path) -> String {
        let id = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        format!("{}|{}", kind, id)
    }

    fn decrypt(
        &self,
        kind: RecordKind,
        path: &Path,
        stored: &StoredRecord,
    ) -> Result<zeroize::Zeroizing<Vec<u8>>> {
        let key_manager = self.key_manager.read().map_err(|_| poisoned())?;
        crypto::decrypt(key_manager.key(), &stored.blob, &Self::binding(kind, path))
            .map_err(|e| CacheError::deserialization(kind, e))
    }

    /// Encrypt and atomically write one record
    fn write_record(&self, kind: RecordKind, path: &Path, key: &CacheKey, plaintext: &[u8]) -> Result<()> {
        let sealed = {
            let key_manager = self.key_manager.read().map_err(|_| poisoned())?;
            seal_record(key_manager.key(), kind, path, key, plaintext)?
        };

        atomic_write(path, &sealed)
    }

    fn read_one<T, S>(&self, kind: RecordKind, key: &CacheKey, serializer: &S) -> Result<Option<T>>
    where
        S: ItemSerializer<T> + ?Sized,
    {
        let _lock = self.acquire_lock(LockMode::Shared)?;
        let path = self.record_path(kind, key);

        let Some(stored) = read_stored_if_exists(kind, &path)? else {
            return Ok(None);
        };
        if stored.key != *key {
            return Err(CacheError::deserialization(
                kind,
                "record file does not belong to the requested key",
            ));
        }

        let plaintext = self.decrypt(kind, &path, &stored)?;
        serializer.deserialize(&plaintext).map(Some)
    }

    fn read_matching<T, S>(
        &self,
        kind: RecordKind,
        query: &CacheKey,
        serializer: &S,
        context: &RequestContext,
    ) -> Result<Vec<T>>
    where
        S: ItemSerializer<T> + ?Sized,
    {
        let _lock = self.acquire_lock(LockMode::Shared)?;
        let mut records = Vec::new();

        for path in self.record_files(kind)? {
            let decoded = read_stored(kind, &path).and_then(|stored| {
                if !query.matches(&stored.key) {
                    return Ok(None);
                }
                let plaintext = self.decrypt(kind, &path, &stored)?;
                serializer.deserialize(&plaintext).map(Some)
            });

            match decoded {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) if e.is_deserialization_failure() => {
                    self.logger.warn(
                        context,
                        format_args!("Skipping unreadable {} record: {}", kind, e),
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Ok(records)
    }

    fn save<T, S>(
        &self,
        kind: RecordKind,
        item: &T,
        key: &CacheKey,
        serializer: &S,
        context: &RequestContext,
    ) -> Result<()>
    where
        S: ItemSerializer<T> + ?Sized,
    {
        let plaintext = zeroize::Zeroizing::new(serializer.serialize(item)?);

        let _lock = self.acquire_lock(LockMode::Exclusive)?;
        let path = self.record_path(kind, key);
        self.write_record(kind, &path, key, &plaintext)?;

        self.logger
            .verbose(context, format_args!("Saved {} record under {}", kind, key));
        Ok(())
    }

    fn remove_matching(&self, kind: RecordKind, query: &CacheKey, context: &RequestContext) -> Result<()> {
        let _lock = self.acquire_lock(LockMode::Exclusive)?;
        let mut removed = 0;

        for path in self.record_files(kind)? {
            let stored = match read_stored(kind, &path) {
                Ok(stored) => stored,
                Err(e) if e.is_deserialization_failure() => {
                    self.logger.warn(
                        context,
                        format_args!("Leaving unreadable {} record in place: {}", kind, e),
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };

            if query.matches(&stored.key) {
                remove_file_if_exists(&path)?;
                removed += 1;
            }
        }

        self.logger.info_no_pii(
            context,
            format_args!("Removed {} {} record(s) matching {}", removed, kind, query),
        );
        self.logger.info_pii(
            context,
            format_args!("Removed {} {} record(s) matching {:?}", removed, kind, query),
        );
        Ok(())
    }

    /// Delete every entry in one kind's directory, including stray temp files
    fn clear_kind(&self, kind: RecordKind) -> Result<usize> {
        let dir = self.kind_dir(kind);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::storage("read record directory", e)),
        };

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::storage("read record directory entry", e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| CacheError::storage("inspect record directory entry", e))?;

            // Anything under a kind directory occupies a record slot
            if file_type.is_dir() {
                match fs::remove_dir_all(entry.path()) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(CacheError::storage("remove record directory", e)),
                }
            } else {
                remove_file_if_exists(&entry.path())?;
            }
            removed += 1;
        }

        Ok(removed)
    }

    fn clear_locked(&self, context: &RequestContext) -> Result<()> {
        let _lock = self.acquire_lock(LockMode::Exclusive)?;
        let mut failures = Vec::new();

        for kind in RecordKind::ALL {
            match self.clear_kind(kind) {
                Ok(removed) => {
                    self.logger
                        .verbose(context, format_args!("Cleared {} {} record(s)", removed, kind));
                }
                Err(error) => failures.push(ClearFailure { kind, error }),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CacheError::PartialClear { failures })
        }
    }

    fn report<T>(&self, context: &RequestContext, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.logger
                .error(context, format_args!("{} failed: {}", operation, e));
        }
        result
    }
}

/// Record file contents for `plaintext` encrypted under `encryption_key`
fn seal_record(
    encryption_key: &EncryptionKey,
    kind: RecordKind,
    path: &Path,
    key: &CacheKey,
    plaintext: &[u8],
) -> Result<Vec<u8>> {
    let stored = StoredRecord {
        version: RECORD_FORMAT_VERSION,
        key: key.clone(),
        blob: crypto::encrypt(encryption_key, plaintext, &FileCacheStore::binding(kind, path))?,
    };
    serde_json::to_vec_pretty(&stored).map_err(|e| CacheError::serialization(kind, e))
}

fn discard_staged(staged: &[(PathBuf, PathBuf)]) {
    for (staged_path, _) in staged {
        if let Err(e) = fs::remove_file(staged_path) {
            tracing::warn!("Failed to remove staged record {}: {}", staged_path.display(), e);
        }
    }
}

fn poisoned() -> CacheError {
    CacheError::storage("acquire key manager lock", std::io::Error::other("lock poisoned"))
}

fn prepare_dirs(storage_dir: &Path) -> Result<()> {
    for dir in std::iter::once(storage_dir.to_path_buf())
        .chain(RecordKind::ALL.iter().map(|kind| storage_dir.join(kind.as_str())))
    {
        fs::create_dir_all(&dir).map_err(|e| CacheError::storage("create storage directory", e))?;

        // Set secure permissions (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&dir, fs::Permissions::from_mode(0o700))
                .map_err(|e| CacheError::storage("set directory permissions", e))?;
        }
    }

    Ok(())
}

fn read_stored(kind: RecordKind, path: &Path) -> Result<StoredRecord> {
    let content = fs::read(path).map_err(|e| CacheError::storage("read record file", e))?;
    serde_json::from_slice(&content).map_err(|e| CacheError::deserialization(kind, e))
}

/// Only a missing file counts as absent; any other I/O error is surfaced
fn read_stored_if_exists(kind: RecordKind, path: &Path) -> Result<Option<StoredRecord>> {
    let content = match fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::storage("read record file", e)),
    };
    serde_json::from_slice(&content)
        .map(Some)
        .map_err(|e| CacheError::deserialization(kind, e))
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::storage("remove record file", e)),
    }
}

/// Atomic write: write to temp file, sync, then rename
fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    {
        let mut file = File::create(&temp_path)
            .map_err(|e| CacheError::storage("create temp file", e))?;

        // Set secure permissions (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .map_err(|e| CacheError::storage("set file permissions", e))?;
        }

        file.write_all(contents)
            .map_err(|e| CacheError::storage("write temp file", e))?;
        file.sync_all()
            .map_err(|e| CacheError::storage("sync temp file", e))?;
    }

    fs::rename(&temp_path, path).map_err(|e| CacheError::storage("rename temp file", e))
}

impl TokenCacheStore for FileCacheStore {
    fn save_credential(
        &self,
        item: &CredentialRecord,
        key: &CacheKey,
        serializer: &dyn CredentialSerializer,
        context: &RequestContext,
    ) -> Result<()> {
        let _span = context.span("save_credential").entered();
        let result = self.save(RecordKind::Credential, item, key, serializer, context);
        if result.is_ok() {
            self.logger.token(
                context,
                &item.secret,
                item.credential_type.as_str(),
                item.expires_on,
                "Saved",
            );
        }
        self.report(context, "save_credential", result)
    }

    fn get_credential(
        &self,
        key: &CacheKey,
        serializer: &dyn CredentialSerializer,
        context: &RequestContext,
    ) -> Result<Option<CredentialRecord>> {
        let _span = context.span("get_credential").entered();
        let result = self.read_one(RecordKind::Credential, key, serializer);
        self.report(context, "get_credential", result)
    }

    fn get_credentials(
        &self,
        key: &CacheKey,
        serializer: &dyn CredentialSerializer,
        context: &RequestContext,
    ) -> Result<Vec<CredentialRecord>> {
        let _span = context.span("get_credentials").entered();
        let result = self.read_matching(RecordKind::Credential, key, serializer, context);
        self.report(context, "get_credentials", result)
    }

    fn save_wipe_info(&self, context: &RequestContext) -> Result<()> {
        let _span = context.span("save_wipe_info").entered();
        let result = (|| {
            let info = WipeInfo::now(&self.config.app_id, context);
            let json = serde_json::to_vec_pretty(&info)
                .map_err(|e| CacheError::InvalidWipeInfo(e.to_string()))?;

            let _lock = self.acquire_lock(LockMode::Exclusive)?;
            atomic_write(&self.wipe_file, &json)
        })();

        if result.is_ok() {
            self.logger.info(context, "Saved wipe marker");
        }
        self.report(context, "save_wipe_info", result)
    }

    fn get_wipe_info(&self, context: &RequestContext) -> Result<Option<WipeInfo>> {
        let _span = context.span("get_wipe_info").entered();
        let result = (|| {
            let _lock = self.acquire_lock(LockMode::Shared)?;
            let content = match fs::read(&self.wipe_file) {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(CacheError::storage("read wipe marker", e)),
            };

            serde_json::from_slice(&content)
                .map(Some)
                .map_err(|e| CacheError::InvalidWipeInfo(e.to_string()))
        })();

        self.report(context, "get_wipe_info", result)
    }

    fn remove_by_token_key(&self, key: &CacheKey, context: &RequestContext) -> Result<()> {
        let _span = context.span("remove_by_token_key").entered();
        let result = self.remove_matching(RecordKind::Credential, key, context);
        self.report(context, "remove_by_token_key", result)
    }

    fn remove_by_account_key(&self, key: &CacheKey, context: &RequestContext) -> Result<()> {
        let _span = context.span("remove_by_account_key").entered();
        let result = self.remove_matching(RecordKind::Account, key, context);
        self.report(context, "remove_by_account_key", result)
    }

    fn remove_by_metadata_key(&self, key: &CacheKey, context: &RequestContext) -> Result<()> {
        let _span = context.span("remove_by_metadata_key").entered();
        let result = self.remove_matching(RecordKind::AppMetadata, key, context);
        self.report(context, "remove_by_metadata_key", result)
    }

    fn save_account(
        &self,
        item: &AccountRecord,
        key: &CacheKey,
        serializer: &dyn AccountSerializer,
        context: &RequestContext,
    ) -> Result<()> {
        let _span = context.span("save_account").entered();
        let result = self.save(RecordKind::Account, item, key, serializer, context);
        self.logger.verbose(
            context,
            format_args!(
                "Account username {}",
                logging::pii_presence(item.username.as_deref())
            ),
        );
        self.report(context, "save_account", result)
    }

    fn get_account(
        &self,
        key: &CacheKey,
        serializer: &dyn AccountSerializer,
        context: &RequestContext,
    ) -> Result<Option<AccountRecord>> {
        let _span = context.span("get_account").entered();
        let result = self.read_one(RecordKind::Account, key, serializer);
        self.report(context, "get_account", result)
    }

    fn get_accounts(
        &self,
        key: &CacheKey,
        serializer: &dyn AccountSerializer,
        context: &RequestContext,
    ) -> Result<Vec<AccountRecord>> {
        let _span = context.span("get_accounts").entered();
        let result = self.read_matching(RecordKind::Account, key, serializer, context);
        self.report(context, "get_accounts", result)
    }

    fn clear_all(&self, context: &RequestContext) -> Result<()> {
        let _span = context.span("clear_all").entered();
        let result = self.clear_locked(context);
        if result.is_ok() {
            self.logger.info(context, "Cleared all cache records");
        }
        self.report(context, "clear_all", result)
    }

    fn save_app_metadata(
        &self,
        item: &AppMetadataRecord,
        key: &CacheKey,
        serializer: &dyn AppMetadataSerializer,
        context: &RequestContext,
    ) -> Result<()> {
        let _span = context.span("save_app_metadata").entered();
        let result = self.save(RecordKind::AppMetadata, item, key, serializer, context);
        self.report(context, "save_app_metadata", result)
    }

    fn get_app_metadata_entries(
        &self,
        key: &CacheKey,
        serializer: &dyn AppMetadataSerializer,
        context: &RequestContext,
    ) -> Result<Vec<AppMetadataRecord>> {
        let _span = context.span("get_app_metadata_entries").entered();
        let result = self.read_matching(RecordKind::AppMetadata, key, serializer, context);
        self.report(context, "get_app_metadata_entries", result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::StaticSecretProvider;
    use tc_core::{AccountType, CredentialType, JsonSerializer, LegacyCredentialSerializer};
    use tempfile::TempDir;

    fn create_test_store() -> (FileCacheStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileCacheStore::with_key(
            temp_dir.path(),
            EncryptionKey::generate().unwrap(),
            StoreConfig::default(),
        )
        .unwrap();
        (store, temp_dir)
    }

    fn access_token(client_id: &str, realm: &str) -> CredentialRecord {
        CredentialRecord::new(
            CredentialType::AccessToken,
            format!("at-{}-{}", client_id, realm),
            "uid.utid",
            "login.microsoftonline.com",
            client_id,
        )
        .with_realm(realm)
        .with_target("user.read")
        .expires_in(3600)
    }

    #[test]
    fn test_save_and_load() {
        let (store, _temp) = create_test_store();
        let context = RequestContext::new();
        let token = access_token("abc", "contoso");

        store
            .save_credential(&token, &token.cache_key(), &JsonSerializer, &context)
            .unwrap();

        let loaded = store
            .get_credential(&token.cache_key(), &JsonSerializer, &context)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.secret, "at-abc-contoso");
        assert_eq!(loaded.realm.as_deref(), Some("contoso"));
    }

    #[test]
    fn test_secret_not_on_disk_in_clear() {
        let (store, _temp) = create_test_store();
        let context = RequestContext::new();
        let token = access_token("abc", "contoso");

        store
            .save_credential(&token, &token.cache_key(), &JsonSerializer, &context)
            .unwrap();

        let on_disk = fs::read_to_string(store.record_path(RecordKind::Credential, &token.cache_key()))
            .unwrap();
        assert!(!on_disk.contains("at-abc-contoso"));
    }

    #[test]
    fn test_reopen_with_same_passphrase() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            keyring_service: format!("tc-store-test-{}", uuid::Uuid::new_v4()),
            ..StoreConfig::default()
        };
        let provider = StaticSecretProvider::new("test-passphrase");
        let context = RequestContext::new();
        let account = AccountRecord::new(AccountType::Mssts, "uid.utid", "login.windows.net")
            .with_realm("contoso")
            .with_username("user@contoso.com");

        {
            let store = FileCacheStore::new(temp_dir.path(), &provider, config.clone()).unwrap();
            store
                .save_account(&account, &account.cache_key(), &JsonSerializer, &context)
                .unwrap();
        }

        let store = FileCacheStore::new(temp_dir.path(), &provider, config).unwrap();
        let loaded = store
            .get_account(&account.cache_key(), &JsonSerializer, &context)
            .unwrap();
        assert_eq!(loaded, Some(account));
    }

    #[test]
    fn test_corrupt_file_is_deserialization_failure() {
        let (store, _temp) = create_test_store();
        let context = RequestContext::new();
        let token = access_token("abc", "contoso");
        store
            .save_credential(&token, &token.cache_key(), &JsonSerializer, &context)
            .unwrap();

        let path = store.record_path(RecordKind::Credential, &token.cache_key());
        fs::write(&path, b"{ truncated").unwrap();

        let err = store
            .get_credential(&token.cache_key(), &JsonSerializer, &context)
            .unwrap_err();
        assert!(matches!(err, CacheError::Deserialization { .. }));
        assert!(!err.is_storage_failure());
    }

    #[test]
    fn test_unreadable_file_is_storage_failure() {
        let (store, _temp) = create_test_store();
        let context = RequestContext::new();
        let token = access_token("abc", "contoso");

        // A directory where the record file should be makes the read fail
        let path = store.record_path(RecordKind::Credential, &token.cache_key());
        fs::create_dir_all(&path).unwrap();

        let err = store
            .get_credential(&token.cache_key(), &JsonSerializer, &context)
            .unwrap_err();
        assert!(matches!(err, CacheError::Storage { .. }));
        assert!(!err.is_deserialization_failure());
    }

    #[test]
    fn test_swapped_blob_fails_integrity_check() {
        let (store, _temp) = create_test_store();
        let context = RequestContext::new();
        let first = access_token("abc", "contoso");
        let second = access_token("xyz", "contoso");
        for token in [&first, &second] {
            store
                .save_credential(token, &token.cache_key(), &JsonSerializer, &context)
                .unwrap();
        }

        let first_path = store.record_path(RecordKind::Credential, &first.cache_key());
        let second_path = store.record_path(RecordKind::Credential, &second.cache_key());
        let mut forged = read_stored(RecordKind::Credential, &first_path).unwrap();
        forged.blob = read_stored(RecordKind::Credential, &second_path).unwrap().blob;
        fs::write(&first_path, serde_json::to_vec(&forged).unwrap()).unwrap();

        let err = store
            .get_credential(&first.cache_key(), &JsonSerializer, &context)
            .unwrap_err();
        assert!(err.is_deserialization_failure());
    }

    #[test]
    fn test_multi_lookup_skips_corrupt_records() {
        let (store, _temp) = create_test_store();
        let context = RequestContext::new();
        let good = access_token("abc", "contoso");
        let bad = access_token("abc", "fabrikam");
        for token in [&good, &bad] {
            store
                .save_credential(token, &token.cache_key(), &JsonSerializer, &context)
                .unwrap();
        }
        fs::write(store.record_path(RecordKind::Credential, &bad.cache_key()), b"garbage").unwrap();

        let found = store
            .get_credentials(&CacheKey::any().with_client_id("abc"), &JsonSerializer, &context)
            .unwrap();
        assert_eq!(found, vec![good]);
    }

    #[test]
    fn test_legacy_and_current_formats_side_by_side() {
        let (store, _temp) = create_test_store();
        let context = RequestContext::new();
        let legacy = CredentialRecord::new(
            CredentialType::RefreshToken,
            "legacy-rt",
            "uid.utid",
            "login.windows.net",
            "abc",
        )
        .with_realm("contoso");
        let legacy_key = legacy.cache_key().with_target("https://graph.windows.net");

        store
            .save_credential(&legacy, &legacy_key, &LegacyCredentialSerializer, &context)
            .unwrap();

        let read = store
            .get_credential(&legacy_key, &LegacyCredentialSerializer, &context)
            .unwrap()
            .unwrap();
        assert_eq!(read.secret, "legacy-rt");

        // Reading legacy bytes with the current serializer is a format mismatch
        let err = store
            .get_credential(&legacy_key, &JsonSerializer, &context)
            .unwrap_err();
        assert!(err.is_deserialization_failure());

        store
            .save_credential(&read, &read.cache_key(), &JsonSerializer, &context)
            .unwrap();
        assert_eq!(store.count(RecordKind::Credential, &context).unwrap(), 2);
    }

    #[test]
    fn test_rotate_key_keeps_records_readable() {
        let (store, _temp) = create_test_store();
        let context = RequestContext::new();
        let token = access_token("abc", "contoso");
        store
            .save_credential(&token, &token.cache_key(), &JsonSerializer, &context)
            .unwrap();
        let path = store.record_path(RecordKind::Credential, &token.cache_key());
        let before = read_stored(RecordKind::Credential, &path).unwrap().blob;

        store
            .rotate_key(&StaticSecretProvider::new("unused"), &context)
            .unwrap();

        let after = read_stored(RecordKind::Credential, &path).unwrap().blob;
        assert_ne!(before, after);
        let loaded = store
            .get_credential(&token.cache_key(), &JsonSerializer, &context)
            .unwrap();
        assert_eq!(loaded.map(|t| t.secret), Some(token.secret));
    }

    #[test]
    fn test_clear_removes_stray_temp_files() {
        let (store, _temp) = create_test_store();
        let context = RequestContext::new();
        let stray = store.kind_dir(RecordKind::Account).join("deadbeef.tmp");
        fs::write(&stray, b"partial").unwrap();

        store.clear_all(&context).unwrap();

        assert!(!stray.exists());
    }

    #[test]
    fn test_lock_timeout_when_held_elsewhere() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            lock_timeout_ms: 50,
            ..StoreConfig::default()
        };
        let store =
            FileCacheStore::with_key(temp_dir.path(), EncryptionKey::generate().unwrap(), config)
                .unwrap();
        let context = RequestContext::new();

        let holder = store.acquire_lock(LockMode::Exclusive).unwrap();
        let err = store.clear_all(&context).unwrap_err();
        drop(holder);

        assert!(matches!(err, CacheError::LockTimeout));
        store.clear_all(&context).unwrap();
    }

    #[test]
    fn test_wipe_marker_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();
        let key = EncryptionKey::generate().unwrap();
        let config = StoreConfig {
            app_id: "com.contoso.mail".to_string(),
            ..StoreConfig::default()
        };
        let context = RequestContext::new();

        let store = FileCacheStore::with_key(temp_dir.path(), key.clone(), config.clone()).unwrap();
        assert_eq!(store.get_wipe_info(&context).unwrap(), None);
        store.wipe(&context).unwrap();

        let other = FileCacheStore::with_key(temp_dir.path(), key, config).unwrap();
        let info = other.get_wipe_info(&context).unwrap().unwrap();
        assert_eq!(info.app_id, "com.contoso.mail");
        assert_eq!(info.process_id, std::process::id());
    }

    #[test]
    fn test_unreadable_kind_directory_is_not_reported_missing() {
        let (store, _temp) = create_test_store();
        let context = RequestContext::new();
        let token = access_token("abc", "contoso");

        let dir = store.kind_dir(RecordKind::Credential);
        fs::remove_dir_all(&dir).unwrap();
        fs::write(&dir, b"not a directory").unwrap();

        let err = store
            .get_credential(&token.cache_key(), &JsonSerializer, &context)
            .unwrap_err();
        assert!(err.is_storage_failure());
    }

    #[test]
    fn test_clear_removes_directories_in_record_slots() {
        let (store, _temp) = create_test_store();
        let context = RequestContext::new();
        let token = access_token("abc", "contoso");
        fs::create_dir_all(store.record_path(RecordKind::Credential, &token.cache_key())).unwrap();

        store.clear_all(&context).unwrap();

        assert_eq!(
            store
                .get_credential(&token.cache_key(), &JsonSerializer, &context)
                .unwrap(),
            None
        );
        store.remove_by_token_key(&CacheKey::any(), &context).unwrap();
    }

    #[test]
    fn test_clear_reports_kinds_that_could_not_be_cleared() {
        let (store, _temp) = create_test_store();
        let context = RequestContext::new();
        let token = access_token("abc", "contoso");
        let metadata = AppMetadataRecord::new("abc", "login.microsoftonline.com");
        store
            .save_credential(&token, &token.cache_key(), &JsonSerializer, &context)
            .unwrap();
        store
            .save_app_metadata(&metadata, &metadata.cache_key(), &JsonSerializer, &context)
            .unwrap();

        let accounts = store.kind_dir(RecordKind::Account);
        fs::remove_dir_all(&accounts).unwrap();
        fs::write(&accounts, b"not a directory").unwrap();

        let err = store.clear_all(&context).unwrap_err();
        let CacheError::PartialClear { failures } = &err else {
            panic!("expected a partial clear, got {err}");
        };
        let kinds: Vec<_> = failures.iter().map(|failure| failure.kind).collect();
        assert_eq!(kinds, vec![RecordKind::Account]);
        assert!(err.is_storage_failure());

        assert_eq!(store.count(RecordKind::Credential, &context).unwrap(), 0);
        assert_eq!(store.count(RecordKind::AppMetadata, &context).unwrap(), 0);
    }

    #[test]
    fn test_failed_rotation_keeps_old_key() {
        let (store, _temp) = create_test_store();
        let context = RequestContext::new();
        let token = access_token("abc", "contoso");
        let broken = access_token("xyz", "contoso");
        for item in [&token, &broken] {
            store
                .save_credential(item, &item.cache_key(), &JsonSerializer, &context)
                .unwrap();
        }
        let broken_path = store.record_path(RecordKind::Credential, &broken.cache_key());
        fs::write(&broken_path, b"{ truncated").unwrap();
        let before = read_stored(
            RecordKind::Credential,
            &store.record_path(RecordKind::Credential, &token.cache_key()),
        )
        .unwrap()
        .blob;

        assert!(store.rotate_key(&StaticSecretProvider::new("unused"), &context).is_err());

        let after = read_stored(
            RecordKind::Credential,
            &store.record_path(RecordKind::Credential, &token.cache_key()),
        )
        .unwrap()
        .blob;
        assert_eq!(before, after);
        assert_eq!(store.key_manager.read().unwrap().meta().version, 1);
        let loaded = store
            .get_credential(&token.cache_key(), &JsonSerializer, &context)
            .unwrap();
        assert_eq!(loaded, Some(token));

        let staged = fs::read_dir(store.kind_dir(RecordKind::Credential))
            .unwrap()
            .filter(|entry| {
                entry.as_ref().unwrap().path().extension().and_then(|e| e.to_str())
                    == Some(STAGED_EXTENSION)
            })
            .count();
        assert_eq!(staged, 0);
    }

    #[test]
    fn test_reopen_with_wrong_passphrase_fails() {
        let temp_dir = TempDir::new().unwrap();
        let config = StoreConfig {
            keyring_service: format!("tc-store-test-{}", uuid::Uuid::new_v4()),
            ..StoreConfig::default()
        };
        let context = RequestContext::new();
        let token = access_token("abc", "contoso");

        let store =
            FileCacheStore::new(temp_dir.path(), &StaticSecretProvider::new("right"), config.clone())
                .unwrap();
        store
            .save_credential(&token, &token.cache_key(), &JsonSerializer, &context)
            .unwrap();
        drop(store);

        let err = FileCacheStore::new(temp_dir.path(), &StaticSecretProvider::new("WRONG"), config)
            .unwrap_err();
        assert!(matches!(err, CacheError::KeyMismatch));
    }
}
