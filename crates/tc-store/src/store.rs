use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tc_core::logging;
use tc_core::{
    AccountRecord, AccountSerializer, AppMetadataRecord, AppMetadataSerializer, CacheError,
    CacheKey, CacheLogger, CredentialRecord, CredentialSerializer, ItemSerializer, RecordKind,
    RequestContext, Result, WipeInfo,
};

use crate::config::DEFAULT_APP_ID;

/// Storage contract for token cache records.
///
/// Every call is blocking and independent. Records are only ever written and
/// read through the serializer passed with the call; the key decides where a
/// record lives, the serializer decides how its bytes look.
///
/// Multi-result lookups and removals treat the key as a filter
/// ([`CacheKey::matches`]); single-result lookups require an exact key.
/// Not-found is `Ok(None)` or an empty `Vec`, never an error.
pub trait TokenCacheStore: Send + Sync {
    // Tokens

    fn save_credential(
        &self,
        item: &CredentialRecord,
        key: &CacheKey,
        serializer: &dyn CredentialSerializer,
        context: &RequestContext,
    ) -> Result<()>;

    fn get_credential(
        &self,
        key: &CacheKey,
        serializer: &dyn CredentialSerializer,
        context: &RequestContext,
    ) -> Result<Option<CredentialRecord>>;

    fn get_credentials(
        &self,
        key: &CacheKey,
        serializer: &dyn CredentialSerializer,
        context: &RequestContext,
    ) -> Result<Vec<CredentialRecord>>;

    // Wipe marker

    /// Record that this process just wiped the cache
    fn save_wipe_info(&self, context: &RequestContext) -> Result<()>;

    fn get_wipe_info(&self, context: &RequestContext) -> Result<Option<WipeInfo>>;

    // Removal. Idempotent: matching nothing is success.

    fn remove_by_token_key(&self, key: &CacheKey, context: &RequestContext) -> Result<()>;

    fn remove_by_account_key(&self, key: &CacheKey, context: &RequestContext) -> Result<()>;

    fn remove_by_metadata_key(&self, key: &CacheKey, context: &RequestContext) -> Result<()>;

    // Accounts

    fn save_account(
        &self,
        item: &AccountRecord,
        key: &CacheKey,
        serializer: &dyn AccountSerializer,
        context: &RequestContext,
    ) -> Result<()>;

    fn get_account(
        &self,
        key: &CacheKey,
        serializer: &dyn AccountSerializer,
        context: &RequestContext,
    ) -> Result<Option<AccountRecord>>;

    fn get_accounts(
        &self,
        key: &CacheKey,
        serializer: &dyn AccountSerializer,
        context: &RequestContext,
    ) -> Result<Vec<AccountRecord>>;

    /// Remove every credential, account and app metadata record.
    ///
    /// The wipe marker is left alone; see [`TokenCacheStore::wipe`].
    fn clear_all(&self, context: &RequestContext) -> Result<()>;

    // App metadata

    fn save_app_metadata(
        &self,
        item: &AppMetadataRecord,
        key: &CacheKey,
        serializer: &dyn AppMetadataSerializer,
        context: &RequestContext,
    ) -> Result<()>;

    fn get_app_metadata_entries(
        &self,
        key: &CacheKey,
        serializer: &dyn AppMetadataSerializer,
        context: &RequestContext,
    ) -> Result<Vec<AppMetadataRecord>>;

    /// Clear everything, then leave a fresh wipe marker for other processes
    fn wipe(&self, context: &RequestContext) -> Result<()> {
        self.clear_all(context)?;
        self.save_wipe_info(context)
    }
}

#[derive(Debug, Default)]
struct Tables {
    credentials: HashMap<CacheKey, Vec<u8>>,
    accounts: HashMap<CacheKey, Vec<u8>>,
    app_metadata: HashMap<CacheKey, Vec<u8>>,
    wipe_info: Option<WipeInfo>,
}

impl Tables {
    fn table(&self, kind: RecordKind) -> &HashMap<CacheKey, Vec<u8>> {
        match kind {
            RecordKind::Credential => &self.credentials,
            RecordKind::Account => &self.accounts,
            RecordKind::AppMetadata => &self.app_metadata,
        }
    }

    fn table_mut(&mut self, kind: RecordKind) -> &mut HashMap<CacheKey, Vec<u8>> {
        match kind {
            RecordKind::Credential => &mut self.credentials,
            RecordKind::Account => &mut self.accounts,
            RecordKind::AppMetadata => &mut self.app_metadata,
        }
    }
}

/// In-memory token cache store for testing and short-lived processes.
///
/// Clones share the same tables. One lock covers every record kind, so
/// [`TokenCacheStore::clear_all`] is atomic for readers.
#[derive(Debug, Clone)]
pub struct MemoryCacheStore {
    tables: Arc<RwLock<Tables>>,
    app_id: String,
    logger: CacheLogger,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
            app_id: DEFAULT_APP_ID.to_string(),
            logger: CacheLogger::from_defaults(),
        }
    }

    /// Application id recorded in wipe markers
    pub fn with_app_id(mut self, app_id: impl Into<String>) -> Self {
        self.app_id = app_id.into();
        self
    }

    pub fn with_logger(mut self, logger: CacheLogger) -> Self {
        self.logger = logger;
        self
    }

    /// Store raw bytes under `key`, bypassing any serializer.
    ///
    /// Lets tests plant corrupt or foreign-format data.
    pub fn insert_raw(&self, kind: RecordKind, key: CacheKey, bytes: Vec<u8>) -> Result<()> {
        self.write()?.table_mut(kind).insert(key, bytes);
        Ok(())
    }

    /// Number of records of `kind` currently held
    pub fn len(&self, kind: RecordKind) -> Result<usize> {
        Ok(self.read()?.table(kind).len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        let tables = self.read()?;
        Ok(RecordKind::ALL.iter().all(|kind| tables.table(*kind).is_empty()))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>> {
        self.tables.read().map_err(|_| poisoned())
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>> {
        self.tables.write().map_err(|_| poisoned())
    }

    fn save_record<T, S>(
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
        let bytes = serializer.serialize(item)?;
        self.write()?.table_mut(kind).insert(key.clone(), bytes);
        self.logger
            .verbose(context, format_args!("Saved {} record under {}", kind, key));
        Ok(())
    }

    fn get_record<T, S>(
        &self,
        kind: RecordKind,
        key: &CacheKey,
        serializer: &S,
    ) -> Result<Option<T>>
    where
        S: ItemSerializer<T> + ?Sized,
    {
        let tables = self.read()?;
        tables
            .table(kind)
            .get(key)
            .map(|bytes| serializer.deserialize(bytes))
            .transpose()
    }

    fn get_matching<T, S>(
        &self,
        kind: RecordKind,
        query: &CacheKey,
        serializer: &S,
        context: &RequestContext,
    ) -> Result<Vec<T>>
    where
        S: ItemSerializer<T> + ?Sized,
    {
        let tables = self.read()?;
        let mut records = Vec::new();

        for (stored_key, bytes) in tables.table(kind) {
            if !query.matches(stored_key) {
                continue;
            }
            match serializer.deserialize(bytes) {
                Ok(record) => records.push(record),
                Err(e) => {
                    self.logger.warn(
                        context,
                        format_args!("Skipping unreadable {} record: {}", kind, e),
                    );
                }
            }
        }

        Ok(records)
    }

    fn remove_matching(
        &self,
        kind: RecordKind,
        query: &CacheKey,
        context: &RequestContext,
    ) -> Result<()> {
        let removed = {
            let mut tables = self.write()?;
            let table = tables.table_mut(kind);
            let before = table.len();
            table.retain(|stored_key, _| !query.matches(stored_key));
            before - table.len()
        };

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

    fn report<T>(&self, context: &RequestContext, operation: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.logger
                .error(context, format_args!("{} failed: {}", operation, e));
        }
        result
    }
}

impl Default for MemoryCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> CacheError {
    CacheError::storage("acquire memory store lock", std::io::Error::other("lock poisoned"))
}

impl TokenCacheStore for MemoryCacheStore {
    fn save_credential(
        &self,
        item: &CredentialRecord,
        key: &CacheKey,
        serializer: &dyn CredentialSerializer,
        context: &RequestContext,
    ) -> Result<()> {
        let _span = context.span("save_credential").entered();
        let result = self.save_record(RecordKind::Credential, item, key, serializer, context);
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
        let result = self.get_record(RecordKind::Credential, key, serializer);
        self.report(context, "get_credential", result)
    }

    fn get_credentials(
        &self,
        key: &CacheKey,
        serializer: &dyn CredentialSerializer,
        context: &RequestContext,
    ) -> Result<Vec<CredentialRecord>> {
        let _span = context.span("get_credentials").entered();
        let result = self.get_matching(RecordKind::Credential, key, serializer, context);
        self.report(context, "get_credentials", result)
    }

    fn save_wipe_info(&self, context: &RequestContext) -> Result<()> {
        let _span = context.span("save_wipe_info").entered();
        let info = WipeInfo::now(&self.app_id, context);
        let result = self.write().map(|mut tables| {
            tables.wipe_info = Some(info);
        });
        if result.is_ok() {
            self.logger.info(context, "Saved wipe marker");
        }
        self.report(context, "save_wipe_info", result)
    }

    fn get_wipe_info(&self, context: &RequestContext) -> Result<Option<WipeInfo>> {
        let result = self.read().map(|tables| tables.wipe_info.clone());
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
        let result = self.save_record(RecordKind::Account, item, key, serializer, context);
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
        let result = self.get_record(RecordKind::Account, key, serializer);
        self.report(context, "get_account", result)
    }

    fn get_accounts(
        &self,
        key: &CacheKey,
        serializer: &dyn AccountSerializer,
        context: &RequestContext,
    ) -> Result<Vec<AccountRecord>> {
        let _span = context.span("get_accounts").entered();
        let result = self.get_matching(RecordKind::Account, key, serializer, context);
        self.report(context, "get_accounts", result)
    }

    fn clear_all(&self, context: &RequestContext) -> Result<()> {
        let _span = context.span("clear_all").entered();
        let result = self.write().map(|mut tables| {
            for kind in RecordKind::ALL {
                tables.table_mut(kind).clear();
            }
        });
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
        let result = self.save_record(RecordKind::AppMetadata, item, key, serializer, context);
        self.report(context, "save_app_metadata", result)
    }

    fn get_app_metadata_entries(
        &self,
        key: &CacheKey,
        serializer: &dyn AppMetadataSerializer,
        context: &RequestContext,
    ) -> Result<Vec<AppMetadataRecord>> {
        let _span = context.span("get_app_metadata_entries").entered();
        let result = self.get_matching(RecordKind::AppMetadata, key, serializer, context);
        self.report(context, "get_app_metadata_entries", result)
    }
}
