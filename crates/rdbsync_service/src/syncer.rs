//! Per-(process, store) syncer.
//!
//! A syncer owns one open engine store. Opening it records the store's
//! metadata (and, for encrypted stores, the sealed password) before the
//! engine is asked to open the data. Protocol predicates are translated to
//! an engine [`Query`] here, and engine per-device table statuses are
//! folded back into a [`SyncResult`].

use std::path::Path;
use std::sync::{mpsc, Arc, Weak};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use rdbsync_ipc::CallingIdentity;
use rdbsync_protocol::{PredicateOperator, RdbPredicates, RdbSyncerParam, SyncOption, SyncResult};
use rdbsync_store::{
    anonymize, store_identifier, AppIdMetaData, CipherPassword, CipherType, DbStatus, DeviceManager,
    DeviceSyncStatus, Query, RelationalStoreDelegate, ResultSet, SecretKeyMetaData,
    StoreMetaData, StoreObserver, StoreOption, StoreProperty, SyncMode,
};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::service::ServiceDeps;
use crate::timer::{SyncerTimer, TimerId};

/// Callback receiving the result of an asynchronous sync.
pub type AsyncCallback = Box<dyn FnOnce(SyncResult) + Send>;

/// Permissions recorded with a store.
#[derive(Debug, Clone, Copy, Default)]
pub struct Permissions<'a> {
    /// Permission required to write.
    pub write: &'a str,
    /// Permission required to read.
    pub read: &'a str,
}

/// An open store bound to one client process.
pub struct RdbSyncer {
    id: u64,
    param: RdbSyncerParam,
    caller: CallingIdentity,
    meta: StoreMetaData,
    delegate: Box<dyn RelationalStoreDelegate>,
    devices: Arc<dyn DeviceManager>,
    remote_query_timeout: Duration,
    timer: Mutex<Option<(Weak<SyncerTimer>, TimerId)>>,
}

impl RdbSyncer {
    /// Records metadata for `param` and opens the engine store.
    ///
    /// `observer` is registered with the store and receives remote changes.
    pub fn open(
        deps: &ServiceDeps,
        config: &ServiceConfig,
        id: u64,
        mut param: RdbSyncerParam,
        caller: CallingIdentity,
        permissions: Permissions<'_>,
        observer: Arc<dyn StoreObserver>,
    ) -> ServiceResult<Self> {
        let meta = fill_meta_data(deps, config, &param, &caller, permissions)?;
        create_meta_data(deps, &meta, &param)?;
        param.password.zeroize();

        let delegate = open_delegate(deps, config, &meta, observer)?;
        info!(
            pid = caller.pid,
            store = %meta.store_id,
            syncer = id,
            encrypted = meta.is_encrypt,
            "syncer opened"
        );
        Ok(Self {
            id,
            param,
            caller,
            meta,
            delegate,
            devices: Arc::clone(&deps.devices),
            remote_query_timeout: config.remote_query_timeout,
            timer: Mutex::new(None),
        })
    }

    /// Unique id of this syncer.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Process the syncer belongs to.
    pub fn pid(&self) -> i32 {
        self.caller.pid
    }

    /// Store id (store name without suffix).
    pub fn store_id(&self) -> &str {
        &self.meta.store_id
    }

    /// Parameters the syncer was opened with; the password is wiped.
    pub fn param(&self) -> &RdbSyncerParam {
        &self.param
    }

    /// Metadata recorded for the store.
    pub fn meta(&self) -> &StoreMetaData {
        &self.meta
    }

    /// Hex engine identifier of the store.
    pub fn identifier(&self) -> String {
        hex::encode(store_identifier(&self.meta.user, &self.meta.app_id, &self.meta.store_id))
    }

    /// Associates the idle timer; it is unregistered when the syncer drops.
    pub fn attach_timer(&self, timer: &Arc<SyncerTimer>, timer_id: TimerId) {
        *self.timer.lock() = Some((Arc::downgrade(timer), timer_id));
    }

    /// Id of the idle timer, if one is attached.
    pub fn timer_id(&self) -> Option<TimerId> {
        self.timer.lock().as_ref().map(|(_, id)| *id)
    }

    /// Marks every table in `tables` as distributed, stopping at the first
    /// failure.
    pub fn set_distributed_tables(&self, tables: &[String]) -> ServiceResult<()> {
        for table in tables {
            self.delegate.create_distributed_table(table).map_err(|err| {
                warn!(store = %self.meta.store_id, table = %table, error = %err, "create distributed table failed");
                err
            })?;
        }
        Ok(())
    }

    /// Syncs and blocks until the engine reports per-device statuses.
    pub fn do_sync(&self, option: &SyncOption, predicates: &RdbPredicates) -> ServiceResult<SyncResult> {
        let query = make_query(predicates)?;
        let devices = self.target_devices(predicates);
        debug!(store = %self.meta.store_id, devices = devices.len(), "blocking sync");

        let (tx, rx) = mpsc::channel();
        self.delegate.sync(
            &devices,
            engine_mode(option),
            &query,
            Box::new(move |status| {
                let _ = tx.send(status);
            }),
            true,
        )?;
        let status = rx
            .try_recv()
            .map_err(|_| ServiceError::Store(DbStatus::DbError.into()))?;
        Ok(handle_sync_status(self.devices.as_ref(), status))
    }

    /// Starts a sync; `callback` receives the result exactly once when the
    /// engine finishes. An error means the callback will never run.
    pub fn do_async(
        &self,
        option: &SyncOption,
        predicates: &RdbPredicates,
        callback: AsyncCallback,
    ) -> ServiceResult<()> {
        let query = make_query(predicates)?;
        let devices = self.target_devices(predicates);
        debug!(store = %self.meta.store_id, devices = devices.len(), "async sync");

        let translator = Arc::clone(&self.devices);
        self.delegate.sync(
            &devices,
            engine_mode(option),
            &query,
            Box::new(move |status| callback(handle_sync_status(translator.as_ref(), status))),
            false,
        )?;
        Ok(())
    }

    /// Runs `sql` on the remote device with network id `device`.
    pub fn remote_query(
        &self,
        device: &str,
        sql: &str,
        selection_args: &[String],
    ) -> ServiceResult<Box<dyn ResultSet>> {
        let uuid = self
            .devices
            .to_uuid(device)
            .ok_or_else(|| ServiceError::UnknownDevice(anonymize(device)))?;
        self.delegate
            .remote_query(&uuid, sql, selection_args, self.remote_query_timeout)
            .map_err(|err| {
                warn!(store = %self.meta.store_id, device = %anonymize(device), error = %err, "remote query failed");
                err.into()
            })
    }

    /// Deletes the persisted metadata of the store `param` names.
    pub fn destroy_meta_data(
        deps: &ServiceDeps,
        config: &ServiceConfig,
        param: &RdbSyncerParam,
        caller: &CallingIdentity,
    ) -> ServiceResult<()> {
        let meta = fill_meta_data(deps, config, param, caller, Permissions::default())?;
        deps.meta.del_meta(&meta.get_key())?;
        deps.meta.del_meta(&meta.get_secret_key())?;
        info!(pid = caller.pid, store = %meta.store_id, "store metadata destroyed");
        Ok(())
    }

    /// Decrypts the stored password of an encrypted store.
    pub fn password(deps: &ServiceDeps, meta: &StoreMetaData) -> ServiceResult<CipherPassword> {
        let secret: SecretKeyMetaData = deps
            .meta
            .load_meta(&meta.get_secret_key())?
            .ok_or_else(|| ServiceError::InitFailed(format!("no secret key for {}", meta.store_id)))?;
        let mut plain = deps.crypto.decrypt(&secret.s_key)?;
        let password = CipherPassword::from_bytes(&plain);
        plain.zeroize();
        Ok(password?)
    }

    fn target_devices(&self, predicates: &RdbPredicates) -> Vec<String> {
        let network_ids: Vec<String> = if predicates.devices.is_empty() {
            self.devices
                .remote_devices()
                .into_iter()
                .map(|device| device.network_id)
                .collect()
        } else {
            predicates.devices.clone()
        };
        network_ids
            .iter()
            .filter_map(|network_id| {
                let uuid = self.devices.to_uuid(network_id);
                if uuid.is_none() {
                    warn!(device = %anonymize(network_id), "no uuid for device, skipped");
                }
                uuid
            })
            .collect()
    }
}

impl Drop for RdbSyncer {
    fn drop(&mut self) {
        if let Some((timer, id)) = self.timer.get_mut().take() {
            if let Some(timer) = timer.upgrade() {
                timer.unregister(id);
            }
        }
        debug!(pid = self.caller.pid, store = %self.meta.store_id, syncer = self.id, "syncer closed");
    }
}

impl std::fmt::Debug for RdbSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdbSyncer")
            .field("id", &self.id)
            .field("pid", &self.caller.pid)
            .field("store", &self.meta.store_id)
            .finish()
    }
}

fn engine_mode(option: &SyncOption) -> SyncMode {
    match option.mode {
        rdbsync_protocol::SyncMode::Push => SyncMode::PushOnly,
        rdbsync_protocol::SyncMode::Pull => SyncMode::PullOnly,
        rdbsync_protocol::SyncMode::PushPull => SyncMode::PushPull,
    }
}

/// Translates predicates into an engine query, applying operations in
/// order.
///
/// Unknown operator codes and operations missing their operand are
/// rejected. Limit and offset parse leading digits like `strtol`;
/// negative or unparsable values become `0`.
pub fn make_query(predicates: &RdbPredicates) -> ServiceResult<Query> {
    let mut query = Query::select(predicates.table.as_str());
    for (index, operation) in predicates.operations.iter().enumerate() {
        let operator = operation.known_operator().ok_or_else(|| {
            ServiceError::InvalidPredicate(format!(
                "operation {index} has unknown operator {}",
                operation.operator
            ))
        })?;
        let operand = || {
            operation.values.first().map(String::as_str).ok_or_else(|| {
                ServiceError::InvalidPredicate(format!("operation {index} has no operand"))
            })
        };
        match operator {
            PredicateOperator::EqualTo => query.equal_to(operation.field.as_str(), operand()?),
            PredicateOperator::NotEqualTo => query.not_equal_to(operation.field.as_str(), operand()?),
            PredicateOperator::And => query.and(),
            PredicateOperator::Or => query.or(),
            PredicateOperator::OrderBy => query.order_by(operation.field.as_str(), operand()? == "true"),
            PredicateOperator::Limit => query.limit(parse_count(&operation.field), parse_count(operand()?)),
        };
    }
    Ok(query)
}

fn parse_count(text: &str) -> i32 {
    let text = text.trim_start();
    let (negative, rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if negative || digits.is_empty() {
        return 0;
    }
    digits
        .parse::<i64>()
        .map_or(i32::MAX, |value| i32::try_from(value).unwrap_or(i32::MAX))
}

/// Folds engine statuses into a result keyed by network id.
///
/// The first failing table decides a device's status. Devices without a
/// network id are left out.
pub fn handle_sync_status(devices: &dyn DeviceManager, status: DeviceSyncStatus) -> SyncResult {
    let mut result = SyncResult::new();
    for (uuid, tables) in status {
        let code = tables
            .iter()
            .map(|table| table.status)
            .find(|status| !status.is_ok())
            .unwrap_or(DbStatus::Ok);
        match devices.to_network_id(&uuid) {
            Some(network_id) if !network_id.is_empty() => {
                result.insert(network_id, code.code());
            }
            _ => warn!(device = %anonymize(&uuid), "no network id for device, dropped from result"),
        }
    }
    result
}

fn fill_meta_data(
    deps: &ServiceDeps,
    config: &ServiceConfig,
    param: &RdbSyncerParam,
    caller: &CallingIdentity,
    permissions: Permissions<'_>,
) -> ServiceResult<StoreMetaData> {
    let app_id = deps
        .checker
        .app_id(caller, &param.bundle_name)
        .filter(|app_id| !app_id.is_empty())
        .ok_or_else(|| ServiceError::AccessDenied(param.bundle_name.clone()))?;
    let user = deps.accounts.user_id(caller.uid);
    let data_dir = config
        .data_root
        .join(&user)
        .join(&param.bundle_name)
        .join("rdb")
        .join(&param.store_name);

    Ok(StoreMetaData {
        uid: caller.uid,
        token_id: caller.token_id,
        instance_id: 0,
        bundle_name: param.bundle_name.clone(),
        device_id: deps.devices.local_device().uuid,
        store_id: param.store_id().to_string(),
        user,
        store_type: param.store_type,
        security_level: param.level,
        area: param.area,
        app_id,
        app_type: config.app_type.clone(),
        hap_name: param.hap_name.clone(),
        data_dir: data_dir.to_string_lossy().into_owned(),
        account: deps.accounts.current_account(),
        is_encrypt: param.is_encrypt,
        write_permission: permissions.write.to_string(),
        read_permission: permissions.read.to_string(),
    })
}

fn create_meta_data(deps: &ServiceDeps, meta: &StoreMetaData, param: &RdbSyncerParam) -> ServiceResult<()> {
    let key = meta.get_key();
    if let Some(old) = deps.meta.load_meta::<StoreMetaData>(&key)? {
        if old.store_type != meta.store_type || old.is_encrypt != meta.is_encrypt || old.area != meta.area {
            warn!(
                store = %meta.store_id,
                old_type = old.store_type,
                new_type = meta.store_type,
                old_encrypt = old.is_encrypt,
                new_encrypt = meta.is_encrypt,
                old_area = old.area,
                new_area = meta.area,
                "store metadata conflict"
            );
            return Err(ServiceError::MetaConflict(meta.store_id.clone()));
        }
    }
    deps.meta.save_meta(&key, meta)?;
    let app = AppIdMetaData {
        bundle_name: meta.bundle_name.clone(),
        app_id: meta.app_id.clone(),
    };
    deps.meta.save_meta(&app.get_key(), &app)?;

    if meta.is_encrypt && param.has_password() {
        let secret = SecretKeyMetaData {
            store_type: meta.store_type,
            s_key: deps.crypto.encrypt(&param.password)?,
            time: now_secs(),
        };
        deps.meta.save_meta(&meta.get_secret_key(), &secret)?;
    }
    Ok(())
}

fn open_delegate(
    deps: &ServiceDeps,
    config: &ServiceConfig,
    meta: &StoreMetaData,
    observer: Arc<dyn StoreObserver>,
) -> ServiceResult<Box<dyn RelationalStoreDelegate>> {
    let property = StoreProperty::new(&meta.user, &meta.app_id, &meta.store_id);
    let mut option = StoreOption {
        observer: Some(observer),
        ..StoreOption::default()
    };
    if meta.is_encrypt {
        option.is_encrypted = true;
        option.password = RdbSyncer::password(deps, meta)?;
        option.iterate_times = config.iterate_times;
        option.cipher = CipherType::Aes256Gcm;
    }
    deps.store_manager
        .open_store(&property, Path::new(&meta.data_dir), option)
        .map_err(|err| {
            warn!(store = %meta.store_id, error = %err, "engine refused to open store");
            ServiceError::InitFailed(err.to_string())
        })
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{caller, deps};
    use proptest::prelude::*;
    use rdbsync_protocol::{RdbPredicateOperation, SyncMode as ProtocolMode, OPERATOR_MAX};
    use rdbsync_store::{QueryClause, StaticDeviceManager, StoreChangedData};

    struct Silent;

    impl StoreObserver for Silent {
        fn on_change(&self, _data: &StoreChangedData) {}
    }

    fn open(deps: &ServiceDeps, param: RdbSyncerParam) -> ServiceResult<RdbSyncer> {
        RdbSyncer::open(
            deps,
            &ServiceConfig::new("/data"),
            1,
            param,
            caller(10),
            Permissions::default(),
            Arc::new(Silent),
        )
    }

    #[test]
    fn query_translation_keeps_order() {
        let predicates = RdbPredicates::new("employee")
            .equal_to("name", "Bob")
            .or()
            .not_equal_to("age", "7")
            .order_by("age", false)
            .limit(10, 5);
        let query = make_query(&predicates).unwrap();
        assert_eq!(query.table(), "employee");
        assert_eq!(
            query.clauses(),
            &[
                QueryClause::EqualTo { field: "name".into(), value: "Bob".into() },
                QueryClause::Or,
                QueryClause::NotEqualTo { field: "age".into(), value: "7".into() },
                QueryClause::OrderBy { field: "age".into(), ascending: false },
                QueryClause::Limit { limit: 10, offset: 5 },
            ]
        );
    }

    #[test]
    fn reordered_limits_change_the_query() {
        let narrow_first = make_query(&RdbPredicates::new("t").limit(1, 0).limit(5, 2)).unwrap();
        let wide_first = make_query(&RdbPredicates::new("t").limit(5, 2).limit(1, 0)).unwrap();
        assert_ne!(narrow_first.clauses(), wide_first.clauses());
        assert_eq!(
            narrow_first.clauses(),
            &[
                QueryClause::Limit { limit: 1, offset: 0 },
                QueryClause::Limit { limit: 5, offset: 2 },
            ]
        );
    }

    #[test]
    fn unknown_operator_rejected() {
        for code in [6, -1, 42] {
            let predicates = RdbPredicates::new("t")
                .and()
                .with_operation(RdbPredicateOperation {
                    operator: code,
                    field: "f".into(),
                    values: vec!["v".into()],
                });
            assert!(matches!(make_query(&predicates), Err(ServiceError::InvalidPredicate(_))));
        }
    }

    #[test]
    fn missing_operand_rejected() {
        let predicates = RdbPredicates::new("t").with_operation(RdbPredicateOperation {
            operator: PredicateOperator::EqualTo.code(),
            field: "f".into(),
            values: Vec::new(),
        });
        assert!(make_query(&predicates).is_err());
    }

    fn known_operation() -> impl Strategy<Value = RdbPredicateOperation> {
        (0..OPERATOR_MAX, "[a-z0-9]{1,6}", "[a-z0-9]{0,4}|true").prop_map(|(operator, field, value)| {
            RdbPredicateOperation {
                operator,
                field,
                values: vec![value],
            }
        })
    }

    proptest! {
        #[test]
        fn one_clause_per_operation(operations in prop::collection::vec(known_operation(), 0..24)) {
            let mut predicates = RdbPredicates::new("t");
            for operation in &operations {
                predicates = predicates.with_operation(operation.clone());
            }
            let query = make_query(&predicates).unwrap();
            prop_assert_eq!(query.clauses().len(), operations.len());
            for (clause, operation) in query.clauses().iter().zip(&operations) {
                let field = operation.field.clone();
                let value = operation.values[0].clone();
                let expected = match operation.known_operator().unwrap() {
                    PredicateOperator::EqualTo => QueryClause::EqualTo { field, value },
                    PredicateOperator::NotEqualTo => QueryClause::NotEqualTo { field, value },
                    PredicateOperator::And => QueryClause::And,
                    PredicateOperator::Or => QueryClause::Or,
                    PredicateOperator::OrderBy => QueryClause::OrderBy { field, ascending: value == "true" },
                    PredicateOperator::Limit => QueryClause::Limit {
                        limit: parse_count(&field),
                        offset: parse_count(&value),
                    },
                };
                prop_assert_eq!(clause, &expected);
            }
        }

        #[test]
        fn swapping_distinct_operations_changes_the_query(
            operations in prop::collection::vec(known_operation(), 2..12),
            first in 0usize..12,
            second in 0usize..12,
        ) {
            let (first, second) = (first % operations.len(), second % operations.len());
            let build = |operations: &[RdbPredicateOperation]| {
                let predicates = operations
                    .iter()
                    .cloned()
                    .fold(RdbPredicates::new("t"), RdbPredicates::with_operation);
                make_query(&predicates).unwrap()
            };
            let original = build(&operations);
            let mut swapped_operations = operations.clone();
            swapped_operations.swap(first, second);
            let swapped = build(&swapped_operations);
            if original.clauses()[first] != original.clauses()[second] {
                prop_assert_ne!(original.clauses(), swapped.clauses());
            } else {
                prop_assert_eq!(original.clauses(), swapped.clauses());
            }
        }

        #[test]
        fn unknown_operator_anywhere_rejects(
            operations in prop::collection::vec(known_operation(), 0..8),
            position in 0usize..8,
            operator in prop_oneof![i32::MIN..0, OPERATOR_MAX..i32::MAX],
        ) {
            let mut operations = operations;
            let position = position.min(operations.len());
            operations.insert(position, RdbPredicateOperation { operator, field: "f".into(), values: vec!["v".into()] });
            let mut predicates = RdbPredicates::new("t");
            for operation in operations {
                predicates = predicates.with_operation(operation);
            }
            prop_assert!(make_query(&predicates).is_err());
        }
    }

    #[test]
    fn limit_parsing() {
        assert_eq!(parse_count("15"), 15);
        assert_eq!(parse_count(" 12abc"), 12);
        assert_eq!(parse_count("-3"), 0);
        assert_eq!(parse_count("abc"), 0);
        assert_eq!(parse_count(""), 0);
        assert_eq!(parse_count("99999999999999999999"), i32::MAX);
    }

    #[test]
    fn sync_status_folding() {
        let devices = StaticDeviceManager::new(rdbsync_store::DeviceInfo::new("local", "local-net"));
        devices.add_device(rdbsync_store::DeviceInfo::new("uuid-a", "net-a"), true);
        let mut status = DeviceSyncStatus::new();
        status.insert(
            "uuid-a".into(),
            vec![
                rdbsync_store::TableStatus::new("t1", DbStatus::Ok),
                rdbsync_store::TableStatus::new("t2", DbStatus::TimeOut),
                rdbsync_store::TableStatus::new("t3", DbStatus::Busy),
            ],
        );
        status.insert("uuid-unknown".into(), vec![]);
        let result = handle_sync_status(&devices, status);
        assert_eq!(result.len(), 1);
        assert_eq!(result.get("net-a"), Some(DbStatus::TimeOut.code()));
    }

    #[test]
    fn open_records_metadata() {
        let (deps, engine) = deps();
        let syncer = open(&deps, RdbSyncerParam::new("com.example.notes", "notes.db").with_area(1)).unwrap();
        assert_eq!(syncer.store_id(), "notes");
        let meta: StoreMetaData = deps.meta.load_meta(&syncer.meta().get_key()).unwrap().unwrap();
        assert_eq!(meta.bundle_name, "com.example.notes");
        assert_eq!(meta.user, "0");
        assert_eq!(meta.area, 1);
        assert_eq!(meta.app_type, "harmony");
        assert!(meta.data_dir.ends_with("notes.db"));
        let app: AppIdMetaData = deps
            .meta
            .load_meta("AppIdMeta###com.example.notes")
            .unwrap()
            .unwrap();
        assert_eq!(app.app_id, meta.app_id);
        assert_eq!(engine.live_count(), 1);
        drop(syncer);
        assert_eq!(engine.live_count(), 0);
    }

    #[test]
    fn conflicting_metadata_rejected() {
        let (deps, _engine) = deps();
        drop(open(&deps, RdbSyncerParam::new("com.example.notes", "notes.db").with_area(1)).unwrap());
        let err = open(&deps, RdbSyncerParam::new("com.example.notes", "notes.db").with_area(2)).unwrap_err();
        assert!(matches!(err, ServiceError::MetaConflict(_)));
    }

    #[test]
    fn encrypted_store_password_is_sealed() {
        let (deps, engine) = deps();
        let param = RdbSyncerParam::new("com.example.notes", "vault.db").with_password(b"pw-1".to_vec());
        let syncer = open(&deps, param).unwrap();
        assert!(syncer.param().password.is_empty());

        let secret: SecretKeyMetaData = deps
            .meta
            .load_meta(&syncer.meta().get_secret_key())
            .unwrap()
            .unwrap();
        assert_ne!(secret.s_key, b"pw-1");
        assert_eq!(RdbSyncer::password(&deps, syncer.meta()).unwrap().as_bytes(), b"pw-1");

        let record = &engine.opened()[0];
        assert!(record.encrypted);
        assert_eq!(record.password, b"pw-1");
        assert_eq!(record.iterate_times, 10_000);

        // reopening without the password reuses the sealed one
        drop(syncer);
        let param = RdbSyncerParam::new("com.example.notes", "vault.db").with_encrypt(true);
        assert!(open(&deps, param).is_ok());
        assert_eq!(engine.opened()[1].password, b"pw-1");
    }

    #[test]
    fn encrypted_store_without_any_password_fails() {
        let (deps, _engine) = deps();
        let param = RdbSyncerParam::new("com.example.notes", "vault.db").with_encrypt(true);
        assert!(open(&deps, param).is_err());
    }

    #[test]
    fn blocking_sync_maps_devices() {
        let (deps, engine) = deps();
        engine.set_device_status("uuid-b", DbStatus::TimeOut);
        let syncer = open(&deps, RdbSyncerParam::new("com.example.notes", "notes.db")).unwrap();
        let result = syncer
            .do_sync(
                &SyncOption::blocking(ProtocolMode::Push),
                &RdbPredicates::new("employee").in_devices(["net-a", "net-b", "net-x"]),
            )
            .unwrap();
        assert_eq!(result.get("net-a"), Some(0));
        assert_eq!(result.get("net-b"), Some(DbStatus::TimeOut.code()));
        assert_eq!(result.len(), 2);
        let call = &engine.sync_calls()[0];
        assert_eq!(call.devices, ["uuid-a", "uuid-b"]);
        assert_eq!(call.mode, SyncMode::PushOnly);
    }

    #[test]
    fn all_online_devices_when_none_given() {
        let (deps, engine) = deps();
        let syncer = open(&deps, RdbSyncerParam::new("com.example.notes", "notes.db")).unwrap();
        syncer
            .do_sync(&SyncOption::blocking(ProtocolMode::Pull), &RdbPredicates::new("t"))
            .unwrap();
        assert_eq!(engine.sync_calls()[0].devices, ["uuid-a", "uuid-b"]);
    }

    #[test]
    fn async_sync_delivers_once() {
        let (deps, engine) = deps();
        engine.set_completion_mode(rdbsync_store::CompletionMode::Deferred);
        let syncer = open(&deps, RdbSyncerParam::new("com.example.notes", "notes.db")).unwrap();
        let (tx, rx) = mpsc::channel();
        syncer
            .do_async(
                &SyncOption::asynchronous(ProtocolMode::PushPull),
                &RdbPredicates::new("t").in_devices(["net-a"]),
                Box::new(move |result| tx.send(result).unwrap()),
            )
            .unwrap();
        assert!(rx.try_recv().is_err());
        engine.release_pending();
        assert_eq!(rx.try_recv().unwrap().get("net-a"), Some(0));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn remote_query_uses_timeout_and_uuid() {
        let (deps, engine) = deps();
        engine.set_remote_rows("uuid-a", vec!["id".into()], vec![]);
        let syncer = open(&deps, RdbSyncerParam::new("com.example.notes", "notes.db")).unwrap();
        let rows = syncer.remote_query("net-a", "SELECT id FROM t", &[]).unwrap();
        assert_eq!(rows.row_count().unwrap(), 0);
        let call = &engine.remote_query_calls()[0];
        assert_eq!(call.device, "uuid-a");
        assert_eq!(call.timeout, Duration::from_secs(30));
        assert!(matches!(
            syncer.remote_query("net-x", "SELECT 1", &[]),
            Err(ServiceError::UnknownDevice(_))
        ));
    }

    #[test]
    fn destroy_removes_metadata() {
        let (deps, _engine) = deps();
        let param = RdbSyncerParam::new("com.example.notes", "notes.db");
        let key = open(&deps, param.clone()).unwrap().meta().get_key();
        RdbSyncer::destroy_meta_data(&deps, &ServiceConfig::new("/data"), &param, &caller(10)).unwrap();
        assert!(deps.meta.load_meta::<StoreMetaData>(&key).unwrap().is_none());
    }

    #[test]
    fn distributed_tables_stop_at_first_failure() {
        let (deps, engine) = deps();
        engine.set_schema(["a", "c"]);
        let syncer = open(&deps, RdbSyncerParam::new("com.example.notes", "notes.db")).unwrap();
        let tables = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert!(syncer.set_distributed_tables(&tables).is_err());
        assert_eq!(engine.distributed_tables().len(), 1);
    }
}
