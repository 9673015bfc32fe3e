//! Client and service talking through in-process IPC handles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use proptest::prelude::*;
use rdbsync_client::{ClientError, RdbStoreObserver};
use rdbsync_ipc::Parcel;
use rdbsync_protocol::{
    RdbPredicateOperation, RdbPredicates, RdbStatus, SubscribeOption, SyncMode, SyncOption,
    SyncResult,
};
use rdbsync_service::ServiceConfig;
use rdbsync_store::{
    distributed_table_name, ColumnValue, CompletionMode, DbStatus, StoreMetaData,
};
use rdbsync_testkit::prelude::*;

const WAIT: Duration = Duration::from_secs(5);

fn push() -> SyncOption {
    SyncOption::blocking(SyncMode::Push)
}

#[test]
fn blocking_sync_reports_every_peer() {
    let bed = TestBed::new();
    let client = bed.client(100);
    let result = client
        .proxy
        .do_sync(&test_param("notes.db"), &push(), &RdbPredicates::new("notes"))
        .unwrap();
    assert_eq!(result.len(), 2);
    assert!(result.all_succeeded());
    assert_eq!(bed.engine.sync_calls()[0].store_id, "notes");
}

#[test]
fn partial_failure_is_reported_per_device() {
    let bed = TestBed::new();
    bed.engine.set_device_status("uuid-b", DbStatus::TimeOut);
    let client = bed.client(101);
    let result = client
        .proxy
        .do_sync(
            &test_param("notes.db"),
            &push(),
            &RdbPredicates::new("notes").in_devices(["net-a", "net-b"]),
        )
        .unwrap();
    assert_eq!(result.get("net-a"), Some(DbStatus::Ok.code()));
    assert_eq!(result.get("net-b"), Some(DbStatus::TimeOut.code()));
    assert!(!result.all_succeeded());
}

#[test]
fn repeated_syncs_reuse_one_store() {
    let bed = TestBed::new();
    let client = bed.client(102);
    let predicates = RdbPredicates::new("notes").in_devices(["net-a"]);
    let first = client.proxy.do_sync(&test_param("notes.db"), &push(), &predicates).unwrap();
    let second = client.proxy.do_sync(&test_param("notes.db"), &push(), &predicates).unwrap();
    assert_eq!(first, second);
    assert_eq!(bed.engine.open_count(), 1);
    assert_eq!(bed.service.syncer_count_of(102), 1);
    assert_eq!(bed.engine.sync_calls().len(), 2);
}

#[test]
fn concurrent_first_use_opens_one_store() {
    let bed = TestBed::new();
    let client = bed.client(103);
    let failures = AtomicUsize::new(0);
    thread::scope(|scope| {
        for _ in 0..8 {
            scope.spawn(|| {
                let outcome = client.proxy.do_sync(
                    &test_param("notes.db"),
                    &push(),
                    &RdbPredicates::new("notes").in_devices(["net-a"]),
                );
                if outcome.is_err() {
                    failures.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
    });
    assert_eq!(failures.load(Ordering::SeqCst), 0);
    assert_eq!(bed.engine.open_count(), 1);
    assert_eq!(bed.service.syncer_count(), 1);
}

#[test]
fn predicates_reach_the_engine_in_order() {
    let bed = TestBed::new();
    let client = bed.client(104);
    let predicates = RdbPredicates::new("notes")
        .in_devices(["net-a"])
        .equal_to("owner", "alice")
        .and()
        .not_equal_to("state", "draft")
        .order_by("updated", false)
        .limit(10, 20);
    client.proxy.do_sync(&test_param("notes.db"), &push(), &predicates).unwrap();

    let calls = bed.engine.sync_calls();
    let query = &calls[0].query;
    assert_eq!(query.table(), "notes");
    assert_eq!(query.clauses().len(), predicates.operations.len());
    assert_eq!(calls[0].devices, vec!["uuid-a".to_string()]);
}

#[test]
fn unknown_operator_never_reaches_the_engine() {
    let bed = TestBed::new();
    let client = bed.client(105);
    let predicates = RdbPredicates::new("notes")
        .equal_to("owner", "alice")
        .with_operation(RdbPredicateOperation {
            operator: 42,
            field: "owner".into(),
            values: vec!["bob".into()],
        });
    let err = client
        .proxy
        .do_sync(&test_param("notes.db"), &push(), &predicates)
        .unwrap_err();
    assert_eq!(err.status(), RdbStatus::Error);
    assert!(bed.engine.sync_calls().is_empty());
}

#[tokio::test]
async fn async_sync_completes_through_notifier() {
    let bed = TestBed::new();
    let client = bed.client(106);
    client.proxy.init_notifier(&test_param("notes.db")).unwrap();
    let result = client
        .proxy
        .sync_async(
            &test_param("notes.db"),
            SyncMode::Pull,
            &RdbPredicates::new("notes").in_devices(["net-b"]),
        )
        .await
        .unwrap();
    assert_eq!(result.get("net-b"), Some(0));
    assert_eq!(client.proxy.pending_syncs(), 0);
}

#[test]
fn sync_callback_runs_once_per_request() {
    let bed = TestBed::new();
    bed.engine.set_completion_mode(CompletionMode::Deferred);
    let client = bed.client(107);
    client.proxy.init_notifier(&test_param("notes.db")).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let calls = Arc::clone(&calls);
        client
            .proxy
            .sync(
                &test_param("notes.db"),
                &SyncOption::asynchronous(SyncMode::Push),
                &RdbPredicates::new("notes"),
                Box::new(move |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
    }
    assert_eq!(client.proxy.pending_syncs(), 3);
    assert_eq!(bed.engine.release_pending(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(client.proxy.pending_syncs(), 0);
}

#[test]
fn dead_client_is_cleaned_up() {
    let bed = TestBed::new();
    let client = bed.client(108);
    client.proxy.init_notifier(&test_param("notes.db")).unwrap();
    client
        .proxy
        .do_sync(&test_param("notes.db"), &push(), &RdbPredicates::new("notes"))
        .unwrap();
    client
        .proxy
        .do_sync(&test_param("todo.db"), &push(), &RdbPredicates::new("todo"))
        .unwrap();
    assert_eq!(bed.service.syncer_count_of(108), 2);

    client.kill();
    assert!(wait_until(WAIT, || bed.service.syncer_count_of(108) == 0));
    assert!(!bed.service.has_notifier(108));
    assert!(wait_until(WAIT, || bed.engine.live_count() == 0));

    let err = client
        .proxy
        .do_sync(&test_param("notes.db"), &push(), &RdbPredicates::new("notes"))
        .unwrap_err();
    assert!(matches!(err, ClientError::Ipc(_)));
}

#[test]
fn completion_after_death_is_dropped() {
    let bed = TestBed::new();
    bed.engine.set_completion_mode(CompletionMode::Deferred);
    let client = bed.client(109);
    client.proxy.init_notifier(&test_param("notes.db")).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    client
        .proxy
        .sync(
            &test_param("notes.db"),
            &SyncOption::asynchronous(SyncMode::Push),
            &RdbPredicates::new("notes"),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    client.kill();
    assert!(wait_until(WAIT, || !bed.service.has_notifier(109)));
    assert_eq!(bed.engine.release_pending(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn remote_changes_reach_subscribed_observers() {
    let bed = TestBed::new();
    let client = bed.client(110);
    let param = test_param("notes.db");
    client.proxy.init_notifier(&param).unwrap();
    let observer = RecordingObserver::new();
    let handle: Arc<dyn RdbStoreObserver> = observer.clone();
    client
        .proxy
        .subscribe(&param, &SubscribeOption::remote(), Arc::clone(&handle))
        .unwrap();
    assert!(bed.service.is_subscribed(110, "notes"));

    assert_eq!(bed.engine.emit_change("notes", "uuid-a"), 1);
    assert_eq!(observer.changes(), vec![vec!["net-a".to_string()]]);

    client
        .proxy
        .unsubscribe(&param, &SubscribeOption::remote(), &handle)
        .unwrap();
    assert!(!bed.service.is_subscribed(110, "notes"));
}

#[test]
fn changes_only_reach_the_owning_process() {
    let bed = TestBed::new();
    let owner = bed.client(111);
    let other = bed.client(112);
    for client in [&owner, &other] {
        client.proxy.init_notifier(&test_param("notes.db")).unwrap();
    }
    let owner_observer = RecordingObserver::new();
    let other_observer = RecordingObserver::new();
    owner
        .proxy
        .subscribe(&test_param("notes.db"), &SubscribeOption::remote(), owner_observer.clone())
        .unwrap();
    other
        .proxy
        .subscribe(&test_param("todo.db"), &SubscribeOption::remote(), other_observer.clone())
        .unwrap();

    bed.engine.emit_change("notes", "uuid-b");
    assert_eq!(owner_observer.changes(), vec![vec!["net-b".to_string()]]);
    assert!(other_observer.changes().is_empty());
}

#[test]
fn local_subscription_is_rejected() {
    let bed = TestBed::new();
    let client = bed.client(113);
    let err = client
        .proxy
        .subscribe(&test_param("notes.db"), &SubscribeOption::local(), RecordingObserver::new())
        .unwrap_err();
    assert_eq!(err.status(), RdbStatus::NotSupported);
    assert_eq!(bed.service.syncer_count(), 0);
}

#[test]
fn remote_query_reads_rows() {
    let bed = TestBed::new();
    bed.engine.set_remote_rows(
        "uuid-a",
        vec!["id".into(), "title".into()],
        vec![
            vec![ColumnValue::Integer(1), ColumnValue::Text("groceries".into())],
            vec![ColumnValue::Integer(2), ColumnValue::Null],
        ],
    );
    let client = bed.client(114);
    let rows = client
        .proxy
        .remote_query(&test_param("notes.db"), "net-a", "SELECT id, title FROM notes", &[])
        .unwrap();
    assert_eq!(rows.column_names().unwrap(), ["id", "title"]);
    assert_eq!(rows.row_count().unwrap(), 2);
    rows.go_to_row(0).unwrap();
    assert_eq!(rows.get_long(0).unwrap(), 1);
    assert_eq!(rows.get_string(1).unwrap(), "groceries");
    rows.go_to(1).unwrap();
    assert!(rows.is_null(1).unwrap());
    assert!(matches!(rows.get_long(-1).unwrap_err(), ClientError::ResultSet(code) if code == DbStatus::InvalidArgs.code()));
    rows.close().unwrap();

    let calls = bed.engine.remote_query_calls();
    assert_eq!(calls[0].device, "uuid-a");
}

#[test]
fn remote_query_failure_carries_engine_status() {
    let bed = TestBed::new();
    bed.engine.set_remote_failure("uuid-a", DbStatus::CommError);
    let client = bed.client(115);
    let err = client
        .proxy
        .remote_query(&test_param("notes.db"), "net-a", "SELECT 1", &[])
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::RemoteQuery { status: RdbStatus::Error, engine } if engine == DbStatus::CommError.code()
    ));
}

#[test]
fn table_name_uses_peer_uuid() {
    let bed = TestBed::new();
    let client = bed.client(116);
    assert_eq!(
        client.proxy.obtain_distributed_table_name("net-a", "notes").unwrap(),
        distributed_table_name("uuid-a", "notes")
    );
    assert_eq!(client.proxy.obtain_distributed_table_name("net-x", "notes").unwrap(), "");
}

#[test]
fn distributed_tables_are_set_on_the_store() {
    let bed = TestBed::new();
    let client = bed.client(117);
    client
        .proxy
        .set_distributed_tables(&test_param("notes.db"), &["notes".to_string(), "tags".to_string()])
        .unwrap();
    assert_eq!(
        bed.engine.distributed_tables(),
        vec![("notes".to_string(), "notes".to_string()), ("notes".to_string(), "tags".to_string())]
    );
}

#[test]
fn created_table_leaves_metadata_only() {
    let bed = TestBed::on_disk();
    let client = bed.client(118);
    let param = test_param("notes.db");
    client.proxy.create_rdb_table(&param, "ohos.permission.WRITE", "ohos.permission.READ").unwrap();
    assert_eq!(bed.engine.open_count(), 1);
    assert_eq!(bed.engine.live_count(), 0);
    assert_eq!(bed.service.syncer_count(), 0);

    let prefix = StoreMetaData::get_prefix(&[LOCAL_UUID]);
    let stored: Vec<StoreMetaData> = bed.meta.load_prefix(&prefix).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].store_id, "notes");

    client.proxy.destroy_rdb_table(&param).unwrap();
    let stored: Vec<StoreMetaData> = bed.meta.load_prefix(&prefix).unwrap();
    assert!(stored.is_empty());
}

#[test]
fn encrypted_store_opens_with_password() {
    let bed = TestBed::new();
    let client = bed.client(119);
    let param = test_param("vault.db").with_password(b"correct horse".to_vec());
    client
        .proxy
        .do_sync(&param, &push(), &RdbPredicates::new("secrets"))
        .unwrap();
    let opened = bed.engine.opened();
    assert!(opened[0].encrypted);
    assert_eq!(opened[0].password, b"correct horse");
}

#[test]
fn per_process_cap_is_enforced() {
    let bed = TestBed::with_config(ServiceConfig::new("/data/rdbsync").with_max_syncer_per_process(2));
    let client = bed.client(120);
    for store in ["a.db", "b.db"] {
        client
            .proxy
            .do_sync(&test_param(store), &push(), &RdbPredicates::new("t"))
            .unwrap();
    }
    let err = client
        .proxy
        .do_sync(&test_param("c.db"), &push(), &RdbPredicates::new("t"))
        .unwrap_err();
    assert_eq!(err.status(), RdbStatus::Error);

    let neighbour = bed.client(121);
    neighbour
        .proxy
        .do_sync(&test_param("c.db"), &push(), &RdbPredicates::new("t"))
        .unwrap();
}

#[test]
fn observers_survive_a_service_restart() {
    let first = TestBed::new();
    let before = first.client(122);
    before.proxy.init_notifier(&test_param("notes.db")).unwrap();
    let observer = RecordingObserver::new();
    before
        .proxy
        .subscribe(&test_param("notes.db"), &SubscribeOption::remote(), observer.clone())
        .unwrap();

    let second = TestBed::new();
    let after = second.client(122);
    after.proxy.init_notifier(&test_param("notes.db")).unwrap();
    assert_eq!(after.proxy.import_observers(before.proxy.export_observers()), 1);

    second.engine.emit_change("notes", "uuid-a");
    assert_eq!(observer.changes(), vec![vec!["net-a".to_string()]]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn sync_result_survives_the_wire(result in sync_result_strategy()) {
        let mut parcel = Parcel::new();
        parcel.write(&result).unwrap();
        let decoded: SyncResult = parcel.read().unwrap();
        prop_assert_eq!(decoded, result);
    }

    #[test]
    fn any_unknown_operator_is_rejected(code in unknown_operator_strategy()) {
        let bed = TestBed::new();
        let client = bed.client(130);
        let predicates = RdbPredicates::new("notes").with_operation(RdbPredicateOperation {
            operator: code,
            field: "f".into(),
            values: vec!["v".into()],
        });
        let outcome = client.proxy.do_sync(&test_param("notes.db"), &push(), &predicates);
        prop_assert!(outcome.is_err());
        prop_assert!(bed.engine.sync_calls().is_empty());
    }

    #[test]
    fn well_formed_predicates_keep_their_clause_count(
        predicates in predicates_strategy("notes", vec!["net-a".to_string()])
    ) {
        let bed = TestBed::new();
        let client = bed.client(131);
        client.proxy.do_sync(&test_param("notes.db"), &push(), &predicates).unwrap();
        let calls = bed.engine.sync_calls();
        prop_assert_eq!(calls[0].query.clauses().len(), predicates.operations.len());
    }
}
