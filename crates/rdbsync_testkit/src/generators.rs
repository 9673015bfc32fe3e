//! Property-based test generators using proptest.

use proptest::prelude::*;
use rdbsync_protocol::{
    PredicateOperator, RdbPredicateOperation, RdbPredicates, RdbSyncerParam, SyncMode, SyncOption,
    SyncResult, OPERATOR_MAX,
};

/// Strategy for store names, some with a `.db` suffix.
pub fn store_name_strategy() -> impl Strategy<Value = String> {
    (
        prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex"),
        any::<bool>(),
    )
        .prop_map(|(name, suffix)| if suffix { format!("{name}.db") } else { name })
}

/// Strategy for bundle names.
pub fn bundle_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("com\\.[a-z]{1,8}\\.[a-z]{1,8}").expect("Invalid regex")
}

/// Strategy for column names.
pub fn field_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for device network ids.
pub fn network_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("net-[a-z0-9]{1,8}").expect("Invalid regex")
}

/// Strategy for unencrypted syncer parameters.
pub fn syncer_param_strategy() -> impl Strategy<Value = RdbSyncerParam> {
    (bundle_name_strategy(), store_name_strategy(), 0..4i32, 0..4i32, any::<bool>()).prop_map(
        |(bundle, store, area, level, auto_sync)| {
            RdbSyncerParam::new(bundle, store)
                .with_area(area)
                .with_level(level)
                .with_auto_sync(auto_sync)
        },
    )
}

/// Strategy for sync directions.
pub fn sync_mode_strategy() -> impl Strategy<Value = SyncMode> {
    prop_oneof![Just(SyncMode::Push), Just(SyncMode::Pull), Just(SyncMode::PushPull)]
}

/// Strategy for sync options.
pub fn sync_option_strategy() -> impl Strategy<Value = SyncOption> {
    (sync_mode_strategy(), any::<bool>()).prop_map(|(mode, is_block)| SyncOption::new(mode, is_block))
}

/// Strategy for well-formed predicate operations of every known operator.
pub fn operation_strategy() -> impl Strategy<Value = RdbPredicateOperation> {
    let value = || prop::string::string_regex("[a-zA-Z0-9]{0,8}").expect("Invalid regex");
    prop_oneof![
        (field_strategy(), value())
            .prop_map(|(field, v)| RdbPredicateOperation::new(PredicateOperator::EqualTo, field, vec![v])),
        (field_strategy(), value())
            .prop_map(|(field, v)| RdbPredicateOperation::new(PredicateOperator::NotEqualTo, field, vec![v])),
        Just(RdbPredicateOperation::new(PredicateOperator::And, "", Vec::new())),
        Just(RdbPredicateOperation::new(PredicateOperator::Or, "", Vec::new())),
        (field_strategy(), any::<bool>()).prop_map(|(field, asc)| {
            RdbPredicateOperation::new(PredicateOperator::OrderBy, field, vec![asc.to_string()])
        }),
        (0..1000i32, 0..1000i32).prop_map(|(limit, offset)| {
            RdbPredicateOperation::new(PredicateOperator::Limit, limit.to_string(), vec![offset.to_string()])
        }),
    ]
}

/// Strategy for operator codes no engine knows.
pub fn unknown_operator_strategy() -> impl Strategy<Value = i32> {
    prop_oneof![i32::MIN..0, OPERATOR_MAX..i32::MAX]
}

/// Strategy for well-formed predicates over `table`, limited to the given
/// devices.
pub fn predicates_strategy(
    table: &'static str,
    devices: Vec<String>,
) -> impl Strategy<Value = RdbPredicates> {
    prop::collection::vec(operation_strategy(), 0..8).prop_map(move |operations| {
        operations.into_iter().fold(
            RdbPredicates::new(table).in_devices(devices.clone()),
            RdbPredicates::with_operation,
        )
    })
}

/// Strategy for per-device sync results.
pub fn sync_result_strategy() -> impl Strategy<Value = SyncResult> {
    prop::collection::hash_map(network_id_strategy(), -1..10i32, 0..6).prop_map(SyncResult::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_operations_are_known(operation in operation_strategy()) {
            prop_assert!(operation.known_operator().is_some());
        }

        #[test]
        fn unknown_operators_are_out_of_range(code in unknown_operator_strategy()) {
            prop_assert!(PredicateOperator::from_code(code).is_none());
        }

        #[test]
        fn store_ids_drop_suffix(param in syncer_param_strategy()) {
            prop_assert!(!param.store_id().ends_with(".db"));
            prop_assert!(!param.has_password());
        }
    }
}
