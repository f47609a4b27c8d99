//! Property-based tests for value binding, query compilation and paging

use chrono::{DateTime, Duration, NaiveDateTime};
use proptest::prelude::*;
use rusqlite::types::ValueRef;
use rust_sqlite_orm::backends::ValueBinder;
use rust_sqlite_orm::core::value::{duration_from_ticks, duration_to_ticks, StoragePolicy};
use rust_sqlite_orm::core::{compile_predicate, TableMapping};
use rust_sqlite_orm::impl_record;
use rust_sqlite_orm::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

fn policies() -> impl Strategy<Value = StoragePolicy> {
    (any::<bool>(), any::<bool>()).prop_map(|(ticks, blob)| StoragePolicy {
        store_date_time_as_ticks: ticks,
        store_guid_as_blob: blob,
    })
}

fn date_time() -> impl Strategy<Value = NaiveDateTime> {
    // 1900-01-01 through 2199-12-31, at 100ns resolution
    (-2_208_988_800i64..7_258_118_400i64, 0u32..10_000_000).prop_map(|(secs, sub)| {
        DateTime::from_timestamp(secs, sub * 100)
            .expect("in range")
            .naive_utc()
    })
}

fn duration() -> impl Strategy<Value = Duration> {
    (-1_000_000_000_000_000i64..1_000_000_000_000_000i64).prop_map(duration_from_ticks)
}

fn finite_f64() -> impl Strategy<Value = f64> {
    any::<f64>().prop_filter("finite", |v| v.is_finite())
}

/// Every semantic value paired with the declared type it is read back as
fn typed_value() -> impl Strategy<Value = (FieldValue, ColumnType)> {
    prop_oneof![
        any::<bool>().prop_map(|v| (FieldValue::Bool(v), ColumnType::Bool)),
        any::<i8>().prop_map(|v| (FieldValue::I8(v), ColumnType::I8)),
        any::<i16>().prop_map(|v| (FieldValue::I16(v), ColumnType::I16)),
        any::<i32>().prop_map(|v| (FieldValue::I32(v), ColumnType::I32)),
        any::<i64>().prop_map(|v| (FieldValue::I64(v), ColumnType::I64)),
        any::<u8>().prop_map(|v| (FieldValue::U8(v), ColumnType::U8)),
        any::<u16>().prop_map(|v| (FieldValue::U16(v), ColumnType::U16)),
        any::<u32>().prop_map(|v| (FieldValue::U32(v), ColumnType::U32)),
        any::<f32>()
            .prop_filter("finite", |v| v.is_finite())
            .prop_map(|v| (FieldValue::F32(v), ColumnType::F32)),
        finite_f64().prop_map(|v| (FieldValue::F64(v), ColumnType::F64)),
        "\\PC{0,40}".prop_map(|v| (FieldValue::Text(v), ColumnType::Text)),
        prop::collection::vec(any::<u8>(), 0..64)
            .prop_map(|v| (FieldValue::Bytes(v), ColumnType::Bytes)),
        any::<i64>().prop_map(|v| (FieldValue::Enum(v), ColumnType::Enum("Level".into()))),
        date_time().prop_map(|v| (FieldValue::DateTime(v), ColumnType::DateTime)),
        duration().prop_map(|v| (FieldValue::Duration(v), ColumnType::Duration)),
        any::<u128>().prop_map(|v| (FieldValue::Guid(Uuid::from_u128(v)), ColumnType::Guid)),
        any::<i64>().prop_map(|v| (
            FieldValue::Serialized {
                type_name: "Money".into(),
                value: Box::new(FieldValue::I64(v)),
            },
            ColumnType::Serialized {
                type_name: "Money".into(),
                primitive: Box::new(ColumnType::I64),
            },
        )),
        prop::collection::vec("[a-z]{0,8}", 0..5).prop_map(|tags| (
            FieldValue::Custom {
                type_name: "Tags".into(),
                value: serde_json::json!(tags),
            },
            ColumnType::Custom("Tags".into()),
        )),
    ]
}

// ============================================================================
// Bind/Read Roundtrip Tests
// ============================================================================

proptest! {
    /// Binding a value and reading it back under the same policy is lossless
    #[test]
    fn test_bind_read_roundtrip((value, declared) in typed_value(), policy in policies()) {
        let binder = ValueBinder::new(policy, Some(Arc::new(JsonBlobSerializer::new())));
        let native = binder.to_sql_value(&value).unwrap();
        let read = binder.read(ValueRef::from(&native), &declared).unwrap();
        prop_assert_eq!(read, value);
    }

    /// Null reads as null whatever the declared type
    #[test]
    fn test_null_reads_as_null((_, declared) in typed_value(), policy in policies()) {
        let binder = ValueBinder::new(policy, None);
        let read = binder.read(ValueRef::Null, &declared).unwrap();
        prop_assert!(read.is_null());
    }

    /// Duration ticks are exact at 100ns resolution
    #[test]
    fn test_duration_ticks_roundtrip(ticks in -1_000_000_000_000_000i64..1_000_000_000_000_000i64) {
        prop_assert_eq!(duration_to_ticks(&duration_from_ticks(ticks)).unwrap(), ticks);
    }
}

// ============================================================================
// Engine Roundtrip Tests
// ============================================================================

fn open(policy: StoragePolicy) -> Connection {
    ConnectionBuilder::new(":memory:")
        .store_date_time_as_ticks(policy.store_date_time_as_ticks)
        .store_guid_as_blob(policy.store_guid_as_blob)
        .open()
        .expect("Failed to open")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Values survive a trip through the engine
    #[test]
    fn test_engine_roundtrip(
        policy in policies(),
        int in any::<i64>(),
        real in finite_f64(),
        text in "\\PC{0,40}",
        blob in prop::collection::vec(any::<u8>(), 0..64),
        when in date_time(),
        guid in any::<u128>().prop_map(Uuid::from_u128),
    ) {
        let conn = open(policy);
        prop_assert_eq!(conn.execute_scalar::<i64>("SELECT ?", &[int.into()]).unwrap(), int);
        prop_assert_eq!(conn.execute_scalar::<f64>("SELECT ?", &[real.into()]).unwrap(), real);
        prop_assert_eq!(conn.execute_scalar::<String>("SELECT ?", &[text.clone().into()]).unwrap(), text);
        prop_assert_eq!(conn.execute_scalar::<Vec<u8>>("SELECT ?", &[blob.clone().into()]).unwrap(), blob);
        prop_assert_eq!(conn.execute_scalar::<NaiveDateTime>("SELECT ?", &[when.into()]).unwrap(), when);
        prop_assert_eq!(conn.execute_scalar::<Uuid>("SELECT ?", &[guid.into()]).unwrap(), guid);
    }
}

// ============================================================================
// Query Compilation Tests
// ============================================================================

#[derive(Debug, Default, Clone)]
struct Sample {
    id: i64,
    name: String,
    score: f64,
}

impl_record!(Sample, "Sample", {
    id: i64 => "Id" [primary_key, auto_increment],
    name: String => "Name",
    score: f64 => "Score",
});

proptest! {
    /// Arguments line up with placeholders in source order
    #[test]
    fn test_compiled_arguments_follow_source_order(
        terms in prop::collection::vec(
            prop_oneof![
                any::<i64>().prop_map(|v| (col("Id").gt(v), FieldValue::I64(v))),
                "[a-z]{0,6}".prop_map(|v| (col("Name").starts_with(v.clone()), FieldValue::Text(v))),
                finite_f64().prop_map(|v| (col("Score").le(v), FieldValue::F64(v))),
            ],
            1..12,
        )
    ) {
        let mapping = TableMapping::of::<Sample>(CreateFlags::NONE).unwrap();
        let mut terms = terms.into_iter();
        let (first, first_value) = terms.next().unwrap();
        let mut expected = vec![first_value];
        let mut predicate = first;
        for (i, (term, value)) in terms.enumerate() {
            predicate = if i % 2 == 0 { predicate.and(term) } else { predicate.or(term) };
            expected.push(value);
        }

        let (sql, args) = compile_predicate(&mapping, &predicate).unwrap();
        prop_assert_eq!(sql.matches('?').count(), args.len());
        prop_assert_eq!(args, expected);
    }

    /// IN lists bind one argument per element after the needle
    #[test]
    fn test_in_list_arguments(values in prop::collection::vec(any::<i32>(), 1..10)) {
        let mapping = TableMapping::of::<Sample>(CreateFlags::NONE).unwrap();
        let predicate = col("Id").is_in(list(values.clone()));
        let (sql, args) = compile_predicate(&mapping, &predicate).unwrap();
        prop_assert!(sql.contains(" IN ("));
        prop_assert_eq!(args.len(), values.len());
        prop_assert_eq!(sql.matches('?').count(), values.len());
    }
}

// ============================================================================
// Paging and Key Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Skip and take select the expected window of an ordered table
    #[test]
    fn test_paging_window(rows in 0usize..30, skip in 0usize..35, take in prop::option::of(0usize..35)) {
        let conn = Connection::open_in_memory().unwrap();
        conn.create_table::<Sample>(CreateFlags::NONE).unwrap();
        let mut ids = Vec::new();
        for i in 0..rows {
            let mut sample = Sample { name: format!("n{i}"), ..Default::default() };
            conn.insert(&mut sample).unwrap();
            ids.push(sample.id);
        }

        let mut query = conn.table::<Sample>().unwrap().order_by("Id").skip(skip);
        if let Some(take) = take {
            query = query.take(take);
        }
        let got: Vec<i64> = query.to_list().unwrap().into_iter().map(|s| s.id).collect();

        let window: Vec<i64> = ids
            .iter()
            .copied()
            .skip(skip)
            .take(take.unwrap_or(usize::MAX))
            .collect();
        prop_assert_eq!(got, window);
    }

    /// Auto-increment keys are distinct and strictly increasing
    #[test]
    fn test_auto_increment_keys(count in 1usize..25) {
        let conn = Connection::open_in_memory().unwrap();
        conn.create_table::<Sample>(CreateFlags::NONE).unwrap();
        let mut batch: Vec<Sample> = (0..count).map(|_| Sample::default()).collect();
        conn.insert_all(&mut batch).unwrap();
        prop_assert!(batch.windows(2).all(|w| w[0].id < w[1].id));
        prop_assert_eq!(batch.len(), count);
    }
}
