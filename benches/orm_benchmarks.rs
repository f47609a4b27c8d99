//! Criterion benchmarks for rust_sqlite_orm

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_sqlite_orm::backends::ValueBinder;
use rust_sqlite_orm::core::{compile_predicate, StoragePolicy, TableMapping};
use rust_sqlite_orm::impl_record;
use rust_sqlite_orm::prelude::*;

#[derive(Debug, Default, Clone)]
struct Quote {
    id: i64,
    symbol: String,
    price: f64,
    volume: i64,
}

impl_record!(Quote, "Quote", {
    id: i64 => "Id" [primary_key, auto_increment],
    symbol: String => "Symbol" [max_length(12), indexed],
    price: f64 => "Price",
    volume: i64 => "Volume",
});

fn seeded(rows: usize) -> Connection {
    let conn = Connection::open_in_memory().expect("Failed to open");
    conn.create_table::<Quote>(CreateFlags::NONE)
        .expect("Failed to create table");
    let mut batch: Vec<Quote> = (0..rows)
        .map(|i| Quote {
            symbol: format!("S{}", i % 50),
            price: i as f64 * 0.5,
            volume: i as i64,
            ..Default::default()
        })
        .collect();
    conn.insert_all(&mut batch).expect("Failed to seed");
    conn
}

// ============================================================================
// Value Binding Benchmarks
// ============================================================================

fn bench_value_binding(c: &mut Criterion) {
    let mut group = c.benchmark_group("value_binding");
    group.throughput(Throughput::Elements(1));

    let ticks = ValueBinder::new(StoragePolicy::default(), None);
    let text = ValueBinder::new(
        StoragePolicy {
            store_date_time_as_ticks: false,
            store_guid_as_blob: false,
        },
        None,
    );
    let now = chrono::Utc::now().naive_utc();

    let values = [
        ("i64", FieldValue::from(123_456_789i64)),
        ("f64", FieldValue::from(std::f64::consts::PI)),
        ("text", FieldValue::from("Hello, World!")),
        ("guid", FieldValue::from(uuid::Uuid::new_v4())),
    ];
    for (name, value) in &values {
        group.bench_with_input(BenchmarkId::new("to_sql", name), value, |b, value| {
            b.iter(|| black_box(ticks.to_sql_value(black_box(value))))
        });
    }

    group.bench_function("date_time_ticks", |b| {
        let value = FieldValue::DateTime(now);
        b.iter(|| black_box(ticks.to_sql_value(black_box(&value))))
    });

    group.bench_function("date_time_text", |b| {
        let value = FieldValue::DateTime(now);
        b.iter(|| black_box(text.to_sql_value(black_box(&value))))
    });

    group.finish();
}

// ============================================================================
// Query Compilation Benchmarks
// ============================================================================

fn bench_query_compilation(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_compilation");
    let mapping = TableMapping::of::<Quote>(CreateFlags::NONE).expect("mapping");

    let simple = col("Symbol").eq("S1");
    let compound = col("Symbol")
        .starts_with("S")
        .and(col("Price").gt(10.0))
        .and(col("Volume").is_in(list([1i64, 2, 3, 4, 5])).or(col("Id").lt(100)));

    group.bench_function("simple", |b| {
        b.iter(|| black_box(compile_predicate(&mapping, black_box(&simple))))
    });
    group.bench_function("compound", |b| {
        b.iter(|| black_box(compile_predicate(&mapping, black_box(&compound))))
    });

    group.finish();
}

// ============================================================================
// Insert Benchmarks
// ============================================================================

fn bench_inserts(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("insert_all", size), size, |b, &size| {
            let conn = seeded(0);
            b.iter(|| {
                let mut batch: Vec<Quote> = (0..size)
                    .map(|i| Quote {
                        symbol: "BENCH".into(),
                        volume: i as i64,
                        ..Default::default()
                    })
                    .collect();
                black_box(conn.insert_all(&mut batch).expect("insert"))
            });
        });
    }

    group.finish();
}

// ============================================================================
// Query Benchmarks
// ============================================================================

fn bench_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("query");
    let conn = seeded(5000);

    group.bench_function("get_by_key", |b| {
        b.iter(|| black_box(conn.get::<Quote>(black_box(2500i64)).expect("get")))
    });

    group.bench_function("filter_indexed", |b| {
        let query = conn
            .table::<Quote>()
            .expect("table")
            .filter(col("Symbol").eq("S7"))
            .expect("filter");
        b.iter(|| black_box(query.to_list().expect("list")))
    });

    group.bench_function("page", |b| {
        let query = conn.table::<Quote>().expect("table").order_by("Id");
        b.iter(|| black_box(query.skip(1000).take(50).to_list().expect("page")))
    });

    group.bench_function("count", |b| {
        let query = conn.table::<Quote>().expect("table");
        b.iter(|| black_box(query.count().expect("count")))
    });

    group.bench_function("deferred_first_10", |b| {
        let query = conn.table::<Quote>().expect("table");
        b.iter(|| {
            black_box(
                query
                    .with_deferred(|rows| rows.take(10).collect::<Result<Vec<_>>>())
                    .expect("deferred"),
            )
        })
    });

    group.finish();
}

// ============================================================================
// Criterion Configuration
// ============================================================================

criterion_group!(
    benches,
    bench_value_binding,
    bench_query_compilation,
    bench_inserts,
    bench_queries
);

criterion_main!(benches);
