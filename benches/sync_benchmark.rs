//! Benchmarks for pg-cratedb-sync operations.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use pg_cratedb_sync::apply::classify;
use pg_cratedb_sync::sql::{quote_ident, upsert_statement};
use pg_cratedb_sync::{Row, TrackingColumns};
use serde_json::json;

fn sample_row(deleted: bool) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), json!(42));
    row.insert("name".into(), json!("Product 42"));
    row.insert("price".into(), json!(19.99));
    row.insert("tags".into(), json!(["a", "b"]));
    row.insert("updated_at".into(), json!("2024-01-02T10:00:00+00:00"));
    row.insert("is_deleted".into(), json!(deleted));
    row
}

/// Benchmark upsert statement building.
fn bench_upsert_statement(c: &mut Criterion) {
    let columns: Vec<String> = (0..20).map(|i| format!("column_{}", i)).collect();

    c.bench_function("upsert_statement_20_columns", |b| {
        b.iter(|| black_box(upsert_statement("doc.products", "id", black_box(&columns))))
    });

    c.bench_function("quote_ident", |b| {
        b.iter(|| black_box(quote_ident(black_box("doc.products"))))
    });
}

/// Benchmark row classification.
fn bench_classify(c: &mut Criterion) {
    let columns = TrackingColumns::default();

    c.bench_function("classify_upsert", |b| {
        b.iter(|| black_box(classify(sample_row(false), &columns, "products")))
    });

    c.bench_function("classify_delete", |b| {
        b.iter(|| black_box(classify(sample_row(true), &columns, "products")))
    });
}

criterion_group!(benches, bench_upsert_statement, bench_classify);
criterion_main!(benches);
