//! Benchmarks for the sync hot paths
//!
//! Measures:
//! - Strategy classification on wide joined schemas
//! - Backfill shard partitioning
//! - Document resolution from query rows
//! - Bulk buffer throughput against the in-memory store

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use searchsync_engine::{
    classify, partition, BulkBuffer, ColumnRef, FieldValueResolver, MappingConfig, RelationKey,
    SchemaGraph, SelectField, TableItem,
};
use searchsync_storage::{IndexMutation, MemoryIndexStore, Row};

/// Main table `t0` joined with `joins` tables, two fields per table
fn wide_schema(joins: usize) -> SchemaGraph {
    let mut tables = vec![TableItem::main("t0", "a0")];
    let mut fields = vec![
        SelectField::simple("a0", "id", "_id"),
        SelectField::simple("a0", "name", "name"),
    ];

    for i in 1..=joins {
        let alias = format!("a{}", i);
        let link = SelectField::simple("a0", &format!("t{}_id", i), &format!("t{}_id", i));
        fields.push(link.clone());
        fields.push(SelectField::simple(&alias, "label", &format!("t{}_label", i)));
        if i % 3 == 0 {
            let columns = [(alias.as_str(), "a"), (alias.as_str(), "b")];
            fields.push(SelectField::expression(&alias, &format!("t{}_calc", i), &columns));
        }
        tables.push(TableItem::joined(
            &format!("t{}", i),
            &alias,
            vec![RelationKey {
                foreign_key: ColumnRef::new(&alias, "id"),
                linked_fields: vec![link],
            }],
        ));
    }
    SchemaGraph::new(tables, fields)
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    for joins in [1, 10, 50] {
        let schema = wide_schema(joins);
        group.bench_with_input(BenchmarkId::from_parameter(joins), &schema, |b, schema| {
            b.iter(|| {
                for i in 0..=joins {
                    black_box(classify(&format!("t{}", i), schema));
                }
            });
        });
    }

    group.finish();
}

fn bench_partition(c: &mut Criterion) {
    c.bench_function("partition_64_workers", |b| {
        b.iter(|| black_box(partition(black_box(1), black_box(50_000_000), 64)))
    });
}

fn bench_document_from_row(c: &mut Criterion) {
    let schema = wide_schema(20);
    let mut mapping = MappingConfig::new("bench", "_id", "SELECT 1");
    mapping.id_field = Some("_id".into());
    let types: HashMap<String, String> = schema
        .select_fields
        .iter()
        .map(|f| (f.field_name.clone(), "keyword".to_string()))
        .collect();

    let row: Row = schema
        .select_fields
        .iter()
        .enumerate()
        .map(|(i, f)| (f.field_name.clone(), json!(i)))
        .collect();

    c.bench_function("document_from_row_20_joins", |b| {
        let resolver = FieldValueResolver::new(&mapping, &types);
        b.iter(|| black_box(resolver.document_from_row(&schema, &row)))
    });
}

fn bench_bulk_buffer(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("bulk_buffer");

    for threshold in [100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(threshold), &threshold, |b, &threshold| {
            b.iter(|| {
                rt.block_on(async {
                    let store = Arc::new(MemoryIndexStore::new());
                    let mut buffer = BulkBuffer::new(store, threshold);
                    for id in 0..5_000 {
                        let payload = json!({"n": id}).as_object().cloned().unwrap();
                        buffer
                            .add(IndexMutation::index("bench", "_doc", id.to_string(), payload))
                            .await
                            .unwrap();
                    }
                    black_box(buffer.commit().await.unwrap());
                });
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_classify,
    bench_partition,
    bench_document_from_row,
    bench_bulk_buffer
);
criterion_main!(benches);
