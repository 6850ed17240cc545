//! Query benchmarks: index lookups against scans, aggregation strategies
//! and snapshot cost.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mirage_core::ast::{
    ColumnDef, CreateIndex, CreateTable, Expr, Insert, InsertSource, Query, Select, SelectItem,
    Statement,
};
use mirage_core::{DataType, Database};
use rand::Rng;
use std::hint::black_box;
use std::time::Duration;

/// Creates `events(id bigint, kind integer, note text)` with `rows` rows
/// and an index on `kind` when `indexed`.
fn create_events(rows: usize, indexed: bool) -> Database {
    let db = Database::new();
    db.execute(&Statement::CreateTable(CreateTable {
        name: "events".to_string(),
        columns: vec![
            ColumnDef::new("id", DataType::BigInt).primary_key(),
            ColumnDef::new("kind", DataType::Integer),
            ColumnDef::new("note", DataType::Text),
        ],
        constraints: Vec::new(),
        if_not_exists: false,
    }))
    .expect("Failed to create benchmark table");
    if indexed {
        db.execute(&Statement::CreateIndex(CreateIndex {
            name: None,
            table: "events".to_string(),
            expressions: vec![Expr::col("kind")],
            unique: false,
            if_not_exists: false,
        }))
        .expect("Failed to create benchmark index");
    }

    let mut rng = rand::thread_rng();
    let values: Vec<Vec<Expr>> = (0..rows)
        .map(|i| {
            vec![
                Expr::int(i as i64),
                Expr::int(rng.gen_range(0..100)),
                Expr::text(&format!("event {}", i)),
            ]
        })
        .collect();
    for chunk in values.chunks(1_000) {
        db.execute(&Statement::Insert(Insert {
            table: "events".to_string(),
            columns: None,
            source: InsertSource::Values(chunk.to_vec()),
            returning: Vec::new(),
        }))
        .expect("Failed to populate benchmark table");
    }
    db
}

fn select_kind(kind: i64) -> Statement {
    Statement::Select(Query::select(
        Select::from_table("events", vec![SelectItem::Wildcard])
            .filter(Expr::col("kind").eq(Expr::int(kind))),
    ))
}

/// Benchmark: equality filter with and without an index
fn benchmark_point_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_filter");
    group.sample_size(30);
    group.measurement_time(Duration::from_secs(5));

    for rows in [1_000, 10_000] {
        for indexed in [false, true] {
            let db = create_events(rows, indexed);
            let label = if indexed { "index" } else { "scan" };
            group.bench_with_input(BenchmarkId::new(label, rows), &rows, |b, _| {
                let mut kind = 0;
                b.iter(|| {
                    kind = (kind + 1) % 100;
                    black_box(db.execute(&select_kind(kind)).unwrap());
                });
            });
        }
    }
    group.finish();
}

/// Benchmark: GROUP BY over an indexed and an unindexed key
fn benchmark_group_by(c: &mut Criterion) {
    let mut group = c.benchmark_group("group_by");
    group.sample_size(20);

    let db = create_events(10_000, true);
    for key in ["kind", "note"] {
        let statement = Statement::Select(Query::select(
            Select::from_table(
                "events",
                vec![
                    SelectItem::expr(Expr::col(key)),
                    SelectItem::expr(Expr::count_star()),
                ],
            )
            .group_by(vec![Expr::col(key)]),
        ));
        group.bench_function(key, |b| {
            b.iter(|| black_box(db.execute(&statement).unwrap()));
        });
    }

    let count = Statement::Select(Query::select(Select::from_table(
        "events",
        vec![SelectItem::expr(Expr::count_star())],
    )));
    group.bench_function("count_star", |b| {
        b.iter(|| black_box(db.execute(&count).unwrap()));
    });
    group.finish();
}

/// Benchmark: backup and restore stay constant in the row count
fn benchmark_backup_restore(c: &mut Criterion) {
    let mut group = c.benchmark_group("backup_restore");
    for rows in [1_000, 10_000] {
        let db = create_events(rows, true);
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| {
                let backup = db.backup().unwrap();
                db.restore(black_box(&backup)).unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark: single-row autocommit inserts
fn benchmark_insert(c: &mut Criterion) {
    let db = create_events(0, true);
    let mut id = 0i64;
    c.bench_function("insert_row", |b| {
        b.iter(|| {
            id += 1;
            db.execute(&Statement::Insert(Insert {
                table: "events".to_string(),
                columns: None,
                source: InsertSource::Values(vec![vec![
                    Expr::int(id),
                    Expr::int(id % 100),
                    Expr::text("bench"),
                ]]),
                returning: Vec::new(),
            }))
            .unwrap()
        });
    });
}

criterion_group!(
    benches,
    benchmark_point_filter,
    benchmark_group_by,
    benchmark_backup_restore,
    benchmark_insert
);
criterion_main!(benches);
