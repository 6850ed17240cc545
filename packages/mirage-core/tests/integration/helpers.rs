//! Shared fixtures for the integration tests.

use mirage_core::ast::{
    ColumnDef, CreateIndex, CreateTable, Expr, Insert, InsertSource, Query, Select, SelectItem,
    Statement,
};
use mirage_core::selection::Explanation;
use mirage_core::{DataType, Database, QueryResult, Value};

pub fn create_table(db: &Database, name: &str, columns: Vec<ColumnDef>) {
    db.execute(&Statement::CreateTable(CreateTable {
        name: name.to_string(),
        columns,
        constraints: Vec::new(),
        if_not_exists: false,
    }))
    .unwrap();
}

pub fn create_index(db: &Database, table: &str, column: &str) {
    db.execute(&Statement::CreateIndex(CreateIndex {
        name: None,
        table: table.to_string(),
        expressions: vec![Expr::col(column)],
        unique: false,
        if_not_exists: false,
    }))
    .unwrap();
}

/// `items(a integer, b text)` with a non-unique index on `a`.
pub fn create_items(db: &Database) {
    create_table(
        db,
        "items",
        vec![
            ColumnDef::new("a", DataType::Integer),
            ColumnDef::new("b", DataType::Text),
        ],
    );
    create_index(db, "items", "a");
}

pub fn insert_statement(table: &str, rows: Vec<Vec<Expr>>) -> Statement {
    Statement::Insert(Insert {
        table: table.to_string(),
        columns: None,
        source: InsertSource::Values(rows),
        returning: Vec::new(),
    })
}

pub fn insert(db: &Database, table: &str, rows: Vec<Vec<Expr>>) -> QueryResult {
    db.execute(&insert_statement(table, rows)).unwrap()
}

pub fn seed_items(db: &Database) {
    insert(
        db,
        "items",
        vec![
            vec![Expr::int(1), Expr::text("x")],
            vec![Expr::int(2), Expr::text("x")],
            vec![Expr::int(2), Expr::text("y")],
            vec![Expr::int(3), Expr::text("xy")],
            vec![Expr::null(), Expr::text("x")],
        ],
    );
}

pub fn select(db: &Database, select: Select) -> QueryResult {
    db.execute(&Statement::Select(Query::select(select))).unwrap()
}

pub fn count(db: &Database, table: &str) -> i64 {
    let result = select(
        db,
        Select::from_table(table, vec![SelectItem::expr(Expr::count_star())]),
    );
    match result.scalar() {
        Some(Value::BigInt(n)) => *n,
        other => panic!("unexpected count {:?}", other),
    }
}

pub fn sorted_ints(values: Vec<Value>) -> Vec<i64> {
    let mut ints: Vec<i64> = values.iter().filter_map(|v| v.as_i64()).collect();
    ints.sort_unstable();
    ints
}

/// Plan tree of `select`.
pub fn explain(db: &Database, select: Select) -> Explanation {
    let result = db
        .execute(&Statement::Explain(Box::new(Statement::Select(Query::select(
            select,
        )))))
        .unwrap();
    result.plan.expect("EXPLAIN returns a plan")
}
