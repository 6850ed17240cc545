//! CREATE, ALTER and DROP.

use ntest::timeout;

use mirage_core::ast::{
    AlterAction, AlterTable, ColumnDef, CreateIndex, CreateTable, Expr, Select, SelectItem,
    Statement, TableConstraint,
};
use mirage_core::{DataType, Database, DbError, Value};

use crate::helpers::*;

fn alter(table: &str, action: AlterAction) -> Statement {
    Statement::AlterTable(AlterTable {
        table: table.to_string(),
        action,
    })
}

#[timeout(1000)]
#[test]
fn test_create_table_registers_schema() {
    let db = Database::new();
    let before = db.schema_version().unwrap();
    create_items(&db);

    assert_eq!(db.table_names().unwrap(), vec!["items".to_string()]);
    let table = db.get_table("items").unwrap();
    assert_eq!(table.columns.len(), 2);
    assert!(table.index_named("items_a_idx").is_some());
    assert!(db.schema_version().unwrap() > before);
}

#[timeout(1000)]
#[test]
fn test_create_existing_table() {
    let db = Database::new();
    create_items(&db);
    let statement = |if_not_exists| {
        Statement::CreateTable(CreateTable {
            name: "items".to_string(),
            columns: vec![ColumnDef::new("z", DataType::Bool)],
            constraints: Vec::new(),
            if_not_exists,
        })
    };
    assert_eq!(
        db.execute(&statement(false)),
        Err(DbError::TableAlreadyExists("items".to_string()))
    );
    db.execute(&statement(true)).unwrap();
    assert_eq!(db.get_table("items").unwrap().columns.len(), 2);
}

#[timeout(1000)]
#[test]
fn test_two_primary_keys_rejected() {
    let db = Database::new();
    let err = db
        .execute(&Statement::CreateTable(CreateTable {
            name: "pairs".to_string(),
            columns: vec![
                ColumnDef::new("x", DataType::Integer).primary_key(),
                ColumnDef::new("y", DataType::Integer),
            ],
            constraints: vec![TableConstraint::PrimaryKey {
                name: None,
                columns: vec!["y".to_string()],
            }],
            if_not_exists: false,
        }))
        .unwrap_err();
    assert!(matches!(err, DbError::Query(_)));
    assert!(db.get_table("pairs").is_err());
}

#[timeout(1000)]
#[test]
fn test_composite_unique_constraint() {
    let db = Database::new();
    db.execute(&Statement::CreateTable(CreateTable {
        name: "pairs".to_string(),
        columns: vec![
            ColumnDef::new("x", DataType::Integer),
            ColumnDef::new("y", DataType::Integer),
        ],
        constraints: vec![TableConstraint::Unique {
            name: None,
            columns: vec!["x".to_string(), "y".to_string()],
        }],
        if_not_exists: false,
    }))
    .unwrap();
    insert(&db, "pairs", vec![vec![Expr::int(1), Expr::int(1)]]);
    insert(&db, "pairs", vec![vec![Expr::int(1), Expr::int(2)]]);
    let err = db
        .execute(&insert_statement("pairs", vec![vec![Expr::int(1), Expr::int(2)]]))
        .unwrap_err();
    assert!(matches!(err, DbError::UniqueViolation { .. }));
}

#[timeout(1000)]
#[test]
fn test_foreign_key_needs_unique_target() {
    let db = Database::new();
    create_items(&db);
    let err = db
        .execute(&Statement::CreateTable(CreateTable {
            name: "refs".to_string(),
            columns: vec![ColumnDef::new("a", DataType::Integer).references("items", Some("a"))],
            constraints: Vec::new(),
            if_not_exists: false,
        }))
        .unwrap_err();
    assert!(matches!(err, DbError::Query(_)));
}

#[timeout(1000)]
#[test]
fn test_create_index_populates_and_is_used() {
    let db = Database::new();
    create_table(
        &db,
        "words",
        vec![ColumnDef::new("w", DataType::Text)],
    );
    insert(
        &db,
        "words",
        vec![vec![Expr::text("alpha")], vec![Expr::text("beta")]],
    );
    create_index(&db, "words", "w");

    let query = Select::from_table("words", vec![SelectItem::Wildcard])
        .filter(Expr::col("w").eq(Expr::text("beta")));
    let result = select(&db, query.clone());
    assert_eq!(result.values("w").unwrap(), vec![Value::text("beta")]);

    let plan = explain(&db, query);
    assert!(plan.find("eq_filter").is_some(), "{}", plan);
}

#[timeout(1000)]
#[test]
fn test_create_duplicate_index() {
    let db = Database::new();
    create_items(&db);
    let statement = |if_not_exists| {
        Statement::CreateIndex(CreateIndex {
            name: Some("items_a_idx".to_string()),
            table: "items".to_string(),
            expressions: vec![Expr::col("b")],
            unique: false,
            if_not_exists,
        })
    };
    assert_eq!(
        db.execute(&statement(false)),
        Err(DbError::IndexAlreadyExists("items_a_idx".to_string()))
    );
    db.execute(&statement(true)).unwrap();
}

#[timeout(1000)]
#[test]
fn test_unique_index_on_duplicates_fails() {
    let db = Database::new();
    create_items(&db);
    seed_items(&db);
    let err = db
        .execute(&Statement::CreateIndex(CreateIndex {
            name: None,
            table: "items".to_string(),
            expressions: vec![Expr::col("b")],
            unique: true,
            if_not_exists: false,
        }))
        .unwrap_err();
    assert!(matches!(err, DbError::UniqueViolation { .. }));
    assert_eq!(db.get_table("items").unwrap().indexes.len(), 1);
}

#[timeout(1000)]
#[test]
fn test_add_column_fills_existing_rows() {
    let db = Database::new();
    create_items(&db);
    seed_items(&db);
    db.execute(&alter(
        "items",
        AlterAction::AddColumn(ColumnDef::new("c", DataType::Integer).default(Expr::int(7))),
    ))
    .unwrap();

    let result = select(
        &db,
        Select::from_table("items", vec![SelectItem::expr(Expr::col("c"))]),
    );
    assert_eq!(result.values("c").unwrap(), vec![Value::Integer(7); 5]);

    // New rows get the default too
    insert(&db, "items", vec![vec![Expr::int(8), Expr::text("n")]]);
    assert_eq!(count(&db, "items"), 6);
}

#[timeout(1000)]
#[test]
fn test_add_not_null_column_without_default_fails() {
    let db = Database::new();
    create_items(&db);
    seed_items(&db);
    let err = db
        .execute(&alter(
            "items",
            AlterAction::AddColumn(ColumnDef::new("c", DataType::Integer).not_null()),
        ))
        .unwrap_err();
    assert!(matches!(err, DbError::NotNullViolation { .. }));
    assert_eq!(db.get_table("items").unwrap().columns.len(), 2);
}

#[timeout(1000)]
#[test]
fn test_drop_column_rewrites_rows() {
    let db = Database::new();
    create_items(&db);
    seed_items(&db);
    db.execute(&alter(
        "items",
        AlterAction::DropColumn {
            name: "a".to_string(),
            if_exists: false,
        },
    ))
    .unwrap();

    let table = db.get_table("items").unwrap();
    assert_eq!(table.columns.len(), 1);
    // The index on the dropped column goes with it
    assert!(table.indexes.is_empty());

    let result = select(&db, Select::from_table("items", vec![SelectItem::Wildcard]));
    assert_eq!(result.columns.len(), 1);
    assert_eq!(result.row_count, 5);

    db.execute(&alter(
        "items",
        AlterAction::DropColumn {
            name: "a".to_string(),
            if_exists: true,
        },
    ))
    .unwrap();
}

#[timeout(1000)]
#[test]
fn test_drop_table() {
    let db = Database::new();
    create_items(&db);
    seed_items(&db);
    db.execute(&Statement::DropTable {
        name: "items".to_string(),
        if_exists: false,
    })
    .unwrap();
    assert!(matches!(
        db.get_table("items"),
        Err(DbError::TableNotFound { .. })
    ));

    // Recreated tables start empty
    create_items(&db);
    assert_eq!(count(&db, "items"), 0);
}

#[timeout(1000)]
#[test]
fn test_drop_referenced_table_fails() {
    let db = Database::new();
    create_table(
        &db,
        "parents",
        vec![ColumnDef::new("id", DataType::Integer).primary_key()],
    );
    create_table(
        &db,
        "children",
        vec![ColumnDef::new("parent", DataType::Integer).references("parents", None)],
    );
    let err = db
        .execute(&Statement::DropTable {
            name: "parents".to_string(),
            if_exists: false,
        })
        .unwrap_err();
    assert!(matches!(err, DbError::Query(_)));

    let err = db
        .execute(&Statement::DropIndex {
            name: "parents_pkey".to_string(),
            if_exists: false,
        })
        .unwrap_err();
    assert!(matches!(err, DbError::Query(_)));
}

#[timeout(1000)]
#[test]
fn test_drop_index() {
    let db = Database::new();
    create_items(&db);
    db.execute(&Statement::DropIndex {
        name: "items_a_idx".to_string(),
        if_exists: false,
    })
    .unwrap();
    assert!(db.get_table("items").unwrap().indexes.is_empty());
    assert_eq!(
        db.execute(&Statement::DropIndex {
            name: "items_a_idx".to_string(),
            if_exists: false,
        }),
        Err(DbError::IndexNotFound("items_a_idx".to_string()))
    );
}

#[timeout(1000)]
#[test]
fn test_frozen_table_rejects_writes() {
    let db = Database::new();
    create_items(&db);
    seed_items(&db);
    db.freeze_table("items").unwrap();

    let err = db
        .execute(&insert_statement("items", vec![vec![Expr::int(1), Expr::text("a")]]))
        .unwrap_err();
    assert_eq!(err, DbError::ReadOnly("items".to_string()));
    // Reads still work
    assert_eq!(count(&db, "items"), 5);
}
