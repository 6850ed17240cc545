//! INSERT, UPDATE and DELETE with their constraints.

use ntest::timeout;

use mirage_core::ast::{
    Assignment, BinaryOp, ColumnDef, Delete, Expr, Insert, InsertSource, Query, Select,
    SelectItem, Statement, Update,
};
use mirage_core::{DataType, Database, DbError, Value};

use crate::helpers::*;

fn create_accounts(db: &Database) {
    create_table(
        db,
        "accounts",
        vec![
            ColumnDef::new("id", DataType::Integer).serial().primary_key(),
            ColumnDef::new("owner", DataType::Text).not_null(),
            ColumnDef::new("balance", DataType::BigInt).default(Expr::int(0)),
        ],
    );
}

fn insert_owners(db: &Database, owners: &[&str]) -> mirage_core::QueryResult {
    db.execute(&Statement::Insert(Insert {
        table: "accounts".to_string(),
        columns: Some(vec!["owner".to_string()]),
        source: InsertSource::Values(owners.iter().map(|o| vec![Expr::text(o)]).collect()),
        returning: vec![SelectItem::expr(Expr::col("id"))],
    }))
    .unwrap()
}

fn update(table: &str, column: &str, value: Expr, predicate: Option<Expr>) -> Statement {
    Statement::Update(Update {
        table: table.to_string(),
        alias: None,
        assignments: vec![Assignment {
            column: column.to_string(),
            value,
        }],
        selection: predicate,
        returning: Vec::new(),
    })
}

fn delete(table: &str, predicate: Option<Expr>) -> Statement {
    Statement::Delete(Delete {
        table: table.to_string(),
        alias: None,
        selection: predicate,
        returning: Vec::new(),
    })
}

#[timeout(1000)]
#[test]
fn test_insert_fills_serial_and_defaults() {
    let db = Database::new();
    create_accounts(&db);
    let result = insert_owners(&db, &["ada", "bob"]);

    assert_eq!(result.command, "INSERT");
    assert_eq!(result.row_count, 2);
    assert_eq!(sorted_ints(result.values("id").unwrap()), vec![1, 2]);

    let balances = select(
        &db,
        Select::from_table("accounts", vec![SelectItem::expr(Expr::col("balance"))]),
    );
    assert_eq!(balances.values("balance").unwrap(), vec![Value::BigInt(0); 2]);
}

#[timeout(1000)]
#[test]
fn test_serial_is_not_reused_after_delete() {
    let db = Database::new();
    create_accounts(&db);
    insert_owners(&db, &["ada", "bob"]);
    db.execute(&delete("accounts", None)).unwrap();

    let result = insert_owners(&db, &["cy"]);
    assert_eq!(sorted_ints(result.values("id").unwrap()), vec![3]);
}

#[timeout(1000)]
#[test]
fn test_insert_explicit_default() {
    let db = Database::new();
    create_accounts(&db);
    db.execute(&Statement::Insert(Insert {
        table: "accounts".to_string(),
        columns: None,
        source: InsertSource::Values(vec![vec![Expr::Default, Expr::text("ada"), Expr::Default]]),
        returning: Vec::new(),
    }))
    .unwrap();

    let result = select(
        &db,
        Select::from_table(
            "accounts",
            vec![
                SelectItem::expr(Expr::col("id")),
                SelectItem::expr(Expr::col("balance")),
            ],
        ),
    );
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0][0].as_i64(), Some(1));
    assert_eq!(result.rows[0][1], Value::BigInt(0));
}

#[timeout(1000)]
#[test]
fn test_insert_width_mismatch() {
    let db = Database::new();
    create_accounts(&db);
    let err = db
        .execute(&Statement::Insert(Insert {
            table: "accounts".to_string(),
            columns: Some(vec!["owner".to_string()]),
            source: InsertSource::Values(vec![vec![Expr::text("ada"), Expr::int(1)]]),
            returning: Vec::new(),
        }))
        .unwrap_err();
    assert!(matches!(err, DbError::Query(_)));
}

#[timeout(1000)]
#[test]
fn test_insert_rejects_incompatible_type() {
    let db = Database::new();
    create_items(&db);
    let err = db
        .execute(&insert_statement(
            "items",
            vec![vec![Expr::boolean(true), Expr::text("x")]],
        ))
        .unwrap_err();
    assert!(matches!(err, DbError::Cast { .. }));
}

#[timeout(1000)]
#[test]
fn test_insert_parses_untyped_text() {
    let db = Database::new();
    create_items(&db);
    insert(&db, "items", vec![vec![Expr::text("42"), Expr::text("x")]]);

    let result = select(
        &db,
        Select::from_table("items", vec![SelectItem::expr(Expr::col("a"))]),
    );
    assert_eq!(result.scalar(), Some(&Value::Integer(42)));
}

#[timeout(1000)]
#[test]
fn test_insert_from_query() {
    let db = Database::new();
    create_items(&db);
    seed_items(&db);
    create_table(
        &db,
        "copies",
        vec![
            ColumnDef::new("a", DataType::BigInt),
            ColumnDef::new("b", DataType::Text),
        ],
    );

    let source = Query::select(
        Select::from_table("items", vec![SelectItem::Wildcard]).filter(Expr::col("b").eq(Expr::text("x"))),
    );
    let result = db
        .execute(&Statement::Insert(Insert {
            table: "copies".to_string(),
            columns: None,
            source: InsertSource::Query(Box::new(source)),
            returning: Vec::new(),
        }))
        .unwrap();
    assert_eq!(result.row_count, 3);
    assert_eq!(count(&db, "copies"), 3);
}

#[timeout(1000)]
#[test]
fn test_update_computes_from_old_row() {
    let db = Database::new();
    create_accounts(&db);
    insert_owners(&db, &["ada", "bob"]);

    let plus = Expr::binary(Expr::col("balance"), BinaryOp::Plus, Expr::int(10));
    let result = db
        .execute(&update(
            "accounts",
            "balance",
            plus,
            Some(Expr::col("owner").eq(Expr::text("ada"))),
        ))
        .unwrap();
    assert_eq!(result.command, "UPDATE");
    assert_eq!(result.row_count, 1);

    let result = select(
        &db,
        Select::from_table("accounts", vec![SelectItem::expr(Expr::col("balance"))])
            .filter(Expr::col("owner").eq(Expr::text("ada"))),
    );
    assert_eq!(result.scalar(), Some(&Value::BigInt(10)));
}

#[timeout(1000)]
#[test]
fn test_update_returning() {
    let db = Database::new();
    create_items(&db);
    seed_items(&db);
    let result = db
        .execute(&Statement::Update(Update {
            table: "items".to_string(),
            alias: None,
            assignments: vec![Assignment {
                column: "b".to_string(),
                value: Expr::text("z"),
            }],
            selection: Some(Expr::col("a").eq(Expr::int(2))),
            returning: vec![SelectItem::Wildcard],
        }))
        .unwrap();
    assert_eq!(result.row_count, 2);
    assert_eq!(result.values("b").unwrap(), vec![Value::text("z"); 2]);
}

#[timeout(1000)]
#[test]
fn test_update_duplicate_assignment() {
    let db = Database::new();
    create_items(&db);
    let err = db
        .execute(&Statement::Update(Update {
            table: "items".to_string(),
            alias: None,
            assignments: vec![
                Assignment {
                    column: "a".to_string(),
                    value: Expr::int(1),
                },
                Assignment {
                    column: "a".to_string(),
                    value: Expr::int(2),
                },
            ],
            selection: None,
            returning: Vec::new(),
        }))
        .unwrap_err();
    assert!(matches!(err, DbError::Query(_)));
}

#[timeout(1000)]
#[test]
fn test_delete_with_predicate() {
    let db = Database::new();
    create_items(&db);
    seed_items(&db);
    let result = db
        .execute(&delete("items", Some(Expr::col("b").eq(Expr::text("x")))))
        .unwrap();
    assert_eq!(result.command, "DELETE");
    assert_eq!(result.row_count, 3);
    assert_eq!(count(&db, "items"), 2);
}

#[timeout(1000)]
#[test]
fn test_primary_key_is_unique() {
    let db = Database::new();
    create_table(
        &db,
        "codes",
        vec![ColumnDef::new("code", DataType::Text).primary_key()],
    );
    insert(&db, "codes", vec![vec![Expr::text("a")]]);
    let err = db
        .execute(&insert_statement("codes", vec![vec![Expr::text("a")]]))
        .unwrap_err();
    assert!(matches!(err, DbError::UniqueViolation { .. }));

    let err = db
        .execute(&insert_statement("codes", vec![vec![Expr::null()]]))
        .unwrap_err();
    assert!(matches!(err, DbError::NotNullViolation { .. }));
}

mod foreign_keys {
    use super::*;

    fn create_orders(db: &Database) {
        create_accounts(db);
        create_table(
            db,
            "orders",
            vec![
                ColumnDef::new("id", DataType::Integer).primary_key(),
                ColumnDef::new("account", DataType::Integer).references("accounts", None),
            ],
        );
        insert_owners(db, &["ada", "bob"]);
    }

    #[timeout(1000)]
    #[test]
    fn test_insert_requires_parent() {
        let db = Database::new();
        create_orders(&db);
        insert(&db, "orders", vec![vec![Expr::int(1), Expr::int(1)]]);
        // Null keys are not checked
        insert(&db, "orders", vec![vec![Expr::int(2), Expr::null()]]);

        let err = db
            .execute(&insert_statement("orders", vec![vec![Expr::int(3), Expr::int(99)]]))
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::ForeignKeyViolation { operation: "insert or update", .. }
        ));
        assert_eq!(count(&db, "orders"), 2);
    }

    #[timeout(1000)]
    #[test]
    fn test_delete_of_referenced_parent_fails() {
        let db = Database::new();
        create_orders(&db);
        insert(&db, "orders", vec![vec![Expr::int(1), Expr::int(1)]]);

        let err = db
            .execute(&delete("accounts", Some(Expr::col("id").eq(Expr::int(1)))))
            .unwrap_err();
        assert!(matches!(
            err,
            DbError::ForeignKeyViolation { operation: "update or delete", .. }
        ));
        assert_eq!(count(&db, "accounts"), 2);

        // Unreferenced parents may go
        db.execute(&delete("accounts", Some(Expr::col("id").eq(Expr::int(2)))))
            .unwrap();
        assert_eq!(count(&db, "accounts"), 1);
    }

    #[timeout(1000)]
    #[test]
    fn test_update_of_referenced_key_fails() {
        let db = Database::new();
        create_orders(&db);
        insert(&db, "orders", vec![vec![Expr::int(1), Expr::int(1)]]);

        let err = db
            .execute(&update(
                "accounts",
                "id",
                Expr::int(10),
                Some(Expr::col("id").eq(Expr::int(1))),
            ))
            .unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));

        // Changing a non-key column is fine
        db.execute(&update(
            "accounts",
            "owner",
            Expr::text("ada l."),
            Some(Expr::col("id").eq(Expr::int(1))),
        ))
        .unwrap();
    }

    #[timeout(1000)]
    #[test]
    fn test_self_reference() {
        let db = Database::new();
        create_table(
            &db,
            "nodes",
            vec![
                ColumnDef::new("id", DataType::Integer).primary_key(),
                ColumnDef::new("parent", DataType::Integer).references("nodes", Some("id")),
            ],
        );
        insert(&db, "nodes", vec![vec![Expr::int(1), Expr::null()]]);
        insert(&db, "nodes", vec![vec![Expr::int(2), Expr::int(1)]]);
        // A row may reference itself
        insert(&db, "nodes", vec![vec![Expr::int(3), Expr::int(3)]]);
        db.execute(&delete("nodes", Some(Expr::col("id").eq(Expr::int(3)))))
            .unwrap();

        let err = db
            .execute(&delete("nodes", Some(Expr::col("id").eq(Expr::int(1)))))
            .unwrap_err();
        assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
    }
}
