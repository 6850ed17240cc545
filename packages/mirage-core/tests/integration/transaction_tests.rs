//! Sessions, explicit transactions and backups.

use ntest::timeout;

use mirage_core::ast::{ColumnDef, Expr, Select, SelectItem, Statement};
use mirage_core::{DataType, Database, DbError};

use crate::helpers::*;

#[timeout(1000)]
#[test]
fn test_restore_discards_later_writes() {
    let db = Database::new();
    create_items(&db);
    seed_items(&db);

    let backup = db.backup().unwrap();
    insert(&db, "items", vec![vec![Expr::int(9), Expr::text("z")]]);
    assert_eq!(count(&db, "items"), 6);

    db.restore(&backup).unwrap();
    assert_eq!(count(&db, "items"), 5);

    // The index follows the restored rows
    let result = select(
        &db,
        Select::from_table("items", vec![SelectItem::expr(Expr::col("b"))])
            .filter(Expr::col("a").eq(Expr::int(9))),
    );
    assert_eq!(result.row_count, 0);
}

#[timeout(1000)]
#[test]
fn test_backup_is_reusable() {
    let db = Database::new();
    create_items(&db);
    let backup = db.backup().unwrap();

    for _ in 0..3 {
        seed_items(&db);
        assert_eq!(count(&db, "items"), 5);
        db.restore(&backup).unwrap();
        assert_eq!(count(&db, "items"), 0);
    }
}

#[timeout(1000)]
#[test]
fn test_restore_after_schema_change_fails() {
    let db = Database::new();
    create_items(&db);
    let backup = db.backup().unwrap();
    create_table(&db, "other", vec![ColumnDef::new("id", DataType::Integer)]);

    let err = db.restore(&backup).unwrap_err();
    assert_eq!(
        err,
        DbError::StaleBackup {
            captured: backup.schema_version(),
            current: db.schema_version().unwrap(),
        }
    );
    assert!(err.is_fatal());
}

#[timeout(1000)]
#[test]
fn test_rollback_discards_transaction() {
    let db = Database::new();
    create_items(&db);
    seed_items(&db);

    let mut session = db.session();
    session.execute(&Statement::Begin).unwrap();
    assert!(session.in_transaction());
    session
        .execute(&insert_statement("items", vec![vec![Expr::int(7), Expr::text("q")]]))
        .unwrap();
    session.execute(&Statement::Rollback).unwrap();
    assert!(!session.in_transaction());

    assert_eq!(count(&db, "items"), 5);
}

#[timeout(1000)]
#[test]
fn test_open_transaction_is_isolated() {
    let db = Database::new();
    create_items(&db);

    let mut session = db.session();
    session.execute(&Statement::Begin).unwrap();
    session
        .execute(&insert_statement("items", vec![vec![Expr::int(7), Expr::text("q")]]))
        .unwrap();

    // Uncommitted writes are invisible outside the session
    assert_eq!(count(&db, "items"), 0);

    session.execute(&Statement::Commit).unwrap();
    assert_eq!(count(&db, "items"), 1);
}

#[timeout(1000)]
#[test]
fn test_concurrent_commit_conflicts() {
    let db = Database::new();
    create_items(&db);

    let mut session = db.session();
    session.execute(&Statement::Begin).unwrap();
    session
        .execute(&insert_statement("items", vec![vec![Expr::int(1), Expr::text("a")]]))
        .unwrap();

    insert(&db, "items", vec![vec![Expr::int(2), Expr::text("b")]]);

    let err = session.execute(&Statement::Commit).unwrap_err();
    assert!(matches!(err, DbError::TransactionConflict(_)));
    assert!(!session.in_transaction());
    assert_eq!(count(&db, "items"), 1);
}

#[timeout(1000)]
#[test]
fn test_failed_statement_keeps_transaction() {
    let db = Database::new();
    create_table(
        &db,
        "people",
        vec![ColumnDef::new("name", DataType::Text).not_null()],
    );

    let mut session = db.session();
    session.execute(&Statement::Begin).unwrap();
    session
        .execute(&insert_statement("people", vec![vec![Expr::text("ada")]]))
        .unwrap();
    let err = session
        .execute(&insert_statement(
            "people",
            vec![vec![Expr::text("bob")], vec![Expr::null()]],
        ))
        .unwrap_err();
    assert!(matches!(err, DbError::NotNullViolation { .. }));
    session.execute(&Statement::Commit).unwrap();

    // Neither row of the failed statement survives
    assert_eq!(count(&db, "people"), 1);
}

#[timeout(1000)]
#[test]
fn test_failed_autocommit_statement_writes_nothing() {
    let db = Database::new();
    create_table(
        &db,
        "people",
        vec![ColumnDef::new("name", DataType::Text).not_null()],
    );
    let err = db
        .execute(&insert_statement(
            "people",
            vec![vec![Expr::text("bob")], vec![Expr::null()]],
        ))
        .unwrap_err();
    assert!(matches!(err, DbError::NotNullViolation { .. }));
    assert_eq!(count(&db, "people"), 0);
}

#[timeout(1000)]
#[test]
fn test_transaction_control_needs_session() {
    let db = Database::new();
    for statement in [Statement::Begin, Statement::Commit, Statement::Rollback] {
        assert!(matches!(
            db.execute(&statement),
            Err(DbError::NotSupported(_))
        ));
    }
}

#[timeout(1000)]
#[test]
fn test_nested_begin_fails() {
    let db = Database::new();
    let mut session = db.session();
    session.execute(&Statement::Begin).unwrap();
    assert!(matches!(
        session.execute(&Statement::Begin),
        Err(DbError::Query(_))
    ));
    assert!(session.in_transaction());
}

#[timeout(1000)]
#[test]
fn test_commit_without_transaction_is_noop() {
    let db = Database::new();
    let mut session = db.session();
    let result = session.execute(&Statement::Commit).unwrap();
    assert_eq!(result.command, "COMMIT");
}

#[timeout(1000)]
#[test]
fn test_schema_change_inside_transaction_rejected() {
    let db = Database::new();
    let mut session = db.session();
    session.execute(&Statement::Begin).unwrap();
    let err = session
        .execute(&Statement::DropTable {
            name: "items".to_string(),
            if_exists: true,
        })
        .unwrap_err();
    assert!(matches!(err, DbError::NotSupported(_)));
}

#[timeout(1000)]
#[test]
fn test_schema_change_conflicts_with_open_transaction() {
    let db = Database::new();
    create_items(&db);

    let mut session = db.session();
    session.execute(&Statement::Begin).unwrap();
    create_table(&db, "other", vec![ColumnDef::new("id", DataType::Integer)]);

    let err = session
        .execute(&insert_statement("items", vec![vec![Expr::int(1), Expr::text("a")]]))
        .unwrap_err();
    assert!(matches!(err, DbError::TransactionConflict(_)));
}

#[timeout(1000)]
#[test]
fn test_dropped_session_rolls_back() {
    let db = Database::new();
    create_items(&db);
    {
        let mut session = db.session();
        session.execute(&Statement::Begin).unwrap();
        session
            .execute(&insert_statement("items", vec![vec![Expr::int(1), Expr::text("a")]]))
            .unwrap();
    }
    assert_eq!(count(&db, "items"), 0);
}

#[timeout(1000)]
#[test]
fn test_execute_all_stops_at_first_error() {
    let db = Database::new();
    create_items(&db);
    let mut session = db.session();
    let result = session.execute_all(&[
        insert_statement("items", vec![vec![Expr::int(1), Expr::text("a")]]),
        insert_statement("missing", vec![vec![Expr::int(1)]]),
        insert_statement("items", vec![vec![Expr::int(2), Expr::text("b")]]),
    ]);
    assert!(matches!(result, Err(DbError::TableNotFound { .. })));
    assert_eq!(count(&db, "items"), 1);
}
