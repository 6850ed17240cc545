//! SELECT: filters, joins, set operations and plans.

use ntest::timeout;

use mirage_core::ast::{
    BinaryOp, ColumnDef, Expr, FromItem, JoinKind, Query, Select, SelectItem, SetExpr, Statement,
};
use mirage_core::eval::FunctionDefinition;
use mirage_core::{DataType, Database, DbConfig, DbError, Value};

use crate::helpers::*;

fn seeded() -> Database {
    let db = Database::new();
    create_items(&db);
    seed_items(&db);
    db
}

fn column_a(select: Select) -> Select {
    Select {
        projection: vec![SelectItem::expr(Expr::col("a"))],
        ..select
    }
}

#[timeout(1000)]
#[test]
fn test_select_without_from_folds_constants() {
    let db = Database::new();
    let result = select(
        &db,
        Select {
            projection: vec![SelectItem::aliased(
                Expr::binary(Expr::int(1), BinaryOp::Plus, Expr::int(2)),
                "three",
            )],
            ..Default::default()
        },
    );
    assert_eq!(result.columns[0].name, "three");
    assert_eq!(result.rows, vec![vec![Value::Integer(3)]]);
}

#[timeout(1000)]
#[test]
fn test_indexed_conjunction_through_database() {
    let db = seeded();
    let query = Select::from_table("items", vec![SelectItem::Wildcard])
        .filter(Expr::col("a").gt(Expr::int(1)).and(Expr::col("b").eq(Expr::text("x"))));

    let result = select(&db, query.clone());
    assert_eq!(result.rows, vec![vec![Value::Integer(2), Value::text("x")]]);

    let plan = explain(&db, query);
    let kinds = plan.node_kinds();
    assert!(kinds.contains(&"and"), "{}", plan);
    assert!(kinds.contains(&"ineq_filter"), "{}", plan);
}

#[timeout(1000)]
#[test]
fn test_explain_rows_render_plan() {
    let db = seeded();
    let statement = Statement::Explain(Box::new(Statement::Select(Query::select(
        Select::from_table("items", vec![SelectItem::Wildcard])
            .filter(Expr::col("a").eq(Expr::int(2))),
    ))));
    let result = db.execute(&statement).unwrap();
    assert_eq!(result.command, "EXPLAIN");
    assert_eq!(result.columns[0].name, "QUERY PLAN");
    assert_eq!(result.row_count, result.rows.len());
    assert!(result
        .rows
        .iter()
        .any(|r| r[0].as_str().is_some_and(|line| line.contains("eq_filter"))));

    let err = db
        .execute(&Statement::Explain(Box::new(insert_statement(
            "items",
            vec![vec![Expr::int(1), Expr::text("a")]],
        ))))
        .unwrap_err();
    assert!(matches!(err, DbError::NotSupported(_)));
}

#[timeout(1000)]
#[test]
fn test_order_limit_offset() {
    let db = seeded();
    let query = Query::select(column_a(Select::from_table("items", Vec::new())))
        .order_by(Expr::col("a"), false)
        .limit(2)
        .offset(1);
    let result = db.execute(&Statement::Select(query)).unwrap();
    assert_eq!(
        result.values("a").unwrap(),
        vec![Value::Integer(2), Value::Integer(2)]
    );

    // Nulls sort last ascending and first descending
    let query = Query::select(column_a(Select::from_table("items", Vec::new())))
        .order_by(Expr::col("a"), true)
        .limit(1);
    let result = db.execute(&Statement::Select(query)).unwrap();
    assert_eq!(result.values("a").unwrap(), vec![Value::Null]);
}

#[timeout(1000)]
#[test]
fn test_order_by_ordinal_and_output_name() {
    let db = seeded();
    let projection = vec![SelectItem::aliased(Expr::col("a"), "n")];
    for key in [Expr::int(1), Expr::col("n")] {
        let query = Query::select(
            Select::from_table("items", projection.clone())
                .filter(Expr::col("a").is_null(true)),
        )
        .order_by(key, true);
        let result = db.execute(&Statement::Select(query)).unwrap();
        assert_eq!(sorted_ints(result.values("n").unwrap()), vec![1, 2, 2, 3]);
        assert_eq!(result.rows[0][0], Value::Integer(3));
    }

    let query = Query::select(Select::from_table("items", projection)).order_by(Expr::int(5), false);
    assert!(matches!(
        db.execute(&Statement::Select(query)),
        Err(DbError::Query(_))
    ));
}

#[timeout(1000)]
#[test]
fn test_distinct() {
    let db = seeded();
    let result = select(
        &db,
        Select {
            distinct: true,
            ..Select::from_table("items", vec![SelectItem::expr(Expr::col("b"))])
        },
    );
    assert_eq!(result.row_count, 3);
}

#[timeout(1000)]
#[test]
fn test_union_widens_types() {
    let db = seeded();
    let left = SetExpr::Select(Box::new(column_a(
        Select::from_table("items", Vec::new()).filter(Expr::col("a").eq(Expr::int(1))),
    )));
    let right = SetExpr::Values(vec![vec![Expr::float(1.5)], vec![Expr::float(1.0)]]);
    let query = Query {
        body: SetExpr::Union {
            left: Box::new(left),
            right: Box::new(right),
            all: false,
        },
        order_by: Vec::new(),
        limit: None,
        offset: None,
    };
    let result = db.execute(&Statement::Select(query)).unwrap();
    assert_eq!(result.columns[0].data_type, DataType::Float);
    // 1 and 1.0 collapse once widened
    assert_eq!(result.row_count, 2);
}

#[timeout(1000)]
#[test]
fn test_union_of_unrelated_types_fails() {
    let db = seeded();
    let query = Query {
        body: SetExpr::Union {
            left: Box::new(SetExpr::Values(vec![vec![Expr::int(1)]])),
            right: Box::new(SetExpr::Values(vec![vec![Expr::boolean(true)]])),
            all: true,
        },
        order_by: Vec::new(),
        limit: None,
        offset: None,
    };
    assert!(matches!(
        db.execute(&Statement::Select(query)),
        Err(DbError::Cast { .. })
    ));
}

mod joins {
    use super::*;

    fn with_labels() -> Database {
        let db = seeded();
        create_table(
            &db,
            "labels",
            vec![
                ColumnDef::new("b", DataType::Text).primary_key(),
                ColumnDef::new("label", DataType::Text),
            ],
        );
        insert(
            &db,
            "labels",
            vec![
                vec![Expr::text("x"), Expr::text("ex")],
                vec![Expr::text("y"), Expr::text("why")],
            ],
        );
        db
    }

    fn joined(kind: JoinKind) -> Select {
        Select {
            projection: vec![
                SelectItem::expr(Expr::qcol("i", "a")),
                SelectItem::expr(Expr::qcol("l", "label")),
            ],
            from: vec![FromItem::aliased("items", "i").join(
                FromItem::aliased("labels", "l"),
                kind,
                Some(Expr::qcol("i", "b").eq(Expr::qcol("l", "b"))),
            )],
            ..Default::default()
        }
    }

    #[timeout(1000)]
    #[test]
    fn test_inner_join() {
        let db = with_labels();
        let result = select(&db, joined(JoinKind::Inner));
        assert_eq!(result.row_count, 4);
        assert_eq!(result.columns[1].name, "label");
    }

    #[timeout(1000)]
    #[test]
    fn test_left_join_pads_with_nulls() {
        let db = with_labels();
        let result = select(&db, joined(JoinKind::Left));
        assert_eq!(result.row_count, 5);
        let unmatched: Vec<&Vec<Value>> = result.rows.iter().filter(|r| r[1].is_null()).collect();
        assert_eq!(unmatched, vec![&vec![Value::Integer(3), Value::Null]]);
    }

    #[timeout(1000)]
    #[test]
    fn test_join_without_condition() {
        let db = with_labels();
        let mut select = joined(JoinKind::Inner);
        if let FromItem::Join { on, .. } = &mut select.from[0] {
            *on = None;
        }
        assert!(matches!(
            db.execute(&Statement::Select(Query::select(select))),
            Err(DbError::Query(_))
        ));

        // Comma joins are cross products
        let cross = Select {
            projection: vec![SelectItem::expr(Expr::count_star())],
            from: vec![FromItem::table("items"), FromItem::table("labels")],
            ..Default::default()
        };
        assert_eq!(select_scalar(&db, cross), Value::BigInt(10));
    }

    #[timeout(1000)]
    #[test]
    fn test_ambiguous_column() {
        let db = with_labels();
        let select = Select {
            projection: vec![SelectItem::expr(Expr::col("b"))],
            from: vec![FromItem::table("items").join(
                FromItem::table("labels"),
                JoinKind::Cross,
                None,
            )],
            ..Default::default()
        };
        assert!(matches!(
            db.execute(&Statement::Select(Query::select(select))),
            Err(DbError::AmbiguousColumn { .. })
        ));
    }

    fn select_scalar(db: &Database, query: Select) -> Value {
        crate::helpers::select(db, query).scalar().cloned().unwrap_or(Value::Null)
    }
}

#[timeout(1000)]
#[test]
fn test_subquery_in_from() {
    let db = seeded();
    let inner = Query::select(
        Select::from_table("items", vec![SelectItem::aliased(Expr::col("a"), "n")])
            .filter(Expr::col("b").eq(Expr::text("x"))),
    );
    let outer = Select {
        projection: vec![SelectItem::expr(Expr::qcol("s", "n"))],
        from: vec![FromItem::Subquery {
            query: Box::new(inner),
            alias: mirage_core::ast::TableAlias {
                name: "s".to_string(),
                columns: Vec::new(),
            },
        }],
        selection: Some(Expr::col("n").gt(Expr::int(1))),
        ..Default::default()
    };
    let result = select(&db, outer);
    assert_eq!(result.values("n").unwrap(), vec![Value::Integer(2)]);
}

#[timeout(1000)]
#[test]
fn test_default_limit_applies_to_top_level() {
    let db = Database::with_config(DbConfig {
        default_limit: Some(2),
        ..Default::default()
    });
    create_items(&db);
    seed_items(&db);

    let all = Select::from_table("items", vec![SelectItem::Wildcard]);
    assert_eq!(select(&db, all.clone()).row_count, 2);

    let explicit = Query::select(all).limit(4);
    assert_eq!(db.execute(&Statement::Select(explicit)).unwrap().row_count, 4);

    // Aggregates see every row
    assert_eq!(count(&db, "items"), 5);
}

#[timeout(1000)]
#[test]
fn test_registered_function() {
    let db = seeded();
    db.register_function(FunctionDefinition::new(
        "double",
        vec![DataType::Integer],
        DataType::Integer,
        |args| match &args[0] {
            Value::Integer(i) => Ok(Value::Integer(i * 2)),
            other => Err(DbError::Internal(format!("unexpected {:?}", other))),
        },
    ))
    .unwrap();

    let result = select(
        &db,
        Select::from_table(
            "items",
            vec![SelectItem::expr(Expr::call("double", vec![Expr::col("a")]))],
        )
        .filter(Expr::col("a").eq(Expr::int(3))),
    );
    assert_eq!(result.columns[0].name, "double");
    assert_eq!(result.scalar(), Some(&Value::Integer(6)));

    let err = db
        .execute(&Statement::Select(Query::select(Select::from_table(
            "items",
            vec![SelectItem::expr(Expr::call("double", vec![Expr::col("b")]))],
        ))))
        .unwrap_err();
    assert!(matches!(err, DbError::FunctionNotFound(_)));
}

#[timeout(1000)]
#[test]
fn test_unknown_column() {
    let db = seeded();
    let err = db
        .execute(&Statement::Select(Query::select(Select::from_table(
            "items",
            vec![SelectItem::expr(Expr::col("zzz"))],
        ))))
        .unwrap_err();
    assert!(matches!(err, DbError::ColumnNotFound { .. }));
}

#[timeout(1000)]
#[test]
fn test_statement_from_json() {
    let db = seeded();
    let json = r#"{"select": {"body": {"select": {
        "projection": [{"expr": {"expr": {"column": {"table": null, "name": "b"}}, "alias": null}}],
        "from": [{"table": {"name": "items"}}],
        "where": {"binary": {"op": "eq", "left": {"column": {"table": null, "name": "a"}}, "right": {"literal": {"integer": 3}}}}
    }}}}"#;
    let statement: Statement = serde_json::from_str(json).unwrap();
    let result = db.execute(&statement).unwrap();
    assert_eq!(result.values("b").unwrap(), vec![Value::text("xy")]);
}

#[timeout(1000)]
#[test]
fn test_range_lookup_with_residual_check() {
    let db = Database::new();
    create_table(
        &db,
        "t",
        vec![
            ColumnDef::new("a", DataType::Integer),
            ColumnDef::new("b", DataType::Text),
        ],
    );
    create_index(&db, "t", "a");
    insert(
        &db,
        "t",
        vec![
            vec![Expr::int(1), Expr::text("x")],
            vec![Expr::int(2), Expr::text("y")],
            vec![Expr::int(3), Expr::text("x")],
        ],
    );
    let query = Select::from_table("t", vec![SelectItem::Wildcard])
        .filter(Expr::col("a").gt(Expr::int(1)).and(Expr::col("b").eq(Expr::text("x"))));
    assert_eq!(
        select(&db, query.clone()).rows,
        vec![vec![Value::Integer(3), Value::text("x")]]
    );

    let plan = explain(&db, query);
    let and = plan.find("and").expect("intersected plan");
    let kinds: Vec<&str> = and.children.iter().map(|c| c.node.as_str()).collect();
    assert_eq!(kinds, vec!["ineq_filter", "seq_scan"], "{}", plan);
}

#[timeout(1000)]
#[test]
fn test_union_widens_integer_to_bigint() {
    let db = Database::new();
    create_table(&db, "small", vec![ColumnDef::new("n", DataType::Integer)]);
    create_table(&db, "large", vec![ColumnDef::new("n", DataType::BigInt)]);
    insert(&db, "small", vec![vec![Expr::int(1)], vec![Expr::int(2)]]);
    insert(&db, "large", vec![vec![Expr::int(2)], vec![Expr::int(3)]]);

    let side = |table: &str| {
        Box::new(SetExpr::Select(Box::new(Select::from_table(
            table,
            vec![SelectItem::Wildcard],
        ))))
    };
    let query = Query {
        body: SetExpr::Union {
            left: side("small"),
            right: side("large"),
            all: false,
        },
        order_by: Vec::new(),
        limit: None,
        offset: None,
    };
    let result = db.execute(&Statement::Select(query)).unwrap();
    assert_eq!(result.columns[0].data_type, DataType::BigInt);
    let mut values = result.values("n").unwrap();
    values.sort();
    assert_eq!(values, vec![Value::BigInt(1), Value::BigInt(2), Value::BigInt(3)]);
}

/// `SELECT s.<column> FROM (<query>) s WHERE <predicate>`
fn from_subquery(db: &Database, query: Query, predicate: Expr, column: &str) -> Vec<Value> {
    let outer = Select {
        projection: vec![SelectItem::expr(Expr::qcol("s", column))],
        from: vec![FromItem::Subquery {
            query: Box::new(query),
            alias: mirage_core::ast::TableAlias {
                name: "s".to_string(),
                columns: Vec::new(),
            },
        }],
        selection: Some(predicate),
        ..Default::default()
    };
    select(db, outer).values(column).unwrap()
}

#[timeout(1000)]
#[test]
fn test_conjunction_over_limited_groups() {
    let db = seeded();
    let groups = Query::select(
        Select::from_table(
            "items",
            vec![
                SelectItem::expr(Expr::col("b")),
                SelectItem::aliased(Expr::count_star(), "c"),
            ],
        )
        .group_by(vec![Expr::col("b")]),
    )
    .limit(10);

    let single = from_subquery(&db, groups.clone(), Expr::col("b").eq(Expr::text("x")), "b");
    assert_eq!(single, vec![Value::text("x")]);

    let both = Expr::col("b")
        .eq(Expr::text("x"))
        .and(Expr::col("c").gt(Expr::int(0)));
    assert_eq!(from_subquery(&db, groups.clone(), both, "b"), vec![Value::text("x")]);

    let mut distinct = groups;
    if let SetExpr::Select(select) = &mut distinct.body {
        select.distinct = true;
    }
    let both = Expr::col("c")
        .gt(Expr::int(1))
        .and(Expr::col("b").eq(Expr::text("x")));
    assert_eq!(from_subquery(&db, distinct, both, "b"), vec![Value::text("x")]);
}

#[timeout(1000)]
#[test]
fn test_conjunction_over_limited_values() {
    let db = Database::new();
    let rows = Query {
        body: SetExpr::Values(vec![
            vec![Expr::int(1), Expr::text("x")],
            vec![Expr::int(2), Expr::text("y")],
            vec![Expr::int(3), Expr::text("x")],
        ]),
        order_by: Vec::new(),
        limit: Some(Expr::int(2)),
        offset: None,
    };
    let predicate = Expr::col("column2")
        .eq(Expr::text("x"))
        .and(Expr::col("column1").gt(Expr::int(0)));
    assert_eq!(
        from_subquery(&db, rows, predicate, "column1"),
        vec![Value::Integer(1)]
    );
}
