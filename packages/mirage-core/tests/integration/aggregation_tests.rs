//! GROUP BY, HAVING and aggregation strategies.

use ntest::timeout;

use mirage_core::aggregation::build_aggregation;
use mirage_core::ast::{BinaryOp, ColumnDef, Expr, Query, Select, SelectItem, Statement};
use mirage_core::eval::{BuildContext, FunctionRegistry};
use mirage_core::selection::{Explanation, Selection};
use mirage_core::{DataType, Database, DbError, Value};

use crate::helpers::*;

fn seeded() -> Database {
    let db = Database::new();
    create_items(&db);
    seed_items(&db);
    db
}

fn strategy(plan: &Explanation) -> String {
    let node = plan.find("aggregate").expect("plan aggregates");
    let detail = node.detail.clone().unwrap_or_default();
    detail.split_whitespace().next().unwrap_or_default().to_string()
}

fn count_by(key: &str) -> Select {
    Select::from_table(
        "items",
        vec![
            SelectItem::expr(Expr::col(key)),
            SelectItem::expr(Expr::count_star()),
        ],
    )
    .group_by(vec![Expr::col(key)])
}

#[timeout(1000)]
#[test]
fn test_count_of_empty_table() {
    let db = Database::new();
    create_items(&db);
    assert_eq!(count(&db, "items"), 0);

    // Without GROUP BY an empty input still yields one row
    let result = select(
        &db,
        Select::from_table(
            "items",
            vec![
                SelectItem::expr(Expr::call("sum", vec![Expr::col("a")])),
                SelectItem::expr(Expr::call("max", vec![Expr::col("b")])),
            ],
        ),
    );
    assert_eq!(result.rows, vec![vec![Value::Null, Value::Null]]);

    // With GROUP BY it yields none
    assert_eq!(select(&db, count_by("b")).row_count, 0);
}

#[timeout(1000)]
#[test]
fn test_unfiltered_count_is_trivial() {
    let db = seeded();
    let query = Select::from_table("items", vec![SelectItem::expr(Expr::count_star())]);
    assert_eq!(strategy(&explain(&db, query)), "trivial");
    assert_eq!(count(&db, "items"), 5);

    // A filter forces a pass over the rows
    let filtered = Select::from_table("items", vec![SelectItem::expr(Expr::count_star())])
        .filter(Expr::col("b").eq(Expr::text("x")));
    assert_eq!(strategy(&explain(&db, filtered.clone())), "sequential");
    assert_eq!(select(&db, filtered).scalar(), Some(&Value::BigInt(3)));
}

#[timeout(1000)]
#[test]
fn test_group_by_indexed_column_reads_index() {
    let db = seeded();
    let query = count_by("a");
    assert_eq!(strategy(&explain(&db, query.clone())), "index");

    let result = select(&db, query);
    let mut groups: Vec<(Option<i64>, Value)> = result
        .rows
        .iter()
        .map(|r| (r[0].as_i64(), r[1].clone()))
        .collect();
    groups.sort();
    assert_eq!(
        groups,
        vec![
            (None, Value::BigInt(1)),
            (Some(1), Value::BigInt(1)),
            (Some(2), Value::BigInt(2)),
            (Some(3), Value::BigInt(1)),
        ]
    );
}

#[timeout(1000)]
#[test]
fn test_index_strategy_matches_sequential() {
    let db = seeded();
    let aggregates = |key: &str| {
        Select::from_table(
            "items",
            vec![
                SelectItem::expr(Expr::col(key)),
                SelectItem::expr(Expr::count_star()),
                SelectItem::expr(Expr::call("count", vec![Expr::col(key)])),
                SelectItem::expr(Expr::call("min", vec![Expr::col(key)])),
            ],
        )
        .group_by(vec![Expr::col(key)])
    };
    let indexed = aggregates("a");
    assert_eq!(strategy(&explain(&db, indexed.clone())), "index");
    let mut from_index = select(&db, indexed).rows;
    from_index.sort();

    db.execute(&Statement::DropIndex {
        name: "items_a_idx".to_string(),
        if_exists: false,
    })
    .unwrap();
    let sequential = aggregates("a");
    assert_eq!(strategy(&explain(&db, sequential.clone())), "sequential");
    let mut from_scan = select(&db, sequential).rows;
    from_scan.sort();

    assert_eq!(from_index, from_scan);
}

#[timeout(1000)]
#[test]
fn test_group_by_unindexed_column_is_sequential() {
    let db = seeded();
    let query = Query::select(count_by("b")).order_by(Expr::col("b"), false);
    let result = db.execute(&Statement::Select(query.clone())).unwrap();
    assert_eq!(
        result.rows,
        vec![
            vec![Value::text("x"), Value::BigInt(3)],
            vec![Value::text("xy"), Value::BigInt(1)],
            vec![Value::text("y"), Value::BigInt(1)],
        ]
    );
    assert_eq!(strategy(&explain(&db, count_by("b"))), "sequential");
}

#[timeout(1000)]
#[test]
fn test_having_filters_groups() {
    let db = seeded();
    let select = Select {
        having: Some(Expr::count_star().gt(Expr::int(1))),
        ..count_by("b")
    };
    let result = crate::helpers::select(&db, select);
    assert_eq!(result.rows, vec![vec![Value::text("x"), Value::BigInt(3)]]);
}

#[timeout(1000)]
#[test]
fn test_aggregate_expressions() {
    let db = seeded();
    let result = select(
        &db,
        Select::from_table(
            "items",
            vec![
                SelectItem::aliased(Expr::call("sum", vec![Expr::col("a")]), "total"),
                SelectItem::aliased(Expr::call("avg", vec![Expr::col("a")]), "mean"),
                SelectItem::aliased(
                    Expr::binary(
                        Expr::call("max", vec![Expr::col("a")]),
                        BinaryOp::Minus,
                        Expr::call("min", vec![Expr::col("a")]),
                    ),
                    "spread",
                ),
                SelectItem::aliased(
                    Expr::Function {
                        name: "count".to_string(),
                        args: vec![Expr::col("b")],
                        distinct: true,
                        star: false,
                    },
                    "labels",
                ),
            ],
        ),
    );
    assert_eq!(
        result.rows,
        vec![vec![
            Value::BigInt(8),
            Value::float(2.0),
            Value::Integer(2),
            Value::BigInt(3),
        ]]
    );
    assert_eq!(result.columns[1].data_type, DataType::Float);
}

#[timeout(1000)]
#[test]
fn test_ungrouped_column_rejected() {
    let db = seeded();
    let select = Select {
        projection: vec![
            SelectItem::expr(Expr::col("a")),
            SelectItem::expr(Expr::count_star()),
        ],
        ..count_by("b")
    };
    assert!(matches!(
        db.execute(&Statement::Select(Query::select(select))),
        Err(DbError::NotGrouped(_))
    ));
}

#[timeout(1000)]
#[test]
fn test_aggregate_in_where_rejected() {
    let db = seeded();
    let select = Select::from_table("items", vec![SelectItem::Wildcard])
        .filter(Expr::count_star().gt(Expr::int(1)));
    assert!(matches!(
        db.execute(&Statement::Select(Query::select(select))),
        Err(DbError::AggregateNotAllowed(_))
    ));
}

#[timeout(1000)]
#[test]
fn test_group_by_expression() {
    let db = Database::new();
    create_table(
        &db,
        "scores",
        vec![
            ColumnDef::new("player", DataType::Text),
            ColumnDef::new("points", DataType::Integer),
        ],
    );
    insert(
        &db,
        "scores",
        vec![
            vec![Expr::text("ann"), Expr::int(3)],
            vec![Expr::text("ANN"), Expr::int(4)],
            vec![Expr::text("bo"), Expr::int(5)],
        ],
    );
    let lower = Expr::call("lower", vec![Expr::col("player")]);
    let query = Query::select(
        Select::from_table(
            "scores",
            vec![
                SelectItem::aliased(lower.clone(), "who"),
                SelectItem::aliased(Expr::call("sum", vec![Expr::col("points")]), "total"),
            ],
        )
        .group_by(vec![lower]),
    )
    .order_by(Expr::col("who"), false);
    let result = db.execute(&Statement::Select(query)).unwrap();
    assert_eq!(
        result.rows,
        vec![
            vec![Value::text("ann"), Value::BigInt(7)],
            vec![Value::text("bo"), Value::BigInt(5)],
        ]
    );
}

#[timeout(1000)]
#[test]
fn test_aggregation_enumerates_identically() {
    let db = seeded();
    let t = db.snapshot();
    let functions = FunctionRegistry::with_builtins();
    let ctx = BuildContext::new(&functions);
    let base = Selection::scan(db.get_table("items").unwrap());

    for key in ["a", "b"] {
        let (groups, _) =
            build_aggregation(&base, &[Expr::col(key)], &[Expr::count_star()], ctx).unwrap();
        let first = groups.rows(&t).unwrap();
        let second = groups.rows(&t).unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.handle, b.handle);
            assert_eq!(a.values, b.values);
        }

        // Membership through a limit re-enumerates the groups
        let limited = groups.limit(Some(10), 0);
        for row in &first {
            assert!(limited.has_item(row, &t).unwrap(), "group {:?} of {}", row.values, key);
        }
        assert!(groups.distinct().has_item(&first[0], &t).unwrap());
    }
}
