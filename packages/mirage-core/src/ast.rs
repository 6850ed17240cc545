//! Statement and expression tree consumed by the engine.
//!
//! The engine never parses SQL text; a parser (or a test) supplies these
//! nodes directly. All nodes are serde-(de)serializable so that scripts can
//! travel as JSON.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::types::DataType;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Statement {
    CreateTable(CreateTable),
    CreateIndex(CreateIndex),
    AlterTable(AlterTable),
    DropTable {
        name: String,
        #[serde(default)]
        if_exists: bool,
    },
    DropIndex {
        name: String,
        #[serde(default)]
        if_exists: bool,
    },
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    Select(Query),
    Explain(Box<Statement>),
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CreateTable {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub constraints: Vec<TableConstraint>,
    #[serde(default)]
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    /// Draws its default from a per-table counter
    #[serde(default)]
    pub serial: bool,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub default: Option<Expr>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub references: Option<ForeignKeyRef>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            serial: false,
            not_null: false,
            default: None,
            primary_key: false,
            unique: false,
            references: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn serial(mut self) -> Self {
        self.serial = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn default(mut self, expr: Expr) -> Self {
        self.default = Some(expr);
        self
    }

    pub fn references(mut self, table: impl Into<String>, column: Option<&str>) -> Self {
        self.references = Some(ForeignKeyRef {
            table: table.into(),
            column: column.map(str::to_string),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeyRef {
    pub table: String,
    /// Referenced column; defaults to the referenced table's primary key
    pub column: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableConstraint {
    PrimaryKey {
        name: Option<String>,
        columns: Vec<String>,
    },
    Unique {
        name: Option<String>,
        columns: Vec<String>,
    },
    ForeignKey {
        name: Option<String>,
        columns: Vec<String>,
        foreign_table: String,
        foreign_columns: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CreateIndex {
    pub name: Option<String>,
    pub table: String,
    pub expressions: Vec<Expr>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlterTable {
    pub table: String,
    pub action: AlterAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlterAction {
    AddColumn(ColumnDef),
    DropColumn {
        name: String,
        #[serde(default)]
        if_exists: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Insert {
    pub table: String,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
    pub source: InsertSource,
    #[serde(default)]
    pub returning: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Query(Box<Query>),
    DefaultValues,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignment {
    pub column: String,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Update {
    pub table: String,
    #[serde(default)]
    pub alias: Option<String>,
    pub assignments: Vec<Assignment>,
    #[serde(default, rename = "where")]
    pub selection: Option<Expr>,
    #[serde(default)]
    pub returning: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Delete {
    pub table: String,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default, rename = "where")]
    pub selection: Option<Expr>,
    #[serde(default)]
    pub returning: Vec<SelectItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    pub body: SetExpr,
    #[serde(default)]
    pub order_by: Vec<OrderByExpr>,
    #[serde(default)]
    pub limit: Option<Expr>,
    #[serde(default)]
    pub offset: Option<Expr>,
}

impl Query {
    pub fn select(select: Select) -> Self {
        Self {
            body: SetExpr::Select(Box::new(select)),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn order_by(mut self, expr: Expr, desc: bool) -> Self {
        self.order_by.push(OrderByExpr {
            expr,
            desc,
            nulls_first: None,
        });
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(Expr::int(limit));
        self
    }

    pub fn offset(mut self, offset: i64) -> Self {
        self.offset = Some(Expr::int(offset));
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetExpr {
    Select(Box<Select>),
    Values(Vec<Vec<Expr>>),
    Union {
        left: Box<SetExpr>,
        right: Box<SetExpr>,
        #[serde(default)]
        all: bool,
    },
    Query(Box<Query>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Select {
    #[serde(default)]
    pub distinct: bool,
    pub projection: Vec<SelectItem>,
    #[serde(default)]
    pub from: Vec<FromItem>,
    #[serde(default, rename = "where")]
    pub selection: Option<Expr>,
    #[serde(default)]
    pub group_by: Vec<Expr>,
    #[serde(default)]
    pub having: Option<Expr>,
}

impl Select {
    /// `SELECT <projection> FROM <table>`
    pub fn from_table(table: &str, projection: Vec<SelectItem>) -> Self {
        Self {
            projection,
            from: vec![FromItem::table(table)],
            ..Default::default()
        }
    }

    pub fn filter(mut self, predicate: Expr) -> Self {
        self.selection = Some(predicate);
        self
    }

    pub fn group_by(mut self, keys: Vec<Expr>) -> Self {
        self.group_by = keys;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectItem {
    Wildcard,
    QualifiedWildcard(String),
    Expr { expr: Expr, alias: Option<String> },
}

impl SelectItem {
    pub fn expr(expr: Expr) -> Self {
        SelectItem::Expr { expr, alias: None }
    }

    pub fn aliased(expr: Expr, alias: &str) -> Self {
        SelectItem::Expr {
            expr,
            alias: Some(alias.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableAlias {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
    Cross,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FromItem {
    Table {
        name: String,
        #[serde(default)]
        alias: Option<TableAlias>,
    },
    Subquery {
        query: Box<Query>,
        alias: TableAlias,
    },
    Join {
        left: Box<FromItem>,
        right: Box<FromItem>,
        kind: JoinKind,
        #[serde(default)]
        on: Option<Expr>,
    },
}

impl FromItem {
    pub fn table(name: &str) -> Self {
        FromItem::Table {
            name: name.to_string(),
            alias: None,
        }
    }

    pub fn aliased(name: &str, alias: &str) -> Self {
        FromItem::Table {
            name: name.to_string(),
            alias: Some(TableAlias {
                name: alias.to_string(),
                columns: Vec::new(),
            }),
        }
    }

    pub fn join(self, right: FromItem, kind: JoinKind, on: Option<Expr>) -> Self {
        FromItem::Join {
            left: Box::new(self),
            right: Box::new(right),
            kind,
            on,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderByExpr {
    pub expr: Expr,
    #[serde(default)]
    pub desc: bool,
    /// Defaults to nulls last ascending, nulls first descending
    #[serde(default)]
    pub nulls_first: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Null,
    Bool(bool),
    Integer(i64),
    Float(OrderedFloat<f64>),
    /// Untyped string literal; converts to the type its context expects
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Concat,
    /// jsonb `->`
    JsonGet,
    /// jsonb `->>`
    JsonGetText,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::Modulo => "%",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
            BinaryOp::Concat => "||",
            BinaryOp::JsonGet => "->",
            BinaryOp::JsonGetText => "->>",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Minus,
    Plus,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Literal),
    Column {
        table: Option<String>,
        name: String,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    IsNull {
        expr: Box<Expr>,
        #[serde(default)]
        negated: bool,
    },
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        #[serde(default)]
        negated: bool,
    },
    Between {
        expr: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        #[serde(default)]
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        #[serde(default)]
        negated: bool,
        #[serde(default)]
        case_insensitive: bool,
    },
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        #[serde(default)]
        else_result: Option<Box<Expr>>,
    },
    Cast {
        expr: Box<Expr>,
        to: DataType,
    },
    Function {
        name: String,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        distinct: bool,
        /// `count(*)`
        #[serde(default)]
        star: bool,
    },
    Array(Vec<Expr>),
    /// 1-based array subscript
    Subscript {
        expr: Box<Expr>,
        index: Box<Expr>,
    },
    Any(Box<Expr>),
    /// `DEFAULT` in an insert or update value position
    Default,
}

impl Expr {
    pub fn col(name: &str) -> Expr {
        Expr::Column {
            table: None,
            name: name.to_string(),
        }
    }

    pub fn qcol(table: &str, name: &str) -> Expr {
        Expr::Column {
            table: Some(table.to_string()),
            name: name.to_string(),
        }
    }

    pub fn int(value: i64) -> Expr {
        Expr::Literal(Literal::Integer(value))
    }

    pub fn float(value: f64) -> Expr {
        Expr::Literal(Literal::Float(OrderedFloat(value)))
    }

    pub fn text(value: &str) -> Expr {
        Expr::Literal(Literal::String(value.to_string()))
    }

    pub fn boolean(value: bool) -> Expr {
        Expr::Literal(Literal::Bool(value))
    }

    pub fn null() -> Expr {
        Expr::Literal(Literal::Null)
    }

    pub fn binary(left: Expr, op: BinaryOp, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(self, right: Expr) -> Expr {
        Expr::binary(self, BinaryOp::Eq, right)
    }

    pub fn gt(self, right: Expr) -> Expr {
        Expr::binary(self, BinaryOp::Gt, right)
    }

    pub fn lt(self, right: Expr) -> Expr {
        Expr::binary(self, BinaryOp::Lt, right)
    }

    pub fn and(self, right: Expr) -> Expr {
        Expr::binary(self, BinaryOp::And, right)
    }

    pub fn or(self, right: Expr) -> Expr {
        Expr::binary(self, BinaryOp::Or, right)
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Function {
            name: name.to_string(),
            args,
            distinct: false,
            star: false,
        }
    }

    pub fn count_star() -> Expr {
        Expr::Function {
            name: "count".to_string(),
            args: Vec::new(),
            distinct: false,
            star: true,
        }
    }

    pub fn cast(self, to: DataType) -> Expr {
        Expr::Cast {
            expr: Box::new(self),
            to,
        }
    }

    pub fn in_list(self, list: Vec<Expr>, negated: bool) -> Expr {
        Expr::InList {
            expr: Box::new(self),
            list,
            negated,
        }
    }

    pub fn like(self, pattern: &str) -> Expr {
        Expr::Like {
            expr: Box::new(self),
            pattern: Box::new(Expr::text(pattern)),
            negated: false,
            case_insensitive: false,
        }
    }

    pub fn between(self, low: Expr, high: Expr, negated: bool) -> Expr {
        Expr::Between {
            expr: Box::new(self),
            low: Box::new(low),
            high: Box::new(high),
            negated,
        }
    }

    pub fn is_null(self, negated: bool) -> Expr {
        Expr::IsNull {
            expr: Box::new(self),
            negated,
        }
    }

    /// Whether this expression is a call to one of `aggregates`.
    pub fn is_aggregate_call(&self, is_aggregate: &dyn Fn(&str) -> bool) -> bool {
        matches!(self, Expr::Function { name, .. } if is_aggregate(&name.to_lowercase()))
    }

    /// Visits this expression and its sub-expressions, parents first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr) -> bool) {
        if !visit(self) {
            return;
        }
        match self {
            Expr::Literal(_) | Expr::Column { .. } | Expr::Default => {}
            Expr::Binary { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Unary { expr, .. }
            | Expr::IsNull { expr, .. }
            | Expr::Cast { expr, .. }
            | Expr::Any(expr) => expr.walk(visit),
            Expr::InList { expr, list, .. } => {
                expr.walk(visit);
                for item in list {
                    item.walk(visit);
                }
            }
            Expr::Between {
                expr, low, high, ..
            } => {
                expr.walk(visit);
                low.walk(visit);
                high.walk(visit);
            }
            Expr::Like { expr, pattern, .. } => {
                expr.walk(visit);
                pattern.walk(visit);
            }
            Expr::Case {
                operand,
                branches,
                else_result,
            } => {
                if let Some(operand) = operand {
                    operand.walk(visit);
                }
                for (when, then) in branches {
                    when.walk(visit);
                    then.walk(visit);
                }
                if let Some(else_result) = else_result {
                    else_result.walk(visit);
                }
            }
            Expr::Function { args, .. } | Expr::Array(args) => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::Subscript { expr, index } => {
                expr.walk(visit);
                index.walk(visit);
            }
        }
    }
}
