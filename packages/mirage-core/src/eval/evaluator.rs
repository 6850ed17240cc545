//! Typed expression nodes.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{DbError, Result};
use crate::row::Row;
use crate::transaction::Transaction;
use crate::types::{cast_value, parse_text, reconcile_types, DataType, Value};

/// Column dependency: `(namespace, column index)`.
pub type ColumnRef = (u64, usize);

/// Operation of a computed node. Arguments are evaluated lazily through
/// [`Args`], which lets operators short-circuit.
pub type Operation = Arc<dyn Fn(&Args<'_>) -> Result<Value> + Send + Sync>;

/// Lazy access to a computed node's dependencies for one evaluation.
pub struct Args<'a> {
    deps: &'a [Evaluator],
    row: Option<&'a Row>,
    t: &'a Transaction,
}

impl<'a> Args<'a> {
    /// Evaluates dependency `index`.
    pub fn get(&self, index: usize) -> Result<Value> {
        match self.deps.get(index) {
            Some(dep) => dep.get(self.row, self.t),
            None => Err(DbError::Internal(format!(
                "argument {} out of {}",
                index,
                self.deps.len()
            ))),
        }
    }

    /// Evaluates every dependency.
    pub fn all(&self) -> Result<Vec<Value>> {
        (0..self.deps.len()).map(|i| self.get(i)).collect()
    }

    pub fn len(&self) -> usize {
        self.deps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deps.is_empty()
    }

    pub fn transaction(&self) -> &Transaction {
        self.t
    }
}

enum Kind {
    Literal(Value),
    Column { index: usize },
    Computed { deps: Vec<Evaluator>, op: Operation },
}

struct Node {
    ty: DataType,
    hash: u64,
    name: String,
    used: Arc<BTreeSet<ColumnRef>>,
    impure: bool,
    is_any: bool,
    untyped: bool,
    kind: Kind,
}

/// A typed scalar expression over the rows of one selection.
///
/// Nodes are immutable and cheap to clone. Construction folds any node
/// whose dependencies are all constant into a literal, so a constant
/// expression is computed exactly once.
#[derive(Clone)]
pub struct Evaluator(Arc<Node>);

impl fmt::Debug for Evaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Evaluator")
            .field("name", &self.0.name)
            .field("type", &self.0.ty)
            .field("hash", &self.0.hash)
            .field("constant", &self.is_constant())
            .finish()
    }
}

pub(crate) fn hash_of(value: impl Hash) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

fn no_columns() -> Arc<BTreeSet<ColumnRef>> {
    Arc::new(BTreeSet::new())
}

impl Evaluator {
    /// Typed literal.
    pub fn literal(value: Value, ty: DataType) -> Self {
        let name = match &value {
            Value::Null => "NULL".to_string(),
            other => other.to_string(),
        };
        Evaluator(Arc::new(Node {
            hash: hash_of(("literal", &value, &ty)),
            ty,
            name,
            used: no_columns(),
            impure: false,
            is_any: false,
            untyped: false,
            kind: Kind::Literal(value),
        }))
    }

    /// Literal typed after its own value.
    pub fn constant(value: Value) -> Self {
        let ty = value.data_type();
        Self::literal(value, ty)
    }

    /// String literal whose type is decided by its context.
    pub fn untyped_text(text: &str) -> Self {
        let value = Value::text(text);
        Evaluator(Arc::new(Node {
            hash: hash_of(("literal", &value, &DataType::Text)),
            ty: DataType::Text,
            name: text.to_string(),
            used: no_columns(),
            impure: false,
            is_any: false,
            untyped: true,
            kind: Kind::Literal(value),
        }))
    }

    /// Reads column `index` of rows in `namespace`.
    pub fn column(namespace: u64, index: usize, ty: DataType, name: &str) -> Self {
        let used = Arc::new(BTreeSet::from([(namespace, index)]));
        Evaluator(Arc::new(Node {
            hash: hash_of(("column", namespace, index)),
            ty,
            name: name.to_string(),
            used,
            impure: false,
            is_any: false,
            untyped: false,
            kind: Kind::Column { index },
        }))
    }

    /// Starts a computed node.
    pub fn compute(name: impl Into<String>, ty: DataType, deps: Vec<Evaluator>) -> ComputeBuilder {
        ComputeBuilder {
            name: name.into(),
            ty,
            deps,
            key: 0,
            impure: false,
            is_any: false,
        }
    }

    pub fn data_type(&self) -> &DataType {
        &self.0.ty
    }

    /// Structural hash: equal for structurally identical expressions.
    pub fn hash(&self) -> u64 {
        self.0.hash
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn used_columns(&self) -> &BTreeSet<ColumnRef> {
        &self.0.used
    }

    /// Namespace of the rows this expression reads, if it reads any.
    pub fn origin(&self) -> Option<u64> {
        self.0.used.iter().next().map(|(ns, _)| *ns)
    }

    pub fn is_impure(&self) -> bool {
        self.0.impure
    }

    /// No column dependencies and not impure.
    pub fn is_constant(&self) -> bool {
        self.0.used.is_empty() && !self.0.impure
    }

    /// Already reduced to a literal.
    pub fn is_constant_real(&self) -> bool {
        matches!(self.0.kind, Kind::Literal(_))
    }

    pub fn constant_value(&self) -> Option<&Value> {
        match &self.0.kind {
            Kind::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Produces a set of values (`ANY(...)`) rather than a scalar.
    pub fn is_any(&self) -> bool {
        self.0.is_any
    }

    /// Untyped string literal.
    pub fn is_untyped(&self) -> bool {
        self.0.untyped
    }

    /// Column index read by a plain column node.
    pub fn column_index(&self) -> Option<usize> {
        match self.0.kind {
            Kind::Column { index } => Some(index),
            _ => None,
        }
    }

    /// Evaluates this expression against `row`.
    ///
    /// Constant expressions ignore the row; evaluating a non-constant
    /// expression without a row is an error.
    pub fn get(&self, row: Option<&Row>, t: &Transaction) -> Result<Value> {
        match &self.0.kind {
            Kind::Literal(v) => Ok(v.clone()),
            Kind::Column { index } => match row {
                Some(row) => Ok(row.get(*index).clone()),
                None => Err(DbError::Internal(format!(
                    "column \"{}\" evaluated without a row",
                    self.0.name
                ))),
            },
            Kind::Computed { deps, op } => {
                if row.is_none() && !self.0.used.is_empty() {
                    return Err(DbError::Internal(format!(
                        "expression \"{}\" evaluated without a row",
                        self.0.name
                    )));
                }
                op(&Args { deps, row, t })
            }
        }
    }

    /// Evaluates a predicate; null counts as false.
    pub fn test(&self, row: Option<&Row>, t: &Transaction) -> Result<bool> {
        Ok(self.get(row, t)?.as_bool().unwrap_or(false))
    }

    /// Derives a node applying `convert` to this node's value.
    pub fn set_conversion(
        &self,
        label: &str,
        ty: DataType,
        convert: impl Fn(Value) -> Result<Value> + Send + Sync + 'static,
    ) -> Result<Evaluator> {
        Evaluator::compute(self.0.name.clone(), ty, vec![self.clone()])
            .key(("conversion", label))
            .build(move |args| convert(args.get(0)?))
    }

    /// Explicit cast.
    pub fn cast(&self, to: &DataType) -> Result<Evaluator> {
        if self.0.ty == *to && !self.0.untyped {
            return Ok(self.clone());
        }
        if let (true, Some(Value::Text(text))) = (self.0.untyped, self.constant_value()) {
            let value = parse_text(text, to)?;
            return Ok(Evaluator::literal(value, to.clone()));
        }
        if !self.0.ty.can_cast(to) {
            return Err(DbError::cast(&self.0.ty, to));
        }
        let target = to.clone();
        self.set_conversion(&format!("cast {}", to), to.clone(), move |v| {
            cast_value(v, &target)
        })
    }

    /// Implicit conversion, allowed only along the type system's implicit
    /// rules (untyped literals convert to anything they parse as).
    pub fn convert_implicit(&self, to: &DataType) -> Result<Evaluator> {
        if self.0.ty == *to && !self.0.untyped {
            return Ok(self.clone());
        }
        if self.0.untyped {
            return self.cast(to);
        }
        if !self.0.ty.can_convert_implicit(to) {
            return Err(DbError::cast(&self.0.ty, to));
        }
        let target = to.clone();
        self.set_conversion(&format!("convert {}", to), to.clone(), move |v| {
            cast_value(v, &target)
        })
    }
}

/// Converts `nodes` to their common type.
///
/// Untyped literals do not take part in picking the type; they are parsed
/// into whatever the typed operands agree on (text if none is typed).
pub fn reconcile_nodes(nodes: &[Evaluator]) -> Result<(DataType, Vec<Evaluator>)> {
    let typed: Vec<&DataType> = nodes
        .iter()
        .filter(|n| !n.is_untyped())
        .map(|n| n.data_type())
        .collect();
    let ty = reconcile_types(typed)?;
    let converted = nodes
        .iter()
        .map(|n| n.convert_implicit(&ty))
        .collect::<Result<Vec<_>>>()?;
    Ok((ty, converted))
}

/// Builder for computed nodes; see [`Evaluator::compute`].
pub struct ComputeBuilder {
    name: String,
    ty: DataType,
    deps: Vec<Evaluator>,
    key: u64,
    impure: bool,
    is_any: bool,
}

impl ComputeBuilder {
    /// Identifies the operation in the structural hash.
    pub fn key(mut self, key: impl Hash) -> Self {
        self.key = hash_of(key);
        self
    }

    pub fn impure(mut self, impure: bool) -> Self {
        self.impure = impure;
        self
    }

    pub fn any(mut self) -> Self {
        self.is_any = true;
        self
    }

    /// Finishes the node, folding it into a literal when every dependency
    /// is constant.
    pub fn build(
        self,
        op: impl Fn(&Args<'_>) -> Result<Value> + Send + Sync + 'static,
    ) -> Result<Evaluator> {
        let mut used = BTreeSet::new();
        for dep in &self.deps {
            used.extend(dep.used_columns().iter().copied());
        }
        let namespaces: BTreeSet<u64> = used.iter().map(|(ns, _)| *ns).collect();
        if namespaces.len() > 1 {
            return Err(DbError::MultiOrigin);
        }
        let impure = self.impure || self.deps.iter().any(|d| d.is_impure());
        let dep_hashes: Vec<u64> = self.deps.iter().map(|d| d.hash()).collect();
        let hash = hash_of((self.key, &self.name, &self.ty, dep_hashes));
        let node = Evaluator(Arc::new(Node {
            ty: self.ty,
            hash,
            name: self.name,
            used: Arc::new(used),
            impure,
            is_any: self.is_any,
            untyped: false,
            kind: Kind::Computed {
                deps: self.deps,
                op: Arc::new(op),
            },
        }));
        if node.is_constant() && !node.is_any() {
            let value = node.get(None, &Transaction::new())?;
            let mut literal = Evaluator::literal(value, node.0.ty.clone());
            if let Some(inner) = Arc::get_mut(&mut literal.0) {
                inner.name = node.0.name.clone();
            }
            return Ok(literal);
        }
        Ok(node)
    }
}
