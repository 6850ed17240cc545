//! Index abstraction: keyed lookups over table expressions with row-count
//! estimates for planning.

mod btree;
mod wrappers;

use std::fmt;
use std::ops::Bound;

use crate::error::Result;
use crate::eval::Evaluator;
use crate::row::Row;
use crate::selection::Explanation;
use crate::transaction::Transaction;
use crate::types::Value;

pub use btree::BTreeIndex;
pub use wrappers::Index;

/// Lazily produced rows.
pub type RowIter<'a> = Box<dyn Iterator<Item = Result<Row>> + 'a>;

/// Tuple of index expression values.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IndexKey(pub Vec<Value>);

impl IndexKey {
    pub fn single(value: Value) -> Self {
        IndexKey(vec![value])
    }

    pub fn has_null(&self) -> bool {
        self.0.iter().any(Value::is_null)
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|v| if v.is_null() { "NULL".to_string() } else { v.to_string() })
            .collect();
        write!(f, "({})", parts.join(", "))
    }
}

/// Lookup operation against an index.
///
/// Keys containing a null never match, except for `Eq` with `match_null`,
/// which grouping uses to collect the null group.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexOp {
    Eq { key: IndexKey, match_null: bool },
    Neq { key: IndexKey },
    Gt { key: IndexKey },
    Ge { key: IndexKey },
    Lt { key: IndexKey },
    Le { key: IndexKey },
    /// `lo <= key <= hi`
    Inside { lo: IndexKey, hi: IndexKey },
    /// `key < lo or key > hi`
    Outside { lo: IndexKey, hi: IndexKey },
    /// Key equal to none of `keys`
    Nin { keys: Vec<IndexKey> },
    /// Single text key beginning with `prefix`
    StartsWith { prefix: String },
}

impl IndexOp {
    pub fn eq(key: IndexKey) -> Self {
        IndexOp::Eq {
            key,
            match_null: false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            IndexOp::Eq { .. } => "eq",
            IndexOp::Neq { .. } => "neq",
            IndexOp::Gt { .. } => "gt",
            IndexOp::Ge { .. } => "ge",
            IndexOp::Lt { .. } => "lt",
            IndexOp::Le { .. } => "le",
            IndexOp::Inside { .. } => "inside",
            IndexOp::Outside { .. } => "outside",
            IndexOp::Nin { .. } => "nin",
            IndexOp::StartsWith { .. } => "starts_with",
        }
    }

    /// Whether a row whose indexed values are `key` satisfies this operation.
    pub fn matches(&self, key: &IndexKey) -> bool {
        if let IndexOp::Eq {
            key: wanted,
            match_null: true,
        } = self
        {
            return key == wanted;
        }
        if key.has_null() {
            return false;
        }
        match self {
            IndexOp::Eq { key: wanted, .. } => !wanted.has_null() && key == wanted,
            IndexOp::Neq { key: other } => !other.has_null() && key != other,
            IndexOp::Gt { key: bound } => !bound.has_null() && key > bound,
            IndexOp::Ge { key: bound } => !bound.has_null() && key >= bound,
            IndexOp::Lt { key: bound } => !bound.has_null() && key < bound,
            IndexOp::Le { key: bound } => !bound.has_null() && key <= bound,
            IndexOp::Inside { lo, hi } => key >= lo && key <= hi,
            IndexOp::Outside { lo, hi } => key < lo || key > hi,
            IndexOp::Nin { keys } => !keys.iter().any(|k| k == key),
            IndexOp::StartsWith { prefix } => match key.0.as_slice() {
                [Value::Text(text)] => text.starts_with(prefix.as_str()),
                _ => false,
            },
        }
    }

    /// Key range that contains every match.
    pub fn bounds(&self) -> (Bound<IndexKey>, Bound<IndexKey>) {
        match self {
            IndexOp::Eq { key, .. } => (Bound::Included(key.clone()), Bound::Included(key.clone())),
            IndexOp::Gt { key } => (Bound::Excluded(key.clone()), Bound::Unbounded),
            IndexOp::Ge { key } => (Bound::Included(key.clone()), Bound::Unbounded),
            IndexOp::Lt { key } => (Bound::Unbounded, Bound::Excluded(key.clone())),
            IndexOp::Le { key } => (Bound::Unbounded, Bound::Included(key.clone())),
            IndexOp::Inside { lo, hi } => (Bound::Included(lo.clone()), Bound::Included(hi.clone())),
            IndexOp::StartsWith { prefix } => (
                Bound::Included(IndexKey::single(Value::text(prefix))),
                prefix_successor(prefix)
                    .map_or(Bound::Unbounded, |s| Bound::Excluded(IndexKey::single(Value::text(s)))),
            ),
            IndexOp::Neq { .. } | IndexOp::Outside { .. } | IndexOp::Nin { .. } => {
                (Bound::Unbounded, Bound::Unbounded)
            }
        }
    }
}

/// Smallest string greater than every string starting with `prefix`, if
/// one exists.
fn prefix_successor(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    while let Some(last) = chars.pop() {
        if let Some(next) = (last as u32 + 1..=char::MAX as u32).find_map(char::from_u32) {
            chars.push(next);
            return Some(chars.into_iter().collect());
        }
    }
    None
}

impl fmt::Display for IndexOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexOp::Eq { key, .. }
            | IndexOp::Neq { key }
            | IndexOp::Gt { key }
            | IndexOp::Ge { key }
            | IndexOp::Lt { key }
            | IndexOp::Le { key } => write!(f, "{} {}", self.name(), key),
            IndexOp::Inside { lo, hi } | IndexOp::Outside { lo, hi } => {
                write!(f, "{} {}..{}", self.name(), lo, hi)
            }
            IndexOp::Nin { keys } => {
                let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                write!(f, "nin [{}]", keys.join(", "))
            }
            IndexOp::StartsWith { prefix } => write!(f, "{} '{}'", self.name(), prefix),
        }
    }
}

/// Lookup contract shared by table indices and their wrappers.
pub trait QueryIndex {
    /// Expressions whose values form the key, in key order.
    fn expressions(&self) -> &[Evaluator];

    /// Estimated number of rows `op` yields; never executes the lookup's
    /// row fetches.
    fn entropy(&self, op: &IndexOp, t: &Transaction) -> f64;

    /// Rows matching `op`.
    fn enumerate<'a>(&'a self, op: &'a IndexOp, t: &'a Transaction) -> RowIter<'a>;

    /// Every distinct key, in key order.
    fn iterate_keys<'a>(&'a self, t: &'a Transaction) -> Box<dyn Iterator<Item = IndexKey> + 'a>;

    fn explain(&self) -> Explanation;

    /// First row with the given key.
    fn eq_first(&self, key: &IndexKey, t: &Transaction) -> Result<Option<Row>> {
        let op = IndexOp::eq(key.clone());
        let first = self.enumerate(&op, t).next().transpose();
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;

    fn key(i: i32) -> IndexKey {
        IndexKey::single(Value::Integer(i))
    }

    #[timeout(1000)]
    #[test]
    fn test_starts_with_covers_max_code_point() {
        let op = IndexOp::StartsWith {
            prefix: "ab".to_string(),
        };
        let text = |s: &str| IndexKey::single(Value::text(s));
        for hit in ["ab", "abc", "ab\u{10FFFF}x"] {
            assert!(op.matches(&text(hit)), "{:?}", hit);
        }
        assert!(!op.matches(&text("ac")));
        assert!(!op.matches(&IndexKey::single(Value::Null)));
        assert_eq!(op.bounds().1, Bound::Excluded(text("ac")));

        assert_eq!(prefix_successor("a\u{10FFFF}"), Some("b".to_string()));
        assert_eq!(prefix_successor("\u{D7FF}"), Some("\u{E000}".to_string()));
        assert_eq!(prefix_successor("\u{10FFFF}"), None);
    }

    #[timeout(1000)]
    #[test]
    fn test_null_keys_only_match_null_equality() {
        let null = IndexKey::single(Value::Null);
        assert!(!IndexOp::Gt { key: key(0) }.matches(&null));
        assert!(!IndexOp::Neq { key: key(0) }.matches(&null));
        assert!(!IndexOp::eq(null.clone()).matches(&null));
        let grouping = IndexOp::Eq {
            key: null.clone(),
            match_null: true,
        };
        assert!(grouping.matches(&null));
        assert!(!grouping.matches(&key(1)));
    }

    #[timeout(1000)]
    #[test]
    fn test_range_operations() {
        let inside = IndexOp::Inside {
            lo: key(2),
            hi: key(4),
        };
        assert!(inside.matches(&key(2)) && inside.matches(&key(4)));
        assert!(!inside.matches(&key(5)));
        let outside = IndexOp::Outside {
            lo: key(2),
            hi: key(4),
        };
        assert!(outside.matches(&key(1)) && !outside.matches(&key(3)));
        let nin = IndexOp::Nin {
            keys: vec![key(1), key(2)],
        };
        assert!(!nin.matches(&key(1)) && nin.matches(&key(3)));
        assert!(IndexOp::Le { key: key(3) }.matches(&IndexKey::single(Value::BigInt(3))));
    }
}
