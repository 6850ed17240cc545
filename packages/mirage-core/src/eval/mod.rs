//! Expression engine: typed evaluator nodes, operators, functions and the
//! expression builder.

mod builder;
mod cache;
mod evaluator;
mod functions;
mod like;
pub mod operators;

pub use builder::{BuildContext, ExpressionBuilder, GroupingScope};
pub use cache::{CacheKey, ExpressionCache};
pub use evaluator::{reconcile_nodes, Args, ColumnRef, ComputeBuilder, Evaluator, Operation};
pub(crate) use evaluator::hash_of;
pub use functions::{FunctionDefinition, FunctionImpl, FunctionRegistry};
pub use like::{literal_prefix, LikeMatcher};
