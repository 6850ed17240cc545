//! Table schema, column definitions, and relation management.

mod column;
mod relation;
mod schema;
#[allow(clippy::module_inception)]
mod table;
pub(crate) mod validation;

pub use column::Column;
pub use relation::Relation;
pub use schema::Schema;
pub use table::Table;

#[cfg(test)]
mod tests {
    include!("tests.rs");
}
