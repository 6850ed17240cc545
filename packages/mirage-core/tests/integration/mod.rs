//! Integration test suite.
//!
//! Sections:
//! 1. Transactions, sessions and backups
//! 2. Data modification and constraints
//! 3. Schema changes
//! 4. Queries, plans and aggregation

pub mod aggregation_tests;
pub mod ddl_tests;
pub mod dml_tests;
pub mod helpers;
pub mod query_tests;
pub mod transaction_tests;
