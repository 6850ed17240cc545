//! Database configuration.

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Maximum number of built expressions kept in the expression cache
    /// (0 disables caching)
    pub expression_cache_capacity: usize,
    /// Run each statement of an explicit transaction in its own fork, so a
    /// failed statement leaves the transaction untouched
    pub statement_forks: bool,
    /// Row cap applied to queries without a `LIMIT` (none by default)
    pub default_limit: Option<usize>,
    /// Include entropy estimates in `EXPLAIN` output
    pub explain_entropy: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            expression_cache_capacity: 512,
            statement_forks: true,
            default_limit: None,
            explain_entropy: true,
        }
    }
}
