use crate::error::Result;

use super::transaction::Transaction;

/// RAII guard over a fork of a parent transaction.
///
/// If the fork is not explicitly committed, it is rolled back when the
/// handle is dropped and the parent is left untouched.
#[derive(Debug)]
pub struct TransactionHandle<'p> {
    parent: &'p mut Transaction,
    child: Option<Transaction>,
}

impl<'p> TransactionHandle<'p> {
    /// Forks `parent` and guards the fork.
    pub fn fork(parent: &'p mut Transaction) -> Self {
        let child = parent.fork();
        Self {
            parent,
            child: Some(child),
        }
    }

    /// Gets a mutable reference to the guarded fork.
    pub fn transaction_mut(&mut self) -> &mut Transaction {
        self.child
            .get_or_insert_with(|| unreachable!("fork is present until commit or rollback"))
    }

    /// Gets the guarded fork.
    pub fn transaction(&self) -> &Transaction {
        self.child
            .as_ref()
            .unwrap_or_else(|| unreachable!("fork is present until commit or rollback"))
    }

    /// Publishes the fork into the parent.
    pub fn commit(mut self) -> Result<()> {
        match self.child.take() {
            Some(child) => child.commit(&mut *self.parent),
            None => Ok(()),
        }
    }

    /// Discards the fork.
    pub fn rollback(mut self) {
        if let Some(child) = self.child.take() {
            child.rollback();
        }
    }
}

impl Drop for TransactionHandle<'_> {
    fn drop(&mut self) {
        if let Some(child) = self.child.take() {
            tracing::warn!(
                transaction = child.id(),
                "rolling back uncommitted statement"
            );
            child.rollback();
        }
    }
}
