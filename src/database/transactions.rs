// Depth-tracked transaction helpers
//
// Nesting is modeled with a savepoint ladder: depth 0 opens a real
// transaction, every deeper level opens SAVEPOINT sp_<depth>. The
// immediate variant grabs the write lock eagerly and is used only by the
// ownership election.

use super::IndexDatabase;
use anyhow::Result;
use tracing::warn;

impl IndexDatabase {
    /// Run `f` inside a deferred transaction (or a savepoint when already
    /// inside one). Commits on success, rolls back and propagates on error.
    pub fn transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.run_in_transaction("BEGIN", f)
    }

    /// Run `f` inside `BEGIN IMMEDIATE`, acquiring the database write lock
    /// up front so contending processes serialize. Behaves as a savepoint
    /// when nested inside an open transaction.
    pub fn immediate_transaction<T>(&self, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.run_in_transaction("BEGIN IMMEDIATE", f)
    }

    fn run_in_transaction<T>(
        &self,
        begin_sql: &str,
        f: impl FnOnce(&Self) -> Result<T>,
    ) -> Result<T> {
        let depth = self.txn_depth.get();

        if depth == 0 {
            self.conn()?.execute_batch(begin_sql)?;
        } else {
            self.conn()?
                .execute_batch(&format!("SAVEPOINT sp_{depth}"))?;
        }
        self.txn_depth.set(depth + 1);

        let result = f(self);
        self.txn_depth.set(depth);

        match result {
            Ok(value) => {
                if depth == 0 {
                    self.conn()?.execute_batch("COMMIT")?;
                } else {
                    self.conn()?.execute_batch(&format!("RELEASE sp_{depth}"))?;
                }
                Ok(value)
            }
            Err(err) => {
                let rollback = if depth == 0 {
                    self.conn()?.execute_batch("ROLLBACK")
                } else {
                    self.conn()?
                        .execute_batch(&format!("ROLLBACK TO sp_{depth}; RELEASE sp_{depth}"))
                };
                if let Err(rb) = rollback {
                    warn!("Rollback at depth {} failed: {}", depth, rb);
                }
                Err(err)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn transaction_depth(&self) -> u32 {
        self.txn_depth.get()
    }
}
