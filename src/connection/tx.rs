use tracing::{debug, warn};

use crate::error::{ErrorClass, SqlWorkerPoolError};
use crate::transaction::{Transaction, TransactionElement};

use super::{Connection, LostSession};

impl Connection {
    /// Run every element of `tx` inside one database transaction.
    ///
    /// The first failing element rolls the transaction back and its error is returned;
    /// later elements are not attempted. A session lost midway is reconnected and the lost
    /// error returned, so the caller can run the whole transaction again.
    ///
    /// # Errors
    /// The error of the first failing element, or of `BEGIN`/`COMMIT`.
    pub fn execute_transaction(&mut self, tx: &Transaction) -> Result<(), SqlWorkerPoolError> {
        if tx.is_empty() {
            debug!(connection = %self.info, "empty transaction, nothing to commit");
            return Ok(());
        }

        self.with_handle(LostSession::Retry, |handle| handle.begin())?;

        for (index, element) in tx.elements().iter().enumerate() {
            let result = match element {
                TransactionElement::Raw(sql) => self.execute_with(LostSession::Report, sql),
                TransactionElement::Prepared(stmt) => {
                    self.execute_prepared_with(LostSession::Report, stmt)
                }
            };
            if let Err(err) = result {
                warn!(
                    connection = %self.info,
                    element = index,
                    elements = tx.len(),
                    error = %err,
                    "transaction element failed, rolling back"
                );
                if err.class() != Some(ErrorClass::ConnectionLost) {
                    self.rollback_quietly();
                }
                return Err(err);
            }
        }

        let committed = self.with_handle(LostSession::Report, |handle| handle.commit());
        if let Err(err) = &committed {
            if err.class() != Some(ErrorClass::ConnectionLost) {
                self.rollback_quietly();
            }
        }
        committed
    }

    fn rollback_quietly(&mut self) {
        if let Some(handle) = self.handle.as_deref_mut() {
            if let Err(err) = handle.rollback() {
                warn!(connection = %self.info, error = %err, "rollback failed");
            }
        }
    }
}
