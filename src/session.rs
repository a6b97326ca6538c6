use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use crate::{schema, Result};

/// One tenant-scoped unit of work.
///
/// Wraps a single transaction whose `search_path` has been pinned (with
/// `set local`) to the tenant's schema, so unqualified table references
/// resolve against that schema and no other. Dropping the session rolls the
/// transaction back; there is no way to leak a half-finished unit of work.
#[derive(Debug)]
pub struct TenantSession {
    agency: String,
    schema: String,
    tx: Transaction<'static, Postgres>,
}

impl TenantSession {
    pub(crate) async fn open(pool: &PgPool, agency: &str, schema: &str) -> Result<Self> {
        let mut tx = pool.begin().await?;
        let stmt = format!("set local search_path to {}", schema::quote_ident(schema));
        sqlx::query(&stmt).execute(&mut *tx).await?;
        Ok(Self {
            agency: agency.to_string(),
            schema: schema.to_string(),
            tx,
        })
    }

    pub fn agency(&self) -> &str {
        &self.agency
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Connection for queries within this unit of work. All statements run
    /// inside the session's transaction, under its tenant search path.
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    /// Close out a unit of work: commit on success, roll back on error.
    ///
    /// Domain errors (not-found, validation, conflicts) propagate unchanged.
    /// Anything else is logged with tenant context before re-raising, so an
    /// infrastructure failure is never silently turned into an empty reply.
    pub async fn finish<T>(self, outcome: Result<T>) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                let agency = self.agency.clone();
                if let Err(rollback_err) = self.rollback().await {
                    tracing::warn!(
                        agency = %agency,
                        error = %rollback_err,
                        "rollback failed while aborting unit of work"
                    );
                }
                if !err.is_domain() {
                    tracing::error!(
                        agency = %agency,
                        error = %err,
                        "unexpected error aborted unit of work"
                    );
                }
                Err(err)
            }
        }
    }
}
