//! Executor trait: the seam between the gateway and the database.

use crate::error::{GateError, GateResult};
use crate::value::{Record, Value};
use std::sync::Arc;
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

/// Anything that can run a parameterized statement.
///
/// Implemented for plain clients, transactions, pools and pooled clients, so
/// a [`Table`](crate::Table) can run on whichever the caller holds. SQL uses
/// `$n` placeholders and `params` are bound in order.
pub trait Executor: Send + Sync {
    /// Run a query and decode every row into a [`Record`].
    fn fetch(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = GateResult<Vec<Record>>> + Send;

    /// Run a statement and return the number of affected rows.
    fn execute(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = GateResult<u64>> + Send;
}

fn bind_refs(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

/// Decode a driver row into a column-name keyed record.
pub fn row_to_record(row: &Row) -> GateResult<Record> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            row.try_get::<_, Value>(idx)
                .map(|value| (column.name().to_string(), value))
                .map_err(|e| GateError::decode(column.name(), e.to_string()))
        })
        .collect()
}

fn rows_to_records(rows: Vec<Row>) -> GateResult<Vec<Record>> {
    rows.iter().map(row_to_record).collect()
}

impl Executor for tokio_postgres::Client {
    async fn fetch(&self, sql: &str, params: &[Value]) -> GateResult<Vec<Record>> {
        let rows = self
            .query(sql, &bind_refs(params))
            .await
            .map_err(GateError::from_db_error)?;
        rows_to_records(rows)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> GateResult<u64> {
        tokio_postgres::Client::execute(self, sql, &bind_refs(params))
            .await
            .map_err(GateError::from_db_error)
    }
}

impl Executor for tokio_postgres::Transaction<'_> {
    async fn fetch(&self, sql: &str, params: &[Value]) -> GateResult<Vec<Record>> {
        let rows = self
            .query(sql, &bind_refs(params))
            .await
            .map_err(GateError::from_db_error)?;
        rows_to_records(rows)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> GateResult<u64> {
        tokio_postgres::Transaction::execute(self, sql, &bind_refs(params))
            .await
            .map_err(GateError::from_db_error)
    }
}

// ===== deadpool-postgres support =====

#[cfg(feature = "pool")]
impl Executor for deadpool_postgres::Client {
    async fn fetch(&self, sql: &str, params: &[Value]) -> GateResult<Vec<Record>> {
        // Delegate to the deref target (tokio_postgres::Client).
        Executor::fetch(&***self, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> GateResult<u64> {
        Executor::execute(&***self, sql, params).await
    }
}

/// Each call checks a connection out of the pool for its duration.
#[cfg(feature = "pool")]
impl Executor for deadpool_postgres::Pool {
    async fn fetch(&self, sql: &str, params: &[Value]) -> GateResult<Vec<Record>> {
        let client = self.get().await?;
        Executor::fetch(&client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> GateResult<u64> {
        let client = self.get().await?;
        Executor::execute(&client, sql, params).await
    }
}

// ===== Reference implementations =====

impl<E: Executor> Executor for &E {
    async fn fetch(&self, sql: &str, params: &[Value]) -> GateResult<Vec<Record>> {
        (**self).fetch(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> GateResult<u64> {
        (**self).execute(sql, params).await
    }
}

impl<E: Executor> Executor for Arc<E> {
    async fn fetch(&self, sql: &str, params: &[Value]) -> GateResult<Vec<Record>> {
        (**self).fetch(sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> GateResult<u64> {
        (**self).execute(sql, params).await
    }
}
