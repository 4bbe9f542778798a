//! Pool-backed gateways.
//!
//! A `deadpool_postgres::Pool` is already an [`Executor`](crate::Executor),
//! so any pool works with [`Table::new`]. The constructors here build the pool
//! from a database URL as well, and [`Table::sibling`] opens further tables on
//! the same pool.
//!
//! ```ignore
//! let users = pggate::Table::connect(&database_url, "users", "user")?;
//! let posts = users.sibling("posts", "post")?;
//! ```

use crate::config::GatewayConfig;
use crate::error::{GateError, GateResult};
use crate::table::Table;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;
use tokio_postgres::Socket;
use tokio_postgres::tls::{MakeTlsConnect, TlsConnect};

/// Sizing and recycling for the pool behind [`Table::connect_with`].
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// Maximum open connections. Default: 16.
    pub max_size: usize,
    /// Check performed when a connection returns to the pool. Default: `Fast`.
    pub recycling: RecyclingMethod,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 16,
            recycling: RecyclingMethod::Fast,
        }
    }
}

impl PoolSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// At least one connection.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    pub fn recycling(mut self, recycling: RecyclingMethod) -> Self {
        self.recycling = recycling;
        self
    }

    /// Build a pool without connecting; connections open on first use.
    fn build<T>(self, database_url: &str, tls: T) -> GateResult<Pool>
    where
        T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
        T::Stream: Sync + Send,
        T::TlsConnect: Sync + Send,
        <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        let pg_config: tokio_postgres::Config = database_url
            .parse()
            .map_err(|e: tokio_postgres::Error| GateError::Connection(e.to_string()))?;
        let manager = Manager::from_config(
            pg_config,
            tls,
            ManagerConfig {
                recycling_method: self.recycling,
            },
        );
        Pool::builder(manager)
            .max_size(self.max_size)
            .build()
            .map_err(|e| GateError::Pool(e.to_string()))
    }
}

impl Table<Pool> {
    /// Gateway for `table` on a new `NoTls` pool with default settings.
    pub fn connect(database_url: &str, table: &str, entity: &str) -> GateResult<Self> {
        Self::connect_with(
            database_url,
            NoTls,
            PoolSettings::default(),
            table,
            entity,
            GatewayConfig::default(),
        )
    }

    /// Gateway for `table` on a new pool using `tls`, `settings` and `config`.
    pub fn connect_with<T>(
        database_url: &str,
        tls: T,
        settings: PoolSettings,
        table: &str,
        entity: &str,
        config: GatewayConfig,
    ) -> GateResult<Self>
    where
        T: MakeTlsConnect<Socket> + Clone + Sync + Send + 'static,
        T::Stream: Sync + Send,
        T::TlsConnect: Sync + Send,
        <T::TlsConnect as TlsConnect<Socket>>::Future: Send,
    {
        let pool = settings.build(database_url, tls)?;
        tracing::debug!(target: "pggate", table, max_size = pool.status().max_size, "pool created");
        Self::with_config(pool, table, entity, config)
    }

    /// Another gateway on this gateway's pool, with default configuration.
    pub fn sibling(&self, table: &str, entity: &str) -> GateResult<Self> {
        Self::new(self.executor().clone(), table, entity)
    }
}
