//! # pggate
//!
//! A table gateway for PostgreSQL: declarative criteria in, parameterized
//! SQL out.
//!
//! ## Features
//!
//! - **Criteria builder**: column/operator/value triples with AND/OR groups,
//!   rendered as a `?` WHERE body plus an ordered parameter list
//! - **Table gateway**: get/find/count/create/update/save/delete over one
//!   table, driven by catalog metadata loaded once per gateway
//! - **Dynamic values**: [`Value`] binds to whatever type the server infers
//!   and decodes every common column type into a [`Record`]
//! - **Transaction-friendly**: anything implementing [`Executor`] runs a
//!   gateway, and [`Table::on`] rebinds one to a transaction
//! - **Safe defaults**: matching updates and deletes require a criteria,
//!   updates require fields, operators come from a closed allow-list
//!
//! ## Example
//!
//! ```ignore
//! use pggate::{Criteria, Op, QueryOptions, Record, Table};
//!
//! let users = Table::connect(&std::env::var("DATABASE_URL")?, "users", "user")?;
//!
//! let mut entity = Record::new();
//! entity.insert("name".into(), "alice".into());
//! let created = users.create(&entity).await?;
//! println!("new id: {:?}", created.record.get("id"));
//!
//! let mut c = Criteria::new();
//! c.and("status", Op::Eq, "active")
//!     .and_group()
//!     .or("age", "<", 18)
//!     .or("age", ">=", 65)
//!     .group_end()
//!     .order_by(["-created_at"])
//!     .limit(20);
//! let rows = users.select(&c).await?;
//! ```
//!
//! ## Logging
//!
//! Statements are reported through `tracing` (target `pggate.sql`, level set
//! per gateway by [`SqlTracer`]); driver errors are logged at WARN on target
//! `pggate`. Installing a subscriber is up to the application.

pub mod client;
pub mod config;
pub mod criteria;
pub mod error;
pub mod ident;
pub mod meta;
pub mod op;
pub mod prelude;
pub mod sql;
pub mod table;
pub mod trace;
pub mod value;

mod coerce;

#[cfg(feature = "pool")]
pub mod pool;

pub use client::{Executor, row_to_record};
pub use config::{DEFAULT_LIMIT, GatewayConfig};
pub use criteria::{
    Connective, Count, Criteria, CriteriaOptions, Direction, OrderBy, QueryOptions,
};
pub use error::{GateError, GateResult};
pub use ident::Ident;
pub use meta::{ColumnMeta, TableMeta, TypeFamily};
pub use op::Op;
pub use sql::{Bind, Sql, sql};
pub use table::{Table, Written};
pub use trace::SqlTracer;
pub use value::{Record, Value, record_from_json};

#[cfg(feature = "pool")]
pub use pool::PoolSettings;
