//! Convenient imports for typical `pggate` usage.
//!
//! ```ignore
//! use pggate::prelude::*;
//! ```

pub use crate::{
    Criteria, Executor, GateError, GateResult, GatewayConfig, Op, QueryOptions, Record, Sql,
    SqlTracer, Table, Value, Written, sql,
};

#[cfg(feature = "pool")]
pub use crate::PoolSettings;
