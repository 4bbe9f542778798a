//! Per-gateway SQL tracing.
//!
//! Each [`Table`](crate::Table) owns a [`SqlTracer`], so verbosity is chosen
//! where the gateway is built rather than through process-wide switches.
//! Events go through `tracing`; installing a subscriber is up to the
//! application.

use tracing::Level;

/// Emits one `tracing` event per statement, before it is executed.
#[derive(Debug, Clone)]
pub struct SqlTracer {
    /// Event level, or `None` to stay silent.
    pub level: Option<Level>,
    /// Truncate long SQL strings (in bytes). `None` means no truncation.
    pub max_sql_length: Option<usize>,
}

impl Default for SqlTracer {
    fn default() -> Self {
        Self {
            level: Some(Level::DEBUG),
            max_sql_length: Some(200),
        }
    }
}

impl SqlTracer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A tracer that never emits.
    pub fn silent() -> Self {
        Self {
            level: None,
            ..Self::default()
        }
    }

    /// Override the event level.
    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    /// Set maximum SQL length to display.
    pub fn max_sql_length(mut self, len: usize) -> Self {
        self.max_sql_length = Some(len);
        self
    }

    /// Disable SQL truncation.
    pub fn no_truncate(mut self) -> Self {
        self.max_sql_length = None;
        self
    }

    fn truncate_sql<'a>(&self, sql: &'a str) -> std::borrow::Cow<'a, str> {
        match self.max_sql_length {
            Some(max) if sql.len() > max => {
                format!("{}...", truncate_sql_bytes(sql, max)).into()
            }
            _ => sql.into(),
        }
    }

    pub(crate) fn statement(&self, table: &str, op: &str, sql: &str, param_count: usize) {
        /// Dispatch a tracing event at a runtime-determined level.
        macro_rules! emit_at_level {
            ($level:expr, $($field:tt)*) => {
                match $level {
                    Level::ERROR => tracing::error!($($field)*),
                    Level::WARN  => tracing::warn!($($field)*),
                    Level::INFO  => tracing::info!($($field)*),
                    Level::DEBUG => tracing::debug!($($field)*),
                    Level::TRACE => tracing::trace!($($field)*),
                }
            };
        }

        let Some(level) = self.level else {
            return;
        };
        let sql = self.truncate_sql(sql);
        emit_at_level!(
            level,
            target: "pggate.sql",
            table,
            op,
            param_count,
            sql = %sql,
        );
    }
}

/// Cut `sql` to at most `max` bytes on a char boundary.
pub(crate) fn truncate_sql_bytes(sql: &str, max: usize) -> &str {
    if sql.len() <= max {
        return sql;
    }
    let mut end = max;
    while !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}
