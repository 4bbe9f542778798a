//! Gateway configuration.

use crate::trace::SqlTracer;

/// Row cap applied by filter lookups that do not set a limit.
pub const DEFAULT_LIMIT: u64 = 1000;

/// Configuration for a [`Table`](crate::Table).
///
/// # Example
///
/// ```ignore
/// use pggate::GatewayConfig;
///
/// let config = GatewayConfig::new()
///     .id_column("user_id")
///     .default_limit(200)
///     .version_columns(["lock_version"]);
/// ```
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Column used by `get(id)` / `delete(id)`. Default: `id`.
    pub id_column: String,
    /// Limit applied by `find` when the caller sets none. Default: 1000.
    pub default_limit: u64,
    /// Timestamp columns stamped on insert only.
    pub created_columns: Vec<String>,
    /// Timestamp columns stamped on every update.
    pub updated_columns: Vec<String>,
    /// Integer columns incremented on every update.
    pub version_columns: Vec<String>,
    /// Statement tracing for this gateway.
    pub tracer: SqlTracer,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            id_column: "id".to_string(),
            default_limit: DEFAULT_LIMIT,
            created_columns: vec!["created".to_string(), "created_at".to_string()],
            updated_columns: vec![
                "updated".to_string(),
                "updated_at".to_string(),
                "modified".to_string(),
                "modified_at".to_string(),
            ],
            version_columns: vec!["version".to_string()],
            tracer: SqlTracer::default(),
        }
    }
}

fn names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

impl GatewayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    /// Set the row cap for unlimited lookups (at least 1).
    pub fn default_limit(mut self, limit: u64) -> Self {
        self.default_limit = limit.max(1);
        self
    }

    pub fn created_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.created_columns = names(columns);
        self
    }

    pub fn updated_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.updated_columns = names(columns);
        self
    }

    pub fn version_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.version_columns = names(columns);
        self
    }

    pub fn tracer(mut self, tracer: SqlTracer) -> Self {
        self.tracer = tracer;
        self
    }
}
