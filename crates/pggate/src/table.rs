//! Table gateway: CRUD over one table, driven by catalog metadata.
//!
//! A [`Table`] introspects its columns on first use and caches them for its
//! lifetime. Filters, entities and criteria are matched against that
//! metadata, so unknown keys never reach SQL and values are coerced to the
//! column types before they are bound.
//!
//! ```ignore
//! use pggate::{Criteria, QueryOptions, Record, Table};
//!
//! let users = Table::new(pool, "users", "user")?;
//!
//! let mut filter = Record::new();
//! filter.insert("status".into(), "active".into());
//! let page = users.find(&filter, QueryOptions::new().order_by(["-created_at"]).limit(20)).await?;
//!
//! let mut stale = Criteria::new();
//! stale.and("last_login", "<", "2020-01-01");
//! let removed = users.delete_matching(&stale).await?;
//! ```

use crate::client::Executor;
use crate::coerce::{coerce, coerce_binds};
use crate::config::GatewayConfig;
use crate::criteria::{Connective, Criteria, CriteriaOptions, QueryOptions};
use crate::error::{GateError, GateResult};
use crate::ident::Ident;
use crate::meta::{self, TableMeta};
use crate::sql::Sql;
use crate::value::{Record, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{Instrument, Span};

#[cfg(test)]
mod tests;

/// Result of a create, update or save.
#[derive(Debug, Clone, PartialEq)]
pub struct Written {
    /// The entity as written; `create` adds the generated key.
    pub record: Record,
    /// Rows affected by the statement.
    pub affected: u64,
}

#[derive(Debug)]
struct Shared {
    table: Ident,
    label: String,
    entity: String,
    id_column: Ident,
    config: GatewayConfig,
    meta: OnceCell<Arc<TableMeta>>,
}

/// A gateway to one table, running statements on executor `E`.
///
/// Cloning is cheap and clones share the metadata cache.
#[derive(Debug, Clone)]
pub struct Table<E> {
    executor: E,
    shared: Arc<Shared>,
    span: Option<Span>,
}

fn exact() -> Criteria {
    Criteria::with_options(CriteriaOptions {
        omit_null: false,
        omit_empty: false,
    })
}

impl<E: Executor> Table<E> {
    /// Gateway for `table` (optionally schema-qualified) with default configuration.
    ///
    /// `entity` is the singular name used in messages, e.g. `"user"` for `users`.
    pub fn new(executor: E, table: &str, entity: &str) -> GateResult<Self> {
        Self::with_config(executor, table, entity, GatewayConfig::default())
    }

    pub fn with_config(
        executor: E,
        table: &str,
        entity: &str,
        config: GatewayConfig,
    ) -> GateResult<Self> {
        let table = Ident::parse(table)?;
        let id_column = Ident::parse(&config.id_column)?;
        Ok(Self {
            executor,
            shared: Arc::new(Shared {
                label: table.to_sql(),
                table,
                entity: entity.to_string(),
                id_column,
                config,
                meta: OnceCell::new(),
            }),
            span: None,
        })
    }

    /// Use `meta` instead of introspecting the catalog.
    ///
    /// Column roles are derived again from this gateway's configuration.
    pub fn with_meta(self, meta: TableMeta) -> Self {
        let meta = TableMeta::new(meta.table, meta.columns, &self.shared.config);
        let shared = Shared {
            table: self.shared.table.clone(),
            label: self.shared.label.clone(),
            entity: self.shared.entity.clone(),
            id_column: self.shared.id_column.clone(),
            config: self.shared.config.clone(),
            meta: OnceCell::new_with(Some(Arc::new(meta))),
        };
        Self {
            executor: self.executor,
            shared: Arc::new(shared),
            span: self.span,
        }
    }

    /// Run every statement of this gateway inside `span`.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// The same gateway on another executor, e.g. a transaction.
    ///
    /// The metadata cache is shared with `self`.
    pub fn on<F: Executor>(&self, executor: F) -> Table<F> {
        Table {
            executor,
            shared: Arc::clone(&self.shared),
            span: self.span.clone(),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// The table name as rendered in SQL.
    pub fn table_name(&self) -> &str {
        &self.shared.label
    }

    pub fn entity_name(&self) -> &str {
        &self.shared.entity
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.shared.config
    }

    /// Column metadata, loaded on first call.
    ///
    /// Concurrent first calls share one catalog query. A failed load is not
    /// cached.
    pub async fn meta(&self) -> GateResult<Arc<TableMeta>> {
        let meta = self
            .shared
            .meta
            .get_or_try_init(|| self.load_meta())
            .await?;
        Ok(Arc::clone(meta))
    }

    async fn load_meta(&self) -> GateResult<Arc<TableMeta>> {
        let params = [Value::Text(self.shared.label.clone())];
        let records = self.fetch("meta", meta::INTROSPECT_SQL, &params).await?;
        let columns = meta::columns_from_records(&records)?;
        if columns.is_empty() {
            return Err(GateError::UnknownTable(self.shared.label.clone()));
        }
        tracing::debug!(
            target: "pggate.meta",
            table = %self.shared.label,
            columns = columns.len(),
            "metadata loaded"
        );
        Ok(Arc::new(TableMeta::new(
            self.shared.table.name(),
            columns,
            &self.shared.config,
        )))
    }

    // ==================== Reads ====================

    /// Fetch the row whose id column equals `id`.
    ///
    /// A null or empty id finds nothing and issues no SQL.
    pub async fn get(&self, id: impl Into<Value>) -> GateResult<Option<Record>> {
        let Some(id) = present(id.into()) else {
            return Ok(None);
        };
        let meta = self.meta().await?;
        let mut sql = self.select_from();
        sql.push(" WHERE ")
            .push_ident(&self.shared.id_column)
            .push(" = ")
            .push_bind_for(self.shared.id_column.name(), id);
        let rows = self.fetch_sql(&meta, "get", sql).await?;
        Ok(rows.into_iter().next())
    }

    /// Rows equal to `filter` on every known column.
    ///
    /// Ordered by primary key and capped at the configured default limit
    /// unless `options` says otherwise. [`QueryOptions::any`] joins the
    /// filter with OR.
    pub async fn find(&self, filter: &Record, options: QueryOptions) -> GateResult<Vec<Record>> {
        let meta = self.meta().await?;
        let clause = filter_clause(&meta, filter, options.connective)?;
        let sql = self.paged_select(&meta, Some(clause), &options)?;
        self.fetch_sql(&meta, "find", sql).await
    }

    /// First row matching `filter`.
    pub async fn find_one(&self, filter: &Record) -> GateResult<Option<Record>> {
        let rows = self.find(filter, QueryOptions::new().limit(1)).await?;
        Ok(rows.into_iter().next())
    }

    /// Number of rows matching `filter`. Ordering and paging are ignored.
    pub async fn count(&self, filter: &Record, options: QueryOptions) -> GateResult<u64> {
        let meta = self.meta().await?;
        let clause = filter_clause(&meta, filter, options.connective)?;
        self.count_where(&meta, Some(clause)).await
    }

    /// Rows matching `criteria`, with its ordering and paging.
    pub async fn select(&self, criteria: &Criteria) -> GateResult<Vec<Record>> {
        let clause = criteria_clause(criteria)?;
        let meta = self.meta().await?;
        let sql = self.paged_select(&meta, clause, criteria.options())?;
        self.fetch_sql(&meta, "select", sql).await
    }

    /// Number of rows matching `criteria`.
    pub async fn count_matching(&self, criteria: &Criteria) -> GateResult<u64> {
        let clause = criteria_clause(criteria)?;
        let meta = self.meta().await?;
        self.count_where(&meta, clause).await
    }

    /// Rows matching a hand-written WHERE body with `?` placeholders.
    ///
    /// `where_text` is pasted into the statement as-is: only `params` is a
    /// safe channel for untrusted input. A `?` inside a quoted literal or
    /// identifier is not a placeholder. The number of placeholders must
    /// equal the number of parameters.
    pub async fn select_where(
        &self,
        where_text: &str,
        params: impl IntoIterator<Item = Value>,
        options: QueryOptions,
    ) -> GateResult<Vec<Record>> {
        let clause = Sql::from_template(where_text, params)?;
        let clause = (!where_text.trim().is_empty()).then_some(clause);
        let meta = self.meta().await?;
        let sql = self.paged_select(&meta, clause, &options)?;
        self.fetch_sql(&meta, "select_where", sql).await
    }

    // ==================== Writes ====================

    /// Insert `entity`, letting the database generate auto-increment keys.
    ///
    /// When the table has exactly one generated primary key its new value is
    /// written back onto the returned record.
    pub async fn create(&self, entity: &Record) -> GateResult<Written> {
        self.insert(entity, false).await
    }

    /// Insert `entity` including any auto-increment key values it carries.
    pub async fn create_with_keys(&self, entity: &Record) -> GateResult<Written> {
        self.insert(entity, true).await
    }

    async fn insert(&self, entity: &Record, with_keys: bool) -> GateResult<Written> {
        let meta = self.meta().await?;

        let mut columns = Sql::empty();
        let mut values = Sql::empty();
        let mut count = 0;
        for column in &meta.columns {
            if column.primary_key && column.auto_increment && !with_keys {
                continue;
            }
            let given = entity.get(&column.name).filter(|v| !(column.is_role() && v.is_null()));
            let fill = match given {
                Some(value) => Some(Fill::Bind(value.clone())),
                None if column.default.is_some() => None,
                None if column.is_created || column.is_updated => Some(Fill::Raw("CURRENT_TIMESTAMP")),
                None if column.is_version => Some(Fill::Raw("1")),
                None => None,
            };
            let Some(fill) = fill else {
                continue;
            };
            if count > 0 {
                columns.push(", ");
                values.push(", ");
            }
            columns.push_column(&column.name);
            match fill {
                Fill::Bind(value) => values.push_bind_for(&column.name, value),
                Fill::Raw(expr) => values.push(expr),
            };
            count += 1;
        }

        let mut sql = Sql::new("INSERT INTO ");
        sql.push_ident(&self.shared.table);
        if count == 0 {
            sql.push(" DEFAULT VALUES");
        } else {
            sql.push(" (").push_sql(columns).push(") VALUES (").push_sql(values).push(")");
        }

        let mut record = entity.clone();
        let Some(key) = meta.generated_key() else {
            let affected = self.execute_sql(&meta, "create", sql).await?;
            return Ok(Written { record, affected });
        };

        sql.push(" RETURNING ").push_column(&key.name);
        let rows = self.fetch_sql(&meta, "create", sql).await?;
        if let Some(id) = rows.into_iter().next().and_then(|mut row| row.remove(&key.name)) {
            record.insert(key.name.clone(), id);
            return Ok(Written {
                record,
                affected: 1,
            });
        }
        Ok(Written {
            record,
            affected: 0,
        })
    }

    /// Update the row identified by the primary key(s) in `entity`.
    ///
    /// Only known non-key columns present in `entity` are set. Updated
    /// timestamps and version counters are maintained by the statement.
    pub async fn update(&self, entity: &Record) -> GateResult<Written> {
        let meta = self.meta().await?;
        let keys = self.key_clause(&meta, entity)?;
        let set = self.set_clause(&meta, entity)?;

        let mut sql = Sql::new("UPDATE ");
        sql.push_ident(&self.shared.table)
            .push(" SET ")
            .push_sql(set)
            .push(" WHERE ")
            .push_sql(keys);
        let affected = self.execute_sql(&meta, "update", sql).await?;
        Ok(Written {
            record: entity.clone(),
            affected,
        })
    }

    /// Apply the fields of `entity` to every row matching `criteria`.
    ///
    /// An empty criteria is rejected; it would touch the whole table.
    pub async fn update_matching(&self, entity: &Record, criteria: &Criteria) -> GateResult<u64> {
        let clause = self.required_clause(criteria, "update")?;
        let meta = self.meta().await?;
        let set = self.set_clause(&meta, entity)?;

        let mut sql = Sql::new("UPDATE ");
        sql.push_ident(&self.shared.table)
            .push(" SET ")
            .push_sql(set)
            .push(" WHERE ")
            .push_sql(clause);
        self.execute_sql(&meta, "update_matching", sql).await
    }

    /// Update when a row with the entity's primary key exists, create otherwise.
    ///
    /// Not atomic: the existence check and the write are separate statements.
    pub async fn save(&self, entity: &Record) -> GateResult<Written> {
        let meta = self.meta().await?;
        let has_keys = meta.primary_keys().next().is_some()
            && meta
                .primary_keys()
                .all(|k| {
                    entity
                        .get(&k.name)
                        .is_some_and(|v| !v.is_null() && !v.is_empty_text())
                });
        if has_keys {
            let keys = self.key_clause(&meta, entity)?;
            let mut sql = Sql::new("SELECT 1 FROM ");
            sql.push_ident(&self.shared.table)
                .push(" WHERE ")
                .push_sql(keys)
                .push(" LIMIT 1");
            if !self.fetch_sql(&meta, "save", sql).await?.is_empty() {
                return self.update(entity).await;
            }
        }
        self.create(entity).await
    }

    /// Delete the row identified by the primary key(s) in `entity`.
    pub async fn delete_one(&self, entity: &Record) -> GateResult<u64> {
        let meta = self.meta().await?;
        let keys = self.key_clause(&meta, entity)?;
        let mut sql = Sql::new("DELETE FROM ");
        sql.push_ident(&self.shared.table).push(" WHERE ").push_sql(keys);
        self.execute_sql(&meta, "delete", sql).await
    }

    /// Delete the row whose id column equals `id`. A null or empty id deletes nothing.
    pub async fn delete(&self, id: impl Into<Value>) -> GateResult<u64> {
        let Some(id) = present(id.into()) else {
            return Ok(0);
        };
        let meta = self.meta().await?;
        let mut sql = Sql::new("DELETE FROM ");
        sql.push_ident(&self.shared.table)
            .push(" WHERE ")
            .push_ident(&self.shared.id_column)
            .push(" = ")
            .push_bind_for(self.shared.id_column.name(), id);
        self.execute_sql(&meta, "delete", sql).await
    }

    /// Delete every row matching `criteria`. An empty criteria is rejected.
    pub async fn delete_matching(&self, criteria: &Criteria) -> GateResult<u64> {
        let clause = self.required_clause(criteria, "delete")?;
        let meta = self.meta().await?;
        let mut sql = Sql::new("DELETE FROM ");
        sql.push_ident(&self.shared.table).push(" WHERE ").push_sql(clause);
        self.execute_sql(&meta, "delete_matching", sql).await
    }

    /// Delete the rows matching `criteria`, then create every entity.
    ///
    /// Returns the deleted count and the created records. Only atomic when
    /// the gateway runs on a transaction (see [`Table::on`]).
    pub async fn replace_matching(
        &self,
        criteria: &Criteria,
        entities: &[Record],
    ) -> GateResult<(u64, Vec<Record>)> {
        let deleted = self.delete_matching(criteria).await?;
        let mut created = Vec::with_capacity(entities.len());
        for entity in entities {
            created.push(self.create(entity).await?.record);
        }
        Ok((deleted, created))
    }

    // ==================== Statement assembly ====================

    fn select_from(&self) -> Sql {
        let mut sql = Sql::new("SELECT * FROM ");
        sql.push_ident(&self.shared.table);
        sql
    }

    fn paged_select(
        &self,
        meta: &TableMeta,
        clause: Option<Sql>,
        options: &QueryOptions,
    ) -> GateResult<Sql> {
        let mut sql = self.select_from();
        if let Some(clause) = clause.filter(|c| !c.is_empty()) {
            sql.push(" WHERE ").push_sql(clause);
        }

        match options.order_by_sql()? {
            Some(order) => {
                sql.push(" ").push(&order);
            }
            None => {
                for (i, key) in meta.primary_keys().enumerate() {
                    sql.push(if i == 0 { " ORDER BY " } else { ", " });
                    sql.push_column(&key.name).push(" ASC");
                }
            }
        }

        let limit = options.limit.unwrap_or(self.shared.config.default_limit);
        sql.push(&format!(" LIMIT {limit}"));
        if let Some(offset) = options.offset.filter(|&o| o > 0) {
            sql.push(&format!(" OFFSET {offset}"));
        }
        Ok(sql)
    }

    async fn count_where(&self, meta: &TableMeta, clause: Option<Sql>) -> GateResult<u64> {
        let mut sql = Sql::new("SELECT COUNT(*) AS count FROM ");
        sql.push_ident(&self.shared.table);
        if let Some(clause) = clause.filter(|c| !c.is_empty()) {
            sql.push(" WHERE ").push_sql(clause);
        }
        let rows = self.fetch_sql(meta, "count", sql).await?;
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// `SET a = $1, b = $2` for known non-key columns in `entity`, plus role maintenance.
    fn set_clause(&self, meta: &TableMeta, entity: &Record) -> GateResult<Sql> {
        let mut sql = Sql::empty();
        let mut fields = 0;
        for column in &meta.columns {
            if column.primary_key || column.is_role() {
                continue;
            }
            let Some(value) = entity.get(&column.name) else {
                continue;
            };
            if fields > 0 {
                sql.push(", ");
            }
            sql.push_column(&column.name)
                .push(" = ")
                .push_bind_for(&column.name, value.clone());
            fields += 1;
        }
        if fields == 0 {
            return Err(GateError::validation(format!(
                "no fields to update for {}",
                self.shared.entity
            )));
        }

        for column in &meta.columns {
            if column.is_updated {
                sql.push(", ").push_column(&column.name).push(" = CURRENT_TIMESTAMP");
            } else if column.is_version {
                let name = crate::ident::quote_column(&column.name);
                sql.push(&format!(", {name} = {name} + 1"));
            }
        }
        Ok(sql)
    }

    /// `k1 = $1 AND k2 = $2` for every primary key, all of which `entity` must carry.
    fn key_clause(&self, meta: &TableMeta, entity: &Record) -> GateResult<Sql> {
        let mut criteria = exact();
        let mut keys = 0;
        for key in meta.primary_keys() {
            let value = entity.get(&key.name).filter(|v| !v.is_null()).ok_or_else(|| {
                GateError::validation(format!(
                    "{} is missing primary key '{}'",
                    self.shared.entity, key.name
                ))
            })?;
            criteria.push_equality(Connective::And, &Ident::verbatim(&key.name)?, value.clone());
            keys += 1;
        }
        if keys == 0 {
            return Err(GateError::validation(format!(
                "table {} has no primary key",
                self.shared.label
            )));
        }
        criteria.to_sql_fragment()
    }

    fn required_clause(&self, criteria: &Criteria, action: &str) -> GateResult<Sql> {
        let clause = criteria.to_sql_fragment()?;
        if !criteria.restricts() {
            return Err(GateError::validation(format!(
                "refusing to {action} {} without criteria",
                self.shared.label
            )));
        }
        Ok(clause)
    }

    // ==================== Execution ====================

    fn prepare(&self, meta: &TableMeta, sql: Sql) -> GateResult<(String, Vec<Value>)> {
        sql.validate()?;
        let text = sql.to_sql();
        let params = coerce_binds(meta, sql.into_binds())?;
        Ok((text, params))
    }

    async fn fetch_sql(&self, meta: &TableMeta, op: &'static str, sql: Sql) -> GateResult<Vec<Record>> {
        let (text, params) = self.prepare(meta, sql)?;
        self.fetch(op, &text, &params).await
    }

    async fn execute_sql(&self, meta: &TableMeta, op: &'static str, sql: Sql) -> GateResult<u64> {
        let (text, params) = self.prepare(meta, sql)?;
        self.shared
            .config
            .tracer
            .statement(&self.shared.label, op, &text, params.len());
        let result = self
            .executor
            .execute(&text, &params)
            .instrument(self.span())
            .await;
        self.observe(op, result)
    }

    async fn fetch(&self, op: &'static str, sql: &str, params: &[Value]) -> GateResult<Vec<Record>> {
        self.shared
            .config
            .tracer
            .statement(&self.shared.label, op, sql, params.len());
        let result = self
            .executor
            .fetch(sql, params)
            .instrument(self.span())
            .await;
        self.observe(op, result)
    }

    fn span(&self) -> Span {
        self.span.clone().unwrap_or_else(Span::none)
    }

    fn observe<T>(&self, op: &'static str, result: GateResult<T>) -> GateResult<T> {
        if let Err(error) = &result {
            if error.is_driver_error() {
                tracing::warn!(
                    target: "pggate",
                    table = %self.shared.label,
                    op,
                    error = %error,
                    "statement failed"
                );
            }
        }
        result
    }
}

/// `None` for the null and empty-string values a "new record" payload carries as its key.
fn present(value: Value) -> Option<Value> {
    (!value.is_null() && !value.is_empty_text()).then_some(value)
}

enum Fill {
    Bind(Value),
    Raw(&'static str),
}

/// Equality on every filter key that names a known column.
///
/// Values are coerced first so an empty string on a nullable column
/// becomes `IS NULL`.
fn filter_clause(meta: &TableMeta, filter: &Record, connective: Connective) -> GateResult<Sql> {
    let mut criteria = exact();
    for (key, value) in filter {
        let Some(column) = meta.column(key) else {
            continue;
        };
        let value = coerce(column, value.clone())?;
        criteria.push_equality(connective, &Ident::verbatim(&column.name)?, value);
    }
    criteria.to_sql_fragment()
}

fn criteria_clause(criteria: &Criteria) -> GateResult<Option<Sql>> {
    let clause = criteria.to_sql_fragment()?;
    Ok((!criteria.is_empty()).then_some(clause))
}
