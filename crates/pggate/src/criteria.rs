//! Criteria: a WHERE clause accumulated from column/operator/value triples.
//!
//! Values are always bound; only validated column names and whitelisted
//! operators reach the SQL text.
//!
//! ```ignore
//! use pggate::{Criteria, Op};
//!
//! let mut c = Criteria::new();
//! c.and("status", Op::Eq, "active")
//!     .and_group()
//!     .or("role", "=", "admin")
//!     .or("role", "=", "owner")
//!     .group_end()
//!     .order_by(["-created_at"])
//!     .limit(20);
//!
//! assert_eq!(c.where_clause(), "status=? AND (role=? OR role=?)");
//! ```
//!
//! Clauses whose value is null or the empty string are skipped by default,
//! so optional request parameters can be passed straight through.

use crate::error::{GateError, GateResult};
use crate::ident::Ident;
use crate::op::Op;
use crate::sql::Sql;
use crate::value::{Record, Value};

/// Boolean connective joining a clause to the ones before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Connective {
    #[default]
    And,
    Or,
}

impl Connective {
    fn as_sql(self) -> &'static str {
        match self {
            Connective::And => " AND ",
            Connective::Or => " OR ",
        }
    }
}

/// Sort direction for one ORDER BY column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One ORDER BY entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub direction: Direction,
}

impl OrderBy {
    /// Parse `name`, `+name` (ascending) or `-name` (descending).
    pub fn parse(entry: &str) -> Self {
        let entry = entry.trim();
        let (direction, column) = match entry.strip_prefix('-') {
            Some(rest) => (Direction::Desc, rest),
            None => (Direction::Asc, entry.strip_prefix('+').unwrap_or(entry)),
        };
        Self {
            column: column.trim().to_string(),
            direction,
        }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Asc,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            direction: Direction::Desc,
        }
    }
}

/// Something that can be read as a row count: integers, floats (floored),
/// numeric strings and options of those.
///
/// Negative, NaN and unparsable input reads as `None`.
pub trait Count {
    fn to_count(&self) -> Option<u64>;
}

macro_rules! impl_count_signed {
    ($($ty:ty),*) => {
        $(impl Count for $ty {
            fn to_count(&self) -> Option<u64> {
                u64::try_from(*self).ok()
            }
        })*
    };
}

impl_count_signed!(i32, i64, isize, u32, u64, usize);

impl Count for f64 {
    fn to_count(&self) -> Option<u64> {
        (self.is_finite() && *self >= 0.0).then(|| self.floor() as u64)
    }
}

impl Count for f32 {
    fn to_count(&self) -> Option<u64> {
        f64::from(*self).to_count()
    }
}

impl Count for &str {
    fn to_count(&self) -> Option<u64> {
        self.trim().parse::<f64>().ok()?.to_count()
    }
}

impl Count for String {
    fn to_count(&self) -> Option<u64> {
        self.as_str().to_count()
    }
}

impl Count for Value {
    fn to_count(&self) -> Option<u64> {
        match self {
            Value::Int(i) => i.to_count(),
            Value::Float(f) => f.to_count(),
            Value::Decimal(d) => d.to_string().as_str().to_count(),
            Value::Text(s) => s.as_str().to_count(),
            _ => None,
        }
    }
}

impl<T: Count> Count for Option<T> {
    fn to_count(&self) -> Option<u64> {
        self.as_ref()?.to_count()
    }
}

/// Paging, ordering and join options shared by criteria and filter lookups.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub order_by: Vec<OrderBy>,
    /// How filter keys are joined by filter-based lookups.
    pub connective: Connective,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the row limit; invalid input falls back to 1.
    pub fn limit(mut self, n: impl Count) -> Self {
        self.limit = Some(n.to_count().unwrap_or(1));
        self
    }

    /// Set the row offset; invalid input falls back to 0.
    pub fn offset(mut self, n: impl Count) -> Self {
        self.offset = Some(n.to_count().unwrap_or(0));
        self
    }

    /// Replace the ordering with `+col`/`-col` entries. An empty list is a no-op.
    pub fn order_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let order: Vec<OrderBy> = columns
            .into_iter()
            .map(|c| OrderBy::parse(c.as_ref()))
            .collect();
        if !order.is_empty() {
            self.order_by = order;
        }
        self
    }

    /// Join filter keys with OR instead of AND.
    pub fn any(mut self) -> Self {
        self.connective = Connective::Or;
        self
    }

    /// Render `ORDER BY a ASC, b DESC`, or `None` when no ordering is set.
    pub fn order_by_sql(&self) -> GateResult<Option<String>> {
        if self.order_by.is_empty() {
            return Ok(None);
        }
        let mut out = String::from("ORDER BY ");
        for (i, order) in self.order_by.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            Ident::parse(&order.column)?.write_sql(&mut out);
            out.push_str(match order.direction {
                Direction::Asc => " ASC",
                Direction::Desc => " DESC",
            });
        }
        Ok(Some(out))
    }
}

/// Skip policy for clauses with missing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CriteriaOptions {
    /// Drop clauses whose value is null.
    pub omit_null: bool,
    /// Drop clauses whose value is the empty string.
    pub omit_empty: bool,
}

impl Default for CriteriaOptions {
    fn default() -> Self {
        Self {
            omit_null: true,
            omit_empty: true,
        }
    }
}

#[derive(Debug, Clone)]
struct GroupMark {
    saved: Sql,
    fresh: bool,
    clauses: usize,
}

/// An accumulated, parameterized WHERE clause plus query options.
#[derive(Debug, Clone)]
pub struct Criteria {
    clause: Sql,
    /// The next clause starts a scope and gets no connective.
    fresh: bool,
    groups: Vec<GroupMark>,
    clauses: usize,
    /// Clauses that can exclude a row (everything but `NOT IN ()`).
    restricting: usize,
    /// Some connective was OR.
    disjunctive: bool,
    skip: CriteriaOptions,
    options: QueryOptions,
    error: Option<String>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::with_options(CriteriaOptions::default())
    }

    pub fn with_options(skip: CriteriaOptions) -> Self {
        Self {
            clause: Sql::empty(),
            fresh: true,
            groups: Vec::new(),
            clauses: 0,
            restricting: 0,
            disjunctive: false,
            skip,
            options: QueryOptions::default(),
            error: None,
        }
    }

    /// AND-joined equality for every entry of `filter`.
    ///
    /// Null values render `IS NULL` and lists render `IN (...)`; nothing is
    /// skipped.
    pub fn matching(filter: &Record, connective: Connective) -> Self {
        let mut criteria = Self::with_options(CriteriaOptions {
            omit_null: false,
            omit_empty: false,
        });
        for (column, value) in filter {
            match Ident::parse(column) {
                Ok(ident) => criteria.push_equality(connective, &ident, value.clone()),
                Err(e) => criteria.record_error(e),
            }
        }
        criteria
    }

    /// Equality against an already validated column (`IS NULL` / `IN` as in [`Criteria::matching`]).
    pub(crate) fn push_equality(&mut self, connective: Connective, column: &Ident, value: Value) {
        let op = match value {
            Value::Null => Op::IsNull,
            Value::List(_) => Op::In,
            _ => Op::Eq,
        };
        if !op.is_unary() && self.skips(&value) {
            return;
        }
        self.append(connective, column, op, value);
    }

    /// Append `AND column op value`.
    pub fn and<O>(&mut self, column: &str, op: O, value: impl Into<Value>) -> &mut Self
    where
        O: TryInto<Op>,
        O::Error: Into<GateError>,
    {
        let op = op.try_into().map_err(Into::into);
        self.push_clause(Connective::And, column, op, value.into())
    }

    /// Append `OR column op value`.
    pub fn or<O>(&mut self, column: &str, op: O, value: impl Into<Value>) -> &mut Self
    where
        O: TryInto<Op>,
        O::Error: Into<GateError>,
    {
        let op = op.try_into().map_err(Into::into);
        self.push_clause(Connective::Or, column, op, value.into())
    }

    /// Open a parenthesized group joined with AND.
    pub fn and_group(&mut self) -> &mut Self {
        self.open_group(Connective::And)
    }

    /// Open a parenthesized group joined with OR.
    pub fn or_group(&mut self) -> &mut Self {
        self.open_group(Connective::Or)
    }

    /// Close the innermost group. A group that received no clause vanishes.
    pub fn group_end(&mut self) -> &mut Self {
        let Some(mark) = self.groups.pop() else {
            return self;
        };
        if self.clauses == mark.clauses {
            self.clause = mark.saved;
            self.fresh = mark.fresh;
        } else {
            self.clause.push(")");
            self.fresh = false;
        }
        self
    }

    /// Replace the ordering with `+col`/`-col` entries. An empty list is a no-op.
    pub fn order_by<I, S>(&mut self, columns: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let options = std::mem::take(&mut self.options).order_by(columns);
        for order in &options.order_by {
            if let Err(e) = Ident::parse(&order.column) {
                self.record_error(e);
            }
        }
        self.options = options;
        self
    }

    /// Set the row limit; invalid input falls back to 1.
    pub fn limit(&mut self, n: impl Count) -> &mut Self {
        self.options = std::mem::take(&mut self.options).limit(n);
        self
    }

    /// Set the row offset; invalid input falls back to 0.
    pub fn offset(&mut self, n: impl Count) -> &mut Self {
        self.options = std::mem::take(&mut self.options).offset(n);
        self
    }

    /// The WHERE body (without the `WHERE` keyword) with `?` placeholders.
    pub fn where_clause(&self) -> String {
        self.finished().to_template()
    }

    /// Parameters in placeholder order.
    pub fn params(&self) -> Vec<&Value> {
        self.clause.params()
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    /// `true` when no clause has been rendered.
    pub fn is_empty(&self) -> bool {
        self.clauses == 0
    }

    /// `true` when the rendered clause can exclude a row.
    ///
    /// `NOT IN` over an empty list renders `1=1` and does not count. Mixed
    /// with any OR it is taken to match every row.
    pub fn restricts(&self) -> bool {
        self.restricting > 0 && !(self.disjunctive && self.restricting < self.clauses)
    }

    /// The first invalid column or operator seen, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The rendered clause as a fragment, or the recorded build error.
    pub fn to_sql_fragment(&self) -> GateResult<Sql> {
        if let Some(error) = &self.error {
            return Err(GateError::Validation(error.clone()));
        }
        Ok(self.finished())
    }

    fn finished(&self) -> Sql {
        if self.groups.is_empty() {
            return self.clause.clone();
        }
        let mut closed = self.clone();
        while !closed.groups.is_empty() {
            closed.group_end();
        }
        closed.clause
    }

    fn connect(&mut self, connective: Connective) {
        if !self.fresh {
            self.clause.push(connective.as_sql());
            self.disjunctive |= connective == Connective::Or;
        }
        self.fresh = false;
    }

    fn open_group(&mut self, connective: Connective) -> &mut Self {
        self.groups.push(GroupMark {
            saved: self.clause.clone(),
            fresh: self.fresh,
            clauses: self.clauses,
        });
        self.connect(connective);
        self.clause.push("(");
        self.fresh = true;
        self
    }

    fn skips(&self, value: &Value) -> bool {
        (self.skip.omit_null && value.is_null()) || (self.skip.omit_empty && value.is_empty_text())
    }

    fn record_error(&mut self, error: GateError) {
        if self.error.is_none() {
            self.error = Some(error.to_string());
        }
    }

    fn push_clause(
        &mut self,
        connective: Connective,
        column: &str,
        op: GateResult<Op>,
        value: Value,
    ) -> &mut Self {
        let op = match op {
            Ok(op) => op,
            Err(e) => {
                self.record_error(e);
                return self;
            }
        };
        if !op.is_unary() && self.skips(&value) {
            return self;
        }
        let column = match Ident::parse(column) {
            Ok(ident) => ident,
            Err(e) => {
                self.record_error(e);
                return self;
            }
        };

        self.append(connective, &column, op, value);
        self
    }

    fn append(&mut self, connective: Connective, column: &Ident, op: Op, value: Value) {
        let matches_all = op == Op::NotIn && matches!(&value, Value::List(items) if items.is_empty());
        self.connect(connective);
        self.clause.push_sql(render_clause(column, op, value));
        self.clauses += 1;
        if !matches_all {
            self.restricting += 1;
        }
    }
}

impl Default for Criteria {
    fn default() -> Self {
        Self::new()
    }
}

fn render_clause(column: &Ident, op: Op, value: Value) -> Sql {
    let mut sql = Sql::empty();
    let name = column.name();

    if op.is_membership() {
        if let Value::List(items) = value {
            if items.is_empty() {
                sql.push(if op == Op::In { "1=0" } else { "1=1" });
                return sql;
            }
            sql.push_ident(column).push(" ").push(op.as_sql()).push(" (");
            for (i, item) in items.into_iter().enumerate() {
                if i > 0 {
                    sql.push(", ");
                }
                sql.push_bind_for(name, item);
            }
            sql.push(")");
            return sql;
        }
        sql.push_ident(column).push(" ").push(op.as_sql()).push(" (");
        sql.push_bind_for(name, value).push(")");
        return sql;
    }

    sql.push_ident(column);
    if op.is_unary() {
        sql.push(" ").push(op.as_sql());
    } else if op.is_keyword() {
        sql.push(" ").push(op.as_sql()).push(" ");
        sql.push_bind_for(name, value);
    } else {
        sql.push(op.as_sql());
        sql.push_bind_for(name, value);
    }
    sql
}
