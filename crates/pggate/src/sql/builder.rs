use super::{SqlPart, split_template};
use crate::error::{GateError, GateResult};
use crate::ident::{Ident, quote_column};
use crate::value::Value;
use std::fmt::Write;

/// A bound value, remembering the column it is compared with or assigned to.
///
/// The column lets the table gateway coerce the value against column
/// metadata before it is sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Bind {
    pub value: Value,
    pub column: Option<String>,
}

/// A parameter-safe dynamic SQL builder.
#[must_use]
#[derive(Debug, Clone, Default)]
pub struct Sql {
    parts: Vec<SqlPart>,
    params: Vec<Bind>,
}

impl Sql {
    /// Create a new builder with an initial SQL fragment.
    pub fn new(initial_sql: impl Into<String>) -> Self {
        let mut sql = Self::empty();
        sql.push(&initial_sql.into());
        sql
    }

    /// Create an empty builder.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from `?`-placeholder text and its parameters.
    ///
    /// Fails when the number of placeholders differs from `params.len()`.
    pub fn from_template(text: &str, params: impl IntoIterator<Item = Value>) -> GateResult<Self> {
        let sql = Self {
            parts: split_template(text),
            params: params
                .into_iter()
                .map(|value| Bind {
                    value,
                    column: None,
                })
                .collect(),
        };
        sql.validate()?;
        Ok(sql)
    }

    /// Append raw SQL (no parameters).
    pub fn push(&mut self, sql: &str) -> &mut Self {
        if sql.is_empty() {
            return self;
        }

        match self.parts.last_mut() {
            Some(SqlPart::Raw(last)) => last.push_str(sql),
            _ => self.parts.push(SqlPart::Raw(sql.to_string())),
        }
        self
    }

    /// Append a parameter placeholder and bind its value.
    pub fn push_bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.parts.push(SqlPart::Param);
        self.params.push(Bind {
            value: value.into(),
            column: None,
        });
        self
    }

    /// Append a placeholder whose value belongs to `column`.
    pub fn push_bind_for(&mut self, column: &str, value: Value) -> &mut Self {
        self.parts.push(SqlPart::Param);
        self.params.push(Bind {
            value,
            column: Some(column.to_string()),
        });
        self
    }

    /// Append a validated identifier.
    pub fn push_ident(&mut self, ident: &Ident) -> &mut Self {
        match self.parts.last_mut() {
            Some(SqlPart::Raw(last)) => ident.write_sql(last),
            _ => self.parts.push(SqlPart::Raw(ident.to_sql())),
        }
        self
    }

    /// Append a column name taken from table metadata, quoting when needed.
    pub fn push_column(&mut self, name: &str) -> &mut Self {
        self.push(&quote_column(name))
    }

    /// Append another fragment, consuming it.
    pub fn push_sql(&mut self, other: Sql) -> &mut Self {
        for part in other.parts {
            match part {
                SqlPart::Raw(s) => {
                    self.push(&s);
                }
                SqlPart::Param => self.parts.push(SqlPart::Param),
            }
        }
        self.params.extend(other.params);
        self
    }

    /// `true` when no text and no parameters have been added.
    pub fn is_empty(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, SqlPart::Raw(s) if s.is_empty()))
    }

    /// Number of placeholders in the text.
    pub fn placeholder_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|p| matches!(p, SqlPart::Param))
            .count()
    }

    /// Bound values in placeholder order.
    pub fn binds(&self) -> &[Bind] {
        &self.params
    }

    /// Bound values without their column association.
    pub fn params(&self) -> Vec<&Value> {
        self.params.iter().map(|b| &b.value).collect()
    }

    pub(crate) fn into_binds(self) -> Vec<Bind> {
        self.params
    }

    /// Render SQL with `$1, $2, ...` placeholders.
    pub fn to_sql(&self) -> String {
        self.render(|out, idx| {
            let _ = write!(out, "${idx}");
        })
    }

    /// Render SQL with `?` placeholders.
    pub fn to_template(&self) -> String {
        self.render(|out, _| out.push('?'))
    }

    fn render(&self, mut placeholder: impl FnMut(&mut String, usize)) -> String {
        let cap = self
            .parts
            .iter()
            .map(|p| match p {
                SqlPart::Raw(s) => s.len(),
                SqlPart::Param => 4,
            })
            .sum();
        let mut out = String::with_capacity(cap);
        let mut idx = 0;
        for part in &self.parts {
            match part {
                SqlPart::Raw(s) => out.push_str(s),
                SqlPart::Param => {
                    idx += 1;
                    placeholder(&mut out, idx);
                }
            }
        }
        out
    }

    /// Check that placeholders and parameters line up.
    pub fn validate(&self) -> GateResult<()> {
        let placeholder_count = self.placeholder_count();
        let params_len = self.params.len();
        if placeholder_count != params_len {
            return Err(GateError::Validation(format!(
                "Sql: placeholders({placeholder_count}) != params({params_len})"
            )));
        }
        Ok(())
    }
}
