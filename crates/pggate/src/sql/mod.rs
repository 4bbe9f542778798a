//! Parameter-safe SQL text assembly.
//!
//! [`Sql`] keeps text and bound values apart and only decides the placeholder
//! syntax when rendering:
//! - [`Sql::to_sql`] renders `$1, $2, ...` for execution
//! - [`Sql::to_template`] renders `?` for display and for the criteria text
//!
//! Both render from the same part list, so the placeholder count always
//! matches the parameter count.
//!
//! # Example
//!
//! ```ignore
//! use pggate::sql;
//!
//! let mut q = sql("SELECT * FROM users WHERE status = ");
//! q.push_bind("active").push(" AND age > ").push_bind(30);
//! assert_eq!(q.to_sql(), "SELECT * FROM users WHERE status = $1 AND age > $2");
//! ```

mod builder;


pub use builder::{Bind, Sql};

/// Start building a SQL statement.
pub fn sql(initial_sql: impl Into<String>) -> Sql {
    Sql::new(initial_sql)
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SqlPart {
    Raw(String),
    Param,
}

/// Split `?`-placeholder text into parts.
///
/// A `?` inside a single-quoted literal or a double-quoted identifier is
/// ordinary text.
pub(crate) fn split_template(text: &str) -> Vec<SqlPart> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for ch in text.chars() {
        match (quote, ch) {
            (None, '?') => {
                if !current.is_empty() {
                    parts.push(SqlPart::Raw(std::mem::take(&mut current)));
                }
                parts.push(SqlPart::Param);
            }
            (None, '\'' | '"') => {
                quote = Some(ch);
                current.push(ch);
            }
            (Some(q), _) if ch == q => {
                quote = None;
                current.push(ch);
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        parts.push(SqlPart::Raw(current));
    }
    parts
}
