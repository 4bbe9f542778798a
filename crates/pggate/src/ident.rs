//! Safe SQL identifier handling.
//!
//! Identifiers cannot be bound as parameters, so every table, column and
//! order-by name that reaches SQL text goes through [`Ident`].
//!
//! - Plain parts must match `[A-Za-z_][A-Za-z0-9_$]*` and fold to lower case
//! - Quoted parts (`"Odd Name"`) allow anything except NUL; `""` escapes `"`
//! - Dotted names (`public.users`) are split into parts
//!
//! Rendering quotes a part only when it would not survive unquoted, so
//! `Status` parses to `status`, while the catalog name `createdAt` (see
//! [`Ident::verbatim`]) renders as `"createdAt"`.

use crate::error::{GateError, GateResult};
use std::fmt;

/// A validated SQL identifier (column, table, or schema-qualified table).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    parts: Vec<String>,
}

impl Ident {
    /// Parse an identifier string, supporting dotted and quoted forms.
    pub fn parse(s: &str) -> GateResult<Self> {
        if s.is_empty() {
            return Err(GateError::validation("Identifier cannot be empty"));
        }
        if s.contains('\0') {
            return Err(GateError::validation(
                "Identifier cannot contain NUL character",
            ));
        }

        let mut parts = Vec::new();
        let mut chars = s.chars().peekable();

        loop {
            if chars.peek() == Some(&'"') {
                chars.next();
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('"') if chars.peek() == Some(&'"') => {
                            chars.next();
                            name.push('"');
                        }
                        Some('"') => break,
                        Some(c) => name.push(c),
                        None => return Err(GateError::validation("Unclosed quoted identifier")),
                    }
                }
                if name.is_empty() {
                    return Err(GateError::validation("Empty quoted identifier"));
                }
                parts.push(name);
            } else {
                let mut name = String::new();
                while let Some(&c) = chars.peek() {
                    if c == '.' {
                        break;
                    }
                    name.push(c);
                    chars.next();
                }
                if !is_plain(&name) {
                    return Err(GateError::validation(format!(
                        "Invalid identifier part {name:?} in {s:?}"
                    )));
                }
                parts.push(name.to_ascii_lowercase());
            }

            match chars.next() {
                None => break,
                Some('.') if chars.peek().is_some() => continue,
                Some('.') => return Err(GateError::validation("Trailing '.' in identifier")),
                Some(c) => {
                    return Err(GateError::validation(format!(
                        "Expected '.' between identifier parts, got '{c}'"
                    )));
                }
            }
        }

        Ok(Self { parts })
    }

    /// A single-part identifier taken verbatim (e.g. a name read from the catalog).
    pub fn verbatim(name: &str) -> GateResult<Self> {
        if name.is_empty() || name.contains('\0') {
            return Err(GateError::validation(format!("Invalid identifier {name:?}")));
        }
        Ok(Self {
            parts: vec![name.to_string()],
        })
    }

    /// The unquoted name of the last part.
    pub fn name(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or_default()
    }

    /// Append this identifier as SQL text.
    pub fn write_sql(&self, out: &mut String) {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            write_part(part, out);
        }
    }

    pub fn to_sql(&self) -> String {
        let mut s = String::new();
        self.write_sql(&mut s);
        s
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

/// Render a single column name, quoting it when needed.
pub fn quote_column(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    write_part(name, &mut out);
    out
}

fn is_plain(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn needs_quotes(name: &str) -> bool {
    !is_plain(name) || name.chars().any(|c| c.is_ascii_uppercase())
}

fn write_part(part: &str, out: &mut String) {
    if needs_quotes(part) {
        out.push('"');
        out.push_str(&part.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(part);
    }
}
