//! Comparison operators accepted by [`Criteria`](crate::Criteria).
//!
//! Operators are interpolated into SQL text (only values are bound), so they
//! come from this closed set. Strings parse case-insensitively with inner
//! whitespace collapsed: `"is  not NULL"` is [`Op::IsNotNull`].

use crate::error::{GateError, GateResult};
use std::fmt;
use std::str::FromStr;

/// A whitelisted SQL comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    /// `=`
    Eq,
    /// `!=` (also parsed from `<>`)
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Lte,
    /// `>`
    Gt,
    /// `>=`
    Gte,
    /// `LIKE`
    Like,
    /// `NOT LIKE`
    NotLike,
    /// `ILIKE`
    Ilike,
    /// `NOT ILIKE`
    NotIlike,
    /// `IN (...)`
    In,
    /// `NOT IN (...)`
    NotIn,
    /// `IS NULL`
    IsNull,
    /// `IS NOT NULL`
    IsNotNull,
}

impl Op {
    /// SQL text of the operator.
    pub fn as_sql(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Lte => "<=",
            Op::Gt => ">",
            Op::Gte => ">=",
            Op::Like => "LIKE",
            Op::NotLike => "NOT LIKE",
            Op::Ilike => "ILIKE",
            Op::NotIlike => "NOT ILIKE",
            Op::In => "IN",
            Op::NotIn => "NOT IN",
            Op::IsNull => "IS NULL",
            Op::IsNotNull => "IS NOT NULL",
        }
    }

    /// Unary operators take no value and render no placeholder.
    pub fn is_unary(self) -> bool {
        matches!(self, Op::IsNull | Op::IsNotNull)
    }

    /// Membership operators render a parenthesized placeholder list.
    pub fn is_membership(self) -> bool {
        matches!(self, Op::In | Op::NotIn)
    }

    /// Keyword operators are separated from their operands by spaces.
    pub fn is_keyword(self) -> bool {
        !matches!(
            self,
            Op::Eq | Op::Ne | Op::Lt | Op::Lte | Op::Gt | Op::Gte
        )
    }
}

impl FromStr for Op {
    type Err = GateError;

    fn from_str(s: &str) -> GateResult<Self> {
        let normalized = s
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase();
        let op = match normalized.as_str() {
            "=" | "==" => Op::Eq,
            "!=" | "<>" => Op::Ne,
            "<" => Op::Lt,
            "<=" => Op::Lte,
            ">" => Op::Gt,
            ">=" => Op::Gte,
            "LIKE" => Op::Like,
            "NOT LIKE" => Op::NotLike,
            "ILIKE" => Op::Ilike,
            "NOT ILIKE" => Op::NotIlike,
            "IN" => Op::In,
            "NOT IN" => Op::NotIn,
            "IS NULL" => Op::IsNull,
            "IS NOT NULL" => Op::IsNotNull,
            _ => {
                return Err(GateError::validation(format!(
                    "Unsupported operator {s:?}"
                )));
            }
        };
        Ok(op)
    }
}

impl TryFrom<&str> for Op {
    type Error = GateError;

    fn try_from(s: &str) -> GateResult<Self> {
        s.parse()
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}
