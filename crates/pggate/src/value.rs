//! Dynamically typed SQL values.
//!
//! [`Value`] is what flows through filters, entities, criteria parameters and
//! decoded rows. It implements [`ToSql`] by adapting itself to whatever type
//! Postgres inferred for the placeholder (an `Int` bound against an `int4`
//! column is sent as `i32`, a `Text` bound against a `timestamp` column is
//! parsed), and [`FromSql`] for the common built-in types.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error;
use std::str::FromStr;
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked};
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

/// A row, filter or entity: column name to value.
pub type Record = BTreeMap<String, Value>;

/// A dynamically typed SQL value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "serde_json::Value", into = "serde_json::Value")]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    List(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `true` for the empty string. Lists are never empty in this sense.
    pub fn is_empty_text(&self) -> bool {
        matches!(self, Value::Text(s) if s.is_empty())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Integral view of the value, if it has one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Decimal(d) if d.fract().is_zero() => d.to_i64(),
            _ => None,
        }
    }

    /// Short name of the variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Decimal(_) => "decimal",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Time(_) => "time",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Json(_) => "json",
            Value::List(_) => "list",
        }
    }
}

// ==================== Conversions ====================

macro_rules! impl_from {
    ($($ty:ty => $variant:ident($conv:expr)),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant($conv(v))
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool(|v| v),
    i16 => Int(i64::from),
    i32 => Int(i64::from),
    i64 => Int(|v| v),
    u32 => Int(i64::from),
    f32 => Float(f64::from),
    f64 => Float(|v| v),
    Decimal => Decimal(|v| v),
    String => Text(|v| v),
    &str => Text(str::to_string),
    Uuid => Uuid(|v| v),
    NaiveDate => Date(|v| v),
    NaiveTime => Time(|v| v),
    NaiveDateTime => Timestamp(|v| v),
    DateTime<Utc> => TimestampTz(|v| v),
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            obj @ serde_json::Value::Object(_) => Value::Json(obj),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(v: Value) -> Self {
        use serde_json::Value as J;
        match v {
            Value::Null => J::Null,
            Value::Bool(b) => J::Bool(b),
            Value::Int(i) => J::from(i),
            Value::Float(f) => serde_json::Number::from_f64(f).map_or(J::Null, J::Number),
            // Rendered as a string so no precision is lost.
            Value::Decimal(d) => J::String(d.to_string()),
            Value::Text(s) => J::String(s),
            Value::Bytes(b) => J::String(bytea_hex(&b)),
            Value::Uuid(u) => J::String(u.to_string()),
            Value::Date(d) => J::String(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => J::String(t.format("%H:%M:%S%.f").to_string()),
            Value::Timestamp(ts) => J::String(format_timestamp(&ts)),
            Value::TimestampTz(ts) => J::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Value::Json(j) => j,
            Value::List(items) => J::Array(items.into_iter().map(J::from).collect()),
        }
    }
}

/// Convert a JSON object into a [`Record`]. Non-object input yields `None`.
pub fn record_from_json(value: serde_json::Value) -> Option<Record> {
    match value {
        serde_json::Value::Object(map) => {
            Some(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
        }
        _ => None,
    }
}

fn bytea_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

// ==================== Date/time text ====================

/// Canonical text form for `timestamp` values.
pub(crate) fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timestamp. Offsets are converted to UTC.
pub(crate) fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

pub(crate) fn parse_timestamptz(s: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(s.trim()) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(_) => parse_timestamp(s).map(|ts| ts.and_utc()),
    }
}

pub(crate) fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().or_else(|| {
        if s.len() > 10 {
            parse_timestamp(s).map(|ts| ts.date())
        } else {
            None
        }
    })
}

pub(crate) fn parse_time(s: &str) -> Option<NaiveTime> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Some(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

// ==================== ToSql ====================

pub(crate) fn is_text_type(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    ) || ty.name() == "citext"
}

fn mismatch(value: &Value, ty: &Type) -> BoxError {
    format!("cannot bind {} value to parameter of type {}", value.kind_name(), ty).into()
}

fn write_text(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    s.to_sql(ty, out)
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if let Kind::Domain(inner) = ty.kind() {
            return self.to_sql(inner, out);
        }
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::Value::Bool(*b).to_sql(ty, out),
                _ if is_text_type(ty) => write_text(if *b { "true" } else { "false" }, ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::INT8 => i.to_sql(ty, out),
                Type::OID => u32::try_from(*i)?.to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                Type::NUMERIC => Decimal::from(*i).to_sql(ty, out),
                Type::BOOL => (*i != 0).to_sql(ty, out),
                Type::JSON | Type::JSONB => serde_json::Value::from(*i).to_sql(ty, out),
                _ if is_text_type(ty) => write_text(&i.to_string(), ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::FLOAT8 => f.to_sql(ty, out),
                Type::NUMERIC => Decimal::try_from(*f)?.to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 if f.fract() == 0.0 => {
                    Value::Int(*f as i64).to_sql(ty, out)
                }
                Type::JSON | Type::JSONB => Value::Float(*f).to_json().to_sql(ty, out),
                _ if is_text_type(ty) => write_text(&f.to_string(), ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Decimal(d) => match *ty {
                Type::NUMERIC => d.to_sql(ty, out),
                Type::FLOAT4 | Type::FLOAT8 => match d.to_f64() {
                    Some(f) => Value::Float(f).to_sql(ty, out),
                    None => Err(mismatch(self, ty)),
                },
                Type::INT2 | Type::INT4 | Type::INT8 if d.fract().is_zero() => match d.to_i64() {
                    Some(i) => Value::Int(i).to_sql(ty, out),
                    None => Err(mismatch(self, ty)),
                },
                _ if is_text_type(ty) => write_text(&d.to_string(), ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Text(s) => text_to_sql(self, s, ty, out),
            Value::Bytes(b) => match *ty {
                Type::BYTEA => b.as_slice().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Uuid(u) => match *ty {
                Type::UUID => u.to_sql(ty, out),
                _ if is_text_type(ty) => write_text(&u.to_string(), ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Date(d) => match *ty {
                Type::DATE => d.to_sql(ty, out),
                Type::TIMESTAMP | Type::TIMESTAMPTZ => match d.and_hms_opt(0, 0, 0) {
                    Some(ts) => Value::Timestamp(ts).to_sql(ty, out),
                    None => Err(mismatch(self, ty)),
                },
                _ if is_text_type(ty) => write_text(&d.format("%Y-%m-%d").to_string(), ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Time(t) => match *ty {
                Type::TIME => t.to_sql(ty, out),
                _ if is_text_type(ty) => write_text(&t.format("%H:%M:%S%.f").to_string(), ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Timestamp(ts) => match *ty {
                Type::TIMESTAMP => ts.to_sql(ty, out),
                Type::TIMESTAMPTZ => ts.and_utc().to_sql(ty, out),
                Type::DATE => ts.date().to_sql(ty, out),
                _ if is_text_type(ty) => write_text(&format_timestamp(ts), ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::TimestampTz(ts) => match *ty {
                Type::TIMESTAMPTZ => ts.to_sql(ty, out),
                Type::TIMESTAMP => ts.naive_utc().to_sql(ty, out),
                Type::DATE => ts.date_naive().to_sql(ty, out),
                _ if is_text_type(ty) => write_text(&ts.to_rfc3339(), ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Json(j) => match *ty {
                Type::JSON | Type::JSONB => j.to_sql(ty, out),
                _ if is_text_type(ty) => write_text(&j.to_string(), ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::List(items) => match ty.kind() {
                Kind::Array(_) => items.to_sql(ty, out),
                _ if matches!(*ty, Type::JSON | Type::JSONB) => self.to_json().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn text_to_sql(value: &Value, s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    let bad = || -> BoxError { format!("cannot parse {s:?} as {ty}").into() };
    match *ty {
        Type::INT2 | Type::INT4 | Type::INT8 | Type::OID => {
            let i: i64 = s.trim().parse().map_err(|_| bad())?;
            Value::Int(i).to_sql(ty, out)
        }
        Type::FLOAT4 | Type::FLOAT8 => {
            let f: f64 = s.trim().parse().map_err(|_| bad())?;
            Value::Float(f).to_sql(ty, out)
        }
        Type::NUMERIC => Decimal::from_str(s.trim()).map_err(|_| bad())?.to_sql(ty, out),
        Type::BOOL => parse_bool(s).ok_or_else(bad)?.to_sql(ty, out),
        Type::DATE => parse_date(s).ok_or_else(bad)?.to_sql(ty, out),
        Type::TIME => parse_time(s).ok_or_else(bad)?.to_sql(ty, out),
        Type::TIMESTAMP => parse_timestamp(s).ok_or_else(bad)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => parse_timestamptz(s).ok_or_else(bad)?.to_sql(ty, out),
        Type::UUID => Uuid::parse_str(s.trim()).map_err(|_| bad())?.to_sql(ty, out),
        Type::JSON | Type::JSONB => {
            let json = serde_json::from_str::<serde_json::Value>(s)
                .unwrap_or_else(|_| serde_json::Value::String(s.to_string()));
            json.to_sql(ty, out)
        }
        Type::BYTEA => s.as_bytes().to_sql(ty, out),
        _ if is_text_type(ty) || matches!(ty.kind(), Kind::Enum(_)) => write_text(s, ty, out),
        _ => Err(mismatch(value, ty)),
    }
}

impl Value {
    fn to_json(&self) -> serde_json::Value {
        serde_json::Value::from(self.clone())
    }
}

// ==================== FromSql ====================

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let value = match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::CHAR => Value::Text(char::from(i8::from_sql(ty, raw)? as u8).to_string()),
            Type::INT2 => Value::Int(i16::from_sql(ty, raw)?.into()),
            Type::INT4 => Value::Int(i32::from_sql(ty, raw)?.into()),
            Type::INT8 => Value::Int(i64::from_sql(ty, raw)?),
            Type::OID => Value::Int(u32::from_sql(ty, raw)?.into()),
            Type::FLOAT4 => Value::Float(f32::from_sql(ty, raw)?.into()),
            Type::FLOAT8 => Value::Float(f64::from_sql(ty, raw)?),
            Type::NUMERIC => Value::Decimal(Decimal::from_sql(ty, raw)?),
            Type::BYTEA => Value::Bytes(Vec::<u8>::from_sql(ty, raw)?),
            Type::UUID => Value::Uuid(Uuid::from_sql(ty, raw)?),
            Type::DATE => Value::Date(NaiveDate::from_sql(ty, raw)?),
            Type::TIME => Value::Time(NaiveTime::from_sql(ty, raw)?),
            Type::TIMESTAMP => Value::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => Value::TimestampTz(DateTime::<Utc>::from_sql(ty, raw)?),
            Type::JSON | Type::JSONB => Value::Json(serde_json::Value::from_sql(ty, raw)?),
            _ => match ty.kind() {
                Kind::Array(_) => Value::List(Vec::<Value>::from_sql(ty, raw)?),
                Kind::Domain(inner) => Value::from_sql(inner, raw)?,
                Kind::Enum(_) => Value::Text(String::from_sql(ty, raw)?),
                _ if is_text_type(ty) => Value::Text(String::from_sql(ty, raw)?),
                _ => return Err(format!("unsupported column type {ty}").into()),
            },
        };
        Ok(value)
    }

    fn from_sql_null(_: &Type) -> Result<Self, BoxError> {
        Ok(Value::Null)
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}
