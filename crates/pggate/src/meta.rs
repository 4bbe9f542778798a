//! Column metadata read from the Postgres catalog.

use crate::config::GatewayConfig;
use crate::error::{GateError, GateResult};
use crate::value::{Record, Value};

/// Broad grouping of a column type, used for coercion and role detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Integer,
    Float,
    Numeric,
    Bool,
    Text,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Bytes,
    Array,
    Other,
}

impl TypeFamily {
    /// Classify a `pg_type.typname`.
    pub fn from_type_name(name: &str) -> Self {
        match name {
            "int2" | "int4" | "int8" | "oid" => Self::Integer,
            "float4" | "float8" => Self::Float,
            "numeric" | "money" => Self::Numeric,
            "bool" => Self::Bool,
            "text" | "varchar" | "bpchar" | "char" | "name" | "citext" => Self::Text,
            "date" => Self::Date,
            "time" | "timetz" => Self::Time,
            "timestamp" => Self::Timestamp,
            "timestamptz" => Self::TimestampTz,
            "uuid" => Self::Uuid,
            "json" | "jsonb" => Self::Json,
            "bytea" => Self::Bytes,
            _ if name.starts_with('_') => Self::Array,
            _ => Self::Other,
        }
    }

    /// Families for which an empty string can only mean "no value".
    pub fn empty_means_null(self) -> bool {
        !matches!(self, Self::Text | Self::Bytes | Self::Other)
    }

    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            Self::Date | Self::Time | Self::Timestamp | Self::TimestampTz
        )
    }
}

/// Metadata for one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnMeta {
    pub name: String,
    /// Formatted type, e.g. `character varying(64)`.
    pub data_type: String,
    /// Catalog type name, e.g. `varchar`.
    pub type_name: String,
    pub family: TypeFamily,
    pub primary_key: bool,
    pub nullable: bool,
    /// Default expression, e.g. `nextval('users_id_seq'::regclass)`.
    pub default: Option<String>,
    /// Identity column or sequence-backed default.
    pub auto_increment: bool,
    pub is_created: bool,
    pub is_updated: bool,
    pub is_version: bool,
}

impl ColumnMeta {
    /// A nullable, non-key column of the given catalog type.
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        let type_name = type_name.into();
        Self {
            name: name.into(),
            data_type: type_name.clone(),
            family: TypeFamily::from_type_name(&type_name),
            type_name,
            primary_key: false,
            nullable: true,
            default: None,
            auto_increment: false,
            is_created: false,
            is_updated: false,
            is_version: false,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn default_expr(mut self, expr: impl Into<String>) -> Self {
        let expr = expr.into();
        self.auto_increment |= expr.starts_with("nextval(");
        self.default = Some(expr);
        self
    }

    /// Created, updated and version columns are maintained by the gateway.
    pub fn is_role(&self) -> bool {
        self.is_created || self.is_updated || self.is_version
    }

    fn derive_roles(&mut self, config: &GatewayConfig) {
        let named = |list: &[String]| list.iter().any(|n| n.eq_ignore_ascii_case(&self.name));
        let stamp = matches!(
            self.family,
            TypeFamily::Timestamp | TypeFamily::TimestampTz | TypeFamily::Date
        );
        self.is_created = stamp && named(&config.created_columns);
        self.is_updated = stamp && named(&config.updated_columns);
        self.is_version = self.family == TypeFamily::Integer && named(&config.version_columns);
    }
}

/// Metadata for one table, columns in ordinal order.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    pub table: String,
    pub columns: Vec<ColumnMeta>,
}

impl TableMeta {
    /// Build table metadata, deriving column roles from `config`.
    pub fn new(table: impl Into<String>, columns: Vec<ColumnMeta>, config: &GatewayConfig) -> Self {
        let columns = columns
            .into_iter()
            .map(|mut c| {
                c.derive_roles(config);
                c
            })
            .collect();
        Self {
            table: table.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &ColumnMeta> {
        self.columns.iter().filter(|c| c.primary_key)
    }

    /// The primary key whose value the database generates, when there is exactly one.
    pub fn generated_key(&self) -> Option<&ColumnMeta> {
        let mut keys = self.primary_keys().filter(|c| c.auto_increment);
        match (keys.next(), keys.next()) {
            (Some(key), None) => Some(key),
            _ => None,
        }
    }
}

/// Catalog query for one table's columns; `$1` is the (possibly qualified) table name.
pub(crate) const INTROSPECT_SQL: &str = r#"
SELECT
  a.attname::text AS column_name,
  pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
  t.typname::text AS type_name,
  NOT a.attnotnull AS nullable,
  pg_get_expr(ad.adbin, ad.adrelid) AS default_expr,
  a.attidentity::text <> '' AS is_identity,
  EXISTS (
    SELECT 1
    FROM pg_catalog.pg_index i
    WHERE i.indrelid = a.attrelid
      AND i.indisprimary
      AND a.attnum = ANY(i.indkey)
  ) AS primary_key
FROM pg_catalog.pg_attribute a
JOIN pg_catalog.pg_type t ON t.oid = a.atttypid
LEFT JOIN pg_catalog.pg_attrdef ad ON ad.adrelid = a.attrelid AND ad.adnum = a.attnum
WHERE a.attrelid = to_regclass($1::text)
  AND a.attnum > 0
  AND NOT a.attisdropped
ORDER BY a.attnum
"#;

fn text(record: &Record, key: &str) -> GateResult<String> {
    match record.get(key) {
        Some(Value::Text(s)) => Ok(s.clone()),
        other => Err(GateError::decode(key, format!("expected text, got {other:?}"))),
    }
}

fn flag(record: &Record, key: &str) -> GateResult<bool> {
    match record.get(key) {
        Some(Value::Bool(b)) => Ok(*b),
        Some(Value::Null) | None => Ok(false),
        other => Err(GateError::decode(key, format!("expected bool, got {other:?}"))),
    }
}

/// Turn rows of [`INTROSPECT_SQL`] into column metadata (roles not yet derived).
pub(crate) fn columns_from_records(records: &[Record]) -> GateResult<Vec<ColumnMeta>> {
    records
        .iter()
        .map(|record| {
            let type_name = text(record, "type_name")?;
            let mut column = ColumnMeta::new(text(record, "column_name")?, type_name);
            column.data_type = text(record, "data_type")?;
            column.nullable = flag(record, "nullable")?;
            column.primary_key = flag(record, "primary_key")?;
            column.auto_increment = flag(record, "is_identity")?;
            if let Some(Value::Text(expr)) = record.get("default_expr") {
                column = column.default_expr(expr.clone());
            }
            Ok(column)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_row(name: &str, type_name: &str, nullable: bool, pk: bool, default: Option<&str>) -> Record {
        let mut r = Record::new();
        r.insert("column_name".into(), name.into());
        r.insert("data_type".into(), type_name.into());
        r.insert("type_name".into(), type_name.into());
        r.insert("nullable".into(), nullable.into());
        r.insert("primary_key".into(), pk.into());
        r.insert("is_identity".into(), false.into());
        r.insert("default_expr".into(), default.into());
        r
    }

    #[test]
    fn reads_catalog_rows() {
        let rows = vec![
            catalog_row("id", "int8", false, true, Some("nextval('users_id_seq'::regclass)")),
            catalog_row("email", "text", false, false, None),
            catalog_row("updated_at", "timestamptz", true, false, Some("now()")),
        ];
        let columns = columns_from_records(&rows).unwrap();
        assert_eq!(columns.len(), 3);
        assert!(columns[0].primary_key && columns[0].auto_increment);
        assert!(!columns[1].nullable);
        assert_eq!(columns[2].default.as_deref(), Some("now()"));
        assert_eq!(columns[2].family, TypeFamily::TimestampTz);
    }

    #[test]
    fn derives_roles_by_name_and_type() {
        let meta = TableMeta::new(
            "posts",
            vec![
                ColumnMeta::new("id", "int4").primary_key().auto_increment(),
                ColumnMeta::new("created_at", "timestamptz"),
                ColumnMeta::new("Updated", "timestamp"),
                ColumnMeta::new("version", "int4"),
                ColumnMeta::new("modified", "text"),
            ],
            &GatewayConfig::default(),
        );
        assert!(meta.column("created_at").unwrap().is_created);
        assert!(meta.column("Updated").unwrap().is_updated);
        assert!(meta.column("version").unwrap().is_version);
        // Name matches but the type does not.
        assert!(!meta.column("modified").unwrap().is_role());
        assert_eq!(meta.generated_key().unwrap().name, "id");
    }

    #[test]
    fn generated_key_requires_exactly_one() {
        let meta = TableMeta::new(
            "pairs",
            vec![
                ColumnMeta::new("a", "int4").primary_key().auto_increment(),
                ColumnMeta::new("b", "int4").primary_key().auto_increment(),
            ],
            &GatewayConfig::default(),
        );
        assert!(meta.generated_key().is_none());
        assert_eq!(meta.primary_keys().count(), 2);
    }

    #[test]
    fn type_families() {
        assert_eq!(TypeFamily::from_type_name("_int4"), TypeFamily::Array);
        assert_eq!(TypeFamily::from_type_name("mood"), TypeFamily::Other);
        assert!(TypeFamily::Integer.empty_means_null());
        assert!(!TypeFamily::Text.empty_means_null());
        assert!(TypeFamily::Date.is_temporal());
    }
}
