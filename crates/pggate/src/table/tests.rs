use super::*;
use crate::meta::ColumnMeta;
use crate::op::Op;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Records every statement and replays queued fetch results.
#[derive(Default)]
struct Recorder {
    log: Mutex<Vec<(String, Vec<Value>)>>,
    rows: Mutex<VecDeque<GateResult<Vec<Record>>>>,
    affected: u64,
}

impl Recorder {
    fn affecting(affected: u64) -> Self {
        Self {
            affected,
            ..Self::default()
        }
    }

    fn queue(&self, rows: Vec<Record>) {
        self.rows.lock().unwrap().push_back(Ok(rows));
    }

    fn queue_error(&self, error: GateError) {
        self.rows.lock().unwrap().push_back(Err(error));
    }

    fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }

    fn params(&self, idx: usize) -> Vec<Value> {
        self.log.lock().unwrap()[idx].1.clone()
    }
}

impl Executor for Recorder {
    async fn fetch(&self, sql: &str, params: &[Value]) -> GateResult<Vec<Record>> {
        self.log
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        self.rows
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> GateResult<u64> {
        self.log
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        Ok(self.affected)
    }
}

fn record<const N: usize>(pairs: [(&str, Value); N]) -> Record {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

fn users_meta() -> TableMeta {
    TableMeta::new(
        "users",
        vec![
            ColumnMeta::new("id", "int8")
                .primary_key()
                .default_expr("nextval('users_id_seq'::regclass)"),
            ColumnMeta::new("name", "text").not_null(),
            ColumnMeta::new("status", "text"),
            ColumnMeta::new("age", "int4"),
            ColumnMeta::new("born", "date"),
            ColumnMeta::new("created_at", "timestamptz").not_null(),
            ColumnMeta::new("updated_at", "timestamptz"),
            ColumnMeta::new("version", "int4").not_null(),
        ],
        &GatewayConfig::default(),
    )
}

fn users(db: &Arc<Recorder>) -> Table<Arc<Recorder>> {
    Table::new(Arc::clone(db), "users", "user")
        .unwrap()
        .with_meta(users_meta())
}

#[tokio::test]
async fn get_selects_by_id_column() {
    let db = Arc::new(Recorder::default());
    db.queue(vec![record([("id", Value::Int(7))])]);

    let row = users(&db).get(7).await.unwrap();
    assert_eq!(row.unwrap().get("id"), Some(&Value::Int(7)));
    assert_eq!(db.statements(), ["SELECT * FROM users WHERE id = $1"]);
    assert_eq!(db.params(0), [Value::Int(7)]);
}

#[tokio::test]
async fn get_returns_none_when_missing() {
    let db = Arc::new(Recorder::default());
    assert!(users(&db).get(404).await.unwrap().is_none());
}

#[tokio::test]
async fn find_orders_by_primary_key_and_applies_limit() {
    let db = Arc::new(Recorder::default());
    db.queue(vec![
        record([("id", Value::Int(1))]),
        record([("id", Value::Int(3))]),
    ]);

    let filter = record([("status", "active".into()), ("unknown", 1.into())]);
    let rows = users(&db)
        .find(&filter, QueryOptions::new().limit(2))
        .await
        .unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(
        db.statements(),
        ["SELECT * FROM users WHERE status=$1 ORDER BY id ASC LIMIT 2"]
    );
    assert_eq!(db.params(0), [Value::from("active")]);
}

#[tokio::test]
async fn find_defaults_to_configured_limit() {
    let db = Arc::new(Recorder::default());
    users(&db).find(&Record::new(), QueryOptions::new()).await.unwrap();
    assert_eq!(
        db.statements(),
        ["SELECT * FROM users ORDER BY id ASC LIMIT 1000"]
    );
}

#[tokio::test]
async fn find_with_any_joins_with_or_and_honours_paging() {
    let db = Arc::new(Recorder::default());
    let filter = record([("age", 30.into()), ("status", Value::Null)]);
    let options = QueryOptions::new()
        .any()
        .order_by(["-age", "+name"])
        .limit(10)
        .offset(20);
    users(&db).find(&filter, options).await.unwrap();
    assert_eq!(
        db.statements(),
        ["SELECT * FROM users WHERE age=$1 OR status IS NULL ORDER BY age DESC, name ASC LIMIT 10 OFFSET 20"]
    );
}

#[tokio::test]
async fn filter_with_empty_text_on_nullable_number_is_null() {
    let db = Arc::new(Recorder::default());
    let filter = record([("age", "".into())]);
    users(&db).count(&filter, QueryOptions::new()).await.unwrap();
    assert_eq!(
        db.statements(),
        ["SELECT COUNT(*) AS count FROM users WHERE age IS NULL"]
    );
}

#[tokio::test]
async fn count_reads_count_column() {
    let db = Arc::new(Recorder::default());
    db.queue(vec![record([("count", Value::Int(5))])]);
    let n = users(&db)
        .count(&record([("status", "active".into())]), QueryOptions::new().limit(1))
        .await
        .unwrap();
    assert_eq!(n, 5);
    assert_eq!(
        db.statements(),
        ["SELECT COUNT(*) AS count FROM users WHERE status=$1"]
    );
}

#[tokio::test]
async fn select_uses_criteria_and_coerces_values() {
    let db = Arc::new(Recorder::default());
    let mut c = Criteria::new();
    c.and("born", Op::Gte, "1990-01-01")
        .and_group()
        .or("status", "=", "active")
        .or("status", "=", "trial")
        .group_end()
        .order_by(["-born"])
        .limit(5);

    users(&db).select(&c).await.unwrap();
    assert_eq!(
        db.statements(),
        ["SELECT * FROM users WHERE born>=$1 AND (status=$2 OR status=$3) ORDER BY born DESC LIMIT 5"]
    );
    assert_eq!(
        db.params(0)[0],
        Value::Date(chrono::NaiveDate::from_ymd_opt(1990, 1, 1).unwrap())
    );
}

#[tokio::test]
async fn select_surfaces_criteria_build_errors() {
    let db = Arc::new(Recorder::default());
    let mut c = Criteria::new();
    c.and("name; DROP TABLE users", "=", "x");
    let err = users(&db).select(&c).await.unwrap_err();
    assert!(err.is_validation());
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn select_where_binds_template_params() {
    let db = Arc::new(Recorder::default());
    users(&db)
        .select_where(
            "status = ? AND name <> 'who?'",
            vec![Value::from("active")],
            QueryOptions::new().limit(3),
        )
        .await
        .unwrap();
    assert_eq!(
        db.statements(),
        ["SELECT * FROM users WHERE status = $1 AND name <> 'who?' ORDER BY id ASC LIMIT 3"]
    );

    let err = users(&db)
        .select_where("a = ? AND b = ?", vec![Value::from(1)], QueryOptions::new())
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn create_returns_generated_id_and_fills_roles() {
    let db = Arc::new(Recorder::default());
    db.queue(vec![record([("id", Value::Int(42))])]);

    let entity = record([
        ("id", Value::Int(999)),
        ("name", "ann".into()),
        ("age", 0.into()),
        ("extra", "ignored".into()),
    ]);
    let written = users(&db).create(&entity).await.unwrap();

    assert_eq!(written.affected, 1);
    assert_eq!(written.record.get("id"), Some(&Value::Int(42)));
    assert_eq!(written.record.get("name"), Some(&Value::from("ann")));
    assert_eq!(
        db.statements(),
        ["INSERT INTO users (name, age, created_at, updated_at, version) \
          VALUES ($1, $2, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP, 1) RETURNING id"]
    );
    assert_eq!(db.params(0), [Value::from("ann"), Value::Int(0)]);
}

#[tokio::test]
async fn create_with_keys_keeps_supplied_id() {
    let db = Arc::new(Recorder::default());
    db.queue(vec![record([("id", Value::Int(999))])]);
    let entity = record([("id", Value::Int(999)), ("name", "ann".into())]);
    users(&db).create_with_keys(&entity).await.unwrap();
    assert!(db.statements()[0].starts_with("INSERT INTO users (id, name, "));
}

#[tokio::test]
async fn create_without_generated_key_executes() {
    let db = Arc::new(Recorder::affecting(1));
    let tags = Table::new(Arc::clone(&db), "tags", "tag").unwrap().with_meta(TableMeta::new(
        "tags",
        vec![ColumnMeta::new("slug", "text").primary_key()],
        &GatewayConfig::default(),
    ));
    let written = tags.create(&record([("slug", "rust".into())])).await.unwrap();
    assert_eq!(written.affected, 1);
    assert_eq!(db.statements(), ["INSERT INTO tags (slug) VALUES ($1)"]);
}

#[tokio::test]
async fn create_with_nothing_uses_default_values() {
    let db = Arc::new(Recorder::default());
    let events = Table::new(Arc::clone(&db), "events", "event").unwrap().with_meta(TableMeta::new(
        "events",
        vec![
            ColumnMeta::new("id", "int4").primary_key().auto_increment(),
            ColumnMeta::new("created_at", "timestamptz").default_expr("now()"),
        ],
        &GatewayConfig::default(),
    ));
    db.queue(vec![record([("id", Value::Int(1))])]);
    events.create(&Record::new()).await.unwrap();
    assert_eq!(
        db.statements(),
        ["INSERT INTO events DEFAULT VALUES RETURNING id"]
    );
}

#[tokio::test]
async fn create_rejects_empty_value_for_required_number() {
    let db = Arc::new(Recorder::default());
    let entity = record([("name", "ann".into()), ("version", "".into())]);
    let err = users(&db).create(&entity).await.unwrap_err();
    assert!(err.is_validation());
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn update_sets_fields_and_maintains_roles() {
    let db = Arc::new(Recorder::affecting(1));
    let entity = record([
        ("id", Value::Int(5)),
        ("name", "bob".into()),
        ("age", "".into()),
        ("created_at", "2020-01-01".into()),
        ("version", 9.into()),
    ]);
    let written = users(&db).update(&entity).await.unwrap();

    assert_eq!(written.affected, 1);
    assert_eq!(
        db.statements(),
        ["UPDATE users SET name = $1, age = $2, updated_at = CURRENT_TIMESTAMP, \
          version = version + 1 WHERE id=$3"]
    );
    assert_eq!(
        db.params(0),
        [Value::from("bob"), Value::Null, Value::Int(5)]
    );
}

#[tokio::test]
async fn update_without_fields_fails_before_sql() {
    let db = Arc::new(Recorder::affecting(1));
    let entity = record([("id", Value::Int(5)), ("version", 2.into())]);
    let err = users(&db).update(&entity).await.unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("no fields to update"));
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn update_requires_primary_key() {
    let db = Arc::new(Recorder::affecting(1));
    let err = users(&db)
        .update(&record([("name", "x".into())]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("missing primary key 'id'"));

    let logs = Table::new(Arc::clone(&db), "logs", "log").unwrap().with_meta(TableMeta::new(
        "logs",
        vec![ColumnMeta::new("line", "text")],
        &GatewayConfig::default(),
    ));
    let err = logs.update(&record([("line", "x".into())])).await.unwrap_err();
    assert!(err.to_string().contains("has no primary key"));
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn update_matching_uses_criteria() {
    let db = Arc::new(Recorder::affecting(3));
    let mut c = Criteria::new();
    c.and("status", "=", "trial").and("age", "<", 18);
    let n = users(&db)
        .update_matching(&record([("status", "minor".into())]), &c)
        .await
        .unwrap();
    assert_eq!(n, 3);
    assert_eq!(
        db.statements(),
        ["UPDATE users SET status = $1, updated_at = CURRENT_TIMESTAMP, \
          version = version + 1 WHERE status=$2 AND age<$3"]
    );
}

#[tokio::test]
async fn matching_writes_refuse_empty_criteria() {
    let db = Arc::new(Recorder::affecting(1));
    let table = users(&db);

    let mut skipped = Criteria::new();
    skipped.and("status", "=", Value::Null);

    assert!(table.delete_matching(&Criteria::new()).await.unwrap_err().is_validation());
    assert!(table.delete_matching(&skipped).await.unwrap_err().is_validation());
    assert!(
        table
            .update_matching(&record([("name", "x".into())]), &Criteria::new())
            .await
            .unwrap_err()
            .is_validation()
    );
    assert!(
        table
            .replace_matching(&Criteria::new(), &[Record::new()])
            .await
            .unwrap_err()
            .is_validation()
    );
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn matching_writes_refuse_criteria_that_match_every_row() {
    let db = Arc::new(Recorder::affecting(5));
    let table = users(&db);

    let mut none_excluded = Criteria::new();
    none_excluded.and("id", "not in", Vec::<i64>::new());
    assert!(table.delete_matching(&none_excluded).await.unwrap_err().is_validation());
    assert!(
        table
            .update_matching(&record([("status", "x".into())]), &none_excluded)
            .await
            .unwrap_err()
            .is_validation()
    );

    let mut either = Criteria::new();
    either.and("status", "=", "stale").or("id", Op::NotIn, Vec::<i64>::new());
    assert!(table.delete_matching(&either).await.unwrap_err().is_validation());
    assert!(db.statements().is_empty());

    // Excluding nothing alongside a real filter is still a filter.
    none_excluded.and("status", "=", "stale");
    assert_eq!(table.delete_matching(&none_excluded).await.unwrap(), 5);
    assert_eq!(db.statements(), ["DELETE FROM users WHERE 1=1 AND status=$1"]);
}

#[tokio::test]
async fn delete_by_id_and_by_entity() {
    let db = Arc::new(Recorder::affecting(0));
    let table = users(&db);
    assert_eq!(table.delete(5).await.unwrap(), 0);
    assert_eq!(table.delete_one(&record([("id", Value::Int(6))])).await.unwrap(), 0);
    assert_eq!(
        db.statements(),
        ["DELETE FROM users WHERE id = $1", "DELETE FROM users WHERE id=$1"]
    );
}

#[tokio::test]
async fn empty_ids_find_and_delete_nothing() {
    let db = Arc::new(Recorder::affecting(1));
    let table = users(&db);
    assert!(table.get("").await.unwrap().is_none());
    assert!(table.get(Value::Null).await.unwrap().is_none());
    assert_eq!(table.delete("").await.unwrap(), 0);
    assert!(db.statements().is_empty());
}

#[tokio::test]
async fn save_updates_existing_rows() {
    let db = Arc::new(Recorder::affecting(1));
    db.queue(vec![record([("?column?", Value::Int(1))])]);
    let entity = record([("id", Value::Int(5)), ("name", "bob".into())]);
    users(&db).save(&entity).await.unwrap();
    let statements = db.statements();
    assert_eq!(statements[0], "SELECT 1 FROM users WHERE id=$1 LIMIT 1");
    assert!(statements[1].starts_with("UPDATE users SET name = $1"));
}

#[tokio::test]
async fn save_creates_missing_rows() {
    let db = Arc::new(Recorder::default());
    // No existing row, then the generated id.
    db.queue(vec![]);
    db.queue(vec![record([("id", Value::Int(8))])]);
    let entity = record([("id", Value::Int(5)), ("name", "bob".into())]);
    let written = users(&db).save(&entity).await.unwrap();
    assert_eq!(written.record.get("id"), Some(&Value::Int(8)));
    assert!(db.statements()[1].starts_with("INSERT INTO users"));

    let db = Arc::new(Recorder::default());
    users(&db).save(&record([("name", "new".into())])).await.unwrap();
    assert_eq!(db.statements().len(), 1);
}

#[tokio::test]
async fn save_with_empty_key_creates() {
    let db = Arc::new(Recorder::default());
    db.queue(vec![record([("id", Value::Int(12))])]);
    let entity = record([("id", "".into()), ("name", "bob".into())]);
    let written = users(&db).save(&entity).await.unwrap();

    assert_eq!(written.record.get("id"), Some(&Value::Int(12)));
    let statements = db.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].starts_with("INSERT INTO users (name"));
}

#[tokio::test]
async fn replace_matching_deletes_then_creates() {
    let db = Arc::new(Recorder::affecting(2));
    db.queue(vec![record([("id", Value::Int(10))])]);
    db.queue(vec![record([("id", Value::Int(11))])]);

    let mut c = Criteria::new();
    c.and("status", "=", "stale");
    let (deleted, created) = users(&db)
        .replace_matching(
            &c,
            &[record([("name", "a".into())]), record([("name", "b".into())])],
        )
        .await
        .unwrap();

    assert_eq!(deleted, 2);
    assert_eq!(created.len(), 2);
    assert_eq!(created[1].get("id"), Some(&Value::Int(11)));
    assert_eq!(db.statements()[0], "DELETE FROM users WHERE status=$1");
}

fn catalog_row(name: &str, type_name: &str, pk: bool, identity: bool) -> Record {
    record([
        ("column_name", name.into()),
        ("data_type", type_name.into()),
        ("type_name", type_name.into()),
        ("nullable", (!pk).into()),
        ("primary_key", pk.into()),
        ("is_identity", identity.into()),
        ("default_expr", Value::Null),
    ])
}

#[tokio::test]
async fn metadata_is_loaded_once_and_shared() {
    let db = Arc::new(Recorder::default());
    db.queue(vec![
        catalog_row("id", "int4", true, true),
        catalog_row("title", "text", false, false),
    ]);
    let posts = Table::new(Arc::clone(&db), "public.posts", "post").unwrap();

    let (a, b) = tokio::join!(posts.meta(), posts.meta());
    assert_eq!(a.unwrap().columns.len(), 2);
    assert!(b.unwrap().generated_key().is_some());

    let other = posts.on(Arc::clone(&db));
    other.meta().await.unwrap();

    let statements = db.statements();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].contains("to_regclass($1::text)"));
    assert_eq!(db.params(0), [Value::from("public.posts")]);
}

#[tokio::test]
async fn failed_metadata_load_is_retried() {
    let db = Arc::new(Recorder::default());
    db.queue_error(GateError::Connection("reset".into()));
    db.queue(vec![]);
    db.queue(vec![catalog_row("id", "int4", true, true)]);
    let posts = Table::new(Arc::clone(&db), "posts", "post").unwrap();

    assert!(matches!(posts.meta().await, Err(GateError::Connection(_))));
    assert!(matches!(posts.meta().await, Err(GateError::UnknownTable(_))));
    assert_eq!(posts.meta().await.unwrap().columns.len(), 1);
    assert_eq!(db.statements().len(), 3);
}

#[tokio::test]
async fn custom_id_column_and_limit() {
    let db = Arc::new(Recorder::default());
    let config = GatewayConfig::new()
        .id_column("user_id")
        .default_limit(50)
        .tracer(crate::trace::SqlTracer::silent());
    let table = Table::with_config(Arc::clone(&db), "accounts", "account", config)
        .unwrap()
        .with_meta(TableMeta::new(
            "accounts",
            vec![ColumnMeta::new("user_id", "int8").primary_key()],
            &GatewayConfig::default(),
        ));
    table.get(1).await.unwrap();
    table.find(&Record::new(), QueryOptions::new()).await.unwrap();
    assert_eq!(
        db.statements(),
        [
            "SELECT * FROM accounts WHERE user_id = $1",
            "SELECT * FROM accounts ORDER BY user_id ASC LIMIT 50",
        ]
    );
}

#[tokio::test]
async fn preloaded_meta_takes_roles_from_gateway_config() {
    let db = Arc::new(Recorder::affecting(1));
    let config = GatewayConfig::new().version_columns(["lock_version"]);
    let table = Table::with_config(Arc::clone(&db), "accounts", "account", config)
        .unwrap()
        .with_meta(TableMeta::new(
            "accounts",
            vec![
                ColumnMeta::new("id", "int8").primary_key(),
                ColumnMeta::new("name", "text"),
                ColumnMeta::new("version", "int4"),
                ColumnMeta::new("lock_version", "int4"),
            ],
            &GatewayConfig::default(),
        ));

    let meta = table.meta().await.unwrap();
    assert!(!meta.column("version").unwrap().is_version);
    assert!(meta.column("lock_version").unwrap().is_version);

    let entity = record([("id", Value::Int(1)), ("name", "x".into()), ("version", 3.into())]);
    table.update(&entity).await.unwrap();
    assert_eq!(
        db.statements(),
        ["UPDATE accounts SET name = $1, version = $2, \
          lock_version = lock_version + 1 WHERE id=$3"]
    );
}
