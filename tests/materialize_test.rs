//! Integration tests for record materialization through the query helpers.
//!
//! Tests verify that:
//! - A field that cannot hold its column value is skipped, not fatal
//! - Renamed and unmatched columns are handled
//! - Staged and declared coercion differ on text columns
//! - Declared coercion treats empty text as zero or absent

use ephemeral_db::db::{PoolManager, Record, RecordDescriptor};
use ephemeral_db::{CoercionMode, DatabaseSettings, params};
use tempfile::TempDir;

fn setup_manager() -> (PoolManager, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("materialize.db");
    (
        PoolManager::new(DatabaseSettings::sqlite(path.to_string_lossy())),
        dir,
    )
}

#[derive(Debug, Default, PartialEq)]
struct Account {
    id: i64,
    age: i64,
    active: bool,
}

impl Record for Account {
    fn describe() -> RecordDescriptor<Self> {
        RecordDescriptor::new()
            .field("id", |a: &mut Account, v| a.id = v)
            .field("age", |a: &mut Account, v| a.age = v)
            .field("active", |a: &mut Account, v| a.active = v)
    }
}

#[tokio::test]
async fn test_mismatched_column_keeps_other_fields() {
    let (manager, _dir) = setup_manager();

    let rows = manager
        .executor()
        .fetch_all_detailed::<Account>("SELECT 3 AS id, 'not a number' AS age, 1 AS active", &[])
        .await
        .unwrap();

    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert!(row.scan_error.is_none());
    assert_eq!(row.record.id, 3);
    assert_eq!(row.record.age, 0);
    assert!(row.record.active);
    assert_eq!(row.skipped.len(), 1);
    assert_eq!(row.skipped[0].field, "age");
    assert!(!row.is_complete());

    // fetch_one still returns the partially filled record
    let account: Option<Account> = manager
        .executor()
        .fetch_one("SELECT 3 AS id, 'not a number' AS age", &[])
        .await
        .unwrap();
    assert_eq!(
        account,
        Some(Account {
            id: 3,
            age: 0,
            active: false,
        })
    );
}

#[tokio::test]
async fn test_staged_and_declared_text_coercion() {
    let (manager, _dir) = setup_manager();
    let query = "SELECT 12 AS id, '1' AS active, ? AS age";

    // Staged: single-byte '1' is a boolean, numeric text is not an integer
    let rows = manager
        .executor()
        .fetch_all_detailed::<Account>(query, &params!["40"])
        .await
        .unwrap();
    assert_eq!(
        rows[0].record,
        Account {
            id: 12,
            age: 0,
            active: true,
        }
    );
    assert_eq!(rows[0].skipped[0].field, "age");

    let account: Option<Account> = manager
        .executor()
        .with_coercion(CoercionMode::Declared)
        .fetch_one(query, &params!["40"])
        .await
        .unwrap();
    assert_eq!(
        account,
        Some(Account {
            id: 12,
            age: 40,
            active: true,
        })
    );
}

#[tokio::test]
async fn test_multi_byte_bool_text_is_skipped() {
    let (manager, _dir) = setup_manager();

    let rows = manager
        .executor()
        .fetch_all_detailed::<Account>("SELECT 1 AS id, 'true' AS active", &[])
        .await
        .unwrap();

    assert_eq!(rows[0].record.id, 1);
    assert!(!rows[0].record.active);
    assert_eq!(rows[0].skipped[0].field, "active");
}

#[derive(Debug, Default, PartialEq)]
struct Profile {
    user_id: i64,
    display_name: String,
    bio: Option<String>,
}

impl Record for Profile {
    fn describe() -> RecordDescriptor<Self> {
        RecordDescriptor::new()
            .field("UserID", |p: &mut Profile, v| p.user_id = v)
            .renamed("DisplayName", "name", |p: &mut Profile, v| p.display_name = v)
            .field("Bio", |p: &mut Profile, v| p.bio = v)
    }
}

#[tokio::test]
async fn test_renamed_and_unmatched_columns() {
    let (manager, _dir) = setup_manager();

    let profile: Option<Profile> = manager
        .executor()
        .fetch_one(
            "SELECT 9 AS user_id, 'Ada' AS name, 'ignored' AS extra, NULL AS bio",
            &[],
        )
        .await
        .unwrap();

    assert_eq!(
        profile,
        Some(Profile {
            user_id: 9,
            display_name: "Ada".into(),
            bio: None,
        })
    );
}

#[tokio::test]
async fn test_record_without_matching_columns_is_default() {
    let (manager, _dir) = setup_manager();

    let profile: Option<Profile> = manager
        .executor()
        .fetch_one("SELECT 1 AS unrelated", &[])
        .await
        .unwrap();

    assert_eq!(profile, Some(Profile::default()));
}

#[derive(Debug, Default, PartialEq)]
struct Counter {
    count: i64,
    limit: Option<i64>,
    label: String,
}

impl Record for Counter {
    fn describe() -> RecordDescriptor<Self> {
        RecordDescriptor::new()
            .field("count", |c: &mut Counter, v| c.count = v)
            .field("limit", |c: &mut Counter, v| c.limit = v)
            .field("label", |c: &mut Counter, v| c.label = v)
    }
}

#[tokio::test]
async fn test_declared_coercion_for_empty_text() {
    let (manager, _dir) = setup_manager();
    let executor = manager.executor().with_coercion(CoercionMode::Declared);

    let counter: Option<Counter> = executor
        .fetch_one("SELECT '42' AS count, '' AS \"limit\", 'hits' AS label", &[])
        .await
        .unwrap();
    assert_eq!(
        counter,
        Some(Counter {
            count: 42,
            limit: None,
            label: "hits".into(),
        })
    );

    let counter: Option<Counter> = executor
        .fetch_one("SELECT '' AS count, '7' AS \"limit\"", &[])
        .await
        .unwrap();
    assert_eq!(
        counter,
        Some(Counter {
            count: 0,
            limit: Some(7),
            label: String::new(),
        })
    );
}

#[tokio::test]
async fn test_nullable_field_uses_driver_conversion() {
    let (manager, _dir) = setup_manager();

    // Nullable fields are scanned directly, so a bad value fails the row
    let err = manager
        .executor()
        .fetch_one::<Counter>("SELECT 1 AS count, 'five' AS \"limit\"", &[])
        .await
        .unwrap_err();
    assert!(matches!(err, ephemeral_db::DbError::Scan { ref column, .. } if column == "limit"));
}

#[derive(Debug, Default, PartialEq)]
struct Flag {
    flag: i64,
    maybe: Option<i64>,
    on: bool,
}

impl Record for Flag {
    fn describe() -> RecordDescriptor<Self> {
        RecordDescriptor::new()
            .field("flag", |f: &mut Flag, v| f.flag = v)
            .field("maybe", |f: &mut Flag, v| f.maybe = v)
            .field("on", |f: &mut Flag, v| f.on = v)
    }
}

#[tokio::test]
async fn test_boolean_columns_read_as_integers() {
    let (manager, _dir) = setup_manager();
    let executor = manager.executor();
    executor
        .execute(
            "CREATE TABLE flags (flag BOOLEAN NOT NULL, maybe BOOLEAN, \"on\" BOOLEAN NOT NULL)",
            &[],
        )
        .await
        .unwrap();
    executor
        .execute("INSERT INTO flags VALUES (1, 0, 1)", &[])
        .await
        .unwrap();

    let rows = executor
        .fetch_all_detailed::<Flag>("SELECT flag, maybe, \"on\" FROM flags", &[])
        .await
        .unwrap();
    assert!(rows[0].scan_error.is_none());
    assert!(rows[0].skipped.is_empty(), "skipped: {:?}", rows[0].skipped);
    assert_eq!(
        rows[0].record,
        Flag {
            flag: 1,
            maybe: Some(0),
            on: true,
        }
    );

    let maps = executor
        .fetch_all_as_maps("SELECT flag FROM flags", &[])
        .await
        .unwrap();
    assert_eq!(maps[0].get("flag"), Some(&ephemeral_db::db::Value::Int(1)));
}

#[derive(Debug, Default, PartialEq)]
struct Quota {
    note: Option<String>,
    limit: Option<i64>,
}

impl Record for Quota {
    fn describe() -> RecordDescriptor<Self> {
        RecordDescriptor::new()
            .field("note", |q: &mut Quota, v| q.note = v)
            .field("limit", |q: &mut Quota, v| q.limit = v)
    }
}

#[tokio::test]
async fn test_fetch_one_detailed_keeps_partial_record() {
    let (manager, _dir) = setup_manager();

    let row = manager
        .executor()
        .fetch_one_detailed::<Quota>("SELECT 'hi' AS note, 'five' AS \"limit\"", &[])
        .await
        .unwrap()
        .unwrap();

    assert_eq!(row.record.note.as_deref(), Some("hi"));
    assert_eq!(row.record.limit, None);
    assert!(
        matches!(row.scan_error, Some(ephemeral_db::DbError::Scan { ref column, .. }) if column == "limit")
    );

    let none = manager
        .executor()
        .fetch_one_detailed::<Quota>("SELECT 'hi' AS note WHERE 1 = 0", &[])
        .await
        .unwrap();
    assert!(none.is_none());
}
