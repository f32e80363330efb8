//! Tests against a running server. Run with `cargo test -- --ignored`
//! and `DATABASE_URL` pointing at a scratch database.

use std::env;
use std::sync::atomic::{AtomicU32, Ordering};

use pgquery::{Arg, DbConn, Opts, QueryResult, ReplyCode};

static TABLE_COUNTER: AtomicU32 = AtomicU32::new(0);

fn get_db() -> DbConn {
    let mut db_url =
        env::var("DATABASE_URL").unwrap_or_else(|_| "postgres://localhost/postgres".to_string());
    if !db_url.contains("sslmode=") {
        if db_url.contains('?') {
            db_url.push_str("&sslmode=disable");
        } else {
            db_url.push_str("?sslmode=disable");
        }
    }
    DbConn::new(Opts::try_from(db_url.as_str()).expect("Failed to parse DATABASE_URL"))
}

fn run(db: &DbConn, sql: &str) -> ReplyCode {
    let mut res = QueryResult::new();
    let reply = db.query(&mut res, "live", "%s", &[Arg::raw(sql)]).unwrap();
    res.finish();
    reply
}

struct TestTable {
    name: String,
}

impl TestTable {
    fn new(db: &DbConn) -> Self {
        let id = TABLE_COUNTER.fetch_add(1, Ordering::SeqCst);
        let name = format!("pgquery_test_{}_{}", std::process::id(), id);
        run(db, &format!("DROP TABLE IF EXISTS {}", name));
        assert_eq!(
            run(
                db,
                &format!(
                    "CREATE TABLE {} (id INT PRIMARY KEY, name TEXT NOT NULL, \
                     total BIGINT, addr INET, block CIDR, active BOOL)",
                    name
                )
            ),
            ReplyCode::Ok
        );
        Self { name }
    }

    fn cleanup(&self, db: &DbConn) {
        run(db, &format!("DROP TABLE IF EXISTS {}", self.name));
    }
}

#[test]
#[ignore]
fn test_insert_and_select() {
    let db = get_db();
    let table = TestTable::new(&db);

    let mut res = QueryResult::new();
    let reply = db
        .query(
            &mut res,
            "add",
            "INSERT INTO %s VALUES (%u, %S, %U, %a, %b, true)",
            &[
                Arg::raw(&table.name),
                Arg::u32(1),
                Arg::text("alpha"),
                Arg::u64(5_000_000_000),
                Arg::addr("2001:db8::1"),
                Arg::block("192.0.2.0/24"),
            ],
        )
        .unwrap();
    assert_eq!(reply, ReplyCode::Ok);
    assert_eq!(res.rows_affected(), Some(1));
    res.finish();

    let reply = db
        .query(
            &mut res,
            "load",
            "SELECT name, total, active, id FROM %s WHERE id = %u",
            &[Arg::raw(&table.name), Arg::u32(1)],
        )
        .unwrap();
    assert_eq!(reply, ReplyCode::Ok);
    let rows = res.rows().unwrap();
    assert_eq!(rows.num_rows(), 1);
    assert_eq!(rows.field_string("load", 0, "name").unwrap(), "alpha");
    assert_eq!(rows.field_u64("load", 0, "total").unwrap(), 5_000_000_000);
    assert!(rows.field_bool("load", 0, "active").unwrap());
    assert_eq!(rows.field_u32("load", 0, "id").unwrap(), 1);
    res.finish();

    table.cleanup(&db);
}

#[test]
#[ignore]
fn test_duplicate_key() {
    let db = get_db();
    let table = TestTable::new(&db);

    let insert = format!("INSERT INTO {} (id, name) VALUES (%u, %S)", table.name);
    let mut res = QueryResult::new();
    for expected in [ReplyCode::Ok, ReplyCode::DuplicateKey] {
        let reply = db
            .query(&mut res, "add", &insert, &[Arg::u32(7), Arg::text("dup")])
            .unwrap();
        assert_eq!(reply, expected);
        res.finish();
    }

    // NOT NULL violations are plain errors
    let reply = db
        .query(
            &mut res,
            "add",
            &format!("INSERT INTO {} (id) VALUES (%u)", table.name),
            &[Arg::u32(8)],
        )
        .unwrap();
    assert_eq!(reply, ReplyCode::Error);
    assert_eq!(res.failure().unwrap().sqlstate(), Some("23502"));
    res.finish();

    table.cleanup(&db);
}

#[test]
#[ignore]
fn test_enum_column() {
    let db = get_db();
    let type_name = format!("pgquery_state_{}", std::process::id());
    run(&db, &format!("DROP TYPE IF EXISTS {}", type_name));
    assert_eq!(
        run(&db, &format!("CREATE TYPE {} AS ENUM ('up', 'down')", type_name)),
        ReplyCode::Ok
    );

    let mut res = QueryResult::new();
    let reply = db
        .query(
            &mut res,
            "state",
            "SELECT %t::%s AS state",
            &[Arg::quoted("down"), Arg::raw(&type_name)],
        )
        .unwrap();
    assert_eq!(reply, ReplyCode::Ok);
    assert_eq!(res.rows().unwrap().field_enum("state", 0, "state").unwrap(), "down");
    res.finish();

    run(&db, &format!("DROP TYPE IF EXISTS {}", type_name));
}

#[test]
#[ignore]
fn test_reconnect_after_terminate() {
    let db = get_db();
    let other = get_db();

    let mut res = QueryResult::new();
    db.query(&mut res, "pid", "SELECT pg_backend_pid()::int8 AS pid", &[])
        .unwrap();
    let pid = res.rows().unwrap().field_u64("pid", 0, "pid").unwrap();
    res.finish();

    let mut res = QueryResult::new();
    other
        .query(&mut res, "kill", "SELECT pg_terminate_backend(%U::int4)", &[Arg::u64(pid)])
        .unwrap();
    res.finish();

    let mut res = QueryResult::new();
    let reply = db.query(&mut res, "after", "SELECT 1", &[]).unwrap();
    assert_eq!(reply, ReplyCode::Ok);
    res.finish();
}
