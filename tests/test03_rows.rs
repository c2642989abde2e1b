use chrono::{Local, NaiveDate, TimeZone, Utc};
use serde_json::json;
use spanner_sql_driver::prelude::*;
use spanner_sql_driver::test_utils::FakeEngine;

async fn connect(engine: &FakeEngine) -> Result<Connection, DriverError> {
    engine.connector().connect(&Context::background()).await
}

#[tokio::test]
async fn columns_are_known_before_the_first_row() -> Result<(), DriverError> {
    let engine = FakeEngine::new();
    engine.create_table("t", &[("id", TypeCode::String), ("n", TypeCode::Int64)]);
    engine.insert_row("t", vec![Value::from("a"), Value::Int(1)]);
    engine.insert_row("t", vec![Value::from("b"), Value::Int(2)]);
    let conn = connect(&engine).await?;
    let ctx = Context::background();

    let mut rows = conn.query(&ctx, "SELECT * FROM t", &[]).await?;
    assert_eq!(rows.columns().await, ["id".to_string(), "n".to_string()]);

    let mut dest = vec![Value::Null; 2];
    assert!(rows.next(&mut dest).await?);
    assert_eq!(dest, vec![Value::from("a"), Value::Int(1)]);
    assert!(rows.next(&mut dest).await?);
    assert_eq!(dest, vec![Value::from("b"), Value::Int(2)]);
    assert!(!rows.next(&mut dest).await?);
    assert!(!rows.next(&mut dest).await?);
    Ok(())
}

#[tokio::test]
async fn empty_result_has_no_columns() -> Result<(), DriverError> {
    let engine = FakeEngine::new();
    engine.create_table("t", &[("id", TypeCode::String)]);
    let conn = connect(&engine).await?;

    let mut rows = conn.query(&Context::background(), "SELECT id FROM t", &[]).await?;
    assert!(rows.columns().await.is_empty());
    assert!(!rows.next(&mut []).await?);
    Ok(())
}

#[tokio::test]
async fn every_supported_type_decodes() -> Result<(), DriverError> {
    let engine = FakeEngine::new();
    engine.script_query(
        "SELECT everything",
        vec![
            Field::new("i", TypeCode::Int64),
            Field::new("f", TypeCode::Float64),
            Field::new("s", TypeCode::String),
            Field::new("b", TypeCode::Bytes),
            Field::new("ok", TypeCode::Bool),
            Field::new("d", TypeCode::Date),
            Field::new("ts", TypeCode::Timestamp),
            Field::new("missing", TypeCode::String),
        ],
        vec![vec![
            json!("-42"),
            json!("Infinity"),
            json!("hello"),
            json!("AAEC"),
            json!(true),
            json!("2024-02-29"),
            json!("2024-02-29T12:30:00.5Z"),
            json!(null),
        ]],
    );
    let conn = connect(&engine).await?;

    let mut rows = conn.query(&Context::background(), "SELECT everything", &[]).await?;
    let row = rows.next_row().await?.expect("one row");
    assert_eq!(row[0], Value::Int(-42));
    assert_eq!(row[1].as_float(), Some(f64::INFINITY));
    assert_eq!(row[2].as_text(), Some("hello"));
    assert_eq!(row[3].as_bytes(), Some(&[0u8, 1, 2][..]));
    assert_eq!(row[4].as_bool(), Some(true));

    let midnight = NaiveDate::from_ymd_opt(2024, 2, 29)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid date");
    assert_eq!(row[5].as_date(), Local.from_local_datetime(&midnight).earliest());

    let ts = Utc.with_ymd_and_hms(2024, 2, 29, 12, 30, 0).single().expect("valid ts")
        + chrono::Duration::milliseconds(500);
    assert_eq!(row[6].as_timestamp(), Some(ts));
    assert!(row[7].is_null());
    Ok(())
}

#[tokio::test]
async fn unsupported_column_types_fail_on_next() -> Result<(), DriverError> {
    let engine = FakeEngine::new();
    engine.script_query(
        "SELECT tags",
        vec![Field::new("tags", TypeCode::Array)],
        vec![vec![json!(["a", "b"])]],
    );
    engine.script_query(
        "SELECT price",
        vec![Field::new("price", TypeCode::Numeric)],
        vec![vec![json!(null)]],
    );
    let conn = connect(&engine).await?;
    let ctx = Context::background();

    let mut rows = conn.query(&ctx, "SELECT tags", &[]).await?;
    assert_eq!(rows.columns().await, ["tags".to_string()]);
    assert!(matches!(
        rows.next_row().await,
        Err(DriverError::UnsupportedColumnType(TypeCode::Array))
    ));

    let mut rows = conn.query(&ctx, "SELECT price", &[]).await?;
    assert!(matches!(
        rows.next_row().await,
        Err(DriverError::UnsupportedColumnType(TypeCode::Numeric))
    ));
    Ok(())
}

#[tokio::test]
async fn first_fetch_error_surfaces_from_query() -> Result<(), DriverError> {
    let engine = FakeEngine::new();
    let conn = connect(&engine).await?;
    let ctx = Context::background();

    let err = conn.query(&ctx, "SELECT * FROM nowhere", &[]).await.unwrap_err();
    assert!(matches!(&err, DriverError::Engine(e) if e.code() == Code::NotFound));

    engine.fail_query("SELECT broken", EngineError::new(Code::Internal, "boom"));
    let err = conn.query(&ctx, "SELECT broken", &[]).await.unwrap_err();
    assert_eq!(err.to_string(), "spanner: code = \"Internal\", desc = \"boom\"");
    assert!(conn.is_valid());
    Ok(())
}

#[tokio::test]
async fn close_stops_the_cursor_and_ends_iteration() -> Result<(), DriverError> {
    let engine = FakeEngine::new();
    engine.create_table("t", &[("id", TypeCode::String)]);
    engine.insert_row("t", vec![Value::from("a")]);
    engine.insert_row("t", vec![Value::from("b")]);
    let conn = connect(&engine).await?;

    let mut rows = conn.query(&Context::background(), "SELECT id FROM t", &[]).await?;
    rows.close();
    rows.close();
    assert_eq!(engine.streams_stopped(), 1);
    assert_eq!(rows.next_row().await?, None);
    Ok(())
}

#[tokio::test]
async fn short_destination_is_rejected() -> Result<(), DriverError> {
    let engine = FakeEngine::new();
    engine.create_table("t", &[("id", TypeCode::String), ("n", TypeCode::Int64)]);
    engine.insert_row("t", vec![Value::from("a"), Value::Int(1)]);
    let conn = connect(&engine).await?;

    let mut rows = conn.query(&Context::background(), "SELECT * FROM t", &[]).await?;
    let mut dest = vec![Value::Null; 1];
    assert!(matches!(rows.next(&mut dest).await, Err(DriverError::Parameter(_))));
    Ok(())
}
