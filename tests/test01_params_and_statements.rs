use spanner_sql_driver::prelude::*;
use spanner_sql_driver::test_utils::FakeEngine;

fn engine_with_table() -> FakeEngine {
    let engine = FakeEngine::new();
    engine.create_table("t", &[("id", TypeCode::String), ("v", TypeCode::Bool)]);
    engine
}

#[tokio::test]
async fn positional_arguments_bind_in_first_appearance_order() -> Result<(), DriverError> {
    let engine = engine_with_table();
    let conn = engine.connector().connect(&Context::background()).await?;
    let ctx = Context::background();

    let res = conn
        .exec(
            &ctx,
            "INSERT INTO t (id, v) VALUES (@id, @v)",
            &positional_args(["k1".into(), true.into()]),
        )
        .await?;
    assert_eq!(res.rows_affected(), 1);
    assert_eq!(engine.rows("t"), vec![vec![Value::from("k1"), Value::Bool(true)]]);
    Ok(())
}

#[tokio::test]
async fn argument_count_must_match_placeholders() -> Result<(), DriverError> {
    let engine = engine_with_table();
    let conn = engine.connector().connect(&Context::background()).await?;
    let ctx = Context::background();

    let err = conn
        .exec(&ctx, "INSERT INTO t (id, v) VALUES (@id, @v)", &positional_args(["k1".into()]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DriverError::PlaceholderMismatch {
            placeholders: 2,
            arguments: 1
        }
    ));
    // Binding fails locally.
    assert_eq!(engine.calls(), 0);
    assert!(conn.is_valid());
    Ok(())
}

#[tokio::test]
async fn unknown_names_fall_back_to_position() -> Result<(), DriverError> {
    let engine = engine_with_table();
    let conn = engine.connector().connect(&Context::background()).await?;
    let ctx = Context::background();

    let args = vec![NamedValue::named("first", "k2"), NamedValue::named("second", false)];
    conn.exec(&ctx, "INSERT INTO t (id, v) VALUES (@id, @v)", &args).await?;

    let named = vec![NamedValue::named("id", "k2"), NamedValue::named("v", true)];
    conn.exec(&ctx, "UPDATE t SET v = @v WHERE id = @id", &named).await?;
    assert_eq!(engine.rows("t"), vec![vec![Value::from("k2"), Value::Bool(true)]]);
    Ok(())
}

#[tokio::test]
async fn prepared_statement_counts_distinct_placeholders() -> Result<(), DriverError> {
    let engine = engine_with_table();
    let conn = engine.connector().connect(&Context::background()).await?;
    let ctx = Context::background();

    let stmt = conn.prepare("SELECT id FROM t WHERE id = @id OR @id = @other")?;
    assert_eq!(stmt.num_input(), 2);
    let insert = conn.prepare_context(&ctx, "INSERT INTO t (id, v) VALUES (@id, @v)")?;
    assert_eq!(insert.num_input(), 2);
    assert_eq!(conn.prepare("SELECT 1")?.num_input(), 0);
    assert_eq!(engine.calls(), 0);

    insert.exec(&ctx, &positional_args(["a".into(), false.into()])).await?;
    let select = conn.prepare("SELECT v FROM t WHERE id = @id")?;
    let mut rows = select.query(&ctx, &positional_args(["a".into()])).await?;
    assert_eq!(rows.next_row().await?, Some(vec![Value::Bool(false)]));
    assert_eq!(rows.next_row().await?, None);
    Ok(())
}

#[tokio::test]
async fn prepare_context_honours_a_fired_context() -> Result<(), DriverError> {
    let engine = engine_with_table();
    let conn = engine.connector().connect(&Context::background()).await?;
    let ctx = Context::cancellable();
    ctx.cancel();
    assert!(matches!(
        conn.prepare_context(&ctx, "SELECT 1"),
        Err(DriverError::Canceled)
    ));
    assert!(!conn.is_valid());
    assert!(matches!(conn.canceled(), Some(DriverError::Canceled)));
    assert!(matches!(conn.prepare("SELECT 1"), Err(DriverError::InvalidConnection)));
    Ok(())
}

#[tokio::test]
async fn statement_close_detaches_once() -> Result<(), DriverError> {
    let engine = engine_with_table();
    let conn = engine.connector().connect(&Context::background()).await?;
    let ctx = Context::background();

    let stmt = conn.prepare("SELECT 1")?;
    stmt.close()?;
    assert!(matches!(stmt.close(), Err(DriverError::InvalidConnection)));
    assert!(matches!(
        stmt.query(&ctx, &[]).await,
        Err(DriverError::InvalidConnection)
    ));

    let other = conn.prepare("SELECT 1")?;
    conn.close();
    assert!(matches!(other.close(), Err(DriverError::InvalidConnection)));
    assert!(matches!(
        conn.prepare("SELECT 1"),
        Err(DriverError::InvalidConnection)
    ));
    Ok(())
}

#[tokio::test]
async fn exec_result_has_no_last_insert_id() -> Result<(), DriverError> {
    let engine = engine_with_table();
    let conn = engine.connector().connect(&Context::background()).await?;
    let res = conn
        .exec(
            &Context::background(),
            "INSERT INTO t (id, v) VALUES (@id, @v)",
            &positional_args(["x".into(), true.into()]),
        )
        .await?;
    assert!(matches!(res.last_insert_id(), Err(DriverError::Unsupported(_))));
    Ok(())
}

#[tokio::test]
async fn begin_without_options_is_not_implemented() -> Result<(), DriverError> {
    let engine = engine_with_table();
    let conn = engine.connector().connect(&Context::background()).await?;
    assert!(matches!(conn.begin(), Err(DriverError::Unimplemented(_))));
    Ok(())
}
