use std::sync::Arc;
use std::time::Duration;

use boba_adapters::MysqlBackend;
use boba_core::config::ConnectionConfig;
use boba_core::connection_manager::{ConnectionError, ConnectionManager};
use boba_core::query_executor::{QueryError, QueryExecutor, QueryOutcome};

const TIMEOUT: Duration = Duration::from_secs(10);

fn mysql_integration_enabled() -> bool {
    matches!(
        std::env::var("BOBA_RUN_MYSQL_INTEGRATION").ok().as_deref(),
        Some("1")
    )
}

fn integration_config(database: &str) -> ConnectionConfig {
    let host = std::env::var("BOBA_TEST_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let user = std::env::var("BOBA_TEST_DB_USER").unwrap_or_else(|_| "root".to_string());
    let port = std::env::var("BOBA_TEST_DB_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(3306);

    let mut config = ConnectionConfig::new(host, user, database);
    config.port = port;
    config.password = std::env::var("BOBA_TEST_DB_PASSWORD")
        .ok()
        .filter(|password| !password.is_empty());
    config
}

async fn run(
    executor: &QueryExecutor<MysqlBackend>,
    manager: &ConnectionManager<MysqlBackend>,
    sql: &str,
) -> QueryOutcome {
    let connection = manager.current().expect("connection should be open");
    executor
        .execute(connection, sql)
        .await
        .unwrap_or_else(|error| panic!("`{sql}` failed: {error}"))
}

#[tokio::test(flavor = "current_thread")]
async fn mysql_backend_connect_query_and_write_paths() {
    if !mysql_integration_enabled() {
        return;
    }

    let database = "boba_adapters_it";
    let backend = Arc::new(MysqlBackend);
    let executor = QueryExecutor::new(Arc::clone(&backend), TIMEOUT);

    let mut admin = ConnectionManager::new(Arc::clone(&backend), TIMEOUT);
    admin
        .connect(integration_config("mysql"))
        .await
        .expect("admin connect should succeed");
    run(
        &executor,
        &admin,
        &format!("CREATE DATABASE IF NOT EXISTS `{database}`"),
    )
    .await;
    admin.close().await;

    let mut manager = ConnectionManager::new(Arc::clone(&backend), TIMEOUT);
    manager
        .connect(integration_config(database))
        .await
        .expect("connect should succeed");
    assert!(manager.status().is_connected);

    run(&executor, &manager, "DROP TABLE IF EXISTS integration_users").await;
    run(
        &executor,
        &manager,
        "CREATE TABLE integration_users (\
         id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,\
         email VARCHAR(64) NOT NULL,\
         age INT NULL\
         )",
    )
    .await;

    let inserted = run(
        &executor,
        &manager,
        "INSERT INTO integration_users (email, age) VALUES \
         ('a@example.com', 22), ('b@example.com', NULL);",
    )
    .await;
    let QueryOutcome::Write(summary) = inserted else {
        panic!("insert should be a write");
    };
    assert_eq!(summary.rows_affected, 2);
    assert!(summary.last_insert_id.is_some());

    let selected = run(
        &executor,
        &manager,
        "SELECT id, email, age FROM integration_users ORDER BY id",
    )
    .await;
    let QueryOutcome::Read(result) = selected else {
        panic!("select should be a read");
    };
    assert_eq!(result.columns(), &["id", "email", "age"]);
    assert_eq!(result.rows()[0][1], "a@example.com");
    assert_eq!(result.rows()[1][2], "NULL");

    let empty = run(
        &executor,
        &manager,
        "SELECT id FROM integration_users WHERE 1 = 0",
    )
    .await;
    let QueryOutcome::Read(empty) = empty else {
        panic!("select should be a read");
    };
    assert_eq!(empty.columns(), &["id"]);
    assert!(empty.is_empty());

    let connection = manager.current().expect("connection should be open");
    let error = executor
        .execute(connection, "SELECT * FORM integration_users")
        .await
        .expect_err("malformed query should fail");
    assert!(matches!(error, QueryError::Syntax(_)), "{error:?}");

    run(&executor, &manager, "DROP TABLE IF EXISTS integration_users").await;
    manager.close().await;
    manager.close().await;
    assert!(!manager.status().is_connected);
}

#[tokio::test(flavor = "current_thread")]
async fn mysql_backend_rejects_bad_credentials() {
    if !mysql_integration_enabled() {
        return;
    }

    let mut config = integration_config("mysql");
    config.user = "boba_no_such_user".to_string();
    config.password = Some("wrong".to_string());

    let mut manager = ConnectionManager::new(Arc::new(MysqlBackend), TIMEOUT);
    let error = manager
        .connect(config)
        .await
        .expect_err("bad credentials should fail");
    assert!(matches!(error, ConnectionError::AuthFailed(_)), "{error:?}");
}
