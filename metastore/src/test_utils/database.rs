use metastore_config::shared::{ConnectionConfig, DEFAULT_MYSQL_PORT};
use sqlx::{Connection, Executor, MySqlConnection};
use uuid::Uuid;

/// Prefix of every database created by tests.
pub const TEST_DATABASE_PREFIX: &str = "md_test";

/// Returns a database name that is unique to the calling test.
///
/// The name is a valid unquoted MySQL identifier, so it can be passed to
/// [`reset_database`](crate::lifecycle::ConnectionLifecycleManager::reset_database).
pub fn test_database_name() -> String {
    format!("{TEST_DATABASE_PREFIX}_{}", Uuid::new_v4().simple())
}

/// Generates MySQL connection configuration for an isolated test database.
///
/// Configuration is read from environment variables:
/// - `MYSQL_TESTS_SOCKET`: Unix-domain socket path (optional, preferred over TCP when set)
/// - `MYSQL_TESTS_HOST`: MySQL server hostname (required without a socket)
/// - `MYSQL_TESTS_PORT`: MySQL server port (optional, defaults to 3306)
/// - `MYSQL_TESTS_USERNAME`: MySQL user (required)
/// - `MYSQL_TESTS_PASSWORD`: MySQL password (optional)
///
/// # Panics
///
/// Panics if a required variable is missing or the port is not a number.
pub fn local_mysql_connection_config() -> ConnectionConfig {
    let database = test_database_name();
    let user = std::env::var("MYSQL_TESTS_USERNAME").expect("MYSQL_TESTS_USERNAME must be set");

    let config = match std::env::var("MYSQL_TESTS_SOCKET") {
        Ok(socket) if !socket.is_empty() => ConnectionConfig::socket(database, user, socket),
        _ => {
            let host = std::env::var("MYSQL_TESTS_HOST").expect("MYSQL_TESTS_HOST must be set");
            let port = std::env::var("MYSQL_TESTS_PORT")
                .map(|port| {
                    port.parse()
                        .expect("MYSQL_TESTS_PORT must be a valid port number")
                })
                .unwrap_or(DEFAULT_MYSQL_PORT);
            ConnectionConfig::tcp(database, user, host, port)
        }
    };

    match std::env::var("MYSQL_TESTS_PASSWORD") {
        Ok(password) => config.with_password(password),
        Err(_) => config,
    }
}

/// Creates the database named in `config` on the server.
///
/// # Panics
///
/// Panics if the connection or the statement fails.
pub async fn create_mysql_database(config: &ConnectionConfig) {
    let mut connection = MySqlConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to MySQL");

    connection
        .execute(&*format!("CREATE DATABASE `{}`", config.database))
        .await
        .expect("Failed to create database");

    connection
        .close()
        .await
        .expect("Failed to close MySQL connection");
}

/// Returns `true` if the database named in `config` exists on the server.
///
/// # Panics
///
/// Panics if the connection or the query fails.
pub async fn mysql_database_exists(config: &ConnectionConfig) -> bool {
    let mut connection = MySqlConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to MySQL");

    let count: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM information_schema.schemata WHERE schema_name = ?",
    )
    .bind(&config.database)
    .fetch_one(&mut connection)
    .await
    .expect("Failed to query information_schema");

    connection
        .close()
        .await
        .expect("Failed to close MySQL connection");

    count.0 > 0
}

/// Drops the database named in `config` if it exists.
///
/// Used for test cleanup when a test fails before resetting its database.
///
/// # Panics
///
/// Panics if the connection or the statement fails.
pub async fn drop_mysql_database(config: &ConnectionConfig) {
    let mut connection = MySqlConnection::connect_with(&config.without_db())
        .await
        .expect("Failed to connect to MySQL");

    connection
        .execute(&*format!("DROP DATABASE IF EXISTS `{}`", config.database))
        .await
        .expect("Failed to drop database");

    connection
        .close()
        .await
        .expect("Failed to close MySQL connection");
}
