#![cfg(feature = "test-utils")]

use metastore::error::{ErrorKind, MetadataError};
use metastore::test_utils::memory::{FaultConfig, FaultType, JournalEntry, MemoryProvider};
use metastore::{ConnectionLifecycleManager, LifecycleState, reset_metadata_database};
use metastore_config::shared::{ConnectionConfig, ConnectionType, MetadataSourceFlags};
use metastore_telemetry::tracing::init_test_tracing;

fn tcp_config(database: &str) -> ConnectionConfig {
    ConnectionConfig::tcp(database, "root", "127.0.0.1", 3306).with_password("")
}

fn socket_config(database: &str) -> ConnectionConfig {
    ConnectionConfig::socket(database, "root", "/var/run/mysqld/mysqld.sock")
}

fn flags(host_name: &str, socket: &str) -> MetadataSourceFlags {
    MetadataSourceFlags {
        db_name: "md_test".to_string(),
        user_name: "root".to_string(),
        password: None,
        host_name: host_name.to_string(),
        port: 3306,
        socket: socket.to_string(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn initialize_and_close_over_tcp() {
    init_test_tracing();

    let provider = MemoryProvider::new();
    let mut manager = ConnectionLifecycleManager::new(provider.clone());

    let source = manager.initialize(tcp_config("md_test")).await.unwrap();
    assert!(source.is_connected());
    assert_eq!(manager.state(), LifecycleState::Connected);
    assert!(manager.is_connected());
    assert_eq!(manager.config().unwrap().database, "md_test");
    assert_eq!(provider.open_sessions(), 1);

    manager.close().await.unwrap();

    assert_eq!(manager.state(), LifecycleState::Closed);
    assert!(!manager.is_connected());
    assert!(manager.source().is_none());
    assert_eq!(provider.open_sessions(), 0);
    assert_eq!(
        provider.journal(),
        vec![JournalEntry::Connect, JournalEntry::Close]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn initialize_and_close_over_socket() {
    init_test_tracing();

    let provider = MemoryProvider::new();
    let mut manager = ConnectionLifecycleManager::new(provider.clone());

    manager.initialize(socket_config("md_test")).await.unwrap();
    assert_eq!(manager.state(), LifecycleState::Connected);

    manager.close().await.unwrap();
    assert_eq!(manager.state(), LifecycleState::Closed);
    assert_eq!(provider.open_sessions(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn flags_select_the_connection_mode() {
    init_test_tracing();

    let tcp = ConnectionConfig::try_from(flags("127.0.0.1", "")).unwrap();
    let socket = ConnectionConfig::try_from(flags("", "/tmp/mysql.sock")).unwrap();

    let provider = MemoryProvider::new();
    for config in [tcp, socket] {
        let mut manager = ConnectionLifecycleManager::new(provider.clone());
        manager.initialize(config).await.unwrap();
        manager.close().await.unwrap();
    }

    assert_eq!(provider.open_sessions(), 0);
    assert_eq!(
        flags("", "/tmp/mysql.sock").connection_type().unwrap(),
        ConnectionType::Socket
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn flags_without_host_or_socket_are_a_configuration_error() {
    init_test_tracing();

    let err: MetadataError = ConnectionConfig::try_from(flags("", ""))
        .unwrap_err()
        .into();

    assert_eq!(err.kind(), ErrorKind::ConfigurationError);
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_config_fails_before_connecting() {
    init_test_tracing();

    let provider = MemoryProvider::new();
    let mut manager = ConnectionLifecycleManager::new(provider.clone());

    let err = manager
        .initialize(ConnectionConfig::tcp("md_test", "root", "", 3306))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);

    let err = manager
        .initialize(tcp_config("md-test; DROP TABLE users"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigurationError);

    assert_eq!(manager.state(), LifecycleState::Uninitialized);
    assert!(manager.source().is_none());
    assert!(provider.journal().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_database_drops_inside_one_transaction() {
    init_test_tracing();

    let provider = MemoryProvider::with_databases(["test_db", "other_db"]);
    let mut manager = ConnectionLifecycleManager::new(provider.clone());

    manager.initialize(tcp_config("test_db")).await.unwrap();
    manager.reset_database("test_db").await.unwrap();
    assert_eq!(manager.state(), LifecycleState::Connected);
    manager.close().await.unwrap();

    assert_eq!(
        provider.journal(),
        vec![
            JournalEntry::Connect,
            JournalEntry::Begin,
            JournalEntry::Execute("DROP DATABASE IF EXISTS test_db".to_string()),
            JournalEntry::Commit,
            JournalEntry::Close,
        ]
    );
    assert!(!provider.database_exists("test_db"));
    assert!(provider.database_exists("other_db"));
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_database_is_idempotent() {
    init_test_tracing();

    let provider = MemoryProvider::new();
    let mut manager = ConnectionLifecycleManager::new(provider.clone());

    manager.initialize(tcp_config("md_test")).await.unwrap();
    manager.reset_database("md_test").await.unwrap();
    manager.reset_database("md_test").await.unwrap();
    manager.close().await.unwrap();

    assert_eq!(
        provider.executed_statements(),
        vec![
            "DROP DATABASE IF EXISTS md_test".to_string(),
            "DROP DATABASE IF EXISTS md_test".to_string(),
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_database_rejects_unsafe_names() {
    init_test_tracing();

    let provider = MemoryProvider::new();
    let mut manager = ConnectionLifecycleManager::new(provider.clone());
    manager.initialize(tcp_config("md_test")).await.unwrap();

    let names = [
        "",
        "md test",
        "md_test; DROP DATABASE mysql",
        "`md_test`",
        "12345",
        "select",
        "1e5",
    ];
    for name in names {
        let err = manager.reset_database(name).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigurationError, "name: {name:?}");
    }

    assert_eq!(manager.state(), LifecycleState::Connected);
    assert!(provider.executed_statements().is_empty());

    manager.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_database_requires_a_connection() {
    init_test_tracing();

    let mut manager = ConnectionLifecycleManager::new(MemoryProvider::new());

    let err = manager.reset_database("md_test").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_is_idempotent() {
    init_test_tracing();

    let provider = MemoryProvider::new();
    let mut manager = ConnectionLifecycleManager::new(provider.clone());
    manager.initialize(tcp_config("md_test")).await.unwrap();

    manager.cleanup();
    manager.cleanup();

    assert_eq!(manager.state(), LifecycleState::Uninitialized);
    assert!(manager.source().is_none());
    assert!(manager.config().is_none());
    assert_eq!(provider.open_sessions(), 0);
    assert_eq!(
        provider.journal(),
        vec![JournalEntry::Connect, JournalEntry::Release]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_allows_initializing_again() {
    init_test_tracing();

    let provider = MemoryProvider::new();
    let mut manager = ConnectionLifecycleManager::new(provider.clone());

    manager.initialize(tcp_config("md_test")).await.unwrap();
    manager.cleanup();
    manager.initialize(tcp_config("md_test")).await.unwrap();

    assert_eq!(manager.state(), LifecycleState::Connected);
    assert_eq!(provider.open_sessions(), 1);

    manager.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn cleanup_after_close_keeps_the_manager_closed() {
    init_test_tracing();

    let mut manager = ConnectionLifecycleManager::new(MemoryProvider::new());
    manager.initialize(tcp_config("md_test")).await.unwrap();
    manager.close().await.unwrap();

    manager.cleanup();

    assert_eq!(manager.state(), LifecycleState::Closed);
    let err = manager.initialize(tcp_config("md_test")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test(flavor = "multi_thread")]
async fn close_before_initialize_is_invalid() {
    init_test_tracing();

    let mut manager = ConnectionLifecycleManager::new(MemoryProvider::new());

    let err = manager.close().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(manager.state(), LifecycleState::Uninitialized);
}

#[tokio::test(flavor = "multi_thread")]
async fn close_twice_is_invalid() {
    init_test_tracing();

    let mut manager = ConnectionLifecycleManager::new(MemoryProvider::new());
    manager.initialize(tcp_config("md_test")).await.unwrap();
    manager.close().await.unwrap();

    let err = manager.close().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[tokio::test(flavor = "multi_thread")]
async fn initialize_twice_is_invalid() {
    init_test_tracing();

    let provider = MemoryProvider::new();
    let mut manager = ConnectionLifecycleManager::new(provider.clone());
    manager.initialize(tcp_config("md_test")).await.unwrap();

    let err = manager.initialize(tcp_config("md_test")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(manager.state(), LifecycleState::Connected);
    assert_eq!(provider.open_sessions(), 1);

    manager.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn close_with_open_transaction_is_invalid() {
    init_test_tracing();

    let provider = MemoryProvider::new();
    let mut manager = ConnectionLifecycleManager::new(provider.clone());
    manager.initialize(tcp_config("md_test")).await.unwrap();
    manager.begin().await.unwrap();

    let err = manager.close().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
    assert_eq!(manager.state(), LifecycleState::TransactionOpen);

    manager.rollback().await.unwrap();
    manager.close().await.unwrap();
    assert_eq!(provider.open_sessions(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn explicit_transactions_follow_the_state_machine() {
    init_test_tracing();

    let provider = MemoryProvider::new();
    let mut manager = ConnectionLifecycleManager::new(provider.clone());
    manager.initialize(tcp_config("md_test")).await.unwrap();

    let err = manager.execute_query("SHOW DATABASES").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    manager.begin().await.unwrap();
    let err = manager.begin().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    manager
        .execute_query("CREATE DATABASE md_test")
        .await
        .unwrap();
    let databases = manager.execute_query("SHOW DATABASES").await.unwrap();
    assert_eq!(databases.value(0, "Database"), Some("md_test"));
    assert!(!provider.database_exists("md_test"));

    manager.commit().await.unwrap();
    assert_eq!(manager.state(), LifecycleState::Connected);
    assert!(provider.database_exists("md_test"));

    manager.begin().await.unwrap();
    manager
        .execute_query("DROP DATABASE md_test")
        .await
        .unwrap();
    manager.rollback().await.unwrap();
    assert!(provider.database_exists("md_test"));

    manager.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_connect_releases_the_session() {
    init_test_tracing();

    let provider = MemoryProvider::new();
    provider.set_faults(FaultConfig {
        connect: Some(FaultType::Error),
        ..Default::default()
    });
    let mut manager = ConnectionLifecycleManager::new(provider.clone());

    let err = manager.initialize(tcp_config("md_test")).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert_eq!(manager.state(), LifecycleState::Uninitialized);
    assert!(manager.source().is_none());
    assert_eq!(provider.open_sessions(), 0);

    provider.set_faults(FaultConfig::default());
    manager.initialize(tcp_config("md_test")).await.unwrap();
    manager.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_begin_leaves_the_session_connected() {
    init_test_tracing();

    let provider = MemoryProvider::with_databases(["md_test"]);
    provider.set_faults(FaultConfig {
        begin: Some(FaultType::Error),
        ..Default::default()
    });
    let mut manager = ConnectionLifecycleManager::new(provider.clone());
    manager.initialize(tcp_config("md_test")).await.unwrap();

    let err = manager.reset_database("md_test").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransactionError);
    assert_eq!(manager.state(), LifecycleState::Connected);
    assert!(provider.database_exists("md_test"));

    manager.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_statement_leaves_the_transaction_open() {
    init_test_tracing();

    let provider = MemoryProvider::with_databases(["md_test"]);
    provider.set_faults(FaultConfig {
        execute_query: Some(FaultType::Error),
        ..Default::default()
    });
    let mut manager = ConnectionLifecycleManager::new(provider.clone());
    manager.initialize(tcp_config("md_test")).await.unwrap();

    let err = manager.reset_database("md_test").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransactionError);
    assert_eq!(manager.state(), LifecycleState::TransactionOpen);

    manager.rollback().await.unwrap();
    manager.close().await.unwrap();

    assert!(provider.database_exists("md_test"));
    assert_eq!(
        provider.journal(),
        vec![
            JournalEntry::Connect,
            JournalEntry::Begin,
            JournalEntry::Rollback,
            JournalEntry::Close,
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_commit_leaves_the_transaction_open() {
    init_test_tracing();

    let provider = MemoryProvider::with_databases(["md_test"]);
    provider.set_faults(FaultConfig {
        commit: Some(FaultType::Error),
        ..Default::default()
    });
    let mut manager = ConnectionLifecycleManager::new(provider.clone());
    manager.initialize(tcp_config("md_test")).await.unwrap();

    let err = manager.reset_database("md_test").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::TransactionError);
    assert_eq!(manager.state(), LifecycleState::TransactionOpen);
    assert!(provider.database_exists("md_test"));

    manager.cleanup();
    assert_eq!(manager.state(), LifecycleState::Uninitialized);
    assert_eq!(provider.open_sessions(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_close_still_releases_the_session() {
    init_test_tracing();

    let provider = MemoryProvider::new();
    provider.set_faults(FaultConfig {
        close: Some(FaultType::Error),
        ..Default::default()
    });
    let mut manager = ConnectionLifecycleManager::new(provider.clone());
    manager.initialize(tcp_config("md_test")).await.unwrap();

    let err = manager.close().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert_eq!(manager.state(), LifecycleState::Closed);
    assert_eq!(provider.open_sessions(), 0);
    assert_eq!(
        provider.journal(),
        vec![JournalEntry::Connect, JournalEntry::Release]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn dropping_the_manager_releases_the_session() {
    init_test_tracing();

    let provider = MemoryProvider::new();
    {
        let mut manager = ConnectionLifecycleManager::new(provider.clone());
        manager.initialize(tcp_config("md_test")).await.unwrap();
        manager.begin().await.unwrap();
        assert_eq!(provider.open_sessions(), 1);
    }

    assert_eq!(provider.open_sessions(), 0);
    assert_eq!(
        provider.journal(),
        vec![
            JournalEntry::Connect,
            JournalEntry::Begin,
            JournalEntry::Release,
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn panicking_driver_releases_the_session() {
    init_test_tracing();

    let provider = MemoryProvider::with_databases(["md_test"]);
    provider.set_faults(FaultConfig {
        execute_query: Some(FaultType::Panic),
        ..Default::default()
    });

    let task_provider = provider.clone();
    let result = tokio::spawn(async move {
        let mut manager = ConnectionLifecycleManager::new(task_provider);
        manager.initialize(tcp_config("md_test")).await.unwrap();
        manager.reset_database("md_test").await
    })
    .await;

    assert!(result.unwrap_err().is_panic());
    assert_eq!(provider.open_sessions(), 0);
    assert!(provider.database_exists("md_test"));
    assert_eq!(provider.journal().last(), Some(&JournalEntry::Release));
}

#[tokio::test(flavor = "multi_thread")]
async fn sessions_do_not_leak_across_many_failures() {
    init_test_tracing();

    let provider = MemoryProvider::with_databases(["md_test"]);
    let faults = [
        FaultConfig {
            connect: Some(FaultType::Error),
            ..Default::default()
        },
        FaultConfig {
            begin: Some(FaultType::Error),
            ..Default::default()
        },
        FaultConfig {
            execute_query: Some(FaultType::Error),
            ..Default::default()
        },
        FaultConfig {
            commit: Some(FaultType::Error),
            ..Default::default()
        },
        FaultConfig {
            close: Some(FaultType::Error),
            ..Default::default()
        },
    ];

    for fault in faults {
        provider.set_faults(fault);
        let result = reset_metadata_database(provider.clone(), tcp_config("md_test")).await;
        assert!(result.is_err());
        assert_eq!(provider.open_sessions(), 0);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_metadata_database_end_to_end() {
    init_test_tracing();

    let provider = MemoryProvider::with_databases(["md_test"]);
    let config = ConnectionConfig::try_from(flags("127.0.0.1", "")).unwrap();

    reset_metadata_database(provider.clone(), config)
        .await
        .unwrap();

    assert!(!provider.database_exists("md_test"));
    assert_eq!(provider.open_sessions(), 0);
    assert_eq!(
        provider.executed_statements(),
        vec!["DROP DATABASE IF EXISTS md_test".to_string()]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_metadata_database_aggregates_rollback_failures() {
    init_test_tracing();

    let provider = MemoryProvider::with_databases(["md_test"]);
    provider.set_faults(FaultConfig {
        commit: Some(FaultType::Error),
        rollback: Some(FaultType::Error),
        ..Default::default()
    });

    let err = reset_metadata_database(provider.clone(), tcp_config("md_test"))
        .await
        .unwrap_err();

    assert_eq!(
        err.kinds(),
        vec![ErrorKind::TransactionError, ErrorKind::TransactionError]
    );
    assert!(provider.database_exists("md_test"));
    assert_eq!(provider.open_sessions(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn reset_metadata_database_rolls_back_failed_statements() {
    init_test_tracing();

    let provider = MemoryProvider::with_databases(["md_test"]);
    provider.set_faults(FaultConfig {
        execute_query: Some(FaultType::Error),
        ..Default::default()
    });

    let err = reset_metadata_database(provider.clone(), tcp_config("md_test"))
        .await
        .unwrap_err();

    assert_eq!(err.kinds(), vec![ErrorKind::TransactionError]);
    assert_eq!(
        provider.journal(),
        vec![
            JournalEntry::Connect,
            JournalEntry::Begin,
            JournalEntry::Rollback,
            JournalEntry::Release,
        ]
    );
}
