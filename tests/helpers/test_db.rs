use message_inconsistencies::infrastructure::persistence::Database;
use uuid::Uuid;

pub async fn setup_test_db() -> Database {
    // Install drivers for AnyPool (required for tests)
    sqlx::any::install_default_drivers();

    // File-based SQLite, unique per test for parallel execution
    let temp_file = std::env::temp_dir().join(format!("test_{}.db", Uuid::new_v4()));
    let db_url = format!("sqlite://{}?mode=rwc", temp_file.display());

    let db = Database::connect(&db_url)
        .await
        .expect("Failed to connect to test database");

    db.run_migrations()
        .await
        .expect("Failed to run migrations on test database");

    db
}

pub async fn teardown_test_db(db: Database) {
    db.pool().close().await;
}
