//! Database initialization
//!
//! Creates the database on first run and brings the schema up idempotently
//! (`CREATE TABLE IF NOT EXISTS`), so it is safe to call on every startup.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Busy timeout applied to every pooled connection
const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // WAL allows concurrent readers with one writer: camera pipelines read while the
    // dispatcher and notifier write.
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// In-memory database with the full schema (tests, dry runs)
///
/// Limited to a single connection: every connection to `:memory:` is its own database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every table used by the re-identification service
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_outbox_table(pool).await?;
    create_sightings_table(pool).await?;
    create_reid_events_table(pool).await?;
    create_face_profiles_table(pool).await?;
    create_topology_tables(pool).await?;
    Ok(())
}

/// Transactional outbox
///
/// `status = 'failed'` always carries at least one attempt; the CHECK keeps it so.
pub async fn create_outbox_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS outbox_messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            aggregate_type TEXT NOT NULL,
            aggregate_id TEXT NOT NULL,
            topic TEXT NOT NULL,
            event TEXT NOT NULL,
            scope TEXT NOT NULL,
            scope_key TEXT,
            idempotency_key TEXT UNIQUE,
            payload TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'processed', 'failed', 'dead')),
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            processed_at TEXT,
            updated_at TEXT,
            CHECK (status <> 'failed' OR attempts >= 1)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_outbox_status_occurred ON outbox_messages (status, occurred_at, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Sighting log (domain fact behind `camera/tracking` events)
pub async fn create_sightings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sightings (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            person_id TEXT NOT NULL,
            profile_id INTEGER NOT NULL,
            camera_id TEXT,
            zone_id TEXT,
            similarity REAL NOT NULL,
            seen_at TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sightings_person ON sightings (person_id, seen_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Re-identification log (domain fact behind `camera/cross_camera_reid` events)
pub async fn create_reid_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reid_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            person_id TEXT NOT NULL,
            profile_id INTEGER NOT NULL,
            from_camera TEXT NOT NULL,
            to_camera TEXT NOT NULL,
            zone_id TEXT,
            travel_seconds REAL NOT NULL,
            similarity REAL NOT NULL,
            detected_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Enrolled face embeddings (little-endian f32 blobs)
pub async fn create_face_profiles_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS face_profiles (
            profile_id INTEGER PRIMARY KEY AUTOINCREMENT,
            identity_id TEXT NOT NULL,
            embedding BLOB NOT NULL,
            dimensions INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_face_profiles_identity ON face_profiles (identity_id)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Camera topology: zone membership, directed edges, and topology-wide settings
pub async fn create_topology_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS camera_zones (
            camera_id TEXT PRIMARY KEY,
            zone_id TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS camera_edges (
            from_camera TEXT NOT NULL,
            to_camera TEXT NOT NULL,
            travel_seconds REAL,
            PRIMARY KEY (from_camera, to_camera)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS topology_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
