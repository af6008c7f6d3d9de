//! Database migrations using a versioned migration pattern.
//!
//! Each migration runs exactly once and is tracked in the `schema_migrations` table.
//! Migrations are applied in order by version number.

use rusqlite::{params, Connection};

/// A database migration with a version number, name, and SQL to execute.
pub struct Migration {
    /// Unique version number (migrations run in order)
    pub version: i64,
    /// Human-readable name for the migration
    pub name: &'static str,
    /// SQL to execute (can be multiple statements)
    pub sql: &'static str,
}

/// All migrations in order. New migrations should be added at the end.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_statuses_table",
        sql: r#"
            CREATE TABLE IF NOT EXISTS statuses (
                repo_uuid TEXT NOT NULL,
                path TEXT NOT NULL,
                parent TEXT,
                present TEXT,
                enough_copies TEXT,
                number_of_copies INTEGER,
                is_tracked INTEGER NOT NULL DEFAULT 0,
                content_key TEXT,
                is_dir INTEGER NOT NULL DEFAULT 0,
                needs_update INTEGER NOT NULL DEFAULT 0,
                last_modified TEXT NOT NULL,
                PRIMARY KEY (repo_uuid, path)
            );
            CREATE INDEX IF NOT EXISTS idx_statuses_parent ON statuses(repo_uuid, parent);
            CREATE INDEX IF NOT EXISTS idx_statuses_key ON statuses(repo_uuid, content_key);
        "#,
    },
    Migration {
        version: 2,
        name: "create_watched_repositories_table",
        sql: r#"
            CREATE TABLE IF NOT EXISTS watched_repositories (
                uuid TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 3,
        name: "create_command_requests_table",
        sql: r#"
            CREATE TABLE IF NOT EXISTS command_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                repo_uuid TEXT NOT NULL,
                path TEXT NOT NULL,
                command_type TEXT NOT NULL,
                command TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_command_requests_repo ON command_requests(repo_uuid);
        "#,
    },
    Migration {
        version: 4,
        name: "create_visible_folders_table",
        sql: r#"
            CREATE TABLE IF NOT EXISTS visible_folders (
                repo_uuid TEXT NOT NULL,
                path TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (repo_uuid, path)
            );
        "#,
    },
    Migration {
        version: 5,
        name: "create_status_requests_table",
        sql: r#"
            CREATE TABLE IF NOT EXISTS status_requests (
                repo_uuid TEXT NOT NULL,
                path TEXT NOT NULL,
                requested_at TEXT NOT NULL,
                PRIMARY KEY (repo_uuid, path)
            );
        "#,
    },
];

/// Create the schema_migrations table if it doesn't exist.
fn ensure_migrations_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Get the set of already-applied migration versions.
fn get_applied_versions(conn: &Connection) -> rusqlite::Result<std::collections::HashSet<i64>> {
    let mut stmt = conn.prepare("SELECT version FROM schema_migrations")?;
    let versions = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<std::collections::HashSet<i64>>>()?;
    Ok(versions)
}

/// Run all pending migrations.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    ensure_migrations_table(conn)?;
    let applied = get_applied_versions(conn)?;

    for migration in MIGRATIONS {
        if applied.contains(&migration.version) {
            continue;
        }

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );

        let now = chrono::Utc::now().to_rfc3339();
        let tx = conn.transaction()?;
        let result = tx.execute_batch(migration.sql).and_then(|_| {
            tx.execute(
                "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                params![migration.version, migration.name, now],
            )
        });
        if let Err(e) = result.and_then(|_| tx.commit()) {
            tracing::error!(
                version = migration.version,
                name = migration.name,
                error = %e,
                "Migration failed"
            );
            return Err(e);
        }
    }

    Ok(())
}
