pub mod invoices;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Thread-safe SQLite store for invoices
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode, so use query_row
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        // Migrations run before the connection goes behind the async Mutex
        Self::run_migrations(&conn)?;

        info!("Invoice store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS invoices (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                vendor TEXT,
                amount REAL,
                due_date TEXT,
                attachment_url TEXT,
                awaiting_due INTEGER NOT NULL DEFAULT 0,
                reminder_sent INTEGER NOT NULL DEFAULT 0,
                paid INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_invoices_user
                ON invoices(user_id, awaiting_due, created_at);

            CREATE INDEX IF NOT EXISTS idx_invoices_due
                ON invoices(reminder_sent, due_date);
            ",
        )
        .context("Failed to run migrations")?;

        // Databases created before invoices could be settled
        if !has_column(conn, "invoices", "paid")? {
            conn.execute_batch(
                "ALTER TABLE invoices ADD COLUMN paid INTEGER NOT NULL DEFAULT 0",
            )
            .context("Failed to add invoices.paid column")?;
            info!("Migrated invoices table: added paid column");
        }
        Ok(())
    }
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", table))
        .context("Failed to read table info")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names.iter().any(|name| name == column))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_adds_paid_to_old_table() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE invoices (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                vendor TEXT,
                amount REAL,
                due_date TEXT,
                attachment_url TEXT,
                awaiting_due INTEGER NOT NULL DEFAULT 0,
                reminder_sent INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            INSERT INTO invoices (id, user_id, created_at)
                VALUES ('old', 'u', '2026-01-01T00:00:00+00:00');",
        )
        .unwrap();

        Store::run_migrations(&conn).unwrap();
        assert!(has_column(&conn, "invoices", "paid").unwrap());
        let paid: bool = conn
            .query_row("SELECT paid FROM invoices WHERE id = 'old'", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(!paid);

        // Running again is a no-op
        Store::run_migrations(&conn).unwrap();
    }
}
