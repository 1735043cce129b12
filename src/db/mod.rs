//! SQLite connection pooling for the redemption queue
//!
//! The claim protocol relies on atomic conditional updates; on SQLite that
//! means immediate transactions plus a busy timeout so concurrent writers
//! queue up instead of failing.

use anyhow::{Context, Result};
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sql_query;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

pub type DbPool = r2d2::Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Applies the pragmas every pooled connection needs
#[derive(Debug, Clone, Copy)]
struct PragmaConnectionCustomizer;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for PragmaConnectionCustomizer {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        // Wait up to 5 seconds for the write lock instead of failing
        // immediately; claim contention is expected.
        sql_query("PRAGMA busy_timeout = 5000;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        sql_query("PRAGMA foreign_keys = ON;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        // WAL lets claim polls read while a writer holds the lock.
        sql_query("PRAGMA journal_mode = WAL;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        sql_query("PRAGMA synchronous = NORMAL;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;

        Ok(())
    }
}

/// Resolve the database location from `DATABASE_URL`
pub fn database_url() -> String {
    dotenvy::dotenv().ok();
    std::env::var("DATABASE_URL").unwrap_or_else(|_| "redemption.db".to_string())
}

/// Create a database connection pool
///
/// # Arguments
/// * `database_url` - Path to the SQLite database file
pub fn create_pool(database_url: &str) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);

    let pool = r2d2::Pool::builder()
        .max_size(10)
        .connection_timeout(std::time::Duration::from_secs(30))
        .connection_customizer(Box::new(PragmaConnectionCustomizer))
        .build(manager)
        .context("Failed to create database connection pool")?;

    Ok(pool)
}

/// Run all pending embedded migrations on a connection
pub fn run_migrations(conn: &mut SqliteConnection) -> Result<()> {
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    Ok(())
}

/// Create a pool against `database_url` with the schema applied.
///
/// Convenience for worker startup and tests: pool creation plus migrations
/// in one step.
pub fn create_pool_with_migrations(database_url: &str) -> Result<DbPool> {
    let pool = create_pool(database_url)?;
    let mut conn = pool.get().context("Failed to get DB connection")?;
    run_migrations(&mut conn)?;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_apply_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let url = dir.path().join("queue.db");
        let pool = create_pool_with_migrations(url.to_str().unwrap()).unwrap();

        // Both tables exist and are queryable.
        let mut conn = pool.get().unwrap();
        use crate::schema::{invitations, redeem_invitation_requests};
        let invitations: i64 = invitations::table.count().get_result(&mut conn).unwrap();
        let requests: i64 = redeem_invitation_requests::table
            .count()
            .get_result(&mut conn)
            .unwrap();
        assert_eq!((invitations, requests), (0, 0));
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = SqliteConnection::establish(":memory:").unwrap();
        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();
    }
}
