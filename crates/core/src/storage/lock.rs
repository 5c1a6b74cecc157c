use anyhow::Context;
use sqlx::pool::PoolConnection;
use sqlx::Postgres;

// Session-scoped advisory lock keeping two ingestion runs from interleaving
// pages into the same table.
const INGEST_LOCK_KEY: i64 = 0x5354_4B52_4154; // "STKRAT"

/// Held ingest lock. Owns the session that took it, so the unlock runs on the
/// same connection. Dropping it without `release` closes that session, which
/// also frees the lock.
pub struct IngestLock {
    conn: Option<PoolConnection<Postgres>>,
}

pub async fn try_acquire_ingest_lock(pool: &sqlx::PgPool) -> anyhow::Result<Option<IngestLock>> {
    let mut conn = pool
        .acquire()
        .await
        .context("failed to get a connection for the ingest lock")?;
    let acquired: (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
        .persistent(false)
        .bind(INGEST_LOCK_KEY)
        .fetch_one(&mut *conn)
        .await
        .with_context(|| format!("failed to acquire ingest lock (key={INGEST_LOCK_KEY})"))?;
    Ok(acquired.0.then(|| IngestLock { conn: Some(conn) }))
}

impl IngestLock {
    pub async fn release(mut self) -> anyhow::Result<()> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let (released,): (bool,) = sqlx::query_as("SELECT pg_advisory_unlock($1)")
            .persistent(false)
            .bind(INGEST_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await
            .with_context(|| format!("failed to release ingest lock (key={INGEST_LOCK_KEY})"))?;
        if !released {
            tracing::warn!(key = INGEST_LOCK_KEY, "ingest lock was not held by this session");
        }
        Ok(())
    }
}

impl Drop for IngestLock {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            // Returning it to the pool would leak the lock into another caller.
            drop(conn.detach());
        }
    }
}
