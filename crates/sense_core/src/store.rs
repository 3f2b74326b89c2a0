/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - SENSE Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! SQLite store: schema, pooled connections and the per-operation context.
//!
//! Every operation borrows one connection from the pool for the length of a
//! single closure (usually one transaction) and runs it on the blocking
//! thread pool. The connection goes back to the pool when the closure returns,
//! whether or not the caller is still waiting for it.

use crate::error::{EngineError, EngineResult};
use deadpool::unmanaged::Pool;
use rand::{rngs::OsRng, RngCore};
use rusqlite::{
    params, types::Type, Connection, InterruptHandle, OptionalExtension, Row, Transaction,
    TransactionBehavior,
};
use sense_protocol::{Publication, PublicationType, Visibility};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Deadline and cancellation signal for one request.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl OpContext {
    /// No deadline, never cancelled unless the token is triggered.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn check(&self) -> EngineResult<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if self.deadline.is_some_and(|d| d <= Instant::now()) {
            return Err(EngineError::Timeout);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub pool_size: usize,
    pub busy_timeout_ms: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            pool_size: 8,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    pool: Pool<Connection>,
}

impl Store {
    pub async fn open(db_path: impl AsRef<Path>, opts: StoreOptions) -> EngineResult<Self> {
        let path = db_path.as_ref().to_path_buf();
        let size = opts.pool_size.clamp(1, 64);
        let busy = Duration::from_millis(opts.busy_timeout_ms);

        let conns = tokio::task::spawn_blocking({
            let path = path.clone();
            move || -> EngineResult<Vec<Connection>> {
                let first = open_conn(&path, busy)?;
                first.execute_batch(SCHEMA)?;
                let mut conns = vec![first];
                for _ in 1..size {
                    conns.push(open_conn(&path, busy)?);
                }
                Ok(conns)
            }
        })
        .await??;

        let pool = Pool::new(size);
        for conn in conns {
            pool.add(conn).await.map_err(|(_, e)| EngineError::Pool(e))?;
        }
        info!(path = %path.display(), pool_size = size, "store opened");
        Ok(Self {
            inner: Arc::new(StoreInner { pool }),
        })
    }

    /// Connections currently idle in the pool.
    pub fn idle_connections(&self) -> usize {
        self.inner.pool.status().available.max(0) as usize
    }

    pub async fn health_check(&self, ctx: &OpContext) -> EngineResult<()> {
        self.run(ctx, |conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        })
        .await
    }

    /// Runs `f` on a pooled connection, honouring the context's deadline and
    /// cancellation. A running statement is interrupted when either fires; an
    /// open transaction then rolls back on drop.
    pub async fn run<T, F>(&self, ctx: &OpContext, f: F) -> EngineResult<T>
    where
        F: FnOnce(&mut Connection) -> EngineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        ctx.check()?;

        let mut conn = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = deadline_elapsed(ctx.deadline) => return Err(EngineError::Timeout),
            got = self.inner.pool.get() => got?,
        };

        // The connection travels back out of the blocking task so it only
        // returns to the pool after any interrupt has been issued.
        let mut guard = InterruptOnDrop(Some(conn.get_interrupt_handle()));
        let mut task = tokio::task::spawn_blocking(move || {
            let res = f(&mut *conn);
            (conn, res)
        });

        let abort_kind = tokio::select! {
            joined = &mut task => {
                guard.disarm();
                let (_conn, res) = joined?;
                return res;
            }
            _ = ctx.cancel.cancelled() => EngineError::Cancelled,
            _ = deadline_elapsed(ctx.deadline) => EngineError::Timeout,
        };
        guard.fire();
        debug!(kind = abort_kind.kind(), "interrupting store operation");
        let (_conn, res) = task.await?;
        match res {
            // The closure finished before the interrupt landed.
            Ok(v) => Ok(v),
            Err(_) => Err(abort_kind),
        }
    }
}

/// Interrupts the connection if the awaiting future is dropped mid-statement.
struct InterruptOnDrop(Option<InterruptHandle>);

impl InterruptOnDrop {
    fn disarm(&mut self) {
        self.0 = None;
    }

    fn fire(&mut self) {
        if let Some(h) = self.0.take() {
            h.interrupt();
        }
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        self.fire();
    }
}

async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

fn open_conn(path: &Path, busy: Duration) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    // Returns the resulting mode as a row; failure leaves the default journal.
    let _ = conn.pragma_update(None, "journal_mode", "WAL");
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(busy)?;
    Ok(conn)
}

/// Starts a write transaction that takes the database write lock up front,
/// so an existence check and the mutation that depends on it cannot
/// interleave with another writer.
pub(crate) fn write_tx(conn: &mut Connection) -> rusqlite::Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
}

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  username TEXT NOT NULL UNIQUE,
  registered_at_ms INTEGER NOT NULL,
  followers_count INTEGER NOT NULL DEFAULT 0 CHECK(followers_count >= 0),
  following_count INTEGER NOT NULL DEFAULT 0 CHECK(following_count >= 0)
);

CREATE TABLE IF NOT EXISTS media_assets (
  id TEXT PRIMARY KEY,
  owner_id TEXT NOT NULL,
  mime TEXT NOT NULL,
  filename TEXT NULL,
  created_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_media_owner ON media_assets(owner_id, created_at_ms DESC);

CREATE TABLE IF NOT EXISTS publications (
  id TEXT PRIMARY KEY,
  author_id TEXT NOT NULL,
  type TEXT NOT NULL,
  title TEXT NULL,
  content TEXT NULL,
  source TEXT NULL,
  publication_date_ms INTEGER NOT NULL,
  visibility TEXT NOT NULL,
  likes_count INTEGER NOT NULL DEFAULT 0 CHECK(likes_count >= 0),
  comments_count INTEGER NOT NULL DEFAULT 0 CHECK(comments_count >= 0),
  saved_count INTEGER NOT NULL DEFAULT 0 CHECK(saved_count >= 0)
);
CREATE INDEX IF NOT EXISTS idx_pub_date ON publications(publication_date_ms DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_pub_author_date ON publications(author_id, publication_date_ms DESC);

-- media_id is not a foreign key: ownership may be vouched for by an external
-- media service whose assets never reach media_assets.
CREATE TABLE IF NOT EXISTS publication_media (
  publication_id TEXT NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
  media_id TEXT NOT NULL,
  ord INTEGER NOT NULL,
  PRIMARY KEY(publication_id, media_id)
);
CREATE INDEX IF NOT EXISTS idx_pub_media_media ON publication_media(media_id);

CREATE TABLE IF NOT EXISTS publication_likes (
  user_id TEXT NOT NULL,
  publication_id TEXT NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
  created_at_ms INTEGER NOT NULL,
  PRIMARY KEY(user_id, publication_id)
);
CREATE INDEX IF NOT EXISTS idx_pub_likes_pub ON publication_likes(publication_id, created_at_ms DESC);

CREATE TABLE IF NOT EXISTS saved_items (
  user_id TEXT NOT NULL,
  publication_id TEXT NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
  note TEXT NULL,
  added_at_ms INTEGER NOT NULL,
  PRIMARY KEY(user_id, publication_id)
);
CREATE INDEX IF NOT EXISTS idx_saved_user_added ON saved_items(user_id, added_at_ms DESC);
CREATE INDEX IF NOT EXISTS idx_saved_pub ON saved_items(publication_id);

CREATE TABLE IF NOT EXISTS comments (
  id TEXT PRIMARY KEY,
  publication_id TEXT NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
  parent_id TEXT NULL REFERENCES comments(id) ON DELETE CASCADE,
  author_id TEXT NOT NULL,
  text TEXT NOT NULL,
  created_at_ms INTEGER NOT NULL,
  likes_count INTEGER NOT NULL DEFAULT 0 CHECK(likes_count >= 0)
);
CREATE INDEX IF NOT EXISTS idx_comments_pub ON comments(publication_id, created_at_ms);
CREATE INDEX IF NOT EXISTS idx_comments_parent ON comments(parent_id, created_at_ms);

CREATE TABLE IF NOT EXISTS comment_likes (
  user_id TEXT NOT NULL,
  comment_id TEXT NOT NULL REFERENCES comments(id) ON DELETE CASCADE,
  created_at_ms INTEGER NOT NULL,
  PRIMARY KEY(user_id, comment_id)
);
CREATE INDEX IF NOT EXISTS idx_comment_likes_comment ON comment_likes(comment_id);

CREATE TABLE IF NOT EXISTS user_follows (
  follower_id TEXT NOT NULL,
  following_id TEXT NOT NULL,
  created_at_ms INTEGER NOT NULL,
  PRIMARY KEY(follower_id, following_id),
  CHECK(follower_id <> following_id)
);
CREATE INDEX IF NOT EXISTS idx_follows_following ON user_follows(following_id);
"#;

/// Column list matching [`read_publication`], for a table aliased `p`.
pub(crate) const PUBLICATION_COLUMNS: &str = "p.id, p.author_id, p.type, p.title, p.content, p.source, \
     p.publication_date_ms, p.visibility, p.likes_count, p.comments_count, p.saved_count";

pub(crate) const PUBLICATION_COLUMN_COUNT: usize = 11;

/// Reads a publication from `row` starting at column `base`. Media ids are
/// not part of the row and are attached separately.
pub(crate) fn read_publication(row: &Row<'_>, base: usize) -> rusqlite::Result<Publication> {
    let kind: String = row.get(base + 2)?;
    let visibility: String = row.get(base + 7)?;
    Ok(Publication {
        id: row.get(base)?,
        author_id: row.get(base + 1)?,
        kind: PublicationType::parse(&kind).ok_or_else(|| bad_enum(base + 2, "type", &kind))?,
        title: row.get(base + 3)?,
        content: row.get(base + 4)?,
        source: row.get(base + 5)?,
        publication_date_ms: row.get(base + 6)?,
        visibility: Visibility::parse(&visibility)
            .ok_or_else(|| bad_enum(base + 7, "visibility", &visibility))?,
        likes_count: row.get(base + 8)?,
        comments_count: row.get(base + 9)?,
        saved_count: row.get(base + 10)?,
        media_ids: Vec::new(),
    })
}

fn bad_enum(idx: usize, column: &str, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        format!("unexpected {column} value {value:?}").into(),
    )
}

pub(crate) fn load_publication(conn: &Connection, id: &str) -> rusqlite::Result<Option<Publication>> {
    let sql = format!("SELECT {PUBLICATION_COLUMNS} FROM publications p WHERE p.id = ?1");
    let publication = conn
        .query_row(&sql, params![id], |r| read_publication(r, 0))
        .optional()?;
    match publication {
        Some(mut p) => {
            p.media_ids = load_media_ids(conn, &p.id)?;
            Ok(Some(p))
        }
        None => Ok(None),
    }
}

pub(crate) fn load_media_ids(conn: &Connection, publication_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT media_id FROM publication_media WHERE publication_id = ?1 ORDER BY ord",
    )?;
    let rows = stmt
        .query_map(params![publication_id], |r| r.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Author and visibility of a publication, used for access checks.
pub(crate) fn publication_access(
    conn: &Connection,
    publication_id: &str,
) -> rusqlite::Result<Option<(String, Visibility)>> {
    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT author_id, visibility FROM publications WHERE id = ?1",
            params![publication_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    Ok(row.and_then(|(author, vis)| Visibility::parse(&vis).map(|v| (author, v))))
}

pub(crate) fn new_id() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    hex::encode(b)
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
