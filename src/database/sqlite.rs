//! Paste repository on SQLite.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, Pool, Sqlite};
use tracing::{debug, info};

use super::store::{PastePatch, PasteRepository};
use crate::error::{StoreError, StoreResult};
use crate::paste::{now_ms, Page, Paste, PasteSummary};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS pastes (
    key         TEXT PRIMARY KEY,
    created_at  INTEGER NOT NULL,
    expire      INTEGER NOT NULL,
    ip          TEXT NOT NULL,
    content     BLOB NOT NULL,
    mime        TEXT NOT NULL,
    length      INTEGER NOT NULL,
    password    TEXT,
    email       TEXT NOT NULL,
    name        TEXT NOT NULL,
    hash        INTEGER NOT NULL
)";

const OWNER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_pastes_owner ON pastes (email, created_at DESC)";

const EXPIRE_INDEX: &str = "CREATE INDEX IF NOT EXISTS idx_pastes_expire ON pastes (expire)";

const SELECT_PASTE: &str = "SELECT key, created_at, expire, ip, content, mime, length, password, \
                            email, name, hash FROM pastes WHERE key = ?";

const SELECT_SUMMARY: &str = "SELECT key, created_at, expire, mime, length, name, \
                              (password IS NOT NULL AND password != '') AS protected FROM pastes";

#[derive(Debug, FromRow)]
struct PasteRow {
    key: String,
    created_at: i64,
    expire: i64,
    ip: String,
    content: Vec<u8>,
    mime: String,
    length: i64,
    password: Option<String>,
    email: String,
    name: String,
    hash: i64,
}

impl From<PasteRow> for Paste {
    fn from(row: PasteRow) -> Self {
        Self {
            key: row.key,
            created_at: row.created_at,
            expire: row.expire,
            ip: row.ip,
            content: row.content,
            mime: row.mime,
            length: row.length.max(0) as u64,
            password: row.password,
            email: row.email,
            name: row.name,
            hash: row.hash.max(0) as u64,
        }
    }
}

#[derive(Debug, FromRow)]
struct SummaryRow {
    key: String,
    created_at: i64,
    expire: i64,
    mime: String,
    length: i64,
    name: String,
    protected: bool,
}

impl From<SummaryRow> for PasteSummary {
    fn from(row: SummaryRow) -> Self {
        Self {
            key: row.key,
            created_at: row.created_at,
            expire: row.expire,
            mime: row.mime,
            length: row.length.max(0) as u64,
            name: row.name,
            protected: row.protected,
        }
    }
}

fn to_i64(value: u64) -> StoreResult<i64> {
    i64::try_from(value).map_err(|_| StoreError::Serialization(format!("{value} exceeds i64")))
}

/// SQLite-backed paste repository.
pub struct SqlitePasteRepository {
    pool: Pool<Sqlite>,
}

impl SqlitePasteRepository {
    /// Open (creating if missing) the database at `path` and apply the schema.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Internal(format!("create {}: {e}", parent.display())))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5));

        // One writer at a time; SQLite serialises writes anyway.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let repo = Self { pool };
        repo.migrate().await?;
        info!("SQLite paste store ready at {}", path.display());
        Ok(repo)
    }

    async fn migrate(&self) -> StoreResult<()> {
        for statement in [SCHEMA, OWNER_INDEX, EXPIRE_INDEX] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn page(
        &self,
        owner: Option<&str>,
        limit: u64,
        offset: u64,
    ) -> StoreResult<Page<PasteSummary>> {
        let now = now_ms();
        let (limit, offset) = (to_i64(limit)?, to_i64(offset)?);

        let (total, rows) = match owner {
            Some(email) => {
                let total: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM pastes WHERE email = ? AND expire > ?",
                )
                .bind(email)
                .bind(now)
                .fetch_one(&self.pool)
                .await?;
                let rows = sqlx::query_as::<_, SummaryRow>(&format!(
                    "{SELECT_SUMMARY} WHERE email = ? AND expire > ? \
                     ORDER BY created_at DESC, key ASC LIMIT ? OFFSET ?"
                ))
                .bind(email)
                .bind(now)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
                (total, rows)
            }
            None => {
                let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pastes WHERE expire > ?")
                    .bind(now)
                    .fetch_one(&self.pool)
                    .await?;
                let rows = sqlx::query_as::<_, SummaryRow>(&format!(
                    "{SELECT_SUMMARY} WHERE expire > ? \
                     ORDER BY created_at DESC, key ASC LIMIT ? OFFSET ?"
                ))
                .bind(now)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;
                (total, rows)
            }
        };

        Ok(Page {
            items: rows.into_iter().map(PasteSummary::from).collect(),
            total: total.max(0) as u64,
        })
    }
}

#[async_trait]
impl PasteRepository for SqlitePasteRepository {
    async fn create(&self, paste: &Paste) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO pastes (key, created_at, expire, ip, content, mime, length, password, \
             email, name, hash) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(key) DO NOTHING",
        )
        .bind(&paste.key)
        .bind(paste.created_at)
        .bind(paste.expire)
        .bind(&paste.ip)
        .bind(&paste.content)
        .bind(&paste.mime)
        .bind(to_i64(paste.length)?)
        .bind(&paste.password)
        .bind(&paste.email)
        .bind(&paste.name)
        .bind(to_i64(paste.hash)?)
        .execute(&self.pool)
        .await?;

        debug!("Created paste {}: {}", paste.key, result.rows_affected() == 1);
        Ok(result.rows_affected() == 1)
    }

    async fn get_by_key(&self, key: &str) -> StoreResult<Option<Paste>> {
        let row = sqlx::query_as::<_, PasteRow>(SELECT_PASTE)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Paste::from))
    }

    async fn update(&self, key: &str, patch: &PastePatch) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, PasteRow>(SELECT_PASTE)
            .bind(key)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Ok(false);
        };

        let mut paste = Paste::from(row);
        patch.apply_to(&mut paste);

        sqlx::query(
            "UPDATE pastes SET expire = ?, ip = ?, content = ?, mime = ?, length = ?, \
             password = ?, email = ?, name = ?, hash = ? WHERE key = ?",
        )
        .bind(paste.expire)
        .bind(&paste.ip)
        .bind(&paste.content)
        .bind(&paste.mime)
        .bind(to_i64(paste.length)?)
        .bind(&paste.password)
        .bind(&paste.email)
        .bind(&paste.name)
        .bind(to_i64(paste.hash)?)
        .bind(key)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!("Updated paste {}", key);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM pastes WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_alive(&self, limit: u64, offset: u64) -> StoreResult<Page<PasteSummary>> {
        self.page(None, limit, offset).await
    }

    async fn paginate_by_owner(
        &self,
        email: &str,
        limit: u64,
        offset: u64,
    ) -> StoreResult<Page<PasteSummary>> {
        self.page(Some(email), limit, offset).await
    }

    async fn count(&self) -> StoreResult<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pastes")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn all_keys(&self) -> StoreResult<Vec<String>> {
        let keys: Vec<String> = sqlx::query_scalar("SELECT key FROM pastes ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
