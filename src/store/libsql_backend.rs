//! libSQL store — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. One long-lived connection
//! owned by the backend value; `libsql::Connection` is `Send + Sync` and
//! safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::StorageError;
use crate::store::traits::{MailboxRecord, Store, UserRecord};

const USER_COLUMNS: &str = "external_id, joined_at, verified";
const MAILBOX_COLUMNS: &str = "address, owner_id, secret, created_at";

/// libSQL database backend.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new_local(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StorageError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StorageError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StorageError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StorageError::Pool(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StorageError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create both tables. Idempotent.
    async fn init_schema(&self) -> Result<(), StorageError> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    external_id TEXT PRIMARY KEY,
                    joined_at TEXT NOT NULL,
                    verified INTEGER NOT NULL DEFAULT 0
                );
                CREATE INDEX IF NOT EXISTS idx_users_verified ON users(verified);

                CREATE TABLE IF NOT EXISTS mailboxes (
                    address TEXT PRIMARY KEY,
                    owner_id TEXT NOT NULL,
                    secret TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_mailboxes_owner ON mailboxes(owner_id);",
            )
            .await
            .map_err(|e| StorageError::Query(format!("init_schema: {e}")))?;

        debug!("Schema initialized");
        Ok(())
    }
}

#[async_trait]
impl Store for LibSqlStore {
    async fn get_or_create_user(&self, external_id: &str) -> Result<UserRecord, StorageError> {
        let now = Utc::now().to_rfc3339();
        // INSERT OR IGNORE against the primary key: concurrent first
        // contact creates at most one row.
        self.conn
            .execute(
                "INSERT OR IGNORE INTO users (external_id, joined_at, verified) VALUES (?1, ?2, 0)",
                params![external_id, now],
            )
            .await
            .map_err(|e| StorageError::Query(format!("get_or_create_user insert: {e}")))?;

        let mut rows = self
            .conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE external_id = ?1"),
                params![external_id],
            )
            .await
            .map_err(|e| StorageError::Query(format!("get_or_create_user select: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_user(&row)
                .map_err(|e| StorageError::Query(format!("get_or_create_user row parse: {e}"))),
            Ok(None) => Err(StorageError::Query(
                "get_or_create_user: row missing after insert".to_string(),
            )),
            Err(e) => Err(StorageError::Query(format!("get_or_create_user: {e}"))),
        }
    }

    async fn mark_verified(&self, external_id: &str) -> Result<(), StorageError> {
        self.conn
            .execute(
                "UPDATE users SET verified = 1 WHERE external_id = ?1",
                params![external_id],
            )
            .await
            .map_err(|e| StorageError::Query(format!("mark_verified: {e}")))?;

        debug!(user = external_id, "User marked verified");
        Ok(())
    }

    async fn list_verified(&self) -> Result<Vec<UserRecord>, StorageError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE verified = 1 ORDER BY joined_at ASC"),
                (),
            )
            .await
            .map_err(|e| StorageError::Query(format!("list_verified: {e}")))?;

        let mut users = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            users.push(
                row_to_user(&row)
                    .map_err(|e| StorageError::Query(format!("list_verified row parse: {e}")))?,
            );
        }
        Ok(users)
    }

    async fn insert_mailbox(&self, record: &MailboxRecord) -> Result<(), StorageError> {
        self.conn
            .execute(
                "INSERT INTO mailboxes (address, owner_id, secret, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.address.as_str(),
                    record.owner_id.as_str(),
                    record.secret.as_str(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                let msg = format!("insert_mailbox: {e}");
                if msg.contains("UNIQUE") {
                    StorageError::Constraint(msg)
                } else {
                    StorageError::Query(msg)
                }
            })?;

        debug!(address = %record.address, owner = %record.owner_id, "Mailbox inserted into DB");
        Ok(())
    }

    async fn list_mailboxes(&self, owner_id: &str) -> Result<Vec<MailboxRecord>, StorageError> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE owner_id = ?1 ORDER BY created_at ASC"
                ),
                params![owner_id],
            )
            .await
            .map_err(|e| StorageError::Query(format!("list_mailboxes: {e}")))?;

        let mut mailboxes = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            mailboxes.push(
                row_to_mailbox(&row)
                    .map_err(|e| StorageError::Query(format!("list_mailboxes row parse: {e}")))?,
            );
        }
        Ok(mailboxes)
    }

    async fn delete_mailbox(&self, address: &str) -> Result<(), StorageError> {
        self.conn
            .execute("DELETE FROM mailboxes WHERE address = ?1", params![address])
            .await
            .map_err(|e| StorageError::Query(format!("delete_mailbox: {e}")))?;

        debug!(address, "Mailbox deleted from DB");
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Map a libsql Row to a UserRecord. Column order matches USER_COLUMNS.
fn row_to_user(row: &libsql::Row) -> Result<UserRecord, libsql::Error> {
    let external_id: String = row.get(0)?;
    let joined_str: String = row.get(1)?;
    let verified: i64 = row.get(2)?;

    Ok(UserRecord {
        external_id,
        joined_at: parse_datetime(&joined_str),
        verified: verified != 0,
    })
}

/// Map a libsql Row to a MailboxRecord. Column order matches MAILBOX_COLUMNS.
fn row_to_mailbox(row: &libsql::Row) -> Result<MailboxRecord, libsql::Error> {
    let address: String = row.get(0)?;
    let owner_id: String = row.get(1)?;
    let secret: String = row.get(2)?;
    let created_str: String = row.get(3)?;

    Ok(MailboxRecord {
        owner_id,
        address,
        secret,
        created_at: parse_datetime(&created_str),
    })
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn mailbox(owner: &str, address: &str) -> MailboxRecord {
        MailboxRecord {
            owner_id: owner.to_string(),
            address: address.to_string(),
            secret: "supersecretpass0".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = LibSqlStore::new_memory().await.unwrap();

        let first = store.get_or_create_user("100").await.unwrap();
        assert_eq!(first.external_id, "100");
        assert!(!first.verified);

        let second = store.get_or_create_user("100").await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn concurrent_first_contact_creates_one_row() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());

        let a = Arc::clone(&store);
        let b = Arc::clone(&store);
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.get_or_create_user("7").await }),
            tokio::spawn(async move { b.get_or_create_user("7").await }),
        );
        let ua = ra.unwrap().unwrap();
        let ub = rb.unwrap().unwrap();
        assert_eq!(ua, ub);

        store.mark_verified("7").await.unwrap();
        let verified = store.list_verified().await.unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].external_id, "7");
    }

    #[tokio::test]
    async fn mark_verified_is_idempotent_and_preserves_joined_at() {
        let store = LibSqlStore::new_memory().await.unwrap();

        let created = store.get_or_create_user("42").await.unwrap();
        store.mark_verified("42").await.unwrap();
        store.mark_verified("42").await.unwrap();

        let after = store.get_or_create_user("42").await.unwrap();
        assert!(after.verified);
        assert_eq!(after.joined_at, created.joined_at);
    }

    #[tokio::test]
    async fn mark_verified_unknown_user_is_noop() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.mark_verified("nobody").await.unwrap();
        assert!(store.list_verified().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_verified_filters_unverified() {
        let store = LibSqlStore::new_memory().await.unwrap();

        store.get_or_create_user("1").await.unwrap();
        store.get_or_create_user("2").await.unwrap();
        store.mark_verified("2").await.unwrap();

        let verified = store.list_verified().await.unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].external_id, "2");
    }

    #[tokio::test]
    async fn insert_and_list_mailboxes_by_owner() {
        let store = LibSqlStore::new_memory().await.unwrap();

        store.insert_mailbox(&mailbox("1", "abc@example.com")).await.unwrap();
        store.insert_mailbox(&mailbox("1", "def@example.com")).await.unwrap();
        store.insert_mailbox(&mailbox("2", "ghi@example.com")).await.unwrap();

        let owned = store.list_mailboxes("1").await.unwrap();
        assert_eq!(owned.len(), 2);
        assert!(owned.iter().all(|m| m.owner_id == "1"));

        assert_eq!(store.list_mailboxes("2").await.unwrap().len(), 1);
        assert!(store.list_mailboxes("3").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn duplicate_address_is_constraint_error() {
        let store = LibSqlStore::new_memory().await.unwrap();

        store.insert_mailbox(&mailbox("1", "dup@example.com")).await.unwrap();
        let err = store
            .insert_mailbox(&mailbox("2", "dup@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Constraint(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn delete_mailbox_removes_record() {
        let store = LibSqlStore::new_memory().await.unwrap();

        store.insert_mailbox(&mailbox("1", "gone@example.com")).await.unwrap();
        store.delete_mailbox("gone@example.com").await.unwrap();
        assert!(store.list_mailboxes("1").await.unwrap().is_empty());

        // Unknown address is a no-op, not an error.
        store.delete_mailbox("never@example.com").await.unwrap();
    }

    #[tokio::test]
    async fn init_schema_is_idempotent() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store.init_schema().await.unwrap();
    }

    #[tokio::test]
    async fn new_local_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("mailgate.db");
        let store = LibSqlStore::new_local(&db_path).await.unwrap();
        assert!(db_path.exists());
        drop(store);
    }

    #[test]
    fn parse_datetime_formats() {
        let rfc = parse_datetime("2026-01-02T03:04:05+00:00");
        assert_eq!(rfc.to_rfc3339(), "2026-01-02T03:04:05+00:00");

        let sqlite = parse_datetime("2026-01-02 03:04:05");
        assert_eq!(sqlite, rfc);

        assert_eq!(parse_datetime("not a date"), DateTime::<Utc>::MIN_UTC);
    }
}
