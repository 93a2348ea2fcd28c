//! SQLite persistence for users and presence records.

use attend_core::{Encoding, NewPresence};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use tokio_rusqlite::Connection;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id             INTEGER PRIMARY KEY AUTOINCREMENT,
        username       TEXT NOT NULL UNIQUE,
        password_hash  TEXT NOT NULL,
        face_encoding  TEXT
    );
    CREATE TABLE IF NOT EXISTS presence (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id    INTEGER NOT NULL REFERENCES users(id),
        timestamp  TEXT NOT NULL,
        latitude   REAL,
        longitude  REAL,
        status     TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS presence_user_time ON presence(user_id, timestamp);
";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("username already exists")]
    UsernameTaken,
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("database: {0}")]
    Database(#[from] tokio_rusqlite::Error),
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub password_hash: String,
    pub face_encoding: Option<Encoding>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresenceRecord {
    pub id: i64,
    pub user_id: i64,
    pub timestamp: DateTime<Utc>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub status: String,
}

/// One page of results (1-based `page`).
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn pages(&self) -> u32 {
        if self.per_page == 0 {
            return 0;
        }
        self.total.div_ceil(self.per_page as u64) as u32
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let encoding: Option<String> = row.get(3)?;
    let face_encoding = encoding
        .map(|s| {
            Encoding::parse_stored(&s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    3,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })
        })
        .transpose()?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        face_encoding,
    })
}

fn presence_from_row(row: &Row<'_>) -> rusqlite::Result<PresenceRecord> {
    Ok(PresenceRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        timestamp: row.get(2)?,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        status: row.get(5)?,
    })
}

/// Handle to the attendance database. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).await?;
        tracing::info!(path = %path.display(), "opened database");
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory().await?).await
    }

    async fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }

    /// Insert a new user. Fails with [`StoreError::UsernameTaken`] on a duplicate name.
    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        encoding: &Encoding,
    ) -> Result<User, StoreError> {
        let user = User {
            id: 0,
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            face_encoding: Some(encoding.clone()),
        };
        let encoded = encoding.to_string();
        let (username, password_hash) = (user.username.clone(), user.password_hash.clone());

        let id = self
            .conn
            .call(move |conn| {
                let inserted = conn.execute(
                    "INSERT INTO users (username, password_hash, face_encoding) \
                     VALUES (?1, ?2, ?3)",
                    params![username, password_hash, encoded],
                );
                match inserted {
                    Ok(_) => Ok(Some(conn.last_insert_rowid())),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        Ok(None)
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?
            .ok_or(StoreError::UsernameTaken)?;

        tracing::info!(user_id = id, username = %user.username, "user created");
        Ok(User { id, ..user })
    }

    pub async fn find_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let username = username.to_string();
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, username, password_hash, face_encoding \
                         FROM users WHERE username = ?1",
                        params![username],
                        user_from_row,
                    )
                    .optional()?)
            })
            .await?)
    }

    pub async fn find_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT id, username, password_hash, face_encoding \
                         FROM users WHERE id = ?1",
                        params![id],
                        user_from_row,
                    )
                    .optional()?)
            })
            .await?)
    }

    pub async fn count_users(&self) -> Result<u64, StoreError> {
        Ok(self
            .conn
            .call(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?;
                Ok(count as u64)
            })
            .await?)
    }

    /// Append a presence record.
    pub async fn insert_presence(
        &self,
        presence: NewPresence,
    ) -> Result<PresenceRecord, StoreError> {
        let record = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO presence (user_id, timestamp, latitude, longitude, status)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        presence.user_id,
                        presence.recorded_at,
                        presence.latitude,
                        presence.longitude,
                        presence.status
                    ],
                )?;
                Ok(PresenceRecord {
                    id: conn.last_insert_rowid(),
                    user_id: presence.user_id,
                    timestamp: presence.recorded_at,
                    latitude: presence.latitude,
                    longitude: presence.longitude,
                    status: presence.status,
                })
            })
            .await?;

        tracing::info!(
            user_id = record.user_id,
            record_id = record.id,
            status = %record.status,
            "presence recorded"
        );
        Ok(record)
    }

    /// Newest-first page of a user's presence records.
    pub async fn presence_page(
        &self,
        user_id: i64,
        page: u32,
        per_page: u32,
    ) -> Result<Page<PresenceRecord>, StoreError> {
        let page = page.max(1);
        let offset = (page as i64 - 1) * per_page as i64;

        let (items, total) = self
            .conn
            .call(move |conn| {
                let total: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM presence WHERE user_id = ?1",
                    params![user_id],
                    |r| r.get(0),
                )?;
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, timestamp, latitude, longitude, status FROM presence
                     WHERE user_id = ?1
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?2 OFFSET ?3",
                )?;
                let items = stmt
                    .query_map(params![user_id, per_page as i64, offset], presence_from_row)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok((items, total as u64))
            })
            .await?;

        Ok(Page {
            items,
            page,
            per_page,
            total,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attend_core::ENCODING_DIM;
    use chrono::Duration;

    fn encoding(seed: f32) -> Encoding {
        Encoding::new((0..ENCODING_DIM).map(|i| seed + i as f32 * 1e-3).collect())
    }

    fn presence(user_id: i64, at: DateTime<Utc>, status: &str) -> NewPresence {
        NewPresence {
            user_id,
            recorded_at: at,
            latitude: Some(-6.2),
            longitude: None,
            status: status.to_string(),
        }
    }

    #[tokio::test]
    async fn create_and_find_user_roundtrips_encoding() {
        let store = Store::open_in_memory().await.unwrap();
        let created = store.create_user("alice", "hash", &encoding(0.1)).await.unwrap();
        assert!(created.id > 0);

        let found = store.find_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.password_hash, "hash");
        assert_eq!(found.face_encoding, Some(encoding(0.1)));

        let by_id = store.find_user(created.id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "alice");
        assert!(store.find_user_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let store = Store::open_in_memory().await.unwrap();
        store.create_user("alice", "h1", &encoding(0.1)).await.unwrap();
        let err = store.create_user("alice", "h2", &encoding(0.2)).await.unwrap_err();
        assert!(matches!(err, StoreError::UsernameTaken));
        assert_eq!(store.count_users().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn presence_pages_newest_first() {
        let store = Store::open_in_memory().await.unwrap();
        let alice = store.create_user("alice", "h", &encoding(0.1)).await.unwrap();
        let bob = store.create_user("bob", "h", &encoding(0.2)).await.unwrap();

        let start = Utc::now();
        for i in 0..12 {
            let at = start + Duration::seconds(i);
            store
                .insert_presence(presence(alice.id, at, &format!("Verified (Distance: 0.{i:02})")))
                .await
                .unwrap();
        }
        store
            .insert_presence(presence(bob.id, start, "Unverified (Distance: 0.90)"))
            .await
            .unwrap();

        let first = store.presence_page(alice.id, 1, 10).await.unwrap();
        assert_eq!(first.total, 12);
        assert_eq!(first.pages(), 2);
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.items[0].status, "Verified (Distance: 0.11)");
        assert!(first.items.windows(2).all(|w| w[0].timestamp >= w[1].timestamp));
        assert!(!first.has_prev());
        assert!(first.has_next());

        let second = store.presence_page(alice.id, 2, 10).await.unwrap();
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.items[1].status, "Verified (Distance: 0.00)");
        assert!(second.has_prev());
        assert!(!second.has_next());
    }

    #[tokio::test]
    async fn inserted_presence_keeps_location() {
        let store = Store::open_in_memory().await.unwrap();
        let alice = store.create_user("alice", "h", &encoding(0.1)).await.unwrap();
        let record = store
            .insert_presence(presence(alice.id, Utc::now(), "Verified (Distance: 0.12)"))
            .await
            .unwrap();

        let page = store.presence_page(alice.id, 1, 10).await.unwrap();
        assert_eq!(page.items, vec![record]);
        assert_eq!(page.items[0].latitude, Some(-6.2));
        assert_eq!(page.items[0].longitude, None);
    }

    #[tokio::test]
    async fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/attendance.db");
        let store = Store::open(&path).await.unwrap();
        store.create_user("alice", "h", &encoding(0.1)).await.unwrap();
        assert!(path.exists());
    }
}
