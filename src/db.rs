use crate::config::App;
use crate::error::SyncError;
use crate::model::{Annotation, Bookmark, Collection, CollectionKind, UserId};
use crate::store::{PartitionKey, PartitionLocks, RecordStore};
use anyhow::Result;
use libsql::{Builder, Connection, Database as LibsqlDatabase, Row};
use std::path::Path;
use std::time::Duration;

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[("001_schema.sql", include_str!("migrations/001_schema.sql"))];

const INSERT_BOOKMARK: &str = r#"
    INSERT INTO bookmarks (user_id, id, book, chapter, verse, text)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

const INSERT_ANNOTATION: &str = r#"
    INSERT INTO annotations (user_id, "key", note, color, html)
    VALUES (?, ?, ?, ?, ?)
"#;

const SELECT_BOOKMARKS: &str = r#"
    SELECT user_id, id, book, chapter, verse, text
    FROM bookmarks WHERE user_id = ?
    ORDER BY row_id
"#;

const SELECT_ANNOTATIONS: &str = r#"
    SELECT user_id, "key", note, color, html
    FROM annotations WHERE user_id = ?
    ORDER BY row_id
"#;

/// SQLite-backed record store. Every operation opens its own connection;
/// replaces hold the partition lock for the whole transaction.
pub struct Database {
    db: LibsqlDatabase,
    locks: PartitionLocks,
    busy_timeout: Duration,
    replica: bool,
}

impl Database {
    pub fn is_replica(&self) -> bool {
        self.replica
    }

    pub async fn sync(&self) -> Result<()> {
        if self.replica {
            self.db
                .sync()
                .await
                .map_err(|e| anyhow::anyhow!("sync failed: {}", e))?;
        }
        Ok(())
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    pub async fn new(cfg: &App, data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(cfg.get_db());
        let busy_timeout = Duration::from_millis(cfg.busy_timeout_ms);

        match cfg.replica() {
            Some((url, token)) => {
                tracing::info!("[db] running in synced database mode (offline writes)");
                let sync_interval = Duration::from_secs(cfg.sync_interval_seconds);
                let db = Builder::new_synced_database(&path, url.to_string(), token.to_string())
                    .sync_interval(sync_interval)
                    .build()
                    .await?;
                Self::open(db, busy_timeout, true).await
            }
            None => Self::open_local(&path, busy_timeout).await,
        }
    }

    pub async fn open_local(path: &Path, busy_timeout: Duration) -> Result<Self> {
        tracing::info!(path = ?path, "[db] opening local database");
        let db = Builder::new_local(path).build().await?;
        Self::open(db, busy_timeout, false).await
    }

    async fn open(db: LibsqlDatabase, busy_timeout: Duration, replica: bool) -> Result<Self> {
        let database = Database {
            db,
            locks: PartitionLocks::default(),
            busy_timeout,
            replica,
        };

        let conn = database.connect().await?;
        conn.query("SELECT 1", ()).await?;

        if !replica {
            // readers keep seeing the last committed snapshot while a replace is in flight
            Self::pragma(&conn, "PRAGMA journal_mode = WAL").await?;
        }

        for (filename, sql) in SYSTEM_MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        for (filename, sql) in MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        Ok(database)
    }

    async fn pragma(conn: &Connection, statement: &str) -> Result<(), libsql::Error> {
        let mut rows = conn.query(statement, ()).await?;
        rows.next().await?;
        Ok(())
    }

    async fn connect(&self) -> Result<Connection, SyncError> {
        let conn = self.db.connect()?;
        let pragma = format!("PRAGMA busy_timeout = {}", self.busy_timeout.as_millis());
        Self::pragma(&conn, &pragma).await?;
        Ok(conn)
    }

    async fn count(conn: &Connection, user_id: &UserId, kind: CollectionKind) -> Result<usize, SyncError> {
        let query = format!("SELECT COUNT(*) FROM {} WHERE user_id = ?", kind.as_str());
        let mut rows = conn.query(&query, libsql::params![user_id.as_str()]).await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(count as usize)
    }

    async fn replace_internal(
        conn: &Connection,
        user_id: &UserId,
        collection: &Collection,
    ) -> Result<usize, SyncError> {
        let kind = collection.kind();
        let delete = format!("DELETE FROM {} WHERE user_id = ?", kind.as_str());
        conn.execute(&delete, libsql::params![user_id.as_str()]).await?;

        match collection {
            Collection::Bookmarks(items) => {
                for b in items {
                    conn.execute(
                        INSERT_BOOKMARK,
                        libsql::params![
                            user_id.as_str(),
                            b.id.as_str(),
                            b.book.as_str(),
                            i64::from(b.chapter),
                            i64::from(b.verse),
                            b.text.as_str()
                        ],
                    )
                    .await?;
                }
            }
            Collection::Annotations(items) => {
                for a in items {
                    conn.execute(
                        INSERT_ANNOTATION,
                        libsql::params![
                            user_id.as_str(),
                            a.key.as_str(),
                            a.note.as_str(),
                            a.color.as_str(),
                            a.html.as_deref()
                        ],
                    )
                    .await?;
                }
            }
        }

        let stored = Self::count(conn, user_id, kind).await?;
        if stored != collection.len() {
            return Err(SyncError::PartialWriteDetected {
                kind,
                expected: collection.len(),
                stored,
            });
        }
        Ok(stored)
    }

    fn row_to_bookmark(row: &Row) -> Result<Bookmark, SyncError> {
        let id: String = row.get(1)?;
        let chapter: i64 = row.get(3)?;
        let verse: i64 = row.get(4)?;
        Ok(Bookmark {
            user_id: row.get(0)?,
            book: row.get(2)?,
            chapter: u32::try_from(chapter)
                .map_err(|_| anyhow::anyhow!("bookmark {id} has invalid chapter {chapter}"))?,
            verse: u32::try_from(verse)
                .map_err(|_| anyhow::anyhow!("bookmark {id} has invalid verse {verse}"))?,
            text: row.get(5)?,
            id,
        })
    }

    fn row_to_annotation(row: &Row) -> Result<Annotation, SyncError> {
        Ok(Annotation {
            user_id: row.get(0)?,
            key: row.get(1)?,
            note: row.get(2)?,
            color: row.get(3)?,
            html: row.get::<Option<String>>(4)?,
        })
    }
}

impl RecordStore for Database {
    async fn replace_collection(
        &self,
        user_id: &UserId,
        collection: Collection,
    ) -> Result<usize, SyncError> {
        let conn = self.connect().await?;
        let _guard = self
            .locks
            .acquire(PartitionKey::new(user_id, collection.kind()))
            .await;

        conn.execute("BEGIN IMMEDIATE", ()).await?;

        let result = Self::replace_internal(&conn, user_id, &collection).await;

        match result {
            Ok(count) => match conn.execute("COMMIT", ()).await {
                Ok(_) => Ok(count),
                Err(e) => {
                    let _ = conn.execute("ROLLBACK", ()).await;
                    Err(e.into())
                }
            },
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    async fn fetch_collection(
        &self,
        user_id: &UserId,
        kind: CollectionKind,
    ) -> Result<Collection, SyncError> {
        let conn = self.connect().await?;

        match kind {
            CollectionKind::Bookmarks => {
                let mut rows = conn
                    .query(SELECT_BOOKMARKS, libsql::params![user_id.as_str()])
                    .await?;
                let mut items = vec![];
                while let Some(row) = rows.next().await? {
                    items.push(Self::row_to_bookmark(&row)?);
                }
                Ok(Collection::Bookmarks(items))
            }
            CollectionKind::Annotations => {
                let mut rows = conn
                    .query(SELECT_ANNOTATIONS, libsql::params![user_id.as_str()])
                    .await?;
                let mut items = vec![];
                while let Some(row) = rows.next().await? {
                    items.push(Self::row_to_annotation(&row)?);
                }
                Ok(Collection::Annotations(items))
            }
        }
    }
}
