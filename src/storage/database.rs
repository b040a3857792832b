//! SQLite database management with migrations
//!
//! Provides pooled, read-concurrent access to the corpus: sources, document
//! chunks, code examples, and the FTS5 tables that mirror their text.

use crate::error::{KbError, Result};
use crate::storage::functions;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;
use std::path::Path;
use std::time::Duration;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled connection handed out by [`Database::get_conn`]
pub type DbConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// Connection pool settings
#[derive(Debug, Clone, Copy)]
pub struct DbOptions {
    pub pool_size: u32,
    pub busy_timeout: Duration,
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            pool_size: 16,
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (or create) a database with default pool settings
    pub fn new(db_path: &Path) -> Result<Self> {
        Self::with_options(db_path, DbOptions::default())
    }

    /// Open (or create) a database
    pub fn with_options(db_path: &Path, options: DbOptions) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KbError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // Per-connection setup: pragmas and scalar functions
        let busy_timeout = options.busy_timeout;
        let manager = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.execute_batch(
                "
                PRAGMA foreign_keys = ON;
                PRAGMA synchronous = NORMAL;
                ",
            )?;
            conn.busy_timeout(busy_timeout)?;
            functions::register(conn)
        });

        let pool = Pool::builder()
            .max_size(options.pool_size)
            .build(manager)
            .map_err(|e| KbError::Pool(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool.get()?;

            // WAL lets concurrent searches read without blocking each other
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }

        let db = Self { pool };

        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<DbConn> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let source_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM sources", [], |row| row.get(0))?;

        let chunk_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))?;

        let code_example_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM code_examples", [], |row| row.get(0))?;

        let embedded_chunk_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM chunks WHERE embedding_dim IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        let embedded_code_example_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM code_examples WHERE embedding_dim IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        Ok(DbStats {
            source_count: source_count as usize,
            chunk_count: chunk_count as usize,
            code_example_count: code_example_count as usize,
            embedded_chunk_count: embedded_chunk_count as usize,
            embedded_code_example_count: embedded_code_example_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub source_count: usize,
    pub chunk_count: usize,
    pub code_example_count: usize,
    pub embedded_chunk_count: usize,
    pub embedded_code_example_count: usize,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: corpus schema
    r#"
    CREATE TABLE sources (
        source_id TEXT PRIMARY KEY,
        title TEXT,
        summary TEXT,
        metadata TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(metadata)),
        created_at INTEGER NOT NULL
    );

    -- Generic document chunks. At most one embedding per row; the
    -- dimension tag and the blob are populated together.
    CREATE TABLE chunks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL,
        chunk_number INTEGER NOT NULL,
        content TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(metadata)),
        source_id TEXT NOT NULL,
        embedding_dim INTEGER CHECK (embedding_dim IN (384, 768, 1024, 1536, 3072, 3584)),
        embedding BLOB,
        CHECK ((embedding_dim IS NULL) = (embedding IS NULL)),
        CHECK (embedding IS NULL OR length(embedding) = 4 * embedding_dim),
        UNIQUE (url, chunk_number),
        FOREIGN KEY (source_id) REFERENCES sources(source_id) ON DELETE CASCADE
    );

    CREATE INDEX idx_chunks_source ON chunks(source_id);
    CREATE INDEX idx_chunks_dim_source ON chunks(embedding_dim, source_id);

    CREATE TABLE code_examples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        url TEXT NOT NULL,
        chunk_number INTEGER NOT NULL,
        content TEXT NOT NULL,
        summary TEXT NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}' CHECK (json_valid(metadata)),
        source_id TEXT NOT NULL,
        embedding_dim INTEGER CHECK (embedding_dim IN (384, 768, 1024, 1536, 3072, 3584)),
        embedding BLOB,
        CHECK ((embedding_dim IS NULL) = (embedding IS NULL)),
        CHECK (embedding IS NULL OR length(embedding) = 4 * embedding_dim),
        UNIQUE (url, chunk_number),
        FOREIGN KEY (source_id) REFERENCES sources(source_id) ON DELETE CASCADE
    );

    CREATE INDEX idx_code_examples_source ON code_examples(source_id);
    CREATE INDEX idx_code_examples_dim_source ON code_examples(embedding_dim, source_id);

    -- Lexical representation: stemmed token index and trigram index,
    -- both external-content tables kept in sync by triggers.
    CREATE VIRTUAL TABLE chunks_fts USING fts5(
        content,
        content='chunks', content_rowid='id',
        tokenize='porter unicode61'
    );
    CREATE VIRTUAL TABLE chunks_trigram USING fts5(
        content,
        content='chunks', content_rowid='id',
        tokenize='trigram'
    );

    CREATE TRIGGER chunks_ai AFTER INSERT ON chunks BEGIN
        INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
        INSERT INTO chunks_trigram(rowid, content) VALUES (new.id, new.content);
    END;
    CREATE TRIGGER chunks_ad AFTER DELETE ON chunks BEGIN
        INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.id, old.content);
        INSERT INTO chunks_trigram(chunks_trigram, rowid, content) VALUES ('delete', old.id, old.content);
    END;
    CREATE TRIGGER chunks_au AFTER UPDATE OF content ON chunks BEGIN
        INSERT INTO chunks_fts(chunks_fts, rowid, content) VALUES ('delete', old.id, old.content);
        INSERT INTO chunks_trigram(chunks_trigram, rowid, content) VALUES ('delete', old.id, old.content);
        INSERT INTO chunks_fts(rowid, content) VALUES (new.id, new.content);
        INSERT INTO chunks_trigram(rowid, content) VALUES (new.id, new.content);
    END;

    CREATE VIRTUAL TABLE code_examples_fts USING fts5(
        content, summary,
        content='code_examples', content_rowid='id',
        tokenize='porter unicode61'
    );
    CREATE VIRTUAL TABLE code_examples_trigram USING fts5(
        content, summary,
        content='code_examples', content_rowid='id',
        tokenize='trigram'
    );

    CREATE TRIGGER code_examples_ai AFTER INSERT ON code_examples BEGIN
        INSERT INTO code_examples_fts(rowid, content, summary)
            VALUES (new.id, new.content, new.summary);
        INSERT INTO code_examples_trigram(rowid, content, summary)
            VALUES (new.id, new.content, new.summary);
    END;
    CREATE TRIGGER code_examples_ad AFTER DELETE ON code_examples BEGIN
        INSERT INTO code_examples_fts(code_examples_fts, rowid, content, summary)
            VALUES ('delete', old.id, old.content, old.summary);
        INSERT INTO code_examples_trigram(code_examples_trigram, rowid, content, summary)
            VALUES ('delete', old.id, old.content, old.summary);
    END;
    CREATE TRIGGER code_examples_au AFTER UPDATE OF content, summary ON code_examples BEGIN
        INSERT INTO code_examples_fts(code_examples_fts, rowid, content, summary)
            VALUES ('delete', old.id, old.content, old.summary);
        INSERT INTO code_examples_trigram(code_examples_trigram, rowid, content, summary)
            VALUES ('delete', old.id, old.content, old.summary);
        INSERT INTO code_examples_fts(rowid, content, summary)
            VALUES (new.id, new.content, new.summary);
        INSERT INTO code_examples_trigram(rowid, content, summary)
            VALUES (new.id, new.content, new.summary);
    END;
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let _db = Database::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).unwrap();

        let conn = db.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();

        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_migrations_idempotent_on_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        drop(Database::new(&db_path).unwrap());
        let db = Database::new(&db_path).unwrap();

        let conn = db.get_conn().unwrap();
        let applied: i32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_schema_exists() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).unwrap();
        let conn = db.get_conn().unwrap();

        let tables = [
            "sources",
            "chunks",
            "code_examples",
            "chunks_fts",
            "chunks_trigram",
            "code_examples_fts",
            "code_examples_trigram",
        ];

        for table in tables {
            let count: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                    |row| row.get(0),
                )
                .unwrap();

            assert_eq!(count, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).unwrap();
        let conn = db.get_conn().unwrap();

        let fk_enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();

        assert_eq!(fk_enabled, 1);
    }

    #[test]
    fn test_embedding_check_constraints() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).unwrap();
        let conn = db.get_conn().unwrap();

        conn.execute(
            "INSERT INTO sources (source_id, created_at) VALUES ('s1', 0)",
            [],
        )
        .unwrap();

        // Dimension tag without a blob
        let tag_only = conn.execute(
            "INSERT INTO chunks (url, chunk_number, content, source_id, embedding_dim)
             VALUES ('u', 0, 'c', 's1', 384)",
            [],
        );
        assert!(tag_only.is_err());

        // Unsupported dimension
        let bad_dim = conn.execute(
            "INSERT INTO chunks (url, chunk_number, content, source_id, embedding_dim, embedding)
             VALUES ('u', 1, 'c', 's1', 512, zeroblob(2048))",
            [],
        );
        assert!(bad_dim.is_err());

        // Blob length disagrees with the tag
        let bad_len = conn.execute(
            "INSERT INTO chunks (url, chunk_number, content, source_id, embedding_dim, embedding)
             VALUES ('u', 2, 'c', 's1', 384, zeroblob(100))",
            [],
        );
        assert!(bad_len.is_err());

        let ok = conn.execute(
            "INSERT INTO chunks (url, chunk_number, content, source_id, embedding_dim, embedding)
             VALUES ('u', 3, 'c', 's1', 384, zeroblob(1536))",
            [],
        );
        assert!(ok.is_ok());
    }
}
