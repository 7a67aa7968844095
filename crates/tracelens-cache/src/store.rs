use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};

use tracelens_types::{FileSignature, Session};

use crate::Result;

// Schema version (increment when changing table definitions)
pub const SCHEMA_VERSION: i32 = 1;

// NOTE: Store Design Rationale
//
// Why raw logs stay the source of truth:
// - The cache only ever saves recomputation cost; deleting it loses nothing
// - A lookup is a hit only when every signature field matches the file as it
//   exists right now, content hash included
// - Anything unreadable or inconsistent in the store is a miss, never a
//   failure surfaced to the pipeline
//
// Why a single-statement UPSERT per slot:
// - SQLite commits it atomically; a concurrent reader sees the old row or
//   the new row, never a torn mixture
// - Two workers racing on the same path (one file reachable from two scan
//   roots) serialize on the connection and the last commit wins

/// Aggregate figures for the `cache stats` surface
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entries: usize,
    pub db_path: PathBuf,
    pub db_size_bytes: u64,
}

pub struct Store {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

impl Store {
    /// Open (or create) the cache database at `db_path`.
    ///
    /// A database file that cannot be opened or initialized is removed and
    /// recreated: the cache is rebuildable from source, so a corrupt store
    /// must cost a full recompute, not the run.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = match open_and_init(db_path) {
            Ok(conn) => conn,
            Err(_) => {
                remove_db_files(db_path);
                open_and_init(db_path)?
            }
        };

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Look up the cached session for a file signature.
    ///
    /// Returns `Some` only when the stored signature equals the given one
    /// field for field. A partial match (same size, different hash) and an
    /// undeserializable payload are both misses; the latter also clears the
    /// slot so the next store starts clean.
    pub fn lookup(&self, signature: &FileSignature) -> Result<Option<Session>> {
        let conn = self.lock();
        let key = path_key(&signature.path);

        let row: Option<(i64, String, String, String)> = conn
            .query_row(
                r#"
                SELECT file_size, mod_time, content_hash, session_json
                FROM session_cache
                WHERE path = ?1
                "#,
                [&key],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((file_size, mod_time, content_hash, session_json)) = row else {
            return Ok(None);
        };

        if file_size != signature.file_size as i64
            || mod_time != signature.mod_time
            || content_hash != signature.content_hash
        {
            return Ok(None);
        }

        match serde_json::from_str::<Session>(&session_json) {
            Ok(session) => Ok(Some(session)),
            Err(_) => {
                conn.execute("DELETE FROM session_cache WHERE path = ?1", [&key])?;
                Ok(None)
            }
        }
    }

    /// Commit a session under a file signature.
    ///
    /// Storing the same signature and session again is a no-op in effect; a
    /// different session for an existing path overwrites in one atomic
    /// statement.
    pub fn store(&self, signature: &FileSignature, session: &Session) -> Result<()> {
        let session_json = serde_json::to_string(session)?;
        let cached_at = chrono::Utc::now().to_rfc3339();

        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO session_cache (path, file_size, mod_time, content_hash, session_json, cached_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(path) DO UPDATE SET
                file_size = ?2,
                mod_time = ?3,
                content_hash = ?4,
                session_json = ?5,
                cached_at = ?6
            "#,
            params![
                path_key(&signature.path),
                signature.file_size as i64,
                &signature.mod_time,
                &signature.content_hash,
                &session_json,
                &cached_at,
            ],
        )?;

        Ok(())
    }

    /// Remove entries whose source file was not seen by the latest
    /// discovery pass. Entries are never evicted while their file still
    /// exists: recomputation cost, not staleness, is what the cache guards
    /// against.
    pub fn evict_missing(&self, live_paths: &HashSet<PathBuf>) -> Result<usize> {
        let live: HashSet<String> = live_paths.iter().map(|p| path_key(p)).collect();

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let dead: Vec<String> = {
            let mut stmt = tx.prepare("SELECT path FROM session_cache")?;
            let paths = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            paths.into_iter().filter(|p| !live.contains(p)).collect()
        };

        for path in &dead {
            tx.execute("DELETE FROM session_cache WHERE path = ?1", [path])?;
        }
        tx.commit()?;

        Ok(dead.len())
    }

    /// Drop every entry
    pub fn clear(&self) -> Result<usize> {
        let conn = self.lock();
        let removed = conn.execute("DELETE FROM session_cache", [])?;
        Ok(removed)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let entries: i64 = {
            let conn = self.lock();
            conn.query_row("SELECT COUNT(*) FROM session_cache", [], |row| row.get(0))?
        };

        let db_size_bytes = std::fs::metadata(&self.db_path)
            .map(|m| m.len())
            .unwrap_or(0);

        Ok(CacheStats {
            entries: entries as usize,
            db_path: self.db_path.clone(),
            db_size_bytes,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock only means another worker panicked mid-commit;
        // SQLite's own atomicity keeps the data consistent.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn open_and_init(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    // WAL keeps readers off the writer's back during commits
    conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
    init_schema(&conn)?;
    Ok(conn)
}

fn remove_db_files(db_path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        let mut os = db_path.as_os_str().to_os_string();
        os.push(suffix);
        let _ = std::fs::remove_file(PathBuf::from(os));
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    let current_version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    if current_version != SCHEMA_VERSION {
        conn.execute_batch("DROP TABLE IF EXISTS session_cache;")?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS session_cache (
            path TEXT PRIMARY KEY,
            file_size INTEGER NOT NULL,
            mod_time TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            session_json TEXT NOT NULL,
            cached_at TEXT
        );
        "#,
    )?;

    conn.execute(&format!("PRAGMA user_version = {}", SCHEMA_VERSION), [])?;

    Ok(())
}
