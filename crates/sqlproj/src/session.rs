//! Session lifecycle: one SQLite connection and one transaction per
//! session, serialized behind a single lock, mirroring
//! `agfs_plugin::handle::HandleRegistry`'s per-handle mutex with the same
//! `tokio::sync::Mutex<rusqlite::Connection>` idiom.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use agfs_core::{AgfsError, AgfsResult};

use crate::insert::bulk_insert as bulk_insert_rows;

#[derive(Debug)]
struct SessionState {
    conn: Connection,
    last_result: Option<String>,
    last_error: Option<String>,
    last_used: Instant,
    closed: bool,
}

#[derive(Debug)]
pub struct Session {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    /// Where this session was opened: `""` for a root-level session,
    /// `"<db>"` for a database-level session, `"<db>/<tbl>"` for a
    /// table-level one. Used only to filter directory listings back to
    /// the scope that created the session.
    pub scope: String,
    state: Mutex<SessionState>,
}

impl Session {
    fn touch(state: &mut SessionState) {
        state.last_used = Instant::now();
    }

    pub async fn ctl(&self, command: &str) -> AgfsResult<()> {
        let mut state = self.state.lock().await;
        Self::ensure_open(&state)?;
        Self::touch(&mut state);

        match command.trim() {
            "commit" => {
                state.conn.execute_batch("COMMIT; BEGIN;")?;
                Ok(())
            }
            "rollback" => {
                state.conn.execute_batch("ROLLBACK; BEGIN;")?;
                Ok(())
            }
            "close" => {
                let _ = state.conn.execute_batch("COMMIT;");
                state.closed = true;
                Ok(())
            }
            other => Err(AgfsError::invalid_argument(format!("unknown ctl command: {other}"))),
        }
    }

    pub async fn query(&self, sql: &str) -> AgfsResult<()> {
        let mut state = self.state.lock().await;
        Self::ensure_open(&state)?;
        Self::touch(&mut state);

        match run_query(&state.conn, sql) {
            Ok(payload) => {
                state.last_result = Some(format!("{payload}\n"));
                state.last_error = None;
            }
            Err(e) => {
                state.last_result = None;
                state.last_error = Some(e.to_string());
            }
        }
        Ok(())
    }

    pub async fn bulk_insert(&self, table: &str, json: &str) -> AgfsResult<usize> {
        let mut state = self.state.lock().await;
        Self::ensure_open(&state)?;
        Self::touch(&mut state);
        match bulk_insert_rows(&state.conn, table, json) {
            Ok(n) => {
                state.last_result =
                    Some(format!("{}\n", serde_json::json!({ "inserted_count": n })));
                state.last_error = None;
                Ok(n)
            }
            Err(e) => {
                state.last_result = None;
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    pub async fn result(&self) -> AgfsResult<String> {
        let mut state = self.state.lock().await;
        Self::ensure_open(&state)?;
        Self::touch(&mut state);
        Ok(state.last_result.clone().unwrap_or_default())
    }

    pub async fn error(&self) -> AgfsResult<String> {
        let mut state = self.state.lock().await;
        Self::ensure_open(&state)?;
        Self::touch(&mut state);
        Ok(state.last_error.clone().unwrap_or_default())
    }

    pub async fn is_idle_past(&self, timeout: Duration) -> bool {
        let state = self.state.lock().await;
        state.last_used.elapsed() > timeout
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    async fn close_internal(&self) {
        let mut state = self.state.lock().await;
        if !state.closed {
            let _ = state.conn.execute_batch("ROLLBACK;");
            state.closed = true;
        }
    }

    fn ensure_open(state: &SessionState) -> AgfsResult<()> {
        if state.closed {
            Err(AgfsError::not_found("session is closed"))
        } else {
            Ok(())
        }
    }
}

fn run_query(conn: &Connection, sql: &str) -> rusqlite::Result<String> {
    if is_row_returning(sql) {
        let mut stmt = conn.prepare(sql)?;
        let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let rows = stmt.query_map([], |row| {
            let mut map = serde_json::Map::new();
            for (i, name) in column_names.iter().enumerate() {
                let value: rusqlite::types::Value = row.get(i)?;
                map.insert(name.clone(), sqlite_value_to_json(value));
            }
            Ok(serde_json::Value::Object(map))
        })?;
        let values: Vec<serde_json::Value> = rows.collect::<Result<_, _>>()?;
        Ok(serde_json::to_string(&values).unwrap_or_else(|_| "[]".to_string()))
    } else {
        conn.execute(sql, [])?;
        Ok(serde_json::json!({
            "rows_affected": conn.changes(),
            "last_insert_id": conn.last_insert_rowid(),
        })
        .to_string())
    }
}

/// `SELECT`/`SHOW`/`DESCRIBE`/`EXPLAIN` return rows; everything else
/// (`INSERT`/`UPDATE`/`DELETE`/DDL) reports rows affected instead.
fn is_row_returning(sql: &str) -> bool {
    let trimmed = sql.trim_start().to_ascii_uppercase();
    trimmed.starts_with("SELECT")
        || trimmed.starts_with("SHOW")
        || trimmed.starts_with("DESCRIBE")
        || trimmed.starts_with("EXPLAIN")
}

pub fn sqlite_value_to_json(value: rusqlite::types::Value) -> serde_json::Value {
    use rusqlite::types::Value as V;
    match value {
        V::Null => serde_json::Value::Null,
        V::Integer(i) => serde_json::Value::from(i),
        V::Real(f) => serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        V::Text(s) => serde_json::Value::String(s),
        V::Blob(b) => serde_json::Value::String(format!("\\x{}", hex(&b))),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

static MEMORY_DB_COUNTER: AtomicU64 = AtomicU64::new(0);

fn derive_db_name(db_path: &str) -> String {
    if db_path == ":memory:" {
        return "memory".to_string();
    }
    PathBuf::from(db_path)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "db".to_string())
}

/// Per-database session table, table metadata lookups, and the
/// idle-timeout sweeper. Every connection this registry hands out — one
/// per session plus the ad hoc ones used for table metadata — points at
/// the same backing store: a shared-cache `file:` URI for `:memory:`
/// mounts (so sessions and metadata queries actually see each other's
/// committed state), or the same on-disk file otherwise.
pub struct SessionRegistry {
    db_path: String,
    db_name: String,
    memory_uri: Option<String>,
    sessions: RwLock<HashMap<i64, Arc<Session>>>,
    next_id: AtomicI64,
    idle_timeout: Duration,
}

pub struct SweeperHandle {
    task: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl SweeperHandle {
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

impl SessionRegistry {
    pub fn new(db_path: impl Into<String>, idle_timeout: Duration) -> Arc<Self> {
        let db_path = db_path.into();
        let memory_uri = (db_path == ":memory:").then(|| {
            let slot = MEMORY_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
            format!("file:agfs_sqlproj_{slot}?mode=memory&cache=shared")
        });
        let db_name = derive_db_name(&db_path);
        Arc::new(Self {
            db_path,
            db_name,
            memory_uri,
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            idle_timeout,
        })
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    fn connect(&self) -> rusqlite::Result<Connection> {
        match &self.memory_uri {
            Some(uri) => Connection::open_with_flags(
                uri,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            ),
            None => {
                if let Some(parent) = PathBuf::from(&self.db_path).parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                Connection::open(&self.db_path)
            }
        }
    }

    pub async fn open(&self, scope: impl Into<String>) -> AgfsResult<i64> {
        let conn = self.connect()?;
        conn.execute_batch("BEGIN;")?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(Session {
            id,
            created_at: Utc::now(),
            scope: scope.into(),
            state: Mutex::new(SessionState {
                conn,
                last_result: None,
                last_error: None,
                last_used: Instant::now(),
                closed: false,
            }),
        });
        self.sessions.write().await.insert(id, session);
        Ok(id)
    }

    pub async fn get(&self, id: i64) -> AgfsResult<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AgfsError::not_found(format!("session {id}")))
    }

    pub async fn close(&self, id: i64) -> AgfsResult<()> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions.remove(&id).ok_or_else(|| AgfsError::not_found(format!("session {id}")))?
        };
        session.close_internal().await;
        Ok(())
    }

    pub async fn list_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.sessions.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn list_ids_in_scope(&self, scope: &str) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.scope == scope)
            .map(|s| s.id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub async fn close_all(&self) {
        let mut sessions = self.sessions.write().await;
        for (_, session) in sessions.drain() {
            session.close_internal().await;
        }
    }

    /// `tableExists` check run before allocating a table-scoped session.
    pub async fn table_exists(&self, table: &str) -> AgfsResult<bool> {
        let conn = self.connect()?;
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    pub async fn list_tables(&self) -> AgfsResult<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")?;
        let names: Vec<String> = stmt.query_map([], |row| row.get(0))?.collect::<Result<_, _>>()?;
        Ok(names)
    }

    pub async fn table_schema(&self, table: &str) -> AgfsResult<String> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .map_err(|_| AgfsError::not_found(format!("table {table}")))
    }

    pub async fn table_count(&self, table: &str) -> AgfsResult<i64> {
        let conn = self.connect()?;
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
            .map_err(AgfsError::from)
    }

    /// Spawns the idle-timeout sweeper: wakes at half the configured
    /// timeout and closes any session that has been untouched longer
    /// than the full timeout.
    pub fn spawn_sweeper(self: &Arc<Self>) -> SweeperHandle {
        let registry = self.clone();
        let interval_period = (self.idle_timeout / 2).max(Duration::from_millis(50));
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let stale: Vec<i64> = {
                            let sessions = registry.sessions.read().await;
                            let mut stale = Vec::new();
                            for (id, session) in sessions.iter() {
                                if session.is_idle_past(registry.idle_timeout).await {
                                    stale.push(*id);
                                }
                            }
                            stale
                        };
                        for id in stale {
                            tracing::debug!(session_id = id, "closing idle sql session");
                            let _ = registry.close(id).await;
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });

        SweeperHandle { task, stop: stop_tx }
    }
}
