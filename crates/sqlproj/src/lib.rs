//! SQL projection backend: mounts one SQLite database as a Plan-9-style
//! session filesystem. Unlike [`agfs_memfs`], this backend does not
//! implement `HandleFS` — sessions, not positioned file handles, are its
//! stateful primitive, with a ctl/query/result protocol replacing
//! open/read/write/seek for this backend.

pub mod grammar;
pub mod insert;
pub mod session;

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use agfs_core::{AgfsError, AgfsResult, FileInfo, Meta, WriteFlags};
use agfs_plugin::filesystem::{Filesystem, ReadResult};

use grammar::{parse, SessionFile, SqlPath};
use session::{SessionRegistry, SweeperHandle};

pub const BACKEND_NAME: &str = "sqlproj";

pub struct SqlProjFs {
    sessions: std::sync::Arc<SessionRegistry>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl SqlProjFs {
    pub fn new(db_path: impl Into<String>, idle_timeout: Duration) -> Self {
        let sessions = SessionRegistry::new(db_path, idle_timeout);
        Self { sessions, sweeper: Mutex::new(None) }
    }

    fn meta() -> Meta {
        Meta::new(BACKEND_NAME, "sqlproj")
    }

    fn synth_dir(name: &str) -> FileInfo {
        FileInfo::dir(name, Utc::now(), Self::meta())
    }

    fn synth_file(name: &str, contents_len: i64) -> FileInfo {
        FileInfo::file(name, contents_len, Utc::now(), Self::meta())
    }

    fn check_db(&self, db: &str) -> AgfsResult<()> {
        if db == self.sessions.db_name() {
            Ok(())
        } else {
            Err(AgfsError::not_found(format!("no such database: {db}")))
        }
    }

    async fn check_table(&self, table: &str) -> AgfsResult<()> {
        if self.sessions.table_exists(table).await? {
            Ok(())
        } else {
            Err(AgfsError::not_found(format!("no such table: {table}")))
        }
    }

    fn write_only(path: &str) -> AgfsError {
        AgfsError::permission_denied(format!("{path} is write-only"))
    }

    fn read_only(path: &str) -> AgfsError {
        AgfsError::permission_denied(format!("{path} is read-only"))
    }
}

#[async_trait]
impl Filesystem for SqlProjFs {
    async fn initialize(&self, _config: &std::collections::HashMap<String, String>) -> AgfsResult<()> {
        *self.sweeper.lock().await = Some(self.sessions.spawn_sweeper());
        Ok(())
    }

    async fn shutdown(&self) -> AgfsResult<()> {
        if let Some(handle) = self.sweeper.lock().await.take() {
            handle.stop().await;
        }
        self.sessions.close_all().await;
        Ok(())
    }

    async fn create(&self, path: &str) -> AgfsResult<()> {
        Err(AgfsError::not_supported(format!("cannot create {path}: read a ctl file to open a session")))
    }

    async fn mkdir(&self, path: &str, _mode: u32) -> AgfsResult<()> {
        Err(AgfsError::not_supported(format!("cannot mkdir {path}")))
    }

    async fn remove(&self, path: &str) -> AgfsResult<()> {
        match parse(path)? {
            SqlPath::SessionDir { sid }
            | SqlPath::DatabaseSessionDir { sid, .. }
            | SqlPath::TableSessionDir { sid, .. } => self.sessions.close(sid).await,
            _ => Err(AgfsError::not_supported(format!("cannot remove {path}"))),
        }
    }

    async fn remove_all(&self, path: &str) -> AgfsResult<()> {
        self.remove(path).await
    }

    async fn read(&self, path: &str, offset: i64, size: i64) -> AgfsResult<ReadResult> {
        let text = match parse(path)? {
            SqlPath::RootCtl => {
                let id = self.sessions.open("").await?;
                format!("{id}\n")
            }
            SqlPath::DatabaseCtl { db } => {
                self.check_db(&db)?;
                let id = self.sessions.open(db).await?;
                format!("{id}\n")
            }
            SqlPath::TableCtl { db, tbl } => {
                self.check_db(&db)?;
                self.check_table(&tbl).await?;
                let id = self.sessions.open(format!("{db}/{tbl}")).await?;
                format!("{id}\n")
            }
            SqlPath::TableSchema { db, tbl } => {
                self.check_db(&db)?;
                self.sessions.table_schema(&tbl).await?
            }
            SqlPath::TableCount { db, tbl } => {
                self.check_db(&db)?;
                self.check_table(&tbl).await?;
                self.sessions.table_count(&tbl).await?.to_string()
            }
            SqlPath::Session { sid, file } => {
                let session = self.sessions.get(sid).await?;
                read_session_file(&session, file, path).await?
            }
            SqlPath::DatabaseSession { db, sid, file } => {
                self.check_db(&db)?;
                let session = self.sessions.get(sid).await?;
                read_session_file(&session, file, path).await?
            }
            SqlPath::TableSession { db, tbl, sid, file } => {
                self.check_db(&db)?;
                self.check_table(&tbl).await?;
                let session = self.sessions.get(sid).await?;
                read_session_file(&session, file, path).await?
            }
            SqlPath::Root
            | SqlPath::Database { .. }
            | SqlPath::Table { .. }
            | SqlPath::SessionDir { .. }
            | SqlPath::DatabaseSessionDir { .. }
            | SqlPath::TableSessionDir { .. } => {
                return Err(AgfsError::invalid_argument(format!("{path} is a directory")));
            }
        };
        slice(text.into_bytes(), offset, size)
    }

    async fn write(
        &self,
        path: &str,
        data: &[u8],
        _offset: i64,
        _flags: WriteFlags,
    ) -> AgfsResult<usize> {
        let text = String::from_utf8(data.to_vec())
            .map_err(|e| AgfsError::invalid_argument(format!("not utf-8: {e}")))?;

        match parse(path)? {
            SqlPath::RootCtl | SqlPath::DatabaseCtl { .. } | SqlPath::TableCtl { .. } => {
                return Err(Self::write_only(path));
            }
            SqlPath::Session { sid, file } => {
                let session = self.sessions.get(sid).await?;
                write_session_file(&session, file, &text, None, path).await?;
            }
            SqlPath::DatabaseSession { db, sid, file } => {
                self.check_db(&db)?;
                let session = self.sessions.get(sid).await?;
                write_session_file(&session, file, &text, None, path).await?;
            }
            SqlPath::TableSession { db, tbl, sid, file } => {
                self.check_db(&db)?;
                let session = self.sessions.get(sid).await?;
                write_session_file(&session, file, &text, Some(tbl.as_str()), path).await?;
            }
            SqlPath::TableSchema { .. } | SqlPath::TableCount { .. } => {
                return Err(Self::read_only(path));
            }
            SqlPath::Root
            | SqlPath::Database { .. }
            | SqlPath::Table { .. }
            | SqlPath::SessionDir { .. }
            | SqlPath::DatabaseSessionDir { .. }
            | SqlPath::TableSessionDir { .. } => {
                return Err(AgfsError::invalid_argument(format!("{path} is a directory")));
            }
        }
        Ok(data.len())
    }

    async fn read_dir(&self, path: &str) -> AgfsResult<Vec<FileInfo>> {
        match parse(path)? {
            SqlPath::Root => {
                let mut entries = vec![Self::synth_file("ctl", 0), Self::synth_dir(self.sessions.db_name())];
                for id in self.sessions.list_ids_in_scope("").await {
                    entries.push(Self::synth_dir(&id.to_string()));
                }
                Ok(entries)
            }
            SqlPath::Database { name } => {
                self.check_db(&name)?;
                let mut entries = vec![Self::synth_file("ctl", 0)];
                for table in self.sessions.list_tables().await? {
                    entries.push(Self::synth_dir(&table));
                }
                for id in self.sessions.list_ids_in_scope(&name).await {
                    entries.push(Self::synth_dir(&id.to_string()));
                }
                Ok(entries)
            }
            SqlPath::Table { db, tbl } => {
                self.check_db(&db)?;
                self.check_table(&tbl).await?;
                let mut entries = vec![
                    Self::synth_file("ctl", 0),
                    Self::synth_file("schema", 0),
                    Self::synth_file("count", 0),
                ];
                let scope = format!("{db}/{tbl}");
                for id in self.sessions.list_ids_in_scope(&scope).await {
                    entries.push(Self::synth_dir(&id.to_string()));
                }
                Ok(entries)
            }
            SqlPath::SessionDir { sid } => {
                self.sessions.get(sid).await?;
                Ok(SessionFile::BASE.iter().map(|f| Self::synth_file(f.name(), 0)).collect())
            }
            SqlPath::DatabaseSessionDir { db, sid } => {
                self.check_db(&db)?;
                self.sessions.get(sid).await?;
                Ok(SessionFile::BASE.iter().map(|f| Self::synth_file(f.name(), 0)).collect())
            }
            SqlPath::TableSessionDir { db, tbl, sid } => {
                self.check_db(&db)?;
                self.check_table(&tbl).await?;
                self.sessions.get(sid).await?;
                Ok(SessionFile::TABLE_SCOPED.iter().map(|f| Self::synth_file(f.name(), 0)).collect())
            }
            SqlPath::RootCtl
            | SqlPath::DatabaseCtl { .. }
            | SqlPath::TableCtl { .. }
            | SqlPath::TableSchema { .. }
            | SqlPath::TableCount { .. }
            | SqlPath::Session { .. }
            | SqlPath::DatabaseSession { .. }
            | SqlPath::TableSession { .. } => {
                Err(AgfsError::invalid_argument(format!("{path} is not a directory")))
            }
        }
    }

    async fn stat(&self, path: &str) -> AgfsResult<FileInfo> {
        match parse(path)? {
            SqlPath::Root => Ok(Self::synth_dir("/")),
            SqlPath::RootCtl => Ok(Self::synth_file("ctl", 0)),
            SqlPath::Database { name } => {
                self.check_db(&name)?;
                Ok(Self::synth_dir(&name))
            }
            SqlPath::DatabaseCtl { db } => {
                self.check_db(&db)?;
                Ok(Self::synth_file("ctl", 0))
            }
            SqlPath::TableCtl { db, tbl } => {
                self.check_db(&db)?;
                self.check_table(&tbl).await?;
                Ok(Self::synth_file("ctl", 0))
            }
            SqlPath::Table { db, tbl } => {
                self.check_db(&db)?;
                self.check_table(&tbl).await?;
                Ok(Self::synth_dir(&tbl))
            }
            SqlPath::TableSchema { db, tbl } => {
                self.check_db(&db)?;
                self.check_table(&tbl).await?;
                Ok(Self::synth_file("schema", 0))
            }
            SqlPath::TableCount { db, tbl } => {
                self.check_db(&db)?;
                self.check_table(&tbl).await?;
                Ok(Self::synth_file("count", 0))
            }
            SqlPath::SessionDir { sid } => {
                self.sessions.get(sid).await?;
                Ok(Self::synth_dir(&sid.to_string()))
            }
            SqlPath::DatabaseSessionDir { db, sid } => {
                self.check_db(&db)?;
                self.sessions.get(sid).await?;
                Ok(Self::synth_dir(&sid.to_string()))
            }
            SqlPath::TableSessionDir { db, tbl, sid } => {
                self.check_db(&db)?;
                self.check_table(&tbl).await?;
                self.sessions.get(sid).await?;
                Ok(Self::synth_dir(&sid.to_string()))
            }
            SqlPath::Session { sid, file } => {
                self.sessions.get(sid).await?;
                Ok(Self::synth_file(file.name(), 0))
            }
            SqlPath::DatabaseSession { db, sid, file } => {
                self.check_db(&db)?;
                self.sessions.get(sid).await?;
                Ok(Self::synth_file(file.name(), 0))
            }
            SqlPath::TableSession { db, tbl, sid, file } => {
                self.check_db(&db)?;
                self.check_table(&tbl).await?;
                self.sessions.get(sid).await?;
                Ok(Self::synth_file(file.name(), 0))
            }
        }
    }

    async fn rename(&self, old: &str, _new: &str) -> AgfsResult<()> {
        Err(AgfsError::not_supported(format!("cannot rename {old}")))
    }

    async fn chmod(&self, path: &str, _mode: u32) -> AgfsResult<()> {
        Err(AgfsError::not_supported(format!("cannot chmod {path}")))
    }

    fn backend_name(&self) -> &str {
        BACKEND_NAME
    }
}

async fn read_session_file(
    session: &session::Session,
    file: SessionFile,
    path: &str,
) -> AgfsResult<String> {
    match file {
        SessionFile::Result => session.result().await,
        SessionFile::Error => session.error().await,
        SessionFile::Ctl | SessionFile::Query | SessionFile::Data => {
            Err(SqlProjFs::write_only(path))
        }
    }
}

async fn write_session_file(
    session: &session::Session,
    file: SessionFile,
    text: &str,
    table: Option<&str>,
    path: &str,
) -> AgfsResult<()> {
    match file {
        SessionFile::Ctl => session.ctl(text).await,
        SessionFile::Query => session.query(text).await,
        SessionFile::Data => {
            let table = table
                .ok_or_else(|| AgfsError::invalid_argument(format!("{path}: data is table-scoped only")))?;
            session.bulk_insert(table, text).await.map(|_| ())
        }
        SessionFile::Result | SessionFile::Error => Err(SqlProjFs::read_only(path)),
    }
}

fn slice(bytes: Vec<u8>, offset: i64, size: i64) -> AgfsResult<ReadResult> {
    let offset = offset.max(0) as usize;
    if offset >= bytes.len() {
        return Ok(ReadResult { data: vec![], eof: true });
    }
    let end = if size < 0 { bytes.len() } else { (offset + size as usize).min(bytes.len()) };
    Ok(ReadResult { data: bytes[offset..end].to_vec(), eof: end == bytes.len() })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn fs() -> SqlProjFs {
        let fs = SqlProjFs::new(":memory:", Duration::from_secs(60));
        fs.initialize(&Default::default()).await.unwrap();
        fs
    }

    fn db_name(fs: &SqlProjFs) -> String {
        fs.sessions.db_name().to_string()
    }

    #[tokio::test]
    async fn reading_root_ctl_creates_a_session() {
        let fs = fs().await;
        let r = fs.read("/ctl", 0, -1).await.unwrap();
        assert_eq!(String::from_utf8(r.data).unwrap(), "1\n");
        let entries = fs.read_dir("/").await.unwrap();
        assert!(entries.iter().any(|e| e.name == "1"));
    }

    #[tokio::test]
    async fn table_scoped_session_roundtrip() {
        let fs = fs().await;
        let db = db_name(&fs);

        let r = fs.read(&format!("/{db}/ctl"), 0, -1).await.unwrap();
        let sid = String::from_utf8(r.data).unwrap().trim().to_string();
        let session_path = format!("/{db}/{sid}");
        fs.write(
            &format!("{session_path}/query"),
            b"CREATE TABLE users (id INTEGER, name TEXT)",
            -1,
            WriteFlags::new(0),
        )
        .await
        .unwrap();
        fs.write(&format!("{session_path}/ctl"), b"commit", -1, WriteFlags::new(0)).await.unwrap();

        let table_ctl = format!("/{db}/users/ctl");
        let r = fs.read(&table_ctl, 0, -1).await.unwrap();
        let tsid = String::from_utf8(r.data).unwrap();
        assert_eq!(tsid, "2\n");
        let tpath = format!("/{db}/users/2");

        fs.write(
            &format!("{tpath}/data"),
            br#"[{"id":1,"name":"alice"},{"id":2,"name":"bob"}]"#,
            -1,
            WriteFlags::new(0),
        )
        .await
        .unwrap();
        let result = fs.read(&format!("{tpath}/result"), 0, -1).await.unwrap();
        assert_eq!(String::from_utf8(result.data).unwrap(), "{\"inserted_count\":2}\n");

        fs.write(&format!("{tpath}/query"), b"SELECT id FROM users ORDER BY id", -1, WriteFlags::new(0))
            .await
            .unwrap();
        let result = fs.read(&format!("{tpath}/result"), 0, -1).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&result.data).unwrap();
        assert_eq!(value[0]["id"], 1);
        assert_eq!(value[1]["id"], 2);

        let count = fs.read(&format!("/{db}/users/count"), 0, -1).await.unwrap();
        assert_eq!(String::from_utf8(count.data).unwrap(), "2");
    }

    #[tokio::test]
    async fn non_select_reports_rows_affected() {
        let fs = fs().await;
        let db = db_name(&fs);
        let r = fs.read(&format!("/{db}/ctl"), 0, -1).await.unwrap();
        let sid = String::from_utf8(r.data).unwrap().trim().to_string();
        let session_path = format!("/{db}/{sid}");
        fs.write(&format!("{session_path}/query"), b"CREATE TABLE t (a INTEGER)", -1, WriteFlags::new(0))
            .await
            .unwrap();
        fs.write(&format!("{session_path}/query"), b"INSERT INTO t VALUES (9)", -1, WriteFlags::new(0))
            .await
            .unwrap();
        let result = fs.read(&format!("{session_path}/result"), 0, -1).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&result.data).unwrap();
        assert_eq!(value["rows_affected"], 1);
        assert_eq!(value["last_insert_id"], 9);
    }

    #[tokio::test]
    async fn writing_ctl_to_open_a_session_is_rejected() {
        let fs = fs().await;
        let err = fs.write("/ctl", b"open", -1, WriteFlags::new(0)).await.unwrap_err();
        assert!(matches!(err, AgfsError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn reading_write_only_files_is_permission_denied() {
        let fs = fs().await;
        let r = fs.read("/ctl", 0, -1).await.unwrap();
        let sid = String::from_utf8(r.data).unwrap().trim().to_string();
        let err = fs.read(&format!("/{sid}/query"), 0, -1).await.unwrap_err();
        assert!(matches!(err, AgfsError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn writing_read_only_files_is_permission_denied() {
        let fs = fs().await;
        let r = fs.read("/ctl", 0, -1).await.unwrap();
        let sid = String::from_utf8(r.data).unwrap().trim().to_string();
        let err = fs
            .write(&format!("/{sid}/result"), b"x", -1, WriteFlags::new(0))
            .await
            .unwrap_err();
        assert!(matches!(err, AgfsError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn unknown_database_is_not_found() {
        let fs = fs().await;
        assert!(fs.read("/bogus/ctl", 0, -1).await.is_err());
    }

    #[tokio::test]
    async fn remove_session_closes_it() {
        let fs = fs().await;
        let r = fs.read("/ctl", 0, -1).await.unwrap();
        let sid = String::from_utf8(r.data).unwrap().trim().to_string();
        fs.remove(&format!("/{sid}")).await.unwrap();
        assert!(fs.stat(&format!("/{sid}")).await.is_err());
    }
}
