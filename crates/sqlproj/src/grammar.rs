//! Synthetic path grammar for the SQL projection backend: parse into a
//! tagged variant up front rather than string-chain checks scattered
//! through every operation.
//!
//! ```text
//! /                                    -> Root               (ctl + databases)
//! /ctl                                 -> RootCtl             (read to allocate a session)
//! /<sid>                               -> SessionDir          (root-level session)
//! /<sid>/{ctl,query,result,error}      -> Session
//! /<db>                                -> Database            (tables)
//! /<db>/ctl                            -> DatabaseCtl          (read to allocate a session)
//! /<db>/<sid>                          -> DatabaseSessionDir
//! /<db>/<sid>/{ctl,query,result,error} -> DatabaseSession
//! /<db>/<tbl>                          -> Table               (ctl + schema + count)
//! /<db>/<tbl>/ctl                      -> TableCtl             (read to allocate a session)
//! /<db>/<tbl>/schema                   -> TableSchema
//! /<db>/<tbl>/count                    -> TableCount
//! /<db>/<tbl>/<sid>                    -> TableSessionDir
//! /<db>/<tbl>/<sid>/{ctl,query,result,error,data} -> TableSession
//! ```
//!
//! A path segment that parses as `i64` is a session id; otherwise it names
//! a database or a table. `<db>` and `<tbl>` are never numeric as a result
//! — a numeric table or database name is simply unreachable through this
//! grammar, same tradeoff Plan-9 control-file schemes always make.

use agfs_core::{AgfsError, AgfsResult};

/// Files exposed inside a session directory. Root- and database-scoped
/// sessions expose the base four; table-scoped sessions add `data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFile {
    Ctl,
    Query,
    Result,
    Error,
    Data,
}

impl SessionFile {
    pub fn name(self) -> &'static str {
        match self {
            SessionFile::Ctl => "ctl",
            SessionFile::Query => "query",
            SessionFile::Result => "result",
            SessionFile::Error => "error",
            SessionFile::Data => "data",
        }
    }

    pub const BASE: [SessionFile; 4] =
        [SessionFile::Ctl, SessionFile::Query, SessionFile::Result, SessionFile::Error];

    pub const TABLE_SCOPED: [SessionFile; 5] = [
        SessionFile::Ctl,
        SessionFile::Query,
        SessionFile::Result,
        SessionFile::Error,
        SessionFile::Data,
    ];

    fn parse(s: &str, allow_data: bool) -> Option<Self> {
        let set: &[SessionFile] = if allow_data { &Self::TABLE_SCOPED } else { &Self::BASE };
        set.iter().copied().find(|f| f.name() == s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlPath {
    Root,
    RootCtl,
    SessionDir { sid: i64 },
    Session { sid: i64, file: SessionFile },
    Database { name: String },
    DatabaseCtl { db: String },
    DatabaseSessionDir { db: String, sid: i64 },
    DatabaseSession { db: String, sid: i64, file: SessionFile },
    Table { db: String, tbl: String },
    TableCtl { db: String, tbl: String },
    TableSchema { db: String, tbl: String },
    TableCount { db: String, tbl: String },
    TableSessionDir { db: String, tbl: String, sid: i64 },
    TableSession { db: String, tbl: String, sid: i64, file: SessionFile },
}

pub fn parse(path: &str) -> AgfsResult<SqlPath> {
    let normalized = agfs_core::normalize(path)?;
    let parts = agfs_core::path::components(&normalized);

    match parts.as_slice() {
        [] => Ok(SqlPath::Root),
        ["ctl"] => Ok(SqlPath::RootCtl),
        [seg] => match sid(seg) {
            Some(sid) => Ok(SqlPath::SessionDir { sid }),
            None => Ok(SqlPath::Database { name: seg.to_string() }),
        },
        [seg, file] if sid(seg).is_some() => {
            let sid = sid(seg).unwrap();
            let file = session_file(path, file, false)?;
            Ok(SqlPath::Session { sid, file })
        }
        [db, "ctl"] => Ok(SqlPath::DatabaseCtl { db: db.to_string() }),
        [db, seg] if sid(seg).is_some() => {
            Ok(SqlPath::DatabaseSessionDir { db: db.to_string(), sid: sid(seg).unwrap() })
        }
        [db, tbl] => Ok(SqlPath::Table { db: db.to_string(), tbl: tbl.to_string() }),
        [db, seg, file] if sid(seg).is_some() => {
            let file = session_file(path, file, false)?;
            Ok(SqlPath::DatabaseSession { db: db.to_string(), sid: sid(seg).unwrap(), file })
        }
        [db, tbl, "ctl"] => Ok(SqlPath::TableCtl { db: db.to_string(), tbl: tbl.to_string() }),
        [db, tbl, "schema"] => Ok(SqlPath::TableSchema { db: db.to_string(), tbl: tbl.to_string() }),
        [db, tbl, "count"] => Ok(SqlPath::TableCount { db: db.to_string(), tbl: tbl.to_string() }),
        [db, tbl, seg] if sid(seg).is_some() => Ok(SqlPath::TableSessionDir {
            db: db.to_string(),
            tbl: tbl.to_string(),
            sid: sid(seg).unwrap(),
        }),
        [db, tbl, seg, file] if sid(seg).is_some() => {
            let file = session_file(path, file, true)?;
            Ok(SqlPath::TableSession {
                db: db.to_string(),
                tbl: tbl.to_string(),
                sid: sid(seg).unwrap(),
                file,
            })
        }
        _ => Err(AgfsError::not_found(path.to_string())),
    }
}

fn sid(s: &str) -> Option<i64> {
    s.parse::<i64>().ok()
}

fn session_file(path: &str, name: &str, allow_data: bool) -> AgfsResult<SessionFile> {
    SessionFile::parse(name, allow_data).ok_or_else(|| AgfsError::not_found(path.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_root_and_root_session() {
        assert_eq!(parse("/").unwrap(), SqlPath::Root);
        assert_eq!(parse("/ctl").unwrap(), SqlPath::RootCtl);
        assert_eq!(parse("/17").unwrap(), SqlPath::SessionDir { sid: 17 });
        assert_eq!(
            parse("/17/query").unwrap(),
            SqlPath::Session { sid: 17, file: SessionFile::Query }
        );
    }

    #[test]
    fn parses_database_scope() {
        assert_eq!(parse("/mydb").unwrap(), SqlPath::Database { name: "mydb".to_string() });
        assert_eq!(parse("/mydb/ctl").unwrap(), SqlPath::DatabaseCtl { db: "mydb".to_string() });
        assert_eq!(
            parse("/mydb/5").unwrap(),
            SqlPath::DatabaseSessionDir { db: "mydb".to_string(), sid: 5 }
        );
        assert_eq!(
            parse("/mydb/5/result").unwrap(),
            SqlPath::DatabaseSession { db: "mydb".to_string(), sid: 5, file: SessionFile::Result }
        );
    }

    #[test]
    fn parses_table_scope() {
        assert_eq!(
            parse("/mydb/users").unwrap(),
            SqlPath::Table { db: "mydb".to_string(), tbl: "users".to_string() }
        );
        assert_eq!(
            parse("/mydb/users/ctl").unwrap(),
            SqlPath::TableCtl { db: "mydb".to_string(), tbl: "users".to_string() }
        );
        assert_eq!(
            parse("/mydb/users/schema").unwrap(),
            SqlPath::TableSchema { db: "mydb".to_string(), tbl: "users".to_string() }
        );
        assert_eq!(
            parse("/mydb/users/count").unwrap(),
            SqlPath::TableCount { db: "mydb".to_string(), tbl: "users".to_string() }
        );
        assert_eq!(
            parse("/mydb/users/17").unwrap(),
            SqlPath::TableSessionDir { db: "mydb".to_string(), tbl: "users".to_string(), sid: 17 }
        );
        assert_eq!(
            parse("/mydb/users/17/query").unwrap(),
            SqlPath::TableSession {
                db: "mydb".to_string(),
                tbl: "users".to_string(),
                sid: 17,
                file: SessionFile::Query,
            }
        );
        assert_eq!(
            parse("/mydb/users/17/data").unwrap(),
            SqlPath::TableSession {
                db: "mydb".to_string(),
                tbl: "users".to_string(),
                sid: 17,
                file: SessionFile::Data,
            }
        );
    }

    #[test]
    fn data_file_is_table_scope_only() {
        assert!(parse("/17/data").is_err());
        assert!(parse("/mydb/5/data").is_err());
    }

    #[test]
    fn rejects_unknown_shapes() {
        assert!(parse("/mydb/users/17/bogus").is_err());
        assert!(parse("/mydb/users/17/query/extra").is_err());
    }
}
