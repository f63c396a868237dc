//! SQLite access shared by the SQL and visualization tools

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, InterruptHandle, OpenFlags};

/// Rows read for a `sql_db_query` observation
pub const MAX_RESULT_ROWS: usize = 100;

/// Rows sampled per table in `schema`
const SAMPLE_ROWS: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("Unsupported database URL '{0}': only sqlite:///path, sqlite://path or a file path are accepted")]
    UnsupportedScheme(String),

    #[error("Database file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Query timed out after {0}s")]
    Timeout(u64),

    #[error("table_names {{{0}}} not found in database")]
    UnknownTables(String),

    #[error("database task failed: {0}")]
    Join(String),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

/// Resolve a database URL to a file path.
///
/// `sqlite:///data/shop.db` is the relative path `data/shop.db`;
/// `sqlite:////var/shop.db` is absolute.
pub fn parse_database_url(url: &str) -> DbResult<PathBuf> {
    let url = url.trim();
    if let Some(path) = url.strip_prefix("sqlite:///") {
        return non_empty(path, url);
    }
    if let Some(path) = url.strip_prefix("sqlite://") {
        return non_empty(path, url);
    }
    if url.contains("://") || url.is_empty() {
        return Err(DbError::UnsupportedScheme(url.to_string()));
    }
    Ok(PathBuf::from(url))
}

fn non_empty(path: &str, url: &str) -> DbResult<PathBuf> {
    if path.is_empty() {
        Err(DbError::UnsupportedScheme(url.to_string()))
    } else {
        Ok(PathBuf::from(path))
    }
}

/// Result set with values kept typed for the chart tool
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// More rows were available than were read
    pub truncated: bool,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Whether every non-null value in the column is a number
    pub fn is_numeric(&self, index: usize) -> bool {
        let mut seen = false;
        for row in &self.rows {
            match row.get(index) {
                Some(Value::Integer(_)) | Some(Value::Real(_)) => seen = true,
                Some(Value::Null) | None => {}
                _ => return false,
            }
        }
        seen
    }

    /// Render as an observation. A single cell is shown bare so that
    /// `SELECT COUNT(*)` reads as just the number.
    pub fn to_observation(&self) -> String {
        if self.rows.is_empty() {
            return "Query returned no rows.".to_string();
        }
        if self.columns.len() == 1 && self.rows.len() == 1 && !self.truncated {
            return format_value(&self.rows[0][0]);
        }

        let mut out = self.columns.join(" | ");
        for row in &self.rows {
            out.push('\n');
            let cells: Vec<String> = row.iter().map(format_value).collect();
            out.push_str(&cells.join(" | "));
        }
        if self.truncated {
            out.push_str(&format!(
                "\n... (result truncated to the first {} rows; use LIMIT or an aggregate)",
                self.rows.len()
            ));
        }
        out
    }
}

pub fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Real(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Blob(b) => format!("<blob {} bytes>", b.len()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKey {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
}

/// A single SQLite connection. Work runs on the blocking pool and is
/// interrupted when it exceeds the query timeout.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    path: PathBuf,
    query_timeout: Duration,
}

impl Database {
    /// Open an existing database file
    pub fn open(path: &Path, read_only: bool, query_timeout: Duration) -> DbResult<Self> {
        if !path.exists() {
            return Err(DbError::NotFound(path.to_path_buf()));
        }
        let flags = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX
        };
        let conn = Connection::open_with_flags(path, flags)?;
        let interrupt = Arc::new(conn.get_interrupt_handle());
        tracing::debug!("Opened database {} (read_only={})", path.display(), read_only);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt,
            path: path.to_path_buf(),
            query_timeout,
        })
    }

    /// Open from a `sqlite://` URL or a path
    pub fn open_url(url: &str, read_only: bool, query_timeout: Duration) -> DbResult<Self> {
        let path = parse_database_url(url)?;
        Self::open(&path, read_only, query_timeout)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> DbResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> DbResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        let task = tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        });

        match tokio::time::timeout(self.query_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(DbError::Join(e.to_string())),
            Err(_) => {
                self.interrupt.interrupt();
                Err(DbError::Timeout(self.query_timeout.as_secs()))
            }
        }
    }

    /// Names of user tables, sorted
    pub async fn table_names(&self) -> DbResult<Vec<String>> {
        self.with_conn(list_tables).await
    }

    /// `CREATE TABLE` statements with a few sample rows per table
    pub async fn schema(&self, tables: Vec<String>) -> DbResult<String> {
        self.with_conn(move |conn| {
            let known = list_tables(conn)?;
            let missing: Vec<&str> = tables
                .iter()
                .filter(|t| !known.contains(t))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(DbError::UnknownTables(missing.join(", ")));
            }

            let mut sections = Vec::with_capacity(tables.len());
            for table in &tables {
                let ddl: String = conn.query_row(
                    "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1",
                    [table],
                    |row| row.get(0),
                )?;
                let sample = query(
                    conn,
                    &format!("SELECT * FROM {} LIMIT {}", quote_ident(table), SAMPLE_ROWS),
                    SAMPLE_ROWS,
                )?;

                let mut section = format!(
                    "{}\n\n/*\n{} rows from {} table:\n{}",
                    ddl.trim(),
                    SAMPLE_ROWS,
                    table,
                    sample.columns.join("\t")
                );
                for row in &sample.rows {
                    let cells: Vec<String> = row.iter().map(format_value).collect();
                    section.push('\n');
                    section.push_str(&cells.join("\t"));
                }
                section.push_str("\n*/");
                sections.push(section);
            }
            Ok(sections.join("\n\n"))
        })
        .await
    }

    /// Run a statement and read at most `max_rows` rows
    pub async fn run_query(&self, sql: &str, max_rows: usize) -> DbResult<QueryResult> {
        let sql = sql.to_string();
        self.with_conn(move |conn| query(conn, &sql, max_rows)).await
    }

    /// Compile the statement without running it. Surfaces syntax errors and
    /// unknown tables or columns.
    pub async fn explain(&self, sql: &str) -> DbResult<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            conn.prepare(&format!("EXPLAIN {}", sql))?;
            Ok(())
        })
        .await
    }

    pub async fn columns(&self, table: &str) -> DbResult<Vec<ColumnInfo>> {
        let table = table.to_string();
        self.with_conn(move |conn| table_columns(conn, &table)).await
    }

    /// Foreign keys across all tables
    pub async fn foreign_keys(&self) -> DbResult<Vec<ForeignKey>> {
        self.with_conn(|conn| {
            let mut keys = Vec::new();
            for table in list_tables(conn)? {
                let mut stmt = conn.prepare(&format!(
                    "PRAGMA foreign_key_list({})",
                    quote_ident(&table)
                ))?;
                let rows = stmt.query_map([], |row| {
                    Ok(ForeignKey {
                        from_table: table.clone(),
                        to_table: row.get(2)?,
                        from_column: row.get(3)?,
                        // NULL when the parent's primary key is implied
                        to_column: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    })
                })?;
                for key in rows {
                    keys.push(key?);
                }
            }
            Ok(keys)
        })
        .await
    }
}

fn list_tables(conn: &Connection) -> DbResult<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master \
         WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(names)
}

fn table_columns(conn: &Connection, table: &str) -> DbResult<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                name: row.get(1)?,
                data_type: row.get(2)?,
                primary_key: row.get::<_, i64>(5)? > 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

fn query(conn: &Connection, sql: &str, max_rows: usize) -> DbResult<QueryResult> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut truncated = false;
    let mut cursor = stmt.query([])?;
    while let Some(row) = cursor.next()? {
        if rows.len() == max_rows {
            truncated = true;
            break;
        }
        let mut values = Vec::with_capacity(width);
        for i in 0..width {
            values.push(row.get::<_, Value>(i)?);
        }
        rows.push(values);
    }
    Ok(QueryResult {
        columns,
        rows,
        truncated,
    })
}

pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
