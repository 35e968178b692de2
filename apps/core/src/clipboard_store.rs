use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDateTime, TimeDelta, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};

use crate::clock::{Clock, SystemClock};
use crate::model::ClipboardItem;

const LOG_TARGET: &str = "clipboard";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
const ITEM_COLUMNS: &str = "id, content, content_hash, created_at, source_app, is_pinned";

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Sqlite(rusqlite::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(error) => write!(f, "io error: {error}"),
            Self::Sqlite(error) => write!(f, "sqlite error: {error}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Count and age caps applied after every insert. Both always apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_items: usize,
    pub max_age_days: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_items: 500,
            max_age_days: 30,
        }
    }
}

/// SQLite-backed clipboard history.
///
/// A connection is opened per operation, so a `ContentStore` can be cloned
/// freely and handed to worker threads without sharing a handle.
#[derive(Clone)]
pub struct ContentStore {
    db_path: PathBuf,
    retention: RetentionPolicy,
    clock: Arc<dyn Clock>,
}

impl ContentStore {
    pub fn open(db_path: impl Into<PathBuf>, retention: RetentionPolicy) -> Result<Self, StoreError> {
        Self::open_with_clock(db_path, retention, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        db_path: impl Into<PathBuf>,
        retention: RetentionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self {
            db_path,
            retention,
            clock,
        };
        let conn = store.connect()?;
        ensure_schema(&conn)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub fn add(&self, content: &str) -> Result<ClipboardItem, StoreError> {
        let item = ClipboardItem {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
            content_hash: content_hash(content),
            created_at: self.clock.now(),
            source_app: None,
            is_pinned: false,
        };

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO clipboard_items (id, content, content_hash, created_at, source_app, is_pinned)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                item.id,
                item.content,
                item.content_hash,
                format_timestamp(item.created_at),
                item.source_app,
                item.is_pinned as i64,
            ],
        )?;
        let removed = apply_retention(&tx, self.retention, self.clock.now())?;
        tx.commit()?;

        if removed > 0 {
            log::debug!(target: LOG_TARGET, "retention removed {removed} item(s)");
        }
        Ok(item)
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<ClipboardItem>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM clipboard_items
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![sql_limit(limit)], RawRow::read)?;
        collect_items(rows)
    }

    /// Items newer than `now - days`, keyed by local calendar date (`YYYY-MM-DD`).
    /// Each group is newest first.
    pub fn list_grouped_by_day(
        &self,
        days: u32,
    ) -> Result<BTreeMap<String, Vec<ClipboardItem>>, StoreError> {
        let cutoff = self.clock.now() - TimeDelta::days(i64::from(days));

        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM clipboard_items
             WHERE created_at >= ?1
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let rows = stmt.query_map(params![format_timestamp(cutoff)], RawRow::read)?;

        let mut grouped: BTreeMap<String, Vec<ClipboardItem>> = BTreeMap::new();
        for item in collect_items(rows)? {
            grouped.entry(day_key(&item.created_at)).or_default().push(item);
        }
        Ok(grouped)
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<ClipboardItem>, StoreError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return self.list_recent(limit);
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let pattern = format!("%{}%", escape_like(trimmed));
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ITEM_COLUMNS} FROM clipboard_items
             WHERE content LIKE ?1 ESCAPE '\\'
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![pattern, sql_limit(limit)], RawRow::read)?;
        collect_items(rows)
    }

    pub fn get(&self, id: &str) -> Result<Option<ClipboardItem>, StoreError> {
        let conn = self.connect()?;
        let raw = conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM clipboard_items WHERE id = ?1"),
                params![id],
                RawRow::read,
            )
            .optional()?;
        Ok(raw.and_then(RawRow::into_item))
    }

    /// Removes one row. A missing id is not an error; the return value says
    /// whether anything was deleted.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let conn = self.connect()?;
        let removed = conn.execute("DELETE FROM clipboard_items WHERE id = ?1", params![id])?;
        Ok(removed > 0)
    }

    pub fn clear_all(&self) -> Result<usize, StoreError> {
        let conn = self.connect()?;
        Ok(conn.execute("DELETE FROM clipboard_items", [])?)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM clipboard_items", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    pub fn hash_exists_within(&self, hash: &str, window: TimeDelta) -> Result<bool, StoreError> {
        let cutoff = self.clock.now() - window;
        let conn = self.connect()?;
        let exists: i64 = conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM clipboard_items
                WHERE content_hash = ?1 AND created_at >= ?2
             )",
            params![hash, format_timestamp(cutoff)],
            |row| row.get(0),
        )?;
        Ok(exists != 0)
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        Ok(Connection::open(&self.db_path)?)
    }
}

pub fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Fixed-width UTC text so lexical order matches time order in SQL.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| naive.and_utc())
}

pub fn day_key(at: &DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

fn ensure_schema(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS clipboard_items (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            created_at TEXT NOT NULL,
            source_app TEXT,
            is_pinned INTEGER NOT NULL DEFAULT 0
         );
         CREATE INDEX IF NOT EXISTS idx_clipboard_created_at ON clipboard_items(created_at DESC);
         CREATE INDEX IF NOT EXISTS idx_clipboard_content_hash ON clipboard_items(content_hash);",
    )
}

// is_pinned is stored but not consulted here.
fn apply_retention(
    conn: &Connection,
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> Result<usize, rusqlite::Error> {
    let over_cap = conn.execute(
        "DELETE FROM clipboard_items WHERE id IN (
            SELECT id FROM clipboard_items
            ORDER BY created_at DESC, rowid DESC
            LIMIT -1 OFFSET ?1
         )",
        params![sql_limit(policy.max_items)],
    )?;

    let cutoff = now - TimeDelta::days(i64::from(policy.max_age_days));
    let expired = conn.execute(
        "DELETE FROM clipboard_items WHERE created_at < ?1",
        params![format_timestamp(cutoff)],
    )?;

    Ok(over_cap + expired)
}

struct RawRow {
    id: Option<String>,
    content: Option<String>,
    content_hash: Option<String>,
    created_at: Option<String>,
    source_app: Option<String>,
    is_pinned: Option<i64>,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0).ok(),
            content: row.get(1).ok(),
            content_hash: row.get(2).ok(),
            created_at: row.get(3).ok(),
            source_app: row.get(4).ok().flatten(),
            is_pinned: row.get(5).ok(),
        })
    }

    fn into_item(self) -> Option<ClipboardItem> {
        let id = self.id.unwrap_or_default();
        let created_at = self.created_at.as_deref().and_then(parse_timestamp);
        let (Some(created_at), Some(content), Some(content_hash)) =
            (created_at, self.content, self.content_hash.filter(|hash| !hash.is_empty()))
        else {
            log::warn!(
                target: LOG_TARGET,
                "skipping malformed clipboard row id={id} created_at={:?}",
                self.created_at
            );
            return None;
        };

        Some(ClipboardItem {
            id,
            content,
            content_hash,
            created_at,
            source_app: self.source_app,
            is_pinned: self.is_pinned.unwrap_or(0) != 0,
        })
    }
}

fn collect_items(
    rows: impl Iterator<Item = rusqlite::Result<RawRow>>,
) -> Result<Vec<ClipboardItem>, StoreError> {
    let mut items = Vec::new();
    for row in rows {
        if let Some(item) = row?.into_item() {
            items.push(item);
        }
    }
    Ok(items)
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn sql_limit(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::{content_hash, escape_like, format_timestamp, parse_timestamp};
    use chrono::{TimeZone, Utc};

    #[test]
    fn hash_is_stable_hex() {
        let hash = content_hash("hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, content_hash("hello"));
        assert_ne!(hash, content_hash("hello "));
    }

    #[test]
    fn timestamps_roundtrip_and_sort_lexically() {
        let early = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 11, 2, 3, 4, 5).unwrap();
        let early_text = format_timestamp(early);

        assert_eq!(early_text, "2026-01-02T03:04:05.000000Z");
        assert!(early_text < format_timestamp(late));
        assert_eq!(parse_timestamp(&early_text), Some(early));
    }

    #[test]
    fn parses_space_separated_legacy_timestamps() {
        let parsed = parse_timestamp("2026-01-02 03:04:05.250000").unwrap();
        assert_eq!(parsed.timestamp_millis() % 1000, 250);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
    }
}
