//! Capped, durable question log
//!
//! Every operation runs on the blocking pool against a single connection
//! behind a mutex, so operations issued concurrently from different tasks are
//! serialized by the store itself. Two operations are only ordered relative to
//! each other when the caller awaits them in sequence.

use rusqlite::{params, Connection, ErrorCode};
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, trace};

use crate::error::{Result, VidqaError};
use crate::history::cursor::{ReverseCursor, DEFAULT_PAGE_SIZE};
use crate::history::item::{HistoryItem, HistoryPatch};
use crate::history::schema;

/// Default number of retained items
pub const DEFAULT_MAX_ITEMS: usize = 200;

const INSERT_ITEM: &str = "INSERT INTO history \
     (timestamp, video_id, video_title, video_caption, video_thumbnail, question, answer_url) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

const UPDATE_ITEM: &str = "UPDATE history \
     SET question = ?2, answer_url = ?3, video_caption = ?4, video_thumbnail = ?5 \
     WHERE timestamp = ?1";

/// Steps of a single `save_item` write
///
/// `Idle -> TransactionOpen -> ItemAdded -> CountChecked -> [EvictionLoop]* ->
/// Committed | Aborted`. An error carries the step that failed; the
/// transaction is rolled back when that happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    Idle,
    TransactionOpen,
    ItemAdded,
    CountChecked,
    EvictionLoop,
    Committed,
    Aborted,
}

impl fmt::Display for WritePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WritePhase::Idle => write!(f, "idle"),
            WritePhase::TransactionOpen => write!(f, "transaction open"),
            WritePhase::ItemAdded => write!(f, "item add"),
            WritePhase::CountChecked => write!(f, "count check"),
            WritePhase::EvictionLoop => write!(f, "eviction"),
            WritePhase::Committed => write!(f, "commit"),
            WritePhase::Aborted => write!(f, "abort"),
        }
    }
}

fn in_phase(phase: WritePhase) -> impl Fn(rusqlite::Error) -> VidqaError {
    move |source| VidqaError::Transaction { phase, source }
}

fn lift_phase(phase: WritePhase) -> impl Fn(VidqaError) -> VidqaError {
    move |e| match e {
        VidqaError::Storage(source) => VidqaError::Transaction { phase, source },
        other => other,
    }
}

/// Durable append log holding at most `max_items` questions
#[derive(Clone)]
pub struct CappedLog {
    conn: Arc<Mutex<Connection>>,
    max_items: usize,
}

impl CappedLog {
    /// Open or create the log at `path`
    pub fn open(path: &Path, max_items: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Opening history log at {:?}", path);
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::with_connection(conn, max_items)
    }

    /// Open an in-memory log (for testing)
    pub fn open_in_memory(max_items: usize) -> Result<Self> {
        debug!("Opening in-memory history log");
        Self::with_connection(Connection::open_in_memory()?, max_items)
    }

    fn with_connection(conn: Connection, max_items: usize) -> Result<Self> {
        if max_items == 0 {
            return Err(VidqaError::Config(
                "history capacity must be greater than 0".to_string(),
            ));
        }

        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_items,
        })
    }

    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// Append an item, then trim the oldest items beyond capacity
    ///
    /// Add and trim share one transaction. Returns the timestamps that were
    /// evicted, oldest last.
    pub async fn save_item(&self, item: HistoryItem) -> Result<Vec<i64>> {
        let max_items = self.max_items;
        self.run(move |conn| write_item(conn, &item, max_items)).await
    }

    /// The `n` most recent items, most recent first
    pub async fn get_items(&self, n: usize) -> Result<Vec<HistoryItem>> {
        if n == 0 {
            return Ok(Vec::new());
        }

        self.run(move |conn| {
            let mut cursor = ReverseCursor::with_page_size(conn, n.min(DEFAULT_PAGE_SIZE));
            cursor.collect_while(|got| got.len() < n)
        })
        .await
    }

    /// Merge `patch` into the most recent item matching `predicate`
    ///
    /// Returns the updated item, or `NotFound` when nothing matches.
    pub async fn update_last_item<P>(&self, predicate: P, patch: HistoryPatch) -> Result<HistoryItem>
    where
        P: Fn(&HistoryItem) -> bool + Send + 'static,
    {
        self.run(move |conn| patch_last_match(conn, &predicate, &patch))
            .await
    }

    /// Remove a single item by key; returns whether it existed
    pub async fn remove_item(&self, timestamp: i64) -> Result<bool> {
        self.run(move |conn| {
            let removed = conn.execute("DELETE FROM history WHERE timestamp = ?1", [timestamp])?;
            debug!("Removed history item {}: {}", timestamp, removed > 0);
            Ok(removed > 0)
        })
        .await
    }

    /// Remove every item; returns how many were removed
    pub async fn clear_history(&self) -> Result<usize> {
        self.run(|conn| {
            let removed = conn.execute("DELETE FROM history", [])?;
            info!("Cleared {} history items", removed);
            Ok(removed)
        })
        .await
    }

    pub async fn len(&self) -> Result<usize> {
        self.run(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    async fn run<F, T>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| VidqaError::TaskJoin(format!("History connection lock poisoned: {}", e)))?;
            op(&mut *guard)
        })
        .await?
    }
}

/// The `save_item` state machine, run on an exclusive connection
pub(crate) fn write_item(conn: &mut Connection, item: &HistoryItem, max_items: usize) -> Result<Vec<i64>> {
    trace!("{}: saving item {}", WritePhase::Idle, item.timestamp);

    let tx = conn
        .transaction()
        .map_err(in_phase(WritePhase::TransactionOpen))?;

    let added = tx.execute(
        INSERT_ITEM,
        params![
            item.timestamp,
            item.video_info.id,
            item.video_info.title,
            item.video_info.caption,
            item.video_info.thumbnail,
            item.question,
            item.answer_url,
        ],
    );
    if let Err(e) = added {
        debug!("{}: history write for {}", WritePhase::Aborted, item.timestamp);
        return Err(match e {
            rusqlite::Error::SqliteFailure(ref err, _)
                if err.code == ErrorCode::ConstraintViolation =>
            {
                VidqaError::DuplicateKey(item.timestamp)
            }
            other => in_phase(WritePhase::ItemAdded)(other),
        });
    }
    trace!("{}: {}", WritePhase::ItemAdded, item.timestamp);

    let count: i64 = tx
        .query_row("SELECT COUNT(*) FROM history", [], |row| row.get(0))
        .map_err(in_phase(WritePhase::CountChecked))?;
    let count = count as usize;
    trace!("{}: {} items (max {})", WritePhase::CountChecked, count, max_items);

    let mut evicted = Vec::new();
    if count > max_items {
        let excess = count - max_items;

        {
            // Walk back from the newest, counting down past the retained items
            let mut cursor = ReverseCursor::with_page_size(&tx, count.min(DEFAULT_PAGE_SIZE * 4));
            let mut seen = 0usize;
            while evicted.len() < excess {
                let Some(row) = cursor.next() else { break };
                let row = row.map_err(lift_phase(WritePhase::EvictionLoop))?;
                seen += 1;
                if seen > max_items {
                    evicted.push(row.timestamp);
                }
            }
        }

        for timestamp in &evicted {
            tx.execute("DELETE FROM history WHERE timestamp = ?1", [timestamp])
                .map_err(in_phase(WritePhase::EvictionLoop))?;
            trace!("{}: dropped {}", WritePhase::EvictionLoop, timestamp);
        }
    }

    tx.commit().map_err(in_phase(WritePhase::Committed))?;

    if evicted.is_empty() {
        debug!("Saved history item {}", item.timestamp);
    } else {
        debug!(
            "Saved history item {} and evicted {} oldest",
            item.timestamp,
            evicted.len()
        );
    }

    Ok(evicted)
}

fn patch_last_match<P>(conn: &mut Connection, predicate: &P, patch: &HistoryPatch) -> Result<HistoryItem>
where
    P: Fn(&HistoryItem) -> bool,
{
    let tx = conn.transaction()?;

    let found = {
        let cursor = ReverseCursor::new(&tx);
        let mut found = None;
        for row in cursor {
            let row = row?;
            if predicate(&row) {
                found = Some(row);
                break;
            }
        }
        found
    };

    let Some(mut item) = found else {
        return Err(VidqaError::NotFound(
            "no history item matches the update predicate".to_string(),
        ));
    };

    item.apply(patch);
    tx.execute(
        UPDATE_ITEM,
        params![
            item.timestamp,
            item.question,
            item.answer_url,
            item.video_info.caption,
            item.video_info.thumbnail,
        ],
    )?;
    tx.commit()?;

    debug!("Updated history item {}", item.timestamp);
    Ok(item)
}
