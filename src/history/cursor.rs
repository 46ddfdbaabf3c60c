//! Backward iteration over the history table
//!
//! `ReverseCursor` walks the log from the newest key towards the oldest,
//! loading rows in bounded pages with keyset pagination
//! (`timestamp < last_seen`), so stopping early never scans the rest of the
//! table. It borrows a connection, which may be an open transaction.

use rusqlite::{params, Connection, Row};
use std::collections::VecDeque;

use crate::error::Result;
use crate::history::item::{HistoryItem, VideoInfo};

/// Rows fetched per page when the caller gives no better hint
pub const DEFAULT_PAGE_SIZE: usize = 32;

const SELECT_FIRST_PAGE: &str = "SELECT timestamp, video_id, video_title, video_caption, \
     video_thumbnail, question, answer_url \
     FROM history ORDER BY timestamp DESC LIMIT ?1";

const SELECT_NEXT_PAGE: &str = "SELECT timestamp, video_id, video_title, video_caption, \
     video_thumbnail, question, answer_url \
     FROM history WHERE timestamp < ?1 ORDER BY timestamp DESC LIMIT ?2";

/// Lazy, restartable newest-to-oldest sequence of history items
pub struct ReverseCursor<'c> {
    conn: &'c Connection,
    page_size: usize,
    upper: Option<i64>,
    page: VecDeque<HistoryItem>,
    exhausted: bool,
    yielded: usize,
}

impl<'c> ReverseCursor<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self::with_page_size(conn, DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(conn: &'c Connection, page_size: usize) -> Self {
        Self {
            conn,
            page_size: page_size.max(1),
            upper: None,
            page: VecDeque::new(),
            exhausted: false,
            yielded: 0,
        }
    }

    /// Rewind to the newest item
    pub fn restart(&mut self) {
        self.upper = None;
        self.page.clear();
        self.exhausted = false;
        self.yielded = 0;
    }

    /// Number of items yielded since the last restart
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// Collect items while `keep_going` holds
    ///
    /// The predicate sees everything collected so far and is evaluated before
    /// each further item is pulled, so returning `false` stops the scan
    /// without touching more rows.
    pub fn collect_while<P>(&mut self, mut keep_going: P) -> Result<Vec<HistoryItem>>
    where
        P: FnMut(&[HistoryItem]) -> bool,
    {
        let mut out = Vec::new();

        while keep_going(&out) {
            match self.next() {
                Some(item) => out.push(item?),
                None => break,
            }
        }

        Ok(out)
    }

    fn fill(&mut self) -> Result<()> {
        let limit = self.page_size as i64;
        let rows: Vec<HistoryItem> = match self.upper {
            None => {
                let mut stmt = self.conn.prepare_cached(SELECT_FIRST_PAGE)?;
                let rows = stmt.query_map(params![limit], item_from_row)?;
                let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                items
            }
            Some(upper) => {
                let mut stmt = self.conn.prepare_cached(SELECT_NEXT_PAGE)?;
                let rows = stmt.query_map(params![upper, limit], item_from_row)?;
                let items = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                items
            }
        };

        if rows.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = rows.last() {
            self.upper = Some(last.timestamp);
        }
        self.page.extend(rows);

        Ok(())
    }
}

impl Iterator for ReverseCursor<'_> {
    type Item = Result<HistoryItem>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.page.is_empty() {
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }

        let item = self.page.pop_front()?;
        self.yielded += 1;
        Some(Ok(item))
    }
}

pub(crate) fn item_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryItem> {
    Ok(HistoryItem {
        timestamp: row.get(0)?,
        video_info: VideoInfo {
            id: row.get(1)?,
            title: row.get(2)?,
            caption: row.get(3)?,
            thumbnail: row.get(4)?,
        },
        question: row.get(5)?,
        answer_url: row.get(6)?,
    })
}
