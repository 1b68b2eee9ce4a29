//! Lazy, read-only traversal of the queue.

use std::collections::VecDeque;

use rusqlite::params;
use serde_json::Value;

use super::{SqliteQueue, conn, decode_item, item_bytes};
use crate::error::Result;

const PAGE_SIZE: i64 = 64;

const SELECT_PAGE: &str =
    "SELECT id, item FROM queue WHERE id > ?1 AND id <= ?2 ORDER BY id LIMIT ?3";

/// Payloads in ascending `id` order, fetched a page at a time.
///
/// The upper bound is fixed when the iterator is created, so the sequence
/// is finite even if other threads keep appending. Nothing is removed.
pub struct QueueIter<'a> {
    queue: &'a SqliteQueue,
    after: i64,
    upper: i64,
    page: VecDeque<(i64, Vec<u8>)>,
    exhausted: bool,
}

impl<'a> QueueIter<'a> {
    pub(super) fn new(queue: &'a SqliteQueue, upper: i64) -> Self {
        Self {
            queue,
            after: 0,
            upper,
            page: VecDeque::new(),
            exhausted: upper <= 0,
        }
    }

    fn fill(&mut self) -> Result<()> {
        let handle = self.queue.connections.acquire()?;
        let db = conn::lock(&handle)?;
        let mut stmt = db.prepare_cached(SELECT_PAGE)?;
        let rows = stmt
            .query_map(params![self.after, self.upper, PAGE_SIZE], |row| {
                Ok((row.get::<_, i64>(0)?, item_bytes(row, 1)?))
            })?
            .collect::<std::result::Result<VecDeque<_>, _>>()?;

        if (rows.len() as i64) < PAGE_SIZE {
            self.exhausted = true;
        }
        self.page = rows;
        Ok(())
    }
}

impl Iterator for QueueIter<'_> {
    type Item = Result<Value>;

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

        let (id, bytes) = self.page.pop_front()?;
        self.after = id;
        Some(decode_item(&bytes))
    }
}
