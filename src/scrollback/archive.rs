//! On-disk scrollback archive: append-only chunk files with an in-memory
//! chunk index and a bounded LRU line cache.
//!
//! Chunk files live at `<archive_dir>/<seq>.chunk` and hold consecutive
//! rows as `[u16 cols][cols * CELL_STRIDE bytes]` records. An in-memory
//! index maps absolute line ranges to chunks for random access; eviction
//! always removes the oldest chunk first so the available range stays
//! contiguous.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::term::cell::Row;
use crate::term::codec::{self, CELL_STRIDE};

/// Shared byte budget across every PTY's archive.
///
/// Each archive charges bytes as it writes chunks and credits them back on
/// eviction. When the global total exceeds the budget, the oldest-touched
/// PTY with archived bytes owes an eviction; archives ask
/// [`ArchiveBudget::needs_eviction`] on their own append path and shed
/// their oldest chunks until the answer is no.
#[derive(Debug)]
pub struct ArchiveBudget {
    max_bytes: u64,
    inner: Mutex<BudgetInner>,
}

#[derive(Debug, Default)]
struct BudgetInner {
    total: u64,
    tick: u64,
    // pty id -> (bytes, last-touch tick)
    entries: HashMap<u64, (u64, u64)>,
}

impl ArchiveBudget {
    pub fn new(max_bytes: u64) -> Arc<Self> {
        Arc::new(Self {
            max_bytes,
            inner: Mutex::new(BudgetInner::default()),
        })
    }

    pub fn charge(&self, pty_id: u64, bytes: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.total += bytes;
        inner.tick += 1;
        let tick = inner.tick;
        let entry = inner.entries.entry(pty_id).or_insert((0, tick));
        entry.0 += bytes;
        entry.1 = tick;
    }

    pub fn credit(&self, pty_id: u64, bytes: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.total = inner.total.saturating_sub(bytes);
        if let Some(entry) = inner.entries.get_mut(&pty_id) {
            entry.0 = entry.0.saturating_sub(bytes);
        }
    }

    /// Mark the PTY recently used without changing its byte count.
    pub fn touch(&self, pty_id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.tick += 1;
        let tick = inner.tick;
        if let Some(entry) = inner.entries.get_mut(&pty_id) {
            entry.1 = tick;
        }
    }

    pub fn remove(&self, pty_id: u64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some((bytes, _)) = inner.entries.remove(&pty_id) {
            inner.total = inner.total.saturating_sub(bytes);
        }
    }

    /// True when the global budget is exceeded and `pty_id` is the
    /// oldest-touched PTY still holding archived bytes.
    pub fn needs_eviction(&self, pty_id: u64) -> bool {
        let inner = self.inner.lock().unwrap();
        if inner.total <= self.max_bytes {
            return false;
        }
        inner
            .entries
            .iter()
            .filter(|(_, (bytes, _))| *bytes > 0)
            .min_by_key(|(_, (_, touch))| *touch)
            .map(|(id, _)| *id == pty_id)
            .unwrap_or(false)
    }

    pub fn total(&self) -> u64 {
        self.inner.lock().unwrap().total
    }
}

/// Bounded LRU of decoded archive lines, keyed by absolute index.
#[derive(Debug)]
struct LineCache {
    entries: HashMap<u64, (Row, u64)>,
    cap: usize,
    tick: u64,
}

impl LineCache {
    fn new(cap: usize) -> Self {
        Self {
            entries: HashMap::new(),
            cap,
            tick: 0,
        }
    }

    fn get(&mut self, index: u64) -> Option<Row> {
        self.tick += 1;
        let tick = self.tick;
        self.entries.get_mut(&index).map(|entry| {
            entry.1 = tick;
            entry.0.clone()
        })
    }

    fn insert(&mut self, index: u64, row: Row) {
        if self.cap == 0 {
            return;
        }
        while self.entries.len() >= self.cap && !self.entries.contains_key(&index) {
            if let Some((&oldest, _)) = self.entries.iter().min_by_key(|(_, (_, tick))| *tick) {
                self.entries.remove(&oldest);
            } else {
                break;
            }
        }
        self.tick += 1;
        self.entries.insert(index, (row, self.tick));
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone)]
struct Chunk {
    seq: u64,
    start_line: u64,
    lines: u32,
    bytes: u64,
}

/// Default number of decoded lines held by the archive's cache.
const LINE_CACHE_CAP: usize = 1024;

/// Per-PTY chunked disk archive.
pub struct DiskArchive {
    pty_id: u64,
    dir: PathBuf,
    chunks: VecDeque<Chunk>,
    next_seq: u64,
    bytes: u64,
    per_pty_max_bytes: u64,
    budget: Arc<ArchiveBudget>,
    cache: LineCache,
}

impl DiskArchive {
    /// Create the archive directory for one PTY. Fails if the directory
    /// cannot be created, in which case the caller runs hot-only.
    pub fn create(
        pty_id: u64,
        dir: PathBuf,
        per_pty_max_bytes: u64,
        budget: Arc<ArchiveBudget>,
    ) -> io::Result<Self> {
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            pty_id,
            dir,
            chunks: VecDeque::new(),
            next_seq: 0,
            bytes: 0,
            per_pty_max_bytes,
            budget,
            cache: LineCache::new(LINE_CACHE_CAP),
        })
    }

    fn chunk_path(&self, seq: u64) -> PathBuf {
        self.dir.join(format!("{seq}.chunk"))
    }

    /// Append one chunk of consecutive rows starting at absolute line
    /// `start_line`. Evicts oldest chunks afterwards while over either the
    /// per-PTY or the (owed share of the) global budget.
    pub fn append_chunk(&mut self, start_line: u64, rows: &[Row]) -> io::Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::with_capacity(rows.len() * 80);
        for row in rows {
            buf.extend_from_slice(&(row.len() as u16).to_le_bytes());
            buf.extend_from_slice(&codec::pack_row(row));
        }

        let seq = self.next_seq;
        std::fs::write(self.chunk_path(seq), &buf)?;
        self.next_seq += 1;

        let bytes = buf.len() as u64;
        self.bytes += bytes;
        self.budget.charge(self.pty_id, bytes);
        self.chunks.push_back(Chunk {
            seq,
            start_line,
            lines: rows.len() as u32,
            bytes,
        });

        while self.bytes > self.per_pty_max_bytes || self.budget.needs_eviction(self.pty_id) {
            if !self.evict_oldest_chunk() {
                break;
            }
        }
        Ok(())
    }

    fn evict_oldest_chunk(&mut self) -> bool {
        let Some(chunk) = self.chunks.pop_front() else {
            return false;
        };
        let _ = std::fs::remove_file(self.chunk_path(chunk.seq));
        self.bytes = self.bytes.saturating_sub(chunk.bytes);
        self.budget.credit(self.pty_id, chunk.bytes);
        // Cached lines from the evicted range would now disagree with disk.
        let end = chunk.start_line + u64::from(chunk.lines);
        self.cache
            .entries
            .retain(|&index, _| index < chunk.start_line || index >= end);
        true
    }

    /// Absolute index of the oldest line still on disk, if any.
    pub fn first_available(&self) -> Option<u64> {
        self.chunks.front().map(|c| c.start_line)
    }

    /// Fetch one line by absolute index. `None` once its chunk has been
    /// evicted.
    pub fn get_line(&mut self, index: u64) -> io::Result<Option<Row>> {
        if let Some(row) = self.cache.get(index) {
            self.budget.touch(self.pty_id);
            return Ok(Some(row));
        }

        let chunk = match self.find_chunk(index) {
            Some(chunk) => chunk,
            None => return Ok(None),
        };

        let mut file = std::fs::File::open(self.chunk_path(chunk.seq))?;
        let mut buf = Vec::with_capacity(chunk.bytes as usize);
        file.read_to_end(&mut buf)?;

        let mut result = None;
        let mut line = chunk.start_line;
        let mut pos = 0usize;
        while pos + 2 <= buf.len() {
            let cols = u16::from_le_bytes([buf[pos], buf[pos + 1]]) as usize;
            pos += 2;
            let end = pos + cols * CELL_STRIDE;
            if end > buf.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "truncated chunk record",
                ));
            }
            let row = codec::unpack_row(&buf[pos..end], cols)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            self.cache.insert(line, row.clone());
            if line == index {
                result = Some(row);
            }
            pos = end;
            line += 1;
        }

        self.budget.touch(self.pty_id);
        Ok(result)
    }

    fn find_chunk(&self, index: u64) -> Option<Chunk> {
        let pos = self
            .chunks
            .partition_point(|c| c.start_line + u64::from(c.lines) <= index);
        self.chunks
            .get(pos)
            .filter(|c| c.start_line <= index)
            .cloned()
    }

    /// Drop every cached decoded line, keeping chunks on disk.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Delete the archive directory and release the budget.
    pub fn dispose(&mut self) {
        self.chunks.clear();
        self.cache.clear();
        self.budget.remove(self.pty_id);
        self.bytes = 0;
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::cell::{Cell, Row};

    fn row_of(text: &str, cols: usize) -> Row {
        let mut cells = vec![Cell::default(); cols];
        for (i, ch) in text.chars().take(cols).enumerate() {
            cells[i].ch = ch;
        }
        Row::from_cells(cells)
    }

    fn archive_in(dir: &std::path::Path, max: u64, global: u64) -> DiskArchive {
        DiskArchive::create(
            1,
            dir.join("pty-1"),
            max,
            ArchiveBudget::new(global),
        )
        .unwrap()
    }

    #[test]
    fn appended_chunks_read_back_by_absolute_index() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = archive_in(dir.path(), u64::MAX, u64::MAX);

        archive
            .append_chunk(0, &[row_of("zero", 10), row_of("one", 10)])
            .unwrap();
        archive.append_chunk(2, &[row_of("two", 10)]).unwrap();

        assert_eq!(archive.get_line(0).unwrap().unwrap().text().trim_end(), "zero");
        assert_eq!(archive.get_line(2).unwrap().unwrap().text().trim_end(), "two");
        assert!(archive.get_line(3).unwrap().is_none());
    }

    #[test]
    fn line_cache_serves_repeat_reads() {
        let dir = tempfile::tempdir().unwrap();
        let mut archive = archive_in(dir.path(), u64::MAX, u64::MAX);
        archive.append_chunk(0, &[row_of("cached", 10)]).unwrap();

        let first = archive.get_line(0).unwrap().unwrap();
        // Delete the backing file; the cache must still answer.
        std::fs::remove_file(dir.path().join("pty-1/0.chunk")).unwrap();
        let second = archive.get_line(0).unwrap().unwrap();
        assert_eq!(first.text(), second.text());
    }

    #[test]
    fn per_pty_budget_evicts_oldest_chunk_first() {
        let dir = tempfile::tempdir().unwrap();
        // Budget of one chunk's worth: the second append evicts the first.
        let one_chunk = (2 + 10 * CELL_STRIDE) as u64;
        let mut archive = archive_in(dir.path(), one_chunk, u64::MAX);

        archive.append_chunk(0, &[row_of("old", 10)]).unwrap();
        archive.append_chunk(1, &[row_of("new", 10)]).unwrap();

        assert!(archive.get_line(0).unwrap().is_none());
        assert_eq!(archive.get_line(1).unwrap().unwrap().text().trim_end(), "new");
        assert_eq!(archive.first_available(), Some(1));
    }

    #[test]
    fn global_budget_prefers_the_oldest_touched_pty() {
        let dir = tempfile::tempdir().unwrap();
        let budget = ArchiveBudget::new(40);
        budget.charge(1, 30);
        budget.charge(2, 30);
        // PTY 1 was touched first; it owes the eviction.
        assert!(budget.needs_eviction(1));
        assert!(!budget.needs_eviction(2));
        budget.credit(1, 30);
        assert!(!budget.needs_eviction(1));
        assert!(!budget.needs_eviction(2));
        drop(dir);
    }

    #[test]
    fn dispose_removes_directory_and_budget_share() {
        let dir = tempfile::tempdir().unwrap();
        let budget = ArchiveBudget::new(u64::MAX);
        let mut archive =
            DiskArchive::create(7, dir.path().join("pty-7"), u64::MAX, Arc::clone(&budget))
                .unwrap();
        archive.append_chunk(0, &[row_of("x", 4)]).unwrap();
        assert!(budget.total() > 0);

        archive.dispose();
        assert_eq!(budget.total(), 0);
        assert!(!dir.path().join("pty-7").exists());
    }
}
