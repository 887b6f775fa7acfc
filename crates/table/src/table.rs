use keystone::{Cells, Keystone};
use log::{debug, warn};
use std::cmp::Ordering;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::format::Header;
use crate::order::{same_order, RowOrder};
use crate::searcher::{Searcher, DEFAULT_SEARCH_ROWS};
use crate::{Error, Result};

/// Read attempts that return zero bytes before a read is declared short.
const MAX_ZERO_PROGRESS_READS: u32 = 3;

/// Per-table settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableOptions {
    /// If `true`, every append forces rows and the committed row count to
    /// stable storage before returning. If `false`, the row count is
    /// rolling-committed and [`SortedTable::flush`] makes it durable.
    ///
    /// Rolling mode still pays one `sync_data` per append: the keystone
    /// forces its value cell before writing the index byte, and that sync
    /// covers the whole file, appended rows included. What it saves is the
    /// second sync of the index byte and the separate sync of the rows.
    pub sync_appends: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self { sync_appends: true }
    }
}

impl TableOptions {
    #[must_use]
    pub fn from_config(config: &config::Config) -> Self {
        Self {
            sync_appends: config.sync_appends,
        }
    }

    fn cells(&self) -> Cells {
        if self.sync_appends {
            Cells::Two
        } else {
            Cells::Three
        }
    }
}

/// An append-only, sorted sequence of fixed-width rows in one file.
///
/// Row `n` lives at byte offset `zero_offset + n * row_width`. There is no
/// separate index; lookups go through a [`Searcher`].
///
/// Headered tables (see [`format`](crate::format)) keep their committed row
/// count in a [`Keystone`], so a torn append never becomes visible. Raw
/// tables derive their row count from the file length.
///
/// Reads go through a persistent file handle wrapped in a `Mutex`, so any
/// number of searchers can share a `&SortedTable`. Appends need `&mut self`
/// and therefore cannot overlap a live searcher.
pub struct SortedTable {
    path: PathBuf,
    file: Mutex<File>,
    zero_offset: u64,
    row_width: usize,
    order: Arc<dyn RowOrder>,
    row_count: u64,
    /// Committed row count for headered tables; `None` for raw tables.
    counter: Option<Keystone>,
    /// Copy of the last committed row, used to validate appends.
    last_row: Option<Vec<u8>>,
    options: TableOptions,
}

impl std::fmt::Debug for SortedTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SortedTable")
            .field("path", &self.path)
            .field("zero_offset", &self.zero_offset)
            .field("row_width", &self.row_width)
            .field("row_count", &self.row_count)
            .field("order", &self.order.name())
            .field("headered", &self.counter.is_some())
            .finish()
    }
}

impl SortedTable {
    /// Creates a new, empty headered table at `path`, replacing any file
    /// already there.
    pub fn create<P: AsRef<Path>>(
        path: P,
        row_width: usize,
        order: Arc<dyn RowOrder>,
        options: TableOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let width = u32::try_from(row_width)
            .ok()
            .filter(|w| *w > 0)
            .ok_or_else(|| Error::InvalidArgument(format!("bad row width {}", row_width)))?;

        let header = Header {
            row_width: width,
            cells: options.cells(),
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        let mut w = BufWriter::new(file);
        header.write_to(&mut w)?;
        w.flush()?;
        let file = w.into_inner().map_err(|e| e.into_error())?;

        let counter = Keystone::create(
            reopen(&path)?,
            header.keystone_offset(),
            0,
            header.cells,
        )?;
        debug!("created table {} (row width {})", path.display(), row_width);

        Ok(Self {
            path,
            file: Mutex::new(file),
            zero_offset: header.zero_offset(),
            row_width,
            order,
            row_count: 0,
            counter: Some(counter),
            last_row: None,
            options,
        })
    }

    /// Opens an existing headered table.
    ///
    /// # Errors
    ///
    /// [`Error::Corrupt`] if the header is short or invalid, or if the file
    /// holds fewer rows than the committed count. Bytes past the committed
    /// rows are logged and ignored.
    pub fn open<P: AsRef<Path>>(
        path: P,
        order: Arc<dyn RowOrder>,
        options: TableOptions,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let header = Header::read_from(&mut file).map_err(|e| match e.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => Error::Corrupt {
                path: path.clone(),
                reason: format!("bad header: {}", e),
            },
            _ => Error::Io(e),
        })?;

        let counter = Keystone::open(reopen(&path)?, header.keystone_offset(), header.cells)
            .map_err(|e| match e {
                keystone::KeystoneError::Io(io) => Error::Io(io),
                other => Error::Corrupt {
                    path: path.clone(),
                    reason: other.to_string(),
                },
            })?;

        let committed = u64::try_from(counter.get()).map_err(|_| Error::Corrupt {
            path: path.clone(),
            reason: format!("negative committed row count {}", counter.get()),
        })?;

        let row_width = header.row_width as usize;
        let zero_offset = header.zero_offset();
        let data_len = file.metadata()?.len().saturating_sub(zero_offset);
        let committed_len = committed * row_width as u64;
        if data_len < committed_len {
            return Err(Error::Corrupt {
                path,
                reason: format!(
                    "{} data bytes for {} committed rows of width {}",
                    data_len, committed, row_width
                ),
            });
        }
        if data_len > committed_len {
            warn!(
                "table {}: ignoring {} bytes past committed row count {}",
                path.display(),
                data_len - committed_len,
                committed
            );
        }

        let mut table = Self {
            path,
            file: Mutex::new(file),
            zero_offset,
            row_width,
            order,
            row_count: committed,
            counter: Some(counter),
            last_row: None,
            options,
        };
        table.last_row = table.load_last_row()?;
        Ok(table)
    }

    /// Opens a headerless table whose rows start at `zero_offset`.
    ///
    /// The row count is derived from the file length. A partial trailing
    /// row is logged and ignored; the next append overwrites it.
    pub fn open_raw<P: AsRef<Path>>(
        path: P,
        zero_offset: u64,
        row_width: usize,
        order: Arc<dyn RowOrder>,
        options: TableOptions,
    ) -> Result<Self> {
        if row_width == 0 {
            return Err(Error::InvalidArgument("row width is zero".into()));
        }
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let len = file.metadata()?.len();
        if len < zero_offset {
            return Err(Error::Corrupt {
                path,
                reason: format!("file length {} is below zero offset {}", len, zero_offset),
            });
        }
        let data_len = len - zero_offset;
        let row_count = data_len / row_width as u64;
        let tail = data_len % row_width as u64;
        if tail != 0 {
            warn!(
                "table {}: ignoring {} trailing bytes (row width {})",
                path.display(),
                tail,
                row_width
            );
        }

        let mut table = Self {
            path,
            file: Mutex::new(file),
            zero_offset,
            row_width,
            order,
            row_count,
            counter: None,
            last_row: None,
            options,
        };
        table.last_row = table.load_last_row()?;
        Ok(table)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    #[must_use]
    pub fn row_width(&self) -> usize {
        self.row_width
    }

    #[must_use]
    pub fn order(&self) -> &Arc<dyn RowOrder> {
        &self.order
    }

    #[must_use]
    pub fn zero_offset(&self) -> u64 {
        self.zero_offset
    }

    /// Bytes occupied by committed rows.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        self.row_count * self.row_width as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    /// Fails unless `other` has the same row width and row order.
    pub fn check_compatible(&self, other: &SortedTable) -> Result<()> {
        if self.row_width != other.row_width {
            return Err(Error::InvalidArgument(format!(
                "row width mismatch: {} has {}, {} has {}",
                self.path.display(),
                self.row_width,
                other.path.display(),
                other.row_width
            )));
        }
        if !same_order(self.order.as_ref(), other.order.as_ref()) {
            return Err(Error::InvalidArgument(format!(
                "row order mismatch: {} vs {}",
                self.order.name(),
                other.order.name()
            )));
        }
        Ok(())
    }

    /// Fails unless `row` is exactly one row wide.
    pub fn check_row(&self, row: &[u8]) -> Result<()> {
        if row.len() != self.row_width {
            return Err(Error::InvalidArgument(format!(
                "row of {} bytes, table row width is {}",
                row.len(),
                self.row_width
            )));
        }
        Ok(())
    }

    /// Creates a stateful searcher fetching up to `buffer_rows` rows per
    /// final sequential read (minimum 4).
    pub fn searcher(&self, buffer_rows: usize) -> Result<Searcher<'_>> {
        Searcher::new(self, buffer_rows)
    }

    /// Point lookup: returns the row equal to `key` under the table's order.
    pub fn search(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.searcher(DEFAULT_SEARCH_ROWS)?.find(key)
    }

    /// Reads row `row`.
    pub fn read_row(&self, row: u64) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.row_width);
        self.read_rows(row, 1, &mut buf)?;
        Ok(buf)
    }

    /// Replaces the contents of `buf` with rows `[first, first + count)`.
    pub fn read_rows(&self, first: u64, count: u64, buf: &mut Vec<u8>) -> Result<()> {
        let end = first.checked_add(count).unwrap_or(u64::MAX);
        if end > self.row_count {
            return Err(Error::OutOfBounds {
                row: end.saturating_sub(1).max(first),
                count: self.row_count,
            });
        }
        buf.clear();
        buf.resize((count as usize) * self.row_width, 0);
        if count == 0 {
            return Ok(());
        }

        let mut f = self.lock_file()?;
        f.seek(SeekFrom::Start(self.row_offset(first)))?;
        read_fully(&mut *f, buf)?;
        Ok(())
    }

    /// Appends one or more rows.
    ///
    /// `rows` must be a whole number of rows, ascending among themselves and
    /// not less than the current last row. On rejection the table is left
    /// unchanged.
    pub fn append(&mut self, rows: &[u8]) -> Result<()> {
        if rows.len() % self.row_width != 0 {
            return Err(Error::InvalidArgument(format!(
                "{} bytes is not a multiple of row width {}",
                rows.len(),
                self.row_width
            )));
        }
        if rows.is_empty() {
            return Ok(());
        }
        self.check_ascending(rows)?;

        let n = (rows.len() / self.row_width) as u64;
        let offset = self.row_offset(self.row_count);
        let sync = self.options.sync_appends;
        {
            let f = self.file_mut();
            f.seek(SeekFrom::Start(offset))?;
            f.write_all(rows)?;
            if sync {
                f.sync_data()?;
            }
        }

        // The in-memory count only moves once the committed count has.
        let new_count = self.row_count + n;
        if let Some(counter) = self.counter.as_mut() {
            counter.put(new_count as i64, !sync)?;
        }
        self.row_count = new_count;
        self.last_row = Some(rows[rows.len() - self.row_width..].to_vec());
        Ok(())
    }

    /// Lowers the row count to `new_count`, discarding the rows past it.
    pub fn trim(&mut self, new_count: u64) -> Result<()> {
        if new_count > self.row_count {
            return Err(Error::OutOfBounds {
                row: new_count,
                count: self.row_count,
            });
        }
        if new_count == self.row_count {
            return Ok(());
        }
        if let Some(counter) = self.counter.as_mut() {
            counter.put(new_count as i64, false)?;
        }
        let len = self.row_offset(new_count);
        let f = self.file_mut();
        f.set_len(len)?;
        f.sync_data()?;

        debug!(
            "trimmed table {} from {} to {} rows",
            self.path.display(),
            self.row_count,
            new_count
        );
        self.row_count = new_count;
        self.last_row = self.load_last_row()?;
        Ok(())
    }

    /// Forces appended rows and the row count to stable storage.
    pub fn flush(&mut self) -> Result<()> {
        self.file_mut().sync_data()?;
        if let Some(counter) = self.counter.as_mut() {
            counter.commit()?;
        }
        Ok(())
    }

    fn row_offset(&self, row: u64) -> u64 {
        self.zero_offset + row * self.row_width as u64
    }

    fn check_ascending(&self, rows: &[u8]) -> Result<()> {
        let mut prev = self.last_row.as_deref();
        for (i, row) in rows.chunks_exact(self.row_width).enumerate() {
            if let Some(p) = prev {
                if self.order.compare(p, row) == Ordering::Greater {
                    return Err(Error::NotSorted(format!(
                        "appending to {}: row {} of the block sorts before its predecessor",
                        self.path.display(),
                        i
                    )));
                }
            }
            prev = Some(row);
        }
        Ok(())
    }

    fn load_last_row(&self) -> Result<Option<Vec<u8>>> {
        if self.row_count == 0 {
            return Ok(None);
        }
        self.read_row(self.row_count - 1).map(Some)
    }

    fn lock_file(&self) -> Result<MutexGuard<'_, File>> {
        self.file
            .lock()
            .map_err(|e| Error::Io(io::Error::other(format!("lock poisoned: {}", e))))
    }

    fn file_mut(&mut self) -> &mut File {
        self.file.get_mut().unwrap_or_else(|e| e.into_inner())
    }
}

/// Opens a second handle so the keystone keeps its own seek cursor.
fn reopen(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

/// Fills `buf` from `r`, retrying a bounded number of zero-progress reads
/// before reporting `UnexpectedEof`.
pub(crate) fn read_fully<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<()> {
    let mut filled = 0;
    let mut zero_reads = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => {
                zero_reads += 1;
                if zero_reads > MAX_ZERO_PROGRESS_READS {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("short read: {} of {} bytes", filled, buf.len()),
                    ));
                }
                std::thread::yield_now();
            }
            Ok(n) => {
                filled += n;
                zero_reads = 0;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
