//! Record stream I/O: windowed memory-mapped readers and durable writers.
//!
//! Readers never map a whole input at once. They slide a window of
//! `window_elements` records (100 MB at the default) and remap when the
//! cursor leaves it, so inputs far larger than RAM stream at mmap speed.

use crate::record::{Record, RECORD_LEN};
use anyhow::{bail, Context, Result};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Source of records for one peer. The engine depends only on this trait,
/// so storage back-ends are swappable behind a `Box<dyn RecordInput>`.
pub trait RecordInput {
    /// Total number of records in the stream.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total byte size of the stream.
    fn byte_len(&self) -> u64 {
        self.len() * RECORD_LEN as u64
    }

    /// Position the cursor at `record`. Seeking to `len()` is allowed and
    /// leaves the stream exhausted.
    fn seek(&mut self, record: u64) -> Result<()>;

    /// Read the record at the cursor and advance past it.
    fn read_record(&mut self) -> Result<Record>;
}

/// Open `path` as a record stream: a plain file maps directly, a directory
/// becomes the lexicographic concatenation of its `part*` entries.
pub fn open_input(path: &Path, window_elements: u64) -> Result<Box<dyn RecordInput>> {
    if path.is_dir() {
        Ok(Box::new(DirInput::open(path, window_elements)?))
    } else {
        Ok(Box::new(FileInput::open(path, window_elements)?))
    }
}

struct Window {
    map: Mmap,
    first: u64,
    len: u64,
}

/// Windowed read-only view of a single record file.
pub struct FileInput {
    file: File,
    len: u64,
    window_elements: u64,
    window: Option<Window>,
    pos: u64,
}

impl FileInput {
    pub fn open(path: &Path, window_elements: u64) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("open input {}", path.display()))?;
        let bytes = file.metadata()?.len();
        if bytes % RECORD_LEN as u64 != 0 {
            bail!(
                "input {} is {} bytes, not a whole number of {}-byte records",
                path.display(),
                bytes,
                RECORD_LEN
            );
        }
        Ok(Self {
            file,
            len: bytes / RECORD_LEN as u64,
            window_elements: window_elements.max(1),
            window: None,
            pos: 0,
        })
    }

    fn remap(&mut self) -> Result<()> {
        let window_len = (self.len - self.pos).min(self.window_elements);
        let map = unsafe {
            MmapOptions::new()
                .offset(self.pos * RECORD_LEN as u64)
                .len(window_len as usize * RECORD_LEN)
                .map(&self.file)
                .context("map input window")?
        };
        self.window = Some(Window { map, first: self.pos, len: window_len });
        Ok(())
    }
}

impl RecordInput for FileInput {
    fn len(&self) -> u64 {
        self.len
    }

    fn seek(&mut self, record: u64) -> Result<()> {
        if record > self.len {
            bail!("seek to record {record} past end of input ({} records)", self.len);
        }
        // keep the window when the target already lies inside it
        if !matches!(&self.window, Some(w) if w.first <= record && record < w.first + w.len) {
            self.window = None;
        }
        self.pos = record;
        Ok(())
    }

    fn read_record(&mut self) -> Result<Record> {
        if self.pos >= self.len {
            bail!("read past end of input ({} records)", self.len);
        }
        let in_window = matches!(&self.window, Some(w) if w.first <= self.pos && self.pos < w.first + w.len);
        if !in_window {
            self.remap()?;
        }
        let window = self.window.as_ref().expect("window after remap");
        let at = (self.pos - window.first) as usize * RECORD_LEN;
        let record = Record::from_bytes(&window.map[at..at + RECORD_LEN]);
        self.pos += 1;
        Ok(record)
    }
}

/// Directory adapter: the concatenation of every `part*` entry in
/// lexicographic name order, each a whole number of records.
pub struct DirInput {
    segments: Vec<FileInput>,
    starts: Vec<u64>,
    len: u64,
    current: usize,
    pos: u64,
}

impl DirInput {
    pub fn open(dir: &Path, window_elements: u64) -> Result<Self> {
        let mut parts: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("read input directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with("part"))
            })
            .collect();
        parts.sort();
        if parts.is_empty() {
            bail!("input directory {} has no part* files", dir.display());
        }

        let mut segments = Vec::with_capacity(parts.len());
        let mut starts = Vec::with_capacity(parts.len());
        let mut total = 0;
        for part in &parts {
            let segment = FileInput::open(part, window_elements)?;
            starts.push(total);
            total += segment.len();
            segments.push(segment);
        }
        Ok(Self { segments, starts, len: total, current: 0, pos: 0 })
    }
}

impl RecordInput for DirInput {
    fn len(&self) -> u64 {
        self.len
    }

    fn seek(&mut self, record: u64) -> Result<()> {
        if record > self.len {
            bail!("seek to record {record} past end of input ({} records)", self.len);
        }
        let segment = self.starts.partition_point(|&start| start <= record).saturating_sub(1);
        self.segments[segment].seek(record - self.starts[segment])?;
        self.current = segment;
        self.pos = record;
        Ok(())
    }

    fn read_record(&mut self) -> Result<Record> {
        if self.pos >= self.len {
            bail!("read past end of input ({} records)", self.len);
        }
        while self.pos - self.starts[self.current] >= self.segments[self.current].len() {
            self.current += 1;
            self.segments[self.current].seek(0)?;
        }
        let record = self.segments[self.current].read_record()?;
        self.pos += 1;
        Ok(record)
    }
}

/// Pre-size the shared output file to `bytes` (sparse where the filesystem
/// allows it). Must run on peer 0 before any peer opens a write window.
pub fn presize_output(path: &Path, bytes: u64) -> Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("create output {}", path.display()))?;
    file.set_len(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Writable window of `count` records starting at record `start` of the
/// pre-sized shared output file. Peers hold disjoint windows, so concurrent
/// writers need no further coordination.
pub struct SharedFileOutput {
    file: File,
    start: u64,
    count: u64,
    window_elements: u64,
    window: Option<MmapMut>,
    window_used: u64,
    window_len: u64,
    written: u64,
}

impl SharedFileOutput {
    pub fn open(path: &Path, start: u64, count: u64, window_elements: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("open output {}", path.display()))?;
        Ok(Self {
            file,
            start,
            count,
            window_elements: window_elements.max(1),
            window: None,
            window_used: 0,
            window_len: 0,
            written: 0,
        })
    }

    fn remap(&mut self) -> Result<()> {
        if let Some(map) = self.window.take() {
            map.flush()?;
        }
        self.window_len = (self.count - self.written).min(self.window_elements);
        self.window_used = 0;
        let map = unsafe {
            MmapOptions::new()
                .offset((self.start + self.written) * RECORD_LEN as u64)
                .len(self.window_len as usize * RECORD_LEN)
                .map_mut(&self.file)
                .context("map output window")?
        };
        self.window = Some(map);
        Ok(())
    }

    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        if self.written >= self.count {
            bail!("write past this peer's reserved window of {} records", self.count);
        }
        if self.window.is_none() || self.window_used == self.window_len {
            self.remap()?;
        }
        let window = self.window.as_mut().expect("window after remap");
        let at = self.window_used as usize * RECORD_LEN;
        record.write_to(&mut window[at..at + RECORD_LEN]);
        self.window_used += 1;
        self.written += 1;
        Ok(())
    }

    pub fn write_records(&mut self, records: &[Record]) -> Result<()> {
        for record in records {
            self.write_record(record)?;
        }
        Ok(())
    }

    /// Flush the live window and sync the file; the durability point.
    pub fn close(mut self) -> Result<()> {
        if let Some(map) = self.window.take() {
            map.flush()?;
        }
        self.file.sync_all()?;
        Ok(())
    }
}

/// Buffered sequential record writer for per-peer and token-ordered output.
pub struct StreamOutput {
    out: BufWriter<File>,
}

impl StreamOutput {
    /// Create or truncate `path`.
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("create output {}", path.display()))?;
        Ok(Self { out: BufWriter::new(file) })
    }

    /// Open `path` for appending, creating it if missing.
    pub fn append(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("append to output {}", path.display()))?;
        Ok(Self { out: BufWriter::new(file) })
    }

    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        self.out.write_all(record.key())?;
        self.out.write_all(record.value())?;
        Ok(())
    }

    pub fn write_records(&mut self, records: &[Record]) -> Result<()> {
        for record in records {
            self.write_record(record)?;
        }
        Ok(())
    }

    /// Flush buffers and sync the file; the durability point.
    pub fn close(mut self) -> Result<()> {
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        Ok(())
    }
}

/// Path of peer `id`'s partition file for `prefix`.
pub fn part_path(prefix: &Path, id: usize) -> PathBuf {
    let mut name = prefix.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(format!("-part-{id:05}"));
    prefix.with_file_name(name)
}

/// Remove partition files left behind by a previous run with this prefix.
pub fn remove_stale_parts(prefix: &Path) -> Result<usize> {
    let parent = match prefix.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let Some(base) = prefix.file_name().and_then(|n| n.to_str()) else {
        bail!("output prefix {} has no file name", prefix.display());
    };
    let marker = format!("{base}-part-");
    let mut removed = 0;
    if let Ok(entries) = std::fs::read_dir(&parent) {
        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name();
            if name.to_str().is_some_and(|n| n.starts_with(&marker)) {
                std::fs::remove_file(entry.path())
                    .with_context(|| format!("remove stale output {:?}", entry.path()))?;
                removed += 1;
            }
        }
    }
    Ok(removed)
}
