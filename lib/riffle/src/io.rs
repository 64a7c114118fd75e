use crate::api::Record;
use crate::error::{Error, Result, TaskError, TaskResult};
use std::fmt::Display;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

pub fn ensure_dir(path: impl AsRef<Path>) -> Result<()> {
    fs::create_dir_all(path.as_ref())
        .map_err(|e| Error::setup(format!("create_dir_all {}", path.as_ref().display()), e))
}

pub fn list_files_recursive(path: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let root = path.as_ref();
    let mut files = Vec::new();
    for entry in walkdir::WalkDir::new(root) {
        let entry = entry.map_err(|e| Error::setup(format!("walk {}", root.display()), e.into()))?;
        if entry.file_type().is_file() {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(files)
}

pub fn open_writer(path: impl AsRef<Path>) -> std::io::Result<BufWriter<File>> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    Ok(BufWriter::new(file))
}

// ========== Input records ==========

/// Iterate a file as offset-tagged text records.
///
/// Lines end at `\n`; a trailing `\r` is stripped. A line that is not valid
/// UTF-8 yields [`TaskError::Malformed`] carrying the byte offset, and the
/// iterator is safe to continue past it.
pub struct RecordReader {
    path: PathBuf,
    reader: BufReader<File>,
    offset: u64,
    buf: Vec<u8>,
}

pub fn read_records(path: impl AsRef<Path>) -> TaskResult<RecordReader> {
    let path = path.as_ref().to_path_buf();
    let file = File::open(&path)
        .map_err(|e| TaskError::exec(format!("open {}", path.display()), e))?;
    Ok(RecordReader { path, reader: BufReader::new(file), offset: 0, buf: Vec::new() })
}

impl Iterator for RecordReader {
    type Item = TaskResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        let start = self.offset;
        let n = match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => return None,
            Ok(n) => n,
            Err(e) => {
                return Some(Err(TaskError::exec(format!("read {}", self.path.display()), e)))
            }
        };
        self.offset += n as u64;
        let mut end = self.buf.len();
        if end > 0 && self.buf[end - 1] == b'\n' {
            end -= 1;
        }
        if end > 0 && self.buf[end - 1] == b'\r' {
            end -= 1;
        }
        match std::str::from_utf8(&self.buf[..end]) {
            Ok(s) => Some(Ok(Record { offset: start, line: s.to_owned() })),
            Err(_) => Some(Err(TaskError::Malformed { path: self.path.clone(), offset: start })),
        }
    }
}

// ========== Binary intermediate framing ==========
//
// One shuffle record is `[klen u32 le][vlen u32 le][key bytes][value bytes]`.
// Key bytes come from `ShuffleKey::encode`, value bytes from bincode.

/// Append one framed record to `buf`.
pub fn write_bin(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
}

/// Decode the record starting at `off`, returning key bytes, value bytes and
/// the offset of the next record. Returns `None` at end of input or when the
/// remaining bytes cannot hold a whole record; callers distinguish a clean
/// end from truncation by comparing the final offset with the buffer length.
pub fn read_bin_line(bytes: &[u8], off: usize) -> Option<(&[u8], &[u8], usize)> {
    if off + 8 > bytes.len() {
        return None;
    }
    let klen = u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()) as usize;
    let vlen = u32::from_le_bytes(bytes[off + 4..off + 8].try_into().unwrap()) as usize;
    let key_start = off + 8;
    let end = key_start.checked_add(klen)?.checked_add(vlen)?;
    if end > bytes.len() {
        return None;
    }
    Some((&bytes[key_start..key_start + klen], &bytes[key_start + klen..end], end))
}

// ========== Output sinks ==========

/// Writes the reduce output of one partition.
pub trait SinkWriter<T> {
    fn write(&mut self, record: &T) -> TaskResult<()>;
    fn finish(self) -> TaskResult<()>;
}

/// Factory for per-partition output writers. `open` is called once per
/// reduce attempt with the staging path the attempt writes to.
pub trait Sink<T> {
    type Writer: SinkWriter<T>;

    fn open(&self, path: &Path) -> TaskResult<Self::Writer>;
}

/// Tab-separated text lines, one `<key>\t<value>` record per line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextLineSink;

pub struct TextLineWriter {
    writer: BufWriter<File>,
}

impl<K: Display, V: Display> Sink<(K, V)> for TextLineSink {
    type Writer = TextLineWriter;

    fn open(&self, path: &Path) -> TaskResult<TextLineWriter> {
        let writer = open_writer(path)
            .map_err(|e| TaskError::exec(format!("create {}", path.display()), e))?;
        Ok(TextLineWriter { writer })
    }
}

impl<K: Display, V: Display> SinkWriter<(K, V)> for TextLineWriter {
    fn write(&mut self, record: &(K, V)) -> TaskResult<()> {
        writeln!(self.writer, "{}\t{}", record.0, record.1)
            .map_err(|e| TaskError::exec("write output record", e))
    }

    fn finish(mut self) -> TaskResult<()> {
        self.writer.flush().map_err(|e| TaskError::exec("flush output", e))
    }
}
