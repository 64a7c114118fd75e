use crate::constants::{
    DEFAULT_FLUSH_BYTES, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_LOCAL_BATCH_BYTES,
    DEFAULT_WRITER_QUEUE_CAP, ENV_FLUSH_BYTES, ENV_FLUSH_INTERVAL_MS, ENV_LOCAL_BATCH_BYTES,
    ENV_WRITER_QUEUE_CAP,
};
use crate::error::{TaskError, TaskResult};
use crate::io::{open_writer, write_bin};
use crate::utils::env_parse;
use crossbeam_channel as channel;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// Writer pool for the shuffle files of one map attempt.
// Strategy: one dedicated IO thread per partition file. Senders are bounded
// for backpressure; each thread batches writes up to flush_bytes or
// flush_interval, whichever comes first.
//
// IO threads report their first write error through their join handle, and a
// failed thread drops its receiver so producers notice at the next send.
// Either way the attempt fails and the retry starts from a clean directory.

enum WriterMsg {
    Data(Vec<u8>),
    Close,
}

pub struct WriterPool {
    senders: Vec<channel::Sender<WriterMsg>>,
    bytes_written: Arc<Vec<AtomicU64>>,
}

pub struct WriterJoiner {
    handles: Vec<thread::JoinHandle<std::io::Result<()>>>,
}

impl WriterJoiner {
    /// Wait for every IO thread; the first failure wins.
    pub fn join_all(&mut self) -> TaskResult<()> {
        let mut first: Option<std::io::Error> = None;
        for handle in self.handles.drain(..) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first.is_none() {
                        first = Some(e);
                    }
                }
                Err(_) => return Err(TaskError::corrupt("shuffle writer thread panicked")),
            }
        }
        match first {
            None => Ok(()),
            Some(e) => Err(TaskError::exec("shuffle writer", e)),
        }
    }
}

impl WriterPool {
    /// Spawn one IO thread per partition, writing `part{p}.bin` under `dir`.
    pub fn new(dir: &std::path::Path, num_partitions: usize) -> (Self, WriterJoiner) {
        let flush_bytes: usize = env_parse(ENV_FLUSH_BYTES, DEFAULT_FLUSH_BYTES);
        let flush_interval =
            Duration::from_millis(env_parse(ENV_FLUSH_INTERVAL_MS, DEFAULT_FLUSH_INTERVAL_MS));
        let queue_cap: usize = env_parse(ENV_WRITER_QUEUE_CAP, DEFAULT_WRITER_QUEUE_CAP);

        let bytes_written: Arc<Vec<AtomicU64>> =
            Arc::new((0..num_partitions).map(|_| AtomicU64::new(0)).collect());
        let mut senders = Vec::with_capacity(num_partitions);
        let mut handles = Vec::with_capacity(num_partitions);
        for part in 0..num_partitions {
            let (tx, rx) = channel::bounded::<WriterMsg>(queue_cap);
            let path = dir.join(format!("part{}.bin", part));
            let counters = Arc::clone(&bytes_written);
            let handle =
                thread::spawn(move || run_writer(path, part, rx, counters, flush_bytes, flush_interval));
            senders.push(tx);
            handles.push(handle);
        }
        (Self { senders, bytes_written }, WriterJoiner { handles })
    }

    /// Hand a chunk of framed records to partition `part`'s IO thread. The
    /// pool takes ownership; blocking here is the backpressure.
    pub fn write_chunk(&self, part: usize, bytes: Vec<u8>) -> TaskResult<()> {
        self.senders[part]
            .send(WriterMsg::Data(bytes))
            .map_err(|_| TaskError::corrupt("shuffle writer exited early"))
    }

    /// Ask every IO thread to flush and exit; follow with
    /// [`WriterJoiner::join_all`].
    pub fn close_all(&self) {
        for tx in &self.senders {
            let _ = tx.send(WriterMsg::Close);
        }
    }

    pub fn total_bytes_written(&self) -> u64 {
        self.bytes_written.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

fn run_writer(
    path: PathBuf,
    part: usize,
    rx: channel::Receiver<WriterMsg>,
    counters: Arc<Vec<AtomicU64>>,
    flush_bytes: usize,
    flush_interval: Duration,
) -> std::io::Result<()> {
    let mut writer = open_writer(&path)?;
    let mut buf: Vec<u8> = Vec::with_capacity(flush_bytes);
    let mut last_flush = Instant::now();
    loop {
        let timeout = flush_interval.saturating_sub(last_flush.elapsed());
        match rx.recv_timeout(timeout) {
            Ok(WriterMsg::Data(bytes)) => buf.extend_from_slice(&bytes),
            // Disconnection means the pool was dropped without Close; the
            // attempt is being abandoned, so just drain and leave.
            Ok(WriterMsg::Close) | Err(channel::RecvTimeoutError::Disconnected) => {
                if !buf.is_empty() {
                    writer.write_all(&buf)?;
                    counters[part].fetch_add(buf.len() as u64, Ordering::Relaxed);
                    buf.clear();
                }
                writer.flush()?;
                return Ok(());
            }
            Err(channel::RecvTimeoutError::Timeout) => {}
        }
        if buf.len() >= flush_bytes || last_flush.elapsed() >= flush_interval {
            if !buf.is_empty() {
                writer.write_all(&buf)?;
                counters[part].fetch_add(buf.len() as u64, Ordering::Relaxed);
                buf.clear();
            }
            writer.flush()?;
            last_flush = Instant::now();
        }
    }
}

/// Task-local staging in front of the pool: per-partition buffers that
/// accumulate framed records and ship them as chunks, so IO threads see few
/// large sends instead of many small ones.
pub struct TaskWriter<'a> {
    pool: &'a WriterPool,
    local_buffers: Vec<Vec<u8>>,
    batch_bytes: usize,
    records: u64,
    flushes: u64,
    bytes_sent: u64,
}

impl<'a> TaskWriter<'a> {
    pub fn new(pool: &'a WriterPool, num_partitions: usize) -> Self {
        let batch_bytes: usize = env_parse(ENV_LOCAL_BATCH_BYTES, DEFAULT_LOCAL_BATCH_BYTES);
        let local_buffers = (0..num_partitions).map(|_| Vec::with_capacity(batch_bytes)).collect();
        Self { pool, local_buffers, batch_bytes, records: 0, flushes: 0, bytes_sent: 0 }
    }

    /// Frame one record into partition `part`'s buffer.
    pub fn emit(&mut self, part: usize, key_bytes: &[u8], value_bytes: &[u8]) -> TaskResult<()> {
        write_bin(&mut self.local_buffers[part], key_bytes, value_bytes);
        self.records += 1;
        if self.local_buffers[part].len() >= self.batch_bytes {
            self.flush_partition(part)?;
        }
        Ok(())
    }

    pub fn flush_all(&mut self) -> TaskResult<()> {
        for part in 0..self.local_buffers.len() {
            if !self.local_buffers[part].is_empty() {
                self.flush_partition(part)?;
            }
        }
        Ok(())
    }

    fn flush_partition(&mut self, part: usize) -> TaskResult<()> {
        let chunk = std::mem::take(&mut self.local_buffers[part]);
        self.bytes_sent += chunk.len() as u64;
        self.flushes += 1;
        self.pool.write_chunk(part, chunk)
    }

    /// `(records, flushes, bytes_sent)` for phase statistics.
    pub fn stats(&self) -> (u64, u64, u64) {
        (self.records, self.flushes, self.bytes_sent)
    }
}
