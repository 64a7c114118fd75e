//! Key routing and the sorted view a reduce task sees.

use crate::error::{TaskError, TaskResult};
use crate::io::read_bin_line;
use memmap2::Mmap;
use rayon::prelude::*;
use std::collections::hash_map::DefaultHasher;
use std::fs::File;
use std::hash::Hasher;
use std::path::PathBuf;

/// Route an encoded key to one of `num_partitions` reduce partitions.
///
/// Pure function of the key bytes, so every pair carrying the same key lands
/// in the same partition no matter which map task or attempt emitted it.
/// `DefaultHasher::new()` uses fixed keys, which keeps the assignment stable
/// across processes and runs.
pub fn partition_for_key(key_bytes: &[u8], num_partitions: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    hasher.write(key_bytes);
    (hasher.finish() as usize) % num_partitions
}

/// Every intermediate record destined for one reduce partition, indexed and
/// sorted by raw key bytes.
///
/// Files are mapped rather than read; the index holds byte ranges into the
/// maps. `ShuffleKey` encodings compare like their native values, so
/// iteration yields natural ascending key order with equal keys adjacent.
#[derive(Debug)]
pub struct SortedRun {
    maps: Vec<Mmap>,
    // (map index, record start, key end, record end); key bytes occupy
    // [start + 8, key end) behind the two u32 length prefixes.
    index: Vec<(usize, usize, usize, usize)>,
}

impl SortedRun {
    /// Map and index `paths`, then sort the combined index. Zero-length
    /// files (partitions that received no records from some map task) are
    /// skipped. A file whose framing does not cover its full length is
    /// reported as corrupt.
    pub fn build(paths: &[PathBuf]) -> TaskResult<Self> {
        let mut maps = Vec::with_capacity(paths.len());
        let mut index = Vec::new();
        for path in paths {
            let file = File::open(path)
                .map_err(|e| TaskError::exec(format!("open {}", path.display()), e))?;
            let len = file
                .metadata()
                .map_err(|e| TaskError::exec(format!("stat {}", path.display()), e))?
                .len();
            if len == 0 {
                continue;
            }
            let map = unsafe { Mmap::map(&file) }
                .map_err(|e| TaskError::exec(format!("mmap {}", path.display()), e))?;
            let map_idx = maps.len();
            let bytes = &map[..];
            let mut off = 0usize;
            while let Some((key, _value, next)) = read_bin_line(bytes, off) {
                index.push((map_idx, off, off + 8 + key.len(), next));
                off = next;
            }
            if off != bytes.len() {
                return Err(TaskError::corrupt(format!(
                    "truncated record at byte {} of {}",
                    off,
                    path.display()
                )));
            }
            maps.push(map);
        }

        index.par_sort_by(|&(fa, sa, ka, _), &(fb, sb, kb, _)| {
            maps[fa][sa + 8..ka].cmp(&maps[fb][sb + 8..kb])
        });
        Ok(Self { maps, index })
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Iterate `(key bytes, value bytes)` in sorted key order.
    pub fn records(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.index.iter().map(move |&(f, start, key_end, end)| {
            let bytes = &self.maps[f][..];
            (&bytes[start + 8..key_end], &bytes[key_end..end])
        })
    }
}
