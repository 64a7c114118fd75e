//! Environment variables and defaults for runtime tuning.
//!
//! Everything here is a throughput knob with no effect on job results, which
//! is why these stay out of [`crate::config::JobConfig`].

/// Keep the per-job scratch directory after a successful run.
pub const ENV_KEEP_INTERMEDIATES: &str = "RIFFLE_KEEP_INTERMEDIATES";

/// Size of a map task's per-partition staging buffer before it ships a chunk
/// to the writer pool.
pub const ENV_LOCAL_BATCH_BYTES: &str = "RIFFLE_LOCAL_BATCH_BYTES";

/// Writer IO thread: flush once this many buffered bytes accumulate.
pub const ENV_FLUSH_BYTES: &str = "RIFFLE_FLUSH_BYTES";

/// Writer IO thread: flush at least this often regardless of volume.
pub const ENV_FLUSH_INTERVAL_MS: &str = "RIFFLE_FLUSH_INTERVAL_MS";

/// Bounded depth of each writer channel; senders block when it fills.
pub const ENV_WRITER_QUEUE_CAP: &str = "RIFFLE_WRITER_QUEUE_CAP";

/// Distinct keys held by the combine buffer before it spills to the shuffle.
pub const ENV_COMBINE_SPILL_ENTRIES: &str = "RIFFLE_COMBINE_SPILL_ENTRIES";

pub const DEFAULT_LOCAL_BATCH_BYTES: usize = 256 * 1024;
pub const DEFAULT_FLUSH_BYTES: usize = 4 * 1024 * 1024;
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 200;
pub const DEFAULT_WRITER_QUEUE_CAP: usize = 1024;
pub const DEFAULT_COMBINE_SPILL_ENTRIES: usize = 64 * 1024;
