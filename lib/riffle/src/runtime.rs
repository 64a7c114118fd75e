//! Local job driver: map tasks with optional combining, a hash-routed
//! shuffle with a full barrier, then sorted reduce tasks. Tasks retry by
//! recomputation and publish results with rename-based commits.

use crate::api::{Combiner, Mapper, Pipeline, Reducer, ShuffleKey};
use crate::config::{JobConfig, MalformedPolicy};
use crate::constants::{DEFAULT_COMBINE_SPILL_ENTRIES, ENV_COMBINE_SPILL_ENTRIES, ENV_KEEP_INTERMEDIATES};
use crate::counter::{CounterSet, TaskContext, INPUT_RECORDS, SKIPPED_RECORDS};
use crate::error::{Error, Result, TaskError, TaskResult};
use crate::io::{ensure_dir, list_files_recursive, read_records, Sink, SinkWriter};
use crate::shuffle::{partition_for_key, SortedRun};
use crate::stats::{MapTaskStats, ReduceTaskStats, StatsCollector};
use crate::utils::{env_parse, env_var_truthy, new_job_id};
use crate::writer::{TaskWriter, WriterPool};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Cooperative cancellation flag shared between a running job and its
/// caller. Tasks poll it; setting it stops the job at the next task
/// boundary without touching partitions that already committed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// What a finished job hands back: merged counters, phase statistics, and
/// the committed output partition files in partition order.
#[derive(Debug)]
pub struct JobSummary {
    pub counters: CounterSet,
    pub stats: StatsCollector,
    pub output_dir: PathBuf,
    pub partition_files: Vec<PathBuf>,
}

struct MapAttemptReport {
    counters: CounterSet,
    stats: MapTaskStats,
}

/// Single-process pipeline executor. Map and reduce tasks run on the rayon
/// thread pool; intermediates live in a per-job scratch directory.
pub struct LocalPipeline {
    inputs: Vec<String>,
    output: Option<String>,
    config: JobConfig,
    cancel: CancelToken,
}

impl LocalPipeline {
    pub fn new(config: JobConfig) -> Self {
        Self { inputs: Vec::new(), output: None, config, cancel: CancelToken::new() }
    }

    /// Clone of the job's cancel token, usable from any thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }
}

impl Default for LocalPipeline {
    fn default() -> Self {
        Self::new(JobConfig::default())
    }
}

impl Pipeline for LocalPipeline {
    fn add_input(&mut self, input_path: impl Into<String>) {
        self.inputs.push(input_path.into());
    }

    fn add_output(&mut self, output_path: impl Into<String>) {
        self.output = Some(output_path.into());
    }

    fn map_reduce<M, C, R, S>(
        &mut self,
        mapper: M,
        combiner: C,
        reducer: R,
        sink: S,
    ) -> Result<JobSummary>
    where
        M: Mapper + Send + Sync + 'static,
        C: Combiner<M::Key, M::Value> + Send + Sync + 'static,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Send + Sync + 'static,
        S: Sink<R::Out> + Send + Sync + 'static,
    {
        let job_start = Instant::now();
        let config = &self.config;
        let cancel = &self.cancel;
        config.validate()?;

        let output_dir = PathBuf::from(
            self.output
                .clone()
                .ok_or_else(|| Error::InvalidArgument("output path not set".into()))?,
        );
        if output_dir.exists() {
            return Err(Error::OutputConflict(output_dir));
        }

        let num_reducers = config.reduce_partition_count;
        let job_id = new_job_id();
        let scratch_root =
            config.scratch_dir.clone().unwrap_or_else(|| PathBuf::from(".riffle_runs"));
        let launch_root = scratch_root.join(&job_id);
        let map_out_dir = launch_root.join("map_out");
        ensure_dir(&map_out_dir)?;
        ensure_dir(&output_dir)?;
        let keep_intermediates =
            config.keep_intermediates || env_var_truthy(ENV_KEEP_INTERMEDIATES);

        let mut all_files = Vec::new();
        for input in &self.inputs {
            all_files.append(&mut list_files_recursive(input)?);
        }
        let map_tasks = config.map_tasks.unwrap_or_else(num_cpus::get).min(all_files.len().max(1));
        let chunks = chunk_files(&all_files, map_tasks);

        let fd_limit = get_fd_soft_limit();
        info!(
            job_id = %job_id,
            input_files = all_files.len(),
            map_tasks,
            reducers = num_reducers,
            combine = config.combine_enabled,
            fd_soft_limit = fd_limit.unwrap_or(0),
            "Starting map phase"
        );

        // Map phase. Every task must commit before any reduce task starts;
        // the collect below is that barrier.
        let map_stats: Mutex<Vec<MapTaskStats>> = Mutex::new(Vec::new());
        let merged_counters: Mutex<CounterSet> = Mutex::new(CounterSet::new());
        let map_phase_start = Instant::now();
        let map_results: Vec<Result<()>> = (0..map_tasks)
            .into_par_iter()
            .map(|task_id| -> Result<()> {
                let spec = MapTaskSpec {
                    task_id,
                    files: &chunks[task_id],
                    num_reducers,
                    map_out_dir: &map_out_dir,
                    config,
                    cancel,
                };
                let report =
                    run_attempts(&format!("map task {}", task_id), config.max_task_attempts, cancel, |attempt| {
                        run_map_attempt(&spec, attempt, &mapper, &combiner)
                    })?;
                merged_counters.lock().unwrap().merge(&report.counters);
                map_stats.lock().unwrap().push(report.stats);
                Ok(())
            })
            .collect();
        for result in map_results {
            result?;
        }

        let mut stats = StatsCollector::new();
        let map_stats_vec = map_stats.into_inner().unwrap();
        stats.record_map(&map_stats_vec, map_phase_start.elapsed().as_millis() as u64);
        if let Some(m) = &stats.map {
            info!(phase = "map",
                  tasks = m.tasks,
                  total_records = m.total_records_in,
                  total_emits = m.total_emits,
                  total_records_out = m.total_records_out,
                  total_bytes_out = m.total_bytes_out,
                  total_flushes = m.total_flushes,
                  min_task_ms = m.min_task_ms, max_task_ms = m.max_task_ms,
                  wall_ms = m.wall_ms,
                  "Map phase complete");
        }

        // Reduce phase.
        let reduce_phase_start = Instant::now();
        let reduce_results: Vec<Result<(PathBuf, ReduceTaskStats)>> = (0..num_reducers)
            .into_par_iter()
            .map(|partition| {
                run_attempts(
                    &format!("reduce task {}", partition),
                    config.max_task_attempts,
                    cancel,
                    |_attempt| {
                        run_reduce_attempt(partition, &map_out_dir, &output_dir, &reducer, &sink, cancel)
                    },
                )
            })
            .collect();
        let mut partition_files = Vec::with_capacity(num_reducers);
        let mut reduce_stats_vec = Vec::with_capacity(num_reducers);
        for result in reduce_results {
            let (path, task_stats) = result?;
            partition_files.push(path);
            reduce_stats_vec.push(task_stats);
        }

        stats.record_reduce(&reduce_stats_vec, reduce_phase_start.elapsed().as_millis() as u64);
        if let Some(r) = &stats.reduce {
            info!(phase = "reduce",
                  reducers = r.reducers,
                  total_records = r.total_records_in,
                  total_groups = r.total_groups,
                  min_reducer_ms = r.min_reducer_ms, max_reducer_ms = r.max_reducer_ms,
                  wall_ms = r.wall_ms,
                  "Reduce phase complete");
        }

        if !keep_intermediates {
            let _ = fs::remove_dir_all(&launch_root);
        }

        let counters = merged_counters.into_inner().unwrap();
        info!(job_id = %job_id, wall_ms = job_start.elapsed().as_millis() as u64, "Job complete");
        Ok(JobSummary { counters, stats, output_dir, partition_files })
    }
}

/// Run one task up to `max_attempts` times. Retries cover environmental
/// failures only; deterministic errors and cancellation escalate at once.
fn run_attempts<T>(
    label: &str,
    max_attempts: usize,
    cancel: &CancelToken,
    mut attempt: impl FnMut(usize) -> TaskResult<T>,
) -> Result<T> {
    let mut last: Option<TaskError> = None;
    for n in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match attempt(n) {
            Ok(value) => return Ok(value),
            Err(TaskError::Cancelled) => return Err(Error::Cancelled),
            Err(e) if !e.is_retryable() => {
                return Err(Error::JobFailed { task: label.to_string(), attempts: n, source: e });
            }
            Err(e) => {
                warn!(task = label, attempt = n, max_attempts, error = %e, "task attempt failed");
                last = Some(e);
            }
        }
    }
    // max_attempts >= 1 is enforced by JobConfig::validate, so `last` is set
    // whenever the loop falls through.
    let source = last.unwrap_or_else(|| TaskError::corrupt("no attempts executed"));
    Err(Error::JobFailed { task: label.to_string(), attempts: max_attempts, source })
}

/// Round-robin assignment of input files to map tasks.
fn chunk_files(files: &[PathBuf], num_tasks: usize) -> Vec<Vec<PathBuf>> {
    let mut chunks = vec![Vec::new(); num_tasks];
    for (idx, file) in files.iter().enumerate() {
        chunks[idx % num_tasks].push(file.clone());
    }
    chunks
}

struct MapTaskSpec<'a> {
    task_id: usize,
    files: &'a [PathBuf],
    num_reducers: usize,
    map_out_dir: &'a Path,
    config: &'a JobConfig,
    cancel: &'a CancelToken,
}

/// One map attempt: read the task's files, map and optionally combine, and
/// commit `attempt_t{id}_a{n}` to `task{id}` with a rename. Reduce tasks
/// only ever read committed `task*` directories, so a failed attempt's
/// partials are invisible to them.
fn run_map_attempt<M, C>(
    spec: &MapTaskSpec<'_>,
    attempt: usize,
    mapper: &M,
    combiner: &C,
) -> TaskResult<MapAttemptReport>
where
    M: Mapper,
    C: Combiner<M::Key, M::Value>,
{
    let task_start = Instant::now();
    let attempt_dir = spec.map_out_dir.join(format!("attempt_t{}_a{}", spec.task_id, attempt));
    let committed_dir = spec.map_out_dir.join(format!("task{}", spec.task_id));
    // A failed attempt leaves its directory behind; remove it before the
    // retry.
    if attempt > 1 {
        let previous =
            spec.map_out_dir.join(format!("attempt_t{}_a{}", spec.task_id, attempt - 1));
        let _ = fs::remove_dir_all(&previous);
    }
    fs::create_dir_all(&attempt_dir)
        .map_err(|e| TaskError::exec(format!("create {}", attempt_dir.display()), e))?;

    debug!(task_id = spec.task_id, attempt, num_files = spec.files.len(), "map task starting");

    let (pool, mut joiner) = WriterPool::new(&attempt_dir, spec.num_reducers);
    let mut writer = TaskWriter::new(&pool, spec.num_reducers);
    let mut ctx = TaskContext::new();

    let inner = map_records(spec, mapper, combiner, &mut writer, &mut ctx);
    pool.close_all();
    let joined = joiner.join_all();
    let (records_in, total_emits) = inner?;
    joined?;

    let (records_out, total_flushes, total_bytes_out) = writer.stats();
    fs::rename(&attempt_dir, &committed_dir)
        .map_err(|e| TaskError::exec(format!("commit {}", committed_dir.display()), e))?;
    debug!(task_id = spec.task_id, attempt, records_in, total_emits, "map task committed");

    Ok(MapAttemptReport {
        counters: ctx.counters,
        stats: MapTaskStats {
            task_id: spec.task_id,
            num_files: spec.files.len() as u64,
            records_in,
            total_emits,
            records_out,
            total_bytes_out,
            total_flushes,
            wall_ms: task_start.elapsed().as_millis() as u64,
        },
    })
}

/// The record loop of one map attempt. Returns `(records_in, emits)`.
fn map_records<M, C>(
    spec: &MapTaskSpec<'_>,
    mapper: &M,
    combiner: &C,
    writer: &mut TaskWriter<'_>,
    ctx: &mut TaskContext,
) -> TaskResult<(u64, u64)>
where
    M: Mapper,
    C: Combiner<M::Key, M::Value>,
{
    let mut buffer = if spec.config.combine_enabled {
        Some(CombineBuffer::new(env_parse(ENV_COMBINE_SPILL_ENTRIES, DEFAULT_COMBINE_SPILL_ENTRIES)))
    } else {
        None
    };
    let mut records_in: u64 = 0;
    let mut emits: u64 = 0;

    for file in spec.files {
        for record in read_records(file)? {
            if spec.cancel.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            match record {
                Ok(record) => {
                    records_in += 1;
                    ctx.counters.incr(INPUT_RECORDS, 1);
                    let mut emit_err: Option<TaskError> = None;
                    let mut emit = |key: M::Key, value: M::Value| {
                        emits += 1;
                        if emit_err.is_some() {
                            return;
                        }
                        let routed = match buffer.as_mut() {
                            Some(buffer) => {
                                buffer.insert(key, value, combiner, writer, spec.num_reducers)
                            }
                            None => write_pair(&key, &value, writer, spec.num_reducers),
                        };
                        if let Err(e) = routed {
                            emit_err = Some(e);
                        }
                    };
                    mapper.do_map(&record, ctx, &mut emit);
                    if let Some(e) = emit_err {
                        return Err(e);
                    }
                }
                Err(TaskError::Malformed { path, offset }) => match spec.config.malformed_records {
                    MalformedPolicy::Skip => {
                        warn!(path = %path.display(), offset, "skipping malformed record");
                        ctx.counters.incr(SKIPPED_RECORDS, 1);
                    }
                    MalformedPolicy::Abort => {
                        return Err(TaskError::Malformed { path, offset });
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    if let Some(buffer) = buffer.as_mut() {
        buffer.spill(writer, spec.num_reducers)?;
    }
    writer.flush_all()?;
    Ok((records_in, emits))
}

/// Encode one pair, route it by key hash, and stage it for its partition.
fn write_pair<K, V>(
    key: &K,
    value: &V,
    writer: &mut TaskWriter<'_>,
    num_reducers: usize,
) -> TaskResult<()>
where
    K: ShuffleKey,
    V: Serialize,
{
    let mut key_bytes = Vec::new();
    key.encode(&mut key_bytes);
    let value_bytes = bincode::serialize(value)
        .map_err(|e| TaskError::corrupt(format!("encode shuffle value: {}", e)))?;
    let part = partition_for_key(&key_bytes, num_reducers);
    writer.emit(part, &key_bytes, &value_bytes)
}

/// Bounded in-memory pre-aggregation for one map attempt. Spills to the
/// shuffle writers once it holds `spill_entries` distinct keys. Drain order
/// is hash-map order; the shuffle sort restores grouping.
struct CombineBuffer<K, V> {
    entries: HashMap<K, V>,
    spill_entries: usize,
}

impl<K, V> CombineBuffer<K, V>
where
    K: ShuffleKey + Hash + Eq,
    V: Serialize,
{
    fn new(spill_entries: usize) -> Self {
        Self { entries: HashMap::new(), spill_entries: spill_entries.max(1) }
    }

    fn insert<C: Combiner<K, V>>(
        &mut self,
        key: K,
        value: V,
        combiner: &C,
        writer: &mut TaskWriter<'_>,
        num_reducers: usize,
    ) -> TaskResult<()> {
        match self.entries.remove(&key) {
            Some(mut acc) => {
                combiner.combine(&key, &mut acc, value);
                self.entries.insert(key, acc);
            }
            None => {
                self.entries.insert(key, value);
            }
        }
        if self.entries.len() >= self.spill_entries {
            self.spill(writer, num_reducers)?;
        }
        Ok(())
    }

    fn spill(&mut self, writer: &mut TaskWriter<'_>, num_reducers: usize) -> TaskResult<()> {
        for (key, value) in self.entries.drain() {
            write_pair(&key, &value, writer, num_reducers)?;
        }
        Ok(())
    }
}

/// One reduce attempt: sort this partition's committed shuffle files, fold
/// each key group through the reducer, and commit the output file by
/// renaming a staged `.part-{:05}.tsv.tmp` inside the output directory. A
/// failed attempt removes its staging file on the way out.
fn run_reduce_attempt<R, S>(
    partition: usize,
    map_out_dir: &Path,
    output_dir: &Path,
    reducer: &R,
    sink: &S,
    cancel: &CancelToken,
) -> TaskResult<(PathBuf, ReduceTaskStats)>
where
    R: Reducer,
    S: Sink<R::Out>,
{
    let task_start = Instant::now();
    let pattern = format!("{}/task*/part{}.bin", map_out_dir.display(), partition);
    let mut paths: Vec<PathBuf> = Vec::new();
    for entry in glob::glob(&pattern)
        .map_err(|e| TaskError::corrupt(format!("bad shuffle glob {}: {}", pattern, e)))?
    {
        let path = entry.map_err(|e| {
            TaskError::exec(format!("list shuffle inputs for partition {}", partition), e)
        })?;
        paths.push(path);
    }
    paths.sort();
    let run = SortedRun::build(&paths)?;
    debug!(partition, shuffle_files = paths.len(), records = run.len(), "reduce task sorted");

    let final_path = output_dir.join(format!("part-{:05}.tsv", partition));
    let tmp_path = output_dir.join(format!(".part-{:05}.tsv.tmp", partition));
    // Debris from a previous attempt of this partition.
    let _ = fs::remove_file(&tmp_path);

    // A failed attempt must not leave staging files in the output directory.
    let (records_in, groups) =
        match reduce_records(&run, reducer, sink, &tmp_path, partition, cancel) {
            Ok(counts) => counts,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
    if let Err(e) = fs::rename(&tmp_path, &final_path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(TaskError::exec(format!("commit {}", final_path.display()), e));
    }

    Ok((
        final_path,
        ReduceTaskStats {
            partition,
            records_in,
            groups,
            wall_ms: task_start.elapsed().as_millis() as u64,
        },
    ))
}

/// The record loop of one reduce attempt: fold each run of equal keys from
/// the sorted shuffle data through the reducer into `tmp_path`. Returns the
/// record and group counts.
fn reduce_records<R, S>(
    run: &SortedRun,
    reducer: &R,
    sink: &S,
    tmp_path: &Path,
    partition: usize,
    cancel: &CancelToken,
) -> TaskResult<(u64, u64)>
where
    R: Reducer,
    S: Sink<R::Out>,
{
    let mut writer = sink.open(tmp_path)?;

    let mut records_in: u64 = 0;
    let mut groups: u64 = 0;
    let mut write_err: Option<TaskError> = None;
    let mut current_key: Option<(Vec<u8>, R::Key)> = None;
    let mut values: Vec<R::ValueIn> = Vec::new();

    for (key_bytes, value_bytes) in run.records() {
        if records_in % 4096 == 0 && cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }
        records_in += 1;
        let value: R::ValueIn = bincode::deserialize(value_bytes).map_err(|e| {
            TaskError::corrupt(format!("corrupt shuffle value in partition {}: {}", partition, e))
        })?;
        match &current_key {
            Some((raw, _)) if raw.as_slice() == key_bytes => values.push(value),
            _ => {
                if let Some((_, key)) = current_key.take() {
                    groups += 1;
                    emit_group(reducer, &key, &mut values, &mut writer, &mut write_err);
                    if let Some(e) = write_err.take() {
                        return Err(e);
                    }
                }
                current_key = Some((key_bytes.to_vec(), <R::Key as ShuffleKey>::decode(key_bytes)?));
                values.clear();
                values.push(value);
            }
        }
    }
    if let Some((_, key)) = current_key.take() {
        groups += 1;
        emit_group(reducer, &key, &mut values, &mut writer, &mut write_err);
        if let Some(e) = write_err.take() {
            return Err(e);
        }
    }

    writer.finish()?;
    Ok((records_in, groups))
}

fn emit_group<R, W>(
    reducer: &R,
    key: &R::Key,
    values: &mut Vec<R::ValueIn>,
    writer: &mut W,
    write_err: &mut Option<TaskError>,
) where
    R: Reducer,
    W: SinkWriter<R::Out>,
{
    reducer.do_reduce(key, values.drain(..), &mut |record| {
        if write_err.is_none() {
            if let Err(e) = writer.write(&record) {
                *write_err = Some(e);
            }
        }
    });
}

#[cfg(target_os = "linux")]
fn get_fd_soft_limit() -> Option<u64> {
    use libc::{getrlimit, rlimit, RLIMIT_NOFILE};
    let mut lim = rlimit { rlim_cur: 0, rlim_max: 0 };
    let rc = unsafe { getrlimit(RLIMIT_NOFILE, &mut lim as *mut rlimit) };
    if rc == 0 {
        Some(lim.rlim_cur as u64)
    } else {
        None
    }
}

#[cfg(not(target_os = "linux"))]
fn get_fd_soft_limit() -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{read_bin_line, write_bin, TextLineSink};
    use crate::skip::SkipPatternSet;
    use crate::wordcount::{SumCombiner, WordCountMapper, WordCountReducer};
    use std::cell::Cell;

    #[test]
    fn chunking_covers_every_file_round_robin() {
        let files: Vec<PathBuf> = (0..7).map(|i| PathBuf::from(format!("f{}.txt", i))).collect();
        let chunks = chunk_files(&files, 3);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 3);
        assert_eq!(chunks[1].len(), 2);
        assert_eq!(chunks[2].len(), 2);
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, files.len());
        assert_eq!(chunks[1][0], PathBuf::from("f1.txt"));
        assert_eq!(chunks[1][1], PathBuf::from("f4.txt"));
    }

    #[test]
    fn attempts_stop_at_first_success() {
        let calls = Cell::new(0);
        let out = run_attempts("t", 4, &CancelToken::new(), |n| {
            calls.set(calls.get() + 1);
            if n < 3 {
                Err(TaskError::corrupt("flaky"))
            } else {
                Ok(n)
            }
        });
        assert_eq!(out.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn retries_exhaust_into_job_failed() {
        let calls = Cell::new(0);
        let out: Result<()> = run_attempts("map task 1", 4, &CancelToken::new(), |_| {
            calls.set(calls.get() + 1);
            Err(TaskError::corrupt("always"))
        });
        assert_eq!(calls.get(), 4);
        match out.unwrap_err() {
            Error::JobFailed { task, attempts, .. } => {
                assert_eq!(task, "map task 1");
                assert_eq!(attempts, 4);
            }
            other => panic!("expected JobFailed, got {other:?}"),
        }
    }

    #[test]
    fn deterministic_errors_are_not_retried() {
        let calls = Cell::new(0);
        let out: Result<()> = run_attempts("map task 0", 4, &CancelToken::new(), |_| {
            calls.set(calls.get() + 1);
            Err(TaskError::Malformed { path: PathBuf::from("in.txt"), offset: 9 })
        });
        assert_eq!(calls.get(), 1);
        match out.unwrap_err() {
            Error::JobFailed { attempts, source, .. } => {
                assert_eq!(attempts, 1);
                assert!(matches!(source, TaskError::Malformed { .. }));
            }
            other => panic!("expected JobFailed, got {other:?}"),
        }
    }

    #[test]
    fn cancelled_token_short_circuits() {
        let token = CancelToken::new();
        token.cancel();
        let out: Result<()> = run_attempts("t", 4, &token, |_| panic!("must not run"));
        assert!(matches!(out.unwrap_err(), Error::Cancelled));
    }

    #[test]
    fn cancellation_inside_an_attempt_is_not_retried() {
        let calls = Cell::new(0);
        let out: Result<()> = run_attempts("t", 4, &CancelToken::new(), |_| {
            calls.set(calls.get() + 1);
            Err(TaskError::Cancelled)
        });
        assert_eq!(calls.get(), 1);
        assert!(matches!(out.unwrap_err(), Error::Cancelled));
    }

    #[test]
    fn combine_buffer_spills_at_capacity_without_losing_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let (pool, mut joiner) = WriterPool::new(dir.path(), 2);
        {
            let mut writer = TaskWriter::new(&pool, 2);
            let mut buffer: CombineBuffer<String, u64> = CombineBuffer::new(2);
            for token in ["the", "fox", "the", "dog", "the"] {
                buffer.insert(token.to_string(), 1, &SumCombiner, &mut writer, 2).unwrap();
            }
            buffer.spill(&mut writer, 2).unwrap();
            writer.flush_all().unwrap();
        }
        pool.close_all();
        joiner.join_all().unwrap();

        let mut totals: HashMap<String, u64> = HashMap::new();
        for part in 0..2 {
            let bytes = fs::read(dir.path().join(format!("part{}.bin", part))).unwrap();
            let mut off = 0;
            while let Some((k, v, next)) = read_bin_line(&bytes, off) {
                let key = String::from_utf8(k.to_vec()).unwrap();
                let value: u64 = bincode::deserialize(v).unwrap();
                *totals.entry(key).or_insert(0) += value;
                off = next;
            }
            assert_eq!(off, bytes.len());
        }
        assert_eq!(totals.get("the"), Some(&3));
        assert_eq!(totals.get("fox"), Some(&1));
        assert_eq!(totals.get("dog"), Some(&1));
    }

    #[test]
    fn cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn reduce_reads_only_committed_task_directories() {
        let dir = tempfile::tempdir().unwrap();
        let map_out = dir.path().join("map_out");
        let out_dir = dir.path().join("out");
        fs::create_dir_all(map_out.join("task0")).unwrap();
        fs::create_dir_all(map_out.join("attempt_t1_a1")).unwrap();
        fs::create_dir_all(&out_dir).unwrap();

        let mut committed = Vec::new();
        write_bin(&mut committed, b"fox", &bincode::serialize(&2u64).unwrap());
        fs::write(map_out.join("task0").join("part0.bin"), committed).unwrap();
        // An abandoned attempt left behind by a task that never committed.
        let mut abandoned = Vec::new();
        write_bin(&mut abandoned, b"fox", &bincode::serialize(&99u64).unwrap());
        fs::write(map_out.join("attempt_t1_a1").join("part0.bin"), abandoned).unwrap();

        let (path, task_stats) = run_reduce_attempt(
            0,
            &map_out,
            &out_dir,
            &WordCountReducer,
            &TextLineSink,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "fox\t2\n");
        assert_eq!(task_stats.records_in, 1);
        assert_eq!(task_stats.groups, 1);
        assert!(!out_dir.join(".part-00000.tsv.tmp").exists());
    }

    #[test]
    fn map_retry_clears_the_previous_attempt_directory() {
        let dir = tempfile::tempdir().unwrap();
        let map_out = dir.path().join("map_out");
        fs::create_dir_all(&map_out).unwrap();
        let input = dir.path().join("in.txt");
        fs::write(&input, "the fox\n").unwrap();

        // What a failed first attempt leaves behind.
        let stale = map_out.join("attempt_t0_a1");
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("part0.bin"), b"junk").unwrap();

        let config = JobConfig::default();
        let cancel = CancelToken::new();
        let files = vec![input];
        let spec = MapTaskSpec {
            task_id: 0,
            files: &files,
            num_reducers: 2,
            map_out_dir: &map_out,
            config: &config,
            cancel: &cancel,
        };
        let mapper = WordCountMapper::new(false, SkipPatternSet::empty());
        run_map_attempt(&spec, 2, &mapper, &SumCombiner).unwrap();

        assert!(!stale.exists(), "previous attempt directory still present");
        assert!(map_out.join("task0").exists());
    }
}
