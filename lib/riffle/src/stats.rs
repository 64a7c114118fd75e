//! Per-task and per-phase execution statistics. Tasks report one stats
//! record per committed attempt; the driver folds them into phase
//! aggregates on the job summary.

use serde::Serialize;

#[derive(Clone, Debug)]
pub struct MapTaskStats {
    pub task_id: usize,
    pub num_files: u64,
    pub records_in: u64,
    pub total_emits: u64,
    pub records_out: u64,
    pub total_bytes_out: u64,
    pub total_flushes: u64,
    pub wall_ms: u64,
}

#[derive(Clone, Debug)]
pub struct ReduceTaskStats {
    pub partition: usize,
    pub records_in: u64,
    pub groups: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct MapStatsAgg {
    pub tasks: usize,
    pub total_records_in: u64,
    pub total_emits: u64,
    pub total_records_out: u64,
    pub total_bytes_out: u64,
    pub total_flushes: u64,
    pub min_task_ms: u64,
    pub max_task_ms: u64,
    pub wall_ms: u64,
}

#[derive(Default, Clone, Debug, Serialize)]
pub struct ReduceStatsAgg {
    pub reducers: usize,
    pub total_records_in: u64,
    pub total_groups: u64,
    pub min_reducer_ms: u64,
    pub max_reducer_ms: u64,
    pub wall_ms: u64,
}

/// Phase aggregates for one job run. A phase that ran zero tasks stays
/// `None`.
#[derive(Default, Clone, Debug)]
pub struct StatsCollector {
    pub map: Option<MapStatsAgg>,
    pub reduce: Option<ReduceStatsAgg>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_map(&mut self, per_task: &[MapTaskStats], wall_ms: u64) {
        if per_task.is_empty() {
            return;
        }
        self.map = Some(MapStatsAgg {
            tasks: per_task.len(),
            total_records_in: per_task.iter().map(|t| t.records_in).sum(),
            total_emits: per_task.iter().map(|t| t.total_emits).sum(),
            total_records_out: per_task.iter().map(|t| t.records_out).sum(),
            total_bytes_out: per_task.iter().map(|t| t.total_bytes_out).sum(),
            total_flushes: per_task.iter().map(|t| t.total_flushes).sum(),
            min_task_ms: per_task.iter().map(|t| t.wall_ms).min().unwrap_or(0),
            max_task_ms: per_task.iter().map(|t| t.wall_ms).max().unwrap_or(0),
            wall_ms,
        });
    }

    pub fn record_reduce(&mut self, per_task: &[ReduceTaskStats], wall_ms: u64) {
        if per_task.is_empty() {
            return;
        }
        self.reduce = Some(ReduceStatsAgg {
            reducers: per_task.len(),
            total_records_in: per_task.iter().map(|t| t.records_in).sum(),
            total_groups: per_task.iter().map(|t| t.groups).sum(),
            min_reducer_ms: per_task.iter().map(|t| t.wall_ms).min().unwrap_or(0),
            max_reducer_ms: per_task.iter().map(|t| t.wall_ms).max().unwrap_or(0),
            wall_ms,
        });
    }
}
