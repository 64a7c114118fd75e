//! Job-level configuration.

use crate::error::{Error, Result};
use std::path::PathBuf;

/// What to do with an input record that cannot be decoded as text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MalformedPolicy {
    /// Log the record, bump `SKIPPED_RECORDS`, keep going.
    #[default]
    Skip,
    /// Fail the job. Malformed input is deterministic, so the failing task
    /// is not retried.
    Abort,
}

/// Options with semantic effect on job results. Pure throughput knobs
/// (buffer sizes, flush cadence) live in [`crate::constants`] as environment
/// variables instead.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Compare tokens exactly instead of lower-casing each line first.
    pub case_sensitive: bool,
    /// Master switch for skip-pattern filtering. When off, side-input files
    /// are not even opened.
    pub skip_patterns_enabled: bool,
    /// Number of reduce partitions, and therefore of output files.
    pub reduce_partition_count: usize,
    /// Apply the combiner inside map tasks before the shuffle.
    pub combine_enabled: bool,
    /// Map task count. Defaults to the number of logical CPUs, and is always
    /// clamped to the number of input files.
    pub map_tasks: Option<usize>,
    /// Attempt budget per task, first run included.
    pub max_task_attempts: usize,
    pub malformed_records: MalformedPolicy,
    /// Keep the per-job scratch directory after a successful run.
    pub keep_intermediates: bool,
    /// Where per-job scratch directories are created. Defaults to
    /// `.riffle_runs` under the working directory.
    pub scratch_dir: Option<PathBuf>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            case_sensitive: false,
            skip_patterns_enabled: false,
            reduce_partition_count: 2,
            combine_enabled: true,
            map_tasks: None,
            max_task_attempts: 4,
            malformed_records: MalformedPolicy::Skip,
            keep_intermediates: false,
            scratch_dir: None,
        }
    }
}

impl JobConfig {
    pub fn validate(&self) -> Result<()> {
        if self.reduce_partition_count < 1 {
            return Err(Error::InvalidArgument(
                "reduce_partition_count must be at least 1".into(),
            ));
        }
        if self.max_task_attempts < 1 {
            return Err(Error::InvalidArgument(
                "max_task_attempts must be at least 1".into(),
            ));
        }
        if self.map_tasks == Some(0) {
            return Err(Error::InvalidArgument("map_tasks must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = JobConfig::default();
        assert!(!config.case_sensitive);
        assert!(!config.skip_patterns_enabled);
        assert_eq!(config.reduce_partition_count, 2);
        assert!(config.combine_enabled);
        assert_eq!(config.max_task_attempts, 4);
        assert_eq!(config.malformed_records, MalformedPolicy::Skip);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_partitions_rejected() {
        let config = JobConfig { reduce_partition_count: 0, ..JobConfig::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn zero_map_tasks_rejected() {
        let config = JobConfig { map_tasks: Some(0), ..JobConfig::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn zero_attempts_rejected() {
        let config = JobConfig { max_task_attempts: 0, ..JobConfig::default() };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }
}
