use crate::counter::TaskContext;
use crate::error::{Result, TaskError, TaskResult};
use serde::{de::DeserializeOwned, Serialize};
use std::hash::Hash;

// ========== Input records ==========

/// One line of input text plus the byte offset of its first byte within the
/// source file. Offsets survive retries unchanged, which keeps malformed
/// record reports stable across attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub offset: u64,
    pub line: String,
}

// ========== Shuffle key encoding ==========

/// Keys that can cross the shuffle boundary.
///
/// The encoding must preserve ordering: comparing two encoded keys as raw
/// byte slices must agree with comparing the native values. Sorting
/// intermediate records by encoded bytes is then enough to give every output
/// partition ascending key order with equal keys adjacent.
pub trait ShuffleKey: Sized {
    fn encode(&self, buf: &mut Vec<u8>);
    fn decode(bytes: &[u8]) -> TaskResult<Self>;
}

/// Strings encode as their raw UTF-8 bytes; byte order and string order
/// coincide.
impl ShuffleKey for String {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.as_bytes());
    }

    fn decode(bytes: &[u8]) -> TaskResult<Self> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| TaskError::corrupt("shuffle key is not valid UTF-8"))
    }
}

// ========== Core pipeline traits ==========

/// Map stage: one input record in, zero or more keyed pairs out.
///
/// Implementations must be deterministic and side-effect free apart from
/// counter increments on `ctx`; the driver retries whole tasks by re-running
/// them and relies on re-execution emitting the same pairs.
pub trait Mapper {
    type Key: Send + ShuffleKey + Hash + Eq + Clone + 'static;
    type Value: Send + Serialize + DeserializeOwned + Clone + 'static;

    fn do_map<F>(&self, record: &Record, ctx: &mut TaskContext, emit: &mut F)
    where
        F: FnMut(Self::Key, Self::Value);
}

/// Optional pre-aggregation applied inside map tasks before pairs reach the
/// shuffle. `combine` folds `value` into `acc` for one key.
///
/// Must be associative and commutative: the driver applies it zero, one, or
/// many times per key, in whatever grouping buffering happens to produce,
/// and reduce results must come out identical. That freedom is also what
/// allows disabling it entirely.
pub trait Combiner<K, V> {
    fn combine(&self, key: &K, acc: &mut V, value: V);
}

/// Reduce stage: every value for one key in, final records out.
pub trait Reducer {
    type Key: Send + ShuffleKey + Hash + Eq + Clone + 'static;
    type ValueIn: Send + Serialize + DeserializeOwned + Clone + 'static;
    type Out: Send + 'static;

    fn do_reduce<I, F>(&self, key: &Self::Key, values: I, emit: &mut F)
    where
        I: IntoIterator<Item = Self::ValueIn>,
        F: FnMut(Self::Out);
}

// ========== Executable pipeline interface (sink-agnostic) ==========

pub trait Pipeline {
    fn add_input(&mut self, input_path: impl Into<String>);
    fn add_output(&mut self, output_path: impl Into<String>);

    fn map_reduce<M, C, R, S>(
        &mut self,
        mapper: M,
        combiner: C,
        reducer: R,
        sink: S,
    ) -> Result<crate::runtime::JobSummary>
    where
        M: Mapper + Send + Sync + 'static,
        C: Combiner<M::Key, M::Value> + Send + Sync + 'static,
        R: Reducer<Key = M::Key, ValueIn = M::Value> + Send + Sync + 'static,
        S: crate::io::Sink<R::Out> + Send + Sync + 'static;
}
