pub mod runtime;
pub mod api;
pub mod io;
pub mod shuffle;
pub mod stats;
pub mod writer;
pub mod skip;
pub mod wordcount;
pub mod config;
pub mod counter;
pub mod error;
pub mod constants;
pub mod utils;

pub use api::{Combiner, Mapper, Pipeline, Record, Reducer, ShuffleKey};
pub use config::{JobConfig, MalformedPolicy};
pub use counter::{CounterSet, TaskContext, INPUT_RECORDS, INPUT_WORDS, SKIPPED_RECORDS};
pub use error::{Error, Result, TaskError, TaskResult};
pub use io::{Sink, SinkWriter, TextLineSink};
pub use runtime::{CancelToken, JobSummary, LocalPipeline};
pub use skip::SkipPatternSet;
pub use wordcount::{word_count, SumCombiner, Tokenizer, WordCountMapper, WordCountReducer};
