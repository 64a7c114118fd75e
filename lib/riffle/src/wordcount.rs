//! The word-count pipeline: tokenizer, map/combine/reduce stages, and a
//! one-call driver.

use crate::api::{Combiner, Mapper, Pipeline, Record, Reducer};
use crate::config::JobConfig;
use crate::counter::{TaskContext, INPUT_WORDS};
use crate::error::Result;
use crate::io::TextLineSink;
use crate::runtime::{JobSummary, LocalPipeline};
use crate::skip::SkipPatternSet;
use std::borrow::Cow;
use std::path::PathBuf;

/// Splits lines into tokens.
///
/// Per line: optional lower-casing of the whole line, skip-pattern removal
/// on the raw text, then splitting on runs of whitespace. Empty tokens
/// cannot occur; `split_whitespace` never yields them.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    case_sensitive: bool,
    patterns: SkipPatternSet,
}

impl Tokenizer {
    pub fn new(case_sensitive: bool, patterns: SkipPatternSet) -> Self {
        Self { case_sensitive, patterns }
    }

    pub fn for_each_token(&self, line: &str, mut f: impl FnMut(&str)) {
        let line = if self.case_sensitive {
            Cow::Borrowed(line)
        } else {
            Cow::Owned(line.to_lowercase())
        };
        let line = self.patterns.strip(line.as_ref());
        for token in line.split_whitespace() {
            f(token);
        }
    }
}

/// Map stage: `(token, 1)` per token, plus one `INPUT_WORDS` increment per
/// emission.
#[derive(Debug, Clone)]
pub struct WordCountMapper {
    tokenizer: Tokenizer,
}

impl WordCountMapper {
    pub fn new(case_sensitive: bool, patterns: SkipPatternSet) -> Self {
        Self { tokenizer: Tokenizer::new(case_sensitive, patterns) }
    }
}

impl Mapper for WordCountMapper {
    type Key = String;
    type Value = u64;

    fn do_map<F>(&self, record: &Record, ctx: &mut TaskContext, emit: &mut F)
    where
        F: FnMut(String, u64),
    {
        self.tokenizer.for_each_token(&record.line, |token| {
            emit(token.to_owned(), 1);
            ctx.counters.incr(INPUT_WORDS, 1);
        });
    }
}

/// Partial-count addition. Associative and commutative, so it is safe under
/// any grouping the combine buffer happens to apply, including none.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumCombiner;

impl Combiner<String, u64> for SumCombiner {
    fn combine(&self, _key: &String, acc: &mut u64, value: u64) {
        *acc += value;
    }
}

/// Reduce stage: one `(token, total)` record per distinct token.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordCountReducer;

impl Reducer for WordCountReducer {
    type Key = String;
    type ValueIn = u64;
    type Out = (String, u64);

    fn do_reduce<I, F>(&self, key: &String, values: I, emit: &mut F)
    where
        I: IntoIterator<Item = u64>,
        F: FnMut((String, u64)),
    {
        let total: u64 = values.into_iter().sum();
        emit((key.clone(), total));
    }
}

/// Run a whole word-count job over `inputs` (files or directories, walked
/// recursively), writing `part-{:05}.tsv` files under `output`.
///
/// Skip-pattern files are only consulted when `config.skip_patterns_enabled`
/// is set; otherwise they are not even opened.
pub fn word_count(
    inputs: &[String],
    output: &str,
    skip_files: &[PathBuf],
    config: &JobConfig,
) -> Result<JobSummary> {
    let patterns = if config.skip_patterns_enabled {
        SkipPatternSet::load(skip_files)
    } else {
        SkipPatternSet::empty()
    };
    let mapper = WordCountMapper::new(config.case_sensitive, patterns);

    let mut pipeline = LocalPipeline::new(config.clone());
    for input in inputs {
        pipeline.add_input(input.clone());
    }
    pipeline.add_output(output);
    pipeline.map_reduce(mapper, SumCombiner, WordCountReducer, TextLineSink)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(tokenizer: &Tokenizer, line: &str) -> Vec<String> {
        let mut out = Vec::new();
        tokenizer.for_each_token(line, |t| out.push(t.to_owned()));
        out
    }

    #[test]
    fn lowercases_by_default() {
        let t = Tokenizer::new(false, SkipPatternSet::empty());
        assert_eq!(tokens(&t, "The QUICK Fox"), ["the", "quick", "fox"]);
    }

    #[test]
    fn case_sensitive_mode_keeps_case() {
        let t = Tokenizer::new(true, SkipPatternSet::empty());
        assert_eq!(tokens(&t, "The QUICK Fox"), ["The", "QUICK", "Fox"]);
    }

    #[test]
    fn collapses_whitespace_runs() {
        let t = Tokenizer::new(false, SkipPatternSet::empty());
        assert_eq!(tokens(&t, "  the\t\tfox  "), ["the", "fox"]);
        assert!(tokens(&t, "   \t  ").is_empty());
        assert!(tokens(&t, "").is_empty());
    }

    #[test]
    fn pattern_removal_runs_after_lowercasing() {
        // The pattern sees the lowercased text, so "Fox" is removed by "fox".
        let t = Tokenizer::new(false, SkipPatternSet::from_patterns(["fox"]));
        assert_eq!(tokens(&t, "The Fox jumps"), ["the", "jumps"]);
    }

    #[test]
    fn mid_token_removal_yields_spliced_token() {
        let t = Tokenizer::new(false, SkipPatternSet::from_patterns(["j"]));
        assert_eq!(tokens(&t, "the fox jumps"), ["the", "fox", "umps"]);
    }

    #[test]
    fn removal_spanning_whitespace_can_join_tokens() {
        let t = Tokenizer::new(false, SkipPatternSet::from_patterns(["x j"]));
        assert_eq!(tokens(&t, "the fox jumps"), ["the", "foumps"]);
    }

    #[test]
    fn mapper_emits_ones_and_counts_words() {
        let mapper = WordCountMapper::new(false, SkipPatternSet::empty());
        let record = Record { offset: 0, line: "the Fox the".into() };
        let mut ctx = TaskContext::new();
        let mut pairs = Vec::new();
        mapper.do_map(&record, &mut ctx, &mut |k, v| pairs.push((k, v)));

        assert_eq!(
            pairs,
            [("the".to_string(), 1), ("fox".to_string(), 1), ("the".to_string(), 1)]
        );
        assert_eq!(ctx.counters.get(INPUT_WORDS), 3);
    }

    #[test]
    fn mapper_counts_only_surviving_tokens() {
        let mapper = WordCountMapper::new(false, SkipPatternSet::from_patterns(["fox"]));
        let record = Record { offset: 0, line: "the fox jumps".into() };
        let mut ctx = TaskContext::new();
        let mut pairs = Vec::new();
        mapper.do_map(&record, &mut ctx, &mut |k, v| pairs.push((k, v)));

        assert_eq!(pairs.len(), 2);
        assert_eq!(ctx.counters.get(INPUT_WORDS), 2);
    }

    #[test]
    fn combiner_is_plain_addition() {
        let mut acc = 3u64;
        SumCombiner.combine(&"the".to_string(), &mut acc, 4);
        assert_eq!(acc, 7);
    }

    #[test]
    fn reducer_sums_all_values_for_a_key() {
        let mut out = Vec::new();
        WordCountReducer.do_reduce(&"the".to_string(), [1u64, 2, 3], &mut |r| out.push(r));
        assert_eq!(out, [("the".to_string(), 6)]);
    }

    #[test]
    fn reducer_handles_a_single_value() {
        let mut out = Vec::new();
        WordCountReducer.do_reduce(&"dog".to_string(), [5u64], &mut |r| out.push(r));
        assert_eq!(out, [("dog".to_string(), 5)]);
    }
}
