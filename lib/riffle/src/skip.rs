//! Skip patterns: a broadcast side input of regular expressions whose
//! matches are removed from every input line before tokenization.

use regex::Regex;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, warn};

/// An immutable pattern set, built once by the driver and shared by every
/// map task for the whole run.
#[derive(Debug, Default, Clone)]
pub struct SkipPatternSet {
    patterns: Vec<Regex>,
}

impl SkipPatternSet {
    /// A set that filters nothing.
    pub fn empty() -> Self {
        Self { patterns: Vec::new() }
    }

    /// Build from in-memory pattern strings. Invalid patterns are logged and
    /// dropped; the rest of the set still applies.
    pub fn from_patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::empty();
        for pattern in patterns {
            set.push_pattern(pattern.as_ref());
        }
        set
    }

    /// Load one pattern per line from each file, in argument order. Loading
    /// is best-effort: a file that cannot be opened or read contributes
    /// nothing and the job proceeds without it.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Self {
        let mut set = Self::empty();
        for path in paths {
            let path = path.as_ref();
            let file = match File::open(path) {
                Ok(f) => f,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skip pattern file unreadable, patterns omitted");
                    continue;
                }
            };
            for line in BufReader::new(file).lines() {
                match line {
                    // Patterns are taken verbatim; a leading or trailing
                    // space is part of the pattern. Only fully empty lines
                    // are ignored.
                    Ok(pattern) if pattern.is_empty() => {}
                    Ok(pattern) => set.push_pattern(&pattern),
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "stopped reading skip pattern file");
                        break;
                    }
                }
            }
        }
        debug!(patterns = set.len(), "skip pattern set loaded");
        set
    }

    fn push_pattern(&mut self, pattern: &str) {
        match Regex::new(pattern) {
            Ok(re) => self.patterns.push(re),
            Err(e) => warn!(pattern, error = %e, "invalid skip pattern dropped"),
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Delete every match of every pattern from `line`, applying patterns in
    /// load order against the current intermediate text.
    ///
    /// This operates on the raw line, not on token boundaries: a pattern may
    /// remove characters from the middle of what would otherwise be one
    /// token, splicing the remainder into a new token. Removing `"j"` from
    /// `"jumps"` leaves the token `"umps"`. That is the contract.
    pub fn strip<'a>(&self, line: &'a str) -> Cow<'a, str> {
        let mut cur = Cow::Borrowed(line);
        for re in &self.patterns {
            if let Cow::Owned(next) = re.replace_all(cur.as_ref(), "") {
                cur = Cow::Owned(next);
            }
        }
        cur
    }
}
