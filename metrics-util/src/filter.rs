//! Name-based metric filtering.
//!
//! Publishers can be restricted to a subset of metrics with an [`AllowList`], a [`BlockList`], or
//! both combined in a [`FilterChain`].  Patterns are matched against the rendered metric name and
//! against the name followed by its type suffix (e.g. `requests.ok.count`), ignoring case.
//!
//! Patterns without wildcard syntax are matched as substrings, using an [Aho-Corasick][ahocorasick]
//! automaton so that any number of them is checked in a single pass.  Patterns containing `*` (any
//! run of characters) or `?` (any single character) are translated to a regular expression that
//! must match the whole name.  A pattern consisting only of `*` matches everything.  Blank patterns
//! are discarded.
//!
//! [ahocorasick]: https://en.wikipedia.org/wiki/Aho–Corasick_algorithm
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, AhoCorasickKind};
use metrics_core::MetricSnapshot;
use regex::Regex;
use tracing::warn;

/// Decides whether a metric is sent to a publisher.
pub trait MetricFilter: Send + Sync {
    /// Whether or not `snapshot` passes this filter.
    fn is_allowed(&self, snapshot: &MetricSnapshot) -> bool;
}

struct PatternSet {
    match_all: bool,
    literals: Option<AhoCorasick>,
    wildcards: Vec<Regex>,
}

impl PatternSet {
    fn new<I, S>(patterns: I) -> PatternSet
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut match_all = false;
        let mut literals = Vec::new();
        let mut wildcards = Vec::new();

        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }

            if pattern.chars().all(|c| c == '*') {
                match_all = true;
            } else if pattern.contains(|c: char| c == '*' || c == '?') {
                match compile_wildcard(pattern) {
                    Ok(regex) => wildcards.push(regex),
                    Err(e) => warn!(pattern, error = %e, "Ignoring malformed metric filter pattern."),
                }
            } else {
                literals.push(pattern.to_string());
            }
        }

        let literals = if literals.is_empty() {
            None
        } else {
            let result = AhoCorasickBuilder::new()
                .ascii_case_insensitive(true)
                .kind(Some(AhoCorasickKind::DFA))
                .build(&literals);
            match result {
                Ok(automaton) => Some(automaton),
                Err(e) => {
                    warn!(error = %e, "Ignoring metric filter patterns that could not be compiled.");
                    None
                }
            }
        };

        PatternSet { match_all, literals, wildcards }
    }

    fn is_empty(&self) -> bool {
        !self.match_all && self.literals.is_none() && self.wildcards.is_empty()
    }

    fn is_match(&self, snapshot: &MetricSnapshot) -> bool {
        if self.match_all {
            return true;
        }
        if self.is_empty() {
            return false;
        }

        let full_name = snapshot.full_name();
        if let Some(literals) = &self.literals {
            if literals.is_match(&full_name) {
                return true;
            }
        }
        self.wildcards
            .iter()
            .any(|regex| regex.is_match(snapshot.name()) || regex.is_match(&full_name))
    }
}

fn compile_wildcard(pattern: &str) -> Result<Regex, regex::Error> {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push_str("(?i)^");
    let mut buf = [0; 4];
    for c in pattern.chars() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            c => expr.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    expr.push('$');
    Regex::new(&expr)
}

/// Passes metrics that match at least one pattern.
///
/// An allow-list with no usable patterns passes nothing.
pub struct AllowList {
    patterns: PatternSet,
}

impl AllowList {
    /// Creates an allow-list from the given patterns.
    pub fn new<I, S>(patterns: I) -> AllowList
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        AllowList { patterns: PatternSet::new(patterns) }
    }
}

impl MetricFilter for AllowList {
    fn is_allowed(&self, snapshot: &MetricSnapshot) -> bool {
        self.patterns.is_match(snapshot)
    }
}

/// Passes metrics that match none of the patterns.
///
/// A block-list with no usable patterns passes everything.
pub struct BlockList {
    patterns: PatternSet,
}

impl BlockList {
    /// Creates a block-list from the given patterns.
    pub fn new<I, S>(patterns: I) -> BlockList
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        BlockList { patterns: PatternSet::new(patterns) }
    }
}

impl MetricFilter for BlockList {
    fn is_allowed(&self, snapshot: &MetricSnapshot) -> bool {
        !self.patterns.is_match(snapshot)
    }
}

/// A set of filters that must all pass.
///
/// An empty chain passes everything.
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn MetricFilter>>,
}

impl FilterChain {
    /// Creates an empty chain.
    pub fn new() -> FilterChain {
        FilterChain::default()
    }

    /// Adds a filter to the chain.
    pub fn push<F: MetricFilter + 'static>(&mut self, filter: F) {
        self.filters.push(Box::new(filter));
    }

    /// Consumes this chain, returning it with `filter` added.
    pub fn with<F: MetricFilter + 'static>(mut self, filter: F) -> Self {
        self.push(filter);
        self
    }

    /// Gets the number of filters in the chain.
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    /// Whether or not the chain has no filters.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl MetricFilter for FilterChain {
    fn is_allowed(&self, snapshot: &MetricSnapshot) -> bool {
        self.filters.iter().all(|filter| filter.is_allowed(snapshot))
    }
}
