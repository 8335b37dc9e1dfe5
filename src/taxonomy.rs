//! Keyword taxonomy compilation and document classification.
//!
//! A taxonomy file holds one rule per line:
//!
//! ```text
//! language,ideologyType,topic,subTopic,pattern[,pattern...]
//! ```
//!
//! Pattern tokens are lowercased and trimmed. A token starting with `-` is an exclude
//! term; every other token becomes an include pattern. `*` at either edge removes the
//! word-boundary anchor on that side, any other `*` matches a single character, and
//! internal whitespace matches any single character. All include patterns of one line
//! are compiled into one [`RegexSet`].

use anyhow::Context;
use memchr::memmem;
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info};

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// ASCII-only word boundary
const WORD_BOUNDARY: &str = r"(?-u:\b)";
const LABEL_FIELDS: usize = 4;

/// An include pattern was rejected by the regex engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("The expression '{pattern}' failed to compile: {message}")]
pub struct PatternCompileError {
    pub pattern: String,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error(transparent)]
    Pattern(#[from] PatternCompileError),

    #[error("Failed to read taxonomy line {line}")]
    Io {
        line: usize,
        #[source]
        source: std::io::Error,
    },
}

/// One parsed pattern token from a taxonomy line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternToken {
    Include(String),
    Exclude(String),
}

/// One taxonomy entry. Immutable once compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassificationRule {
    pub language: String,
    pub ideology_type: String,
    pub topic: String,
    pub sub_topic: String,
    pub include_pattern_count: usize,
    /// Lowercase substrings, first-seen order, no duplicates
    pub exclude_terms: Vec<String>,
}

impl ClassificationRule {
    /// Returns the first exclude term present in `text`, if any.
    ///
    /// `text` must already be lowercased.
    pub fn vetoing_term(&self, text: &str) -> Option<&str> {
        self.exclude_terms
            .iter()
            .find(|term| memmem::find(text.as_bytes(), term.as_bytes()).is_some())
            .map(String::as_str)
    }

    pub fn is_vetoed(&self, text: &str) -> bool {
        self.vetoing_term(text).is_some()
    }

    /// Share of this rule's include patterns that matched.
    pub fn strength(&self, matched: usize) -> f32 {
        if self.include_pattern_count == 0 {
            return 0.0;
        }
        matched as f32 / self.include_pattern_count as f32
    }
}

/// All include patterns of one rule, compiled together.
#[derive(Debug, Clone)]
pub struct CompiledMatcher {
    set: RegexSet,
}

impl CompiledMatcher {
    pub fn compile(patterns: &[String]) -> Result<Self, PatternCompileError> {
        RegexSet::new(patterns)
            .map(|set| Self { set })
            .map_err(|e| locate_failure(patterns, &e))
    }

    pub fn patterns(&self) -> &[String] {
        self.set.patterns()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.set.is_match(text)
    }

    /// Indices of every pattern that matched, ascending.
    pub fn matches(&self, text: &str) -> Vec<usize> {
        self.set.matches(text).into_iter().collect()
    }

    pub fn first_match(&self, text: &str) -> Option<usize> {
        self.set.matches(text).iter().next()
    }
}

/// A rule paired with its matcher; the pairing is structural.
#[derive(Debug, Clone)]
pub struct TaxonomyEntry {
    pub rule: ClassificationRule,
    pub matcher: CompiledMatcher,
}

/// A positive, non-vetoed classification of one text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub rule_index: usize,
    pub matched_patterns: Vec<usize>,
}

impl RuleMatch {
    pub fn strength(&self, rule: &ClassificationRule) -> f32 {
        rule.strength(self.matched_patterns.len())
    }
}

/// The compiled rule set. Built once at startup and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
    entries: Vec<TaxonomyEntry>,
}

impl Taxonomy {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open taxonomy config: {}", path.display()))?;

        let start = Instant::now();
        let taxonomy = Self::compile(BufReader::new(file))
            .with_context(|| format!("Failed to compile taxonomy: {}", path.display()))?;

        info!(
            rules = taxonomy.len(),
            duration_secs = start.elapsed().as_secs_f64(),
            "Taxonomy loaded and compiled"
        );
        Ok(taxonomy)
    }

    pub fn compile<R: BufRead>(reader: R) -> Result<Self, TaxonomyError> {
        let mut entries = Vec::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| TaxonomyError::Io {
                line: idx + 1,
                source,
            })?;
            if line.is_empty() {
                continue;
            }
            if let Some(entry) = compile_line(&line)? {
                entries.push(entry);
            }
        }

        Ok(Self { entries })
    }

    pub fn parse(source: &str) -> Result<Self, TaxonomyError> {
        Self::compile(source.as_bytes())
    }

    pub fn entries(&self) -> &[TaxonomyEntry] {
        &self.entries
    }

    pub fn get(&self, index: usize) -> Option<&TaxonomyEntry> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn classify(&self, text: &str) -> Vec<RuleMatch> {
        self.classify_lowercase(&text.to_lowercase())
    }

    /// Same as [`Taxonomy::classify`] for text that is already lowercased.
    pub fn classify_lowercase(&self, text: &str) -> Vec<RuleMatch> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(rule_index, entry)| {
                let matched_patterns = entry.matcher.matches(text);
                if matched_patterns.is_empty() {
                    return None;
                }
                if let Some(term) = entry.rule.vetoing_term(text) {
                    debug!(rule_index, term, "Match vetoed by exclude term");
                    return None;
                }
                Some(RuleMatch {
                    rule_index,
                    matched_patterns,
                })
            })
            .collect()
    }
}

/// Compiles one configuration line. `Ok(None)` means the line carries no rule.
pub fn compile_line(line: &str) -> Result<Option<TaxonomyEntry>, PatternCompileError> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() <= LABEL_FIELDS {
        debug!(line, "Skipping malformed taxonomy line");
        return Ok(None);
    }

    let mut includes = Vec::new();
    let mut exclude_terms: Vec<String> = Vec::new();
    let mut deferred = None;

    for raw in &fields[LABEL_FIELDS..] {
        match parse_token(raw) {
            Some(PatternToken::Exclude(term)) => {
                debug!(term = %term, "Exclude term");
                if !exclude_terms.contains(&term) {
                    exclude_terms.push(term);
                }
            }
            Some(PatternToken::Include(pattern)) => {
                debug!(pattern = %pattern, "Include pattern");
                if deferred.is_none() {
                    deferred = validate_pattern(&pattern).err();
                }
                includes.push(pattern);
            }
            None => {}
        }
    }

    if includes.is_empty() {
        return Ok(None);
    }

    let matcher = match (CompiledMatcher::compile(&includes), deferred) {
        (Ok(matcher), None) => matcher,
        (Ok(_), Some(err)) => return Err(err),
        (Err(err), deferred) => return Err(deferred.unwrap_or(err)),
    };

    let rule = ClassificationRule {
        language: fields[0].trim().to_string(),
        ideology_type: fields[1].trim().to_string(),
        topic: fields[2].trim().to_string(),
        sub_topic: fields[3].trim().to_string(),
        include_pattern_count: includes.len(),
        exclude_terms,
    };

    Ok(Some(TaxonomyEntry { rule, matcher }))
}

/// Parses one raw pattern token. Tokens of one character or less yield `None`.
///
/// Whitespace inside an include token becomes a single-character wildcard (`.`). Inside
/// an exclude token it is collapsed to one space instead, since exclude terms are
/// matched as plain substrings of the text rather than as patterns.
pub fn parse_token(raw: &str) -> Option<PatternToken> {
    let token = raw.to_lowercase();
    let token = token.trim();
    if token.chars().count() <= 1 {
        return None;
    }

    if let Some(term) = token.strip_prefix('-') {
        let term = WHITESPACE.replace_all(term.trim(), " ");
        if term.is_empty() {
            return None;
        }
        return Some(PatternToken::Exclude(term.into_owned()));
    }

    let token = WHITESPACE.replace_all(token, ".");
    Some(PatternToken::Include(build_include_pattern(&token)))
}

fn build_include_pattern(token: &str) -> String {
    let (body, left) = match token.strip_prefix('*') {
        Some(rest) => (rest, ""),
        None => (token, WORD_BOUNDARY),
    };
    let (body, right) = match body.strip_suffix('*') {
        Some(rest) => (rest, ""),
        None => (body, WORD_BOUNDARY),
    };
    format!("{left}{}{right}", body.replace('*', "."))
}

/// Compiles a single pattern on its own. Patterns that match an empty buffer are rejected.
pub fn validate_pattern(pattern: &str) -> Result<(), PatternCompileError> {
    let regex = Regex::new(pattern).map_err(|e| PatternCompileError {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;
    if regex.is_match("") {
        return Err(PatternCompileError {
            pattern: pattern.to_string(),
            message: "Pattern matches empty buffer".to_string(),
        });
    }
    Ok(())
}

fn locate_failure(patterns: &[String], set_error: &regex::Error) -> PatternCompileError {
    patterns
        .iter()
        .find_map(|p| {
            Regex::new(p).err().map(|e| PatternCompileError {
                pattern: p.clone(),
                message: e.to_string(),
            })
        })
        .unwrap_or_else(|| PatternCompileError {
            pattern: patterns.join(" | "),
            message: set_error.to_string(),
        })
}
