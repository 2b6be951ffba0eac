//! Similarity measures and the registry the validator resolves against.
//!
//! Every measure maps two property values to a score in `[0, 1]`, or
//! `None` when a value cannot be interpreted (a non-numeric string fed
//! to a numeric measure). Measures that support candidate blocking
//! declare a [`BlockingScheme`]; the scheme must be *complete* for any
//! threshold above zero, i.e. every pair that could reach the threshold
//! shares at least one index key with its probe keys.

use std::sync::{Arc, OnceLock};

use ahash::{AHashMap, AHashSet};
use serde::Serialize;

/// Coarse expectation of how many pairs survive a measure's threshold,
/// used only for relative cost ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectivityClass {
    Exact,
    High,
    Medium,
    Low,
}

impl SelectivityClass {
    /// Estimated fraction of the cross product retained at a threshold.
    /// Only the ordering matters; the estimate is monotone in the
    /// threshold so tighter gates always look cheaper.
    pub fn pass_rate(self, threshold: f64) -> f64 {
        let base = match self {
            SelectivityClass::Exact => 1e-4,
            SelectivityClass::High => 1e-3,
            SelectivityClass::Medium => 1e-2,
            SelectivityClass::Low => 1e-1,
        };
        base * (1.0 - 0.9 * threshold.clamp(0.0, 1.0))
    }
}

/// How index and probe keys are derived from a property value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockingScheme {
    /// One key per value; candidates must share the value verbatim.
    Value,
    /// One key per token; candidates must share at least one token.
    Tokens,
    /// Buckets of width `(1 - t) / t` over the parsed number; probes
    /// cover the adjacent buckets as well.
    NumericBucket,
}

pub trait Measure: Send + Sync {
    fn name(&self) -> &'static str;

    fn selectivity(&self) -> SelectivityClass;

    /// Complete candidate scheme for positive thresholds, if one exists.
    fn blocking_scheme(&self) -> Option<BlockingScheme> {
        None
    }

    /// Similarity of two values in `[0, 1]`, or `None` when a value
    /// cannot be interpreted by this measure.
    fn similarity(&self, a: &str, b: &str) -> Option<f64>;
}

/// Lowercased alphanumeric runs of a value. Shared by the Jaccard
/// measure and the token blocking scheme so both see identical keys.
pub fn tokenize(text: &str) -> AHashSet<String> {
    let mut tokens = AHashSet::new();
    let mut current = String::new();
    for c in text.chars() {
        if c.is_alphanumeric() {
            current.extend(c.to_lowercase());
        } else if !current.is_empty() {
            tokens.insert(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.insert(current);
    }
    tokens
}

// ============================================================================
// Builtin measures
// ============================================================================

struct ExactMatch;

impl Measure for ExactMatch {
    fn name(&self) -> &'static str {
        "exact_match"
    }

    fn selectivity(&self) -> SelectivityClass {
        SelectivityClass::Exact
    }

    fn blocking_scheme(&self) -> Option<BlockingScheme> {
        Some(BlockingScheme::Value)
    }

    fn similarity(&self, a: &str, b: &str) -> Option<f64> {
        Some(if a == b { 1.0 } else { 0.0 })
    }
}

struct Jaccard;

impl Measure for Jaccard {
    fn name(&self) -> &'static str {
        "jaccard"
    }

    fn selectivity(&self) -> SelectivityClass {
        SelectivityClass::High
    }

    fn blocking_scheme(&self) -> Option<BlockingScheme> {
        Some(BlockingScheme::Tokens)
    }

    fn similarity(&self, a: &str, b: &str) -> Option<f64> {
        let ta = tokenize(a);
        let tb = tokenize(b);
        if ta.is_empty() && tb.is_empty() {
            return Some(0.0);
        }
        let shared = ta.intersection(&tb).count();
        let total = ta.len() + tb.len() - shared;
        Some(shared as f64 / total as f64)
    }
}

struct Levenshtein;

impl Measure for Levenshtein {
    fn name(&self) -> &'static str {
        "levenshtein"
    }

    fn selectivity(&self) -> SelectivityClass {
        SelectivityClass::Medium
    }

    // No scheme: length buckets are not complete for the normalized
    // distance, so this measure always runs pairwise.

    fn similarity(&self, a: &str, b: &str) -> Option<f64> {
        let a: Vec<char> = a.chars().collect();
        let b: Vec<char> = b.chars().collect();
        let longest = a.len().max(b.len());
        if longest == 0 {
            return Some(1.0);
        }
        Some(1.0 - edit_distance(&a, &b) as f64 / longest as f64)
    }
}

/// Classic two-row dynamic program over characters.
fn edit_distance(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitute = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitute.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

struct Euclidean;

impl Measure for Euclidean {
    fn name(&self) -> &'static str {
        "euclidean"
    }

    fn selectivity(&self) -> SelectivityClass {
        SelectivityClass::Medium
    }

    fn blocking_scheme(&self) -> Option<BlockingScheme> {
        Some(BlockingScheme::NumericBucket)
    }

    /// `1 / (1 + |a - b|)` over the parsed numbers.
    fn similarity(&self, a: &str, b: &str) -> Option<f64> {
        let a: f64 = a.trim().parse().ok()?;
        let b: f64 = b.trim().parse().ok()?;
        Some(1.0 / (1.0 + (a - b).abs()))
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Name-keyed measure lookup. The builtin set is available as a process
/// global; embedders can extend a private copy with [`register`].
///
/// [`register`]: MeasureRegistry::register
pub struct MeasureRegistry {
    by_name: AHashMap<String, Arc<dyn Measure>>,
}

impl MeasureRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self {
            by_name: AHashMap::new(),
        };
        registry.register(Arc::new(ExactMatch));
        registry.register(Arc::new(Jaccard));
        registry.register(Arc::new(Levenshtein));
        registry.register(Arc::new(Euclidean));
        registry
    }

    pub fn global() -> &'static MeasureRegistry {
        static GLOBAL: OnceLock<MeasureRegistry> = OnceLock::new();
        GLOBAL.get_or_init(MeasureRegistry::builtin)
    }

    pub fn register(&mut self, measure: Arc<dyn Measure>) {
        self.by_name.insert(measure.name().to_string(), measure);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Measure>> {
        self.by_name.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }
}
