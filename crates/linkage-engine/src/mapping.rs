//! Score-carrying link sets and their set algebra.
//!
//! A [`Mapping`] is a finite map `source id -> target id -> score` with
//! two invariants: every stored score is strictly positive and at most
//! one score is stored per (source, target) pair. All four combinators
//! run in time linear in the sizes of their operands.

use ahash::AHashMap;

use crate::ResourceId;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapping {
    rows: AHashMap<ResourceId, AHashMap<ResourceId, f64>>,
    pairs: usize,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of (source, target) pairs.
    pub fn len(&self) -> usize {
        self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs == 0
    }

    pub fn source_count(&self) -> usize {
        self.rows.len()
    }

    /// Record a link. Scores at or below zero are discarded; a duplicate
    /// pair keeps the larger of the two scores.
    pub fn add(&mut self, source: ResourceId, target: ResourceId, score: f64) {
        if score <= 0.0 {
            return;
        }
        let row = self.rows.entry(source).or_default();
        match row.get_mut(&target) {
            Some(existing) => {
                if score > *existing {
                    *existing = score;
                }
            }
            None => {
                row.insert(target, score);
                self.pairs += 1;
            }
        }
    }

    pub fn score(&self, source: ResourceId, target: ResourceId) -> Option<f64> {
        self.rows.get(&source)?.get(&target).copied()
    }

    pub fn contains(&self, source: ResourceId, target: ResourceId) -> bool {
        self.score(source, target).is_some()
    }

    /// Iterate all links in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, ResourceId, f64)> + '_ {
        self.rows
            .iter()
            .flat_map(|(s, row)| row.iter().map(move |(t, score)| (*s, *t, *score)))
    }

    /// All links sorted by (source, target), for deterministic output.
    pub fn sorted_links(&self) -> Vec<(ResourceId, ResourceId, f64)> {
        let mut links: Vec<_> = self.iter().collect();
        links.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        links
    }

    /// Keep only links whose score is at least `threshold`.
    pub fn filter_threshold(&self, threshold: f64) -> Mapping {
        let mut out = Mapping::new();
        for (s, t, score) in self.iter() {
            if score >= threshold {
                out.add(s, t, score);
            }
        }
        out
    }

    /// Pairs present in both operands, scores fused by `combine`.
    /// Probes the smaller operand against the larger one.
    pub fn intersection(&self, other: &Mapping, combine: impl Fn(f64, f64) -> f64) -> Mapping {
        let mut out = Mapping::new();
        if self.pairs <= other.pairs {
            for (s, t, score) in self.iter() {
                if let Some(theirs) = other.score(s, t) {
                    out.add(s, t, combine(score, theirs));
                }
            }
        } else {
            for (s, t, theirs) in other.iter() {
                if let Some(score) = self.score(s, t) {
                    out.add(s, t, combine(score, theirs));
                }
            }
        }
        out
    }

    /// Pairs present in either operand. Pairs present in both get their
    /// scores fused by `combine`; the rest keep their single score.
    pub fn union(&self, other: &Mapping, combine: impl Fn(f64, f64) -> f64) -> Mapping {
        let mut out = self.clone();
        for (s, t, theirs) in other.iter() {
            match self.score(s, t) {
                Some(ours) => {
                    let fused = combine(ours, theirs);
                    let row = out.rows.entry(s).or_default();
                    row.insert(t, fused);
                }
                None => out.add(s, t, theirs),
            }
        }
        out
    }

    /// Pairs of `self` not present in `other`, scores unchanged.
    pub fn difference(&self, other: &Mapping) -> Mapping {
        let mut out = Mapping::new();
        for (s, t, score) in self.iter() {
            if !other.contains(s, t) {
                out.add(s, t, score);
            }
        }
        out
    }

    /// Pairs present in exactly one operand, scores unchanged.
    pub fn symmetric_difference(&self, other: &Mapping) -> Mapping {
        let mut out = self.difference(other);
        for (s, t, score) in other.difference(self).iter() {
            out.add(s, t, score);
        }
        out
    }

    /// Absorb a mapping whose source rows do not overlap with ours.
    /// Used to merge per-partition partial results.
    pub fn merge_disjoint(&mut self, other: Mapping) {
        for (s, row) in other.rows {
            debug_assert!(!self.rows.contains_key(&s), "partition rows overlap");
            self.pairs += row.len();
            self.rows.insert(s, row);
        }
    }
}
