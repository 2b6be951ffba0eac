//! Inverted candidate indexes backing the INDEXED_BLOCKING strategy.
//!
//! An index maps blocking keys to bitmaps of target resource ids. A
//! probe unions the bitmaps of a source value's probe keys; every pair
//! the measure could score at or above the threshold is guaranteed to
//! appear among the candidates (the schemes are complete), so blocking
//! only skips work, never links.

use ahash::AHashMap;
use rayon::prelude::*;
use roaring::RoaringBitmap;

use crate::measure::{tokenize, BlockingScheme};
use crate::ResourceStore;

pub struct CandidateIndex {
    postings: AHashMap<String, RoaringBitmap>,
    scheme: BlockingScheme,
    threshold: f64,
}

impl CandidateIndex {
    /// Index one target column. Construction distributes over the
    /// column and merges per-shard postings at the end.
    pub fn build(
        store: &ResourceStore,
        property: &str,
        scheme: BlockingScheme,
        threshold: f64,
    ) -> Self {
        let postings = match store.column(property) {
            None => AHashMap::new(),
            Some(column) => column
                .par_iter()
                .fold(
                    AHashMap::<String, RoaringBitmap>::new,
                    |mut shard, (id, values)| {
                        for value in values {
                            for key in index_keys(scheme, value, threshold) {
                                shard.entry(key).or_default().insert(*id);
                            }
                        }
                        shard
                    },
                )
                .reduce(AHashMap::new, |mut merged, shard| {
                    for (key, bitmap) in shard {
                        *merged.entry(key).or_default() |= bitmap;
                    }
                    merged
                }),
        };
        Self {
            postings,
            scheme,
            threshold,
        }
    }

    /// Target ids that could match a source value.
    pub fn candidates(&self, value: &str) -> RoaringBitmap {
        let mut out = RoaringBitmap::new();
        for key in probe_keys(self.scheme, value, self.threshold) {
            if let Some(bitmap) = self.postings.get(&key) {
                out |= bitmap;
            }
        }
        out
    }

    pub fn key_count(&self) -> usize {
        self.postings.len()
    }
}

fn index_keys(scheme: BlockingScheme, value: &str, threshold: f64) -> Vec<String> {
    match scheme {
        BlockingScheme::Value => vec![value.to_string()],
        BlockingScheme::Tokens => tokenize(value).into_iter().collect(),
        BlockingScheme::NumericBucket => match parse_number(value) {
            Some(v) => match bucket_width(threshold) {
                Some(width) => vec![bucket_key(v, width)],
                None => vec![exact_key(v)],
            },
            None => Vec::new(),
        },
    }
}

fn probe_keys(scheme: BlockingScheme, value: &str, threshold: f64) -> Vec<String> {
    match scheme {
        BlockingScheme::Value | BlockingScheme::Tokens => index_keys(scheme, value, threshold),
        BlockingScheme::NumericBucket => match parse_number(value) {
            Some(v) => match bucket_width(threshold) {
                // Neighbours included: |a - b| <= width spans at most
                // one bucket boundary.
                Some(width) => {
                    let bucket = (v / width).floor() as i64;
                    (bucket - 1..=bucket + 1)
                        .map(|b| format!("b:{b}"))
                        .collect()
                }
                None => vec![exact_key(v)],
            },
            None => Vec::new(),
        },
    }
}

/// Maximum distance at which `1 / (1 + d)` still reaches the threshold.
/// `None` means the threshold demands exact equality.
fn bucket_width(threshold: f64) -> Option<f64> {
    if threshold >= 1.0 {
        return None;
    }
    Some((1.0 - threshold) / threshold)
}

fn bucket_key(value: f64, width: f64) -> String {
    format!("b:{}", (value / width).floor() as i64)
}

fn exact_key(value: f64) -> String {
    // +0.0 folds negative zero into positive zero.
    format!("v:{:016x}", (value + 0.0).to_bits())
}

fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_store(values: &[&str]) -> ResourceStore {
        let mut store = ResourceStore::new();
        for (i, v) in values.iter().enumerate() {
            let id = store.add_resource(&format!("urn:n{i}"));
            store.add_value(id, "pop", v);
        }
        store
    }

    #[test]
    fn value_scheme_requires_verbatim_equality() {
        let mut store = ResourceStore::new();
        let a = store.add_resource("urn:a");
        store.add_value(a, "label", "Berlin");
        let b = store.add_resource("urn:b");
        store.add_value(b, "label", "berlin");

        let index = CandidateIndex::build(&store, "label", BlockingScheme::Value, 1.0);
        let hits = index.candidates("Berlin");
        assert!(hits.contains(a));
        assert!(!hits.contains(b));
    }

    #[test]
    fn token_scheme_matches_on_any_shared_token() {
        let mut store = ResourceStore::new();
        let a = store.add_resource("urn:a");
        store.add_value(a, "label", "New York City");
        let b = store.add_resource("urn:b");
        store.add_value(b, "label", "Mexico City");
        let c = store.add_resource("urn:c");
        store.add_value(c, "label", "Berlin");

        let index = CandidateIndex::build(&store, "label", BlockingScheme::Tokens, 0.4);
        let hits = index.candidates("york city");
        assert!(hits.contains(a));
        assert!(hits.contains(b));
        assert!(!hits.contains(c));
    }

    #[test]
    fn numeric_scheme_is_complete_for_its_threshold() {
        let values: Vec<String> = (0..200).map(|i| format!("{}", i as f64 * 0.7)).collect();
        let refs: Vec<&str> = values.iter().map(String::as_str).collect();
        let store = numeric_store(&refs);

        let threshold = 0.5; // distance budget (1 - t) / t = 1.0
        let index =
            CandidateIndex::build(&store, "pop", BlockingScheme::NumericBucket, threshold);

        let probe = 70.0_f64;
        let hits = index.candidates("70.0");
        for id in 0..store.resource_count() as u32 {
            let v: f64 = store.values(id, "pop")[0].parse().expect("numeric");
            let qualifies = 1.0 / (1.0 + (v - probe).abs()) >= threshold;
            if qualifies {
                assert!(hits.contains(id), "missed value {v} near {probe}");
            }
        }
    }

    #[test]
    fn numeric_scheme_at_threshold_one_keys_on_exact_value() {
        let store = numeric_store(&["3.5", "3.5000", "3.6", "-0.0"]);
        let index = CandidateIndex::build(&store, "pop", BlockingScheme::NumericBucket, 1.0);

        let hits = index.candidates("3.5");
        assert!(hits.contains(0));
        assert!(hits.contains(1));
        assert!(!hits.contains(2));
        assert!(index.candidates("0").contains(3));
    }

    #[test]
    fn unparseable_numeric_values_produce_no_candidates() {
        let store = numeric_store(&["12", "twelve"]);
        let index = CandidateIndex::build(&store, "pop", BlockingScheme::NumericBucket, 0.5);
        assert!(index.candidates("not a number").is_empty());
        assert!(!index.candidates("12").contains(1));
    }

    #[test]
    fn missing_column_yields_an_empty_index() {
        let store = ResourceStore::new();
        let index = CandidateIndex::build(&store, "label", BlockingScheme::Value, 1.0);
        assert_eq!(index.key_count(), 0);
        assert!(index.candidates("anything").is_empty());
    }
}
