//! Plan execution: partitioned scoring, mapping combination, reuse.
//!
//! The engine walks the plan bottom-up. Atomic nodes score pairs with
//! their planned strategy and publish the resulting mapping under the
//! atom's structural key; reuse nodes fetch from that cache. Combine
//! nodes fuse their children's mappings and apply the node's gate.
//!
//! Source collections are split into `granularity` partitions by
//! `id % granularity`; partitions are scored independently (with rayon
//! when the engine runs parallel) and merged, so results never depend
//! on scheduling. Cancellation and deadline are checked cooperatively
//! between source resources; both discard all partial results.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rayon::prelude::*;
use roaring::RoaringBitmap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::blocking::CandidateIndex;
use crate::error::ExecError;
use crate::mapping::Mapping;
use crate::measure::{Measure, MeasureRegistry};
use crate::planner::{ExecutionPlan, PlanNode, Strategy};
use crate::{ResourceId, ResourceStore};

use linkage_dsl::{Atom, Operator};

/// Score fusion for AND nodes. Both options never exceed the smaller
/// input, which is what makes AND threshold pushdown sound. OR always
/// keeps the larger score; MINUS and XOR pass scores through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AndCombiner {
    #[default]
    Min,
    Product,
}

impl AndCombiner {
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            AndCombiner::Min => a.min(b),
            AndCombiner::Product => a * b,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub granularity: usize,
    pub and_combiner: AndCombiner,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            granularity: 2,
            and_combiner: AndCombiner::Min,
        }
    }
}

/// Cooperative stop conditions for one run: an optional deadline and a
/// shared cancel flag a controller can set from another thread.
pub struct RunBudget {
    started: Instant,
    budget: Option<Duration>,
    deadline: Option<Instant>,
    cancel: Arc<AtomicBool>,
}

impl RunBudget {
    pub fn new(timeout: Option<Duration>, cancel: Option<Arc<AtomicBool>>) -> Self {
        let started = Instant::now();
        Self {
            started,
            budget: timeout,
            deadline: timeout.map(|t| started + t),
            cancel: cancel.unwrap_or_default(),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None, None)
    }

    /// Handle for requesting cancellation from outside the run.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn check(&self) -> Result<(), ExecError> {
        if self.cancel.load(Ordering::Relaxed) {
            return Err(ExecError::Cancelled {
                elapsed_ms: self.started.elapsed().as_millis() as u64,
            });
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(ExecError::TimedOut {
                    budget_ms: self.budget.unwrap_or_default().as_millis() as u64,
                });
            }
        }
        Ok(())
    }
}

impl Default for RunBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// Aggregated data-quality report: total warning count plus the first
/// few concrete messages.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WarningSummary {
    pub count: u64,
    pub samples: Vec<String>,
}

#[derive(Debug, Default)]
struct WarningSink {
    count: AtomicU64,
    samples: Mutex<Vec<String>>,
}

impl WarningSink {
    const MAX_SAMPLES: usize = 10;

    fn record_with(&self, message: impl FnOnce() -> String) {
        let seen = self.count.fetch_add(1, Ordering::Relaxed);
        if (seen as usize) < Self::MAX_SAMPLES {
            if let Ok(mut samples) = self.samples.lock() {
                if samples.len() < Self::MAX_SAMPLES {
                    samples.push(message());
                }
            }
        }
    }

    fn into_summary(self) -> WarningSummary {
        WarningSummary {
            count: self.count.into_inner(),
            samples: self.samples.into_inner().unwrap_or_default(),
        }
    }
}

#[derive(Debug)]
pub struct EngineOutput {
    pub mapping: Mapping,
    pub warnings: WarningSummary,
}

pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(
        &self,
        plan: &ExecutionPlan,
        source: &ResourceStore,
        target: &ResourceStore,
        registry: &MeasureRegistry,
        options: &RunOptions,
        budget: &RunBudget,
    ) -> Result<EngineOutput, ExecError>;
}

pub struct DefaultEngine {
    parallel: bool,
}

impl DefaultEngine {
    pub fn parallel() -> Self {
        Self { parallel: true }
    }

    pub fn serial() -> Self {
        Self { parallel: false }
    }
}

impl Engine for DefaultEngine {
    fn name(&self) -> &'static str {
        if self.parallel {
            "default"
        } else {
            "serial"
        }
    }

    fn run(
        &self,
        plan: &ExecutionPlan,
        source: &ResourceStore,
        target: &ResourceStore,
        registry: &MeasureRegistry,
        options: &RunOptions,
        budget: &RunBudget,
    ) -> Result<EngineOutput, ExecError> {
        for note in &plan.notes {
            debug!(note = %note, "planner note");
        }
        let warn = WarningSink::default();
        let cache: DashMap<String, Arc<Mapping>> = DashMap::new();
        let run = Run {
            engine: self,
            source,
            target,
            registry,
            options,
            budget,
            cache: &cache,
            warn: &warn,
        };
        let mapping = run.eval(&plan.root)?;
        let mapping = Arc::try_unwrap(mapping).unwrap_or_else(|shared| (*shared).clone());
        Ok(EngineOutput {
            mapping,
            warnings: warn.into_summary(),
        })
    }
}

/// One in-flight evaluation; bundles the shared read-only state so the
/// recursion does not thread eight arguments around.
struct Run<'a> {
    engine: &'a DefaultEngine,
    source: &'a ResourceStore,
    target: &'a ResourceStore,
    registry: &'a MeasureRegistry,
    options: &'a RunOptions,
    budget: &'a RunBudget,
    cache: &'a DashMap<String, Arc<Mapping>>,
    warn: &'a WarningSink,
}

impl Run<'_> {
    fn eval(&self, node: &PlanNode) -> Result<Arc<Mapping>, ExecError> {
        self.budget.check()?;
        match node {
            PlanNode::Atomic {
                atom,
                strategy,
                key,
                ..
            } => match strategy {
                Strategy::ReuseChildMapping => {
                    let Some(entry) = self.cache.get(key) else {
                        return Err(ExecError::Internal(format!(
                            "mapping for `{}` reused before it was computed",
                            atom.measure
                        )));
                    };
                    Ok(entry.value().clone())
                }
                Strategy::FullPairwise | Strategy::IndexedBlocking => {
                    let measure = self.registry.get(&atom.measure).ok_or_else(|| {
                        ExecError::Internal(format!(
                            "measure `{}` vanished between planning and execution",
                            atom.measure
                        ))
                    })?;
                    self.report_missing_values(atom);
                    let mapping = if *strategy == Strategy::IndexedBlocking {
                        self.eval_blocked(atom, measure.as_ref())?
                    } else {
                        self.eval_pairwise(atom, measure.as_ref())?
                    };
                    let mapping = Arc::new(mapping);
                    self.cache.insert(key.clone(), mapping.clone());
                    Ok(mapping)
                }
            },
            PlanNode::Combine {
                op,
                threshold,
                left,
                right,
                ..
            } => {
                // Siblings may run side by side unless the right subtree
                // reuses a mapping its left sibling has yet to publish.
                let (l, r) = if self.engine.parallel && !contains_reuse(right) {
                    let (l, r) = rayon::join(|| self.eval(left), || self.eval(right));
                    (l?, r?)
                } else {
                    (self.eval(left)?, self.eval(right)?)
                };
                let combiner = self.options.and_combiner;
                let fused = match op {
                    Operator::And => l.intersection(&r, |a, b| combiner.apply(a, b)),
                    Operator::Or => l.union(&r, f64::max),
                    Operator::Minus => l.difference(&r),
                    Operator::Xor => l.symmetric_difference(&r),
                };
                Ok(Arc::new(fused.filter_threshold(*threshold)))
            }
        }
    }

    /// Score every pair whose source falls in each partition.
    fn eval_pairwise(&self, atom: &Atom, measure: &dyn Measure) -> Result<Mapping, ExecError> {
        let target_ids: Vec<ResourceId> = (0..self.target.resource_count() as u32).collect();
        self.for_partitions(|sid| {
            let mut partial = Mapping::new();
            let svals = self.source.values(sid, &atom.source_property);
            if svals.is_empty() {
                return Ok(partial);
            }
            for &tid in &target_ids {
                let tvals = self.target.values(tid, &atom.target_property);
                if tvals.is_empty() {
                    continue;
                }
                let score = self.score_pair(measure, atom, sid, tid, svals, tvals);
                if score >= atom.threshold {
                    partial.add(sid, tid, score);
                }
            }
            Ok(partial)
        })
    }

    /// Score only the candidates an inverted index produces.
    fn eval_blocked(&self, atom: &Atom, measure: &dyn Measure) -> Result<Mapping, ExecError> {
        let Some(scheme) = measure.blocking_scheme() else {
            return Err(ExecError::Internal(format!(
                "blocking planned for `{}`, which has no scheme",
                atom.measure
            )));
        };
        let index = CandidateIndex::build(
            self.target,
            &atom.target_property,
            scheme,
            atom.threshold,
        );
        self.for_partitions(|sid| {
            let mut partial = Mapping::new();
            let svals = self.source.values(sid, &atom.source_property);
            if svals.is_empty() {
                return Ok(partial);
            }
            let mut candidates = RoaringBitmap::new();
            for value in svals {
                candidates |= index.candidates(value);
            }
            for tid in candidates {
                let tvals = self.target.values(tid, &atom.target_property);
                let score = self.score_pair(measure, atom, sid, tid, svals, tvals);
                if score >= atom.threshold {
                    partial.add(sid, tid, score);
                }
            }
            Ok(partial)
        })
    }

    /// Split source ids by `id % granularity`, run `score_one` for each
    /// id, merge the per-partition partials. The split is by id, not by
    /// thread, so the merged result is schedule-independent.
    fn for_partitions(
        &self,
        score_one: impl Fn(ResourceId) -> Result<Mapping, ExecError> + Sync,
    ) -> Result<Mapping, ExecError> {
        let granularity = self.options.granularity.max(1) as u32;
        let mut partitions: Vec<Vec<ResourceId>> = vec![Vec::new(); granularity as usize];
        for id in 0..self.source.resource_count() as u32 {
            partitions[(id % granularity) as usize].push(id);
        }

        let score_partition = |ids: Vec<ResourceId>| -> Result<Mapping, ExecError> {
            let mut partial = Mapping::new();
            for sid in ids {
                self.budget.check()?;
                partial.merge_disjoint(score_one(sid)?);
            }
            Ok(partial)
        };

        let partials: Result<Vec<Mapping>, ExecError> = if self.engine.parallel {
            partitions.into_par_iter().map(score_partition).collect()
        } else {
            partitions.into_iter().map(score_partition).collect()
        };

        let mut merged = Mapping::new();
        for partial in partials? {
            merged.merge_disjoint(partial);
        }
        Ok(merged)
    }

    /// Best similarity across the two value lists. Values the measure
    /// cannot interpret contribute nothing and raise a warning.
    fn score_pair(
        &self,
        measure: &dyn Measure,
        atom: &Atom,
        sid: ResourceId,
        tid: ResourceId,
        svals: &[String],
        tvals: &[String],
    ) -> f64 {
        let mut best = 0.0_f64;
        let mut uninterpretable = false;
        for a in svals {
            for b in tvals {
                match measure.similarity(a, b) {
                    Some(score) => best = best.max(score),
                    None => uninterpretable = true,
                }
            }
        }
        if uninterpretable {
            self.warn.record_with(|| {
                format!(
                    "`{}` could not interpret a value between `{}` and `{}`",
                    atom.measure,
                    self.source.external_id(sid).unwrap_or("?"),
                    self.target.external_id(tid).unwrap_or("?"),
                )
            });
        }
        best
    }

    /// One aggregate warning per side and atom for resources missing
    /// the scored property.
    fn report_missing_values(&self, atom: &Atom) {
        let sides = [
            ("source", self.source, &atom.source_property),
            ("target", self.target, &atom.target_property),
        ];
        for (side, store, property) in sides {
            let carried = store
                .column(property)
                .map(|column| column.len())
                .unwrap_or(0);
            let missing = store.resource_count() - carried;
            if missing > 0 {
                self.warn.record_with(|| {
                    format!("{missing} {side} resources have no value for `{property}`")
                });
            }
        }
    }
}

fn contains_reuse(node: &PlanNode) -> bool {
    match node {
        PlanNode::Atomic { strategy, .. } => *strategy == Strategy::ReuseChildMapping,
        PlanNode::Combine { left, right, .. } => contains_reuse(left) || contains_reuse(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::{DefaultPlanner, Planner};
    use crate::{CollectionStats, PlanContext};
    use linkage_dsl::parse_metric_v1;

    fn store(rows: &[(&str, &str)]) -> ResourceStore {
        let mut store = ResourceStore::new();
        for (id, label) in rows {
            let rid = store.add_resource(id);
            store.add_value(rid, "label", label);
        }
        store
    }

    fn plan_for(text: &str, source: &CollectionStats, target: &CollectionStats) -> ExecutionPlan {
        let expr = parse_metric_v1(text).expect("parse");
        DefaultPlanner.plan(
            &expr,
            &PlanContext {
                registry: MeasureRegistry::global(),
                source,
                target,
            },
        )
    }

    #[test]
    fn a_pre_set_cancel_flag_stops_the_run() {
        let src = store(&[("urn:a", "x")]);
        let tgt = store(&[("urn:b", "x")]);
        let plan = plan_for("exact_match(x.label, y.label)|1.0", &src.stats(), &tgt.stats());

        let budget = RunBudget::unlimited();
        budget.cancel_flag().store(true, Ordering::Relaxed);
        let err = DefaultEngine::serial()
            .run(
                &plan,
                &src,
                &tgt,
                MeasureRegistry::global(),
                &RunOptions::default(),
                &budget,
            )
            .unwrap_err();
        assert!(matches!(err, ExecError::Cancelled { .. }));
        assert!(err.is_cancellation());
    }

    #[test]
    fn an_expired_deadline_reports_a_timeout() {
        let src = store(&[("urn:a", "x")]);
        let tgt = store(&[("urn:b", "x")]);
        let plan = plan_for("exact_match(x.label, y.label)|1.0", &src.stats(), &tgt.stats());

        let budget = RunBudget::new(Some(Duration::ZERO), None);
        std::thread::sleep(Duration::from_millis(5));
        let err = DefaultEngine::serial()
            .run(
                &plan,
                &src,
                &tgt,
                MeasureRegistry::global(),
                &RunOptions::default(),
                &budget,
            )
            .unwrap_err();
        assert!(matches!(err, ExecError::TimedOut { .. }));
    }

    #[test]
    fn reuse_without_a_producer_is_an_internal_error() {
        let src = store(&[("urn:a", "x")]);
        let tgt = store(&[("urn:b", "x")]);
        let plan = ExecutionPlan {
            root: PlanNode::Atomic {
                atom: Atom {
                    measure: "exact_match".to_string(),
                    source_property: "label".to_string(),
                    target_property: "label".to_string(),
                    threshold: 1.0,
                },
                strategy: Strategy::ReuseChildMapping,
                key: "fnv1a64:deadbeefdeadbeef".to_string(),
                estimated_pairs: 1.0,
            },
            notes: Vec::new(),
        };
        let err = DefaultEngine::serial()
            .run(
                &plan,
                &src,
                &tgt,
                MeasureRegistry::global(),
                &RunOptions::default(),
                &RunBudget::unlimited(),
            )
            .unwrap_err();
        assert!(matches!(err, ExecError::Internal(_)));
    }

    #[test]
    fn warning_samples_are_capped_but_counting_continues() {
        let sink = WarningSink::default();
        for i in 0..100 {
            sink.record_with(|| format!("warning {i}"));
        }
        let summary = sink.into_summary();
        assert_eq!(summary.count, 100);
        assert_eq!(summary.samples.len(), WarningSink::MAX_SAMPLES);
    }

    #[test]
    fn cancellation_mid_run_stops_a_large_pairwise_scan() {
        let mut src = ResourceStore::new();
        let mut tgt = ResourceStore::new();
        for i in 0..1200 {
            let s = src.add_resource(&format!("urn:s:{i}"));
            src.add_value(s, "label", &format!("a moderately long source label {i}"));
            let t = tgt.add_resource(&format!("urn:t:{i}"));
            tgt.add_value(t, "label", &format!("a moderately long target label {i}"));
        }
        // Levenshtein has no blocking scheme, so this is a full pairwise
        // scan over 1200 x 1200 value pairs.
        let plan = plan_for(
            "levenshtein(x.label, y.label)|0.95",
            &src.stats(),
            &tgt.stats(),
        );

        let budget = RunBudget::unlimited();
        let flag = budget.cancel_flag();
        let signaller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            flag.store(true, Ordering::Relaxed);
        });
        let err = DefaultEngine::parallel()
            .run(
                &plan,
                &src,
                &tgt,
                MeasureRegistry::global(),
                &RunOptions::default(),
                &budget,
            )
            .unwrap_err();
        signaller.join().expect("signaller thread");
        // The budget is checked between source resources, so the signal
        // lands mid-scan and the run yields no mapping at all.
        assert!(matches!(err, ExecError::Cancelled { .. }));
    }

    #[test]
    fn granularity_does_not_change_the_result() {
        let src = store(&[
            ("urn:s0", "alpha"),
            ("urn:s1", "beta"),
            ("urn:s2", "gamma"),
            ("urn:s3", "alpha"),
            ("urn:s4", "delta"),
        ]);
        let tgt = store(&[
            ("urn:t0", "alpha"),
            ("urn:t1", "delta"),
            ("urn:t2", "beta"),
        ]);
        let plan = plan_for("exact_match(x.label, y.label)|1.0", &src.stats(), &tgt.stats());

        let mut results = Vec::new();
        for granularity in [1, 2, 7] {
            let options = RunOptions {
                granularity,
                and_combiner: AndCombiner::Min,
            };
            let output = DefaultEngine::parallel()
                .run(
                    &plan,
                    &src,
                    &tgt,
                    MeasureRegistry::global(),
                    &options,
                    &RunBudget::unlimited(),
                )
                .expect("run");
            results.push(output.mapping);
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
        assert_eq!(results[0].len(), 4);
    }
}
