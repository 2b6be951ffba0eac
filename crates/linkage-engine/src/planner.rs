//! Cost-based translation of rewritten expressions into execution plans.
//!
//! The planner never changes meaning: whatever strategy it picks for an
//! atom yields the same mapping, only at different cost. Estimates come
//! from the collection statistics and each measure's selectivity class;
//! when a statistic is missing the planner falls back to the always-
//! correct full pairwise strategy and leaves a note saying why.

use linkage_dsl::digest::atom_key_v1;
use linkage_dsl::{Atom, MetricExpr, Operator};
use serde::Serialize;

use ahash::AHashSet;

use crate::PlanContext;

/// How one atomic node obtains its mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Score every (source, target) pair. Always correct.
    FullPairwise,
    /// Build a candidate index over the target column, score only the
    /// candidates. Requires a complete blocking scheme and a positive
    /// threshold.
    IndexedBlocking,
    /// Second or later reference to an identical atom: reuse the first
    /// occurrence's mapping instead of recomputing it.
    ReuseChildMapping,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum PlanNode {
    Atomic {
        #[serde(flatten)]
        atom: Atom,
        strategy: Strategy,
        /// Structural identity of the computation, shared by duplicates.
        key: String,
        estimated_pairs: f64,
    },
    Combine {
        op: Operator,
        threshold: f64,
        estimated_pairs: f64,
        left: Box<PlanNode>,
        right: Box<PlanNode>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub root: PlanNode,
    /// Human-readable fallback and dedup decisions, surfaced in run
    /// metadata and by the `plan` command.
    pub notes: Vec<String>,
}

pub trait Planner: Send + Sync {
    fn name(&self) -> &'static str;

    fn plan(&self, expr: &MetricExpr, ctx: &PlanContext<'_>) -> ExecutionPlan;
}

impl std::fmt::Debug for dyn Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner").field("name", &self.name()).finish()
    }
}

/// Expected surviving pairs of a sub-expression. Atoms combine the two
/// property cardinalities with the measure's pass rate; combinators
/// bound their children the way their set semantics do.
pub fn estimate_pairs(expr: &MetricExpr, ctx: &PlanContext<'_>) -> f64 {
    match expr {
        MetricExpr::Measure(atom) => {
            let pass = match ctx.registry.get(&atom.measure) {
                Some(measure) => measure.selectivity().pass_rate(atom.threshold),
                None => 1.0,
            };
            cross_product(atom, ctx) * pass
        }
        MetricExpr::Combinator {
            op, left, right, ..
        } => {
            let l = estimate_pairs(left, ctx);
            let r = estimate_pairs(right, ctx);
            match op {
                Operator::And => l.min(r),
                Operator::Or | Operator::Xor => l + r,
                Operator::Minus => l,
            }
        }
    }
}

/// Pairs whose both sides actually carry the atom's properties. Falls
/// back to full collection sizes when a property is one-sided.
fn cross_product(atom: &Atom, ctx: &PlanContext<'_>) -> f64 {
    let s = ctx
        .source
        .cardinality(&atom.source_property)
        .unwrap_or(ctx.source.resource_count);
    let t = ctx
        .target
        .cardinality(&atom.target_property)
        .unwrap_or(ctx.target.resource_count);
    s as f64 * t as f64
}

// ============================================================================
// Default planner
// ============================================================================

/// Blocking must beat pairwise by this factor to be chosen; near ties
/// go to the simpler strategy.
const TIE_BREAK_MARGIN: f64 = 1.10;

pub struct DefaultPlanner;

impl Planner for DefaultPlanner {
    fn name(&self) -> &'static str {
        "default"
    }

    fn plan(&self, expr: &MetricExpr, ctx: &PlanContext<'_>) -> ExecutionPlan {
        let mut notes = Vec::new();
        let mut seen = AHashSet::new();
        let root = plan_node(expr, ctx, &mut seen, &mut notes);
        ExecutionPlan { root, notes }
    }
}

fn plan_node(
    expr: &MetricExpr,
    ctx: &PlanContext<'_>,
    seen: &mut AHashSet<String>,
    notes: &mut Vec<String>,
) -> PlanNode {
    match expr {
        MetricExpr::Measure(atom) => {
            let key = atom_key_v1(atom);
            let estimated_pairs = estimate_pairs(expr, ctx);
            let strategy = if !seen.insert(key.clone()) {
                notes.push(format!("reusing mapping for duplicate atom `{expr}`"));
                Strategy::ReuseChildMapping
            } else {
                choose_atomic_strategy(atom, ctx, notes)
            };
            PlanNode::Atomic {
                atom: atom.clone(),
                strategy,
                key,
                estimated_pairs,
            }
        }
        MetricExpr::Combinator {
            op,
            threshold,
            left,
            right,
        } => {
            // Post-order, left first, matching execution order: a reuse
            // tag always points at an already-computed mapping.
            let left = plan_node(left, ctx, seen, notes);
            let right = plan_node(right, ctx, seen, notes);
            PlanNode::Combine {
                op: *op,
                threshold: *threshold,
                estimated_pairs: estimate_pairs(expr, ctx),
                left: Box::new(left),
                right: Box::new(right),
            }
        }
    }
}

fn choose_atomic_strategy(
    atom: &Atom,
    ctx: &PlanContext<'_>,
    notes: &mut Vec<String>,
) -> Strategy {
    let Some(measure) = ctx.registry.get(&atom.measure) else {
        // Validation catches this; stay correct if a caller skipped it.
        notes.push(format!(
            "no measure `{}`; falling back to FULL_PAIRWISE",
            atom.measure
        ));
        return Strategy::FullPairwise;
    };
    if measure.blocking_scheme().is_none() || atom.threshold <= 0.0 {
        return Strategy::FullPairwise;
    }

    let (Some(s), Some(t)) = (
        ctx.source.cardinality(&atom.source_property),
        ctx.target.cardinality(&atom.target_property),
    ) else {
        notes.push(format!(
            "missing statistics for `{}`/`{}`; falling back to FULL_PAIRWISE",
            atom.source_property, atom.target_property
        ));
        return Strategy::FullPairwise;
    };
    let (s, t) = (s as f64, t as f64);

    let pairwise_cost = s * t;
    let candidate_pairs = s * t * measure.selectivity().pass_rate(atom.threshold);
    let blocking_cost = t + candidate_pairs;
    if blocking_cost * TIE_BREAK_MARGIN <= pairwise_cost {
        Strategy::IndexedBlocking
    } else {
        Strategy::FullPairwise
    }
}

// ============================================================================
// Naive planner
// ============================================================================

/// Baseline for correctness comparisons and for collections too small
/// to be worth indexing: every atom is scored pairwise, nothing is
/// shared.
pub struct NaivePlanner;

impl Planner for NaivePlanner {
    fn name(&self) -> &'static str {
        "naive"
    }

    fn plan(&self, expr: &MetricExpr, ctx: &PlanContext<'_>) -> ExecutionPlan {
        ExecutionPlan {
            root: naive_node(expr, ctx),
            notes: Vec::new(),
        }
    }
}

fn naive_node(expr: &MetricExpr, ctx: &PlanContext<'_>) -> PlanNode {
    match expr {
        MetricExpr::Measure(atom) => PlanNode::Atomic {
            atom: atom.clone(),
            strategy: Strategy::FullPairwise,
            key: atom_key_v1(atom),
            estimated_pairs: estimate_pairs(expr, ctx),
        },
        MetricExpr::Combinator {
            op,
            threshold,
            left,
            right,
        } => PlanNode::Combine {
            op: *op,
            threshold: *threshold,
            estimated_pairs: estimate_pairs(expr, ctx),
            left: Box::new(naive_node(left, ctx)),
            right: Box::new(naive_node(right, ctx)),
        },
    }
}
