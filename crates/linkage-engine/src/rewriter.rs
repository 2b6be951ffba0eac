//! Expression validation and pre-planning normalization.
//!
//! Validation resolves measure names against the registry and property
//! names against the two collections; it runs before any rewrite so a
//! malformed expression never reaches the planner.
//!
//! The default rewriter applies meaning-preserving passes to a fixpoint:
//!
//! 1. *Threshold pushdown.* An AND node filters on the fused score, and
//!    the fused score never exceeds either input, so both child gates
//!    can be raised to the parent's without changing the result.
//! 2. *Flatten and reorder.* Runs of the same commutative operator at
//!    the same threshold are gathered and rebuilt left-deep with the
//!    cheapest operand first, which also makes structurally equal
//!    sub-expressions spell identically for the planner's dedup.
//!
//! Both passes are deterministic, so rewriting is idempotent: the second
//! application is a no-op.

use linkage_dsl::{Atom, MetricExpr, Operator};

use crate::error::ValidationError;
use crate::planner::estimate_pairs;
use crate::PlanContext;

/// Reject unknown measures and properties carried by neither collection.
pub fn validate(expr: &MetricExpr, ctx: &PlanContext<'_>) -> Result<(), ValidationError> {
    let mut atoms = Vec::new();
    expr.for_each_atom(&mut |atom| atoms.push(atom));

    for atom in atoms {
        let fragment = MetricExpr::Measure(atom.clone()).to_string();
        if ctx.registry.get(&atom.measure).is_none() {
            return Err(ValidationError::UnknownMeasure {
                measure: atom.measure.clone(),
                fragment,
            });
        }
        for property in [&atom.source_property, &atom.target_property] {
            if !ctx.source.has_property(property) && !ctx.target.has_property(property) {
                return Err(ValidationError::UnknownProperty {
                    property: property.clone(),
                    fragment,
                });
            }
        }
    }
    Ok(())
}

pub trait Rewriter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Produce an equivalent expression. Must not fail: validation has
    /// already run, and a rewriter that cannot improve an expression
    /// returns it unchanged.
    fn rewrite(&self, expr: &MetricExpr, ctx: &PlanContext<'_>) -> MetricExpr;
}

pub struct DefaultRewriter;

const MAX_PASSES: usize = 8;

impl Rewriter for DefaultRewriter {
    fn name(&self) -> &'static str {
        "default"
    }

    fn rewrite(&self, expr: &MetricExpr, ctx: &PlanContext<'_>) -> MetricExpr {
        let mut current = expr.clone();
        for _ in 0..MAX_PASSES {
            let next = reorder(push_down(current.clone(), 0.0), ctx);
            if next == current {
                break;
            }
            current = next;
        }
        current
    }
}

/// Raise thresholds along AND spines. `floor` is the tightest gate any
/// ancestor AND imposes on this subtree.
fn push_down(expr: MetricExpr, floor: f64) -> MetricExpr {
    match expr {
        MetricExpr::Measure(atom) => MetricExpr::Measure(Atom {
            threshold: atom.threshold.max(floor),
            ..atom
        }),
        MetricExpr::Combinator {
            op,
            threshold,
            left,
            right,
        } => {
            let threshold = threshold.max(floor);
            // Only AND may push: OR keeps pairs either side accepts, and
            // MINUS/XOR change meaning if an operand's gate moves.
            let child_floor = if op == Operator::And { threshold } else { 0.0 };
            MetricExpr::Combinator {
                op,
                threshold,
                left: Box::new(push_down(*left, child_floor)),
                right: Box::new(push_down(*right, child_floor)),
            }
        }
    }
}

/// Rebuild commutative runs left-deep, cheapest operand first. Ties
/// break on the canonical text so the result is deterministic.
fn reorder(expr: MetricExpr, ctx: &PlanContext<'_>) -> MetricExpr {
    match expr {
        MetricExpr::Measure(atom) => MetricExpr::Measure(atom),
        MetricExpr::Combinator {
            op,
            threshold,
            left,
            right,
        } => {
            let left = reorder(*left, ctx);
            let right = reorder(*right, ctx);
            if !op.is_commutative() {
                return MetricExpr::Combinator {
                    op,
                    threshold,
                    left: Box::new(left),
                    right: Box::new(right),
                };
            }

            let mut operands = Vec::new();
            gather(op, threshold, left, &mut operands);
            gather(op, threshold, right, &mut operands);
            operands.sort_by(|a, b| {
                estimate_pairs(a, ctx)
                    .total_cmp(&estimate_pairs(b, ctx))
                    .then_with(|| a.to_string().cmp(&b.to_string()))
            });

            let rebuilt = operands.into_iter().reduce(|l, r| MetricExpr::Combinator {
                op,
                threshold,
                left: Box::new(l),
                right: Box::new(r),
            });
            match rebuilt {
                Some(expr) => expr,
                None => unreachable!("a combinator always yields at least two operands"),
            }
        }
    }
}

/// Collect a same-operator run. Only children at the *same* threshold
/// may be absorbed: a tighter nested gate filters pairs the flat form
/// would keep.
fn gather(op: Operator, threshold: f64, expr: MetricExpr, out: &mut Vec<MetricExpr>) {
    match expr {
        MetricExpr::Combinator {
            op: child_op,
            threshold: child_threshold,
            left,
            right,
        } if child_op == op && child_threshold == threshold => {
            gather(op, threshold, *left, out);
            gather(op, threshold, *right, out);
        }
        other => out.push(other),
    }
}
