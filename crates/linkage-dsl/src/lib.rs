//! Linkage metric-expression DSL (canonical dialect)
//!
//! This crate defines the canonical, versioned surface syntax for link
//! specifications and provides the parser + typed AST for it.
//!
//! A *metric expression* declares how similarity between a source and a
//! target resource is computed and thresholded, e.g.
//!
//! ```text
//! and(jaccard(x.label, y.label)|0.5, exact_match(x.name, y.name)|1.0)|0.8
//! ```
//!
//! The AST is deliberately a small closed sum type (atomic measure vs.
//! boolean combinator) so the rewriter and planner can match on it
//! exhaustively. Validation against a measure registry lives in
//! `linkage-engine`; this crate only knows the grammar.

pub mod digest;
pub mod metric_v1;

pub use metric_v1::{
    parse_metric_v1, Atom, MetricExpr, MetricV1ParseError, Operator,
};
