//! Metric-expression dialect: `metric_v1`
//!
//! Grammar (whitespace-insensitive between tokens):
//!
//! ```text
//! expr       := combinator | atomic
//! combinator := ("and" | "or" | "minus" | "xor") "(" expr "," expr ")" thresh?
//! atomic     := ident "(" qualified "," qualified ")" thresh?
//! qualified  := ident "." ident          -- e.g. x.name / y.label
//! thresh     := "|" number               -- number in [0, 1]
//! ```
//!
//! Notes:
//! - The variable prefix of a qualified name (`x.`, `y.`) only fixes the
//!   argument *order*: the first argument is always the source property,
//!   the second the target property. Other prefixes are accepted.
//! - A missing threshold parses as `0.0`; callers tighten it (the run's
//!   acceptance threshold at the root, AND-pushdown below).
//! - Range checks on thresholds happen at parse time; measure-name and
//!   property-name resolution is the engine's validation concern.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char as pchar, multispace0},
    combinator::{all_consuming, opt, recognize},
    sequence::tuple,
    IResult,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Name = String;

// ============================================================================
// AST
// ============================================================================

/// Boolean/set combinators over two sub-expressions' mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    And,
    Or,
    Minus,
    Xor,
}

impl Operator {
    pub fn keyword(self) -> &'static str {
        match self {
            Operator::And => "and",
            Operator::Or => "or",
            Operator::Minus => "minus",
            Operator::Xor => "xor",
        }
    }

    /// AND/OR are commutative; MINUS/XOR keep operand-order semantics
    /// (XOR is commutative as a set but the rewriter does not reorder it,
    /// to keep score provenance stable).
    pub fn is_commutative(self) -> bool {
        matches!(self, Operator::And | Operator::Or)
    }
}

/// Leaf node: one similarity measure over one property pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub measure: Name,
    pub source_property: Name,
    pub target_property: Name,
    pub threshold: f64,
}

/// A link specification as a finite, immutable tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricExpr {
    Measure(Atom),
    Combinator {
        op: Operator,
        threshold: f64,
        left: Box<MetricExpr>,
        right: Box<MetricExpr>,
    },
}

impl MetricExpr {
    pub fn threshold(&self) -> f64 {
        match self {
            MetricExpr::Measure(atom) => atom.threshold,
            MetricExpr::Combinator { threshold, .. } => *threshold,
        }
    }

    /// Replace this node's threshold, returning a new tree node.
    pub fn with_threshold(self, threshold: f64) -> Self {
        match self {
            MetricExpr::Measure(atom) => MetricExpr::Measure(Atom { threshold, ..atom }),
            MetricExpr::Combinator {
                op, left, right, ..
            } => MetricExpr::Combinator {
                op,
                threshold,
                left,
                right,
            },
        }
    }

    /// Visit every atomic node, left to right.
    pub fn for_each_atom<'a>(&'a self, f: &mut impl FnMut(&'a Atom)) {
        match self {
            MetricExpr::Measure(atom) => f(atom),
            MetricExpr::Combinator { left, right, .. } => {
                left.for_each_atom(f);
                right.for_each_atom(f);
            }
        }
    }

    /// Number of atomic nodes in the tree.
    pub fn atom_count(&self) -> usize {
        let mut n = 0usize;
        self.for_each_atom(&mut |_| n += 1);
        n
    }
}

impl fmt::Display for MetricExpr {
    /// Canonical textual form: thresholds always printed, single spaces
    /// after commas. `parse_metric_v1(e.to_string()) == e` for every
    /// well-formed tree.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricExpr::Measure(Atom {
                measure,
                source_property,
                target_property,
                threshold,
            }) => write!(
                f,
                "{measure}(x.{source_property}, y.{target_property})|{threshold}"
            ),
            MetricExpr::Combinator {
                op,
                threshold,
                left,
                right,
            } => write!(f, "{}({left}, {right})|{threshold}", op.keyword()),
        }
    }
}

// ============================================================================
// Parser
// ============================================================================

#[derive(Debug, Error, PartialEq)]
pub enum MetricV1ParseError {
    #[error("metric expression parse error near `{fragment}`")]
    Syntax { fragment: String },
    #[error("threshold {value} out of range [0, 1] near `{fragment}`")]
    ThresholdOutOfRange { value: f64, fragment: String },
    #[error("metric expression is empty")]
    Empty,
}

/// Parse the canonical `metric_v1` dialect into a [`MetricExpr`].
pub fn parse_metric_v1(text: &str) -> Result<MetricExpr, MetricV1ParseError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(MetricV1ParseError::Empty);
    }

    let (_, expr) = all_consuming(tuple((parse_expr, multispace0)))(trimmed)
        .map(|(rest, (expr, _))| (rest, expr))
        .map_err(|e| match e {
            nom::Err::Error(inner) | nom::Err::Failure(inner) => MetricV1ParseError::Syntax {
                fragment: snippet(inner.input),
            },
            nom::Err::Incomplete(_) => MetricV1ParseError::Syntax {
                fragment: snippet(trimmed),
            },
        })?;

    check_thresholds(&expr, trimmed)?;
    Ok(expr)
}

/// First few characters of the unconsumed input, for error reporting.
fn snippet(input: &str) -> String {
    const MAX: usize = 40;
    let trimmed = input.trim();
    if trimmed.len() <= MAX {
        trimmed.to_string()
    } else {
        let mut cut = MAX;
        while !trimmed.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &trimmed[..cut])
    }
}

fn check_thresholds(expr: &MetricExpr, source: &str) -> Result<(), MetricV1ParseError> {
    let check = |t: f64| -> Result<(), MetricV1ParseError> {
        if (0.0..=1.0).contains(&t) {
            Ok(())
        } else {
            Err(MetricV1ParseError::ThresholdOutOfRange {
                value: t,
                fragment: snippet(source),
            })
        }
    };
    match expr {
        MetricExpr::Measure(atom) => check(atom.threshold),
        MetricExpr::Combinator {
            threshold,
            left,
            right,
            ..
        } => {
            check(*threshold)?;
            check_thresholds(left, source)?;
            check_thresholds(right, source)
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn parse_ident(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        take_while1(is_ident_start),
        take_while(is_ident_continue),
    )))(input)
}

fn parse_number(input: &str) -> IResult<&str, f64> {
    let (rest, text) = recognize(tuple((
        take_while1(|c: char| c.is_ascii_digit()),
        opt(tuple((pchar('.'), take_while(|c: char| c.is_ascii_digit())))),
    )))(input)?;
    match text.parse::<f64>() {
        Ok(value) => Ok((rest, value)),
        Err(_) => Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Float,
        ))),
    }
}

/// `ident "." ident`, returning only the property part.
fn parse_qualified(input: &str) -> IResult<&str, &str> {
    let (input, _var) = parse_ident(input)?;
    let (input, _) = pchar('.')(input)?;
    parse_ident(input)
}

fn parse_threshold_suffix(input: &str) -> IResult<&str, f64> {
    let (input, _) = multispace0(input)?;
    let (input, suffix) = opt(tuple((pchar('|'), multispace0, parse_number)))(input)?;
    Ok((input, suffix.map(|(_, _, t)| t).unwrap_or(0.0)))
}

fn parse_operator(input: &str) -> IResult<&str, Operator> {
    alt((
        // Order matters: none of these is a prefix of another, but keep
        // the longest-first habit anyway.
        |i| tag_keyword(i, "minus", Operator::Minus),
        |i| tag_keyword(i, "and", Operator::And),
        |i| tag_keyword(i, "xor", Operator::Xor),
        |i| tag_keyword(i, "or", Operator::Or),
    ))(input)
}

fn tag_keyword<'a>(input: &'a str, kw: &'static str, op: Operator) -> IResult<&'a str, Operator> {
    let (rest, _) = tag(kw)(input)?;
    // Reject `orbit(...)` matching as `or` + `bit(...)`.
    if rest.starts_with(is_ident_continue) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((rest, op))
}

fn parse_combinator(input: &str) -> IResult<&str, MetricExpr> {
    let (input, op) = parse_operator(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = pchar('(')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, left) = parse_expr(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = pchar(',')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, right) = parse_expr(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = pchar(')')(input)?;
    let (input, threshold) = parse_threshold_suffix(input)?;
    Ok((
        input,
        MetricExpr::Combinator {
            op,
            threshold,
            left: Box::new(left),
            right: Box::new(right),
        },
    ))
}

fn parse_atomic(input: &str) -> IResult<&str, MetricExpr> {
    let (input, measure) = parse_ident(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = pchar('(')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, source_property) = parse_qualified(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = pchar(',')(input)?;
    let (input, _) = multispace0(input)?;
    let (input, target_property) = parse_qualified(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = pchar(')')(input)?;
    let (input, threshold) = parse_threshold_suffix(input)?;
    Ok((
        input,
        MetricExpr::Measure(Atom {
            measure: measure.to_string(),
            source_property: source_property.to_string(),
            target_property: target_property.to_string(),
            threshold,
        }),
    ))
}

fn parse_expr(input: &str) -> IResult<&str, MetricExpr> {
    alt((parse_combinator, parse_atomic))(input)
}

// ============================================================================
// Tests
// ============================================================================
