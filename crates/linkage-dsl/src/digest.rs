//! Stable structural digests for metric expressions (versioned).
//!
//! The planner deduplicates structurally identical atomic
//! sub-expressions: the second and later references to the same atom
//! reuse the first occurrence's mapping instead of recomputing it. That
//! needs a stable identity for "the same computation".
//!
//! We use a **simple, deterministic, non-cryptographic** digest:
//!
//! - algorithm: **FNV-1a 64-bit**
//! - input: the canonical textual form of the (sub-)expression
//! - output: `"fnv1a64:<16 lowercase hex digits>"`
//!
//! This digest is *not* a security primitive; it is a stability/identity
//! tool for plan-node sharing and cache keys.

use crate::metric_v1::{Atom, MetricExpr};

/// Prefix used in serialized digests.
pub const METRIC_DIGEST_V1_PREFIX: &str = "fnv1a64:";

/// Compute a v1 digest (FNV-1a 64-bit) over arbitrary bytes.
pub fn fnv1a64_digest_bytes(bytes: &[u8]) -> String {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x00000100000001b3;

    let mut hash = FNV_OFFSET_BASIS;
    for b in bytes {
        hash ^= (*b) as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }

    format!("{METRIC_DIGEST_V1_PREFIX}{hash:016x}")
}

/// Digest of a whole metric expression (canonical form).
pub fn metric_digest_v1(expr: &MetricExpr) -> String {
    fnv1a64_digest_bytes(expr.to_string().as_bytes())
}

/// Digest identifying one atomic computation: measure, property pair,
/// and effective threshold. Two atoms with equal keys would produce the
/// same mapping, so the engine computes the mapping once and shares it.
pub fn atom_key_v1(atom: &Atom) -> String {
    let text = format!(
        "measure={}|src={}|tgt={}|threshold={}",
        atom.measure, atom.source_property, atom.target_property, atom.threshold
    );
    fnv1a64_digest_bytes(text.as_bytes())
}
