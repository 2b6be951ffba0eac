//! Band-split link output (TSV).
//!
//! One line per link: source id, relation, target id, score. Lines are
//! sorted by resource id so reruns produce byte-identical files.

use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use linkage_engine::{Mapping, ResourceStore};

/// Write the links whose score falls in `[floor, ceiling)` to `path`;
/// an unbounded ceiling takes everything at or above the floor.
pub fn write_band(
    path: &Path,
    mapping: &Mapping,
    source: &ResourceStore,
    target: &ResourceStore,
    relation: &str,
    floor: f64,
    ceiling: Option<f64>,
) -> Result<usize> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);

    let mut written = 0usize;
    for (sid, tid, score) in mapping.sorted_links() {
        if score < floor {
            continue;
        }
        if let Some(ceiling) = ceiling {
            if score >= ceiling {
                continue;
            }
        }
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            source.external_id(sid).unwrap_or("?"),
            relation,
            target.external_id(tid).unwrap_or("?"),
            score
        )
        .with_context(|| format!("writing {}", path.display()))?;
        written += 1;
    }
    out.flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(written)
}
