//! Delimited-text loading (CSV/TSV).
//!
//! The header row names the properties; the first column holds the
//! resource identifier. Empty cells leave the property off the
//! resource, and repeated identifiers accumulate values on the same
//! resource.

use std::path::Path;

use anyhow::{bail, Context, Result};
use linkage_engine::ResourceStore;

pub fn load_delimited(path: &Path, delimiter: u8) -> Result<ResourceStore> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .flexible(false)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("reading header of {}", path.display()))?
        .clone();
    if headers.len() < 2 {
        bail!(
            "{} needs an identifier column and at least one property column",
            path.display()
        );
    }

    let mut store = ResourceStore::new();
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("row {} of {}", row + 2, path.display()))?;
        let Some(id) = record.get(0).filter(|id| !id.is_empty()) else {
            bail!("row {} of {} has an empty identifier", row + 2, path.display());
        };
        let resource = store.add_resource(id);
        for (column, property) in headers.iter().enumerate().skip(1) {
            if let Some(value) = record.get(column).filter(|v| !v.is_empty()) {
                store.add_value(resource, property, value);
            }
        }
    }
    Ok(store)
}
