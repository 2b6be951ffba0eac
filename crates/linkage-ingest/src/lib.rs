//! Resource collection loaders (boundary adapter).
//!
//! This crate sits at the interop boundary: it parses untrusted input
//! files and emits [`ResourceStore`]s for the engine. It knows nothing
//! about measures or plans.
//!
//! Supported formats, picked by file extension:
//! - CSV / TSV (`.csv`, `.tsv`): first column is the resource
//!   identifier, remaining headers are property names.
//! - N-Triples (`.nt`) and Turtle (`.ttl`): the subject becomes the
//!   resource, the predicate's local name the property, the object's
//!   lexical form (or IRI) the value.

pub mod rdf;
pub mod tabular;

use std::path::Path;

use anyhow::{bail, Result};
use linkage_engine::ResourceStore;
use tracing::info;

use rdf::RdfFormat;

/// Load one collection, dispatching on the file extension.
pub fn load_collection(path: &Path) -> Result<ResourceStore> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let store = match extension.as_str() {
        "csv" => tabular::load_delimited(path, b',')?,
        "tsv" => tabular::load_delimited(path, b'\t')?,
        "nt" => rdf::load_rdf(path, RdfFormat::NTriples)?,
        "ttl" => rdf::load_rdf(path, RdfFormat::Turtle)?,
        other => bail!(
            "unsupported collection format `.{other}` for {}",
            path.display()
        ),
    };
    info!(
        path = %path.display(),
        resources = store.resource_count(),
        "loaded collection"
    );
    Ok(store)
}

/// Last `#`- or `/`-delimited segment of an IRI; the whole IRI when it
/// has neither.
pub fn local_name(iri: &str) -> &str {
    iri.rsplit(['#', '/']).next().unwrap_or(iri)
}
