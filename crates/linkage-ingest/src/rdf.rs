//! RDF loading via Sophia (N-Triples and Turtle).
//!
//! Each subject becomes one resource keyed by its IRI (or blank node
//! label). Predicates are compacted to their local name; literal
//! objects contribute their lexical form, IRI objects their full IRI.
//! Language tags and datatypes are dropped: measures compare lexical
//! forms only.

use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use linkage_engine::ResourceStore;
use sophia::api::prelude::*;

use crate::local_name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdfFormat {
    NTriples,
    Turtle,
}

/// Error type for the per-triple sink; Sophia requires a named error
/// implementing `std::error::Error`.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct TripleSinkError {
    message: String,
}

impl From<anyhow::Error> for TripleSinkError {
    fn from(value: anyhow::Error) -> Self {
        Self {
            message: value.to_string(),
        }
    }
}

pub fn load_rdf(path: &Path, format: RdfFormat) -> Result<ResourceStore> {
    let file =
        std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut store = ResourceStore::new();
    let mut sink = |subject: String, predicate: String, object: String| -> Result<()> {
        let subject = node_label(&subject)?;
        let Node::Iri(predicate) = node_label(&predicate)? else {
            // Predicates are IRIs in valid RDF; skip anything else.
            return Ok(());
        };
        let value = object_value(&object)?;
        let resource = store.add_resource(subject.as_str());
        store.add_value(resource, local_name(&predicate), &value);
        Ok(())
    };

    match format {
        RdfFormat::NTriples => {
            sophia::turtle::parser::nt::parse_bufread(reader)
                .try_for_each_triple(|t| -> std::result::Result<(), TripleSinkError> {
                    sink(t.s().to_string(), t.p().to_string(), t.o().to_string())
                        .map_err(TripleSinkError::from)
                })
                .map_err(|e| anyhow!("failed to parse {} as N-Triples: {e}", path.display()))?;
        }
        RdfFormat::Turtle => {
            sophia::turtle::parser::turtle::parse_bufread(reader)
                .try_for_each_triple(|t| -> std::result::Result<(), TripleSinkError> {
                    sink(t.s().to_string(), t.p().to_string(), t.o().to_string())
                        .map_err(TripleSinkError::from)
                })
                .map_err(|e| anyhow!("failed to parse {} as Turtle: {e}", path.display()))?;
        }
    }
    Ok(store)
}

enum Node {
    Iri(String),
    Blank(String),
}

impl Node {
    fn as_str(&self) -> &str {
        match self {
            Node::Iri(iri) => iri,
            Node::Blank(label) => label,
        }
    }
}

/// Parse a term's display form as an IRI or blank node.
fn node_label(term: &str) -> Result<Node> {
    let term = term.trim();
    if let Some(iri) = term.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        return Ok(Node::Iri(iri.to_string()));
    }
    if term.starts_with("_:") {
        return Ok(Node::Blank(term.to_string()));
    }
    Err(anyhow!("expected IRI or blank node, got `{term}`"))
}

/// Lexical form of a literal object, or the IRI / blank label of a node
/// object.
fn object_value(term: &str) -> Result<String> {
    let term = term.trim();
    if !term.starts_with('"') {
        return Ok(node_label(term)?.as_str().to_string());
    }

    let closing = closing_quote(term)
        .ok_or_else(|| anyhow!("literal without closing quote: `{term}`"))?;
    Ok(unescape(&term[1..closing]))
}

/// Index of the closing quote, skipping backslash escapes.
fn closing_quote(term: &str) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in term.char_indices().skip(1) {
        match c {
            '"' if !escaped => return Some(i),
            '\\' => escaped = !escaped,
            _ => escaped = false,
        }
    }
    None
}

fn unescape(lexical: &str) -> String {
    let mut out = String::with_capacity(lexical.len());
    let mut chars = lexical.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
