//! Integration tests for the complete linkage pipeline
//!
//! These tests verify end-to-end functionality across crates:
//! - Ingest (CSV / N-Triples) -> ResourceStore
//! - Expression -> Rewriter -> Planner -> Engine -> Mapping
//! - Plan serialization for the `plan` command
//!
//! Run with: cargo test --test integration_tests

use std::io::Write;
use std::path::PathBuf;

use linkage_dsl::parse_metric_v1;
use linkage_engine::{
    run_link_spec, ExecuteOptions, MeasureRegistry, PlanContext, StrategyRegistry,
};
use linkage_ingest::load_collection;
use tempfile::tempdir;

fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).expect("create");
    f.write_all(content.as_bytes()).expect("write");
    path
}

// ============================================================================
// CSV ingest -> pipeline
// ============================================================================

#[test]
fn csv_collections_link_end_to_end() {
    let dir = tempdir().expect("tempdir");
    let source_path = write_file(
        &dir,
        "source.csv",
        concat!(
            "id,label,pop\n",
            "urn:s:berlin,Berlin,3700000\n",
            "urn:s:paris,Paris,2100000\n",
            "urn:s:rome,Rome,2800000\n",
        ),
    );
    let target_path = write_file(
        &dir,
        "target.csv",
        concat!(
            "id,label,pop\n",
            "urn:t:paris,Paris,2100000\n",
            "urn:t:madrid,Madrid,3200000\n",
            "urn:t:berlin,Berlin,3600000\n",
        ),
    );

    let source = load_collection(&source_path).expect("load source");
    let target = load_collection(&target_path).expect("load target");

    let result = run_link_spec(
        "exact_match(x.label, y.label)|1.0",
        &source,
        &target,
        &ExecuteOptions::default(),
    )
    .expect("run");

    let links: Vec<(String, String)> = result
        .mapping
        .sorted_links()
        .into_iter()
        .map(|(s, t, _)| {
            (
                source.external_id(s).expect("source id").to_string(),
                target.external_id(t).expect("target id").to_string(),
            )
        })
        .collect();
    assert_eq!(
        links,
        vec![
            ("urn:s:berlin".to_string(), "urn:t:berlin".to_string()),
            ("urn:s:paris".to_string(), "urn:t:paris".to_string()),
        ]
    );
}

#[test]
fn combined_expression_over_csv_respects_both_gates() {
    let dir = tempdir().expect("tempdir");
    let source_path = write_file(
        &dir,
        "source.csv",
        concat!(
            "id,label,pop\n",
            "urn:s:a,Port Louis,150000\n",
            "urn:s:b,Saint Helier,34000\n",
        ),
    );
    let target_path = write_file(
        &dir,
        "target.csv",
        concat!(
            "id,label,pop\n",
            "urn:t:a,Port Louis Harbour,150000\n",
            "urn:t:b,Saint Helier,999999\n",
        ),
    );

    let source = load_collection(&source_path).expect("load source");
    let target = load_collection(&target_path).expect("load target");

    // Labels must overlap and populations must be close. The second
    // pair matches on label but fails the population gate.
    let result = run_link_spec(
        "and(jaccard(x.label, y.label)|0.5, euclidean(x.pop, y.pop)|0.9)|0.5",
        &source,
        &target,
        &ExecuteOptions::default(),
    )
    .expect("run");

    assert_eq!(result.mapping.len(), 1);
    assert!(result.mapping.contains(0, 0));
}

// ============================================================================
// RDF ingest -> pipeline
// ============================================================================

#[test]
fn ntriples_collections_link_end_to_end() {
    let dir = tempdir().expect("tempdir");
    let source_path = write_file(
        &dir,
        "source.nt",
        concat!(
            "<http://ex.org/s/1> <http://www.w3.org/2000/01/rdf-schema#label> \"Oslo\" .\n",
            "<http://ex.org/s/2> <http://www.w3.org/2000/01/rdf-schema#label> \"Bergen\" .\n",
        ),
    );
    let target_path = write_file(
        &dir,
        "target.nt",
        concat!(
            "<http://ex.org/t/1> <http://www.w3.org/2000/01/rdf-schema#label> \"Oslo\"@no .\n",
            "<http://ex.org/t/2> <http://www.w3.org/2000/01/rdf-schema#label> \"Trondheim\" .\n",
        ),
    );

    let source = load_collection(&source_path).expect("load source");
    let target = load_collection(&target_path).expect("load target");

    let result = run_link_spec(
        "exact_match(x.label, y.label)|1.0",
        &source,
        &target,
        &ExecuteOptions::default(),
    )
    .expect("run");

    assert_eq!(result.mapping.len(), 1);
    let (s, t, score) = result.mapping.sorted_links()[0];
    assert_eq!(source.external_id(s), Some("http://ex.org/s/1"));
    assert_eq!(target.external_id(t), Some("http://ex.org/t/1"));
    assert_eq!(score, 1.0);
}

// ============================================================================
// Plan serialization
// ============================================================================

#[test]
fn plans_serialize_with_strategies_and_estimates() {
    let dir = tempdir().expect("tempdir");
    let path = write_file(
        &dir,
        "both.csv",
        "id,label\nurn:1,alpha\nurn:2,beta\nurn:3,gamma\n",
    );
    let store = load_collection(&path).expect("load");
    let stats = store.stats();
    let ctx = PlanContext {
        registry: MeasureRegistry::global(),
        source: &stats,
        target: &stats,
    };

    let strategies = StrategyRegistry::global();
    let rewriter = strategies.rewriter("default").expect("rewriter");
    let planner = strategies.planner("default").expect("planner");

    let expr = parse_metric_v1(
        "and(exact_match(x.label, y.label)|1.0, jaccard(x.label, y.label)|0.5)|0.8",
    )
    .expect("parse");
    let plan = planner.plan(&rewriter.rewrite(&expr, &ctx), &ctx);

    let json = serde_json::to_value(&plan).expect("serialize");
    let root = &json["root"];
    assert_eq!(root["node"], "combine");
    assert_eq!(root["op"], "and");
    assert!(root["left"]["strategy"].is_string());
    assert!(root["left"]["estimated_pairs"].is_number());
    assert!(root["left"]["key"]
        .as_str()
        .expect("key")
        .starts_with("fnv1a64:"));
}

// ============================================================================
// Run metadata
// ============================================================================

#[test]
fn metadata_reports_sizes_counts_and_rewritten_form() {
    let dir = tempdir().expect("tempdir");
    let path = write_file(&dir, "both.csv", "id,label\nurn:1,alpha\nurn:2,beta\n");
    let store = load_collection(&path).expect("load");
    let target = load_collection(&path).expect("load");

    let result = run_link_spec(
        "exact_match(x.label, y.label)",
        &store,
        &target,
        &ExecuteOptions {
            acceptance_threshold: 0.9,
            ..ExecuteOptions::default()
        },
    )
    .expect("run");

    assert_eq!(result.metadata.source_size, 2);
    assert_eq!(result.metadata.target_size, 2);
    assert_eq!(result.metadata.link_count, result.mapping.len());
    // The acceptance threshold replaced the missing root gate.
    assert!(result.metadata.rewritten_expression.ends_with("|0.9"));
    assert_eq!(result.mapping.len(), 2);
}
