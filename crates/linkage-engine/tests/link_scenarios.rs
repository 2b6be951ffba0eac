//! End-to-end scenarios with hand-checked expected link sets.

use approx::assert_relative_eq;
use linkage_engine::{run_link_spec, ExecError, ExecuteOptions, ResourceStore, ValidationError};

fn city_store(prefix: &str, rows: &[(&str, &str)]) -> ResourceStore {
    let mut store = ResourceStore::new();
    for (i, (label, pop)) in rows.iter().enumerate() {
        let id = store.add_resource(&format!("urn:{prefix}:{i}"));
        store.add_value(id, "label", label);
        store.add_value(id, "pop", pop);
    }
    store
}

fn options() -> ExecuteOptions {
    ExecuteOptions::default()
}

#[test]
fn exact_match_links_equal_labels_only() {
    let source = city_store(
        "s",
        &[("Berlin", "3700000"), ("Paris", "2100000"), ("Rome", "2800000")],
    );
    let target = city_store(
        "t",
        &[("Paris", "2100000"), ("Madrid", "3200000"), ("Berlin", "3600000")],
    );

    let result = run_link_spec(
        "exact_match(x.label, y.label)|1.0",
        &source,
        &target,
        &options(),
    )
    .expect("run");

    assert_eq!(
        result.mapping.sorted_links(),
        vec![(0, 2, 1.0), (1, 0, 1.0)]
    );
    assert_eq!(result.metadata.link_count, 2);
    assert_eq!(result.metadata.source_size, 3);
    assert_eq!(result.metadata.target_size, 3);
}

#[test]
fn and_keeps_the_smaller_of_the_two_scores() {
    let source = city_store("s", &[("Port Louis", "150000")]);
    let target = city_store("t", &[("Port Louis Harbour", "150000")]);

    let result = run_link_spec(
        "and(jaccard(x.label, y.label)|0.5, euclidean(x.pop, y.pop)|0.9)|0.5",
        &source,
        &target,
        &options(),
    )
    .expect("run");

    // Jaccard {port, louis} vs {port, louis, harbour} = 2/3; euclidean
    // of equal populations = 1.0; AND fuses with min.
    let score = result.mapping.score(0, 0).expect("linked");
    assert_relative_eq!(score, 2.0 / 3.0);
}

#[test]
fn or_keeps_the_larger_score_and_either_side_suffices() {
    let source = city_store("s", &[("Oslo", "700000"), ("Bergen", "290000")]);
    let target = city_store("t", &[("Oslo", "710000"), ("Trondheim", "210000")]);

    let result = run_link_spec(
        "or(exact_match(x.label, y.label)|1.0, euclidean(x.pop, y.pop)|0.9)|0.9",
        &source,
        &target,
        &options(),
    )
    .expect("run");

    // Oslo/Oslo matches by label (1.0) even though populations differ.
    assert_eq!(result.mapping.sorted_links(), vec![(0, 0, 1.0)]);
}

#[test]
fn minus_removes_pairs_the_right_side_accepts() {
    let source = city_store("s", &[("Springfield", "100"), ("Shelbyville", "200")]);
    let target = city_store("t", &[("Springfield", "100"), ("Springfield", "9999")]);

    let result = run_link_spec(
        "minus(exact_match(x.label, y.label)|1.0, exact_match(x.pop, y.pop)|1.0)|0.5",
        &source,
        &target,
        &options(),
    )
    .expect("run");

    // Both targets share the source label, but the first also shares
    // the population and is subtracted. Scores pass through unchanged.
    assert_eq!(result.mapping.sorted_links(), vec![(0, 1, 1.0)]);
}

#[test]
fn xor_keeps_pairs_exactly_one_side_accepts() {
    let source = city_store("s", &[("A", "1"), ("B", "2")]);
    let target = city_store("t", &[("A", "9"), ("C", "2")]);

    let result = run_link_spec(
        "xor(exact_match(x.label, y.label)|1.0, exact_match(x.pop, y.pop)|1.0)|0.5",
        &source,
        &target,
        &options(),
    )
    .expect("run");

    // (0,0) matches by label only, (1,1) by population only. No pair
    // matches both, so both survive.
    assert_eq!(result.mapping.sorted_links(), vec![(0, 0, 1.0), (1, 1, 1.0)]);
}

#[test]
fn acceptance_threshold_tightens_an_ungated_root() {
    let source = city_store("s", &[("alpha beta", "1"), ("alpha", "2")]);
    let target = city_store("t", &[("alpha beta gamma", "1")]);

    let ungated = run_link_spec(
        "jaccard(x.label, y.label)",
        &source,
        &target,
        &options(),
    )
    .expect("run");
    // 2/3 and 1/3 both survive with no gate.
    assert_eq!(ungated.mapping.len(), 2);

    let gated = run_link_spec(
        "jaccard(x.label, y.label)",
        &source,
        &target,
        &ExecuteOptions {
            acceptance_threshold: 0.5,
            ..options()
        },
    )
    .expect("run");
    assert_eq!(gated.mapping.sorted_links().len(), 1);
    assert_relative_eq!(gated.mapping.score(0, 0).expect("kept"), 2.0 / 3.0);
}

#[test]
fn duplicate_atoms_produce_the_same_links_as_the_naive_plan() {
    let source = city_store(
        "s",
        &[("alpha beta", "10"), ("beta gamma", "11"), ("delta", "12")],
    );
    let target = city_store(
        "t",
        &[("alpha beta", "10"), ("gamma", "11"), ("delta epsilon", "13")],
    );
    let expression =
        "or(and(jaccard(x.label, y.label)|0.4, euclidean(x.pop, y.pop)|0.5)|0.4, jaccard(x.label, y.label)|0.4)|0.4";

    let deduped = run_link_spec(expression, &source, &target, &options()).expect("run");
    let naive = run_link_spec(
        expression,
        &source,
        &target,
        &ExecuteOptions {
            planner: "naive".to_string(),
            engine: "serial".to_string(),
            ..options()
        },
    )
    .expect("run");

    assert_eq!(deduped.mapping, naive.mapping);
    assert!(deduped
        .metadata
        .planner_notes
        .iter()
        .any(|note| note.contains("duplicate")));
}

#[test]
fn data_quality_problems_warn_but_do_not_fail() {
    let mut source = ResourceStore::new();
    let a = source.add_resource("urn:s:0");
    source.add_value(a, "pop", "not a number");
    let b = source.add_resource("urn:s:1");
    source.add_value(b, "label", "only a label");

    let mut target = ResourceStore::new();
    let t = target.add_resource("urn:t:0");
    target.add_value(t, "pop", "42");

    let result = run_link_spec("euclidean(x.pop, y.pop)|0.5", &source, &target, &options())
        .expect("run");

    assert!(result.mapping.is_empty());
    assert!(result.metadata.warnings.count >= 2);
    assert!(!result.metadata.warnings.samples.is_empty());
}

#[test]
fn unknown_strategy_names_fail_validation() {
    let store = city_store("s", &[("x", "1")]);
    let err = run_link_spec(
        "exact_match(x.label, y.label)|1.0",
        &store,
        &store,
        &ExecuteOptions {
            engine: "quantum".to_string(),
            ..options()
        },
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ExecError::Validation(ValidationError::UnknownStrategy { kind: "engine", .. })
    ));
}

#[test]
fn empty_collections_yield_an_empty_mapping() {
    let mut source = ResourceStore::new();
    let id = source.add_resource("urn:s:0");
    source.add_value(id, "label", "lonely");
    let target = ResourceStore::new();

    let result = run_link_spec(
        "exact_match(x.label, y.label)|1.0",
        &source,
        &target,
        &options(),
    )
    .expect("run");
    assert!(result.mapping.is_empty());
    assert_eq!(result.metadata.link_count, 0);
}
