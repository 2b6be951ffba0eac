//! Link-discovery core: rewriter, planner, and execution engine.
//!
//! The pipeline turns a metric expression and two resource collections
//! into a score-carrying [`Mapping`]:
//!
//! ```text
//! parse -> validate -> rewrite -> plan -> execute
//! ```
//!
//! Each stage is swappable by name through [`StrategyRegistry`]; the
//! front door for embedders is [`run_link_spec`], which wires the
//! default stages together and reports per-stage timings.

pub mod blocking;
pub mod engine;
pub mod error;
pub mod mapping;
pub mod measure;
pub mod planner;
pub mod registry;
pub mod rewriter;

use std::time::Instant;

use ahash::AHashMap;
use linkage_dsl::parse_metric_v1;
use serde::Serialize;
use tracing::info;

pub use engine::{
    AndCombiner, Engine, EngineOutput, RunBudget, RunOptions, WarningSummary,
};
pub use error::{ExecError, ValidationError};
pub use mapping::Mapping;
pub use measure::{BlockingScheme, Measure, MeasureRegistry, SelectivityClass};
pub use planner::{ExecutionPlan, PlanNode, Planner, Strategy};
pub use registry::StrategyRegistry;
pub use rewriter::{validate, Rewriter};

/// Dense per-store resource handle. Ids are assigned in insertion order
/// and are only meaningful relative to their own [`ResourceStore`].
pub type ResourceId = u32;

/// Columnar, read-mostly collection of resources. Built once by ingest,
/// then shared immutably across worker threads during a run.
#[derive(Debug, Default)]
pub struct ResourceStore {
    ids: Vec<String>,
    id_lookup: AHashMap<String, ResourceId>,
    columns: AHashMap<String, AHashMap<ResourceId, Vec<String>>>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern an external identifier, returning its dense id. Repeated
    /// calls with the same identifier return the same id.
    pub fn add_resource(&mut self, external_id: &str) -> ResourceId {
        if let Some(id) = self.id_lookup.get(external_id) {
            return *id;
        }
        let id = self.ids.len() as ResourceId;
        self.ids.push(external_id.to_string());
        self.id_lookup.insert(external_id.to_string(), id);
        id
    }

    /// Append one value to a (resource, property) cell. Properties are
    /// multi-valued; duplicates are kept as given.
    pub fn add_value(&mut self, id: ResourceId, property: &str, value: &str) {
        self.columns
            .entry(property.to_string())
            .or_default()
            .entry(id)
            .or_default()
            .push(value.to_string());
    }

    pub fn resource_count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn external_id(&self, id: ResourceId) -> Option<&str> {
        self.ids.get(id as usize).map(String::as_str)
    }

    pub fn resource_id(&self, external_id: &str) -> Option<ResourceId> {
        self.id_lookup.get(external_id).copied()
    }

    /// Values of one property for one resource; empty when absent.
    pub fn values(&self, id: ResourceId, property: &str) -> &[String] {
        self.columns
            .get(property)
            .and_then(|column| column.get(&id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Whole column for one property, if any resource carries it.
    pub fn column(&self, property: &str) -> Option<&AHashMap<ResourceId, Vec<String>>> {
        self.columns.get(property)
    }

    pub fn has_property(&self, property: &str) -> bool {
        self.columns.contains_key(property)
    }

    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Snapshot of the statistics the rewriter and planner consume.
    pub fn stats(&self) -> CollectionStats {
        CollectionStats {
            resource_count: self.ids.len(),
            property_counts: self
                .columns
                .iter()
                .map(|(name, column)| (name.clone(), column.len()))
                .collect(),
        }
    }
}

/// Cardinalities the cost model works from: collection size and, per
/// property, the number of resources carrying at least one value.
#[derive(Debug, Clone, Default)]
pub struct CollectionStats {
    pub resource_count: usize,
    property_counts: AHashMap<String, usize>,
}

impl CollectionStats {
    pub fn has_property(&self, property: &str) -> bool {
        self.property_counts.contains_key(property)
    }

    /// Resources carrying the property, or `None` when it is absent.
    pub fn cardinality(&self, property: &str) -> Option<usize> {
        self.property_counts.get(property).copied()
    }
}

/// Everything the rewriter and planner need to cost an expression.
pub struct PlanContext<'a> {
    pub registry: &'a MeasureRegistry,
    pub source: &'a CollectionStats,
    pub target: &'a CollectionStats,
}

// ============================================================================
// Front door
// ============================================================================

/// Knobs for one end-to-end run. `Default` selects the builtin stages
/// and leaves the expression's own thresholds untouched.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Floor for the root threshold: a root gate below this value is
    /// raised to it before rewriting.
    pub acceptance_threshold: f64,
    /// Number of source partitions evaluated independently.
    pub granularity: usize,
    pub rewriter: String,
    pub planner: String,
    pub engine: String,
    /// Score fusion for AND nodes (OR always keeps the larger score).
    pub and_combiner: AndCombiner,
    pub timeout: Option<std::time::Duration>,
    pub cancel: Option<std::sync::Arc<std::sync::atomic::AtomicBool>>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            acceptance_threshold: 0.0,
            granularity: 2,
            rewriter: "default".to_string(),
            planner: "default".to_string(),
            engine: "default".to_string(),
            and_combiner: AndCombiner::Min,
            timeout: None,
            cancel: None,
        }
    }
}

/// Per-run report: link count, per-stage timings, planner notes, and
/// aggregated data-quality warnings.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub source_size: usize,
    pub target_size: usize,
    pub link_count: usize,
    pub rewritten_expression: String,
    pub rewrite_micros: u64,
    pub plan_micros: u64,
    pub execute_micros: u64,
    pub planner_notes: Vec<String>,
    pub warnings: WarningSummary,
}

#[derive(Debug)]
pub struct LinkResult {
    pub mapping: Mapping,
    pub metadata: RunMetadata,
}

/// Run one link specification end to end. Reentrant: no shared state
/// survives the call, so concurrent runs over the same stores are fine.
pub fn run_link_spec(
    expression: &str,
    source: &ResourceStore,
    target: &ResourceStore,
    options: &ExecuteOptions,
) -> Result<LinkResult, ExecError> {
    if !(0.0..=1.0).contains(&options.acceptance_threshold) {
        return Err(ValidationError::AcceptanceOutOfRange(options.acceptance_threshold).into());
    }
    if options.granularity == 0 {
        return Err(ValidationError::InvalidGranularity.into());
    }

    let strategies = StrategyRegistry::global();
    let rewriter = strategies.rewriter(&options.rewriter)?;
    let planner = strategies.planner(&options.planner)?;
    let engine = strategies.engine(&options.engine)?;

    let expr = parse_metric_v1(expression).map_err(ValidationError::from)?;
    let root_threshold = expr.threshold().max(options.acceptance_threshold);
    let expr = expr.with_threshold(root_threshold);

    let registry = MeasureRegistry::global();
    let source_stats = source.stats();
    let target_stats = target.stats();
    let ctx = PlanContext {
        registry,
        source: &source_stats,
        target: &target_stats,
    };
    validate(&expr, &ctx)?;

    let started = Instant::now();
    let rewritten = rewriter.rewrite(&expr, &ctx);
    let rewrite_micros = started.elapsed().as_micros() as u64;

    let plan_started = Instant::now();
    let plan = planner.plan(&rewritten, &ctx);
    let plan_micros = plan_started.elapsed().as_micros() as u64;

    let run_options = RunOptions {
        granularity: options.granularity,
        and_combiner: options.and_combiner,
    };
    let budget = RunBudget::new(options.timeout, options.cancel.clone());

    let exec_started = Instant::now();
    let output = engine.run(&plan, source, target, registry, &run_options, &budget)?;
    let execute_micros = exec_started.elapsed().as_micros() as u64;

    info!(
        source = source.resource_count(),
        target = target.resource_count(),
        links = output.mapping.len(),
        total_ms = started.elapsed().as_millis() as u64,
        "link run complete"
    );

    Ok(LinkResult {
        metadata: RunMetadata {
            source_size: source.resource_count(),
            target_size: target.resource_count(),
            link_count: output.mapping.len(),
            rewritten_expression: rewritten.to_string(),
            rewrite_micros,
            plan_micros,
            execute_micros,
            planner_notes: plan.notes.clone(),
            warnings: output.warnings,
        },
        mapping: output.mapping,
    })
}
