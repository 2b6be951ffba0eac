//! Run configuration (JSON).
//!
//! A configuration names the two collections, the metric expression,
//! and two output bands: links at or above the acceptance threshold
//! are trusted, links between the verification and acceptance
//! thresholds are routed to a review file.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use linkage_engine::AndCombiner;
use serde::{Deserialize, Serialize};

fn default_stage() -> String {
    "default".to_string()
}

fn default_granularity() -> usize {
    2
}

fn default_relation() -> String {
    "owl:sameAs".to_string()
}

/// One output band: a score threshold, the file links land in, and the
/// relation asserted for them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BandConfig {
    pub threshold: f64,
    pub file: PathBuf,
    #[serde(default = "default_relation")]
    pub relation: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Source collection path (.csv, .tsv, .nt or .ttl).
    pub source: PathBuf,
    /// Target collection path.
    pub target: PathBuf,
    /// Metric expression in the `metric_v1` dialect.
    pub metric: String,

    pub acceptance: BandConfig,
    /// Optional review band below the acceptance threshold.
    #[serde(default)]
    pub verification: Option<BandConfig>,

    #[serde(default = "default_granularity")]
    pub granularity: usize,
    #[serde(default = "default_stage")]
    pub rewriter: String,
    #[serde(default = "default_stage")]
    pub planner: String,
    #[serde(default = "default_stage")]
    pub engine: String,
    #[serde(default)]
    pub and_combiner: AndCombiner,
    /// Wall-clock budget for the whole run, in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading configuration {}", path.display()))?;
        let config: RunConfig = serde_json::from_str(&text)
            .with_context(|| format!("parsing configuration {}", path.display()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        for (name, threshold) in [
            ("acceptance", Some(self.acceptance.threshold)),
            ("verification", self.verification.as_ref().map(|b| b.threshold)),
        ] {
            if let Some(t) = threshold {
                if !(0.0..=1.0).contains(&t) {
                    bail!("{name} threshold {t} out of range [0, 1]");
                }
            }
        }
        if let Some(verification) = &self.verification {
            if verification.threshold > self.acceptance.threshold {
                bail!(
                    "verification threshold {} exceeds acceptance threshold {}",
                    verification.threshold,
                    self.acceptance.threshold
                );
            }
        }
        Ok(())
    }

    /// Lowest score the engine must retain: the verification floor when
    /// a review band exists, the acceptance floor otherwise.
    pub fn retention_threshold(&self) -> f64 {
        self.verification
            .as_ref()
            .map(|band| band.threshold)
            .unwrap_or(self.acceptance.threshold)
    }
}
