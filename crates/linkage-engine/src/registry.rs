//! Name-keyed lookup of pipeline stages.
//!
//! Configurations select stages by name; unknown names are validation
//! errors, never silent fallbacks. Lookup is case-insensitive.

use std::sync::{Arc, OnceLock};

use ahash::AHashMap;

use crate::engine::{DefaultEngine, Engine};
use crate::error::ValidationError;
use crate::planner::{DefaultPlanner, NaivePlanner, Planner};
use crate::rewriter::{DefaultRewriter, Rewriter};

pub struct StrategyRegistry {
    rewriters: AHashMap<String, Arc<dyn Rewriter>>,
    planners: AHashMap<String, Arc<dyn Planner>>,
    engines: AHashMap<String, Arc<dyn Engine>>,
}

impl StrategyRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self {
            rewriters: AHashMap::new(),
            planners: AHashMap::new(),
            engines: AHashMap::new(),
        };
        registry.add_rewriter(Arc::new(DefaultRewriter));
        registry.add_planner(Arc::new(DefaultPlanner));
        registry.add_planner(Arc::new(NaivePlanner));
        registry.add_engine(Arc::new(DefaultEngine::parallel()));
        registry.add_engine(Arc::new(DefaultEngine::serial()));
        registry
    }

    pub fn global() -> &'static StrategyRegistry {
        static GLOBAL: OnceLock<StrategyRegistry> = OnceLock::new();
        GLOBAL.get_or_init(StrategyRegistry::builtin)
    }

    pub fn add_rewriter(&mut self, rewriter: Arc<dyn Rewriter>) {
        self.rewriters.insert(rewriter.name().to_string(), rewriter);
    }

    pub fn add_planner(&mut self, planner: Arc<dyn Planner>) {
        self.planners.insert(planner.name().to_string(), planner);
    }

    pub fn add_engine(&mut self, engine: Arc<dyn Engine>) {
        self.engines.insert(engine.name().to_string(), engine);
    }

    pub fn rewriter(&self, name: &str) -> Result<Arc<dyn Rewriter>, ValidationError> {
        self.rewriters
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ValidationError::UnknownStrategy {
                kind: "rewriter",
                name: name.to_string(),
            })
    }

    pub fn planner(&self, name: &str) -> Result<Arc<dyn Planner>, ValidationError> {
        self.planners
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ValidationError::UnknownStrategy {
                kind: "planner",
                name: name.to_string(),
            })
    }

    pub fn engine(&self, name: &str) -> Result<Arc<dyn Engine>, ValidationError> {
        self.engines
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| ValidationError::UnknownStrategy {
                kind: "engine",
                name: name.to_string(),
            })
    }
}
