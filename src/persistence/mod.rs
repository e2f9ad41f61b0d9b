//! Persistence layer for blueprints, runs and run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{FlowBlueprint, Run, RunSummary, Step};
use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Save a blueprint under its name, replacing an older one
    async fn save_blueprint(&self, blueprint: &FlowBlueprint) -> Result<()>;

    /// Load a blueprint by name
    async fn load_blueprint(&self, name: &str) -> Result<Option<FlowBlueprint>>;

    /// Save a whole instance tree along with its summary
    async fn save_run(&self, run: &Run) -> Result<()>;

    /// Load an instance tree, with the latest state of every step
    async fn load_run(&self, run_id: Uuid) -> Result<Option<Run>>;

    /// Record the latest copy of one step of a saved run
    async fn update_step(&self, run_id: Uuid, step: &Step) -> Result<()>;

    /// List run summaries for a flow, newest first
    async fn list_runs(&self, flow_name: &str) -> Result<Vec<RunSummary>>;

    /// List the names of all flows with saved runs
    async fn list_flows(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryStore {
    blueprints: RwLock<HashMap<String, FlowBlueprint>>,
    runs: RwLock<HashMap<Uuid, Run>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            blueprints: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RunStore for InMemoryStore {
    async fn save_blueprint(&self, blueprint: &FlowBlueprint) -> Result<()> {
        let mut blueprints = self.blueprints.write().await;
        blueprints.insert(blueprint.name.clone(), blueprint.clone());
        Ok(())
    }

    async fn load_blueprint(&self, name: &str) -> Result<Option<FlowBlueprint>> {
        let blueprints = self.blueprints.read().await;
        Ok(blueprints.get(name).cloned())
    }

    async fn save_run(&self, run: &Run) -> Result<()> {
        let mut runs = self.runs.write().await;
        runs.insert(run.id(), run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).cloned())
    }

    async fn update_step(&self, run_id: Uuid, step: &Step) -> Result<()> {
        let mut runs = self.runs.write().await;
        let run = runs
            .get_mut(&run_id)
            .ok_or_else(|| anyhow::anyhow!("Run {} has not been saved", run_id))?;
        if !run.replace_step(step.clone()) {
            anyhow::bail!("Run {} has no step {}", run_id, step.id);
        }
        Ok(())
    }

    async fn list_runs(&self, flow_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut summaries: Vec<RunSummary> = runs
            .values()
            .filter(|run| run.name() == flow_name)
            .map(Run::summary)
            .collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(summaries)
    }

    async fn list_flows(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|run| run.name().to_string()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
