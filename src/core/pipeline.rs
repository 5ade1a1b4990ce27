//! Pipeline domain model

use crate::core::{
    config::{ConcurrencyConfig, PipelineConfig, ReleaseSettings},
    context::{builtin_variables, PipelineContext},
    stage::{render_template, Stage},
    state::{PipelineState, StageState},
    version::{Resolution, TriggerContext, VersionResolver},
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

/// The release binding of a run is established once
#[derive(Debug, Error)]
#[error("release version already bound to {0}")]
pub struct AlreadyBound(pub String);

/// A release pipeline definition plus its run state
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Product name
    pub product: String,

    /// Default version for the resolver
    pub default_version: String,

    /// Global variables available to all stages
    pub variables: HashMap<String, String>,

    /// Release record settings
    pub release: ReleaseSettings,

    /// Concurrency group settings
    pub concurrency: ConcurrencyConfig,

    /// Pipeline stages
    pub stages: HashMap<String, Stage>,

    /// Execution state
    pub state: PipelineState,

    /// Root binding: resolved version and the trigger it came from
    binding: Option<(Arc<Resolution>, Arc<TriggerContext>)>,

    /// Stage execution order (topological sort)
    execution_order: Vec<String>,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &PipelineConfig) -> Self {
        let default_timeout = config.default_timeout_secs.unwrap_or(3600);

        let stages: HashMap<String, Stage> = config
            .stages
            .iter()
            .map(|stage_config| {
                let stage = Stage::from_config(stage_config, config, default_timeout);
                (stage.id.clone(), stage)
            })
            .collect();

        let execution_order = Self::topological_sort(&stages);

        Pipeline {
            name: config.name.clone(),
            product: config.product_name().to_string(),
            default_version: config.default_version.clone(),
            variables: config.variables.clone(),
            release: config.release.clone(),
            concurrency: config.concurrency.clone(),
            stages,
            state: PipelineState::new(),
            binding: None,
            execution_order,
        }
    }

    /// Get a stage by ID
    pub fn stage(&self, id: &str) -> Option<&Stage> {
        self.stages.get(id)
    }

    /// Get a mutable stage by ID
    pub fn stage_mut(&mut self, id: &str) -> Option<&mut Stage> {
        self.stages.get_mut(id)
    }

    /// Stages whose predecessors all succeeded
    pub fn ready_stages(&self) -> Vec<&Stage> {
        let finished: HashSet<String> = self
            .stages
            .values()
            .filter(|s| s.state.is_success())
            .map(|s| s.id.clone())
            .collect();

        self.execution_order
            .iter()
            .filter_map(|id| self.stages.get(id))
            .filter(|s| matches!(s.state, StageState::Pending) && s.dependencies_met(&finished))
            .collect()
    }

    /// Get all currently running stages
    pub fn running_stages(&self) -> Vec<&Stage> {
        self.stages
            .values()
            .filter(|s| matches!(s.state, StageState::Running { .. }))
            .collect()
    }

    /// Check if every stage reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.stages.values().all(|s| s.state.is_terminal())
    }

    /// Any stage failed or was blocked
    pub fn has_failures(&self) -> bool {
        self.stages
            .values()
            .any(|s| matches!(s.state, StageState::Failed { .. } | StageState::Blocked { .. }))
    }

    /// Get execution order (topological sort)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Calculate topological sort of stages based on dependencies
    fn topological_sort(stages: &HashMap<String, Stage>) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        // Sort for deterministic order
        let mut stage_ids: Vec<_> = stages.keys().cloned().collect();
        stage_ids.sort();

        for stage_id in stage_ids {
            Self::visit(&stage_id, stages, &mut visited, &mut result);
        }

        result
    }

    fn visit(
        stage_id: &str,
        stages: &HashMap<String, Stage>,
        visited: &mut HashSet<String>,
        result: &mut Vec<String>,
    ) {
        if !visited.insert(stage_id.to_string()) {
            return;
        }

        if let Some(stage) = stages.get(stage_id) {
            let mut deps = stage.dependencies.clone();
            deps.sort();
            for dep in &deps {
                Self::visit(dep, stages, visited, result);
            }
        }

        result.push(stage_id.to_string());
    }

    /// Resolve the trigger and bind the result for the rest of the run
    pub fn bind_release(&mut self, trigger: TriggerContext) -> Result<Arc<Resolution>, AlreadyBound> {
        if let Some((existing, _)) = &self.binding {
            return Err(AlreadyBound(existing.version.to_string()));
        }

        let resolver = VersionResolver::new(&self.default_version, self.release.latest_on_tag);
        let resolution = Arc::new(resolver.resolve(&trigger));
        self.binding = Some((resolution.clone(), Arc::new(trigger)));
        Ok(resolution)
    }

    /// The bound resolution, once the root stage ran
    pub fn resolution(&self) -> Option<&Arc<Resolution>> {
        self.binding.as_ref().map(|(resolution, _)| resolution)
    }

    /// Template variables: globals overlaid with the run's built-ins
    pub fn variables_for(&self, resolution: &Resolution) -> HashMap<String, String> {
        let mut vars = self.variables.clone();
        vars.extend(builtin_variables(
            &self.name,
            &self.product,
            &self.release.marker,
            resolution,
        ));
        vars
    }

    /// Concurrency group key of the bound run
    pub fn concurrency_key(&self) -> Option<String> {
        self.resolution()
            .map(|res| render_template(&self.concurrency.group, &self.variables_for(res)))
    }

    /// Create execution context for a stage; `None` before the release is bound
    pub fn create_context_for_stage(&self, stage_id: &str) -> Option<PipelineContext> {
        let (resolution, trigger) = self.binding.as_ref()?;
        let variables = self.variables_for(resolution);

        Some(PipelineContext {
            resolution: resolution.clone(),
            trigger: trigger.clone(),
            product: self.product.clone(),
            release_title: render_template(&self.release.title, &variables),
            placeholder_body: render_template(&self.release.placeholder_body, &variables),
            marker: self.release.marker.clone(),
            variables,
            current_stage_id: Some(stage_id.to_string()),
            run_id: self.state.execution_id,
        })
    }
}
