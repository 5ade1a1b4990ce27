//! Stage execution context

use crate::core::{
    stage::render_template,
    version::{ReleaseVersion, Resolution, TriggerContext},
};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Everything a stage reads while it runs.
///
/// The resolution and trigger are shared by reference with every other stage
/// of the run and never change after the root binding.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    /// Resolved version and flags
    pub resolution: Arc<Resolution>,

    /// The trigger of this run
    pub trigger: Arc<TriggerContext>,

    /// Product name
    pub product: String,

    /// Global variables plus the run's built-ins
    pub variables: HashMap<String, String>,

    /// Release record title (rendered)
    pub release_title: String,

    /// Release record placeholder body (rendered)
    pub placeholder_body: String,

    /// Machine-authorship commit marker
    pub marker: String,

    /// The stage being executed
    pub current_stage_id: Option<String>,

    /// Execution id of the run; scopes the run's stored digests
    pub run_id: Uuid,
}

impl PipelineContext {
    pub fn version(&self) -> &ReleaseVersion {
        &self.resolution.version
    }

    /// Render a template against the context variables
    pub fn render(&self, template: &str) -> String {
        render_template(template, &self.variables)
    }

    /// Render a template with extra, call-local variables
    pub fn render_with(&self, template: &str, extra: &[(&str, &str)]) -> String {
        let mut vars = self.variables.clone();
        for (key, value) in extra {
            vars.insert((*key).to_string(), (*value).to_string());
        }
        render_template(template, &vars)
    }
}

/// Built-in template variables of a run
pub fn builtin_variables(
    name: &str,
    product: &str,
    marker: &str,
    resolution: &Resolution,
) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("name".to_string(), name.to_string());
    vars.insert("product".to_string(), product.to_string());
    vars.insert("marker".to_string(), marker.to_string());
    vars.insert("version".to_string(), resolution.version.to_string());
    vars.insert("tag".to_string(), resolution.version.tag());
    vars.insert(
        "windows_version".to_string(),
        resolution.version.windows_compatible().to_string(),
    );
    vars
}
