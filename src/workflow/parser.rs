use anyhow::{Result, bail};
use serde::Deserialize;

use crate::workflow::tasks::TaskNode;

pub const MIN_SUBTASKS: usize = 2;
pub const MAX_SUBTASKS: usize = 5;

/// One entry of the decomposition array as the model produces it. `type`
/// and `status` are dictated by the prompt and forced on conversion, so
/// only the fields we keep are modelled.
#[derive(Debug, Deserialize)]
pub struct SubtaskSpec {
    #[serde(default)]
    pub id: Option<String>,
    pub title: String,
}

/// Models wrap JSON in markdown fences despite being told not to. Drop
/// every fence marker and trim; whatever is left must parse or the caller
/// reports a handled failure.
pub fn strip_code_fences(text: &str) -> String {
    text.replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

/// Parse a generation reply into the root task node.
pub fn parse_task_tree(response: &str) -> Result<TaskNode> {
    let cleaned = strip_code_fences(response);
    let root: TaskNode = serde_json::from_str(&cleaned)?;
    Ok(root)
}

/// Parse a decomposition reply into sub-task specs, enforcing the
/// requested 2-5 range. Anything outside it counts as a malformed reply.
pub fn parse_subtasks(response: &str) -> Result<Vec<SubtaskSpec>> {
    let cleaned = strip_code_fences(response);
    let specs: Vec<SubtaskSpec> = serde_json::from_str(&cleaned)?;
    if specs.len() < MIN_SUBTASKS || specs.len() > MAX_SUBTASKS {
        bail!(
            "expected {MIN_SUBTASKS}-{MAX_SUBTASKS} sub-tasks, got {}",
            specs.len()
        );
    }
    Ok(specs)
}
