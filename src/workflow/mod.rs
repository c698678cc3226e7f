pub mod engine;
pub mod parser;
pub mod prompts;
pub mod step;
pub mod tasks;

pub use engine::WorkflowEngine;
pub use step::WorkflowStep;
pub use tasks::TaskNode;

/// The persisted task tree, relative to the project root.
pub const TASKS_FILE: &str = "tasks.json";
