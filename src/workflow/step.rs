use serde::{Deserialize, Serialize};

/// Workflow phases in the order a project moves through them. Variant
/// order is load-bearing: the derived `Ord` is what "later phase" means,
/// and the engine only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowStep {
    /// Requirements interview with the user.
    Initiation,
    /// Root task tree generated from the interview transcript.
    TaskGeneration,
    /// Main tasks broken into sub-tasks.
    Decomposition,
    /// Dependency and risk analysis.
    Analysis,
    /// Cross-task coordination.
    Coordination,
    /// Detailed scheduling.
    Planning,
    /// Carrying out the plan.
    Execution,
    /// Terminal phase.
    Completed,
}

impl WorkflowStep {
    pub const COUNT: usize = 8;

    /// 1-based position, used in user-facing phase announcements.
    pub fn number(self) -> usize {
        self as usize + 1
    }

    /// Human-readable phase name.
    pub fn title(self) -> &'static str {
        match self {
            WorkflowStep::Initiation => "Initiation",
            WorkflowStep::TaskGeneration => "Task Generation",
            WorkflowStep::Decomposition => "Decomposition",
            WorkflowStep::Analysis => "Analysis",
            WorkflowStep::Coordination => "Coordination",
            WorkflowStep::Planning => "Planning",
            WorkflowStep::Execution => "Execution",
            WorkflowStep::Completed => "Completed",
        }
    }
}
