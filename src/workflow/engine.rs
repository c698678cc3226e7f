use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::WorkflowConfig;
use crate::llm::{ChatMessage, LlmService};
use crate::storage::ProjectStorage;
use crate::workflow::TASKS_FILE;
use crate::workflow::parser;
use crate::workflow::prompts;
use crate::workflow::step::WorkflowStep;
use crate::workflow::tasks::TaskNode;

/// Keywords that confirm the interview and start task generation.
const CONFIRM_KEYWORDS: [&str; 3] = ["yes", "proceed", "looks good"];
/// Keywords that trigger a decomposition run. Checked before the skip set,
/// so "yes" keeps meaning "go ahead" at this step too.
const DECOMPOSE_KEYWORDS: [&str; 4] = ["decompose", "yes", "proceed", "break"];
/// Keywords that skip decomposition entirely.
const SKIP_KEYWORDS: [&str; 2] = ["skip", "next"];

/// Mutable per-session project state. `name`, `description` and
/// `requirements` stay empty through the implemented phases; the interview
/// transcript in `chat_history` is the source of truth they would be
/// derived from.
#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    pub name: String,
    pub description: String,
    pub requirements: Vec<String>,
    pub chat_history: Vec<ChatMessage>,
}

/// The conversational planning state machine. One instance owns one
/// project's context; nothing here is shared between projects.
#[derive(Debug)]
pub struct WorkflowEngine {
    llm: LlmService,
    storage: ProjectStorage,
    context: ProjectContext,
    step: WorkflowStep,
    decomposing: AtomicBool,
    decompose_delay: Duration,
    history_window: usize,
}

impl WorkflowEngine {
    pub fn new(llm: LlmService, storage: ProjectStorage, cfg: &WorkflowConfig) -> Self {
        Self {
            llm,
            storage,
            context: ProjectContext::default(),
            step: WorkflowStep::Initiation,
            decomposing: AtomicBool::new(false),
            decompose_delay: Duration::from_millis(cfg.decompose_delay_ms),
            history_window: cfg.history_window,
        }
    }

    pub fn step(&self) -> WorkflowStep {
        self.step
    }

    pub fn context(&self) -> &ProjectContext {
        &self.context
    }

    pub fn llm(&self) -> &LlmService {
        &self.llm
    }

    pub fn llm_mut(&mut self) -> &mut LlmService {
        &mut self.llm
    }

    /// Handle one user turn. Never fails: every failure path folds into the
    /// reply text, so the conversation stays usable. Both the user text and
    /// the reply are appended to the chat history.
    pub async fn process_message(&mut self, text: &str) -> String {
        self.context.chat_history.push(ChatMessage::human(text));
        debug!(step = ?self.step, "dispatching user message");

        let reply = match self.step {
            WorkflowStep::Initiation => self.handle_initiation(text).await,
            WorkflowStep::TaskGeneration => self.run_task_generation().await,
            WorkflowStep::Decomposition => self.handle_decomposition(text).await,
            WorkflowStep::Analysis
            | WorkflowStep::Coordination
            | WorkflowStep::Planning
            | WorkflowStep::Execution
            | WorkflowStep::Completed => self.placeholder_reply(),
        };

        self.context.chat_history.push(ChatMessage::ai(reply.clone()));
        reply
    }

    /// Requirements interview. A confirmation keyword moves straight into
    /// task generation within the same turn; anything else continues the
    /// interview over the recent history window.
    async fn handle_initiation(&mut self, text: &str) -> String {
        if contains_keyword(text, &CONFIRM_KEYWORDS) {
            info!("interview confirmed; generating the task tree");
            self.step = WorkflowStep::TaskGeneration;
            return self.run_task_generation().await;
        }

        let window = self.history_tail();
        let mut messages = Vec::with_capacity(window.len() + 1);
        messages.push(ChatMessage::system(prompts::INTERVIEW_PROMPT));
        messages.extend_from_slice(window);
        self.llm.chat(&messages).await
    }

    /// Generate the root task tree from the whole transcript. On any
    /// failure the step stays at TaskGeneration, so the next user message
    /// retries generation.
    async fn run_task_generation(&mut self) -> String {
        let prompt = prompts::build_generation_prompt(&self.context.chat_history);
        let reply = self.llm.chat(&[ChatMessage::human(prompt)]).await;

        let root = match parser::parse_task_tree(&reply) {
            Ok(root) => root,
            Err(e) => {
                warn!(error = %e, "task generation reply did not parse");
                return format!(
                    "I could not turn the reply into a task tree ({e}). Say \"proceed\" to try again."
                );
            }
        };

        if let Err(e) = self.storage.write_json(TASKS_FILE, &root) {
            error!(error = %e, "failed to persist the task tree");
            return format!("The task tree could not be saved ({e}). Say \"proceed\" to try again.");
        }

        self.step = WorkflowStep::Decomposition;
        info!(title = %root.title, main_tasks = root.child_count(), "task tree created");
        format!(
            "Created the task tree for \"{}\" with {} main tasks.\n\nSay \"decompose\" to break each main task into sub-tasks, or \"skip\" to move on.",
            root.title,
            root.child_count()
        )
    }

    async fn handle_decomposition(&mut self, text: &str) -> String {
        if contains_keyword(text, &DECOMPOSE_KEYWORDS) {
            return self.run_decomposition().await;
        }
        if contains_keyword(text, &SKIP_KEYWORDS) {
            info!("decomposition skipped");
            self.step = WorkflowStep::Analysis;
            return "Skipping decomposition. Moving on to analysis.".to_string();
        }
        "We are at the decomposition step. Say \"decompose\" to break each main task into sub-tasks, or \"skip\" to move on.".to_string()
    }

    /// Single-flight wrapper: a second trigger while a run is underway is
    /// rejected without touching the flag, and the flag is cleared on every
    /// exit of the run itself.
    async fn run_decomposition(&mut self) -> String {
        if self
            .decomposing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return "Decomposition is already in progress. Give it a moment.".to_string();
        }
        let reply = self.decompose_all().await;
        self.decomposing.store(false, Ordering::SeqCst);
        reply
    }

    /// One decomposition pass over every eligible main task, in traversal
    /// order. Per-task failures are isolated; the tree is persisted once at
    /// the end, with failed tasks left untouched. Sub-task ids are claimed
    /// against the whole tree, so a model reply reusing an existing id can
    /// never steal a later task's attachment.
    async fn decompose_all(&mut self) -> String {
        let mut root: TaskNode = match self.storage.read_json(TASKS_FILE) {
            Ok(Some(root)) => root,
            Ok(None) => {
                return "There is no task tree yet. Finish task generation first, then try decomposing again.".to_string();
            }
            Err(e) => {
                warn!(error = %e, "task tree could not be loaded");
                return format!("The task tree could not be loaded ({e}).");
            }
        };

        let eligible = root.collect_decomposable();
        if eligible.is_empty() {
            self.step = WorkflowStep::Analysis;
            return "Every main task is already decomposed. Moving on to analysis.".to_string();
        }

        let total = eligible.len();
        info!(total, "decomposing main tasks");
        let mut taken = HashSet::new();
        root.collect_ids(&mut taken);
        let mut lines = Vec::with_capacity(total);
        let mut succeeded = 0usize;

        for (i, (task_id, title)) in eligible.into_iter().enumerate() {
            // Back off between calls to stay under provider rate limits;
            // the first call goes out immediately.
            if i > 0 {
                tokio::time::sleep(self.decompose_delay).await;
            }
            match self.decompose_one(&title).await {
                Ok(specs) => {
                    let children: Vec<TaskNode> = specs
                        .into_iter()
                        .enumerate()
                        .map(|(n, spec)| {
                            let id = claim_subtask_id(&task_id, n, spec.id, &mut taken);
                            TaskNode::subtask(id, spec.title)
                        })
                        .collect();
                    lines.push(format!("✅ {title}: {} sub-tasks", children.len()));
                    root.attach_subtasks(&task_id, children);
                    succeeded += 1;
                }
                Err(e) => {
                    warn!(task = %task_id, error = %e, "task decomposition failed");
                    lines.push(format!("⚠️ {title}: {e}"));
                }
            }
        }

        if let Err(e) = self.storage.write_json(TASKS_FILE, &root) {
            error!(error = %e, "failed to persist the decomposed tree");
            return format!("Decomposition finished but the tree could not be saved ({e}).");
        }

        self.step = WorkflowStep::Analysis;
        let mut reply = lines.join("\n");
        reply.push_str(&format!(
            "\n\nDecomposed {succeeded}/{total} main tasks. Moving on to analysis."
        ));
        reply
    }

    async fn decompose_one(&self, title: &str) -> anyhow::Result<Vec<parser::SubtaskSpec>> {
        let prompt = prompts::build_decomposition_prompt(title);
        let reply = self.llm.chat(&[ChatMessage::human(prompt)]).await;
        parser::parse_subtasks(&reply)
    }

    fn placeholder_reply(&self) -> String {
        format!(
            "The {} phase (step {} of {}) is not implemented yet; the workflow ends here for now.",
            self.step.title(),
            self.step.number(),
            WorkflowStep::COUNT
        )
    }

    /// The most recent history entries, newest last, capped at the
    /// configured window.
    fn history_tail(&self) -> &[ChatMessage] {
        let history = &self.context.chat_history;
        &history[history.len().saturating_sub(self.history_window)..]
    }
}

fn contains_keyword(text: &str, keywords: &[&str]) -> bool {
    let lower = text.to_lowercase();
    keywords.iter().any(|k| lower.contains(k))
}

/// Pick the id for the `n`th (0-based) sub-task of `parent_id`, recording it
/// in `taken`. A model-supplied id is kept only while it is new to the tree;
/// anything missing, empty or colliding becomes `{parent_id}-{ordinal}`,
/// bumped past taken ordinals.
fn claim_subtask_id(
    parent_id: &str,
    n: usize,
    candidate: Option<String>,
    taken: &mut HashSet<String>,
) -> String {
    if let Some(id) = candidate {
        if !id.is_empty() && taken.insert(id.clone()) {
            return id;
        }
    }
    let mut ordinal = n + 1;
    loop {
        let id = format!("{parent_id}-{ordinal}");
        if taken.insert(id.clone()) {
            return id;
        }
        ordinal += 1;
    }
}
