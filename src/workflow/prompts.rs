use crate::llm::ChatMessage;

/// System prompt for the requirements interview. Sent together with the
/// recent history window on every initiation turn.
pub const INTERVIEW_PROMPT: &str = r#"You are a project planning assistant guiding the user through a 7-step planning workflow: initiation, task generation, decomposition, analysis, coordination, planning and execution.

You are in the initiation step. Interview the user about the project they want to build. Ask clarifying questions about:
- the overall goal of the project
- the technology they intend to use
- the main features they need

Do not ask about implementation details; those belong to later steps. Keep your replies short. Once the picture is clear, summarize the project in a few lines and ask the user to confirm with "yes" or "proceed" to move on to task generation."#;

/// Build the task-generation prompt. The whole transcript is embedded so
/// the model sees everything the interview established, not just the
/// recent window.
pub fn build_generation_prompt(history: &[ChatMessage]) -> String {
    let mut transcript = String::new();
    for msg in history {
        transcript.push_str(msg.role.as_str());
        transcript.push_str(": ");
        transcript.push_str(&msg.content);
        transcript.push('\n');
    }

    format!(
        r#"Based on the conversation below, produce the initial task tree for this project.

# Conversation
{transcript}
# Instructions
Respond with a single JSON object for the root task and nothing else:
- the root has "type": "project", "status": "pending", a short "title", a unique "id" and a "children" array
- every child has "type": "main-task" and "status": "pending"; do not nest any deeper
- give each main task a short actionable title and a unique id
- no markdown fences, no prose before or after the JSON"#
    )
}

/// Build the per-task decomposition prompt: a bare JSON array of 2-5
/// sub-tasks for one main task.
pub fn build_decomposition_prompt(title: &str) -> String {
    format!(
        r#"Break the following task into concrete sub-tasks.

# Task
{title}

# Instructions
Respond with a JSON array of 2 to 5 sub-task objects and nothing else. Each object has:
- "id": a unique short identifier
- "title": a short actionable description
- "type": always "sub-task"
- "status": always "pending"
No markdown fences, no prose before or after the array."#
    )
}
