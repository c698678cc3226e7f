use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Task lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Blocked,
}

/// Where a node sits in the tree hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    /// The root node.
    Project,
    /// A direct child of the root, the unit of decomposition.
    MainTask,
    SubTask,
    Todo,
    Step,
}

/// One node of the persisted task tree (`tasks.json`). Depth and branching
/// are caller-defined; the engine only constrains which nodes it will
/// decompose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TaskNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decomposed: Option<bool>,
}

impl TaskNode {
    /// A fresh pending sub-task, the shape decomposition attaches.
    pub fn subtask(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Pending,
            kind: TaskKind::SubTask,
            children: None,
            decomposed: None,
        }
    }

    pub fn child_count(&self) -> usize {
        self.children.as_ref().map(Vec::len).unwrap_or(0)
    }

    /// A node is decomposable while it is a childless main task that has
    /// not been decomposed before. Once decomposition attaches children it
    /// never qualifies again.
    pub fn is_decomposable(&self) -> bool {
        self.kind == TaskKind::MainTask
            && self.decomposed != Some(true)
            && self.children.as_ref().is_none_or(|c| c.is_empty())
    }

    /// Depth-first pre-order walk collecting `(id, title)` for every
    /// decomposable node. Order matters downstream: decomposition calls the
    /// model in exactly this order.
    pub fn collect_decomposable(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        self.walk_decomposable(&mut out);
        out
    }

    fn walk_decomposable(&self, out: &mut Vec<(String, String)>) {
        if self.is_decomposable() {
            out.push((self.id.clone(), self.title.clone()));
        }
        for child in self.children.iter().flatten() {
            child.walk_decomposable(out);
        }
    }

    /// Every id in the tree. Attachment is by id, so new node ids must be
    /// checked against this set before they enter the tree.
    pub fn collect_ids(&self, out: &mut HashSet<String>) {
        out.insert(self.id.clone());
        for child in self.children.iter().flatten() {
            child.collect_ids(out);
        }
    }

    /// Attach `subtasks` to the node with `target_id`, marking it
    /// decomposed. Returns false when no node in the tree carries that id.
    pub fn attach_subtasks(&mut self, target_id: &str, subtasks: Vec<TaskNode>) -> bool {
        if self.id == target_id {
            self.children = Some(subtasks);
            self.decomposed = Some(true);
            return true;
        }
        for child in self.children.iter_mut().flatten() {
            if child.attach_subtasks(target_id, subtasks.clone()) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn main_task(id: &str, title: &str) -> TaskNode {
        TaskNode {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Pending,
            kind: TaskKind::MainTask,
            children: None,
            decomposed: None,
        }
    }

    fn sample_tree() -> TaskNode {
        let mut parent = main_task("task-3", "Backend");
        parent.children = Some(vec![
            TaskNode::subtask("task-3-1", "Schema"),
            main_task("task-4", "API layer"),
        ]);
        let mut done = main_task("task-2", "Design");
        done.decomposed = Some(true);
        TaskNode {
            id: "proj-1".into(),
            title: "Demo".into(),
            status: TaskStatus::Pending,
            kind: TaskKind::Project,
            children: Some(vec![main_task("task-1", "Setup"), done, parent]),
            decomposed: None,
        }
    }

    #[test]
    fn kind_and_status_use_kebab_case() {
        let node: TaskNode = serde_json::from_str(
            r#"{"id":"t1","title":"X","status":"in-progress","type":"main-task"}"#,
        )
        .expect("node should parse");
        assert_eq!(node.kind, TaskKind::MainTask);
        assert_eq!(node.status, TaskStatus::InProgress);

        let json = serde_json::to_string(&node).expect("node should serialize");
        assert!(json.contains("\"type\":\"main-task\""));
        assert!(!json.contains("children"));
        assert!(!json.contains("decomposed"));
    }

    #[test]
    fn collects_childless_main_tasks_in_traversal_order() {
        let ids: Vec<String> = sample_tree()
            .collect_decomposable()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        // task-2 is already decomposed, task-3 has children; the nested
        // task-4 is still picked up.
        assert_eq!(ids, vec!["task-1", "task-4"]);
    }

    #[test]
    fn attach_marks_node_decomposed() {
        let mut tree = sample_tree();
        let attached = tree.attach_subtasks(
            "task-4",
            vec![TaskNode::subtask("task-4-1", "Routing")],
        );
        assert!(attached);
        assert!(tree.collect_decomposable().iter().all(|(id, _)| id != "task-4"));

        assert!(!tree.attach_subtasks("no-such-id", Vec::new()));
    }

    #[test]
    fn empty_children_still_count_as_childless() {
        let mut task = main_task("task-9", "Edge");
        task.children = Some(Vec::new());
        assert!(task.is_decomposable());
    }

    #[test]
    fn collect_ids_covers_every_node() {
        let mut ids = HashSet::new();
        sample_tree().collect_ids(&mut ids);
        assert_eq!(ids.len(), 6);
        assert!(ids.contains("proj-1"));
        assert!(ids.contains("task-3-1"));
    }
}
