use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::llm::{ChatRole, LlmError, LlmService, LlmSettings, ModelInfo, Provider};
use crate::session::settings;
use crate::storage::{ProjectStorage, StorageError};
use crate::workflow::{TASKS_FILE, TaskNode, WorkflowEngine, WorkflowStep};

/// Reply used by hosts when chat is invoked before any project is open.
pub const NOT_INITIALIZED_REPLY: &str =
    "No project is open yet. Use /open <path> to start or resume one.";

const TRANSCRIPT_FILE: &str = ".agent_workspace/history/transcript.json";

/// One transcript entry, also the shape `chat` hands back to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: String,
}

impl ChatTurn {
    fn now(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub is_running: bool,
    pub project_path: Option<PathBuf>,
}

impl SessionStatus {
    /// Status reported while no project is open.
    pub fn idle() -> Self {
        Self {
            is_running: false,
            project_path: None,
        }
    }
}

/// One open project: its storage, its workflow engine, and the boundary
/// operations a host surface calls.
#[derive(Debug)]
pub struct ProjectSession {
    root: PathBuf,
    storage: ProjectStorage,
    engine: WorkflowEngine,
}

impl ProjectSession {
    /// Open (or resume) the project at `root`: seed the workspace layout,
    /// restore the persisted model choice, then let explicit configuration
    /// override it.
    pub fn open(root: impl Into<PathBuf>, cfg: &AppConfig) -> Result<Self> {
        let root = root.into();
        let storage = ProjectStorage::new(&root);
        storage.ensure_dir(".agent_workspace/history")?;
        storage.ensure_dir(".agent_workspace/snapshots")?;
        settings::ensure_defaults(&storage)?;

        let mut llm = LlmService::new(&cfg.llm)?;
        if let Some(url) = &cfg.base_url {
            match cfg.provider {
                Some(provider) => llm = llm.with_base_url(provider, url),
                None => warn!("base_url override given without a provider; ignoring it"),
            }
        }

        if let Some(saved) = settings::llm_settings(&storage)? {
            llm.configure(saved.provider, &saved.model_id, saved.api_key);
        }
        match (cfg.provider, cfg.model.as_deref()) {
            (Some(provider), Some(model)) => llm.configure(provider, model, cfg.api_key.clone()),
            (Some(_), None) => warn!("provider configured without a model; keeping saved choice"),
            _ => {}
        }

        let engine = WorkflowEngine::new(llm, storage.clone(), &cfg.workflow);
        info!(root = %root.display(), "project session opened");
        Ok(Self {
            root,
            storage,
            engine,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn step(&self) -> WorkflowStep {
        self.engine.step()
    }

    pub fn active_model(&self) -> Option<(Provider, &str)> {
        self.engine.llm().active_model()
    }

    /// One conversational turn. Both sides of the exchange go to the
    /// transcript; the reply turn is returned.
    pub async fn chat(&mut self, text: &str) -> ChatTurn {
        let user_turn = ChatTurn::now(ChatRole::Human, text);
        let content = self.engine.process_message(text).await;
        let reply = ChatTurn::now(ChatRole::Ai, content);
        self.append_transcript(&[user_turn, reply.clone()]);
        reply
    }

    /// The current task tree, if generation has produced one.
    pub fn tasks(&self) -> Result<Option<TaskNode>, StorageError> {
        self.storage.read_json(TASKS_FILE)
    }

    pub async fn models(
        &self,
        provider: Provider,
        api_key: Option<&str>,
    ) -> Result<Vec<ModelInfo>, LlmError> {
        self.engine.llm().list_models(provider, api_key).await
    }

    /// Switch the active model and persist the choice to settings.json.
    pub fn configure_llm(&mut self, choice: LlmSettings) -> Result<(), StorageError> {
        self.engine
            .llm_mut()
            .configure(choice.provider, &choice.model_id, choice.api_key.clone());
        settings::save_llm_settings(&self.storage, &choice)
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            is_running: true,
            project_path: Some(self.root.clone()),
        }
    }

    /// Best-effort append; a persistence hiccup must never break the
    /// conversation itself.
    fn append_transcript(&self, turns: &[ChatTurn]) {
        let result = (|| -> Result<(), StorageError> {
            let mut transcript: Vec<ChatTurn> =
                self.storage.read_json(TRANSCRIPT_FILE)?.unwrap_or_default();
            transcript.extend_from_slice(turns);
            self.storage.write_json(TRANSCRIPT_FILE, &transcript)
        })();
        if let Err(e) = result {
            warn!(error = %e, "failed to append to the transcript");
        }
    }
}
