use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::llm::Provider;
use crate::storage::WORKSPACE_DIR;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub project_root: PathBuf,
    pub provider: Option<Provider>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub log_level: String,
    pub llm: LlmConfig,
    pub workflow: WorkflowConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            project_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            provider: None,
            model: None,
            api_key: None,
            base_url: None,
            log_level: "info".to_string(),
            llm: LlmConfig::default(),
            workflow: WorkflowConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub connect_timeout_ms: u64,
    pub chat_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            chat_timeout_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfig {
    /// Pause between decomposition calls, to stay under provider rate
    /// limits.
    pub decompose_delay_ms: u64,
    /// How many trailing history entries the interview prompt carries.
    pub history_window: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            decompose_delay_ms: 1_500,
            history_window: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub log_level: Option<String>,
    pub llm: Option<PartialLlmConfig>,
    pub workflow: Option<PartialWorkflowConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialLlmConfig {
    pub connect_timeout_ms: Option<u64>,
    pub chat_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialWorkflowConfig {
    pub decompose_delay_ms: Option<u64>,
    pub history_window: Option<usize>,
}

impl AppConfig {
    /// Resolve the effective configuration. Precedence per value: CLI flag,
    /// then environment, then the project config file, then the global one,
    /// then the built-in default.
    pub fn from_cli(cli: crate::Cli) -> Result<Self> {
        let project_root = match cli.project_dir {
            Some(dir) => dir,
            None => std::env::current_dir().context("resolve current dir")?,
        };

        let project_cfg = load_project_config(&project_root).unwrap_or_default();
        let file_cfg = load_file_config().unwrap_or_default();

        let provider = cli
            .provider
            .or_else(|| {
                std::env::var("PLANWEAVER_PROVIDER")
                    .ok()
                    .and_then(|v| parse_provider(&v))
            })
            .or_else(|| project_cfg.provider.as_deref().and_then(parse_provider))
            .or_else(|| file_cfg.provider.as_deref().and_then(parse_provider));
        let model = cli
            .model
            .or_else(|| std::env::var("PLANWEAVER_MODEL").ok())
            .or(project_cfg.model)
            .or(file_cfg.model);
        let api_key = cli.api_key.or(project_cfg.api_key).or(file_cfg.api_key);
        let base_url = cli
            .base_url
            .or_else(|| std::env::var("PLANWEAVER_BASE_URL").ok())
            .or(project_cfg.base_url)
            .or(file_cfg.base_url);
        let log_level = cli
            .log_level
            .or(project_cfg.log_level)
            .or(file_cfg.log_level)
            .unwrap_or_else(|| "info".to_string());

        let llm_defaults = LlmConfig::default();
        let llm = {
            let merged = match (&project_cfg.llm, &file_cfg.llm) {
                (Some(project_llm), Some(file_llm)) => Some(PartialLlmConfig {
                    connect_timeout_ms: project_llm
                        .connect_timeout_ms
                        .or(file_llm.connect_timeout_ms),
                    chat_timeout_ms: project_llm.chat_timeout_ms.or(file_llm.chat_timeout_ms),
                }),
                (Some(project_llm), None) => Some(project_llm.clone()),
                (None, Some(file_llm)) => Some(file_llm.clone()),
                (None, None) => None,
            };
            if let Some(p) = merged {
                LlmConfig {
                    connect_timeout_ms: p
                        .connect_timeout_ms
                        .unwrap_or(llm_defaults.connect_timeout_ms),
                    chat_timeout_ms: p.chat_timeout_ms.unwrap_or(llm_defaults.chat_timeout_ms),
                }
            } else {
                llm_defaults
            }
        };

        let workflow_defaults = WorkflowConfig::default();
        let workflow = {
            let merged = match (&project_cfg.workflow, &file_cfg.workflow) {
                (Some(project_wf), Some(file_wf)) => Some(PartialWorkflowConfig {
                    decompose_delay_ms: project_wf
                        .decompose_delay_ms
                        .or(file_wf.decompose_delay_ms),
                    history_window: project_wf.history_window.or(file_wf.history_window),
                }),
                (Some(project_wf), None) => Some(project_wf.clone()),
                (None, Some(file_wf)) => Some(file_wf.clone()),
                (None, None) => None,
            };
            if let Some(p) = merged {
                WorkflowConfig {
                    decompose_delay_ms: p
                        .decompose_delay_ms
                        .unwrap_or(workflow_defaults.decompose_delay_ms),
                    history_window: p.history_window.unwrap_or(workflow_defaults.history_window),
                }
            } else {
                workflow_defaults
            }
        };

        Ok(Self {
            project_root,
            provider,
            model,
            api_key,
            base_url,
            log_level,
            llm,
            workflow,
        })
    }
}

fn parse_provider(raw: &str) -> Option<Provider> {
    match raw.parse() {
        Ok(p) => Some(p),
        Err(e) => {
            warn!(%raw, error = %e, "ignoring unparseable provider");
            None
        }
    }
}

pub fn load_file_config() -> Result<FileConfig> {
    fn candidate_paths() -> Vec<PathBuf> {
        let mut v = Vec::new();
        if let Ok(p) = std::env::var("PLANWEAVER_CONFIG") {
            v.push(PathBuf::from(p));
        }
        if let Some(base) = dirs::config_dir() {
            v.push(base.join("planweaver/config.toml"));
        }
        v
    }

    for p in candidate_paths() {
        if p.exists() {
            let s = fs::read_to_string(&p)
                .with_context(|| format!("read config file: {}", p.display()))?;
            match toml::from_str::<FileConfig>(&s) {
                Ok(cfg) => {
                    info!(path=%p.display(), "loaded config file");
                    return Ok(cfg);
                }
                Err(e) => {
                    warn!(path=%p.display(), error=%e.to_string(), "parse config failed");
                    continue;
                }
            }
        }
    }
    Ok(FileConfig::default())
}

/// Load project-specific configuration from .agent_workspace/config.toml
pub fn load_project_config(project_root: &Path) -> Result<FileConfig> {
    let project_config_path = project_root.join(WORKSPACE_DIR).join("config.toml");

    if project_config_path.exists() {
        let s = fs::read_to_string(&project_config_path).with_context(|| {
            format!(
                "read project config file: {}",
                project_config_path.display()
            )
        })?;
        match toml::from_str::<FileConfig>(&s) {
            Ok(cfg) => {
                info!(path=%project_config_path.display(), "loaded project config file");
                Ok(cfg)
            }
            Err(e) => {
                warn!(path=%project_config_path.display(), error=%e.to_string(), "parse project config failed");
                Ok(FileConfig::default())
            }
        }
    } else {
        Ok(FileConfig::default())
    }
}

#[cfg(test)]
mod tests;
