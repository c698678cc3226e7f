use crate::config::{FileConfig, LlmConfig, WorkflowConfig, load_project_config};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_load_project_config() {
    let temp_dir = TempDir::new().unwrap();
    let project_root = temp_dir.path();

    // Create the workspace directory and config file
    let workspace_dir = project_root.join(".agent_workspace");
    fs::create_dir_all(&workspace_dir).unwrap();

    let config_content = r#"
provider = "ollama"
model = "llama3"
log_level = "debug"

[llm]
chat_timeout_ms = 30000

[workflow]
decompose_delay_ms = 500
"#;

    fs::write(workspace_dir.join("config.toml"), config_content).unwrap();

    let project_cfg = load_project_config(project_root).unwrap();

    assert_eq!(project_cfg.provider, Some("ollama".to_string()));
    assert_eq!(project_cfg.model, Some("llama3".to_string()));
    assert_eq!(project_cfg.log_level, Some("debug".to_string()));

    let llm_cfg = project_cfg.llm.unwrap();
    assert_eq!(llm_cfg.chat_timeout_ms, Some(30_000));
    assert_eq!(llm_cfg.connect_timeout_ms, None);

    let workflow_cfg = project_cfg.workflow.unwrap();
    assert_eq!(workflow_cfg.decompose_delay_ms, Some(500));
    assert_eq!(workflow_cfg.history_window, None);
}

#[test]
fn test_load_project_config_not_exists() {
    let temp_dir = TempDir::new().unwrap();
    let project_root = temp_dir.path();

    let project_cfg = load_project_config(project_root).unwrap();

    assert_eq!(project_cfg, FileConfig::default());
}

#[test]
fn test_load_project_config_ignores_invalid_toml() {
    let temp_dir = TempDir::new().unwrap();
    let project_root = temp_dir.path();
    let workspace_dir = project_root.join(".agent_workspace");
    fs::create_dir_all(&workspace_dir).unwrap();
    fs::write(workspace_dir.join("config.toml"), "not = [valid").unwrap();

    let project_cfg = load_project_config(project_root).unwrap();
    assert_eq!(project_cfg, FileConfig::default());
}

#[test]
fn test_defaults() {
    let llm = LlmConfig::default();
    assert_eq!(llm.connect_timeout_ms, 5_000);
    assert_eq!(llm.chat_timeout_ms, 60_000);

    let workflow = WorkflowConfig::default();
    assert_eq!(workflow.decompose_delay_ms, 1_500);
    assert_eq!(workflow.history_window, 10);
}
