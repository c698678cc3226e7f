use chrono::Utc;
use serde_json::{Map, Value};
use tracing::warn;

use crate::llm::LlmSettings;
use crate::storage::{ProjectStorage, StorageError};

pub const SETTINGS_FILE: &str = ".agent_workspace/settings.json";

/// Seed `created` and `agentMode` if they are missing. Keys this engine
/// does not know about are left exactly as found; the file is only written
/// when something was actually added.
pub fn ensure_defaults(storage: &ProjectStorage) -> Result<(), StorageError> {
    let mut settings = load_map(storage)?;
    let mut changed = false;
    if !settings.contains_key("created") {
        settings.insert(
            "created".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        changed = true;
    }
    if !settings.contains_key("agentMode") {
        settings.insert("agentMode".to_string(), Value::Bool(false));
        changed = true;
    }
    if changed {
        storage.write_json(SETTINGS_FILE, &Value::Object(settings))?;
    }
    Ok(())
}

/// The persisted model choice, if one was saved and still parses.
pub fn llm_settings(storage: &ProjectStorage) -> Result<Option<LlmSettings>, StorageError> {
    let settings = load_map(storage)?;
    let Some(value) = settings.get("llm") else {
        return Ok(None);
    };
    match serde_json::from_value(value.clone()) {
        Ok(saved) => Ok(Some(saved)),
        Err(e) => {
            warn!(error = %e, "stored llm settings are malformed; ignoring them");
            Ok(None)
        }
    }
}

/// Store the model choice under the `llm` key, merging with whatever else
/// settings.json holds.
pub fn save_llm_settings(
    storage: &ProjectStorage,
    settings: &LlmSettings,
) -> Result<(), StorageError> {
    let mut map = load_map(storage)?;
    map.insert("llm".to_string(), serde_json::to_value(settings)?);
    storage.write_json(SETTINGS_FILE, &Value::Object(map))
}

fn load_map(storage: &ProjectStorage) -> Result<Map<String, Value>, StorageError> {
    match storage.read_json::<Value>(SETTINGS_FILE)? {
        Some(Value::Object(map)) => Ok(map),
        Some(_) => {
            warn!("settings.json is not an object; starting from an empty one");
            Ok(Map::new())
        }
        None => Ok(Map::new()),
    }
}
