use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::types::{ChatMessage, ChatRole, ModelInfo, Provider};
use crate::llm::{LlmError, TokenStream};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, PartialEq, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// The Messages API takes instructions as a top-level `system` field, not as
/// a conversation turn. Joins all system messages and maps the rest.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<WireMessage<'_>>) {
    let system_parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect();
    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };
    let turns = messages
        .iter()
        .filter(|m| m.role != ChatRole::System)
        .map(|m| WireMessage {
            role: match m.role {
                ChatRole::Human => "user",
                _ => "assistant",
            },
            content: &m.content,
        })
        .collect();
    (system, turns)
}

#[derive(Debug, Deserialize)]
struct StreamEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    delta: Option<EventDelta>,
}

#[derive(Debug, Default, Deserialize)]
struct EventDelta {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}

pub async fn stream_chat(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: &[ChatMessage],
) -> Result<TokenStream, LlmError> {
    let url = format!("{}/v1/messages", base_url.trim_end_matches('/'));
    let (system, turns) = split_system(messages);
    let req = ChatRequest {
        model,
        max_tokens: MAX_TOKENS,
        stream: true,
        system,
        messages: turns,
    };
    debug!(endpoint = %url, model, "sending messages request");

    let resp = http
        .post(&url)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .json(&req)
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status: status.as_u16(),
            body,
        });
    }

    let mut byte_stream = resp.bytes_stream();
    let stream = async_stream::try_stream! {
        let mut buf = Vec::<u8>::new();
        'read: while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(LlmError::Network)?;
            buf.extend_from_slice(&bytes);
            for line in crate::llm::drain_complete_lines(&mut buf) {
                // The event stream interleaves `event:` and `data:` lines;
                // everything needed is in the data payloads.
                let payload = match line.strip_prefix("data:") {
                    Some(rest) => rest.trim(),
                    None => continue,
                };
                match serde_json::from_str::<StreamEvent>(payload) {
                    Ok(event) => match event.kind.as_str() {
                        "content_block_delta" => {
                            if let Some(delta) = event.delta {
                                if !delta.text.is_empty() {
                                    yield delta.text;
                                }
                            }
                        }
                        "message_stop" => break 'read,
                        "error" => {
                            Err(LlmError::InvalidResponse(payload.to_string()))?;
                        }
                        _ => {}
                    },
                    Err(_) => warn!(payload, "failed to parse stream event"),
                }
            }
        }
    };
    Ok(Box::pin(stream))
}

pub async fn list_models(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
) -> Result<Vec<ModelInfo>, LlmError> {
    let url = format!("{}/v1/models", base_url.trim_end_matches('/'));
    let resp = http
        .get(&url)
        .header("x-api-key", api_key)
        .header("anthropic-version", API_VERSION)
        .send()
        .await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status: status.as_u16(),
            body,
        });
    }
    let list: ModelList = resp
        .json()
        .await
        .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    Ok(list
        .data
        .into_iter()
        .map(|m| ModelInfo {
            name: m.display_name.unwrap_or_else(|| m.id.clone()),
            id: m.id,
            provider: Provider::Anthropic,
        })
        .collect())
}
