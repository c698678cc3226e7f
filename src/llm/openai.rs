use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::types::{ChatMessage, ChatRole, ModelInfo, Provider};
use crate::llm::{LlmError, TokenStream};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Listing keeps only chat-capable model ids; the catalog also carries
/// embedding, audio and image models.
const MODEL_ID_FILTER: &str = "gpt";

pub(super) fn wire_role(role: ChatRole) -> &'static str {
    match role {
        ChatRole::System => "system",
        ChatRole::Human => "user",
        ChatRole::Ai => "assistant",
    }
}

/// Accepts bases with or without a trailing `/v1` segment.
fn api_root(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let base = base.strip_suffix("/v1").unwrap_or(base);
    base.trim_end_matches('/').to_string()
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

pub async fn stream_chat(
    http: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: &[ChatMessage],
) -> Result<TokenStream, LlmError> {
    let url = format!("{}/v1/chat/completions", api_root(base_url));
    let req = ChatRequest {
        model,
        messages: messages
            .iter()
            .map(|m| WireMessage {
                role: wire_role(m.role),
                content: &m.content,
            })
            .collect(),
        stream: true,
    };
    debug!(endpoint = %url, model, "sending chat completion request");

    let resp = http.post(&url).bearer_auth(api_key).json(&req).send().await?;
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
        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(LlmError::Network)?;
            buf.extend_from_slice(&bytes);
            for line in crate::llm::drain_complete_lines(&mut buf) {
                let payload = line.strip_prefix("data:").map(str::trim).unwrap_or(&line);
                if payload == "[DONE]" {
                    continue;
                }
                match serde_json::from_str::<StreamChunk>(payload) {
                    Ok(chunk) => {
                        for choice in chunk.choices {
                            if !choice.delta.content.is_empty() {
                                yield choice.delta.content;
                            }
                        }
                    }
                    Err(_) => warn!(payload, "failed to parse stream chunk"),
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
    let url = format!("{}/v1/models", api_root(base_url));
    let resp = http.get(&url).bearer_auth(api_key).send().await?;
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
        .filter(|m| m.id.contains(MODEL_ID_FILTER))
        .map(|m| ModelInfo {
            name: m.id.clone(),
            id: m.id,
            provider: Provider::OpenAi,
        })
        .collect())
}
