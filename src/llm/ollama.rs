use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::openai::wire_role;
use crate::llm::types::{ChatMessage, ModelInfo, Provider};
use crate::llm::{LlmError, TokenStream};

/// Local daemon, no credential. `OLLAMA_HOST` overrides this at service
/// construction time.
pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";

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

// /api/chat streams newline-delimited JSON objects, not SSE.
#[derive(Debug, Deserialize)]
struct StreamLine {
    #[serde(default)]
    message: Option<WireReply>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Default, Deserialize)]
struct WireReply {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

pub async fn stream_chat(
    http: &reqwest::Client,
    base_url: &str,
    model: &str,
    messages: &[ChatMessage],
) -> Result<TokenStream, LlmError> {
    let url = format!("{}/api/chat", base_url.trim_end_matches('/'));
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
    debug!(endpoint = %url, model, "sending chat request");

    let resp = http.post(&url).json(&req).send().await?;
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
                match serde_json::from_str::<StreamLine>(&line) {
                    Ok(parsed) => {
                        if let Some(message) = parsed.message {
                            if !message.content.is_empty() {
                                yield message.content;
                            }
                        }
                        if parsed.done {
                            break 'read;
                        }
                    }
                    Err(_) => warn!(line, "failed to parse stream line"),
                }
            }
        }
    };
    Ok(Box::pin(stream))
}

pub async fn list_models(
    http: &reqwest::Client,
    base_url: &str,
) -> Result<Vec<ModelInfo>, LlmError> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let resp = http.get(&url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(LlmError::Api {
            status: status.as_u16(),
            body,
        });
    }
    let list: TagList = resp
        .json()
        .await
        .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
    Ok(list
        .models
        .into_iter()
        .map(|m| ModelInfo {
            id: m.name.clone(),
            name: m.name,
            provider: Provider::Ollama,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    #[tokio::test]
    async fn stream_chat_reads_ndjson_until_done() {
        let body = concat!(
            "{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\"Hi \"},\"done\":false}\n",
            "{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\"there\"},\"done\":false}\n",
            "{\"model\":\"llama3\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        );
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/api/chat"))
                .respond_with(status_code(200).body(body)),
        );

        let http = reqwest::Client::new();
        let stream = stream_chat(
            &http,
            &server.url_str(""),
            "llama3",
            &[ChatMessage::human("hi")],
        )
        .await
        .expect("stream should open");
        let chunks: Vec<String> = stream.try_collect().await.expect("stream should drain");
        assert_eq!(chunks.concat(), "Hi there");
    }

    #[tokio::test]
    async fn list_models_reads_tags() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/api/tags")).respond_with(
                json_encoded(serde_json::json!({
                    "models": [
                        {"name": "llama3:latest", "size": 4661224676u64},
                        {"name": "qwen2.5-coder:7b", "size": 4683087332u64},
                    ]
                })),
            ),
        );

        let http = reqwest::Client::new();
        let models = list_models(&http, &server.url_str(""))
            .await
            .expect("listing should succeed");
        let ids: Vec<&str> = models.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["llama3:latest", "qwen2.5-coder:7b"]);
        assert!(models.iter().all(|m| m.provider == Provider::Ollama));
    }
}
