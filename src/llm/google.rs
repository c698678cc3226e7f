use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::types::{ChatMessage, ChatRole, ModelInfo, Provider};
use crate::llm::{LlmError, TokenStream};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini is the strictest backend about conversation shape. All system
/// messages collapse into one combined system message at the front; every
/// remaining turn is either `human` or `ai`.
pub fn normalize_history(messages: &[ChatMessage]) -> Vec<ChatMessage> {
    let system_parts: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect();
    let mut out = Vec::with_capacity(messages.len());
    if !system_parts.is_empty() {
        out.push(ChatMessage::system(system_parts.join("\n")));
    }
    for m in messages {
        match m.role {
            ChatRole::System => {}
            ChatRole::Human => out.push(m.clone()),
            ChatRole::Ai => out.push(ChatMessage::ai(m.content.clone())),
        }
    }
    out
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

fn build_request(normalized: &[ChatMessage]) -> GenerateRequest<'_> {
    let mut system_instruction = None;
    let mut contents = Vec::new();
    for m in normalized {
        match m.role {
            ChatRole::System => {
                system_instruction = Some(Content {
                    role: None,
                    parts: vec![Part { text: &m.content }],
                });
            }
            ChatRole::Human => contents.push(Content {
                role: Some("user"),
                parts: vec![Part { text: &m.content }],
            }),
            ChatRole::Ai => contents.push(Content {
                role: Some("model"),
                parts: vec![Part { text: &m.content }],
            }),
        }
    }
    GenerateRequest {
        system_instruction,
        contents,
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: CandidateContent,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
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
    let url = format!(
        "{}/v1beta/models/{}:streamGenerateContent?alt=sse&key={}",
        base_url.trim_end_matches('/'),
        model,
        api_key
    );
    let normalized = normalize_history(messages);
    let req = build_request(&normalized);
    // The key rides in the query string, so the URL stays out of the logs.
    debug!(model, turns = req.contents.len(), "sending streamGenerateContent request");

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
        while let Some(chunk) = byte_stream.next().await {
            let bytes = chunk.map_err(LlmError::Network)?;
            buf.extend_from_slice(&bytes);
            for line in crate::llm::drain_complete_lines(&mut buf) {
                let payload = match line.strip_prefix("data:") {
                    Some(rest) => rest.trim(),
                    None => continue,
                };
                match serde_json::from_str::<StreamChunk>(payload) {
                    Ok(chunk) => {
                        for candidate in chunk.candidates {
                            for part in candidate.content.parts {
                                if !part.text.is_empty() {
                                    yield part.text;
                                }
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
    let url = format!(
        "{}/v1beta/models?key={}",
        base_url.trim_end_matches('/'),
        api_key
    );
    let resp = http.get(&url).send().await?;
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
        .models
        .into_iter()
        .map(|m| {
            let id = m
                .name
                .strip_prefix("models/")
                .unwrap_or(&m.name)
                .to_string();
            ModelInfo {
                name: m.display_name.unwrap_or_else(|| id.clone()),
                id,
                provider: Provider::Google,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    #[test]
    fn normalize_collapses_system_messages_to_the_front() {
        let messages = vec![
            ChatMessage::system("Rule one."),
            ChatMessage::human("first question"),
            ChatMessage::system("Rule two."),
            ChatMessage::ai("first answer"),
            ChatMessage::human("second question"),
        ];
        let normalized = normalize_history(&messages);
        assert_eq!(normalized[0].role, ChatRole::System);
        assert_eq!(normalized[0].content, "Rule one.\nRule two.");
        let roles: Vec<ChatRole> = normalized[1..].iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::Human, ChatRole::Ai, ChatRole::Human]);
    }

    #[test]
    fn normalize_without_system_messages_adds_none() {
        let normalized = normalize_history(&[ChatMessage::human("hi"), ChatMessage::ai("yo")]);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0].role, ChatRole::Human);
    }

    #[test]
    fn request_maps_roles_and_system_instruction() {
        let normalized = normalize_history(&[
            ChatMessage::system("Be terse."),
            ChatMessage::human("hi"),
            ChatMessage::ai("yo"),
        ]);
        let req = build_request(&normalized);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json["systemInstruction"]["parts"][0]["text"],
            "Be terse."
        );
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][1]["role"], "model");
    }

    #[tokio::test]
    async fn stream_chat_concatenates_candidate_parts() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}],\"role\":\"model\"}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}],\"role\":\"model\"}}]}\n\n",
        );
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path(
                "POST",
                "/v1beta/models/gemini-test:streamGenerateContent",
            ))
            .respond_with(status_code(200).body(body)),
        );

        let http = reqwest::Client::new();
        let stream = stream_chat(
            &http,
            &server.url_str(""),
            "test-key",
            "gemini-test",
            &[ChatMessage::human("hi")],
        )
        .await
        .expect("stream should open");
        let chunks: Vec<String> = stream.try_collect().await.expect("stream should drain");
        assert_eq!(chunks.concat(), "Hello");
    }

    #[tokio::test]
    async fn list_models_strips_models_prefix() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("GET", "/v1beta/models")).respond_with(
                json_encoded(serde_json::json!({
                    "models": [
                        {"name": "models/gemini-2.0-flash", "displayName": "Gemini 2.0 Flash"},
                        {"name": "models/gemini-1.5-pro"},
                    ]
                })),
            ),
        );

        let http = reqwest::Client::new();
        let models = list_models(&http, &server.url_str(""), "test-key")
            .await
            .expect("listing should succeed");
        assert_eq!(models[0].id, "gemini-2.0-flash");
        assert_eq!(models[0].name, "Gemini 2.0 Flash");
        assert_eq!(models[1].id, "gemini-1.5-pro");
        assert_eq!(models[1].name, "gemini-1.5-pro");
        assert!(models.iter().all(|m| m.provider == Provider::Google));
    }
}
