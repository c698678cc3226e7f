use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;
use crate::llm::types::{ChatMessage, ModelInfo, Provider};
use crate::llm::{LlmError, anthropic, google, ollama, openai};

/// The model choice in effect for chat calls. Replaced wholesale by
/// `configure`; a call already in flight keeps the copy it started with.
#[derive(Debug, Clone)]
struct ActiveModel {
    provider: Provider,
    model: String,
    api_key: Option<String>,
}

#[derive(Debug, Clone)]
struct BaseUrls {
    openai: String,
    anthropic: String,
    google: String,
    ollama: String,
}

impl BaseUrls {
    fn resolve_defaults() -> Self {
        Self {
            openai: openai::DEFAULT_BASE_URL.to_string(),
            anthropic: anthropic::DEFAULT_BASE_URL.to_string(),
            google: google::DEFAULT_BASE_URL.to_string(),
            ollama: std::env::var("OLLAMA_HOST")
                .unwrap_or_else(|_| ollama::DEFAULT_BASE_URL.to_string()),
        }
    }

    fn get(&self, provider: Provider) -> &str {
        match provider {
            Provider::OpenAi => &self.openai,
            Provider::Anthropic => &self.anthropic,
            Provider::Google => &self.google,
            Provider::Ollama => &self.ollama,
        }
    }

    fn set(&mut self, provider: Provider, url: String) {
        match provider {
            Provider::OpenAi => self.openai = url,
            Provider::Anthropic => self.anthropic = url,
            Provider::Google => self.google = url,
            Provider::Ollama => self.ollama = url,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmService {
    http: reqwest::Client,
    base_urls: BaseUrls,
    active: Option<ActiveModel>,
    chat_timeout: Duration,
}

impl LlmService {
    pub fn new(cfg: &LlmConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            base_urls: BaseUrls::resolve_defaults(),
            active: None,
            chat_timeout: Duration::from_millis(cfg.chat_timeout_ms),
        })
    }

    pub fn with_chat_timeout(mut self, timeout: Duration) -> Self {
        self.chat_timeout = timeout;
        self
    }

    /// Point one provider at a different base URL (self-hosted gateways,
    /// tests).
    pub fn with_base_url(mut self, provider: Provider, url: impl Into<String>) -> Self {
        self.base_urls.set(provider, url.into());
        self
    }

    /// Replace the active model choice. No credential validation happens
    /// here; a bad key surfaces on first use. A missing key falls back to
    /// the provider's environment variable.
    pub fn configure(&mut self, provider: Provider, model: impl Into<String>, api_key: Option<String>) {
        let model = model.into();
        let api_key = api_key.or_else(|| env_api_key(provider));
        info!(%provider, %model, has_key = api_key.is_some(), "llm backend configured");
        self.active = Some(ActiveModel {
            provider,
            model,
            api_key,
        });
    }

    pub fn is_configured(&self) -> bool {
        self.active.is_some()
    }

    /// Active provider and model id, if configured.
    pub fn active_model(&self) -> Option<(Provider, &str)> {
        self.active.as_ref().map(|a| (a.provider, a.model.as_str()))
    }

    /// Send the conversation to the active backend and return the reply
    /// text. Never fails: an unconfigured service answers with a mock reply,
    /// and every backend failure (including the timeout) is folded into an
    /// error string naming the provider.
    pub async fn chat(&self, messages: &[ChatMessage]) -> String {
        let Some(active) = self.active.clone() else {
            debug!("chat requested without a configured backend");
            return mock_reply(messages);
        };
        let base = self.base_urls.get(active.provider).to_string();
        debug!(provider = %active.provider, model = %active.model, turns = messages.len(), "chat dispatch");

        match tokio::time::timeout(self.chat_timeout, run_chat(&self.http, &base, &active, messages))
            .await
        {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(provider = %active.provider, error = %e, "chat failed");
                format!("Error communicating with {}: {e}", active.provider)
            }
            Err(_) => {
                warn!(provider = %active.provider, timeout = ?self.chat_timeout, "chat timed out");
                format!(
                    "Error communicating with {}: timed out after {:?}",
                    active.provider, self.chat_timeout
                )
            }
        }
    }

    /// Model discovery. Unlike `chat`, this is allowed to fail upward.
    pub async fn list_models(
        &self,
        provider: Provider,
        api_key: Option<&str>,
    ) -> Result<Vec<ModelInfo>, LlmError> {
        let base = self.base_urls.get(provider);
        let key = api_key.map(str::to_string).or_else(|| env_api_key(provider));
        match provider {
            Provider::OpenAi => {
                openai::list_models(&self.http, base, &require_key(provider, key)?).await
            }
            Provider::Anthropic => {
                anthropic::list_models(&self.http, base, &require_key(provider, key)?).await
            }
            Provider::Google => {
                google::list_models(&self.http, base, &require_key(provider, key)?).await
            }
            Provider::Ollama => ollama::list_models(&self.http, base).await,
        }
    }
}

/// The accumulation side of the race in `chat`: open the stream and fold
/// every token into one reply.
async fn run_chat(
    http: &reqwest::Client,
    base_url: &str,
    active: &ActiveModel,
    messages: &[ChatMessage],
) -> Result<String, LlmError> {
    let mut stream = match active.provider {
        Provider::OpenAi => {
            let key = require_key(active.provider, active.api_key.clone())?;
            openai::stream_chat(http, base_url, &key, &active.model, messages).await?
        }
        Provider::Anthropic => {
            let key = require_key(active.provider, active.api_key.clone())?;
            anthropic::stream_chat(http, base_url, &key, &active.model, messages).await?
        }
        Provider::Google => {
            let key = require_key(active.provider, active.api_key.clone())?;
            google::stream_chat(http, base_url, &key, &active.model, messages).await?
        }
        Provider::Ollama => ollama::stream_chat(http, base_url, &active.model, messages).await?,
    };

    let mut reply = String::new();
    while let Some(chunk) = stream.next().await {
        reply.push_str(&chunk?);
    }
    Ok(reply)
}

fn require_key(provider: Provider, key: Option<String>) -> Result<String, LlmError> {
    key.ok_or(LlmError::MissingApiKey(provider))
}

fn env_api_key(provider: Provider) -> Option<String> {
    let var = match provider {
        Provider::OpenAi => "OPENAI_API_KEY",
        Provider::Anthropic => "ANTHROPIC_API_KEY",
        Provider::Google => "GEMINI_API_KEY",
        Provider::Ollama => return None,
    };
    std::env::var(var).ok()
}

fn mock_reply(messages: &[ChatMessage]) -> String {
    let last = messages.last().map(|m| m.content.as_str()).unwrap_or_default();
    format!("Mock reply (no model configured): {last}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use httptest::{Expectation, Server, matchers::*, responders::*};

    fn service() -> LlmService {
        LlmService::new(&LlmConfig::default()).expect("client should build")
    }

    fn sse_chunk(content: &str) -> String {
        let chunk = serde_json::json!({"choices":[{"index":0,"delta":{"content":content}}]});
        format!("data: {chunk}\n\ndata: [DONE]\n\n")
    }

    #[tokio::test]
    async fn unconfigured_chat_returns_mock_reply() {
        let svc = service();
        assert!(!svc.is_configured());
        let reply = svc
            .chat(&[
                ChatMessage::human("first"),
                ChatMessage::human("the last message"),
            ])
            .await;
        assert!(reply.contains("Mock reply"));
        assert!(reply.contains("the last message"));
    }

    #[tokio::test]
    async fn chat_folds_http_errors_into_reply_text() {
        let server = Server::run();
        server.expect(
            Expectation::matching(request::method_path("POST", "/v1/chat/completions"))
                .respond_with(status_code(500).body("upstream exploded")),
        );

        let mut svc = service().with_base_url(Provider::OpenAi, server.url_str(""));
        svc.configure(Provider::OpenAi, "gpt-test", Some("key".into()));
        let reply = svc.chat(&[ChatMessage::human("hi")]).await;
        assert!(reply.contains("Error communicating with openai"));
        assert!(reply.contains("500"));
    }

    #[tokio::test]
    async fn chat_timeout_embeds_provider_name() {
        // A socket that accepts and then stays silent, so the request
        // genuinely outlives the budget.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((_sock, _)) = listener.accept().await {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        });

        let mut svc = service()
            .with_chat_timeout(Duration::from_millis(200))
            .with_base_url(Provider::OpenAi, format!("http://{addr}"));
        svc.configure(Provider::OpenAi, "gpt-test", Some("key".into()));
        let reply = svc.chat(&[ChatMessage::human("hi")]).await;
        assert!(reply.contains("Error communicating with openai"));
        assert!(reply.contains("timed out"));
    }

    #[tokio::test]
    async fn reconfigure_replaces_active_backend() {
        let openai_server = Server::run();
        openai_server.expect(
            Expectation::matching(request::method_path("POST", "/v1/chat/completions"))
                .respond_with(status_code(200).body(sse_chunk("from openai"))),
        );
        let ollama_server = Server::run();
        ollama_server.expect(
            Expectation::matching(request::method_path("POST", "/api/chat")).respond_with(
                status_code(200).body(
                    "{\"message\":{\"role\":\"assistant\",\"content\":\"from ollama\"},\"done\":true}\n",
                ),
            ),
        );

        let mut svc = service()
            .with_base_url(Provider::OpenAi, openai_server.url_str(""))
            .with_base_url(Provider::Ollama, ollama_server.url_str(""));

        svc.configure(Provider::OpenAi, "gpt-test", Some("key".into()));
        assert_eq!(svc.chat(&[ChatMessage::human("hi")]).await, "from openai");

        svc.configure(Provider::Ollama, "llama3", None);
        assert_eq!(svc.chat(&[ChatMessage::human("hi")]).await, "from ollama");
    }

    #[tokio::test]
    async fn missing_key_is_folded_into_chat_reply() {
        let mut svc = service();
        svc.active = Some(ActiveModel {
            provider: Provider::Anthropic,
            model: "claude-test".into(),
            api_key: None,
        });
        let reply = svc.chat(&[ChatMessage::human("hi")]).await;
        assert!(reply.contains("Error communicating with anthropic"));
        assert!(reply.contains("missing API key"));
    }

    #[test]
    fn require_key_errors_without_key() {
        let err = require_key(Provider::Google, None).unwrap_err();
        assert!(matches!(err, LlmError::MissingApiKey(Provider::Google)));
        assert!(require_key(Provider::Google, Some("k".into())).is_ok());
    }
}
