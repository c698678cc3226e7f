pub mod anthropic;
pub mod google;
pub mod ollama;
pub mod openai;
pub mod service;
pub mod types;

pub use service::LlmService;
pub use types::{ChatMessage, ChatRole, LlmSettings, ModelInfo, Provider};

use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

/// Transport-level failures. `LlmService::chat` folds these into reply text;
/// `list_models` surfaces them to the caller.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing API key for {0}")]
    MissingApiKey(Provider),
    #[error("HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    InvalidResponse(String),
}

/// Incremental text chunks from a streaming chat response.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Pull every complete line out of `buf`, leaving any trailing partial line
/// in place. Blank lines are dropped, CR/LF trimmed.
pub(crate) fn drain_complete_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut start = 0usize;
    for i in 0..buf.len() {
        if buf[i] == b'\n' {
            if let Ok(s) = std::str::from_utf8(&buf[start..i]) {
                let s = s.trim();
                if !s.is_empty() {
                    lines.push(s.to_string());
                }
            }
            start = i + 1;
        }
    }
    if start > 0 {
        buf.drain(0..start);
    }
    lines
}
