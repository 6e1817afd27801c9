use crate::errors::SyncError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Cooperative cancellation handle for an in-flight sync. The pipeline
/// checks it when the response arrives; a cancelled run commits nothing even
/// if the model answered cleanly.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: Option<f32>,
}

/// Boundary to whatever serves model completions. Non-streaming: sync runs
/// want the whole response before repair starts.
#[async_trait]
pub trait CompletionClient: Send + Sync + std::fmt::Debug {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, SyncError>;

    fn describe(&self) -> String;
}

/// OpenAI-compatible chat-completions client.
#[derive(Debug)]
pub struct HttpCompletionClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout_ms: Option<u64>,
    ) -> Result<Self, SyncError> {
        let mut builder = reqwest::Client::builder();
        if let Some(ms) = timeout_ms {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        let http = builder
            .build()
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        Ok(HttpCompletionClient {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            http,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize, Serialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, SyncError> {
        let url = format!("{}/chat/completions", self.endpoint);
        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
        });
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }

        let mut http_request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        debug!(%url, model = self.model.as_str(), "issuing completion request");
        let response = http_request
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "completion request failed");
            return Err(SyncError::Transport(format!(
                "{status}: {}",
                body.chars().take(300).collect::<String>()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Transport(format!("malformed completion response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(SyncError::EmptyResponse);
        }
        Ok(content)
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.endpoint, self.model)
    }
}

/// Replays canned responses in order. Used by tests and by offline dry runs
/// of the sync pipelines.
#[derive(Debug, Default)]
pub struct ScriptedClient {
    responses: Mutex<VecDeque<String>>,
}

impl ScriptedClient {
    pub fn new(responses: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ScriptedClient {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
        }
    }

    pub fn push(&self, response: impl Into<String>) {
        self.responses.lock().push_back(response.into());
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(&self, _request: &CompletionRequest) -> Result<String, SyncError> {
        self.responses
            .lock()
            .pop_front()
            .ok_or_else(|| SyncError::Transport("scripted client has no more responses".into()))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_client_replays_in_order() {
        let client = ScriptedClient::new(["first", "second"]);
        let request = CompletionRequest {
            system: String::new(),
            user: String::new(),
            temperature: None,
        };
        assert_eq!(client.complete(&request).await.unwrap(), "first");
        assert_eq!(client.complete(&request).await.unwrap(), "second");
        assert!(matches!(
            client.complete(&request).await,
            Err(SyncError::Transport(_))
        ));
    }

    #[test]
    fn cancel_token_flags_once_set() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
