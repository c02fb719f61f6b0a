//! HTTP implementations of the collaborator traits.
//!
//! Wire format:
//!
//! - `POST {base}/v1/threads` → `{"id": "..."}`
//! - `POST {base}/v1/threads/{id}/messages` with `{"role": "user", "content": "..."}`
//! - `POST {base}/v1/threads/{id}/replies` → `text/event-stream` of
//!   [`ReplyEvent`]-shaped JSON data frames
//! - `DELETE {base}/v1/threads/{id}` — 404 maps to [`BackendError::ThreadNotFound`]
//! - `POST {base}/v1/suggestions` with `{"prompt": ..., "reply": ...}` →
//!   `{"suggestions": ["...", ...]}`

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use parley_core::events::ReplyEvent;
use parley_core::ids::ThreadId;

use crate::error::BackendError;
use crate::traits::{ConversationBackend, ReplyStream, SuggestionGenerator};

/// Number of quick replies requested per completed turn.
pub const SUGGESTION_COUNT: usize = 3;

/// HTTP client for the conversation backend.
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
    headers: HeaderMap,
}

#[derive(Deserialize)]
struct CreateThreadResponse {
    id: String,
}

#[derive(Serialize)]
struct AppendMessageRequest<'a> {
    role: &'static str,
    content: &'a str,
}

impl HttpBackend {
    /// Create a new backend client.
    ///
    /// `api_key`, when present, is sent as a bearer token on every request.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: Option<&str>) -> Self {
        Self::with_client(base_url, api_key, reqwest::Client::new())
    }

    /// Create a new backend client with a shared HTTP client.
    #[must_use]
    pub fn with_client(
        base_url: impl Into<String>,
        api_key: Option<&str>,
        client: reqwest::Client,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client,
            headers: build_headers(api_key),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

/// Bearer-auth headers; an unencodable key is dropped with a warning.
fn build_headers(api_key: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(key) = api_key {
        match HeaderValue::from_str(&format!("Bearer {key}")) {
            Ok(value) => {
                let _ = headers.insert(AUTHORIZATION, value);
            }
            Err(_) => warn!("backend API key is not a valid header value, ignoring"),
        }
    }
    headers
}

/// Map a non-success response to a [`BackendError`], consuming the body.
async fn status_error(response: Response) -> BackendError {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return BackendError::ThreadNotFound;
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| status.to_string());
    BackendError::Api {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl ConversationBackend for HttpBackend {
    #[instrument(skip(self))]
    async fn create_thread(&self) -> Result<ThreadId, BackendError> {
        let response = self
            .client
            .post(self.url("/v1/threads"))
            .headers(self.headers.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let body: CreateThreadResponse = response.json().await?;
        debug!(thread_id = %body.id, "thread created");
        Ok(ThreadId::from(body.id))
    }

    #[instrument(skip(self, text), fields(thread_id = %thread))]
    async fn append_message(&self, thread: &ThreadId, text: &str) -> Result<(), BackendError> {
        let response = self
            .client
            .post(self.url(&format!("/v1/threads/{thread}/messages")))
            .headers(self.headers.clone())
            .json(&AppendMessageRequest {
                role: "user",
                content: text,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(())
    }

    #[instrument(skip(self), fields(thread_id = %thread))]
    async fn stream_reply(&self, thread: &ThreadId) -> Result<ReplyStream, BackendError> {
        let response = self
            .client
            .post(self.url(&format!("/v1/threads/{thread}/replies")))
            .headers(self.headers.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        // Each SSE data frame carries one ReplyEvent. A malformed frame or a
        // transport error becomes a terminal Failed event; the coordinator
        // stops at the first terminal event, so trailing frames are moot.
        let stream = response.bytes_stream().eventsource().map(|frame| {
            match frame {
                Ok(event) => serde_json::from_str::<ReplyEvent>(&event.data).unwrap_or_else(|e| {
                    ReplyEvent::Failed {
                        error: format!("malformed stream event: {e}"),
                    }
                }),
                Err(e) => ReplyEvent::Failed {
                    error: e.to_string(),
                },
            }
        });
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self), fields(thread_id = %thread))]
    async fn delete_thread(&self, thread: &ThreadId) -> Result<(), BackendError> {
        let response = self
            .client
            .delete(self.url(&format!("/v1/threads/{thread}")))
            .headers(self.headers.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        debug!("thread deleted");
        Ok(())
    }
}

/// HTTP client for the suggestion generator.
pub struct HttpSuggestionGenerator {
    base_url: String,
    client: reqwest::Client,
    headers: HeaderMap,
}

#[derive(Serialize)]
struct SuggestionRequest<'a> {
    prompt: &'a str,
    reply: &'a str,
    count: usize,
}

#[derive(Deserialize)]
struct SuggestionResponse {
    suggestions: Vec<String>,
}

impl HttpSuggestionGenerator {
    /// Create a new suggestion client.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: Option<&str>) -> Self {
        Self::with_client(base_url, api_key, reqwest::Client::new())
    }

    /// Create a new suggestion client with a shared HTTP client.
    #[must_use]
    pub fn with_client(
        base_url: impl Into<String>,
        api_key: Option<&str>,
        client: reqwest::Client,
    ) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client,
            headers: build_headers(api_key),
        }
    }
}

#[async_trait]
impl SuggestionGenerator for HttpSuggestionGenerator {
    #[instrument(skip_all)]
    async fn generate(&self, prompt: &str, reply: &str) -> Result<Vec<String>, BackendError> {
        let response = self
            .client
            .post(format!("{}/v1/suggestions", self.base_url))
            .headers(self.headers.clone())
            .json(&SuggestionRequest {
                prompt,
                reply,
                count: SUGGESTION_COUNT,
            })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let mut body: SuggestionResponse = response.json().await?;
        body.suggestions.truncate(SUGGESTION_COUNT);
        Ok(body.suggestions)
    }
}
