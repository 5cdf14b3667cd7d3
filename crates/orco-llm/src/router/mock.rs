//! A scriptable [`LlmProvider`] for tests and for `orco-cli`'s local exercise
//! mode, where no real vendor endpoint is configured.

use std::collections::VecDeque;

use tokio::sync::Mutex;

use crate::completion::{CompletionRequest, CompletionResponse};
use crate::error::{Error, Result};

use super::provider::LlmProvider;

/// Replays a queued sequence of canned responses (or errors) in order,
/// one per call to [`LlmProvider::complete`]. Once the queue is drained,
/// further calls return [`Error::NotConfigured`].
pub struct MockProvider {
    name: String,
    model: String,
    queue: Mutex<VecDeque<Result<String>>>,
}

impl MockProvider {
    /// Create an empty mock provider; responses can be queued afterward with
    /// [`Self::push`].
    #[must_use]
    pub fn new(name: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Create a mock provider pre-loaded with a sequence of responses.
    #[must_use]
    pub fn with_responses(
        name: impl Into<String>,
        model: impl Into<String>,
        responses: Vec<Result<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            queue: Mutex::new(responses.into_iter().collect()),
        }
    }

    /// Queue one more response (or error) to be returned on the next call.
    pub async fn push(&self, response: Result<String>) {
        self.queue.lock().await.push_back(response);
    }

    async fn next(&self) -> Result<String> {
        self.queue
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(Error::NotConfigured("mock response queue empty".into())))
    }
}

#[async_trait::async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn available_models(&self) -> Vec<String> {
        vec![self.model.clone()]
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let content = self.next().await?;
        Ok(CompletionResponse {
            content,
            usage: None,
            finish_reason: Some("stop".into()),
            model: request.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_in_order_then_exhausts() {
        let mock = MockProvider::with_responses(
            "mock",
            "mock-model",
            vec![Ok("first".into()), Err(Error::RateLimit)],
        );
        let req = CompletionRequest::new("mock-model");
        let first = mock.complete(req.clone()).await.unwrap();
        assert_eq!(first.content, "first");
        assert!(matches!(mock.complete(req.clone()).await, Err(Error::RateLimit)));
        assert!(matches!(
            mock.complete(req).await,
            Err(Error::NotConfigured(_))
        ));
    }

    #[tokio::test]
    async fn push_appends_to_queue() {
        let mock = MockProvider::new("mock", "mock-model");
        mock.push(Ok("late".into())).await;
        let resp = mock.complete(CompletionRequest::new("mock-model")).await.unwrap();
        assert_eq!(resp.content, "late");
    }
}
