//! §4.6 ModeRouter — classifies a request into `{Chat, Introspect, Task}`.

use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use orco_llm::{LlmClient, Message, ModelConfig, Priority};

use crate::error::Result;
use crate::event_bus::Mode;

/// Result of classifying a request.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    /// Chosen mode.
    pub mode: Mode,
    /// Classifier confidence in `[0,1]`.
    pub confidence: f64,
    /// Short justification, suitable for the `mode_selected` event.
    pub reasoning: String,
    /// Optional mood tag the Chat branch may use for tone (out of scope
    /// for this crate's detailed handling, carried through verbatim).
    pub mood: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    mode: String,
    #[serde(default = "default_confidence")]
    confidence: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    mood: Option<String>,
}

fn default_confidence() -> f64 {
    0.5
}

const SYSTEM_PROMPT: &str = "Classify the user's message into exactly one of: \
    chat (conversational, no durable task), introspect (asks the assistant to \
    reflect on its own state/capabilities/history), task (an actionable request \
    that should become a plan of concrete steps). Respond as JSON: \
    {\"mode\": \"chat\"|\"introspect\"|\"task\", \"confidence\": 0..1, \"reasoning\": \"...\", \"mood\": \"...\"|null}.";

/// Classifies requests into `{Chat, Introspect, Task}` via a single LLM call.
pub struct ModeRouter<'a> {
    client: &'a LlmClient,
    config: &'a ModelConfig,
}

impl<'a> ModeRouter<'a> {
    /// Build a router against the given model config (typically a
    /// cheap/fast one — this call is on the critical path of every request).
    #[must_use]
    pub fn new(client: &'a LlmClient, config: &'a ModelConfig) -> Self {
        Self { client, config }
    }

    /// Classify `request`. Parse failures default to `Task` at low
    /// confidence — an under-classified request still makes progress via
    /// the Planner's own feasibility check, whereas silently treating an
    /// actionable request as Chat would drop it on the floor.
    #[instrument(skip(self, request), fields(request_len = request.len()))]
    pub async fn route(&self, request: &str) -> Result<RoutingDecision> {
        let messages = vec![Message::system(SYSTEM_PROMPT), Message::user(request)];
        let schema = json!({
            "type": "object",
            "required": ["mode"],
            "properties": {
                "mode": {"enum": ["chat", "introspect", "task"]},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "reasoning": {"type": "string"},
                "mood": {"type": ["string", "null"]}
            }
        });

        let response = self
            .client
            .complete_constrained(messages, self.config, Priority::Normal, schema)
            .await?;
        let raw: RawDecision = match serde_json::from_str(&response.content) {
            Ok(r) => r,
            Err(_) => {
                return Ok(RoutingDecision {
                    mode: Mode::Task,
                    confidence: 0.3,
                    reasoning: "classification response unparseable; defaulting to task".into(),
                    mood: None,
                });
            }
        };

        let mode = match raw.mode.as_str() {
            "chat" => Mode::Chat,
            "introspect" => Mode::Introspect,
            _ => Mode::Task,
        };

        Ok(RoutingDecision {
            mode,
            confidence: raw.confidence.clamp(0.0, 1.0),
            reasoning: raw.reasoning,
            mood: raw.mood,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orco_llm::{MockProvider, Throttle};
    use std::time::Duration;

    fn client(body: &str) -> LlmClient {
        let provider = MockProvider::with_responses("mock", "router-model", vec![Ok(body.to_string())]);
        let throttle = Throttle::spawn(Duration::from_millis(1), 4);
        LlmClient::new(Box::new(provider), None, throttle)
    }

    fn model_config() -> ModelConfig {
        ModelConfig {
            model: "router-model".into(),
            fallback_model: None,
            temperature: Some(0.0),
            max_tokens: None,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn routes_to_task_on_explicit_classification() {
        let client = client(r#"{"mode":"task","confidence":0.92,"reasoning":"imperative verb"}"#);
        let config = model_config();
        let router = ModeRouter::new(&client, &config);
        let decision = router.route("Create /tmp/a.txt").await.unwrap();
        assert_eq!(decision.mode, Mode::Task);
        assert!((decision.confidence - 0.92).abs() < 1e-6);
    }

    #[tokio::test]
    async fn routes_to_chat() {
        let client = client(r#"{"mode":"chat","confidence":0.8,"reasoning":"greeting"}"#);
        let config = model_config();
        let router = ModeRouter::new(&client, &config);
        let decision = router.route("Hi").await.unwrap();
        assert_eq!(decision.mode, Mode::Chat);
    }

    #[tokio::test]
    async fn unparseable_response_defaults_to_task() {
        let client = client("not json at all");
        let config = model_config();
        let router = ModeRouter::new(&client, &config);
        let decision = router.route("do something").await.unwrap();
        assert_eq!(decision.mode, Mode::Task);
        assert!(decision.confidence < 0.5);
    }
}
