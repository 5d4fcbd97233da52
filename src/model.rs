//! The model boundary: context in, raw text out.
//!
//! The action loop only depends on the `ModelClient` contract; how the model
//! is prompted, configured or hosted is invisible to it. The shipped client
//! speaks the OpenAI-compatible chat-completions protocol.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::errors::{AgentError, Result};
use crate::history::{Role, Turn};

const SYSTEM_PROMPT: &str = r#"You are a web navigation agent connected to a real browser. Each turn you receive the current page state: its URL, title, a text summary, and a numbered map of interactable elements (highlighted in the screenshot with a red outline and light red background). Work toward the main goal one small batch of actions at a time.

Respond with exactly one JSON object, no surrounding prose:

{
  "reasoning": "why these actions move toward the goal",
  "proposed_actions": [
    {"kind": "navigate", "url": "https://example.com"},
    {"kind": "input", "target": {"element_id": 1, "element_text": "Username field"}, "value": "user123"},
    {"kind": "click", "target": {"element_id": 2, "element_text": "Submit button"}},
    {"kind": "wait", "duration_ms": 1000},
    {"kind": "scroll", "direction": "down"}
  ],
  "execution_order": [0, 1, 2],
  "success_criteria": "what successful execution looks like",
  "fallback_strategy": "what to do if this fails"
}

Rules:
1. Only reference element ids present in the current element map.
2. A navigate invalidates every element id; never schedule a click or input after one.
3. Inputs are not submitted implicitly; follow them with an explicit click when submission is needed.
4. When the goal is reached or you need more information, reply in plain prose instead of a JSON object."#;

#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Produce the next raw model response given the replayed history and the
    /// current context document.
    async fn invoke(&self, history: &[Turn], input: &str) -> Result<String>;
}

pub struct ChatCompletionsClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ChatCompletionsClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

/// Map history turns plus the new input onto chat messages. A turn carrying a
/// visual payload becomes a multi-part message with an image attachment; the
/// pruning placeholder travels as plain text.
fn build_messages(history: &[Turn], input: &str) -> Vec<Value> {
    let mut messages = vec![json!({"role": "system", "content": SYSTEM_PROMPT})];

    for turn in history {
        let role = match turn.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        let content = match &turn.visual {
            Some(visual) if visual.starts_with("data:") => json!([
                {"type": "text", "text": turn.text},
                {"type": "image_url", "image_url": {"url": visual}},
            ]),
            Some(placeholder) => json!(format!("{}\n{}", turn.text, placeholder)),
            None => json!(turn.text),
        };
        messages.push(json!({"role": role, "content": content}));
    }

    messages.push(json!({"role": "user", "content": input}));
    messages
}

#[async_trait]
impl ModelClient for ChatCompletionsClient {
    async fn invoke(&self, history: &[Turn], input: &str) -> Result<String> {
        let messages = build_messages(history, input);
        debug!(messages = messages.len(), "invoking model");

        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "temperature": 0.7,
            }))
            .send()
            .await
            .map_err(|e| AgentError::ModelFailed(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::ModelFailed(e.to_string()))?;

        if !status.is_success() {
            let message = body["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(AgentError::ModelFailed(format!(
                "endpoint returned {}: {}",
                status, message
            )));
        }

        body["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| AgentError::ModelFailed("response carried no content".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visual_turns_become_image_attachments() {
        let history = vec![Turn::user("look at this").with_visual("data:image/webp;base64,AAAA")];
        let messages = build_messages(&history, "next step?");

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][0]["type"], "text");
        assert_eq!(
            messages[1]["content"][1]["image_url"]["url"],
            "data:image/webp;base64,AAAA"
        );
    }

    #[test]
    fn pruned_turns_stay_textual() {
        let mut turn = Turn::user("older screen").with_visual("data:image/webp;base64,AAAA");
        turn.prune_visual();
        let messages = build_messages(&[turn], "next");

        assert!(messages[1]["content"].is_string());
        let content = messages[1]["content"].as_str().unwrap();
        assert!(content.contains("older screen"));
        assert!(content.contains(crate::history::VISUAL_PLACEHOLDER));
    }

    #[test]
    fn system_prompt_leads_and_input_trails() {
        let messages = build_messages(&[], "the context");
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages.last().unwrap()["role"], "user");
        assert_eq!(messages.last().unwrap()["content"], "the context");
    }
}
