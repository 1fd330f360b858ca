//! Client trait for the external LLM chat-completion service, plus a
//! concrete implementation against any OpenAI-chat-completions-shaped
//! endpoint.
//!
//! The service itself is out of scope (`spec.md` §1); this module is the
//! client boundary the orchestrator calls through.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::instrument;

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("malformed decision response")]
    MalformedDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    New,
    Additional,
    None,
}

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: &'static str,
    pub content: String,
}

/// Per-call knobs forwarded to the completion endpoint only when set.
#[derive(Debug, Clone, Default)]
pub struct CallParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub stop: Option<Vec<String>>,
    pub n: Option<u32>,
}

pub struct DecisionPrompt {
    pub contexts: String,
    pub last_question: String,
    pub new_question: String,
}

pub struct GenerationRequest {
    pub persona: String,
    pub context: String,
    pub history: Vec<ChatMessage>,
    pub params: CallParams,
}

const DECISION_TEMPLATE: &str = "You are deciding how a new user question relates to the retrieval \
context already gathered for this conversation.\n\n\
Existing context:\n{contexts}\n\n\
Most recent prior question: {last_question}\n\
New question: {new_question}\n\n\
Reply with exactly one of new, additional, or none, wrapped as:\n\
<response>{{\"decision\": \"new|additional|none\"}}</response>";

const DEFAULT_PERSONA: &str =
    "You are Doc2Talk, an assistant that answers questions about a codebase using the provided context.";

#[async_trait(?Send)]
pub trait LlmClient: Send + Sync {
    /// Non-streaming decision call. Falls back to `Decision::New` on any
    /// parse or transport failure per `spec.md` §4.8/§7.
    async fn decide(&self, prompt: DecisionPrompt) -> Decision;

    /// Streaming generation call. Chunks are pushed through `on_chunk` as
    /// they arrive; any failure yields a single error chunk and returns.
    async fn generate(&self, req: GenerationRequest, on_chunk: &mut dyn for<'a> FnMut(&'a str));
}

/// Model ids, configurable with the defaults from `spec.md` §6.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub decision_model: String,
    pub generation_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { decision_model: "gpt-4o".to_string(), generation_model: "gpt-4o-mini".to_string() }
    }
}

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    models: ModelConfig,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, models: ModelConfig) -> Self {
        Self { http: reqwest::Client::new(), base_url: base_url.into(), api_key: api_key.into(), models }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct DecisionPayload {
    decision: String,
}

fn parse_decision(text: &str) -> Option<Decision> {
    let start = text.find("<response>")? + "<response>".len();
    let end = text.find("</response>")?;
    let json = text.get(start..end)?;
    let payload: DecisionPayload = serde_json::from_str(json.trim()).ok()?;
    match payload.decision.as_str() {
        "new" => Some(Decision::New),
        "additional" => Some(Decision::Additional),
        "none" => Some(Decision::None),
        _ => None,
    }
}

#[async_trait(?Send)]
impl LlmClient for OpenAiCompatClient {
    #[instrument(skip_all, fields(model = %self.models.decision_model))]
    async fn decide(&self, prompt: DecisionPrompt) -> Decision {
        let decision_prompt = DECISION_TEMPLATE
            .replace("{contexts}", &prompt.contexts)
            .replace("{last_question}", &prompt.last_question)
            .replace("{new_question}", &prompt.new_question);

        let body = ChatRequest {
            model: &self.models.decision_model,
            messages: vec![WireMessage { role: "system", content: &decision_prompt }],
            stream: false,
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            n: None,
        };

        let result: Result<Decision, LlmError> = async {
            let resp = self
                .http
                .post(self.chat_url())
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await?
                .error_for_status()?;
            let parsed: ChatCompletionResponse = resp.json().await?;
            let text = parsed.choices.first().map(|c| c.message.content.as_str()).unwrap_or("");
            parse_decision(text).ok_or(LlmError::MalformedDecision)
        }
        .await;

        result.unwrap_or(Decision::New)
    }

    #[instrument(skip_all, fields(model = %self.models.generation_model, history_len = req.history.len()))]
    async fn generate(&self, req: GenerationRequest, on_chunk: &mut dyn for<'a> FnMut(&'a str)) {
        let system_content = format!("{}\n<context>\n{}\n</context>", req.persona, req.context);
        let mut messages = vec![WireMessage { role: "system", content: &system_content }];
        for m in &req.history {
            messages.push(WireMessage { role: m.role, content: &m.content });
        }

        let body = ChatRequest {
            model: &self.models.generation_model,
            messages,
            stream: true,
            temperature: req.params.temperature,
            max_tokens: req.params.max_tokens,
            top_p: req.params.top_p,
            frequency_penalty: req.params.frequency_penalty,
            presence_penalty: req.params.presence_penalty,
            stop: req.params.stop.clone(),
            n: req.params.n,
        };

        let result: Result<(), LlmError> = async {
            use futures::StreamExt;

            let resp = self.http.post(self.chat_url()).bearer_auth(&self.api_key).json(&body).send().await?;
            let mut stream = resp.bytes_stream();
            let mut buf = String::new();
            while let Some(chunk) = stream.next().await {
                let bytes = chunk?;
                buf.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].to_string();
                    buf.drain(..=pos);
                    let line = line.trim();
                    let Some(data) = line.strip_prefix("data: ") else { continue };
                    if data == "[DONE]" {
                        continue;
                    }
                    if let Ok(delta) = serde_json::from_str::<serde_json::Value>(data) {
                        if let Some(piece) =
                            delta["choices"][0]["delta"]["content"].as_str()
                        {
                            on_chunk(piece);
                        }
                    }
                }
            }
            Ok(())
        }
        .await;

        if let Err(e) = result {
            on_chunk(&format!("[error] {e}"));
        }
    }
}

pub const PERSONA: &str = DEFAULT_PERSONA;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_decision() {
        let text = r#"<response>{"decision":"additional"}</response>"#;
        assert_eq!(parse_decision(text), Some(Decision::Additional));
    }

    #[test]
    fn malformed_decision_text_returns_none() {
        let text = "sorry, I can't help with that";
        assert_eq!(parse_decision(text), None);
    }
}
