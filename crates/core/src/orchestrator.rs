//! Per-question decision → context update → response generation, bridging
//! the retrieval core to an external `LlmClient`.

use crate::context::{ContextManager, UpdateMode};
use crate::graph::Graph;
use crate::llm::{
    CallParams, ChatMessage, Decision, DecisionPrompt, GenerationRequest, LlmClient, PERSONA,
};
use crate::query::{query, QueryOptions};

const MAX_HISTORY: usize = 50;
const HISTORY_WINDOW: usize = 6;

/// A single conversation: bounded message history plus a `ContextManager`.
pub struct ChatSession {
    pub history: Vec<ChatMessage>,
    pub contexts: ContextManager,
    query_options: QueryOptions,
}

impl ChatSession {
    pub fn new() -> Self {
        Self { history: Vec::new(), contexts: ContextManager::default(), query_options: QueryOptions::default() }
    }

    fn push_history(&mut self, message: ChatMessage) {
        self.history.push(message);
        if self.history.len() > MAX_HISTORY {
            let drop = self.history.len() - MAX_HISTORY;
            self.history.drain(0..drop);
        }
    }

    fn last_user_question(&self) -> String {
        self.history.iter().rev().find(|m| m.role == "user").map(|m| m.content.clone()).unwrap_or_default()
    }

    /// Runs one full turn: decide → (maybe) retrieve+update context →
    /// stream a response through `on_chunk`. The assistant reply is only
    /// appended to history once the full response has been received —
    /// if the caller abandons the stream early, the turn is not recorded.
    pub async fn ask(
        &mut self,
        graph: &Graph,
        question: &str,
        llm: &dyn LlmClient,
        params: CallParams,
        on_chunk: &mut dyn FnMut(&str),
    ) {
        let last_question = self.last_user_question();
        let decision = llm
            .decide(DecisionPrompt {
                contexts: self.contexts.current_context(),
                last_question,
                new_question: question.to_string(),
            })
            .await;

        match decision {
            Decision::New => {
                let rendered = query(graph, question, &self.query_options);
                self.contexts.update(rendered, UpdateMode::Replace);
            }
            Decision::Additional => {
                let rendered = query(graph, question, &self.query_options);
                self.contexts.update(rendered, UpdateMode::Append);
            }
            Decision::None => {}
        }

        self.push_history(ChatMessage { role: "user", content: question.to_string() });

        let history_window: Vec<ChatMessage> = self
            .history
            .iter()
            .rev()
            .take(HISTORY_WINDOW)
            .rev()
            .map(|m| ChatMessage { role: m.role, content: m.content.clone() })
            .collect();

        let mut reply = String::new();
        llm.generate(
            GenerationRequest {
                persona: PERSONA.to_string(),
                context: self.contexts.current_context(),
                history: history_window,
                params,
            },
            &mut |chunk: &str| {
                reply.push_str(chunk);
                on_chunk(chunk);
            },
        )
        .await;

        self.push_history(ChatMessage { role: "assistant", content: reply });
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeKind, NodeMeta};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct FixedDecisionClient {
        decision: Decision,
        replies: Mutex<Vec<String>>,
    }

    #[async_trait(?Send)]
    impl LlmClient for FixedDecisionClient {
        async fn decide(&self, _prompt: DecisionPrompt) -> Decision {
            self.decision
        }

        async fn generate(&self, _req: GenerationRequest, on_chunk: &mut dyn for<'a> FnMut(&'a str)) {
            let reply = self.replies.lock().unwrap().pop().unwrap_or_default();
            on_chunk(&reply);
        }
    }

    fn sample_graph() -> Graph {
        let mut g = Graph::new();
        g.add_node(
            "class Foo:\n    pass\n".to_string(),
            NodeMeta { kind: NodeKind::PythonClass, path: "a.py".into(), name: "Foo".into(), parent: None, line: Some(1), full_content: None },
        );
        g
    }

    #[tokio::test]
    async fn additional_decision_appends_context() {
        let graph = sample_graph();
        let client = FixedDecisionClient { decision: Decision::New, replies: Mutex::new(vec!["hi".into()]) };
        let mut session = ChatSession::new();
        session.contexts.update("existing one".to_string(), UpdateMode::Replace);
        session.contexts.update("existing two".to_string(), UpdateMode::Append);

        let client2 = FixedDecisionClient { decision: Decision::Additional, replies: Mutex::new(vec!["ok".into()]) };
        let mut out = String::new();
        session.ask(&graph, "tell me about Foo", &client2, CallParams::default(), &mut |c| out.push_str(c)).await;

        assert_eq!(session.contexts.status().context_count, 3);
        assert_eq!(session.contexts.status().last_action, "Additional Context");
        assert_eq!(out, "ok");
        let _ = client;
    }

    #[tokio::test]
    async fn reply_is_only_recorded_after_full_stream() {
        let graph = sample_graph();
        let client = FixedDecisionClient { decision: Decision::New, replies: Mutex::new(vec!["full reply".into()]) };
        let mut session = ChatSession::new();
        session.ask(&graph, "what is Foo", &client, CallParams::default(), &mut |_| {}).await;
        assert_eq!(session.history.last().unwrap().content, "full reply");
    }
}
