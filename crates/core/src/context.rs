//! Bounded list of rendered retrieval contexts for one conversation.

/// How a new context should be merged into the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Replace,
    Append,
    None,
}

#[derive(Debug, Clone)]
pub struct ContextManager {
    contexts: Vec<String>,
    max_contexts: usize,
    last_action: &'static str,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(5)
    }
}

impl ContextManager {
    pub fn new(max_contexts: usize) -> Self {
        Self { contexts: Vec::new(), max_contexts, last_action: "No Context Added" }
    }

    /// `mode == None` is a no-op; the caller never invokes it with `None`
    /// in practice, but the orchestrator's decision space includes it.
    pub fn update(&mut self, new_context: String, mode: UpdateMode) {
        match mode {
            UpdateMode::Replace => {
                self.contexts = vec![new_context];
                self.last_action = "New Context";
            }
            UpdateMode::Append => {
                self.contexts.push(new_context);
                if self.contexts.len() > self.max_contexts {
                    let drop = self.contexts.len() - self.max_contexts;
                    self.contexts.drain(0..drop);
                }
                self.last_action = "Additional Context";
            }
            UpdateMode::None => {
                self.last_action = "No Context Added";
            }
        }
    }

    pub fn current_context(&self) -> String {
        self.contexts.join("\n\n")
    }

    /// The raw stored contexts, for persisting a session across restarts.
    pub fn all_contexts(&self) -> Vec<String> {
        self.contexts.clone()
    }

    /// Restores a previously-persisted list of contexts verbatim (used
    /// when resuming a session; bypasses the replace/append bookkeeping
    /// since there is no "last action" to report for a restored session).
    pub fn restore(&mut self, contexts: Vec<String>) {
        self.contexts = contexts;
    }

    pub fn token_count(&self) -> usize {
        let words = self.current_context().split_whitespace().count();
        (1.5 * words as f64).floor() as usize
    }

    pub fn status(&self) -> ContextStatus {
        ContextStatus {
            context_count: self.contexts.len(),
            token_count: self.token_count(),
            last_action: self.last_action,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextStatus {
    pub context_count: usize,
    pub token_count: usize,
    pub last_action: &'static str,
}
