//! Retrieval core: build a searchable knowledge graph from a code+docs
//! tree, answer BM25 queries over it, and drive an LLM chat loop grounded
//! in the retrieved context.

pub mod bm25;
pub mod chunker;
pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod llm;
pub mod orchestrator;
pub mod query;
pub mod resolver;
pub mod session;

pub use chunker::build_graph;
pub use codec::{load, persist, BuildParams, LoadedIndex};
pub use config::{resolve as resolve_config, ConfigOverrides, ResolvedConfig};
pub use context::{ContextManager, ContextStatus, UpdateMode};
pub use error::{DoctalkError, Result};
pub use graph::{Graph, Node, NodeKind, NodeMeta};
pub use llm::{CallParams, ChatMessage, Decision, LlmClient, ModelConfig, OpenAiCompatClient};
pub use orchestrator::ChatSession;
pub use query::{query, QueryOptions};
pub use resolver::{resolve_reference, LocalResolver, RemoteResolver, SourceResolver};
pub use session::{SessionRecord, SessionStore, StoredMessage};
