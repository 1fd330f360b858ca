//! The knowledge graph: immutable content-addressed nodes, an inverted
//! token index, entity registries, and markdown→class cross-edges.
//!
//! Nodes are created once during `build_graph` and never mutated. There is
//! no online update path — rebuilding produces a new `Graph`.

use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The kind of a retrievable chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    MarkdownSection,
    PythonClass,
    PythonFunction,
}

/// An immutable chunk of retrievable text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub content: String,
    pub kind: NodeKind,
    pub path: String,
    pub name: String,
    pub parent: Option<String>,
    pub line: Option<usize>,
    /// Entire source file. Only populated for `MarkdownSection` nodes, to
    /// enable whole-file promotion at query time.
    pub full_content: Option<String>,
}

/// Metadata supplied to `Graph::add_node`, everything but the content and
/// the derived id.
#[derive(Debug, Clone)]
pub struct NodeMeta {
    pub kind: NodeKind,
    pub path: String,
    pub name: String,
    pub parent: Option<String>,
    pub line: Option<usize>,
    pub full_content: Option<String>,
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Lowercase word-token matcher, `[A-Za-z0-9_]+`, shared by tokenization
/// and BM25 term counting.
fn token_regex() -> &'static Regex {
    use std::sync::OnceLock;
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9_]+").unwrap())
}

pub fn tokenize(content: &str) -> Vec<String> {
    let lower = content.to_lowercase();
    token_regex().find_iter(&lower).map(|m| m.as_str().to_string()).collect()
}

/// The knowledge graph. `nodes` preserves insertion order (mirroring a
/// Python dict's iteration guarantee), which BM25 ranking relies on to
/// break score ties deterministically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: IndexMap<String, Node>,
    pub inverted_index: HashMap<String, Vec<String>>,
    pub documents: Vec<String>,
    pub class_registry: HashMap<String, String>,
    pub function_registry: HashMap<String, String>,
    pub parent_map: HashMap<String, String>,
    pub cross_edges: HashMap<String, HashSet<String>>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a chunk, returning its content-derived id. A byte-identical
    /// re-insertion is a no-op for every field except `documents`, which
    /// grows by one every call (see `spec.md` §9 Open Question 1 — this
    /// drift is intentional and preserved for fidelity).
    pub fn add_node(&mut self, content: String, meta: NodeMeta) -> String {
        let id = sha256_hex(&content);

        self.documents.push(content.clone());

        let is_new = !self.nodes.contains_key(&id);

        if is_new {
            match meta.kind {
                NodeKind::PythonClass => {
                    self.class_registry.insert(meta.name.to_lowercase(), id.clone());
                }
                NodeKind::PythonFunction => {
                    self.function_registry.insert(meta.name.to_lowercase(), id.clone());
                    if let Some(parent) = &meta.parent {
                        self.parent_map.insert(id.clone(), parent.to_lowercase());
                    }
                }
                NodeKind::MarkdownSection => {}
            }

            for tok in tokenize(&content) {
                self.inverted_index.entry(tok).or_default().push(id.clone());
            }

            let node = Node {
                id: id.clone(),
                content,
                kind: meta.kind,
                path: meta.path,
                name: meta.name,
                parent: meta.parent,
                line: meta.line,
                full_content: meta.full_content,
            };
            self.nodes.insert(id.clone(), node);
        }

        id
    }

    /// Must run after all code chunks are inserted: for every markdown
    /// node, link it to every class whose exact lowercased name appears
    /// in its token stream.
    pub fn compute_cross_edges(&mut self) {
        let markdown_ids: Vec<String> = self
            .nodes
            .values()
            .filter(|n| n.kind == NodeKind::MarkdownSection)
            .map(|n| n.id.clone())
            .collect();

        for id in markdown_ids {
            let content = self.nodes[&id].content.clone();
            let tokens: HashSet<String> = tokenize(&content).into_iter().collect();
            let mut mentioned = HashSet::new();
            for tok in &tokens {
                if let Some(class_id) = self.class_registry.get(tok) {
                    mentioned.insert(class_id.clone());
                }
            }
            if !mentioned.is_empty() {
                self.cross_edges.entry(id).or_default().extend(mentioned);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(kind: NodeKind, path: &str, name: &str) -> NodeMeta {
        NodeMeta { kind, path: path.to_string(), name: name.to_string(), parent: None, line: None, full_content: None }
    }

    #[test]
    fn duplicate_content_collapses_to_one_node() {
        let mut g = Graph::new();
        let id1 = g.add_node("class Foo:\n    pass\n".to_string(), meta(NodeKind::PythonClass, "a.py", "Foo"));
        let id2 = g.add_node("class Foo:\n    pass\n".to_string(), meta(NodeKind::PythonClass, "a.py", "Foo"));
        assert_eq!(id1, id2);
        assert_eq!(g.nodes.len(), 1);
        assert_eq!(g.documents.len(), 2, "documents grows on every insertion call");
    }

    #[test]
    fn id_is_pure_function_of_content() {
        let content = "def f():\n    return 1\n";
        assert_eq!(sha256_hex(content), sha256_hex(content));
    }

    #[test]
    fn inverted_index_postings_actually_contain_token() {
        let mut g = Graph::new();
        g.add_node("class Widget:\n    pass\n".to_string(), meta(NodeKind::PythonClass, "a.py", "Widget"));
        for (tok, ids) in &g.inverted_index {
            for id in ids {
                let content = g.nodes[id].content.to_lowercase();
                assert!(content.contains(tok.as_str()));
            }
        }
    }

    #[test]
    fn cross_edges_subset_of_class_registry_values() {
        let mut g = Graph::new();
        g.add_node("class Foo:\n    pass\n".to_string(), meta(NodeKind::PythonClass, "a.py", "Foo"));
        let md_id = g.add_node("## Intro\nFoo is great\n".to_string(), meta(NodeKind::MarkdownSection, "a.md", ""));
        g.compute_cross_edges();
        let class_ids: HashSet<&String> = g.class_registry.values().collect();
        if let Some(edges) = g.cross_edges.get(&md_id) {
            for e in edges {
                assert!(class_ids.contains(e));
            }
        }
    }

    #[test]
    fn documents_len_matches_insertion_calls() {
        let mut g = Graph::new();
        g.add_node("a".to_string(), meta(NodeKind::MarkdownSection, "a.md", ""));
        g.add_node("b".to_string(), meta(NodeKind::MarkdownSection, "b.md", ""));
        g.add_node("a".to_string(), meta(NodeKind::MarkdownSection, "a.md", ""));
        assert_eq!(g.documents.len(), 3);
    }
}
