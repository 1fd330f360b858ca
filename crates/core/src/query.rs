//! Orchestrates retrieval: doc-node BM25 → related-class expansion →
//! composite re-ranking → file-coverage promotion → rendered context.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::instrument;

use crate::bm25::{bm25_over, bm25_search};
use crate::chunker::chunk_markdown;
use crate::graph::{Graph, NodeKind};

pub struct QueryOptions {
    pub top_n: usize,
    pub top_m: usize,
    pub file_coverage: f64,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self { top_n: 10, top_m: 3, file_coverage: 0.6 }
    }
}

enum DocResult {
    Section { path: String, body: String },
    FullFile { path: String, body: String },
}

/// Run the full five-stage retrieval pipeline and render its markdown
/// context. The function-appendix section named in `spec.md` §4.5 is a
/// reserved slot: this interface has no function list to render yet, so
/// it is always empty.
#[instrument(skip(graph, opts), fields(question_len = question.len()))]
pub fn query(graph: &Graph, question: &str, opts: &QueryOptions) -> String {
    // Stage 1 — documentation retrieval.
    let mut exclude = HashSet::new();
    exclude.insert(NodeKind::PythonClass);
    exclude.insert(NodeKind::PythonFunction);
    let doc_nodes = bm25_search(graph, question, opts.top_n, &exclude);

    // Stage 2 — class expansion.
    let mut class_candidates: HashSet<String> = HashSet::new();
    for (id, _) in &doc_nodes {
        if let Some(classes) = graph.cross_edges.get(id) {
            class_candidates.extend(classes.iter().cloned());
        }
    }

    // Stage 3 — composite class scoring.
    let top_classes = if class_candidates.is_empty() {
        Vec::new()
    } else {
        composite_class_scores(graph, question, &doc_nodes, &class_candidates, opts.top_m)
    };

    // Stage 4 — file-coverage promotion.
    let doc_results = promote_full_files(graph, &doc_nodes, opts.file_coverage);

    render(&doc_results, &top_classes, graph)
}

fn composite_class_scores(
    graph: &Graph,
    question: &str,
    doc_nodes: &[(String, f64)],
    class_candidates: &HashSet<String>,
    top_m: usize,
) -> Vec<String> {
    let candidates: Vec<(String, String)> = class_candidates
        .iter()
        .filter_map(|cid| graph.nodes.get(cid).map(|n| (cid.clone(), n.content.clone())))
        .collect();
    let raw_class_scores = bm25_over(question, &candidates);

    let max_class_score = raw_class_scores.values().cloned().fold(0.0_f64, f64::max);
    // Open Question 3: an all-zero class_scores means no related classes —
    // skip Stage 3 rather than divide by zero.
    if max_class_score <= 0.0 {
        return Vec::new();
    }
    let class_scores: HashMap<String, f64> =
        raw_class_scores.iter().map(|(k, v)| (k.clone(), v / max_class_score)).collect();

    let max_doc_score = doc_nodes.iter().map(|(_, s)| *s).fold(0.0_f64, f64::max);
    let doc_scores_norm: HashMap<String, f64> = if max_doc_score > 0.0 {
        doc_nodes.iter().map(|(id, s)| (id.clone(), s / max_doc_score)).collect()
    } else {
        doc_nodes.iter().map(|(id, _)| (id.clone(), 0.0)).collect()
    };

    let mut doc_mention: HashMap<String, f64> = HashMap::new();
    for cid in class_candidates {
        let mut total = 0.0;
        for (doc_id, _) in doc_nodes {
            if graph.cross_edges.get(doc_id).map(|s| s.contains(cid)).unwrap_or(false) {
                total += 0.7 * doc_scores_norm.get(doc_id).copied().unwrap_or(0.0);
            }
        }
        doc_mention.insert(cid.clone(), total);
    }
    let max_mention = doc_mention.values().cloned().fold(0.0_f64, f64::max);
    if max_mention > 0.0 {
        for v in doc_mention.values_mut() {
            *v /= max_mention;
        }
    }

    let mut combined: Vec<(String, f64)> = class_candidates
        .iter()
        .map(|cid| {
            let cs = class_scores.get(cid).copied().unwrap_or(0.0);
            let dampening = 1.0 / (1.0 + cs.abs().powf(1.5));
            let score = cs + doc_mention.get(cid).copied().unwrap_or(0.0) * dampening;
            (cid.clone(), score)
        })
        .collect();
    combined.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    combined.truncate(top_m);
    combined.into_iter().map(|(id, _)| id).collect()
}

fn promote_full_files(graph: &Graph, doc_nodes: &[(String, f64)], file_coverage: f64) -> Vec<DocResult> {
    let mut by_path: Vec<(String, Vec<String>)> = Vec::new();
    for (id, _) in doc_nodes {
        let Some(node) = graph.nodes.get(id) else { continue };
        if let Some(entry) = by_path.iter_mut().find(|(p, _)| p == &node.path) {
            entry.1.push(id.clone());
        } else {
            by_path.push((node.path.clone(), vec![id.clone()]));
        }
    }

    let mut results = Vec::new();
    for (path, ids) in by_path {
        let first = &graph.nodes[&ids[0]];
        let total = first
            .full_content
            .as_ref()
            .map(|full| chunk_markdown(full).len())
            .filter(|&n| n > 0);

        let promote = match total {
            Some(total) => (ids.len() as f64 / total as f64) >= file_coverage,
            None => false,
        };

        if promote {
            if let Some(full) = &first.full_content {
                results.push(DocResult::FullFile { path, body: full.clone() });
                continue;
            }
        }

        for id in ids {
            let node = &graph.nodes[&id];
            results.push(DocResult::Section { path: path.clone(), body: node.content.clone() });
        }
    }
    results
}

fn basename(path: &str) -> &str {
    Path::new(path).file_name().and_then(|n| n.to_str()).unwrap_or(path)
}

fn render(doc_results: &[DocResult], top_classes: &[String], graph: &Graph) -> String {
    let mut out = String::from("# Documentation Context\n");
    for result in doc_results {
        match result {
            DocResult::Section { path, body } => {
                out.push_str(&format!("## {}\n```markdown\n{body}\n```\n", basename(path)));
            }
            DocResult::FullFile { path, body } => {
                out.push_str(&format!("## FULL FILE: {}\n```markdown\n{body}\n```\n", basename(path)));
            }
        }
    }

    if !top_classes.is_empty() {
        out.push_str("\n# Related Classes\n");
        for cid in top_classes {
            if let Some(node) = graph.nodes.get(cid) {
                out.push_str(&format!("## {}\n```python\n{}\n```\n", node.name, node.content));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeMeta;

    fn class_meta(name: &str) -> NodeMeta {
        NodeMeta { kind: NodeKind::PythonClass, path: "a.py".into(), name: name.to_string(), parent: None, line: Some(1), full_content: None }
    }

    fn md_meta(path: &str, full: &str) -> NodeMeta {
        NodeMeta { kind: NodeKind::MarkdownSection, path: path.to_string(), name: String::new(), parent: None, line: None, full_content: Some(full.to_string()) }
    }

    #[test]
    fn empty_query_yields_header_only_render() {
        let graph = Graph::new();
        let out = query(&graph, "", &QueryOptions::default());
        assert_eq!(out.trim(), "# Documentation Context");
    }

    #[test]
    fn top_n_zero_yields_no_class_expansion() {
        let mut graph = Graph::new();
        graph.add_node("class Foo:\n    pass\n".to_string(), class_meta("Foo"));
        let out = query(&graph, "Foo", &QueryOptions { top_n: 0, ..QueryOptions::default() });
        assert!(!out.contains("```python"));
    }

    #[test]
    fn end_to_end_foo_scenario() {
        let mut graph = Graph::new();
        graph.add_node("class Foo:\n    pass\n".to_string(), class_meta("Foo"));
        graph.add_node("## Intro\nFoo is great\n".to_string(), md_meta("a.md", "## Intro\nFoo is great\n"));
        graph.compute_cross_edges();

        let out = query(&graph, "Foo", &QueryOptions::default());
        assert!(out.contains("# Related Classes"));
        assert!(out.contains("class Foo"));
        assert!(out.contains("a.md"));
        assert!(out.contains("Foo is great"));
    }

    #[test]
    fn file_coverage_zero_promotes_every_file() {
        let mut graph = Graph::new();
        let full = "## A\nbody a\n## B\nbody b\n";
        graph.add_node("## A\nbody a\n".to_string(), md_meta("a.md", full));
        graph.compute_cross_edges();
        let out = query(&graph, "body", &QueryOptions { file_coverage: 0.0, ..QueryOptions::default() });
        assert!(out.contains("FULL FILE"));
    }

    #[test]
    fn file_coverage_above_one_never_promotes() {
        let mut graph = Graph::new();
        let full = "## A\nbody a\n";
        graph.add_node("## A\nbody a\n".to_string(), md_meta("a.md", full));
        graph.compute_cross_edges();
        let out = query(&graph, "body", &QueryOptions { file_coverage: 1.1, ..QueryOptions::default() });
        assert!(!out.contains("FULL FILE"));
    }

    #[test]
    fn docs_with_no_related_classes_omit_the_related_classes_header() {
        let mut graph = Graph::new();
        graph.add_node("## Intro\nwidgets everywhere\n".to_string(), md_meta("a.md", "## Intro\nwidgets everywhere\n"));
        let out = query(&graph, "widgets", &QueryOptions::default());
        assert!(out.contains("# Documentation Context"));
        assert!(!out.contains("# Related Classes"));
    }

    #[test]
    fn section_headers_render_basename_not_full_path() {
        let mut graph = Graph::new();
        let full = "## Setup\nInstall the widget.\n";
        graph.add_node("## Setup\nInstall the widget.\n".to_string(), md_meta("docs/guide/setup.md", full));
        graph.compute_cross_edges();
        let out = query(&graph, "widget", &QueryOptions::default());
        assert!(out.contains("## setup.md"));
        assert!(!out.contains("docs/guide/setup.md"));
    }
}
