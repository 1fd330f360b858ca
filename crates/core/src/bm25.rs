//! Okapi BM25 ranking, `k1 = 1.5`, `b = 0.75`, `+1`-smoothed idf.
//!
//! Two entry points: `bm25_search` scores every candidate reachable
//! through the graph's inverted index; `bm25_over` recomputes the same
//! formula against an arbitrary, caller-supplied candidate list (used by
//! the query engine's class-expansion stage, where `N`/`avgdl`/`df` must
//! be drawn from the candidate set, not the whole graph).

use std::collections::{HashMap, HashSet};

use crate::graph::{tokenize, Graph, NodeKind};

const K1: f64 = 1.5;
const B: f64 = 0.75;

fn split_len(s: &str) -> usize {
    s.split_whitespace().count()
}

fn term_count(doc_lower: &str, term: &str) -> usize {
    doc_lower.matches(term).count()
}

/// Score every node reachable through the inverted index against `query`,
/// excluding nodes whose kind is in `exclude_kinds`. Ties break by
/// insertion order (earlier `documents` index wins).
pub fn bm25_search(
    graph: &Graph,
    query: &str,
    top_n: usize,
    exclude_kinds: &HashSet<NodeKind>,
) -> Vec<(String, f64)> {
    if top_n == 0 {
        return Vec::new();
    }

    let n = graph.documents.len();
    if n == 0 {
        return Vec::new();
    }
    let avgdl = graph.documents.iter().map(|d| split_len(d) as f64).sum::<f64>() / n as f64;

    let query_tokens = tokenize(query);
    let mut scores: HashMap<String, f64> = HashMap::new();

    for t in &query_tokens {
        let Some(postings) = graph.inverted_index.get(t) else { continue };
        let df = postings.len();
        if df == 0 {
            continue;
        }
        let idf = (((n as f64 - df as f64 + 0.5) / (df as f64 + 0.5)) + 1.0).ln();

        for id in postings {
            let Some(node) = graph.nodes.get(id) else { continue };
            if exclude_kinds.contains(&node.kind) {
                continue;
            }
            let doc_lower = node.content.to_lowercase();
            let tf = term_count(&doc_lower, t) as f64;
            let dl = split_len(&node.content) as f64;
            let denom = tf + K1 * (1.0 - B + B * dl / avgdl);
            let contribution = idf * (tf * (K1 + 1.0)) / denom;
            *scores.entry(id.clone()).or_insert(0.0) += contribution;
        }
    }

    rank(scores, graph, top_n)
}

fn rank(scores: HashMap<String, f64>, graph: &Graph, top_n: usize) -> Vec<(String, f64)> {
    let mut items: Vec<(String, f64)> = scores.into_iter().collect();
    items.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let oa = graph.nodes.get_index_of(&a.0).unwrap_or(usize::MAX);
                let ob = graph.nodes.get_index_of(&b.0).unwrap_or(usize::MAX);
                oa.cmp(&ob)
            })
    });
    items.truncate(top_n);
    items
}

/// Ad-hoc BM25 over a caller-supplied candidate list. `N`, `df`, and
/// `avgdl` are all recomputed from `candidates` alone.
pub fn bm25_over(query: &str, candidates: &[(String, String)]) -> HashMap<String, f64> {
    let n = candidates.len();
    if n == 0 {
        return HashMap::new();
    }
    let avgdl = candidates.iter().map(|(_, c)| split_len(c) as f64).sum::<f64>() / n as f64;

    let query_tokens = tokenize(query);
    let mut df: HashMap<&str, usize> = HashMap::new();
    let lowered: Vec<(String, String)> =
        candidates.iter().map(|(id, c)| (id.clone(), c.to_lowercase())).collect();

    for t in &query_tokens {
        let count = lowered.iter().filter(|(_, c)| c.contains(t.as_str())).count();
        if count > 0 {
            df.insert(t.as_str(), count);
        }
    }

    let mut scores: HashMap<String, f64> = HashMap::new();
    for (id, content) in candidates {
        let doc_lower = content.to_lowercase();
        let dl = split_len(content) as f64;
        let mut score = 0.0;
        for t in &query_tokens {
            let Some(&d) = df.get(t.as_str()) else { continue };
            let idf = (((n as f64 - d as f64 + 0.5) / (d as f64 + 0.5)) + 1.0).ln();
            let tf = term_count(&doc_lower, t) as f64;
            let denom = tf + K1 * (1.0 - B + B * dl / avgdl);
            score += idf * (tf * (K1 + 1.0)) / denom;
        }
        scores.insert(id.clone(), score);
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NodeMeta;

    fn md_meta(path: &str) -> NodeMeta {
        NodeMeta { kind: NodeKind::MarkdownSection, path: path.to_string(), name: String::new(), parent: None, line: None, full_content: None }
    }

    #[test]
    fn empty_query_every_token_zero_df_returns_empty() {
        let mut g = Graph::new();
        g.add_node("## Intro\nhello world".to_string(), md_meta("a.md"));
        let result = bm25_search(&g, "nonexistentterm", 10, &HashSet::new());
        assert!(result.is_empty());
    }

    #[test]
    fn top_n_zero_returns_no_results() {
        let mut g = Graph::new();
        g.add_node("## Intro\nhello world".to_string(), md_meta("a.md"));
        let result = bm25_search(&g, "hello", 0, &HashSet::new());
        assert!(result.is_empty());
    }

    #[test]
    fn exclude_kinds_filters_candidates() {
        let mut g = Graph::new();
        g.add_node("class Foo:\n    pass\n".to_string(), NodeMeta { kind: NodeKind::PythonClass, path: "a.py".into(), name: "Foo".into(), parent: None, line: None, full_content: None });
        let mut exclude = HashSet::new();
        exclude.insert(NodeKind::PythonClass);
        let result = bm25_search(&g, "foo", 10, &exclude);
        assert!(result.is_empty());
    }

    #[test]
    fn bm25_over_recomputes_from_candidates_only() {
        let candidates = vec![
            ("1".to_string(), "foo bar baz".to_string()),
            ("2".to_string(), "foo foo foo".to_string()),
        ];
        let scores = bm25_over("foo", &candidates);
        assert!(scores["2"] > scores["1"], "higher term frequency should score higher");
    }
}
