//! Splits markdown into heading-bounded sections and Python source into
//! one chunk per class/function definition.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSetBuilder};
use ignore::WalkBuilder;
use rayon::prelude::*;
use tracing::instrument;
use tree_sitter::{Node, Parser};

use crate::error::{DoctalkError, Result};
use crate::graph::{Graph, NodeKind, NodeMeta};

/// A chunk ready to be inserted into the graph.
pub struct RawChunk {
    pub content: String,
    pub meta: NodeMeta,
}

/// Walk `root` collecting files with one of `extensions`, skipping any
/// whose full path matches one of the `exclude` globs.
fn collect_files(root: &Path, extensions: &[&str], exclude: &[String]) -> Result<Vec<PathBuf>> {
    let mut builder = GlobSetBuilder::new();
    for pattern in exclude {
        builder.add(Glob::new(pattern).map_err(|e| DoctalkError::Serialization(e.to_string()))?);
    }
    let excludes = builder.build().map_err(|e| DoctalkError::Serialization(e.to_string()))?;

    let mut files = Vec::new();
    let mut walker = WalkBuilder::new(root);
    walker.git_ignore(false).git_exclude(false).hidden(false);
    for entry in walker.build() {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| extensions.contains(&e))
            .unwrap_or(false);
        if !matches_ext {
            continue;
        }
        if excludes.is_match(path) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    Ok(files)
}

// ---------------------------------------------------------------------------
// Markdown
// ---------------------------------------------------------------------------

/// Split `content` at every heading line of level `>= 2` (`^##+ `),
/// keeping each heading with the text up to (not including) the next
/// such heading. Empty fragments are discarded.
pub fn chunk_markdown(content: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();

    for line in content.lines() {
        let is_heading = {
            let trimmed = line.trim_start();
            let hashes: usize = trimmed.chars().take_while(|&c| c == '#').count();
            hashes >= 2 && trimmed.as_bytes().get(hashes) == Some(&b' ')
        };
        if is_heading && !current.is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.is_empty() {
        sections.push(current);
    }

    sections.into_iter().filter(|s| !s.trim().is_empty()).collect()
}

fn chunk_markdown_file(path: &Path, rel_path: &str) -> Result<Vec<RawChunk>> {
    let content = std::fs::read_to_string(path)?;
    let sections = chunk_markdown(&content);
    Ok(sections
        .into_iter()
        .map(|section| RawChunk {
            content: section,
            meta: NodeMeta {
                kind: NodeKind::MarkdownSection,
                path: rel_path.to_string(),
                name: String::new(),
                parent: None,
                line: None,
                full_content: Some(content.clone()),
            },
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Python
// ---------------------------------------------------------------------------

/// Recursively walk a Python parse tree, emitting one chunk per
/// `class_definition`/`function_definition` node. `labels` is the
/// `>`-joined chain of `class <name>`/`def <name>` ancestor labels;
/// `enclosing_class` is the lowercased name of the nearest enclosing
/// class, used as the `parent` of function chunks.
fn walk_python(
    node: Node,
    source: &[u8],
    rel_path: &str,
    labels: &[String],
    enclosing_class: Option<&str>,
    out: &mut Vec<RawChunk>,
) {
    let kind = node.kind();
    if kind == "class_definition" || kind == "function_definition" {
        let name = node
            .child_by_field_name("name")
            .and_then(|n| n.utf8_text(source).ok())
            .unwrap_or("")
            .to_string();
        let span = node.utf8_text(source).unwrap_or("").to_string();
        let line = node.start_position().row + 1;

        if kind == "class_definition" {
            let parent = if labels.is_empty() { None } else { Some(labels.join(">")) };
            out.push(RawChunk {
                content: span,
                meta: NodeMeta {
                    kind: NodeKind::PythonClass,
                    path: rel_path.to_string(),
                    name: name.clone(),
                    parent,
                    line: Some(line),
                    full_content: None,
                },
            });

            let mut next_labels = labels.to_vec();
            next_labels.push(format!("class {name}"));
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                walk_python(child, source, rel_path, &next_labels, Some(&name.to_lowercase()), out);
            }
        } else {
            out.push(RawChunk {
                content: span,
                meta: NodeMeta {
                    kind: NodeKind::PythonFunction,
                    path: rel_path.to_string(),
                    name: name.clone(),
                    parent: enclosing_class.map(|s| s.to_string()),
                    line: Some(line),
                    full_content: None,
                },
            });

            let mut next_labels = labels.to_vec();
            next_labels.push(format!("def {name}"));
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                // A function body is not a class — descending functions no
                // longer have an enclosing class unless one's still open via
                // `labels`, but §4.2 only asks for the immediate enclosing
                // class of a *function* chunk, so nested defs still see the
                // same `enclosing_class` their parent function saw.
                walk_python(child, source, rel_path, &next_labels, enclosing_class, out);
            }
        }
    } else {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk_python(child, source, rel_path, labels, enclosing_class, out);
        }
    }
}

fn chunk_python_file(path: &Path, rel_path: &str) -> Result<Vec<RawChunk>> {
    let content = std::fs::read_to_string(path)?;
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| DoctalkError::ParseError { path: path.to_path_buf(), message: e.to_string() })?;
    let tree = parser.parse(&content, None).ok_or_else(|| DoctalkError::ParseError {
        path: path.to_path_buf(),
        message: "tree-sitter returned no parse tree".to_string(),
    })?;

    let mut out = Vec::new();
    walk_python(tree.root_node(), content.as_bytes(), rel_path, &[], None, &mut out);
    Ok(out)
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

fn rel_path_str(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/")
}

/// Chunk every `*.py` file under `code_root` and every `*.md` file under
/// `docs_root`, inserting code chunks first so `class_registry` is
/// populated before markdown cross-edges are computed. Files that fail to
/// parse are skipped with a warning; the build continues.
#[instrument(skip(exclude), fields(code_root = ?code_root, docs_root = ?docs_root))]
pub fn build_graph(
    code_root: Option<&Path>,
    docs_root: Option<&Path>,
    exclude: &[String],
) -> Result<Graph> {
    if code_root.is_none() && docs_root.is_none() {
        return Err(DoctalkError::EmptySources);
    }

    let mut graph = Graph::new();

    if let Some(root) = code_root {
        let files = collect_files(root, &["py"], exclude)?;
        let chunks: Vec<RawChunk> = files
            .par_iter()
            .filter_map(|path| {
                let rel = rel_path_str(root, path);
                match chunk_python_file(path, &rel) {
                    Ok(chunks) => Some(chunks),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping file that failed to parse");
                        None
                    }
                }
            })
            .flatten()
            .collect();
        for chunk in chunks {
            graph.add_node(chunk.content, chunk.meta);
        }
    }

    if let Some(root) = docs_root {
        let files = collect_files(root, &["md"], exclude)?;
        let chunks: Vec<RawChunk> = files
            .par_iter()
            .filter_map(|path| {
                let rel = rel_path_str(root, path);
                match chunk_markdown_file(path, &rel) {
                    Ok(chunks) => Some(chunks),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "skipping file that failed to read");
                        None
                    }
                }
            })
            .flatten()
            .collect();
        for chunk in chunks {
            graph.add_node(chunk.content, chunk.meta);
        }
    }

    graph.compute_cross_edges();
    tracing::info!(nodes = graph.nodes.len(), "built graph");
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_splits_on_level_two_headings_and_keeps_trailing_text() {
        let content = "# Title\nintro text\n## A\nbody a\n## B\nbody b\n";
        let sections = chunk_markdown(content);
        assert_eq!(sections.len(), 2);
        assert!(sections[0].starts_with("## A"));
        assert!(sections[1].starts_with("## B"));
    }

    #[test]
    fn markdown_discards_empty_fragments() {
        let content = "## A\n\n## B\nbody\n";
        let sections = chunk_markdown(content);
        assert!(sections.iter().all(|s| !s.trim().is_empty()));
    }

    #[test]
    fn python_nested_class_gets_parent_chain() {
        let content = "class Outer:\n    class Inner:\n        pass\n";
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_python::LANGUAGE.into()).unwrap();
        let tree = parser.parse(content, None).unwrap();
        let mut out = Vec::new();
        walk_python(tree.root_node(), content.as_bytes(), "a.py", &[], None, &mut out);
        let inner = out.iter().find(|c| c.meta.name == "Inner").unwrap();
        assert_eq!(inner.meta.parent.as_deref(), Some("class Outer"));
    }

    #[test]
    fn python_method_parent_is_enclosing_class_name() {
        let content = "class Foo:\n    def bar(self):\n        pass\n";
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_python::LANGUAGE.into()).unwrap();
        let tree = parser.parse(content, None).unwrap();
        let mut out = Vec::new();
        walk_python(tree.root_node(), content.as_bytes(), "a.py", &[], None, &mut out);
        let method = out.iter().find(|c| c.meta.name == "bar").unwrap();
        assert_eq!(method.meta.parent.as_deref(), Some("foo"));
    }

    #[test]
    fn top_level_function_has_no_parent() {
        let content = "def standalone():\n    pass\n";
        let mut parser = Parser::new();
        parser.set_language(&tree_sitter_python::LANGUAGE.into()).unwrap();
        let tree = parser.parse(content, None).unwrap();
        let mut out = Vec::new();
        walk_python(tree.root_node(), content.as_bytes(), "a.py", &[], None, &mut out);
        assert_eq!(out[0].meta.parent, None);
    }

    #[test]
    fn empty_sources_is_fatal() {
        let result = build_graph(None, None, &[]);
        assert!(matches!(result, Err(DoctalkError::EmptySources)));
    }
}
