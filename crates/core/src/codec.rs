//! Versioned, zstd-compressed, msgpack-encoded index file, loaded via
//! memory-mapped I/O.
//!
//! Layout (big-endian):
//! ```text
//! offset 0  : 6 bytes magic     = "C4AIV2"
//! offset 6  : 4 bytes version   = 2 (u32)
//! offset 10 : 8 bytes body_len  = L (u64)
//! offset 18 : L bytes body      = zstd_compress(level=3, msgpack(state))
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;
use serde::{Deserialize, Serialize};

use crate::error::{DoctalkError, Result};
use crate::graph::Graph;

pub const MAGIC: &[u8; 6] = b"C4AIV2";
pub const VERSION: u32 = 2;
const ZSTD_LEVEL: i32 = 3;

/// The persisted body. `graph` carries the legacy nested `graph` key
/// (spec.md §9 Open Question 2), here repurposed to carry `cross_edges`
/// so they survive a round trip without re-tokenizing on load.
///
/// Every map here is a `BTreeMap`/`BTreeSet` rather than the in-memory
/// `HashMap`/`HashSet`, so two builds of the same tree serialize to
/// identical bytes — `std::collections::HashMap`'s iteration order is
/// randomized per-process and would otherwise make the index file
/// non-reproducible.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedState {
    graph: PersistedGraph,
    code_root: Option<String>,
    docs_root: Option<String>,
    exclude: Vec<String>,
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedGraph {
    nodes: indexmap::IndexMap<String, crate::graph::Node>,
    inverted_index: BTreeMap<String, Vec<String>>,
    class_registry: BTreeMap<String, String>,
    function_registry: BTreeMap<String, String>,
    parent_map: BTreeMap<String, String>,
    documents: Vec<String>,
    /// Legacy slot, repurposed to carry `cross_edges`.
    graph: BTreeMap<String, BTreeSet<String>>,
}

/// Non-graph build parameters persisted alongside the graph so a reload
/// can reproduce the same `build_graph` call.
#[derive(Debug, Clone, Default)]
pub struct BuildParams {
    pub code_root: Option<String>,
    pub docs_root: Option<String>,
    pub exclude: Vec<String>,
}

/// Serialize `graph` + `params` and write the result atomically to `path`
/// (write to a sibling temp file, then rename).
pub fn persist(path: &Path, graph: &Graph, params: &BuildParams) -> Result<()> {
    let state = PersistedState {
        graph: PersistedGraph {
            nodes: graph.nodes.clone(),
            inverted_index: graph.inverted_index.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            class_registry: graph.class_registry.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            function_registry: graph.function_registry.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            parent_map: graph.parent_map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            documents: graph.documents.clone(),
            graph: graph
                .cross_edges
                .iter()
                .map(|(k, v)| (k.clone(), v.iter().cloned().collect::<BTreeSet<_>>()))
                .collect(),
        },
        code_root: params.code_root.clone(),
        docs_root: params.docs_root.clone(),
        exclude: params.exclude.clone(),
        version: VERSION,
    };

    let msgpack = rmp_serde::to_vec_named(&state).map_err(|e| DoctalkError::Serialization(e.to_string()))?;
    let compressed = zstd::encode_all(msgpack.as_slice(), ZSTD_LEVEL)?;

    let mut buf = Vec::with_capacity(18 + compressed.len());
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_be_bytes());
    buf.extend_from_slice(&(compressed.len() as u64).to_be_bytes());
    buf.extend_from_slice(&compressed);

    let tmp_path = path.with_extension("c4ai.tmp");
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(&buf)?;
        f.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Memory-maps `path` read-only, verifies the header, and reconstructs
/// the graph without re-tokenizing. Referential integrity between the
/// persisted maps is not re-validated — callers trust writers of the
/// same version.
pub struct LoadedIndex {
    pub graph: Graph,
    pub params: BuildParams,
    _mmap: Mmap,
}

pub fn load(path: &Path) -> Result<LoadedIndex> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };

    if mmap.len() < 18 || &mmap[0..6] != MAGIC {
        return Err(DoctalkError::BadIndexFormat);
    }
    let version = u32::from_be_bytes(mmap[6..10].try_into().unwrap());
    if version != VERSION {
        return Err(DoctalkError::VersionMismatch { expected: VERSION, found: version });
    }
    let body_len = u64::from_be_bytes(mmap[10..18].try_into().unwrap()) as usize;
    let body = &mmap[18..18 + body_len];

    let decompressed = zstd::decode_all(body)?;
    let state: PersistedState =
        rmp_serde::from_slice(&decompressed).map_err(|e| DoctalkError::Serialization(e.to_string()))?;

    let graph = Graph {
        nodes: state.graph.nodes,
        inverted_index: state.graph.inverted_index.into_iter().collect(),
        documents: state.graph.documents,
        class_registry: state.graph.class_registry.into_iter().collect(),
        function_registry: state.graph.function_registry.into_iter().collect(),
        parent_map: state.graph.parent_map.into_iter().collect(),
        cross_edges: state.graph.graph.into_iter().map(|(k, v)| (k, v.into_iter().collect())).collect(),
    };

    Ok(LoadedIndex {
        graph,
        params: BuildParams { code_root: state.code_root, docs_root: state.docs_root, exclude: state.exclude },
        _mmap: mmap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeKind, NodeMeta};

    fn sample_graph() -> Graph {
        let mut g = Graph::new();
        g.add_node(
            "class Foo:\n    pass\n".to_string(),
            NodeMeta { kind: NodeKind::PythonClass, path: "a.py".into(), name: "Foo".into(), parent: None, line: Some(1), full_content: None },
        );
        g.add_node(
            "## Intro\nFoo is great\n".to_string(),
            NodeMeta { kind: NodeKind::MarkdownSection, path: "a.md".into(), name: String::new(), parent: None, line: None, full_content: Some("## Intro\nFoo is great\n".into()) },
        );
        g.compute_cross_edges();
        g
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.c4ai");
        let graph = sample_graph();
        let params = BuildParams { code_root: Some("code".into()), docs_root: Some("docs".into()), exclude: vec!["*.lock".into()] };

        persist(&path, &graph, &params).unwrap();
        let loaded = load(&path).unwrap();

        assert_eq!(loaded.graph.nodes.len(), graph.nodes.len());
        assert_eq!(loaded.graph.inverted_index, graph.inverted_index);
        assert_eq!(loaded.graph.class_registry, graph.class_registry);
        assert_eq!(loaded.graph.function_registry, graph.function_registry);
        assert_eq!(loaded.graph.parent_map, graph.parent_map);
        assert_eq!(loaded.graph.documents, graph.documents);
        assert_eq!(loaded.graph.cross_edges, graph.cross_edges);
        assert_eq!(loaded.params.exclude, params.exclude);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.c4ai");
        std::fs::write(&path, b"NOTMAGIC000000000").unwrap();
        assert!(matches!(load(&path), Err(DoctalkError::BadIndexFormat)));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("v.c4ai");
        let mut buf = Vec::new();
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&99u32.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
        std::fs::write(&path, buf).unwrap();
        assert!(matches!(load(&path), Err(DoctalkError::VersionMismatch { .. })));
    }
}
