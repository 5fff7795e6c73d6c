//! Graph Accumulator
//!
//! A plain-data description of the workflow diagram, built up as the
//! compiler walks the tree. Layout and rendering are left to external
//! tools; this module only records nodes, edges and nesting.
//!
//! During compilation the compiler keeps a stack of graphs, one per
//! ancestor workflow. Explicit edges are added to the graph of the lowest
//! common ancestor of their two endpoints so that neither endpoint is
//! outside the graph that owns the edge.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::config::GraphOptions;
use crate::workflow::namespace::join_namespaces;

/// Node or edge attributes (`label`, `shape`, `color`, ...).
pub type Attrs = BTreeMap<String, String>;

/// Builds an attribute map from pairs.
pub fn attrs<const N: usize>(pairs: [(&str, &str); N]) -> Attrs {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct GraphData {
    pub name: String,

    /// Graph-level attributes (`label`, `color`, `style`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: Attrs,

    #[serde(default)]
    pub nodes: Vec<(String, Attrs)>,

    #[serde(default)]
    pub edges: Vec<(String, String, Attrs)>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subgraphs: Vec<GraphData>,

    /// Node names to be drawn at the same rank
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rank_same: Vec<String>,
}

impl GraphData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Creates the cluster graph of an embedded subworkflow.
    pub fn cluster(step_key: &str, label: &str, style: Option<&str>) -> Self {
        let mut graph = Self::new(format!("cluster_{}", step_key));
        graph.attrs.insert("label".to_string(), label.to_string());
        graph.attrs.insert("color".to_string(), "lightblue".to_string());
        if let Some(style) = style.filter(|s| !s.is_empty()) {
            graph.attrs.insert("style".to_string(), style.to_string());
        }
        graph
    }

    pub fn add_node(&mut self, name: impl Into<String>, attrs: Attrs) {
        self.nodes.push((name.into(), attrs));
    }

    pub fn add_edge(&mut self, src: impl Into<String>, dst: impl Into<String>, attrs: Attrs) {
        self.edges.push((src.into(), dst.into(), attrs));
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.nodes.iter().any(|(n, _)| n == name)
            || self.subgraphs.iter().any(|g| g.has_node(name))
    }

    /// Total number of edges, including those of nested subgraphs.
    pub fn edge_count(&self) -> usize {
        self.edges.len() + self.subgraphs.iter().map(GraphData::edge_count).sum::<usize>()
    }
}

/// Adds an edge between two namespace paths.
///
/// Both paths are truncated to the configured inline depth, so edges into
/// collapsed subworkflows attach to the node that represents them.
pub fn add_graph_edge(
    options: &GraphOptions,
    graph: &mut GraphData,
    from: &[String],
    to: &[String],
    label: &str,
    color: &str,
) {
    let depth = options.inline_depth + 1;
    let src = join_namespaces(&from[..from.len().min(depth)]);
    let dst = join_namespaces(&to[..to.len().min(depth)]);

    let mut edge_attrs = attrs([("color", color)]);
    if !label.is_empty() {
        edge_attrs.insert("label".to_string(), label.to_string());
    }
    let font = if options.dark_theme { "white" } else { "black" };
    edge_attrs.insert("fontcolor".to_string(), font.to_string());

    graph.add_edge(src, dst, edge_attrs);
}

/// Attaches the graphs of compiled subworkflows to their parent's graph.
///
/// Subworkflows at or below the inline depth are not attached; they are
/// already represented by a single collapsed node.
pub fn add_subgraphs(
    options: &GraphOptions,
    graph: &mut GraphData,
    sibling_subgraphs: Vec<GraphData>,
    depth: usize,
    rank_same: Vec<String>,
) {
    if depth < options.inline_depth {
        graph.subgraphs.extend(sibling_subgraphs);
    }
    graph.rank_same.extend(rank_same);
}

/// Index into the ancestor graph stack of the workflow at `depth`.
///
/// The stack may be shorter than the namespace path when a subworkflow is
/// compiled on its own; missing ancestors map to the outermost graph.
pub fn stack_index(stack_len: usize, namespaces_len: usize, depth: usize) -> usize {
    let offset = (namespaces_len + 1).saturating_sub(stack_len);
    depth.saturating_sub(offset).min(stack_len.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_add_graph_edge_truncates_to_inline_depth() {
        let options = GraphOptions {
            inline_depth: 0,
            ..GraphOptions::default()
        };
        let mut graph = GraphData::new("root");
        add_graph_edge(&options, &mut graph, &path(&["a", "b"]), &path(&["c", "d"]), "file", "blue");

        let (src, dst, attrs) = &graph.edges[0];
        assert_eq!(src, "a");
        assert_eq!(dst, "c");
        assert_eq!(attrs["color"], "blue");
        assert_eq!(attrs["label"], "file");
    }

    #[test]
    fn test_add_graph_edge_full_names() {
        let mut graph = GraphData::new("root");
        add_graph_edge(
            &GraphOptions::default(),
            &mut graph,
            &path(&["a", "b"]),
            &path(&["c"]),
            "",
            "black",
        );
        assert_eq!(graph.edges[0].0, "a___b");
        assert!(!graph.edges[0].2.contains_key("label"));
    }

    #[test]
    fn test_add_subgraphs_respects_depth() {
        let options = GraphOptions {
            inline_depth: 1,
            ..GraphOptions::default()
        };
        let mut graph = GraphData::new("root");
        add_subgraphs(&options, &mut graph, vec![GraphData::new("cluster_a")], 0, vec![]);
        add_subgraphs(&options, &mut graph, vec![GraphData::new("cluster_b")], 1, vec![]);
        assert_eq!(graph.subgraphs.len(), 1);
    }

    #[test]
    fn test_cluster_attributes() {
        let graph = GraphData::cluster("sub.wic", "Subworkflow", Some("dashed"));
        assert_eq!(graph.name, "cluster_sub.wic");
        assert_eq!(graph.attrs["style"], "dashed");
    }

    #[test]
    fn test_stack_index() {
        // Full stack: root graph plus one per namespace
        assert_eq!(stack_index(3, 2, 1), 1);
        // Subworkflow compiled on its own with a single graph
        assert_eq!(stack_index(1, 2, 1), 0);
        assert_eq!(stack_index(1, 2, 2), 0);
    }
}
