//! Compiled Artifacts
//!
//! Types produced by the compiler:
//!
//! - [`CompiledWorkflow`]: the flat IR document of one workflow
//! - [`RoseTree`] of [`NodeData`]: one node per compiled unit
//! - [`EnvData`]: state threaded between a subworkflow and its parent
//! - [`CompilerInfo`]: the pair returned by every compilation

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::graph::GraphData;
use crate::registry::tool::{InputParam, OutputParam, ParamType, ToolInterface};
use crate::workflow::model::{Binding, WorkflowAst};

/// Namespace path of an explicit edge endpoint plus the variable name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExplicitEdge {
    pub namespaces: Vec<String>,
    pub var: String,
}

impl ExplicitEdge {
    pub fn new(namespaces: Vec<String>, var: impl Into<String>) -> Self {
        Self {
            namespaces,
            var: var.into(),
        }
    }
}

/// Edge label → definition site.
pub type ExplicitEdgeDefs = BTreeMap<String, ExplicitEdge>;

/// Label or namespaced input name → call site information.
pub type ExplicitEdgeCalls = BTreeMap<String, ExplicitEdge>;

/// A literal value extracted into the inputs file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InputsFileEntry {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub format: Vec<String>,
    pub value: Value,
}

/// Environment threaded through the recursion.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvData {
    /// Workflow input → the namespaced step inputs it feeds
    pub input_mapping: IndexMap<String, Vec<String>>,
    /// Workflow output → the namespaced step output it forwards
    pub output_mapping: IndexMap<String, String>,
    /// Namespaced literal inputs collected from this workflow and below
    pub inputs_file_workflow: IndexMap<String, InputsFileEntry>,
    /// `step/output` references consumed by a later step
    pub vars_workflow_output_internal: Vec<String>,
    pub explicit_edge_defs: ExplicitEdgeDefs,
    pub explicit_edge_calls: ExplicitEdgeCalls,
}

/// A `requirements:` entry of a compiled workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub class: String,
}

pub const SUBWORKFLOW_REQUIREMENT: &str = "SubworkflowFeatureRequirement";
pub const SCATTER_REQUIREMENT: &str = "ScatterFeatureRequirement";
pub const JAVASCRIPT_REQUIREMENT: &str = "InlineJavascriptRequirement";

/// One step of a compiled workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompiledStep {
    pub id: String,
    pub run: String,

    #[serde(rename = "in", default)]
    pub bindings: IndexMap<String, Binding>,

    #[serde(default)]
    pub out: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scatter: Vec<String>,

    #[serde(rename = "scatterMethod", default, skip_serializing_if = "Option::is_none")]
    pub scatter_method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

/// A flat, namespaced workflow document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CompiledWorkflow {
    #[serde(rename = "cwlVersion")]
    pub cwl_version: String,

    pub class: String,

    #[serde(rename = "$namespaces", default)]
    pub namespaces: BTreeMap<String, String>,

    #[serde(rename = "$schemas", default)]
    pub schemas: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requirements: Vec<Requirement>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default)]
    pub inputs: IndexMap<String, InputParam>,

    #[serde(default)]
    pub outputs: IndexMap<String, OutputParam>,

    #[serde(default)]
    pub steps: Vec<CompiledStep>,
}

const EDAM_NAMESPACE: &str = "https://edamontology.org/";
const EDAM_SCHEMA: &str = "https://raw.githubusercontent.com/edamontology/edamontology/master/EDAM_dev.owl";

impl CompiledWorkflow {
    /// Creates an empty workflow with the standard headers.
    pub fn new() -> Self {
        let mut namespaces = BTreeMap::new();
        namespaces.insert("edam".to_string(), EDAM_NAMESPACE.to_string());

        Self {
            cwl_version: "v1.2".to_string(),
            class: "Workflow".to_string(),
            namespaces,
            schemas: vec![EDAM_SCHEMA.to_string()],
            requirements: Vec::new(),
            label: None,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            steps: Vec::new(),
        }
    }

    /// Adds a requirement unless already present.
    pub fn require(&mut self, class: &str) {
        if !self.requirements.iter().any(|r| r.class == class) {
            self.requirements.push(Requirement {
                class: class.to_string(),
            });
        }
    }

    /// The interface this workflow exposes when used as a step.
    pub fn interface(&self) -> ToolInterface {
        ToolInterface {
            class: self.class.clone(),
            inputs: self
                .inputs
                .iter()
                .map(|(k, v)| (k.clone(), v.interface_copy()))
                .collect(),
            outputs: self
                .outputs
                .iter()
                .map(|(k, v)| (k.clone(), v.interface_copy()))
                .collect(),
            extra: BTreeMap::new(),
        }
    }

    /// Copy with every `run:` path blanked, for comparing compilations
    /// that only differ in where files would be written.
    pub fn without_run_paths(&self) -> Self {
        let mut copy = self.clone();
        for step in copy.steps.iter_mut() {
            step.run.clear();
        }
        copy
    }
}

impl Default for CompiledWorkflow {
    fn default() -> Self {
        Self::new()
    }
}

/// The compiled form of a tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledUnit {
    Tool(ToolInterface),
    Workflow(CompiledWorkflow),
}

impl CompiledUnit {
    pub fn as_workflow(&self) -> Option<&CompiledWorkflow> {
        match self {
            CompiledUnit::Workflow(wf) => Some(wf),
            CompiledUnit::Tool(_) => None,
        }
    }

    /// The interface of the unit as seen by a parent step.
    pub fn interface(&self) -> ToolInterface {
        match self {
            CompiledUnit::Tool(tool) => tool.clone(),
            CompiledUnit::Workflow(wf) => wf.interface(),
        }
    }
}

/// Data stored at each node of the compiled tree.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeData {
    /// Path of synthetic step names from the root to this unit
    pub namespaces: Vec<String>,
    /// File stem of the unit
    pub name: String,
    /// Run path the parent step refers to
    pub run_path: String,
    /// Converged AST (workflows only)
    pub ast: Option<WorkflowAst>,
    pub compiled: CompiledUnit,
    /// Values for the inputs file (workflows only)
    pub inputs_file: IndexMap<String, Value>,
    /// Explicit edge definitions as received from the parent, unmodified
    pub explicit_edge_defs: ExplicitEdgeDefs,
    /// Explicit edge call sites as received from the parent, unmodified
    pub explicit_edge_calls: ExplicitEdgeCalls,
    /// Graph snapshot of this unit
    pub graph: GraphData,
    /// Workflow inputs created by this unit's compilation
    pub inputs_added: Vec<String>,
    /// Graph node name of the first step
    pub step_name_1: String,
    /// Namespaced names of required parameters left unbound
    pub unresolved: Vec<String>,
}

impl NodeData {
    /// Creates the node of an atomic tool step.
    pub fn leaf(namespaces: Vec<String>, name: String, run_path: String, interface: ToolInterface) -> Self {
        Self {
            namespaces,
            name,
            run_path,
            ast: None,
            compiled: CompiledUnit::Tool(interface),
            inputs_file: IndexMap::new(),
            explicit_edge_defs: ExplicitEdgeDefs::new(),
            explicit_edge_calls: ExplicitEdgeCalls::new(),
            graph: GraphData::default(),
            inputs_added: Vec::new(),
            step_name_1: String::new(),
            unresolved: Vec::new(),
        }
    }

    pub fn is_workflow(&self) -> bool {
        matches!(self.compiled, CompiledUnit::Workflow(_))
    }
}

/// A tree where every node carries data and an ordered list of children.
#[derive(Debug, Clone, PartialEq)]
pub struct RoseTree {
    pub data: NodeData,
    pub children: Vec<RoseTree>,
}

impl RoseTree {
    pub fn new(data: NodeData, children: Vec<RoseTree>) -> Self {
        Self { data, children }
    }

    /// Visits every node depth-first, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a RoseTree)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Collects every node in pre-order.
    pub fn flatten(&self) -> Vec<&RoseTree> {
        let mut nodes = Vec::new();
        self.walk(&mut |node| nodes.push(node));
        nodes
    }
}

/// Result of compiling one workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilerInfo {
    pub rose: RoseTree,
    pub env: EnvData,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tool::ParamType;

    #[test]
    fn test_compiled_workflow_headers() {
        let wf = CompiledWorkflow::new();
        let yaml = serde_yaml::to_string(&wf).unwrap();
        assert!(yaml.contains("cwlVersion: v1.2"));
        assert!(yaml.contains("$namespaces"));
        assert!(wf.requirements.is_empty());
    }

    #[test]
    fn test_require_is_idempotent() {
        let mut wf = CompiledWorkflow::new();
        wf.require(SCATTER_REQUIREMENT);
        wf.require(SCATTER_REQUIREMENT);
        assert_eq!(wf.requirements.len(), 1);
    }

    #[test]
    fn test_interface_drops_output_sources() {
        let mut wf = CompiledWorkflow::new();
        let mut out = OutputParam::new(ParamType::named("File"));
        out.output_source = Some("a/file".to_string());
        wf.outputs.insert("a___file".to_string(), out);
        wf.inputs.insert("a___n".to_string(), InputParam::new(ParamType::named("int")));

        let interface = wf.interface();
        assert_eq!(interface.class, "Workflow");
        assert!(interface.outputs["a___file"].output_source.is_none());
        assert_eq!(interface.inputs.len(), 1);
    }

    #[test]
    fn test_rose_tree_flatten_order() {
        let leaf = |name: &str| {
            RoseTree::new(
                NodeData::leaf(vec![name.to_string()], name.to_string(), String::new(), ToolInterface::command_line_tool()),
                vec![],
            )
        };
        let mut root = leaf("root");
        let mut mid = leaf("mid");
        mid.children.push(leaf("deep"));
        root.children.push(mid);
        root.children.push(leaf("last"));

        let names: Vec<&str> = root.flatten().iter().map(|n| n.data.name.as_str()).collect();
        assert_eq!(names, vec!["root", "mid", "deep", "last"]);
    }
}
