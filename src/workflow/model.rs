//! Workflow Data Model
//!
//! Core data structures representing the workflow AST: steps, their
//! parameter bindings, and the `wic` control block that carries per-step
//! overrides, graph styling hints and plugin namespaces.
//!
//! # Example YAML Format
//!
//! ```yaml
//! inputs:
//!   message:
//!     type: string
//!
//! steps:
//!   - touch:
//!       in:
//!         filename: !ii empty.txt
//!       out:
//!         - file: !& touched
//!   - append:
//!       in:
//!         file: !* touched
//!         str: message
//!   - cleanup.wic:
//!
//! wic:
//!   graphviz:
//!     label: Append a message
//!   steps:
//!     (3, cleanup.wic):
//!       wic:
//!         graphviz:
//!           label: Clean up
//! ```

use std::fmt;

use indexmap::IndexMap;
use log::warn;
use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_yaml::Value as YamlValue;

use super::namespace::{key_stem, override_key};
use crate::registry::tool::{InputParam, OutputParam};

/// Plugin namespace used when a step does not declare one.
pub const GLOBAL_NAMESPACE: &str = "global";

/// Identifies a tool or subworkflow within a plugin namespace.
///
/// Ordering is by stem, then namespace; it is what makes the choice
/// between several insertion candidates reproducible.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepId {
    pub stem: String,
    pub plugin_ns: String,
}

impl StepId {
    pub fn new(stem: impl Into<String>, plugin_ns: impl Into<String>) -> Self {
        Self {
            stem: stem.into(),
            plugin_ns: plugin_ns.into(),
        }
    }

    /// Creates a StepId in the global namespace.
    pub fn global(stem: impl Into<String>) -> Self {
        Self::new(stem, GLOBAL_NAMESPACE)
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.plugin_ns, self.stem)
    }
}

/// A reference to a value produced inside a compiled workflow.
///
/// `namespace` is the synthetic name of the producing step; `None` means
/// the value is one of the enclosing workflow's own inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    pub namespace: Option<String>,
    pub output: String,
}

impl SourceRef {
    /// References a workflow input.
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            output: name.into(),
        }
    }

    /// References an output of a sibling step.
    pub fn step_output(step: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            namespace: Some(step.into()),
            output: output.into(),
        }
    }

    /// Parses `ns/output` or a bare input name.
    pub fn parse(source: &str) -> Self {
        match source.split_once('/') {
            Some((ns, output)) => Self::step_output(ns, output),
            None => Self::input(source),
        }
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.output),
            None => write!(f, "{}", self.output),
        }
    }
}

/// The value bound to a step parameter.
///
/// In YAML, literals are written `!ii value`, JSON-encoded inline values
/// `!ij value`, alias references `!* label`, and bare strings name a
/// workflow input. After compilation every binding is either a
/// [`Binding::SourceRef`] or a validated [`Binding::RawVariable`].
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    /// Inline input value, extracted into the workflow inputs file
    Literal(Value),
    /// Inline structured value, extracted as a JSON-encoded string
    InlineJson(Value),
    /// Reference to an explicit edge defined with `!& label`
    AliasRef(String),
    /// Name of a workflow input (or raw passthrough)
    RawVariable(String),
    /// Resolved source reference
    SourceRef(SourceRef),
}

impl Binding {
    /// Converts a parsed YAML node into a binding.
    pub fn from_yaml(value: YamlValue) -> Result<Self, String> {
        match value {
            YamlValue::Tagged(tagged) => {
                if tagged.tag == "ii" {
                    Ok(Binding::Literal(yaml_to_json(&tagged.value)?))
                } else if tagged.tag == "ij" {
                    Ok(Binding::InlineJson(yaml_to_json(&tagged.value)?))
                } else if tagged.tag == "*" {
                    match tagged.value {
                        YamlValue::String(label) => Ok(Binding::AliasRef(label)),
                        other => Err(format!("alias label must be a string, found {:?}", other)),
                    }
                } else {
                    Err(format!("unknown tag {} in step binding", tagged.tag))
                }
            }
            YamlValue::Mapping(map) if map.len() == 1 => {
                let (key, val) = map.into_iter().next().ok_or("empty mapping")?;
                let key = key.as_str().unwrap_or_default().to_string();
                match key.as_str() {
                    "wic_inline_input" => Ok(Binding::Literal(yaml_to_json(&val)?)),
                    "wic_inline_json" => Ok(Binding::InlineJson(yaml_to_json(&val)?)),
                    "wic_alias" => val
                        .as_str()
                        .map(|s| Binding::AliasRef(s.to_string()))
                        .ok_or_else(|| "wic_alias must be a string".to_string()),
                    "source" => val
                        .as_str()
                        .map(|s| Binding::SourceRef(SourceRef::parse(s)))
                        .ok_or_else(|| "source must be a string".to_string()),
                    other => Err(format!(
                        "unsupported binding mapping '{}'; use !ii for inline values",
                        other
                    )),
                }
            }
            YamlValue::Mapping(_) | YamlValue::Sequence(_) => {
                Err("structured binding values must be tagged with !ii or !ij".to_string())
            }
            YamlValue::Null => Err("binding has no value".to_string()),
            YamlValue::String(s) => Ok(Binding::RawVariable(s)),
            YamlValue::Bool(b) => Ok(Binding::RawVariable(b.to_string())),
            YamlValue::Number(n) => Ok(Binding::RawVariable(n.to_string())),
        }
    }

    /// Shorthand for `Binding::Literal(json!(...))`.
    pub fn literal(value: impl Into<Value>) -> Self {
        Binding::Literal(value.into())
    }
}

fn yaml_to_json(value: &YamlValue) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| format!("literal is not representable as JSON: {}", e))
}

impl<'de> Deserialize<'de> for Binding {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = YamlValue::deserialize(deserializer)?;
        Binding::from_yaml(value).map_err(de::Error::custom)
    }
}

impl Serialize for Binding {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Binding::RawVariable(name) => serializer.serialize_str(name),
            Binding::Literal(v) => single_entry(serializer, "wic_inline_input", v),
            Binding::InlineJson(v) => single_entry(serializer, "wic_inline_json", v),
            Binding::AliasRef(label) => single_entry(serializer, "wic_alias", label),
            Binding::SourceRef(source) => single_entry(serializer, "source", &source.to_string()),
        }
    }
}

fn single_entry<S, V>(serializer: S, key: &str, value: &V) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize + ?Sized,
{
    let mut map = serializer.serialize_map(Some(1))?;
    map.serialize_entry(key, value)?;
    map.end()
}

/// One entry of a step's `out` list.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEntry {
    Plain(String),
    /// Output that defines an explicit edge (`- name: !& label`)
    Anchored { name: String, anchor: String },
}

impl OutputEntry {
    pub fn name(&self) -> &str {
        match self {
            OutputEntry::Plain(name) => name,
            OutputEntry::Anchored { name, .. } => name,
        }
    }

    fn from_pair(name: String, value: YamlValue) -> OutputEntry {
        let anchor = match value {
            YamlValue::Tagged(tagged) if tagged.tag == "&" => tagged.value.as_str().map(str::to_string),
            YamlValue::Mapping(map) => map
                .get("wic_anchor")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            _ => None,
        };
        match anchor {
            Some(anchor) => OutputEntry::Anchored { name, anchor },
            None => OutputEntry::Plain(name),
        }
    }

    fn from_yaml(value: YamlValue) -> Result<OutputEntry, String> {
        match value {
            YamlValue::String(name) => Ok(OutputEntry::Plain(name)),
            YamlValue::Mapping(map) => {
                if map.len() != 1 {
                    warn!("There should only be one anchor per out: list entry; using the first");
                }
                let (key, val) = map.into_iter().next().ok_or("empty out: entry")?;
                let name = key
                    .as_str()
                    .ok_or_else(|| "out: entry names must be strings".to_string())?
                    .to_string();
                Ok(OutputEntry::from_pair(name, val))
            }
            other => Err(format!("invalid out: entry {:?}", other)),
        }
    }
}

impl Serialize for OutputEntry {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            OutputEntry::Plain(name) => serializer.serialize_str(name),
            OutputEntry::Anchored { name, anchor } => {
                let mut inner = IndexMap::new();
                inner.insert("wic_anchor", anchor);
                single_entry(serializer, name, &inner)
            }
        }
    }
}

/// Deserializes the `out` list, recovering from a mapping written by mistake.
fn out_entries<'de, D>(deserializer: D) -> Result<Vec<OutputEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    match YamlValue::deserialize(deserializer)? {
        YamlValue::Null => Ok(Vec::new()),
        YamlValue::Sequence(items) => items
            .into_iter()
            .map(|v| OutputEntry::from_yaml(v).map_err(de::Error::custom))
            .collect(),
        YamlValue::Mapping(map) => {
            warn!("The `out` tag should be a list, not a dictionary! Using its keys");
            map.into_iter()
                .map(|(k, v)| match k {
                    YamlValue::String(name) => Ok(OutputEntry::from_pair(name, v)),
                    _ => Err(de::Error::custom("out: keys must be strings")),
                })
                .collect()
        }
        _ => Err(de::Error::custom("Expected a list of outputs")),
    }
}

/// Deserializes either a single string or a list of strings.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match YamlValue::deserialize(deserializer)? {
        YamlValue::Null => Ok(Vec::new()),
        YamlValue::String(s) => Ok(vec![s]),
        YamlValue::Sequence(items) => items
            .into_iter()
            .map(|v| match v {
                YamlValue::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in list")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or list of strings")),
    }
}

/// Body of a step as written in YAML, under its key.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
struct StepBody {
    #[serde(rename = "in", default, skip_serializing_if = "IndexMap::is_empty")]
    bindings: IndexMap<String, Binding>,

    #[serde(default, deserialize_with = "out_entries", skip_serializing_if = "Vec::is_empty")]
    out: Vec<OutputEntry>,

    #[serde(default, deserialize_with = "string_or_list", skip_serializing_if = "Vec::is_empty")]
    scatter: Vec<String>,

    #[serde(rename = "scatterMethod", default, skip_serializing_if = "Option::is_none")]
    scatter_method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    when: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    run: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    subtree: Option<Box<WorkflowAst>>,
}

/// A single entry of a workflow's ordered step list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Step {
    /// Raw step key (a tool stem, or a subworkflow file name like `sub.wic`)
    pub key: String,

    /// Parameter bindings (`in:`)
    pub bindings: IndexMap<String, Binding>,

    /// Declared outputs, possibly anchored (`out:`)
    pub out: Vec<OutputEntry>,

    /// Parameters scattered over
    pub scatter: Vec<String>,

    pub scatter_method: Option<String>,

    /// Conditional execution guard
    pub when: Option<String>,

    /// Fallback `run:` tag used when the key is not in the registry
    pub run: Option<String>,

    /// Preloaded subworkflow body (set by the loader)
    pub subtree: Option<Box<WorkflowAst>>,
}

impl Step {
    /// Creates a step with the given key and no bindings.
    ///
    /// # Example
    ///
    /// ```
    /// use rustweaver::workflow::{Binding, Step};
    ///
    /// let step = Step::new("touch").with_binding("filename", Binding::literal("empty.txt"));
    /// assert_eq!(step.key, "touch");
    /// ```
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into().trim().to_string(),
            ..Self::default()
        }
    }

    /// Binds a parameter.
    pub fn with_binding(mut self, name: impl Into<String>, binding: Binding) -> Self {
        self.bindings.insert(name.into(), binding);
        self
    }

    /// Appends an output entry.
    pub fn with_out(mut self, entry: OutputEntry) -> Self {
        self.out.push(entry);
        self
    }

    /// Attaches a subworkflow body.
    pub fn with_subtree(mut self, ast: WorkflowAst) -> Self {
        self.subtree = Some(Box::new(ast));
        self
    }

    /// True if this step embeds a subworkflow.
    pub fn is_subworkflow(&self) -> bool {
        self.subtree.is_some()
    }
}

impl From<(String, StepBody)> for Step {
    fn from((key, body): (String, StepBody)) -> Self {
        Step {
            key,
            bindings: body.bindings,
            out: body.out,
            scatter: body.scatter,
            scatter_method: body.scatter_method,
            when: body.when,
            run: body.run,
            subtree: body.subtree,
        }
    }
}

impl Serialize for Step {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let body = StepBody {
            bindings: self.bindings.clone(),
            out: self.out.clone(),
            scatter: self.scatter.clone(),
            scatter_method: self.scatter_method.clone(),
            when: self.when.clone(),
            run: self.run.clone(),
            subtree: self.subtree.clone(),
        };
        single_entry(serializer, &self.key, &body)
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = IndexMap::<String, Option<StepBody>>::deserialize(deserializer)?;
        if map.len() != 1 {
            return Err(de::Error::custom(format!(
                "each step must be a mapping with exactly one key, found {}",
                map.len()
            )));
        }
        let (key, body) = map.into_iter().next().ok_or_else(|| de::Error::custom("empty step"))?;
        Ok(Step::from((key.trim().to_string(), body.unwrap_or_default())))
    }
}

/// Graph styling hints.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct GraphvizHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,

    /// `"(i, key)"` references of steps to draw at the same rank
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ranksame: Vec<String>,
}

impl GraphvizHints {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.style.is_none() && self.ranksame.is_empty()
    }
}

/// The `wic:` control block of a workflow or of a step override.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct WorkflowMeta {
    /// Plugin namespace used to resolve the step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default, skip_serializing_if = "GraphvizHints::is_empty")]
    pub graphviz: GraphvizHints,

    /// Per-step overrides keyed by `"(i, key)"` (1-based)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub steps: IndexMap<String, StepOverride>,

    /// Output name → inference rule (`default`, `continue` or `break`)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inference: IndexMap<String, String>,
}

impl WorkflowMeta {
    pub fn is_empty(&self) -> bool {
        self.namespace.is_none()
            && self.graphviz.is_empty()
            && self.steps.is_empty()
            && self.inference.is_empty()
    }
}

/// Overrides applied to one step from the enclosing workflow.
///
/// Bindings given here take precedence over the step's own `in:`, which is
/// how a parent workflow overloads the arguments of an embedded step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct StepOverride {
    #[serde(default, skip_serializing_if = "WorkflowMeta::is_empty")]
    pub wic: WorkflowMeta,

    #[serde(rename = "in", default, skip_serializing_if = "IndexMap::is_empty")]
    pub bindings: IndexMap<String, Binding>,
}

/// A parsed, not-yet-compiled workflow.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct WorkflowAst {
    /// Declared workflow inputs
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub inputs: IndexMap<String, InputParam>,

    /// Declared workflow outputs (with `outputSource`)
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, OutputParam>,

    /// Ordered list of steps
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Control block
    #[serde(rename = "wic", default, skip_serializing_if = "WorkflowMeta::is_empty")]
    pub meta: WorkflowMeta,
}

impl WorkflowAst {
    /// Creates a workflow from a list of steps.
    pub fn from_steps(steps: Vec<Step>) -> Self {
        Self {
            steps,
            ..Self::default()
        }
    }

    /// Parses a workflow from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(content)
    }

    /// Returns the override registered for the step at `index`, if any.
    pub fn step_override(&self, index: usize) -> Option<&StepOverride> {
        let step = self.steps.get(index)?;
        self.meta.steps.get(&override_key(index, &step.key))
    }

    /// Returns the StepId of the step at `index`.
    ///
    /// The plugin namespace comes from the step's override, defaulting to
    /// the global namespace.
    pub fn step_id(&self, index: usize) -> Option<StepId> {
        let step = self.steps.get(index)?;
        let ns = self
            .step_override(index)
            .and_then(|o| o.wic.namespace.clone())
            .unwrap_or_else(|| GLOBAL_NAMESPACE.to_string());
        Some(StepId::new(key_stem(&step.key), ns))
    }

    /// Returns the number of steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the workflow has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// A workflow AST paired with the StepId it was loaded as.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTree {
    pub step_id: StepId,
    pub ast: WorkflowAst,
}

impl WorkflowTree {
    pub fn new(step_id: StepId, ast: WorkflowAst) -> Self {
        Self { step_id, ast }
    }

    /// File stem of the workflow (`pipelines/align.wic` → `align`).
    pub fn stem(&self) -> String {
        std::path::Path::new(&self.step_id.stem)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.step_id.stem)
            .to_string()
    }
}
