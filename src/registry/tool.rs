//! Tool Interface Model
//!
//! Describes what the compiler needs to know about a step target: its
//! declared inputs (with type, default and format), its declared outputs,
//! and whether it is an atomic command line tool or a composite workflow.
//!
//! # Example YAML Format
//!
//! ```yaml
//! class: CommandLineTool
//! baseCommand: touch
//! inputs:
//!   filename:
//!     type: string
//!     inputBinding:
//!       position: 1
//! outputs:
//!   file:
//!     type: File
//!     format: edam:format_1964
//!     outputBinding:
//!       glob: $(inputs.filename)
//! ```

use std::collections::BTreeMap;
use std::fmt;

use indexmap::IndexMap;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declared type of an input or output parameter.
///
/// Mirrors the three spellings found in tool descriptions: a type name
/// (`File`, `string?`, `File[]`), a union (`["null", "File"]`) and an array
/// record (`{type: array, items: File}`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ParamType {
    Named(String),
    Union(Vec<ParamType>),
    Array {
        #[serde(rename = "type")]
        kind: String,
        items: Box<ParamType>,
    },
}

impl ParamType {
    /// Creates a named type.
    pub fn named(name: impl Into<String>) -> Self {
        ParamType::Named(name.into())
    }

    /// Wraps this type in an array.
    pub fn array_of(self) -> Self {
        ParamType::Array {
            kind: "array".to_string(),
            items: Box::new(self),
        }
    }

    /// True if the type admits a missing value (`T?` or a union with `null`).
    pub fn is_optional(&self) -> bool {
        match self {
            ParamType::Named(name) => name.ends_with('?'),
            ParamType::Union(members) => members
                .iter()
                .any(|m| matches!(m, ParamType::Named(n) if n == "null")),
            ParamType::Array { .. } => false,
        }
    }

    /// Returns the type with optionality and syntactic sugar removed.
    pub fn base(&self) -> ParamType {
        match self {
            ParamType::Named(name) => {
                let name = name.trim_end_matches('?');
                match name.strip_suffix("[]") {
                    Some(item) => ParamType::named(item).array_of(),
                    None => ParamType::named(name),
                }
            }
            ParamType::Union(members) => {
                let mut rest: Vec<ParamType> = members
                    .iter()
                    .filter(|m| !matches!(m, ParamType::Named(n) if n == "null"))
                    .map(ParamType::base)
                    .collect();
                if rest.len() == 1 {
                    rest.remove(0)
                } else {
                    ParamType::Union(rest)
                }
            }
            ParamType::Array { items, .. } => items.base().array_of(),
        }
    }

    /// Returns the element type if this is an array type.
    pub fn array_items(&self) -> Option<ParamType> {
        match self.base() {
            ParamType::Array { items, .. } => Some(*items),
            _ => None,
        }
    }

    /// Returns the type name if the base type is a plain named type.
    pub fn scalar_name(&self) -> Option<String> {
        match self.base() {
            ParamType::Named(name) => Some(name),
            _ => None,
        }
    }

    /// True if a value of type `self` can feed a parameter of type `other`.
    ///
    /// Optionality is ignored and `Any` on either side accepts everything.
    pub fn compatible_with(&self, other: &ParamType) -> bool {
        let a = self.base();
        let b = other.base();
        let is_any = |t: &ParamType| matches!(t, ParamType::Named(n) if n == "Any");
        is_any(&a) || is_any(&b) || a == b
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamType::Named(name) => write!(f, "{}", name),
            ParamType::Union(members) => {
                let parts: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            ParamType::Array { items, .. } => write!(f, "{}[]", items),
        }
    }
}

/// Deserializes either a single string or array of strings into Vec<String>
fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}

/// Deserializes a parameter list in any of its CWL spellings.
///
/// Accepts a map of full records, a map of bare types (`filename: string`,
/// `maybe: [null, File]`) and a list of records keyed by `id`. All of them
/// become an ordered map from parameter name to record.
fn param_map<'de, D, P>(deserializer: D) -> Result<IndexMap<String, P>, D::Error>
where
    D: Deserializer<'de>,
    P: DeserializeOwned,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Spelling {
        Map(IndexMap<String, Value>),
        List(Vec<Value>),
    }

    let entries: Vec<(String, Value)> = match Option::<Spelling>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Spelling::Map(map)) => map.into_iter().collect(),
        Some(Spelling::List(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(mut record) => match record.remove("id") {
                    Some(Value::String(id)) => Ok((param_id(&id), Value::Object(record))),
                    _ => Err(de::Error::custom("parameter in list form has no string 'id'")),
                },
                _ => Err(de::Error::custom("expected a parameter record in list")),
            })
            .collect::<Result<_, D::Error>>()?,
    };

    entries
        .into_iter()
        .map(|(name, body)| -> Result<(String, P), D::Error> {
            let body = match body {
                shorthand @ (Value::String(_) | Value::Array(_)) => {
                    serde_json::json!({ "type": shorthand })
                }
                other => other,
            };
            let param = serde_json::from_value::<P>(body)
                .map_err(|e| <D::Error as de::Error>::custom(format!("parameter '{}': {}", name, e)))?;
            Ok((name, param))
        })
        .collect()
}

/// Strips the document prefix from a parameter id (`#main/file` → `file`).
fn param_id(id: &str) -> String {
    let id = id.trim_start_matches('#');
    id.rsplit('/').next().unwrap_or(id).to_string()
}

/// True if two format lists can be connected.
///
/// An empty list on either side means "unspecified" and matches anything.
pub fn formats_compatible(produced: &[String], accepted: &[String]) -> bool {
    produced.is_empty() || accepted.is_empty() || produced.iter().any(|f| accepted.contains(f))
}

/// A declared input parameter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct InputParam {
    #[serde(rename = "type")]
    pub param_type: ParamType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Accepted file formats (ontology URIs or short names)
    #[serde(deserialize_with = "single_or_vec", default, skip_serializing_if = "Vec::is_empty")]
    pub format: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Keys the compiler does not interpret (e.g. `inputBinding`)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl InputParam {
    pub fn new(param_type: ParamType) -> Self {
        Self {
            param_type,
            default: None,
            format: Vec::new(),
            doc: None,
            label: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = vec![format.into()];
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// A parameter is required unless it has a default or a nullable type.
    pub fn is_required(&self) -> bool {
        self.default.is_none() && !self.param_type.is_optional()
    }

    /// Copies the interface-relevant fields for use as a workflow input.
    pub fn interface_copy(&self) -> InputParam {
        InputParam {
            param_type: self.param_type.clone(),
            default: None,
            format: self.format.clone(),
            doc: self.doc.clone(),
            label: self.label.clone(),
            extra: BTreeMap::new(),
        }
    }
}

/// A declared output parameter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutputParam {
    #[serde(rename = "type")]
    pub param_type: ParamType,

    #[serde(deserialize_with = "single_or_vec", default, skip_serializing_if = "Vec::is_empty")]
    pub format: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// For workflow outputs: the `step/output` that produces the value
    #[serde(rename = "outputSource", default, skip_serializing_if = "Option::is_none")]
    pub output_source: Option<String>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl OutputParam {
    pub fn new(param_type: ParamType) -> Self {
        Self {
            param_type,
            format: Vec::new(),
            doc: None,
            label: None,
            output_source: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = vec![format.into()];
        self
    }

    /// Copies the interface-relevant fields, dropping tool-specific bindings.
    pub fn interface_copy(&self) -> OutputParam {
        OutputParam {
            param_type: self.param_type.clone(),
            format: self.format.clone(),
            doc: self.doc.clone(),
            label: self.label.clone(),
            output_source: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Kind of step target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepClass {
    /// Atomic command line tool (a leaf of the compiled tree)
    CommandLineTool,
    /// Composite workflow (compiled recursively)
    Workflow,
}

/// The interface of a registry entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolInterface {
    pub class: String,

    #[serde(default, deserialize_with = "param_map")]
    pub inputs: IndexMap<String, InputParam>,

    #[serde(default, deserialize_with = "param_map")]
    pub outputs: IndexMap<String, OutputParam>,

    /// Everything else in the tool description, written back verbatim
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ToolInterface {
    /// Creates an empty command line tool interface.
    pub fn command_line_tool() -> Self {
        Self {
            class: "CommandLineTool".to_string(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Adds an input parameter.
    pub fn with_input(mut self, name: impl Into<String>, param: InputParam) -> Self {
        self.inputs.insert(name.into(), param);
        self
    }

    /// Adds an output parameter.
    pub fn with_output(mut self, name: impl Into<String>, param: OutputParam) -> Self {
        self.outputs.insert(name.into(), param);
        self
    }

    /// Returns the step class, or `None` for an unrecognised `class`.
    pub fn step_class(&self) -> Option<StepClass> {
        match self.class.as_str() {
            "CommandLineTool" => Some(StepClass::CommandLineTool),
            "Workflow" => Some(StepClass::Workflow),
            _ => None,
        }
    }

    /// Names of the inputs that must be bound for a step of `class`.
    ///
    /// Every input of a composite workflow is required; tool inputs are
    /// required unless they have a default or a nullable type.
    pub fn required_inputs(&self, class: StepClass) -> Vec<String> {
        match class {
            StepClass::Workflow => self.inputs.keys().cloned().collect(),
            StepClass::CommandLineTool => self
                .inputs
                .iter()
                .filter(|(_, param)| param.is_required())
                .map(|(name, _)| name.clone())
                .collect(),
        }
    }
}

/// A registry entry: an interface plus the path it was loaded from.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Tool {
    pub run_path: String,
    pub interface: ToolInterface,
}

impl Tool {
    pub fn new(run_path: impl Into<String>, interface: ToolInterface) -> Self {
        Self {
            run_path: run_path.into(),
            interface,
        }
    }

    /// File stem of the run path (`adapters/touch.cwl` → `touch`).
    pub fn run_stem(&self) -> String {
        std::path::Path::new(&self.run_path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.run_path)
            .to_string()
    }
}
