//! Edge Inference Engine
//!
//! Decides where the value of an unbound required parameter comes from:
//!
//! 1. An output of a previous sibling step, nearest first
//! 2. A declared input of the enclosing workflow
//! 3. A new workflow input, bubbled up to the parent
//!
//! In the third case, when a previous step produces a value of the right
//! type in the wrong format, the registry is searched for conversion tools
//! that could be inserted between the two steps.

use std::collections::BTreeSet;

use indexmap::IndexMap;
use log::debug;

use super::config::{InferenceConfig, InferenceRule};
use crate::registry::discovery::ToolRegistry;
use crate::registry::tool::{formats_compatible, InputParam, StepClass, ToolInterface};
use crate::workflow::model::{Step, StepId, StepOverride, WorkflowAst, GLOBAL_NAMESPACE};
use crate::workflow::namespace::{last_segment, override_key, reindex_overrides};

/// A step that precedes the one being compiled.
#[derive(Debug, Clone)]
pub struct PreviousStep {
    /// Synthetic name of the step
    pub name: String,
    pub interface: ToolInterface,
    /// Per-output rules from the step's `wic.inference` annotation
    pub rules: IndexMap<String, String>,
}

impl PreviousStep {
    fn rule(&self, output: &str) -> InferenceRule {
        self.rules
            .get(output)
            .map(|r| InferenceRule::from_name(r))
            .unwrap_or_default()
    }
}

/// Where an inferred value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceOutcome {
    /// Output `output` of the previous step at `step_index`
    Producer { step_index: usize, output: String },
    /// A declared input of the enclosing workflow
    WorkflowInput(String),
    /// Nothing matched; the parameter becomes a new workflow input.
    /// Holds the conversion steps that could be inserted instead.
    NewInput { insertions: BTreeSet<StepId> },
}

/// Infers the source of the parameter `arg_key` of the step after `previous`.
pub fn infer_edge(
    inference: &InferenceConfig,
    registry: &ToolRegistry,
    previous: &[PreviousStep],
    declared_inputs: &IndexMap<String, InputParam>,
    arg_key: &str,
    param: &InputParam,
) -> InferenceOutcome {
    let param_name = last_segment(arg_key);
    let mut mismatched_format: Option<Vec<String>> = None;

    for (step_index, prev) in previous.iter().enumerate().rev() {
        let mut candidates: Vec<&String> = Vec::new();
        let mut stop = false;

        for (out_name, out) in &prev.interface.outputs {
            let rule = prev.rule(out_name);
            if rule == InferenceRule::Continue {
                continue;
            }
            if out.param_type.compatible_with(&param.param_type) {
                if formats_compatible(&out.format, &param.format) {
                    candidates.push(out_name);
                } else if mismatched_format.is_none() {
                    mismatched_format = Some(out.format.clone());
                }
            }
            if rule == InferenceRule::Break {
                stop = true;
            }
        }

        if let Some(first) = candidates.first() {
            let chosen = candidates
                .iter()
                .find(|out| inference.names_match(last_segment(out), param_name))
                .unwrap_or(first);
            debug!("Inferred {} <- {}/{}", arg_key, prev.name, chosen);
            return InferenceOutcome::Producer {
                step_index,
                output: chosen.to_string(),
            };
        }

        if stop {
            debug!("Inference for {} stopped at {}", arg_key, prev.name);
            break;
        }
    }

    if let Some(name) = match_declared_input(inference, declared_inputs, arg_key, param) {
        return InferenceOutcome::WorkflowInput(name);
    }

    let insertions = match mismatched_format {
        Some(produced) => insertion_candidates(registry, &produced, param),
        None => BTreeSet::new(),
    };
    InferenceOutcome::NewInput { insertions }
}

fn match_declared_input(
    inference: &InferenceConfig,
    declared_inputs: &IndexMap<String, InputParam>,
    arg_key: &str,
    param: &InputParam,
) -> Option<String> {
    let param_name = last_segment(arg_key);

    if declared_inputs.contains_key(arg_key) {
        return Some(arg_key.to_string());
    }
    if declared_inputs.contains_key(param_name) {
        return Some(param_name.to_string());
    }
    if let Some(name) = declared_inputs
        .keys()
        .find(|name| inference.names_match(name, param_name))
    {
        return Some(name.clone());
    }

    let compatible: Vec<&String> = declared_inputs
        .iter()
        .filter(|(_, input)| {
            input.param_type.compatible_with(&param.param_type)
                && formats_compatible(&input.format, &param.format)
        })
        .map(|(name, _)| name)
        .collect();

    match compatible.as_slice() {
        [only] => Some(only.to_string()),
        _ => None,
    }
}

fn formats_intersect(a: &[String], b: &[String]) -> bool {
    a.iter().any(|f| b.contains(f))
}

/// Conversion tools that accept `produced` and emit what `param` accepts.
///
/// A candidate is a command line tool with exactly one required input.
/// Formats must be declared on both sides of the conversion.
pub fn insertion_candidates(registry: &ToolRegistry, produced: &[String], param: &InputParam) -> BTreeSet<StepId> {
    registry
        .command_line_tools()
        .filter(|(_, tool)| {
            let required = tool.interface.required_inputs(StepClass::CommandLineTool);
            let [input_name] = required.as_slice() else {
                return false;
            };
            let Some(input) = tool.interface.inputs.get(input_name) else {
                return false;
            };

            formats_intersect(produced, &input.format)
                && tool.interface.outputs.values().any(|out| {
                    out.param_type.compatible_with(&param.param_type)
                        && formats_intersect(&out.format, &param.format)
                })
        })
        .map(|(id, _)| id.clone())
        .collect()
}

/// Returns a copy of `ast` with the tool `step_id` inserted at `index`.
///
/// Existing overrides are shifted so they keep pointing at the same steps,
/// and the inserted step is annotated with the inference rules for the
/// formats it produces.
pub fn insert_step_into_workflow(
    ast: &WorkflowAst,
    step_id: &StepId,
    registry: &ToolRegistry,
    inference: &InferenceConfig,
    index: usize,
) -> WorkflowAst {
    let mut modified = ast.clone();
    modified.steps.insert(index, Step::new(step_id.stem.clone()));

    let mut annotation = StepOverride::default();
    if let Some(tool) = registry.get(step_id) {
        for (out_name, out) in &tool.interface.outputs {
            if let Some(format) = out.format.first() {
                let rule = inference.rule_for_format(format);
                annotation
                    .wic
                    .inference
                    .insert(out_name.clone(), rule.as_str().to_string());
            }
        }
    }
    if step_id.plugin_ns != GLOBAL_NAMESPACE {
        annotation.wic.namespace = Some(step_id.plugin_ns.clone());
    }

    let mut overrides = reindex_overrides(&modified.meta.steps, index + 1);
    overrides.insert(override_key(index, &step_id.stem), annotation);
    modified.meta.steps = overrides;
    modified
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tool::{OutputParam, ParamType, Tool};

    fn file_in(format: &str) -> InputParam {
        InputParam::new(ParamType::named("File")).with_format(format)
    }

    fn file_out(format: &str) -> OutputParam {
        OutputParam::new(ParamType::named("File")).with_format(format)
    }

    fn prev(name: &str, outputs: &[(&str, OutputParam)]) -> PreviousStep {
        let mut interface = ToolInterface::command_line_tool();
        for (n, o) in outputs {
            interface = interface.with_output(*n, o.clone());
        }
        PreviousStep {
            name: name.to_string(),
            interface,
            rules: IndexMap::new(),
        }
    }

    fn converter_registry() -> ToolRegistry {
        let convert = ToolInterface::command_line_tool()
            .with_input("input_txt", file_in("txt"))
            .with_output("output_json", file_out("json"));
        let other = ToolInterface::command_line_tool()
            .with_input("input_txt", file_in("txt"))
            .with_output("output_csv", file_out("csv"));
        ToolRegistry::new()
            .with_tool(StepId::global("txt_to_json"), Tool::new("txt_to_json.cwl", convert))
            .with_tool(StepId::global("txt_to_csv"), Tool::new("txt_to_csv.cwl", other))
    }

    #[test]
    fn test_nearest_producer_wins() {
        let previous = vec![
            prev("a", &[("file", file_out("txt"))]),
            prev("b", &[("file", file_out("txt"))]),
        ];
        let outcome = infer_edge(
            &InferenceConfig::default(),
            &ToolRegistry::new(),
            &previous,
            &IndexMap::new(),
            "file",
            &file_in("txt"),
        );
        assert_eq!(
            outcome,
            InferenceOutcome::Producer {
                step_index: 1,
                output: "file".to_string()
            }
        );
    }

    #[test]
    fn test_name_match_preferred_within_step() {
        let previous = vec![prev(
            "a",
            &[("log", file_out("txt")), ("data", file_out("txt"))],
        )];
        let outcome = infer_edge(
            &InferenceConfig::default(),
            &ToolRegistry::new(),
            &previous,
            &IndexMap::new(),
            "data",
            &file_in("txt"),
        );
        assert_eq!(
            outcome,
            InferenceOutcome::Producer {
                step_index: 0,
                output: "data".to_string()
            }
        );
    }

    #[test]
    fn test_continue_and_break_rules() {
        let mut skipped = prev("b", &[("file", file_out("txt"))]);
        skipped.rules.insert("file".to_string(), "continue".to_string());
        let previous = vec![prev("a", &[("file", file_out("txt"))]), skipped];

        let outcome = infer_edge(
            &InferenceConfig::default(),
            &ToolRegistry::new(),
            &previous,
            &IndexMap::new(),
            "file",
            &file_in("txt"),
        );
        assert!(matches!(outcome, InferenceOutcome::Producer { step_index: 0, .. }));

        let mut barrier = prev("b", &[("other", OutputParam::new(ParamType::named("int")))]);
        barrier.rules.insert("other".to_string(), "break".to_string());
        let previous = vec![prev("a", &[("file", file_out("txt"))]), barrier];
        let outcome = infer_edge(
            &InferenceConfig::default(),
            &ToolRegistry::new(),
            &previous,
            &IndexMap::new(),
            "file",
            &file_in("txt"),
        );
        assert!(matches!(outcome, InferenceOutcome::NewInput { .. }));
    }

    #[test]
    fn test_declared_input_fallback() {
        let mut declared = IndexMap::new();
        declared.insert("message".to_string(), InputParam::new(ParamType::named("string")));
        let outcome = infer_edge(
            &InferenceConfig::default(),
            &ToolRegistry::new(),
            &[],
            &declared,
            "sub__step__1__echo___message",
            &InputParam::new(ParamType::named("string")),
        );
        assert_eq!(outcome, InferenceOutcome::WorkflowInput("message".to_string()));
    }

    #[test]
    fn test_format_mismatch_collects_insertions() {
        let previous = vec![prev("a", &[("file", file_out("txt"))])];
        let outcome = infer_edge(
            &InferenceConfig::default(),
            &converter_registry(),
            &previous,
            &IndexMap::new(),
            "file",
            &file_in("json"),
        );
        let InferenceOutcome::NewInput { insertions } = outcome else {
            panic!("expected a new input");
        };
        assert_eq!(insertions.into_iter().collect::<Vec<_>>(), vec![StepId::global("txt_to_json")]);
    }

    #[test]
    fn test_no_insertions_without_mismatched_producer() {
        let outcome = infer_edge(
            &InferenceConfig::default(),
            &converter_registry(),
            &[],
            &IndexMap::new(),
            "file",
            &file_in("json"),
        );
        assert_eq!(
            outcome,
            InferenceOutcome::NewInput {
                insertions: BTreeSet::new()
            }
        );
    }

    #[test]
    fn test_insert_step_reindexes_overrides() {
        let ast = WorkflowAst::from_yaml_str(
            "steps:\n  - a:\n  - b:\nwic:\n  steps:\n    (2, b):\n      in:\n        n: !ii 3\n",
        )
        .unwrap();
        let mut inference = InferenceConfig::default();
        inference.rules.insert("json".to_string(), InferenceRule::Break);

        let modified = insert_step_into_workflow(
            &ast,
            &StepId::global("txt_to_json"),
            &converter_registry(),
            &inference,
            1,
        );

        let keys: Vec<&str> = modified.steps.iter().map(|s| s.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "txt_to_json", "b"]);
        assert!(modified.meta.steps.contains_key("(3, b)"));
        assert_eq!(
            modified.meta.steps["(2, txt_to_json)"].wic.inference["output_json"],
            "break"
        );
    }
}
