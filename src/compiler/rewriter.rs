//! Single-Pass Rewriter
//!
//! Compiles one workflow AST into a [`CompiledWorkflow`], recursing into
//! embedded subworkflows through the fixed-point driver. For each step, in
//! order:
//!
//! 1. Resolve the step against the registry (or compile its subtree)
//! 2. Record explicit edge definitions (`!&`) from its outputs
//! 3. Rewrite every provided binding: literals become workflow inputs,
//!    aliases (`!*`) become sources, bare names must be workflow inputs
//! 4. Bind every remaining required parameter, bubbling values up from
//!    subworkflows, resolving explicit edges or inferring implicit ones
//! 5. Export every output as a namespaced workflow output
//!
//! Returns the compilation together with the (possibly modified) AST; the
//! driver compares that AST with its input to detect a fixed point.

use indexmap::IndexMap;
use log::{debug, info, warn};
use serde_json::Value;

use super::driver::{CompileContext, Compiler};
use super::error::{CompileError, Result};
use super::graph::{add_graph_edge, add_subgraphs, attrs, stack_index, GraphData};
use super::inference::{infer_edge, insert_step_into_workflow, InferenceOutcome, PreviousStep};
use super::inputs::build_inputs_file;
use super::types::{
    CompiledStep, CompiledUnit, CompiledWorkflow, CompilerInfo, EnvData, ExplicitEdge, InputsFileEntry, NodeData,
    RoseTree, JAVASCRIPT_REQUIREMENT, SCATTER_REQUIREMENT, SUBWORKFLOW_REQUIREMENT,
};
use crate::registry::tool::{InputParam, OutputParam, StepClass, Tool};
use crate::workflow::model::{Binding, OutputEntry, SourceRef, StepId, WorkflowAst, WorkflowTree, GLOBAL_NAMESPACE};
use crate::workflow::namespace::{
    join_namespaces, key_stem, last_segment, namespaced, parse_override_key, partition_by_lowest_common_ancestor,
    split_embedded, step_name,
};

const STEP_STYLE: &str = "rounded, filled";

/// Mutable state accumulated while compiling the steps of one workflow.
struct PassState {
    wf: CompiledWorkflow,
    /// Declared inputs, with docs of the parameters they feed appended
    declared_inputs: IndexMap<String, InputParam>,
    inputs_workflow: IndexMap<String, InputParam>,
    inputs_file_workflow: IndexMap<String, InputsFileEntry>,
    input_mapping: IndexMap<String, Vec<String>>,
    output_mapping: IndexMap<String, String>,
    vars_workflow_output_internal: Vec<String>,
    defs: super::types::ExplicitEdgeDefs,
    calls: super::types::ExplicitEdgeCalls,
    generated_outputs: IndexMap<String, OutputParam>,
    unresolved: Vec<String>,
    previous: Vec<PreviousStep>,
    children: Vec<RoseTree>,
    sibling_subgraphs: Vec<GraphData>,
    step_1_names: Vec<String>,
}

impl PassState {
    fn new(ast: &WorkflowAst, ctx: &CompileContext) -> Self {
        let mut wf = CompiledWorkflow::new();
        wf.label = ast.meta.graphviz.label.clone();

        Self {
            wf,
            declared_inputs: ast.inputs.clone(),
            inputs_workflow: IndexMap::new(),
            inputs_file_workflow: IndexMap::new(),
            input_mapping: ctx.input_mapping.clone(),
            output_mapping: ctx.output_mapping.clone(),
            vars_workflow_output_internal: Vec::new(),
            defs: ctx.explicit_edge_defs.clone(),
            calls: ctx.explicit_edge_calls.clone(),
            generated_outputs: IndexMap::new(),
            unresolved: Vec::new(),
            previous: Vec::new(),
            children: Vec::new(),
            sibling_subgraphs: Vec::new(),
            step_1_names: Vec::new(),
        }
    }

    fn add_input_mapping(&mut self, workflow_input: &str, step_input: &str) {
        self.input_mapping
            .entry(workflow_input.to_string())
            .or_default()
            .push(step_input.to_string());
    }

    fn into_env(self) -> EnvData {
        EnvData {
            input_mapping: self.input_mapping,
            output_mapping: self.output_mapping,
            inputs_file_workflow: self.inputs_file_workflow,
            vars_workflow_output_internal: self.vars_workflow_output_internal,
            explicit_edge_defs: self.defs,
            explicit_edge_calls: self.calls,
        }
    }
}

/// Everything known about the step currently being compiled.
struct StepFrame<'s> {
    key: &'s str,
    /// `step_name` for resolved steps, the raw key otherwise
    name: String,
    /// `namespaces + [name]`
    path: Vec<String>,
    node_name: String,
    tool: Tool,
    bindings: IndexMap<String, Binding>,
    scatter: &'s [String],
}

fn current_graph(stack: &mut [GraphData]) -> Result<&mut GraphData> {
    stack
        .last_mut()
        .ok_or_else(|| CompileError::Internal("empty graph stack".to_string()))
}

fn file_stem(path: &str) -> String {
    std::path::Path::new(path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string()
}

impl<'a> Compiler<'a> {
    /// Runs one rewriting pass over `tree`.
    pub(crate) fn compile_workflow_once(
        &mut self,
        tree: &WorkflowTree,
        ctx: &CompileContext,
        stack: &mut Vec<GraphData>,
    ) -> Result<(CompilerInfo, WorkflowAst)> {
        let ast = &tree.ast;
        let yaml_stem = tree.stem();
        let indent = "  ".repeat(ctx.namespaces.len());
        debug!("{}starting compilation of {}", indent, tree.step_id.stem);

        let mut state = PassState::new(ast, ctx);
        let mut ast_out = ast.clone();
        let mut step_name_1 = String::new();
        let mut names_seen: Vec<String> = Vec::new();

        for (i, step) in ast.steps.iter().enumerate() {
            let step_override = ast.step_override(i).cloned().unwrap_or_default();
            let plugin_ns = step_override
                .wic
                .namespace
                .clone()
                .unwrap_or_else(|| GLOBAL_NAMESPACE.to_string());
            let step_id = StepId::new(key_stem(&step.key), plugin_ns.clone());

            // A key that only resolves through its `run:` tag keeps the raw key
            // as its name. Nothing else carries the step index, so such a key
            // must be unique within its workflow.
            let name = if step.is_subworkflow() || step.key.ends_with(".wic") || self.registry.contains(&step_id) {
                step_name(&yaml_stem, i, &step.key)
            } else {
                step.key.clone()
            };
            if names_seen.contains(&name) {
                return Err(CompileError::InvalidWorkflow {
                    workflow: yaml_stem.clone(),
                    reasons: vec![format!("step name '{}' is used by more than one step", name)],
                });
            }
            names_seen.push(name.clone());
            let mut path = ctx.namespaces.clone();
            path.push(name.clone());

            // Override bindings win over the step's own.
            let mut bindings = step.bindings.clone();
            for (k, v) in &step_override.bindings {
                bindings.insert(k.clone(), v.clone());
            }

            // Resolve the step target
            let tool = match &step.subtree {
                Some(sub_ast) => {
                    let label = sub_ast.meta.graphviz.label.clone().unwrap_or_else(|| step.key.clone());
                    stack.push(GraphData::cluster(&step.key, &label, sub_ast.meta.graphviz.style.as_deref()));

                    let child_ctx = CompileContext {
                        namespaces: path.clone(),
                        explicit_edge_defs: state.defs.clone(),
                        explicit_edge_calls: state.calls.clone(),
                        input_mapping: state.input_mapping.clone(),
                        output_mapping: state.output_mapping.clone(),
                        is_root: false,
                    };
                    let child_tree = WorkflowTree::new(StepId::new(step.key.clone(), plugin_ns), (**sub_ast).clone());
                    let result = self.compile_workflow(&child_tree, &child_ctx, stack);
                    let child_graph = stack.pop().unwrap_or_default();
                    let sub_info = result?;

                    if let Some(converged) = &sub_info.rose.data.ast {
                        if converged != sub_ast.as_ref() {
                            info!("AST modified in {}", step.key);
                            ast_out.steps[i].subtree = Some(Box::new(converged.clone()));
                        }
                    }

                    let tool = Tool::new(format!("{}.cwl", step_id.stem), sub_info.rose.data.compiled.interface());
                    self.registry.insert(step_id.clone(), tool.clone());

                    self.merge_child(&mut state, ctx, &name, sub_info, child_graph);
                    tool
                }
                None => {
                    let run_id = step.run.as_deref().map(|r| StepId::global(file_stem(r)));
                    let resolved = self
                        .registry
                        .get(&step_id)
                        .or_else(|| run_id.as_ref().and_then(|id| self.registry.get(id)));
                    let tool = resolved.cloned().ok_or_else(|| CompileError::UnknownStep {
                        workflow: yaml_stem.clone(),
                        key: step.key.clone(),
                        step_id: step_id.clone(),
                    })?;

                    state.children.push(RoseTree::new(
                        NodeData::leaf(path.clone(), tool.run_stem(), String::new(), tool.interface.clone()),
                        vec![],
                    ));
                    tool
                }
            };

            let run_path = self.run_path(ctx, &name, &tool, step.is_subworkflow());
            if let Some(child) = state.children.last_mut() {
                child.data.run_path = run_path.clone();
            }

            let class = tool.interface.step_class().ok_or_else(|| CompileError::UnknownStepClass {
                key: step.key.clone(),
                class: tool.interface.class.clone(),
            })?;

            let args_provided: Vec<String> = bindings.keys().cloned().collect();
            let args_required = tool.interface.required_inputs(class);
            if class == StepClass::Workflow {
                for key in &args_required {
                    bindings
                        .entry(key.clone())
                        .or_insert_with(|| Binding::RawVariable(key.clone()));
                }
            }
            let sub_args_provided: Vec<String> = args_required
                .iter()
                .filter(|arg| state.calls.contains_key(*arg))
                .cloned()
                .collect();

            let node_name = self.add_step_node(
                current_graph(stack)?,
                ctx,
                &step.key,
                &name,
                class,
                step.is_subworkflow(),
                &step_override.wic.graphviz,
            );
            if i == 0 {
                let first = if step.is_subworkflow() && ctx.namespaces.len() < self.config.graph.inline_depth {
                    state.step_1_names.last().cloned().unwrap_or_else(|| node_name.clone())
                } else {
                    node_name.clone()
                };
                step_name_1 = first;
            }

            // Explicit edge definitions
            for entry in &step.out {
                if let OutputEntry::Anchored { name: out_key, anchor } = entry {
                    if state.defs.contains_key(anchor) {
                        return Err(CompileError::DuplicateEdgeDefinition { label: anchor.clone() });
                    }
                    let def = ExplicitEdge::new(path.clone(), out_key.clone());
                    state.defs.insert(anchor.clone(), def.clone());
                    // Also recorded as a call so a parent can tell it was handled.
                    state.calls.insert(anchor.clone(), def);
                }
            }

            let mut frame = StepFrame {
                key: &step.key,
                name,
                path,
                node_name,
                tool,
                bindings,
                scatter: &step.scatter,
            };

            for arg_key in &args_provided {
                self.rewrite_binding(&mut state, ctx, stack, &mut frame, arg_key)?;
            }

            for arg_key in &args_required {
                if args_provided.contains(arg_key) {
                    continue;
                }
                let inserted = self.bind_required(&mut state, ctx, ast, stack, &mut frame, arg_key, &sub_args_provided)?;
                if let Some(step_id) = inserted {
                    info!("Automatically inserting step {} at position {}", step_id, i + 1);
                    let modified = insert_step_into_workflow(
                        &ast_out,
                        &step_id,
                        &*self.registry,
                        &self.config.inference,
                        i,
                    );
                    let info = self.finish(tree, ctx, stack, state, Some(&modified), String::new())?;
                    return Ok((info, modified));
                }
            }

            let rules = step_override.wic.inference.clone();
            self.finish_step(&mut state, step, frame, &args_required, run_path, rules);
        }

        let info = self.finish(tree, ctx, stack, state, None, step_name_1)?;
        debug!("{}finishing compilation of {}", indent, tree.step_id.stem);
        Ok((info, ast_out))
    }

    fn run_path(&self, ctx: &CompileContext, name: &str, tool: &Tool, is_subworkflow: bool) -> String {
        let file = format!("{}.cwl", tool.run_stem());
        if self.config.relative_run_path {
            format!("{}/{}", name, file)
        } else if is_subworkflow {
            let mut segments = ctx.namespaces.clone();
            segments.push(name.to_string());
            segments.push(file);
            join_namespaces(&segments)
        } else {
            file
        }
    }

    /// Folds a compiled subworkflow into the parent's state.
    fn merge_child(
        &self,
        state: &mut PassState,
        ctx: &CompileContext,
        name: &str,
        sub_info: CompilerInfo,
        child_graph: GraphData,
    ) {
        let CompilerInfo { rose, env } = sub_info;

        for (k, v) in env.inputs_file_workflow {
            state.inputs_file_workflow.insert(namespaced(name, &k), v);
        }
        for (k, v) in env.input_mapping {
            if !ctx.input_mapping.contains_key(&k) {
                state.input_mapping.insert(namespaced(name, &k), v);
            }
        }
        for (k, v) in env.output_mapping {
            if !ctx.output_mapping.contains_key(&k) {
                state.output_mapping.insert(namespaced(name, &k), v);
            }
        }
        state
            .vars_workflow_output_internal
            .extend(env.vars_workflow_output_internal);
        state.defs.extend(env.explicit_edge_defs);
        state.calls.extend(env.explicit_edge_calls);

        state.sibling_subgraphs.push(child_graph);
        state.step_1_names.push(rose.data.step_name_1.clone());
        state.children.push(rose);
    }

    #[allow(clippy::too_many_arguments)]
    fn add_step_node(
        &self,
        graph: &mut GraphData,
        ctx: &CompileContext,
        key: &str,
        name: &str,
        class: StepClass,
        is_subworkflow: bool,
        hints: &crate::workflow::model::GraphvizHints,
    ) -> String {
        let options = &self.config.graph;
        let default_label = if options.label_stepname { name } else { key };
        let mut path = ctx.namespaces.clone();
        path.push(name.to_string());

        match class {
            StepClass::CommandLineTool => {
                let node_name = join_namespaces(&path);
                let label = hints.label.clone().unwrap_or_else(|| default_label.to_string());
                let style = match hints.style.as_deref() {
                    Some(s) if !s.is_empty() => format!("{}, {}", STEP_STYLE, s),
                    _ => STEP_STYLE.to_string(),
                };
                graph.add_node(
                    node_name.clone(),
                    attrs([("label", &label), ("shape", "box"), ("style", &style), ("fillcolor", "lightblue")]),
                );
                node_name
            }
            StepClass::Workflow => {
                let depth = options.inline_depth + 1;
                let node_name = join_namespaces(&path[..path.len().min(depth)]);
                if !(is_subworkflow && ctx.namespaces.len() < options.inline_depth) {
                    graph.add_node(
                        node_name.clone(),
                        attrs([
                            ("label", default_label),
                            ("shape", "box"),
                            ("style", STEP_STYLE),
                            ("fillcolor", "lightblue"),
                        ]),
                    );
                }
                node_name
            }
        }
    }

    fn edge_color(&self) -> &'static str {
        if self.config.graph.dark_theme {
            "white"
        } else {
            "black"
        }
    }

    /// Rewrites a binding the user provided for `arg_key`.
    fn rewrite_binding(
        &self,
        state: &mut PassState,
        ctx: &CompileContext,
        stack: &mut [GraphData],
        frame: &mut StepFrame<'_>,
        arg_key: &str,
    ) -> Result<()> {
        let param = frame
            .tool
            .interface
            .inputs
            .get(arg_key)
            .cloned()
            .ok_or_else(|| CompileError::UnknownParameter {
                step: frame.key.to_string(),
                param: arg_key.to_string(),
            })?;
        let mut in_param = param.interface_copy();
        let in_name = namespaced(&frame.name, arg_key);

        let binding = match frame.bindings.get(arg_key) {
            Some(b) => b.clone(),
            None => return Ok(()),
        };

        match binding {
            Binding::Literal(_) | Binding::InlineJson(_) => {
                let value = match binding {
                    Binding::InlineJson(json) => Value::String(json.to_string()),
                    Binding::Literal(value) => value,
                    _ => Value::Null,
                };
                if frame.scatter.iter().any(|s| s == arg_key) {
                    in_param.param_type = in_param.param_type.clone().array_of();
                }

                state.inputs_file_workflow.insert(
                    in_name.clone(),
                    InputsFileEntry {
                        param_type: in_param.param_type.clone(),
                        format: in_param.format.clone(),
                        value,
                    },
                );
                state.inputs_workflow.insert(in_name.clone(), in_param);
                frame
                    .bindings
                    .insert(arg_key.to_string(), Binding::SourceRef(SourceRef::input(in_name)));

                if self.config.graph.show_inputs {
                    let mut input_path = frame.path.clone();
                    input_path.push(arg_key.to_string());
                    let input_node = join_namespaces(&input_path);
                    let graph = current_graph(stack)?;
                    graph.add_node(
                        input_node.clone(),
                        attrs([
                            ("label", arg_key),
                            ("shape", "box"),
                            ("style", STEP_STYLE),
                            ("fillcolor", "lightgreen"),
                        ]),
                    );
                    graph.add_edge(input_node, frame.node_name.clone(), attrs([("color", self.edge_color())]));
                }
            }
            Binding::AliasRef(label) => {
                self.rewrite_alias(state, ctx, stack, frame, arg_key, &label, in_name, in_param)?;
            }
            Binding::RawVariable(var) => {
                match state.declared_inputs.get_mut(&var) {
                    Some(declared) => {
                        append_text(&mut declared.doc, param.doc.as_deref());
                        append_text(&mut declared.label, param.label.as_deref());
                    }
                    None if self.config.allow_raw_passthrough => {
                        warn!("Passing raw value '{}' for {}/{} through unchecked", var, frame.key, arg_key);
                    }
                    None => {
                        return Err(CompileError::UnboundVariable {
                            step: frame.key.to_string(),
                            param: arg_key.to_string(),
                            name: var,
                        });
                    }
                }
                state.add_input_mapping(&var, &in_name);
            }
            Binding::SourceRef(_) => {}
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn rewrite_alias(
        &self,
        state: &mut PassState,
        ctx: &CompileContext,
        stack: &mut [GraphData],
        frame: &mut StepFrame<'_>,
        arg_key: &str,
        label: &str,
        in_name: String,
        in_param: InputParam,
    ) -> Result<()> {
        let Some(def) = state.defs.get(label).cloned() else {
            if ctx.is_root && !self.config.standalone {
                return Err(CompileError::UndefinedEdge {
                    step: frame.key.to_string(),
                    label: label.to_string(),
                });
            }
            state.inputs_workflow.insert(in_name.clone(), in_param);
            frame
                .bindings
                .insert(arg_key.to_string(), Binding::SourceRef(SourceRef::input(in_name.clone())));
            state
                .calls
                .insert(in_name, ExplicitEdge::new(frame.path.clone(), arg_key));
            return Ok(());
        };

        let mut nss_def = def.namespaces.clone();
        nss_def.extend(split_embedded(&def.var));
        let mut nss_call = frame.path.clone();
        nss_call.extend(split_embedded(arg_key));

        let partition = partition_by_lowest_common_ancestor(&nss_def, &nss_call);
        match partition.right_tail.len() {
            0 => {
                return Err(if nss_def == nss_call {
                    CompileError::SelfReference {
                        step: frame.key.to_string(),
                        label: label.to_string(),
                    }
                } else {
                    CompileError::Internal(format!(
                        "explicit edge '{}' has an empty call path (def {:?}, call {:?})",
                        label, nss_def, nss_call
                    ))
                });
            }
            1 => {
                let source = definition_source(&partition.left_tail, &def.var).ok_or_else(|| {
                    CompileError::SelfReference {
                        step: frame.key.to_string(),
                        label: label.to_string(),
                    }
                })?;
                frame.bindings.insert(arg_key.to_string(), Binding::SourceRef(source));
            }
            _ => {
                state.inputs_workflow.insert(in_name.clone(), in_param);
                state.calls.insert(in_name.clone(), def.clone());
                frame
                    .bindings
                    .insert(arg_key.to_string(), Binding::SourceRef(SourceRef::input(in_name.clone())));
            }
        }

        // The edge goes on the graph of the lowest common ancestor.
        let index = stack_index(stack.len(), ctx.namespaces.len(), partition.common.len());
        add_graph_edge(
            &self.config.graph,
            &mut stack[index],
            &def.namespaces,
            &frame.path,
            last_segment(&def.var),
            "blue",
        );
        Ok(())
    }

    /// Binds a required parameter the user did not provide.
    ///
    /// Returns the StepId of a conversion step to insert, if edge inference
    /// decided one is needed.
    #[allow(clippy::too_many_arguments)]
    fn bind_required(
        &self,
        state: &mut PassState,
        ctx: &CompileContext,
        ast: &WorkflowAst,
        stack: &mut [GraphData],
        frame: &mut StepFrame<'_>,
        arg_key: &str,
        sub_args_provided: &[String],
    ) -> Result<Option<StepId>> {
        let in_name = namespaced(&frame.name, arg_key);
        let param = frame
            .tool
            .interface
            .inputs
            .get(arg_key)
            .cloned()
            .ok_or_else(|| CompileError::Internal(format!("required input {} vanished", arg_key)))?;

        // A value supplied inside a subworkflow: pass it up.
        if state.inputs_file_workflow.contains_key(&in_name) {
            state.inputs_workflow.insert(in_name.clone(), param.interface_copy());
            frame
                .bindings
                .insert(arg_key.to_string(), Binding::SourceRef(SourceRef::input(in_name)));
            return Ok(None);
        }

        if sub_args_provided.iter().any(|a| a == arg_key) {
            self.resolve_explicit_call(state, ctx, frame, arg_key, in_name, &param)?;
            return Ok(None);
        }

        if self.config.inference_disable {
            let mut unresolved = ctx.namespaces.clone();
            unresolved.push(in_name);
            state.unresolved.push(join_namespaces(&unresolved));
            return Ok(None);
        }

        let outcome = infer_edge(
            &self.config.inference,
            &*self.registry,
            &state.previous,
            &ast.inputs,
            arg_key,
            &param,
        );

        match outcome {
            InferenceOutcome::Producer { step_index, output } => {
                let producer = &state.previous[step_index].name;
                let source = SourceRef::step_output(producer.clone(), output.clone());
                state.vars_workflow_output_internal.push(source.to_string());

                let mut from = ctx.namespaces.clone();
                from.push(producer.clone());
                from.extend(split_embedded(&output));
                let mut to = frame.path.clone();
                to.extend(split_embedded(arg_key));
                add_graph_edge(
                    &self.config.graph,
                    current_graph(stack)?,
                    &from,
                    &to,
                    last_segment(&output),
                    self.edge_color(),
                );

                frame.bindings.insert(arg_key.to_string(), Binding::SourceRef(source));
            }
            InferenceOutcome::WorkflowInput(name) => {
                state.add_input_mapping(&name, &in_name);
                frame
                    .bindings
                    .insert(arg_key.to_string(), Binding::SourceRef(SourceRef::input(name)));
            }
            InferenceOutcome::NewInput { insertions } => {
                state.inputs_workflow.insert(in_name.clone(), param.interface_copy());
                frame
                    .bindings
                    .insert(arg_key.to_string(), Binding::SourceRef(SourceRef::input(in_name)));

                if self.config.insert_steps_automatically {
                    let mut candidates = insertions.into_iter();
                    if let Some(first) = candidates.next() {
                        let others: Vec<String> = candidates.map(|c| c.to_string()).collect();
                        if !others.is_empty() {
                            warn!(
                                "More than one conversion step fits {}/{}; choosing {} over {}",
                                frame.key,
                                arg_key,
                                first,
                                others.join(", ")
                            );
                        }
                        return Ok(Some(first));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Resolves a required parameter that an explicit edge call site inside
    /// a subworkflow bubbled up.
    fn resolve_explicit_call(
        &self,
        state: &mut PassState,
        ctx: &CompileContext,
        frame: &mut StepFrame<'_>,
        arg_key: &str,
        in_name: String,
        param: &InputParam,
    ) -> Result<()> {
        let def = state
            .calls
            .get(arg_key)
            .cloned()
            .ok_or_else(|| CompileError::Internal(format!("no call site recorded for {}", arg_key)))?;

        let mut nss_def = def.namespaces.clone();
        nss_def.extend(split_embedded(&def.var));
        let mut nss_call = frame.path.clone();
        nss_call.extend(split_embedded(arg_key));
        let partition = partition_by_lowest_common_ancestor(&nss_def, &nss_call);

        // Below the lowest common ancestor (or an undefined alias): keep
        // passing the value up as a workflow input.
        let bubble = partition.right_tail.is_empty() || ctx.namespaces.len() > partition.common.len();
        if bubble {
            if partition.right_tail.is_empty() && ctx.is_root && !self.config.standalone {
                return Err(CompileError::UndefinedEdge {
                    step: frame.key.to_string(),
                    label: def.var.clone(),
                });
            }
            state.inputs_workflow.insert(in_name.clone(), param.interface_copy());
            state.calls.insert(in_name.clone(), def);
            frame
                .bindings
                .insert(arg_key.to_string(), Binding::SourceRef(SourceRef::input(in_name)));
            return Ok(());
        }

        let source = definition_source(&partition.left_tail, &def.var).ok_or_else(|| CompileError::SelfReference {
            step: frame.key.to_string(),
            label: def.var.clone(),
        })?;
        frame.bindings.insert(arg_key.to_string(), Binding::SourceRef(source));
        Ok(())
    }

    /// Records outputs and emits the compiled step.
    fn finish_step(
        &self,
        state: &mut PassState,
        step: &crate::workflow::model::Step,
        frame: StepFrame<'_>,
        args_required: &[String],
        run_path: String,
        rules: IndexMap<String, String>,
    ) {
        let outputs = &frame.tool.interface.outputs;
        if outputs.is_empty() {
            warn!("No outputs for step {}", frame.key);
        }

        for (out_key, out) in outputs {
            let mut exported = out.interface_copy();
            exported.output_source = Some(format!("{}/{}", frame.name, out_key));
            state
                .generated_outputs
                .insert(namespaced(&frame.name, out_key), exported);
        }

        let mut when = step.when.clone();
        if self.config.partial_failure_enable && !args_required.is_empty() {
            let clauses: Vec<String> = args_required
                .iter()
                .map(|arg| format!("inputs[\"{}\"] != null", arg))
                .collect();
            if when.is_some() {
                warn!("Overwriting the existing \"when\" clause of {}", frame.key);
            }
            when = Some(format!("$({})", clauses.join(" && ")));
        }

        state.wf.steps.push(CompiledStep {
            id: frame.name.clone(),
            run: run_path,
            bindings: frame.bindings,
            out: outputs.keys().cloned().collect(),
            scatter: step.scatter.clone(),
            scatter_method: step.scatter_method.clone(),
            when,
        });

        state.previous.push(PreviousStep {
            name: frame.name,
            interface: frame.tool.interface,
            rules,
        });
    }

    /// Draws the outputs no later step consumes.
    fn add_output_nodes(&self, graph: &mut GraphData, ctx: &CompileContext, state: &PassState) {
        let depth = self.config.graph.inline_depth + 1;
        for step in &state.wf.steps {
            let mut step_path = ctx.namespaces.clone();
            step_path.push(step.id.clone());
            let step_node = join_namespaces(&step_path[..step_path.len().min(depth)]);

            for out_key in &step.out {
                if state
                    .vars_workflow_output_internal
                    .contains(&format!("{}/{}", step.id, out_key))
                {
                    continue;
                }
                let mut out_path = step_path.clone();
                out_path.push(out_key.clone());
                let out_node = join_namespaces(&out_path);
                graph.add_node(
                    out_node.clone(),
                    attrs([("label", out_key), ("shape", "box"), ("style", STEP_STYLE), ("fillcolor", "lightyellow")]),
                );
                graph.add_edge(step_node.clone(), out_node, attrs([("color", self.edge_color())]));
            }
        }
    }

    /// Assembles the compiled workflow and its tree node.
    fn finish(
        &self,
        tree: &WorkflowTree,
        ctx: &CompileContext,
        stack: &mut [GraphData],
        mut state: PassState,
        modified: Option<&WorkflowAst>,
        step_name_1: String,
    ) -> Result<CompilerInfo> {
        let ast = &tree.ast;
        let yaml_stem = tree.stem();

        let rank_same: Vec<String> = ast
            .meta
            .graphviz
            .ranksame
            .iter()
            .filter_map(|s| parse_override_key(s))
            .map(|(num, key)| {
                let mut path = ctx.namespaces.clone();
                path.push(step_name(&yaml_stem, num.saturating_sub(1), &key));
                format!("\"{}\"", join_namespaces(&path))
            })
            .collect();
        for (name, output) in &ast.outputs {
            if let Some(source) = &output.output_source {
                state.output_mapping.insert(name.clone(), source.replace('/', "___"));
            }
        }

        let mut seen = std::collections::HashSet::new();
        state
            .vars_workflow_output_internal
            .retain(|v| seen.insert(v.clone()));

        let siblings = std::mem::take(&mut state.sibling_subgraphs);
        let graph = current_graph(stack)?;
        add_subgraphs(&self.config.graph, graph, siblings, ctx.namespaces.len(), rank_same);
        if self.config.graph.show_outputs {
            self.add_output_nodes(graph, ctx, &state);
        }
        let graph_snapshot = graph.clone();

        let mut wf = std::mem::take(&mut state.wf);
        wf.inputs = state.declared_inputs.clone();
        for (k, v) in &state.inputs_workflow {
            wf.inputs.insert(k.clone(), v.clone());
        }

        wf.outputs = ast.outputs.clone();
        for (k, v) in &state.generated_outputs {
            let user_exported = ast
                .outputs
                .values()
                .any(|o| o.output_source.is_some() && o.output_source == v.output_source);
            if !user_exported {
                wf.outputs.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        if ast.steps.iter().any(|s| s.is_subworkflow()) {
            wf.require(SUBWORKFLOW_REQUIREMENT);
        }
        if wf.steps.iter().any(|s| !s.scatter.is_empty()) {
            wf.require(SCATTER_REQUIREMENT);
        }
        if wf.steps.iter().any(|s| s.when.is_some()) {
            wf.require(JAVASCRIPT_REQUIREMENT);
        }

        let inputs_added: Vec<String> = state.inputs_workflow.keys().cloned().collect();
        let inputs_file = build_inputs_file(&state.inputs_file_workflow);
        let unresolved = std::mem::take(&mut state.unresolved);
        let children = std::mem::take(&mut state.children);

        let node = NodeData {
            namespaces: ctx.namespaces.clone(),
            name: yaml_stem.clone(),
            run_path: format!("{}.cwl", yaml_stem),
            ast: Some(modified.cloned().unwrap_or_else(|| ast.clone())),
            compiled: CompiledUnit::Workflow(wf),
            inputs_file,
            explicit_edge_defs: ctx.explicit_edge_defs.clone(),
            explicit_edge_calls: ctx.explicit_edge_calls.clone(),
            graph: graph_snapshot,
            inputs_added,
            step_name_1,
            unresolved,
        };

        Ok(CompilerInfo {
            rose: RoseTree::new(node, children),
            env: state.into_env(),
        })
    }
}

/// `left[0]/left[1..]___var`: the source of a definition seen from the
/// lowest common ancestor.
fn definition_source(left_tail: &[String], var: &str) -> Option<SourceRef> {
    let (first, rest) = left_tail.split_first()?;
    let mut segments: Vec<String> = rest.to_vec();
    segments.push(var.to_string());
    Some(SourceRef::step_output(first.clone(), join_namespaces(&segments)))
}

fn append_text(target: &mut Option<String>, addition: Option<&str>) {
    let Some(addition) = addition.filter(|s| !s.is_empty()) else {
        return;
    };
    match target {
        Some(existing) if existing.split('\n').any(|line| line == addition) => {}
        Some(existing) if !existing.is_empty() => {
            existing.push('\n');
            existing.push_str(addition);
        }
        _ => *target = Some(addition.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::config::CompilerConfig;
    use crate::registry::discovery::ToolRegistry;
    use crate::registry::tool::{OutputParam, ParamType, ToolInterface};
    use crate::workflow::model::Step;
    use serde_json::json;

    const TXT: &str = "edam:format_2330";

    fn registry() -> ToolRegistry {
        let touch = ToolInterface::command_line_tool()
            .with_input("filename", InputParam::new(ParamType::named("string")))
            .with_output("file", OutputParam::new(ParamType::named("File")).with_format(TXT));
        let append = ToolInterface::command_line_tool()
            .with_input("file", InputParam::new(ParamType::named("File")).with_format(TXT))
            .with_input("str", InputParam::new(ParamType::named("string")))
            .with_output("file", OutputParam::new(ParamType::named("File")).with_format(TXT));

        ToolRegistry::new()
            .with_tool(StepId::global("touch"), Tool::new("adapters/touch.cwl", touch))
            .with_tool(StepId::global("append"), Tool::new("adapters/append.cwl", append))
    }

    fn compile_with(config: &CompilerConfig, ast: WorkflowAst) -> Result<CompilerInfo> {
        let mut registry = registry();
        let tree = WorkflowTree::new(StepId::global("main.wic"), ast);
        crate::compiler::driver::compile(&tree, config, &mut registry)
    }

    fn compile_ast(ast: WorkflowAst) -> Result<CompilerInfo> {
        compile_with(&CompilerConfig::default(), ast)
    }

    fn workflow(info: &CompilerInfo) -> &CompiledWorkflow {
        info.rose.data.compiled.as_workflow().unwrap()
    }

    fn touch(filename: &str) -> Step {
        Step::new("touch").with_binding("filename", Binding::literal(filename))
    }

    fn append(s: &str) -> Step {
        Step::new("append").with_binding("str", Binding::literal(s))
    }

    #[test]
    fn test_literals_become_workflow_inputs() {
        let info = compile_ast(WorkflowAst::from_steps(vec![touch("empty.txt")])).unwrap();
        let wf = workflow(&info);

        assert_eq!(wf.steps[0].id, "main__step__1__touch");
        assert_eq!(wf.steps[0].run, "main__step__1__touch/touch.cwl");
        assert_eq!(
            wf.steps[0].bindings["filename"],
            Binding::SourceRef(SourceRef::input("main__step__1__touch___filename"))
        );
        assert!(wf.inputs.contains_key("main__step__1__touch___filename"));
        assert_eq!(info.rose.data.inputs_file["main__step__1__touch___filename"], json!("empty.txt"));

        let out = &wf.outputs["main__step__1__touch___file"];
        assert_eq!(out.output_source.as_deref(), Some("main__step__1__touch/file"));
    }

    #[test]
    fn test_inferred_edge_from_previous_step() {
        let info = compile_ast(WorkflowAst::from_steps(vec![touch("empty.txt"), append("hello")])).unwrap();
        let wf = workflow(&info);

        assert_eq!(
            wf.steps[1].bindings["file"],
            Binding::SourceRef(SourceRef::step_output("main__step__1__touch", "file"))
        );
        assert_eq!(info.env.vars_workflow_output_internal, vec!["main__step__1__touch/file"]);
        assert_eq!(info.rose.data.graph.nodes.len(), 2);
        assert_eq!(info.rose.data.graph.edges.len(), 1);
        assert_eq!(info.rose.children.len(), 2);
        assert_eq!(info.rose.children[1].data.run_path, "main__step__2__append/append.cwl");
    }

    #[test]
    fn test_repeated_tool_gets_unique_names() {
        let info = compile_ast(WorkflowAst::from_steps(vec![touch("a.txt"), touch("b.txt")])).unwrap();
        let wf = workflow(&info);

        assert_eq!(wf.steps[0].id, "main__step__1__touch");
        assert_eq!(wf.steps[1].id, "main__step__2__touch");
        assert_eq!(wf.inputs.len(), 2);
        assert_eq!(info.rose.data.inputs_file["main__step__2__touch___filename"], json!("b.txt"));
    }

    #[test]
    fn test_flat_run_paths() {
        let config = CompilerConfig {
            relative_run_path: false,
            ..CompilerConfig::default()
        };
        let info = compile_with(&config, WorkflowAst::from_steps(vec![touch("a.txt")])).unwrap();
        assert_eq!(workflow(&info).steps[0].run, "touch.cwl");
    }

    #[test]
    fn test_declared_input_binding() {
        let mut ast = WorkflowAst::from_steps(vec![
            Step::new("touch").with_binding("filename", Binding::RawVariable("name".to_string()))
        ]);
        let mut declared = InputParam::new(ParamType::named("string"));
        declared.doc = Some("output name".to_string());
        ast.inputs.insert("name".to_string(), declared);

        let info = compile_ast(ast).unwrap();
        let wf = workflow(&info);
        assert_eq!(wf.steps[0].bindings["filename"], Binding::RawVariable("name".to_string()));
        assert_eq!(wf.inputs.keys().next().map(String::as_str), Some("name"));
        assert_eq!(info.env.input_mapping["name"], vec!["main__step__1__touch___filename"]);
    }

    #[test]
    fn test_unbound_variable() {
        let ast = WorkflowAst::from_steps(vec![
            Step::new("touch").with_binding("filename", Binding::RawVariable("empty.txt".to_string()))
        ]);
        let err = compile_ast(ast).unwrap_err();
        assert!(matches!(err, CompileError::UnboundVariable { ref name, .. } if name == "empty.txt"));
    }

    #[test]
    fn test_raw_passthrough() {
        let config = CompilerConfig {
            allow_raw_passthrough: true,
            ..CompilerConfig::default()
        };
        let ast = WorkflowAst::from_steps(vec![
            Step::new("touch").with_binding("filename", Binding::RawVariable("empty.txt".to_string()))
        ]);
        assert!(compile_with(&config, ast).is_ok());
    }

    #[test]
    fn test_unknown_step() {
        let err = compile_ast(WorkflowAst::from_steps(vec![Step::new("nonexistent")])).unwrap_err();
        assert!(matches!(err, CompileError::UnknownStep { ref key, .. } if key == "nonexistent"));
    }

    #[test]
    fn test_run_tag_fallback() {
        let mut step = Step::new("make_file").with_binding("filename", Binding::literal("a.txt"));
        step.run = Some("../adapters/touch.cwl".to_string());

        let info = compile_ast(WorkflowAst::from_steps(vec![step])).unwrap();
        assert_eq!(workflow(&info).steps[0].id, "make_file");
        assert_eq!(workflow(&info).steps[0].run, "make_file/touch.cwl");
    }

    #[test]
    fn test_run_tag_keys_must_be_unique() {
        let make_file = |filename: &str| {
            let mut step = Step::new("make_file").with_binding("filename", Binding::literal(filename));
            step.run = Some("../adapters/touch.cwl".to_string());
            step
        };

        let err = compile_ast(WorkflowAst::from_steps(vec![make_file("a.txt"), make_file("b.txt")])).unwrap_err();
        assert!(matches!(err, CompileError::InvalidWorkflow { ref reasons, .. } if reasons[0].contains("make_file")));

        let mut other = make_file("b.txt");
        other.key = "make_other".to_string();
        let info = compile_ast(WorkflowAst::from_steps(vec![make_file("a.txt"), other])).unwrap();
        assert_eq!(workflow(&info).steps[1].id, "make_other");
    }

    #[test]
    fn test_unknown_parameter() {
        let ast = WorkflowAst::from_steps(vec![touch("a.txt").with_binding("bogus", Binding::literal(1))]);
        let err = compile_ast(ast).unwrap_err();
        assert!(matches!(err, CompileError::UnknownParameter { ref param, .. } if param == "bogus"));
    }

    #[test]
    fn test_duplicate_edge_definition() {
        let anchored = |s: Step| {
            s.with_out(OutputEntry::Anchored {
                name: "file".to_string(),
                anchor: "shared".to_string(),
            })
        };
        let ast = WorkflowAst::from_steps(vec![anchored(touch("a.txt")), anchored(touch("b.txt"))]);
        let err = compile_ast(ast).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateEdgeDefinition { ref label } if label == "shared"));
    }

    #[test]
    fn test_self_reference() {
        let step = append("x")
            .with_binding("file", Binding::AliasRef("loop".to_string()))
            .with_out(OutputEntry::Anchored {
                name: "file".to_string(),
                anchor: "loop".to_string(),
            });
        let err = compile_ast(WorkflowAst::from_steps(vec![step])).unwrap_err();
        assert!(matches!(err, CompileError::SelfReference { .. }));
    }

    #[test]
    fn test_explicit_edge_between_siblings() {
        let ast = WorkflowAst::from_steps(vec![
            touch("a.txt").with_out(OutputEntry::Anchored {
                name: "file".to_string(),
                anchor: "first".to_string(),
            }),
            touch("b.txt"),
            append("x").with_binding("file", Binding::AliasRef("first".to_string())),
        ]);
        let info = compile_ast(ast).unwrap();
        let wf = workflow(&info);

        // The alias wins over inference, which would pick the nearer touch.
        assert_eq!(
            wf.steps[2].bindings["file"],
            Binding::SourceRef(SourceRef::step_output("main__step__1__touch", "file"))
        );
        assert!(info.rose.data.graph.edges.iter().any(|(_, _, a)| a["color"] == "blue"));
    }

    #[test]
    fn test_undefined_edge_at_root() {
        let ast = WorkflowAst::from_steps(vec![append("x").with_binding("file", Binding::AliasRef("nope".to_string()))]);
        let err = compile_ast(ast.clone()).unwrap_err();
        assert!(matches!(err, CompileError::UndefinedEdge { ref label, .. } if label == "nope"));

        let info = compile_with(&CompilerConfig::default().with_standalone(true), ast).unwrap();
        assert!(workflow(&info).inputs.contains_key("main__step__1__append___file"));
    }

    #[test]
    fn test_inference_disabled_leaves_inputs_unresolved() {
        let ast = WorkflowAst::from_steps(vec![touch("a.txt"), append("x")]);
        let err = compile_with(&CompilerConfig::default().with_inference_disabled(true), ast).unwrap_err();
        match err {
            CompileError::IncompleteWorkflow { params, .. } => {
                assert_eq!(params, vec!["main__step__2__append___file"]);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_partial_failure_guards() {
        let ast = WorkflowAst::from_steps(vec![touch("a.txt"), append("x")]);
        let info = compile_with(&CompilerConfig::default().with_partial_failure(true), ast).unwrap();
        let wf = workflow(&info);

        assert_eq!(
            wf.steps[1].when.as_deref(),
            Some("$(inputs[\"file\"] != null && inputs[\"str\"] != null)")
        );
        assert!(wf.requirements.iter().any(|r| r.class == JAVASCRIPT_REQUIREMENT));
    }

    #[test]
    fn test_scatter_promotes_literal_type() {
        let mut step = Step::new("touch").with_binding("filename", Binding::literal(json!(["a.txt", "b.txt"])));
        step.scatter.push("filename".to_string());

        let info = compile_ast(WorkflowAst::from_steps(vec![step])).unwrap();
        let wf = workflow(&info);
        let input = &wf.inputs["main__step__1__touch___filename"];

        assert_eq!(input.param_type.array_items(), Some(ParamType::named("string")));
        assert!(wf.requirements.iter().any(|r| r.class == SCATTER_REQUIREMENT));
        assert_eq!(info.rose.data.inputs_file["main__step__1__touch___filename"], json!(["a.txt", "b.txt"]));
    }

    #[test]
    fn test_inline_json_is_stringified() {
        let ast = WorkflowAst::from_steps(vec![
            Step::new("touch").with_binding("filename", Binding::InlineJson(json!({"a": 1})))
        ]);
        let info = compile_ast(ast).unwrap();
        assert_eq!(info.rose.data.inputs_file["main__step__1__touch___filename"], json!("{\"a\":1}"));
    }

    #[test]
    fn test_override_bindings_win() {
        let mut ast = WorkflowAst::from_steps(vec![touch("a.txt")]);
        let mut step_override = crate::workflow::model::StepOverride::default();
        step_override
            .bindings
            .insert("filename".to_string(), Binding::literal("b.txt"));
        ast.meta.steps.insert("(1, touch)".to_string(), step_override);

        let info = compile_ast(ast).unwrap();
        assert_eq!(info.rose.data.inputs_file["main__step__1__touch___filename"], json!("b.txt"));
    }

    #[test]
    fn test_show_inputs_adds_nodes() {
        let mut config = CompilerConfig::default();
        config.graph.show_inputs = true;
        let info = compile_with(&config, WorkflowAst::from_steps(vec![touch("a.txt")])).unwrap();

        let graph = &info.rose.data.graph;
        assert!(graph.has_node("main__step__1__touch___filename"));
        assert_eq!(graph.edges.len(), 1);
    }

    #[test]
    fn test_show_outputs_skips_consumed_outputs() {
        let mut config = CompilerConfig::default();
        config.graph.show_outputs = true;
        let ast = WorkflowAst::from_steps(vec![touch("a.txt"), append("x")]);
        let info = compile_with(&config, ast).unwrap();

        let graph = &info.rose.data.graph;
        assert!(!graph.has_node("main__step__1__touch___file"));
        assert!(graph.has_node("main__step__2__append___file"));
    }

    #[test]
    fn test_append_text_skips_duplicates() {
        let mut doc = Some("first".to_string());
        append_text(&mut doc, Some("second"));
        append_text(&mut doc, Some("first"));
        append_text(&mut doc, Some(""));
        assert_eq!(doc.as_deref(), Some("first\nsecond"));
    }
}
