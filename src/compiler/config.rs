//! Compiler Configuration
//!
//! Two layers of configuration:
//!
//! - [`GlobalConfig`]: per-user settings read from disk (tool and
//!   subworkflow search paths, inference rules, renaming conventions)
//! - [`CompilerConfig`]: per-run switches, usually set from the CLI
//!
//! The inference tables live in an explicit [`InferenceConfig`] value that
//! is passed down the recursion.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, info};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use super::error::{CompileError, Result};

/// Default location of the global configuration file.
pub static GLOBAL_CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(home).join(".rustweaver").join("config.json")
});

/// How edge inference treats an output of a given format.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InferenceRule {
    /// Normal candidate
    #[default]
    Default,
    /// Never a candidate; keep searching further back
    Continue,
    /// Stop searching further back once this output is reached
    Break,
}

impl InferenceRule {
    /// Parses a rule name, falling back to `Default` for unknown names.
    pub fn from_name(name: &str) -> Self {
        match name {
            "continue" => InferenceRule::Continue,
            "break" => InferenceRule::Break,
            _ => InferenceRule::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InferenceRule::Default => "default",
            InferenceRule::Continue => "continue",
            InferenceRule::Break => "break",
        }
    }
}

/// Tables used by the edge inference engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct InferenceConfig {
    /// File format → rule applied to outputs of inserted steps
    #[serde(default)]
    pub rules: IndexMap<String, InferenceRule>,

    /// Ordered `(from, to)` parameter renamings tried when matching names
    #[serde(default)]
    pub renaming_conventions: Vec<(String, String)>,
}

impl InferenceConfig {
    /// Rule for outputs of the given format.
    pub fn rule_for_format(&self, format: &str) -> InferenceRule {
        self.rules.get(format).copied().unwrap_or_default()
    }

    /// True if an output called `output` should feed a parameter called `param`.
    ///
    /// Names match directly, or after applying any renaming convention to
    /// the output name.
    pub fn names_match(&self, output: &str, param: &str) -> bool {
        output == param
            || self
                .renaming_conventions
                .iter()
                .any(|(from, to)| output == from && param == to)
    }
}

/// Per-user settings read from [`GLOBAL_CONFIG_PATH`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct GlobalConfig {
    /// Plugin namespace → directories containing tool descriptions
    #[serde(default)]
    pub search_paths_cwl: IndexMap<String, Vec<PathBuf>>,

    /// Directories searched for subworkflow files
    #[serde(default)]
    pub search_paths_wic: Vec<PathBuf>,

    #[serde(default)]
    pub inference_rules: IndexMap<String, InferenceRule>,

    #[serde(default)]
    pub renaming_conventions: Vec<(String, String)>,
}

impl GlobalConfig {
    /// Loads the configuration, as JSON or YAML depending on the extension.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| CompileError::io(path, e))?;
        debug!("Config content loaded ({} bytes)", content.len());

        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yml") | Some("yaml")
        );

        let config: GlobalConfig = if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| CompileError::parse(path, e))?
        } else {
            serde_json::from_str(&content).map_err(|e| CompileError::parse(path, e))?
        };

        info!(
            "Loaded config from {} ({} tool namespaces)",
            path.display(),
            config.search_paths_cwl.len()
        );
        Ok(config)
    }

    /// Loads the configuration from the default location, or returns the
    /// empty configuration if the file does not exist.
    pub fn load_default() -> Result<Self> {
        if GLOBAL_CONFIG_PATH.exists() {
            Self::load(&GLOBAL_CONFIG_PATH)
        } else {
            debug!("No config at {}, using defaults", GLOBAL_CONFIG_PATH.display());
            Ok(Self::default())
        }
    }

    /// Inference tables derived from this configuration.
    pub fn inference(&self) -> InferenceConfig {
        InferenceConfig {
            rules: self.inference_rules.clone(),
            renaming_conventions: self.renaming_conventions.clone(),
        }
    }
}

/// Options for the graph snapshot.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GraphOptions {
    /// Subworkflows deeper than this are collapsed into a single node
    pub inline_depth: usize,
    pub show_inputs: bool,
    pub show_outputs: bool,
    /// Label step nodes with their synthetic names instead of their keys
    pub label_stepname: bool,
    pub dark_theme: bool,
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self {
            inline_depth: 10,
            show_inputs: false,
            show_outputs: false,
            label_stepname: false,
            dark_theme: false,
        }
    }
}

/// Per-run compiler switches.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CompilerConfig {
    /// Leave unbound required parameters unresolved instead of inferring edges
    pub inference_disable: bool,
    /// Insert conversion steps found by edge inference
    pub insert_steps_automatically: bool,
    /// Accept bare string bindings that name no workflow input
    pub allow_raw_passthrough: bool,
    /// Guard every step with a `when` clause so missing inputs skip it
    pub partial_failure_enable: bool,
    /// Write subworkflows into per-step subdirectories
    pub relative_run_path: bool,
    /// Treat undefined aliases at the root as workflow inputs
    pub standalone: bool,
    pub graph: GraphOptions,
    pub inference: InferenceConfig,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            inference_disable: false,
            insert_steps_automatically: true,
            allow_raw_passthrough: false,
            partial_failure_enable: false,
            relative_run_path: true,
            standalone: false,
            graph: GraphOptions::default(),
            inference: InferenceConfig::default(),
        }
    }
}

impl CompilerConfig {
    /// Sets the inference tables.
    pub fn with_inference(mut self, inference: InferenceConfig) -> Self {
        self.inference = inference;
        self
    }

    /// Enables or disables edge inference.
    pub fn with_inference_disabled(mut self, disabled: bool) -> Self {
        self.inference_disable = disabled;
        self
    }

    /// Enables or disables partial failure guards.
    pub fn with_partial_failure(mut self, enabled: bool) -> Self {
        self.partial_failure_enable = enabled;
        self
    }

    /// Compiles as a standalone root (undefined aliases become inputs).
    pub fn with_standalone(mut self, standalone: bool) -> Self {
        self.standalone = standalone;
        self
    }
}
