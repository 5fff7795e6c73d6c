//! RustWeaver CLI Entry Point
//!
//! Provides command-line interface for workflow compilation.
//!
//! # Usage
//!
//! ```bash
//! # Compile a workflow with the tools listed in ~/.rustweaver/config.json
//! rustweaver main.wic
//!
//! # Add a tool directory and write the results elsewhere
//! rustweaver main.wic --tools global=cwl_adapters --output-dir build
//!
//! # Leave unbound parameters unresolved instead of inferring edges
//! rustweaver main.wic --inference-disable
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info, warn};

use rustweaver::compiler::{compile, CompilerConfig, GlobalConfig};
use rustweaver::output::write_to_disk;
use rustweaver::registry::ToolRegistry;
use rustweaver::workflow::model::GLOBAL_NAMESPACE;
use rustweaver::workflow::parser::load_workflow_tree;
use rustweaver::{APP_NAME, VERSION};

/// Default directory for compiled output.
const DEFAULT_OUTPUT_DIR: &str = "autogenerated";

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    workflow_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    /// `(namespace, directory)` pairs from `--tools`
    tool_dirs: Vec<(String, PathBuf)>,
    search_paths: Vec<PathBuf>,
    output_dir: PathBuf,
    compiler: CompilerConfig,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflow_path: None,
            config_path: None,
            tool_dirs: Vec::new(),
            search_paths: Vec::new(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            compiler: CompilerConfig::default(),
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Hierarchical Workflow Compiler");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: rustweaver [OPTIONS] <WORKFLOW_FILE>");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW_FILE>        Path to the root workflow (.wic)");
    println!();
    println!("Options:");
    println!("  --config PATH          Global config file (default: ~/.rustweaver/config.json)");
    println!("  --tools [NS=]DIR       Add a tool description directory (namespace: {})", GLOBAL_NAMESPACE);
    println!("  --search-path DIR      Add a subworkflow search directory");
    println!("  --output-dir DIR       Output directory (default: {})", DEFAULT_OUTPUT_DIR);
    println!("  --inference-disable    Do not infer edges between steps");
    println!("  --no-insert            Do not insert conversion steps automatically");
    println!("  --allow-raw            Accept bare binding values that name no input");
    println!("  --partial-failure      Guard steps so missing inputs skip them");
    println!("  --flat                 Write every file into the output directory");
    println!("  --standalone           Treat undefined aliases as workflow inputs");
    println!("  --graph-inline-depth N Collapse subworkflows deeper than N");
    println!("  --graph-show-inputs    Draw nodes for inline input values");
    println!("  --graph-show-outputs   Draw nodes for step outputs");
    println!("  --graph-label-stepname Label nodes with step names");
    println!("  --graph-dark-theme     Use light edge labels");
    println!("  --verbose              Enable debug logging");
    println!("  --help                 Show this help message");
    println!("  --version              Show version information");
    println!();
    println!("Examples:");
    println!("  rustweaver main.wic");
    println!("  rustweaver main.wic --tools global=cwl_adapters --output-dir build");
}

/// Returns the value following option `name`.
fn option_value<'a>(args: &'a [String], i: &mut usize, name: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires an argument", name))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => config.verbose = true,
            "--inference-disable" => config.compiler.inference_disable = true,
            "--no-insert" => config.compiler.insert_steps_automatically = false,
            "--allow-raw" => config.compiler.allow_raw_passthrough = true,
            "--partial-failure" => config.compiler.partial_failure_enable = true,
            "--flat" => config.compiler.relative_run_path = false,
            "--standalone" => config.compiler.standalone = true,
            "--graph-show-inputs" => config.compiler.graph.show_inputs = true,
            "--graph-show-outputs" => config.compiler.graph.show_outputs = true,
            "--graph-label-stepname" => config.compiler.graph.label_stepname = true,
            "--graph-dark-theme" => config.compiler.graph.dark_theme = true,
            "--graph-inline-depth" => {
                let value = option_value(args, &mut i, arg)?;
                config.compiler.graph.inline_depth = value
                    .parse()
                    .map_err(|_| format!("Invalid inline depth: {}", value))?;
            }
            "--config" => {
                config.config_path = Some(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--tools" => {
                let value = option_value(args, &mut i, arg)?;
                let (ns, dir) = value.split_once('=').unwrap_or((GLOBAL_NAMESPACE, value));
                if ns.is_empty() {
                    return Err(format!("Empty namespace in --tools {}", value));
                }
                config.tool_dirs.push((ns.to_string(), PathBuf::from(dir)));
            }
            "--search-path" => {
                config.search_paths.push(PathBuf::from(option_value(args, &mut i, arg)?));
            }
            "--output-dir" => {
                config.output_dir = PathBuf::from(option_value(args, &mut i, arg)?);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.workflow_path.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.workflow_path = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Builds the tool registry from the global config and `--tools` flags.
fn build_registry(global: &GlobalConfig, extra: &[(String, PathBuf)]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let configured = global
        .search_paths_cwl
        .iter()
        .flat_map(|(ns, dirs)| dirs.iter().map(move |d| (ns.clone(), d.clone())));

    for (ns, dir) in configured.chain(extra.iter().cloned()) {
        if !dir.is_dir() {
            warn!("Tool directory does not exist: {}", dir.display());
            continue;
        }
        if let Err(e) = registry.load_dir(&ns, &dir) {
            warn!("Could not load tools from {}: {}", dir.display(), e);
        }
    }

    if registry.is_empty() {
        warn!("No tools registered; only subworkflow steps can be resolved");
    }
    registry
}

/// Writes a timestamped diagnostic next to the compiled output.
fn write_error_report(output_dir: &Path, stem: &str, message: &str) -> Option<PathBuf> {
    let path = output_dir.join(format!("error_{}.txt", stem));
    let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    let report = format!("[{}] Compilation of '{}' failed\n\n{}\n", timestamp, stem, message);

    fs::create_dir_all(output_dir)
        .and_then(|_| fs::write(&path, report))
        .map(|_| path)
        .map_err(|e| warn!("Could not write error report: {}", e))
        .ok()
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let mut config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    // Setup logging
    setup_logging(config.verbose);

    // Print banner
    print_banner();

    let workflow_path = config.workflow_path.clone().ok_or("No workflow file given")?;
    let stem = workflow_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("workflow")
        .to_string();

    // Load configuration
    let global = match &config.config_path {
        Some(path) => GlobalConfig::load(path)?,
        None => GlobalConfig::load_default()?,
    };
    config.compiler.inference = global.inference();

    let mut registry = build_registry(&global, &config.tool_dirs);
    info!("Registry: {} tools", registry.len());

    let mut search_paths = global.search_paths_wic.clone();
    search_paths.extend(config.search_paths.iter().cloned());

    // Load and compile
    info!("Loading workflow: {}", workflow_path.display());
    let compiled = load_workflow_tree(&workflow_path, &search_paths)
        .and_then(|tree| compile(&tree, &config.compiler, &mut registry));

    let info = match compiled {
        Ok(info) => info,
        Err(e) => {
            error!("Compilation failed: {}", e);
            if let Some(report) = write_error_report(&config.output_dir, &stem, &e.to_string()) {
                info!("Error report written to {}", report.display());
            }
            return Err(e.into());
        }
    };

    // Write results
    let written = write_to_disk(&info.rose, &config.output_dir, config.compiler.relative_run_path)?;

    println!();
    println!(
        "{} {} ({} files in {})",
        "Compiled".green().bold(),
        workflow_path.display(),
        written.len(),
        config.output_dir.display()
    );
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
