//! Weave CLI - validate, order and run workflow documents

use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;

use weave::compiler;
use weave::dataflow::{self, DataFlowError};
use weave::{
    compile, execution_order, run_workflow, CompileOptions, ExecutionResult, FixSuggestion,
    Params, Registry, RunStatus, RuntimeLimits, TemplateMode, WeaveError, WorkflowIr,
};

#[derive(Parser)]
#[command(name = "weave")]
#[command(about = "Weave - workflow compiler and template-resolving runtime")]
#[command(version)]
struct Cli {
    /// Log step lifecycle at info level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow: structure, data flow and compilation
    Validate {
        /// Path to a .json, .yaml or .yml workflow
        file: PathBuf,

        #[command(flatten)]
        params: ParamArgs,
    },

    /// Run a workflow and print its result
    Run {
        /// Path to a .json, .yaml or .yml workflow
        file: PathBuf,

        #[command(flatten)]
        params: ParamArgs,

        /// Record resolution problems as warnings instead of failing
        #[arg(long, conflicts_with = "strict")]
        permissive: bool,

        /// Fail on any resolution problem (overrides the document)
        #[arg(long)]
        strict: bool,

        /// Print the full execution result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the deterministic execution order
    Order {
        /// Path to a .json, .yaml or .yml workflow
        file: PathBuf,
    },
}

#[derive(Args)]
struct ParamArgs {
    /// Workflow parameter, repeatable; values are parsed as JSON when possible
    #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, Value)>,
}

fn parse_param(raw: &str) -> std::result::Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let result = match cli.command {
        Commands::Validate { file, params } => validate(&file, params.params),
        Commands::Run {
            file,
            params,
            permissive,
            strict,
            json,
        } => {
            let mode = match (permissive, strict) {
                (true, _) => Some(TemplateMode::Permissive),
                (_, true) => Some(TemplateMode::Strict),
                _ => None,
            };
            run(&file, params.params, mode, json)
        }
        Commands::Order { file } => order(&file),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.downcast_ref::<WeaveError>().and_then(|w| w.fix_suggestion()) {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            ExitCode::from(1)
        }
    }
}

fn load(file: &Path) -> Result<WorkflowIr> {
    WorkflowIr::from_path(file).with_context(|| format!("failed to load '{}'", file.display()))
}

/// Collect params, reading piped stdin into the input that asks for it
fn collect_params(ir: &WorkflowIr, pairs: Vec<(String, Value)>) -> Result<Params> {
    let mut params: Params = pairs.into_iter().collect();

    let stdin_input = ir
        .inputs
        .iter()
        .find(|(name, spec)| spec.stdin && !params.contains_key(*name))
        .map(|(name, _)| name.clone());
    if let Some(name) = stdin_input {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            let mut buffer = String::new();
            stdin
                .lock()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            params.insert(name, Value::String(buffer.trim_end_matches('\n').to_string()));
        }
    }
    Ok(params)
}

fn validate(file: &Path, pairs: Vec<(String, Value)>) -> Result<bool> {
    let ir = load(file)?;
    let params = collect_params(&ir, pairs)?;

    let mut options = CompileOptions::for_file(file);
    options.limits = RuntimeLimits::from_env();
    options.external_params = params.keys().cloned().collect();

    let registry = Arc::new(Registry::with_builtins());
    let view = compiler::dataflow_view(&ir, &registry);
    let diagnostics = dataflow::validate(&view, &options.external_params);
    let errors: Vec<&DataFlowError> = diagnostics.iter().filter(|d| d.is_error()).collect();
    if !errors.is_empty() {
        for error in &errors {
            eprintln!("{} {}", "Error:".red().bold(), error);
            if let Some(suggestion) = error.suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
        }
        bail!(
            "'{}' has {} data-flow error(s)",
            file.display(),
            errors.len()
        );
    }

    let compiled = compile(&ir, &registry, &options)?;
    for warning in compiled.diagnostics().iter().chain(compiled.warnings()) {
        eprintln!("{} {}", "Warning:".yellow().bold(), warning.message);
    }

    println!("{} Workflow '{}' is valid", "✓".green(), file.display());
    println!("  Name: {}", ir.display_name());
    println!("  Nodes: {}", ir.nodes.len());
    println!("  Edges: {}", ir.edges.len());
    println!("  Start: {}", compiled.start());
    println!("  Mode: {}", compiled.policy().mode());
    Ok(true)
}

fn run(
    file: &Path,
    pairs: Vec<(String, Value)>,
    mode: Option<TemplateMode>,
    json: bool,
) -> Result<bool> {
    let ir = load(file)?;
    let params = collect_params(&ir, pairs)?;

    let mut options = CompileOptions::for_file(file);
    options.limits = RuntimeLimits::from_env();
    options.mode = mode;

    let registry = Arc::new(Registry::with_builtins());
    let result = run_workflow(&ir, &registry, params, &options);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("failed to serialize result")?
        );
    } else {
        print_result(&result);
    }
    Ok(result.success)
}

fn print_result(result: &ExecutionResult) {
    let status = match result.status {
        RunStatus::Success => "success".green().bold(),
        RunStatus::Degraded => "degraded".yellow().bold(),
        RunStatus::Failed => "failed".red().bold(),
    };
    println!("{} Run {}", "→".cyan(), status);

    let completed = result.completed_nodes();
    if !completed.is_empty() {
        println!("  Completed: {}", completed.join(", "));
    }

    if !result.outputs.is_empty() {
        println!("{}", "Outputs:".cyan().bold());
        for (name, value) in &result.outputs {
            println!("  {}: {}", name, value);
        }
    }

    for note in &result.diagnostics {
        eprintln!("{} {}", "Note:".blue().bold(), note.message);
    }
    for warning in &result.warnings {
        match &warning.node_id {
            Some(id) => eprintln!("{} [{}] {}", "Warning:".yellow().bold(), id, warning.message),
            None => eprintln!("{} {}", "Warning:".yellow().bold(), warning.message),
        }
    }
    for error in &result.errors {
        match &error.node_id {
            Some(id) => eprintln!("{} [{}] {}", "Error:".red().bold(), id, error.message),
            None => eprintln!("{} {}", "Error:".red().bold(), error.message),
        }
        if let Some(fix) = &error.fix {
            eprintln!("  {} {}", "Fix:".yellow(), fix);
        }
    }
}

fn order(file: &Path) -> Result<bool> {
    let ir = load(file)?;
    let order = execution_order(&ir)?;
    for (position, node_id) in order.iter().enumerate() {
        println!("{:>3}. {}", position + 1, node_id);
    }
    Ok(true)
}
