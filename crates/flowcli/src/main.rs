// crates/flowcli/src/main.rs

use anyhow::{bail, Context as _, Result};
use clap::{Parser, Subcommand};
use flowcore::{
    context_from_json, Context, CyclePolicy, ExecutionEvent, ExecutionId, NodeEvent, NodeSpec,
    Workflow, WorkflowError,
};
use flowruntime::{ExecutionGraph, FileStore, FlowRuntime, RunResult, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
struct Cli {
    /// Directory holding execution records
    #[arg(long, env = "FLOW_STORE_DIR", default_value = ".flow/executions", global = true)]
    store_dir: PathBuf,

    /// Whole-run deadline in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    /// Show debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Initial context as JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// User the execution runs on behalf of
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Continue a paused or failed execution
    Resume {
        /// Path to the workflow JSON file the execution was started from
        #[arg(short, long)]
        file: PathBuf,

        /// Execution id
        execution_id: ExecutionId,

        /// JSON object merged into the context before continuing
        #[arg(short, long)]
        input: Option<String>,
    },

    /// Show a stored execution
    Status {
        execution_id: ExecutionId,

        /// Print every checkpoint
        #[arg(short, long)]
        checkpoints: bool,
    },

    /// List stored executions, newest first
    List {
        /// Only executions of this workflow id
        #[arg(short, long)]
        workflow: Option<String>,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Run { ref file, ref input, ref user } => {
            let workflow = load_workflow(file)?;
            let input = parse_input(input.as_deref())?;
            let runtime = build_runtime(&cli).await?;
            run_workflow(&runtime, &workflow, user, input).await?;
        }

        Commands::Resume {
            ref file,
            execution_id,
            ref input,
        } => {
            let workflow = load_workflow(file)?;
            let input = match input {
                Some(raw) => Some(parse_input(Some(raw))?),
                None => None,
            };
            let runtime = build_runtime(&cli).await?;
            resume_workflow(&runtime, &workflow, execution_id, input).await?;
        }

        Commands::Status {
            execution_id,
            checkpoints,
        } => {
            let runtime = build_runtime(&cli).await?;
            show_status(&runtime, execution_id, checkpoints).await?;
        }

        Commands::List { ref workflow } => {
            let runtime = build_runtime(&cli).await?;
            list_executions(&runtime, workflow.as_deref()).await?;
        }

        Commands::Validate { ref file } => {
            validate_workflow(file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { ref output } => {
            create_example_workflow(output)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

async fn build_runtime(cli: &Cli) -> Result<FlowRuntime> {
    let mut config = RuntimeConfig::from_env();
    if let Some(ms) = cli.timeout_ms {
        config = config.with_workflow_timeout(Duration::from_millis(ms));
    }

    let store = FileStore::open(&cli.store_dir)
        .await
        .with_context(|| format!("opening store at {}", cli.store_dir.display()))?;
    tracing::debug!(
        store_dir = %cli.store_dir.display(),
        timeout_ms = config.workflow_timeout.as_millis() as u64,
        "runtime configured"
    );

    Ok(
        FlowRuntime::with_registry(Arc::new(flownodes::standard_registry()), config)
            .with_store(Arc::new(store)),
    )
}

fn load_workflow(file: &Path) -> Result<Workflow> {
    let workflow_json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let workflow: Workflow = serde_json::from_str(&workflow_json)
        .with_context(|| format!("parsing {}", file.display()))?;
    Ok(workflow)
}

fn parse_input(input: Option<&str>) -> Result<Context> {
    let Some(raw) = input else {
        return Ok(Context::new());
    };
    let json: serde_json::Value = serde_json::from_str(raw).context("parsing --input")?;
    match context_from_json(json) {
        Some(context) => Ok(context),
        None => bail!("Input must be a JSON object"),
    }
}

/// Print events as they arrive until the returned task is aborted.
fn spawn_event_printer(runtime: &FlowRuntime) -> tokio::task::JoinHandle<()> {
    let mut events = runtime.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::WorkflowStarted { resumed, .. } => {
                    if resumed {
                        println!("▶️  Workflow resumed");
                    } else {
                        println!("▶️  Workflow started");
                    }
                }
                ExecutionEvent::NodeStarted {
                    node_id, node_type, ..
                } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, node_type);
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    step,
                    duration_ms,
                    ..
                } => {
                    println!("  ✅ Node {} completed in {}ms (step {})", node_id, duration_ms, step);
                }
                ExecutionEvent::NodePaused { node_id, .. } => {
                    println!("  ⏸️  Node {} paused the workflow", node_id);
                }
                ExecutionEvent::NodeFailed { node_id, error, .. } => {
                    println!("  ❌ Node {} failed: {}", node_id, error);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Progress { percent, message } => {
                        if let Some(msg) = message {
                            println!("     📊 [{}] {}% - {}", node_id, percent, msg);
                        } else {
                            println!("     📊 [{}] {}%", node_id, percent);
                        }
                    }
                    NodeEvent::Data { .. } => {}
                },
                ExecutionEvent::WorkflowFinished {
                    status, duration_ms, ..
                } => {
                    println!("🏁 Workflow {} after {}ms", status, duration_ms);
                }
            }
        }
    })
}

async fn run_workflow(
    runtime: &FlowRuntime,
    workflow: &Workflow,
    user: &str,
    input: Context,
) -> Result<()> {
    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();

    let printer = spawn_event_printer(runtime);
    let result = runtime.run(workflow, user, input).await;
    finish(printer, result?).await
}

async fn resume_workflow(
    runtime: &FlowRuntime,
    workflow: &Workflow,
    execution_id: ExecutionId,
    input: Option<Context>,
) -> Result<()> {
    println!("🔁 Resuming {} ({})", execution_id, workflow.name);
    println!();

    let printer = spawn_event_printer(runtime);
    let result = runtime.resume_with(workflow, execution_id, input).await;
    finish(printer, result?).await
}

async fn finish(printer: tokio::task::JoinHandle<()>, result: RunResult) -> Result<()> {
    // Give the printer a moment to drain the channel.
    tokio::time::sleep(Duration::from_millis(100)).await;
    printer.abort();

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Status: {}", result.status);

    if !result.output.is_empty() {
        println!();
        println!("📤 Context:");
        let mut keys: Vec<&String> = result.output.keys().collect();
        keys.sort();
        for key in keys {
            println!("     {}: {}", key, result.output[key]);
        }
    }

    if let Some(error) = &result.error {
        println!();
        let hint = if result.retryable { " (retryable)" } else { "" };
        bail!("execution {} failed{}: {}", result.execution_id, hint, error);
    }

    Ok(())
}

async fn show_status(runtime: &FlowRuntime, execution_id: ExecutionId, checkpoints: bool) -> Result<()> {
    let record = runtime.get_state(execution_id).await?;
    let header = &record.header;

    println!("🔎 Execution {}", header.id);
    println!("   Workflow: {}", header.workflow_id);
    println!("   User: {}", header.user_id);
    println!("   Status: {}", header.status);
    println!("   Step: {}/{}", header.current_step, header.total_steps);
    println!("   Checkpoints: {}", record.checkpoints.len());
    println!("   Updated: {}", header.updated_at.to_rfc3339());
    if let Some(error) = &header.error {
        println!("   Error: {}", error);
    }

    if checkpoints {
        println!();
        for cp in &record.checkpoints {
            let marker = if cp.is_error() { "❌" } else { "✅" };
            println!(
                "  {} #{} step {} {} ({})",
                marker, cp.sequence, cp.step_number, cp.node_id, cp.node_name
            );
            if let Some(error) = &cp.error {
                println!("       error: {}", error);
            }
            if !cp.pending.is_empty() {
                println!("       next: {}", cp.pending.join(", "));
            }
        }
    }

    Ok(())
}

async fn list_executions(runtime: &FlowRuntime, workflow: Option<&str>) -> Result<()> {
    let headers = runtime.list_executions(workflow).await?;
    if headers.is_empty() {
        println!("No executions found");
        return Ok(());
    }

    for header in headers {
        println!(
            "{}  {:<9}  {:>3}/{:<3}  {}  {}",
            header.id,
            header.status,
            header.current_step,
            header.total_steps,
            header.created_at.format("%Y-%m-%d %H:%M:%S"),
            header.workflow_id
        );
    }
    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    workflow.validate()?;

    let registry = flownodes::standard_registry();
    let config = RuntimeConfig::from_env();
    let mut problems = Vec::new();

    for node in &workflow.nodes {
        if config.is_trigger(&node.node_type) {
            continue;
        }
        match registry.get(&node.node_type) {
            Some(executor) => {
                if let Err(e) = executor.validate_config(&node.config) {
                    problems.push(format!("{}: {}", node.id, e));
                }
            }
            None => problems.push(format!(
                "{}: {}",
                node.id,
                WorkflowError::UnknownNodeType(node.node_type.clone())
            )),
        }
    }

    let graph = ExecutionGraph::build(&workflow);
    let cycles = graph.cycles();
    if !cycles.is_empty() {
        let groups: Vec<String> = cycles.iter().map(|c| c.join(" -> ")).collect();
        if config.cycle_policy_for(&workflow) == CyclePolicy::Reject {
            problems.push(format!("cycles not allowed: {}", groups.join("; ")));
        } else {
            println!("⚠️  Cycles (each node still runs at most once): {}", groups.join("; "));
        }
    }

    if !problems.is_empty() {
        for problem in &problems {
            println!("   ❌ {}", problem);
        }
        bail!("{} problem(s) found", problems.len());
    }

    let entries = graph.entry_nodes(|t| config.is_trigger(t));
    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!("   Entry nodes: {}", entries.join(", "));

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = flownodes::standard_registry();

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({})", node_type, metadata.category);
            println!("    {}", metadata.description);
            for port in &metadata.outputs {
                println!("      → {}: {}", port.name, port.description);
            }
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new("Example approval workflow");
    workflow.description =
        Some("Routes large amounts through a manual approval step".to_string());

    let trigger = workflow.add_node(NodeSpec::new("start", "trigger.manual"));
    let check = workflow.add_node(
        NodeSpec::new("check", "flow.condition")
            .with_name("Large amount?")
            .with_config("field", "amount")
            .with_config("operator", "gt")
            .with_config("value", 100i64),
    );
    let wait = workflow.add_node(
        NodeSpec::new("approve", "flow.wait")
            .with_name("Wait for approval")
            .with_config("event", "approval"),
    );
    let log = workflow.add_node(
        NodeSpec::new("log", "debug.log")
            .with_name("Log result")
            .with_config("message", "approval flow finished"),
    );

    workflow.link(trigger, check.clone());
    workflow.connect(check.clone(), "yes", wait.clone(), "default");
    workflow.connect(check, "no", log.clone(), "default");
    workflow.link(wait, log);

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  flow run --file {} --input '{{\"amount\": 250}}'", output.display());
    println!("Then continue the paused execution with:");
    println!(
        "  flow resume --file {} <execution id> --input '{{\"approved\": true}}'",
        output.display()
    );

    Ok(())
}
