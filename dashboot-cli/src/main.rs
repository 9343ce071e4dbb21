use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use dashboot_core::variants::DEFAULT_PYTHON;
use dashboot_core::{Deployment, SequenceExecution, SequenceStatus, StepStatus, Variant};
use dashboot_parser::{parse_deployfile, render_deployfile};
use dashboot_runner::{preflight, LaunchMode, OutputMode, SequenceExecutor, ServerLauncher};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{self, ExitStatus};
use tracing::info;

#[derive(Parser)]
#[command(name = "dashboot")]
#[command(about = "Run the defect extractions, then serve the dashboard", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Arguments for `run` when no subcommand is given
    #[command(flatten)]
    run: RunArgs,

    /// dotenv file loaded before anything runs (defaults to ./.env if present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Working directory for every step and the server
    #[arg(long, global = true)]
    work_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the extraction steps, then launch the server (default)
    Run(RunArgs),

    /// Print the steps that would run, without running them
    Plan {
        #[command(flatten)]
        selection: Selection,

        /// Print the deployment as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check that every program is on PATH and the port is set
    Check {
        #[command(flatten)]
        selection: Selection,

        /// Port to check instead of reading the port variable
        #[arg(long)]
        port: Option<u16>,
    },

    /// Generate a Deployfile from a built-in variant
    Init {
        /// Where to write the Deployfile
        #[arg(short, long, default_value = "Deployfile")]
        path: PathBuf,

        /// Variant to start from
        #[arg(long, default_value = "standard")]
        variant: Variant,

        /// Interpreter for the extraction scripts
        #[arg(long, env = "DASHBOOT_PYTHON", default_value = DEFAULT_PYTHON)]
        python: String,
    },

    /// List the built-in deployment variants
    Variants,
}

/// Which deployment to use. `--variant` wins over a Deployfile; with
/// neither, the standard variant runs.
#[derive(Args, Clone, Debug)]
struct Selection {
    /// Built-in deployment variant
    #[arg(long)]
    variant: Option<Variant>,

    /// Deployfile to load instead of a built-in variant
    #[arg(long, env = "DASHBOOT_DEPLOYFILE")]
    deployfile: Option<PathBuf>,

    /// Interpreter for the built-in variants
    #[arg(long, env = "DASHBOOT_PYTHON", default_value = DEFAULT_PYTHON)]
    python: String,
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    #[command(flatten)]
    selection: Selection,

    /// Port to bind instead of reading the port variable
    #[arg(long)]
    port: Option<u16>,

    /// Wait for the server as a child instead of replacing this process
    #[arg(long)]
    no_exec: bool,

    /// Capture step output into the report instead of streaming it
    #[arg(long)]
    capture: bool,

    /// Write the execution record as JSON before the server starts
    #[arg(long)]
    report: Option<PathBuf>,
}

impl Selection {
    fn load(&self) -> anyhow::Result<Deployment> {
        if let Some(variant) = self.variant {
            return Ok(variant.deployment(&self.python));
        }

        if let Some(path) = &self.deployfile {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read Deployfile at {}", path.display()))?;
            return parse_deployfile(&content)
                .with_context(|| format!("Invalid Deployfile at {}", path.display()));
        }

        Ok(Variant::Standard.deployment(&self.python))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let env_file = load_env_file(cli.env_file.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Some(path) = &env_file {
        info!(path = %path.display(), "Loaded environment file");
    }

    let work_dir = cli.work_dir;
    match cli.command.unwrap_or(Commands::Run(cli.run)) {
        Commands::Run(args) => run(args, work_dir.as_deref()).await?,
        Commands::Plan { selection, json } => {
            let deployment = selection.load()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&deployment)?);
            } else {
                print_plan(&deployment);
            }
        }
        Commands::Check { selection, port } => {
            let deployment = selection.load()?;
            let problems = preflight(&deployment, work_dir.as_deref(), port, |key| {
                std::env::var(key).ok()
            });
            if problems.is_empty() {
                println!("✓ {} is ready to run", deployment.name);
            } else {
                for problem in &problems {
                    eprintln!("✗ {}", problem);
                }
                process::exit(1);
            }
        }
        Commands::Init {
            path,
            variant,
            python,
        } => {
            init_deployfile(&path, &variant.deployment(&python))?;
            println!("✓ Created Deployfile at {}", path.display());
        }
        Commands::Variants => {
            for variant in Variant::ALL {
                println!("  {:<14} {}", variant.name(), variant.description());
            }
        }
    }

    Ok(())
}

fn load_env_file(path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    match path {
        Some(path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
            Ok(Some(path.to_path_buf()))
        }
        None => Ok(dotenvy::dotenv().ok()),
    }
}

async fn run(args: RunArgs, work_dir: Option<&Path>) -> anyhow::Result<()> {
    let deployment = args.selection.load()?;

    let output = if args.capture {
        OutputMode::Capture
    } else {
        OutputMode::Inherit
    };
    let mut executor = SequenceExecutor::new().with_output(output);
    let mut launcher = ServerLauncher::new();
    if let Some(dir) = work_dir {
        executor = executor.with_work_dir(dir);
        launcher = launcher.with_work_dir(dir);
    }
    let mode = if args.no_exec {
        LaunchMode::Spawn
    } else {
        LaunchMode::default()
    };

    let outcome = deploy(
        &deployment,
        &executor,
        &launcher,
        DeployOptions {
            port: args.port,
            mode,
            report: args.report.as_deref(),
        },
        |key| std::env::var(key).ok(),
    )
    .await?;

    match outcome {
        RunOutcome::Halted { execution } => {
            eprintln!(
                "Deployment {} halted, server not started",
                execution.deployment_name
            );
            process::exit(2);
        }
        RunOutcome::Served { execution, status } => {
            let code = exit_code(status);
            info!(execution_id = %execution.id, exit_code = code, "Server exited");
            process::exit(code);
        }
    }
}

struct DeployOptions<'a> {
    port: Option<u16>,
    mode: LaunchMode,
    report: Option<&'a Path>,
}

/// How a run ended when the server did not take over the process
enum RunOutcome {
    Halted {
        execution: SequenceExecution,
    },
    Served {
        execution: SequenceExecution,
        status: ExitStatus,
    },
}

/// Run the steps, then launch the server. The port variable is looked up
/// through `lookup` only after the last step has finished.
async fn deploy<F>(
    deployment: &Deployment,
    executor: &SequenceExecutor,
    launcher: &ServerLauncher,
    options: DeployOptions<'_>,
    lookup: F,
) -> anyhow::Result<RunOutcome>
where
    F: Fn(&str) -> Option<String>,
{
    println!("Deploying {} (v{})", deployment.name, deployment.version);
    let execution = executor.execute(deployment).await?;

    if let Some(path) = options.report {
        write_report(path, &execution)?;
    }
    print_summary(&execution);

    if !execution.status.may_launch() {
        return Ok(RunOutcome::Halted { execution });
    }

    let launch = ServerLauncher::resolve(&deployment.serve, options.port, lookup)?;
    if let Some(announce) = &deployment.serve.announce {
        println!("{}", announce);
    }
    println!("Serving on http://{}", launch.bind_address());
    std::io::stdout().flush()?;

    let status = launcher.launch(&launch, options.mode).await?;
    Ok(RunOutcome::Served { execution, status })
}

/// Exit code a shell would report for the server: its own code, or
/// 128 + signal when it was killed.
#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

fn write_report(path: &Path, execution: &SequenceExecution) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(execution)?;
    fs::write(path, json)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "Wrote execution report");
    Ok(())
}

fn init_deployfile(path: &Path, deployment: &Deployment) -> anyhow::Result<()> {
    if path.exists() {
        bail!(
            "Deployfile already exists at {}; use a different path or remove it",
            path.display()
        );
    }
    fs::write(path, render_deployfile(deployment))?;
    Ok(())
}

fn print_plan(deployment: &Deployment) {
    println!("Deployment: {} (v{})", deployment.name, deployment.version);
    println!("\nSteps:");
    for (idx, step) in deployment.steps.iter().enumerate() {
        println!(
            "\n  {}. {} (on_failure: {})",
            idx + 1,
            step.name,
            step.on_failure.as_str()
        );
        println!("     $ {}", step.command_line());
        for (key, value) in &step.env {
            println!("     {}={:?}", key, value);
        }
    }

    let serve = &deployment.serve;
    println!("\nServe:");
    println!("     $ {}", serve.command_line());
    println!("     host: {}", serve.host);
    println!("     port: ${}", serve.port_env);
}

fn print_summary(exec: &SequenceExecution) {
    println!("\nSequence {}: {}", exec.id, format_status(exec.status));
    for (idx, step) in exec.step_results.iter().enumerate() {
        let code = step
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {}. {} - {} (exit {}, {}ms)",
            idx + 1,
            step.step_name,
            format_step_status(step.status),
            code,
            step.duration_ms
        );
        if let Some(warning) = &step.warning {
            println!("     Warning: {}", warning);
        }
    }
}

fn format_status(status: SequenceStatus) -> &'static str {
    match status {
        SequenceStatus::Running => "RUNNING",
        SequenceStatus::Succeeded => "SUCCEEDED",
        SequenceStatus::CompletedWithFailures => "COMPLETED WITH FAILURES",
        SequenceStatus::Halted => "HALTED",
    }
}

fn format_step_status(step_status: StepStatus) -> &'static str {
    match step_status {
        StepStatus::Success => "SUCCESS",
        StepStatus::Failed => "FAILED",
        StepStatus::Skipped => "SKIPPED",
    }
}
