use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use agent_dispatch::cli::{Cli, Commands, ConfigAction, Display, OutputFormat};
use agent_dispatch::config::DispatchConfig;
use agent_dispatch::error::{DispatchError, Result};
use agent_dispatch::instruction::Mode;
use agent_dispatch::orchestrator::PlanOrchestrator;
use agent_dispatch::output::{OutputWriter, PlanOutput, TaskOutput};
use agent_dispatch::plan::{FileScope, PlanDocument, PlanResult, PlanStatus, QuickTaskRequest};
use agent_dispatch::strategy::{Capabilities, StrategyRegistry};

/// Exit code when some, but not all, plan steps succeeded.
const EXIT_PARTIAL: u8 = 2;

/// Context for command output handling.
struct OutputContext<'a> {
    display: &'a Display,
    writer: &'a OutputWriter,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            Display::new().print_error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("agent_dispatch=debug")
    } else {
        EnvFilter::new("agent_dispatch=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let display = Display::new();
    let writer = OutputWriter::new(cli.output);
    let out = OutputContext {
        display: &display,
        writer: &writer,
    };
    let config_path = cli.config;

    match cli.command {
        Commands::Run {
            task,
            repo,
            backend,
            model,
            allow,
            context,
            timeout,
            full,
        } => {
            let repo = resolve_repo(repo)?;
            let config = load_config(config_path.as_deref(), &repo).await?;
            let request = QuickTaskRequest {
                task,
                repo_root: repo.clone(),
                file_scope: FileScope::new(allow, Vec::new()).with_context(context),
                mode: if full { Mode::Full } else { Mode::Quick },
                model,
                timeout_secs: timeout,
            };
            cmd_run(&out, &config, backend.as_deref(), &repo, &request).await
        }
        Commands::Plan {
            file,
            repo,
            backend,
            model,
            parallel,
            fanout,
        } => {
            let repo = resolve_repo(repo)?;
            let config = load_config(config_path.as_deref(), &repo).await?;
            let document = PlanDocument::load(&file).await?;
            cmd_plan(
                &out,
                &config,
                backend.as_deref(),
                &repo,
                document,
                model,
                parallel.then_some(fanout),
            )
            .await
        }
        Commands::Backends => {
            let repo = resolve_repo(None)?;
            let config = load_config(config_path.as_deref(), &repo).await?;
            cmd_backends(&out, &config);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { action } => {
            let repo = resolve_repo(None)?;
            cmd_config(&out, action, config_path, &repo).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn resolve_repo(repo: Option<PathBuf>) -> Result<PathBuf> {
    let repo = match repo {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    if !repo.is_dir() {
        return Err(DispatchError::Config(format!(
            "repository root {} is not a directory",
            repo.display()
        )));
    }
    Ok(repo)
}

async fn load_config(explicit: Option<&Path>, repo: &Path) -> Result<DispatchConfig> {
    match explicit {
        Some(path) => DispatchConfig::load_from(path).await,
        None => DispatchConfig::load(repo).await,
    }
}

async fn cmd_run(
    out: &OutputContext<'_>,
    config: &DispatchConfig,
    backend: Option<&str>,
    repo: &Path,
    request: &QuickTaskRequest,
) -> Result<ExitCode> {
    let registry = StrategyRegistry::new();
    let orchestrator = PlanOrchestrator::from_config(config, &registry, backend, repo)?;

    let spinner = match out.writer.format() {
        OutputFormat::Text => Some(out.display.create_spinner(&format!(
            "Running task with {}...",
            orchestrator.strategy().name()
        ))),
        OutputFormat::Json => None,
    };

    let result = orchestrator.run_quick(request).await;

    if let Some(s) = spinner {
        s.finish_and_clear();
    }
    let result = result?;

    match out.writer.format() {
        OutputFormat::Text => out.display.print_execution_result(&result),
        OutputFormat::Json => out.writer.emit_task(&TaskOutput {
            backend: orchestrator.strategy().name(),
            session_id: orchestrator.session_id(),
            result: &result,
        }),
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// `parallel` carries the requested fanout when the plan runs as one invocation.
async fn cmd_plan(
    out: &OutputContext<'_>,
    config: &DispatchConfig,
    backend: Option<&str>,
    repo: &Path,
    document: PlanDocument,
    model: Option<String>,
    parallel: Option<Option<usize>>,
) -> Result<ExitCode> {
    let registry = StrategyRegistry::new();
    let orchestrator = PlanOrchestrator::from_config(config, &registry, backend, repo)?;
    let mode = if parallel.is_some() {
        "parallel"
    } else {
        "sequential"
    };

    let spinner = match out.writer.format() {
        OutputFormat::Text => Some(out.display.create_spinner(&format!(
            "Running {} {} step(s) with {}...",
            mode,
            document.steps.len(),
            orchestrator.strategy().name()
        ))),
        OutputFormat::Json => None,
    };

    let result = match parallel {
        Some(fanout) => {
            let request = document.into_parallel(repo, model, fanout);
            orchestrator.run_parallel(&request).await
        }
        None => {
            let request = document.into_sequential(repo, model);
            orchestrator.run_sequential(&request).await
        }
    };

    if let Some(s) = spinner {
        s.finish_and_clear();
    }
    let result = result?;

    match out.writer.format() {
        OutputFormat::Text => out.display.print_plan_result(&result),
        OutputFormat::Json => out.writer.emit_plan(&PlanOutput {
            backend: orchestrator.strategy().name(),
            mode,
            session_id: orchestrator.session_id(),
            result: &result,
        }),
    }

    Ok(plan_exit_code(&result))
}

fn plan_exit_code(result: &PlanResult) -> ExitCode {
    match result.status {
        PlanStatus::Ok => ExitCode::SUCCESS,
        PlanStatus::Partial => ExitCode::from(EXIT_PARTIAL),
        PlanStatus::Error => ExitCode::FAILURE,
    }
}

fn cmd_backends(out: &OutputContext<'_>, config: &DispatchConfig) {
    let registry = StrategyRegistry::new();
    let backends: Vec<(String, Capabilities)> = registry
        .names()
        .into_iter()
        .filter_map(|name| {
            registry
                .capabilities(name)
                .map(|caps| (name.to_string(), *caps))
        })
        .collect();

    match out.writer.format() {
        OutputFormat::Text => out.display.print_backends(&backends, &config.default_backend),
        OutputFormat::Json => out.writer.emit_backends(&backends, &config.default_backend),
    }
}

async fn cmd_config(
    out: &OutputContext<'_>,
    action: ConfigAction,
    explicit: Option<PathBuf>,
    repo: &Path,
) -> Result<()> {
    let config_path = explicit.unwrap_or_else(|| DispatchConfig::path_for(repo));

    match action {
        ConfigAction::Show => {
            let config = DispatchConfig::load_from(&config_path).await?.redacted();
            match out.writer.format() {
                OutputFormat::Text => println!("{}", toml::to_string_pretty(&config)?),
                OutputFormat::Json => out.writer.emit_value(&config),
            }
        }
        ConfigAction::Path => {
            out.writer
                .emit_message(&config_path.display().to_string());
        }
        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                return Err(DispatchError::Config(format!(
                    "{} already exists (use --force to overwrite)",
                    config_path.display()
                )));
            }
            DispatchConfig::default().save(&config_path).await?;
            match out.writer.format() {
                OutputFormat::Text => out.display.print_success(&format!(
                    "Wrote default configuration to {}",
                    config_path.display()
                )),
                OutputFormat::Json => out
                    .writer
                    .emit_message(&format!("Wrote {}", config_path.display())),
            }
        }
    }

    Ok(())
}
