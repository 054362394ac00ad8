use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use agent_core::regression::RegressionEntry;
use agent_core::{CotRecorder, EvolutionLoop, MissionRunner, RegressionGuard};
use intelligence::{
    CurriculumProposer, DomainProfile, HttpGateway, LlmGateway, ProblemSynthesizer, TaskRouter,
};
use pddl::{Planner, SubprocessPlanner};
use tools::registry::SkillRegistry;
use tools::transport::{LocalTransport, StdioTransport, ToolTransport};
use tools::{EffectorGateway, SandboxManager};

/// Chain-of-Thought training-data generator for a hierarchical task planner
#[derive(Parser, Debug)]
#[command(name = "cot-agent")]
#[command(about = "Synthesizes CoT training data by planning, executing, and evolving skills")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Mission goal (if not provided, use --tasks or --curriculum)
    #[arg(value_name = "GOAL")]
    goal: Option<String>,

    /// File with one mission goal per line (batch mode)
    #[arg(short, long, value_name = "FILE")]
    tasks: Option<String>,

    /// Attempt skill evolution when the kernel fails
    #[arg(long)]
    evolve: bool,

    /// Let the curriculum proposer pick and learn the next task
    #[arg(long)]
    curriculum: bool,

    /// Override the CoT output directory
    #[arg(short, long, value_name = "DIR")]
    output: Option<String>,

    /// Override the canonical storage directory
    #[arg(short, long, value_name = "DIR")]
    storage: Option<String>,

    /// Reach skills through the configured tool-server subprocess instead of
    /// executing them in-process
    #[arg(long)]
    remote_tools: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(if cli.verbose { "debug" } else { "info" })
        .with_target(false);
    subscriber.init();

    // User abort maps to the conventional 130.
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted by user");
            std::process::exit(130);
        }
    });

    match run(cli).await {
        Ok(all_succeeded) => {
            if !all_succeeded {
                warn!("one or more missions did not reach their goal");
            }
        }
        Err(e) => {
            error!("fatal: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    info!("starting cot-agent v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli).await?;
    config.validate_runtime().map_err(|e| anyhow::anyhow!(e))?;
    info!("configuration loaded");

    let components = build_components(&config, cli.remote_tools);

    if cli.curriculum {
        return run_curriculum(&config, &components).await;
    }

    let goals = collect_goals(&cli).await?;
    if goals.is_empty() {
        anyhow::bail!("no mission given; pass a goal, --tasks, or --curriculum");
    }

    // Each run writes its missions under one timestamped directory.
    let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let run_dir = config.sandbox.output_dir.join(format!("run_{}", stamp));
    tokio::fs::create_dir_all(&run_dir).await?;

    let domain_text = tokio::fs::read_to_string(config.domain_file_path()).await?;
    let mut all_succeeded = true;

    for goal in goals {
        info!(%goal, "mission start");
        let recorder = CotRecorder::new(&run_dir);
        let mut runner = MissionRunner::new(
            Arc::clone(&components.gateway),
            Arc::clone(&components.effector),
            components.profile.clone(),
            recorder,
        )
        .with_router(TaskRouter::new(config.router.complexity_threshold))
        .with_decompose_retries(config.kernel.decompose_retries);

        let success = match runner.run(&goal, &domain_text).await {
            Ok(success) => success,
            Err(e) => {
                warn!(%goal, error = %e, "mission errored");
                false
            }
        };

        if !success && cli.evolve {
            info!(%goal, "mission failed, attempting evolution");
            if evolve_goal(&config, &components, &goal).await? {
                info!(%goal, "evolution promoted a new skill");
            }
        }

        match runner.recorder_mut().save_and_reset(None).await {
            Ok(path) => info!(%goal, success, path = %path.display(), "mission data written"),
            Err(e) => warn!(%goal, error = %e, "mission produced no data"),
        }
        all_succeeded &= success;
    }

    Ok(all_succeeded)
}

struct Components {
    gateway: Arc<dyn LlmGateway>,
    planner: Arc<dyn Planner>,
    synthesizer: Arc<ProblemSynthesizer>,
    effector: Arc<EffectorGateway>,
    profile: DomainProfile,
}

fn build_components(config: &agent_config::AgentConfig, remote_tools: bool) -> Components {
    let gateway: Arc<dyn LlmGateway> = Arc::new(HttpGateway::new(&config.llm));
    let planner: Arc<dyn Planner> = Arc::new(SubprocessPlanner::new(config.planner.clone()));
    let profile = DomainProfile::file_management();
    let synthesizer = Arc::new(ProblemSynthesizer::new(Arc::clone(&gateway), profile.clone()));

    let transport: Arc<dyn ToolTransport> = if remote_tools {
        let stdio = StdioTransport::new(config.transport.clone());
        stdio.set_storage_root(config.sandbox.storage_dir.clone());
        Arc::new(stdio)
    } else {
        let registry = Arc::new(SkillRegistry::new());
        Arc::new(LocalTransport::new(
            registry,
            config.sandbox.storage_dir.clone(),
        ))
    };
    let effector = Arc::new(EffectorGateway::new(
        transport,
        config.transport.tool_call_timeout_secs,
    ));

    Components {
        gateway,
        planner,
        synthesizer,
        effector,
        profile,
    }
}

async fn load_config(cli: &Cli) -> Result<agent_config::AgentConfig> {
    let overrides = agent_config::ConfigOverrides {
        storage_dir: cli.storage.as_ref().map(PathBuf::from),
        output_dir: cli.output.as_ref().map(PathBuf::from),
        ..Default::default()
    };
    let config =
        agent_config::AgentConfig::load(cli.config.as_ref().map(PathBuf::from), overrides).await?;
    Ok(config)
}

async fn collect_goals(cli: &Cli) -> Result<Vec<String>> {
    let mut goals = Vec::new();
    if let Some(goal) = &cli.goal {
        goals.push(goal.clone());
    }
    if let Some(tasks_file) = &cli.tasks {
        let text = tokio::fs::read_to_string(tasks_file).await?;
        goals.extend(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }
    Ok(goals)
}

/// Kernel-failure path: sandbox the goal, evolve a new skill, gate it behind
/// the regression suite, and promote on acceptance.
async fn evolve_goal(
    config: &agent_config::AgentConfig,
    components: &Components,
    goal: &str,
) -> Result<bool> {
    let mut sandbox = SandboxManager::new(
        config.sandbox.runs_dir.clone(),
        config.sandbox.storage_dir.clone(),
        config.domain_file_path(),
    );
    let paths = sandbox.create().await?;
    components.effector.set_storage_root(paths.storage_root.clone());

    let evolution = EvolutionLoop::new(
        Arc::clone(&components.gateway),
        Arc::clone(&components.synthesizer),
        Arc::clone(&components.planner),
        Arc::clone(&components.effector),
    )
    .with_max_retries(config.evolution.max_retries)
    .with_validation_iterations(config.evolution.validation_iterations);

    let outcome = evolution.evolve(goal, &sandbox, &[]).await?;
    if !outcome.success {
        warn!(%goal, "evolution failed");
        return Ok(false);
    }

    let guard = RegressionGuard::new(&config.sandbox.regression_registry);
    let passed = guard
        .run_suite(
            &paths.domain_file,
            outcome.skill_file.as_deref(),
            &sandbox,
            Arc::clone(&components.synthesizer),
            Arc::clone(&components.planner),
            Arc::clone(&components.effector),
        )
        .await?;
    if !passed {
        warn!(%goal, "regression suite rejected the evolved skill");
        return Ok(false);
    }

    // Promotion: the learned goal joins the regression suite.
    guard
        .save_entry(RegressionEntry {
            task_name: outcome.action_name.clone().unwrap_or_default(),
            goal: goal.to_string(),
            setup_actions: Vec::new(),
        })
        .await?;
    Ok(true)
}

/// Curriculum mode: propose a currently-impossible task, then learn it
/// through the evolution pipeline.
async fn run_curriculum(
    config: &agent_config::AgentConfig,
    components: &Components,
) -> Result<bool> {
    let domain_text = tokio::fs::read_to_string(config.domain_file_path()).await?;
    let snapshot = storage_snapshot(&config.sandbox.storage_dir);
    let setup_actions = components.effector.available_skills().await.unwrap_or_default();

    let proposer = CurriculumProposer::new(Arc::clone(&components.gateway));
    let Some(proposal) = proposer
        .propose_next(&domain_text, &snapshot, &setup_actions)
        .await?
    else {
        anyhow::bail!("curriculum proposer could not produce a task");
    };
    info!(task = %proposal.task_name, goal = %proposal.goal, "curriculum task proposed");

    let mut sandbox = SandboxManager::new(
        config.sandbox.runs_dir.clone(),
        config.sandbox.storage_dir.clone(),
        config.domain_file_path(),
    );
    let paths = sandbox.create().await?;
    components.effector.set_storage_root(paths.storage_root.clone());

    let evolution = EvolutionLoop::new(
        Arc::clone(&components.gateway),
        Arc::clone(&components.synthesizer),
        Arc::clone(&components.planner),
        Arc::clone(&components.effector),
    )
    .with_max_retries(config.evolution.max_retries)
    .with_validation_iterations(config.evolution.validation_iterations);

    let outcome = evolution
        .evolve(&proposal.goal, &sandbox, &proposal.setup_actions)
        .await?;
    if !outcome.success {
        warn!("curriculum task could not be learned");
        return Ok(false);
    }

    let guard = RegressionGuard::new(&config.sandbox.regression_registry);
    let passed = guard
        .run_suite(
            &paths.domain_file,
            outcome.skill_file.as_deref(),
            &sandbox,
            Arc::clone(&components.synthesizer),
            Arc::clone(&components.planner),
            Arc::clone(&components.effector),
        )
        .await?;
    if !passed {
        warn!("regression suite rejected the curriculum skill");
        return Ok(false);
    }

    guard
        .save_entry(RegressionEntry {
            task_name: proposal.task_name,
            goal: proposal.goal,
            setup_actions: proposal.setup_actions,
        })
        .await?;
    info!("curriculum task learned and promoted");
    Ok(true)
}

/// Logical snapshot of the storage tree for curriculum prompts, escaped
/// filenames included.
fn storage_snapshot(storage_dir: &std::path::Path) -> String {
    if !storage_dir.exists() {
        return "the storage tree is empty".to_string();
    }
    let mut lines = Vec::new();
    for entry in walkdir::WalkDir::new(storage_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        let rel = entry
            .path()
            .strip_prefix(storage_dir)
            .unwrap_or(entry.path());
        let logical = if rel.as_os_str().is_empty() {
            "root".to_string()
        } else {
            rel.to_string_lossy().to_string()
        };
        let mut folders = Vec::new();
        let mut files = Vec::new();
        if let Ok(children) = std::fs::read_dir(entry.path()) {
            for child in children.filter_map(|c| c.ok()) {
                let name = child.file_name().to_string_lossy().to_string();
                if child.path().is_dir() {
                    folders.push(name);
                } else {
                    files.push(common::escape::escape(&name));
                }
            }
        }
        folders.sort();
        files.sort();
        lines.push(format!(
            "- folder [{}] contains folders: {:?}, files: {:?}",
            logical, folders, files
        ));
    }
    lines.join("\n")
}
