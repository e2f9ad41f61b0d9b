use anyhow::{Context, Result};
use flowprint::cli::commands::{HistoryCommand, RunCommand, ShowCommand, ValidateCommand};
use flowprint::cli::output::*;
use flowprint::cli::{Cli, Command};
use flowprint::core::config::BlueprintConfig;
use flowprint::core::{RunSummary, StepState};
use flowprint::execution::{DispatchConfig, Dispatcher, ExecutionEngine, LocalDispatcher};
use flowprint::persistence::{InMemoryStore, RunStore};
use std::sync::Arc;
use tracing::{error, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging
    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set logging subscriber")?;

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_flow(cmd).await?,
        Command::Validate(cmd) => validate_blueprint(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
        Command::Show(cmd) => show_run(cmd).await?,
    }

    Ok(())
}

#[cfg(feature = "sqlite")]
async fn history_store() -> Result<Arc<dyn RunStore>> {
    Ok(Arc::new(
        flowprint::persistence::SqliteRunStore::with_default_path().await?,
    ))
}

#[cfg(not(feature = "sqlite"))]
async fn history_store() -> Result<Arc<dyn RunStore>> {
    anyhow::bail!("Run history needs the sqlite feature")
}

async fn run_flow(cmd: &RunCommand) -> Result<()> {
    let config = BlueprintConfig::from_file(&cmd.file).context("Failed to load blueprint")?;

    println!(
        "{} Loaded blueprint: {} ({} commands)",
        INFO,
        style(&config.name).bold(),
        style(config.command_count()).cyan()
    );

    let blueprint = config.to_blueprint();
    let mut run = blueprint.build();

    for param in &cmd.param {
        let command = run
            .find_command(&param.command)
            .with_context(|| format!("No command named '{}'", param.command))?;
        run.set_param(command, &param.name, param.value.as_str())?;
        println!(
            "{} Parameter: {} {} = {}",
            INFO,
            style(&param.command).cyan(),
            style(&param.name).bold(),
            style(&param.value).dim()
        );
    }

    let store: Arc<dyn RunStore> = if cmd.no_history {
        Arc::new(InMemoryStore::new())
    } else {
        history_store().await?
    };
    store.save_blueprint(&blueprint).await?;

    let dispatcher = Arc::new(LocalDispatcher::new(
        DispatchConfig::new().with_max_concurrent(cmd.max_parallel),
    ));
    dispatcher.start().await?;

    let engine = ExecutionEngine::builder(Arc::clone(&dispatcher), run)
        .store(Arc::clone(&store))
        .build();

    // Event lines are printed above the spinner
    let spinner = create_spinner();
    let printer = spinner.clone();
    engine
        .add_event_handler(move |event| printer.println(format_execution_event(&event)))
        .await;

    let root = engine.root();
    let result = run_with_spinner(&engine, root, &spinner).await;
    spinner.finish_and_clear();
    dispatcher.stop().await?;

    let run = engine.snapshot().await;
    println!("\n{}", format_run_tree(&run));

    if !cmd.no_history {
        println!(
            "\n{} Run saved to history (ID: {})",
            INFO,
            style(run.id()).dim()
        );
    }

    let state = run.state(root).unwrap_or_default();
    if matches!(result, Ok(StepState::Complete)) {
        println!(
            "\n{} {} completed {}",
            CHECK,
            style(run.name()).bold(),
            style("successfully").green()
        );
    } else {
        println!(
            "\n{} {} {}",
            CROSS,
            style(run.name()).bold(),
            format_step_state(state)
        );
        if let Err(e) = result {
            error!("{}", e);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn validate_blueprint(cmd: &ValidateCommand) -> Result<()> {
    println!("{} Validating blueprint...", INFO);

    match BlueprintConfig::from_file(&cmd.file) {
        Ok(config) => {
            println!("{} Blueprint is valid!", CHECK);
            println!("  Name: {}", style(&config.name).bold());
            println!("  Steps: {}", style(config.steps.len()).cyan());
            println!("  Commands: {}", style(config.command_count()).cyan());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config.to_blueprint())?;
                println!("\n{}", json);
            }
            Ok(())
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            std::process::exit(1);
        }
    }
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = history_store().await?;

    let mut runs = match &cmd.flow {
        Some(flow_name) => store.list_runs(flow_name).await?,
        None => {
            let mut all_runs = Vec::new();
            for flow_name in store.list_flows().await? {
                all_runs.extend(store.list_runs(&flow_name).await?);
            }
            all_runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all_runs
        }
    };
    runs.truncate(cmd.limit);

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, cmd.limit);
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(())
}

async fn show_run(cmd: &ShowCommand) -> Result<()> {
    let run_id = uuid::Uuid::parse_str(&cmd.run_id).context("Invalid run ID format")?;
    let store = history_store().await?;

    let Some(run) = store.load_run(run_id).await? else {
        println!("{} Run not found", WARN);
        return Ok(());
    };

    print_run_details(&run.summary());
    println!("\n{}", format_run_tree(&run));
    Ok(())
}

fn print_run_details(summary: &RunSummary) {
    println!("{} Run Details", INFO);
    println!("  ID: {}", style(summary.run_id).cyan());
    println!("  Flow: {}", style(&summary.flow_name).bold());
    println!("  State: {}", format_step_state(summary.state));
    if let Some(started) = summary.started_at {
        println!("  Started: {}", style(started.to_rfc3339()).dim());
        if let Some(ended) = summary.ended_at {
            println!("  Ended: {}", style(ended.to_rfc3339()).dim());
            if let Ok(duration) = ended.signed_duration_since(started).to_std() {
                println!("  Duration: {}", style(format_duration(duration)).dim());
            }
        }
    }
    println!(
        "  Progress: {} ({} complete, {} unsuccessful, {} total)",
        style(format!("{:.0}%", summary.progress() * 100.0)).cyan(),
        summary.complete_commands,
        summary.unsuccessful_commands,
        summary.total_commands
    );
}
