use crate::{commands::Commands, error::CliError, shutdown::ShutdownCoordinator};
use clap::Parser;
use engine_cluster::{
    agent::WorkerAgent, client::WorkerClient, coordinator::ClusterCoordinator,
};
use engine_config::{
    env::EnvVars,
    graph::load_graph,
    settings::{
        file::SettingsFile,
        validated::EngineSettings,
        validator::{SettingsOverrides, SettingsValidator},
    },
};
use engine_core::{
    history::RunHistory,
    state::{StateStore, sled_store::SledStateStore},
};
use engine_runtime::{
    context::EngineContext, execution::executor, transformation::control::RunControl,
};
use model::graph::definition::GraphDefinition;
use std::{path::Path, process::ExitCode, sync::Arc};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(name = "rowflow", version, about = "Row-streaming ETL engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    match dispatch(cli.command).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{e}");
            ExitCode::from(1)
        }
    }
}

async fn dispatch(command: Commands) -> Result<u8, CliError> {
    match command {
        Commands::Run {
            graph,
            settings,
            env_file,
            rowset_size,
            replay_dir,
            state_dir,
            no_journal,
            json,
        } => {
            let overrides = SettingsOverrides {
                rowset_size,
                state_dir,
                replay_dir,
                no_journal,
            };
            let settings = load_settings(settings.as_deref(), &overrides)?;
            let graph = read_graph(&graph, env_file.as_deref())?;
            let ctx = EngineContext::new(settings).open_journal()?;

            let control = RunControl::new();
            let shutdown = ShutdownCoordinator::new(control.clone());
            shutdown.register_handlers();

            let result = executor::run(graph, ctx, control).await?;
            if shutdown.is_shutdown_requested() {
                info!("Run ended after a shutdown request");
            }

            if json {
                output::print_json(&result)?;
            } else {
                print!("{}", output::run_table(&result));
            }
            Ok(result.exit_code())
        }
        Commands::Validate { graph, env_file } => {
            let graph = read_graph(&graph, env_file.as_deref())?;
            println!(
                "Graph '{}' is valid: {} steps, {} hops",
                graph.name,
                graph.steps.len(),
                graph.hops.len()
            );
            Ok(0)
        }
        Commands::History {
            run,
            settings,
            state_dir,
            json,
        } => {
            let overrides = SettingsOverrides {
                state_dir,
                ..Default::default()
            };
            let settings = load_settings(settings.as_deref(), &overrides)?;
            let dir = settings.state_dir.ok_or(CliError::NoJournal)?;
            let store: Arc<dyn StateStore> = Arc::new(SledStateStore::open(&dir)?);
            let history = RunHistory::new(store);

            let run_id = match run {
                Some(id) => id,
                None => history.latest_run().await?.ok_or(CliError::NoRuns)?,
            };
            let summary = history.summary(&run_id).await?;

            if json {
                output::print_json(&summary)?;
            } else {
                print!("{}", output::history_table(&summary));
            }
            Ok(0)
        }
        Commands::Cluster {
            graph,
            workers,
            settings,
            env_file,
            json,
        } => {
            if workers == 0 {
                return Err(CliError::NoWorkers);
            }
            let overrides = SettingsOverrides {
                no_journal: true,
                ..Default::default()
            };
            let settings = load_settings(settings.as_deref(), &overrides)?;
            let graph = read_graph(&graph, env_file.as_deref())?;
            let result = run_cluster(&graph, settings, workers).await?;

            if json {
                output::print_json(&result)?;
            } else {
                print!("{}", output::cluster_table(&result));
            }
            Ok(result.exit_code())
        }
    }
}

fn load_settings(
    path: Option<&Path>,
    overrides: &SettingsOverrides,
) -> Result<EngineSettings, CliError> {
    let file = match path {
        Some(path) => SettingsFile::load(path)?,
        None => SettingsFile::default(),
    };
    Ok(SettingsValidator::new(&file, overrides).validate()?)
}

fn read_graph(path: &Path, env_file: Option<&Path>) -> Result<GraphDefinition, CliError> {
    let mut env = EnvVars::from_process();
    if let Some(file) = env_file {
        env.load_file(file)?;
    }
    Ok(load_graph(path, &env)?)
}

async fn run_cluster(
    graph: &GraphDefinition,
    settings: EngineSettings,
    workers: usize,
) -> Result<engine_cluster::coordinator::ClusterResult, CliError> {
    let cluster_settings = settings.cluster.clone();
    let ctx = EngineContext::new(settings);

    let mut clients: Vec<Arc<dyn WorkerClient>> = Vec::with_capacity(workers);
    let mut agents = Vec::with_capacity(workers);
    for i in 0..workers {
        let (client, handle) = WorkerAgent::new(format!("worker-{i}"), ctx.clone()).spawn();
        clients.push(Arc::new(client));
        agents.push(handle);
    }

    let control = RunControl::new();
    let shutdown = ShutdownCoordinator::new(control.clone());
    shutdown.register_handlers();

    let mut coordinator = ClusterCoordinator::new(cluster_settings, clients)
        .with_shutdown(control.stop_token().clone());
    let result = coordinator.run(graph).await;

    for agent in agents {
        agent.abort();
    }
    Ok(result?)
}
