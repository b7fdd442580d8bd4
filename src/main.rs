use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use layerflow_rs::scheduler::config::SchedulerConfig;
use layerflow_rs::scheduler::dispatch::{HttpRemoteExecutor, JobDispatcher, StaticHosts};
use layerflow_rs::scheduler::flow::builder::DagBuilder;
use layerflow_rs::scheduler::flow::executor::{FlowJobExecutor, Trigger};
use layerflow_rs::scheduler::flow::loader::FlowLoader;
use layerflow_rs::scheduler::flow::store::{
    FileFlowStore, FlowDefinitionStore, InMemoryFlowStore, InMemoryInstanceStore,
};
use layerflow_rs::scheduler::flow::types::{JobKey, NodeDefinition};
use layerflow_rs::scheduler::server::{self, AppState};

use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scheduler config file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP control surface
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
    /// Run one flow file to completion against the configured actuators
    Run {
        /// Path to the flow file
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Print the layers computed for a flow file
    Plan {
        /// Path to the flow file
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => SchedulerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => SchedulerConfig::default(),
    }
    .with_env_overrides()?;

    match args.command {
        Commands::Serve { port } => {
            log::info!(
                "Scheduler {} serving flows from {}",
                config.scheduler_name,
                config.flows_dir.display()
            );
            let flows = Arc::new(FileFlowStore::new(&config.flows_dir));
            let executor = build_executor(&config, flows)?;
            server::serve(
                port,
                AppState {
                    executor,
                    scheduler_name: config.scheduler_name.clone(),
                },
            )
            .await?;
        }
        Commands::Run { file } => {
            let definition = FlowLoader::new()
                .load_flow(&file)
                .with_context(|| format!("Failed to load flow {}", file.display()))?;
            let key = job_key_for(&definition);

            let flows = InMemoryFlowStore::new();
            flows.register(key.clone(), definition).await;
            let executor = build_executor(&config, Arc::new(flows))?;

            let outcome = executor
                .process(Trigger::now(key, config.scheduler_name.clone()))
                .await?;
            let status = outcome.dag().wait_terminal().await;
            log::info!("Flow finished with {}", status);

            println!("{}", serde_json::to_string_pretty(&outcome.dag().snapshot())?);
        }
        Commands::Plan { file } => {
            let definition = FlowLoader::new()
                .load_flow(&file)
                .with_context(|| format!("Failed to load flow {}", file.display()))?;
            let key = job_key_for(&definition);
            let dag = DagBuilder::new(key.clone()).build(&definition)?;

            println!("Flow {} ({} nodes)", key, dag.nodes().len());
            for layer in 0..dag.layer_count() {
                let Some(nl) = dag.layer(layer) else {
                    continue;
                };
                let names: Vec<String> = nl
                    .nodes
                    .iter()
                    .filter_map(|&n| dag.node(n))
                    .map(|n| n.key().to_string())
                    .collect();
                println!("  layer {}: {}", layer, names.join(", "));
            }
        }
    }

    Ok(())
}

fn build_executor(
    config: &SchedulerConfig,
    flows: Arc<dyn FlowDefinitionStore>,
) -> anyhow::Result<Arc<FlowJobExecutor>> {
    if config.actuators.is_empty() {
        log::warn!("No actuators configured; every node will fail to dispatch");
    }
    let remote = HttpRemoteExecutor::new(config.request_timeout())?;
    let dispatcher = JobDispatcher::new(
        Arc::new(remote),
        Arc::new(StaticHosts::new(config.actuators.clone())),
        config.max_concurrent_dispatches,
    );
    Ok(FlowJobExecutor::new(
        config,
        flows,
        Arc::new(InMemoryInstanceStore::new()),
        Arc::new(dispatcher),
    ))
}

fn job_key_for(definition: &NodeDefinition) -> JobKey {
    let group = definition.group_name.as_deref().unwrap_or("default");
    JobKey::new(group, definition.node_name.clone())
}
