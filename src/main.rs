use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use flowgraph_agent::GraphDefinition;
use flowgraph_core::config::FlowConfig;

#[derive(Parser)]
#[command(name = "flowgraph", version, about = "Validate and inspect agent workflow graphs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "FLOWGRAPH_CONFIG", default_value = "flowgraph.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a graph definition for structural errors
    Check {
        /// Definition file (TOML, or JSON with a .json extension)
        file: PathBuf,
    },
    /// Print the nodes, edges, and routers of a graph definition
    Describe {
        file: PathBuf,
        /// Print the parsed definition as JSON instead
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("flowgraph=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Check { file } => check(&file, &config),
        Commands::Describe { file, json } => describe(&file, json),
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

/// A missing config file means defaults; an unreadable one is an error.
fn load_config(path: &Path) -> anyhow::Result<FlowConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "No config file, using defaults");
        return Ok(FlowConfig::default());
    }
    let config = FlowConfig::load(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    info!(path = %path.display(), "Loaded config");
    Ok(config)
}

fn load_definition(file: &Path) -> anyhow::Result<GraphDefinition> {
    GraphDefinition::load(file).with_context(|| format!("failed to read {}", file.display()))
}

fn check(file: &Path, config: &FlowConfig) -> anyhow::Result<()> {
    let definition = load_definition(file)?;
    definition
        .topology()
        .validate()
        .with_context(|| format!("{} is not a valid graph", file.display()))?;

    for name in definition.external_names() {
        warn!(graph = %definition.name, "{} must be supplied by the host application", name);
    }

    println!(
        "{}: ok ({} nodes, {} edges, max {} steps per run)",
        definition.name,
        definition.node_names().len(),
        definition.workflow.edges.len(),
        config.runner.max_steps
    );
    Ok(())
}

fn describe(file: &Path, json: bool) -> anyhow::Result<()> {
    let definition = load_definition(file)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&definition)?);
        return Ok(());
    }

    println!("graph: {}", definition.name);
    print!("{}", definition.topology().describe());

    if !definition.agents.is_empty() {
        println!("agents:");
        for agent in &definition.agents {
            let tools = if agent.tools.is_empty() {
                String::new()
            } else {
                format!(" tools=[{}]", agent.tools.join(", "))
            };
            println!("  {} ({:?}){}", agent.name, agent.pattern, tools);
        }
    }
    if !definition.routers.is_empty() {
        println!("routers:");
        for router in &definition.routers {
            println!("  {} ({:?})", router.name, router.kind);
        }
    }

    let external = definition.external_names();
    if !external.is_empty() {
        println!("supplied by host: {}", external.join(", "));
    }
    Ok(())
}
