//! Relay CLI: run, validate and inspect multi-agent workflows.

use clap::{Parser, Subcommand};

use relay_cli::commands;
use relay_cli::commands::run::RunOptions;

/// Relay CLI: multi-agent workflow orchestration
#[derive(Parser)]
#[command(name = "relay", version, about = "Relay CLI: multi-agent workflow orchestration")]
pub struct Cli {
    /// Path to the SQLite database holding archived executions
    #[arg(long, env = "RELAY_DB_PATH", default_value = "relay.db", global = true)]
    db: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow YAML file with simulated agents
    Run {
        /// Path to the workflow YAML file
        workflow: String,
        /// Agent catalog with scripted behaviour (defaults to the built-in catalog)
        #[arg(long)]
        agents: Option<String>,
        /// Engine configuration YAML
        #[arg(long)]
        config: Option<String>,
        /// Initial workflow context YAML (feature, constraints, gates)
        #[arg(long)]
        context: Option<String>,
        /// Do not archive the execution
        #[arg(long)]
        no_archive: bool,
        /// Print the execution and report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Plan a workflow without executing it
    Validate {
        /// Path to the workflow YAML file
        workflow: String,
        #[arg(long)]
        agents: Option<String>,
        #[arg(long)]
        config: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// List the agent capability catalog
    Agents {
        #[arg(long)]
        agents: Option<String>,
        #[arg(long)]
        json: bool,
    },

    /// List archived executions, most recent first
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },

    /// Show one archived execution
    Show {
        /// Execution ID
        id: String,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay_core=info,relay_cli=info".into()),
        )
        .init();

    let result = match cli.command {
        Some(Commands::Run {
            workflow,
            agents,
            config,
            context,
            no_archive,
            json,
        }) => {
            let options = RunOptions {
                workflow_file: workflow,
                agents_file: agents,
                config_file: config,
                context_file: context,
                db_path: if no_archive { None } else { Some(cli.db.clone()) },
            };
            commands::run::run(&options, json).await
        }
        Some(Commands::Validate {
            workflow,
            agents,
            config,
            json,
        }) => commands::validate::validate(&workflow, agents.as_deref(), config.as_deref(), json),
        Some(Commands::Agents { agents, json }) => commands::agents::list(agents.as_deref(), json),
        Some(Commands::History { limit, json }) => {
            commands::history::list(&cli.db, limit, json).await
        }
        Some(Commands::Show { id, json }) => commands::history::show(&cli.db, &id, json).await,
        None => {
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
