//! `cms` - complaint CSV import and reconciliation.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use cms::cli;
use cms::cli::config::AppConfig;
use cms_logging::{init_logging, LogConfig};

#[derive(Parser, Debug)]
#[command(name = "cms", version, about = "Complaint data import and reconciliation")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the CMS_DATA table if it does not exist
    Init(cli::init::InitArgs),

    /// Import a CSV export into CMS_DATA
    Import(cli::import::ImportArgs),

    /// List stored records
    List(cli::list::ListArgs),

    /// Update stored records matching a complaint reference
    Reconcile(cli::reconcile::ReconcileArgs),

    /// Show the canonical field set
    Schema(cli::schema::SchemaArgs),

    /// Show resolved configuration
    Config(cli::config::ConfigArgs),
}

fn command_wants_json(cmd: &Commands) -> bool {
    match cmd {
        Commands::Init(args) => args.json,
        Commands::Import(args) => args.json,
        Commands::List(args) => args.json,
        Commands::Reconcile(args) => args.json,
        Commands::Schema(args) => args.json,
        Commands::Config(args) => args.json,
    }
}

fn run_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Schema(args) => cli::schema::run(args),
        Commands::Config(args) => cli::config::run(args),
        Commands::Init(args) => cli::init::run(args, &AppConfig::load()?),
        Commands::Import(args) => cli::import::run(args, &AppConfig::load()?),
        Commands::List(args) => cli::list::run(args, &AppConfig::load()?),
        Commands::Reconcile(args) => cli::reconcile::run(args, &AppConfig::load()?),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let json_mode = command_wants_json(&cli.command);

    if let Err(err) = init_logging(LogConfig {
        app_name: "cms",
        verbose: cli.verbose,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    match run_command(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_mode {
                cli::error::print_json_error(&err);
            } else {
                eprintln!("{:?}", err);
            }
            ExitCode::from(1)
        }
    }
}
