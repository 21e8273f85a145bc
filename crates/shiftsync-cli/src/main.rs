use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "shiftsync", version, about = "Shift-aware attendance synchronization")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the continuous synchronization service
    Run,
    /// Run a single sync cycle and exit
    Sync,
    /// Probe configured devices and the ledger
    Check,
    /// Export attendance records to CSV
    Export(commands::export::ExportArgs),
    /// Show device liveness and today's ledger summary
    Status,
    /// Shift directory management
    Shift {
        #[command(subcommand)]
        action: commands::shift::ShiftAction,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run => commands::run::run(),
        Commands::Sync => commands::sync::run(),
        Commands::Check => commands::check::run(),
        Commands::Export(args) => commands::export::run(args),
        Commands::Status => commands::status::run(),
        Commands::Shift { action } => commands::shift::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
