mod cache;
mod cli;
mod db;
mod engines;
mod error;
mod evaluate;
mod fmt;
mod importer;
mod matcher;
mod models;
mod preprocess;
mod propagate;
mod reference;
mod reports;
mod settings;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{CacheCommands, CategoriesCommands, Cli, Commands, SuppliersCommands};

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_env("LEDGERMATCH_LOG").unwrap_or_else(|_| {
        EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Init { data_dir } => cli::init::run(data_dir),
        Commands::Import { file, format } => cli::import::run(&file, format.as_deref()),
        Commands::Suppliers { command } => match command {
            SuppliersCommands::Import { file } => cli::suppliers::import(&file),
            SuppliersCommands::List => cli::suppliers::list(),
        },
        Commands::Categories { command } => match command {
            CategoriesCommands::List => cli::categories::list(),
            CategoriesCommands::Add {
                name,
                description,
                budget,
            } => cli::categories::add(&name, description.as_deref(), budget.as_deref()),
        },
        Commands::SetCategory { category, supplier } => {
            cli::categories::set_for_supplier(&category, &supplier)
        }
        Commands::Match(args) => cli::matching::run(&args),
        Commands::Compare(args) => cli::compare::run(&args),
        Commands::Propagate => cli::propagate::run(),
        Commands::Report { from, to } => cli::report::run(from, to),
        Commands::Status => cli::status::run(),
        Commands::Cache { command } => match command {
            CacheCommands::Clear => cli::cache::clear(),
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
