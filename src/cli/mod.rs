pub mod cache;
pub mod categories;
pub mod compare;
pub mod import;
pub mod init;
pub mod matching;
pub mod propagate;
pub mod report;
pub mod status;
pub mod suppliers;

use clap::{ArgAction, Args, Parser, Subcommand};
use rusqlite::Connection;

use crate::db::{get_connection, init_db};
use crate::error::Result;
use crate::settings::Settings;

/// Open the configured database, creating the schema on first use.
pub(crate) fn open_db(settings: &Settings) -> Result<Connection> {
    std::fs::create_dir_all(&settings.data_dir)?;
    let conn = get_connection(&settings.db_path())?;
    init_db(&conn)?;
    Ok(conn)
}

#[derive(Parser)]
#[command(
    name = "ledgermatch",
    version,
    about = "Match imported bank transactions to suppliers and categories."
)]
pub struct Cli {
    /// More log output on stderr (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for ledgermatch data (default: ~/Documents/ledgermatch)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
    },
    /// Import a Tripletex JSON export or a CSV file of bank transactions.
    Import {
        /// Path to the file to import
        file: String,
        /// File format: tripletex or csv (default: by extension)
        #[arg(long)]
        format: Option<String>,
    },
    /// Manage suppliers.
    Suppliers {
        #[command(subcommand)]
        command: SuppliersCommands,
    },
    /// Manage categories.
    Categories {
        #[command(subcommand)]
        command: CategoriesCommands,
    },
    /// Pin a supplier to a category and recategorize its transactions.
    SetCategory {
        /// Category name
        category: String,
        /// Supplier name
        #[arg(long)]
        supplier: String,
    },
    /// Find suppliers for unmatched transactions.
    Match(MatchArgs),
    /// Compare matching methods on held-out transactions with known suppliers.
    Compare(CompareArgs),
    /// Rebuild the supplier→category map and fill missing categories.
    Propagate,
    /// Spending per category and bank account, with monthly averages against budget.
    Report {
        /// Start date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,
        /// End date, exclusive (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,
    },
    /// Show database location and matching progress.
    Status,
    /// Manage the embedding cache.
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Args)]
pub struct MatchArgs {
    /// Matching method: sequence, tfidf, ngram, fuzzy, token-sort, embedding, llm
    #[arg(long, default_value = "ngram")]
    pub method: String,
    /// Minimum confidence (0-1) for a match to be written (default from settings)
    #[arg(long)]
    pub threshold: Option<f64>,
    /// Only consider the N most recent unmatched transactions (0 = all)
    #[arg(long)]
    pub limit: Option<usize>,
    /// Number of predictions to print
    #[arg(long, default_value_t = 20)]
    pub display: usize,
    /// Also score each grouped posting description and keep the best
    #[arg(long = "posting-descriptions")]
    pub posting_descriptions: bool,
    /// Write matches above the threshold to the database
    #[arg(long)]
    pub apply: bool,
    /// Overwrite suppliers and categories that are already set
    #[arg(long)]
    pub force: bool,
    /// Do not propagate categories to newly matched transactions
    #[arg(long = "no-category")]
    pub no_category: bool,
    /// Include internal, wage, tax and forbidden transactions
    #[arg(long = "include-excluded")]
    pub include_excluded: bool,
}

#[derive(Args)]
pub struct CompareArgs {
    /// Number of suppliers to hold one transaction out from (max 100)
    #[arg(long = "test-size", default_value_t = 100)]
    pub test_size: usize,
    /// Comma separated methods to compare (default: all)
    #[arg(long)]
    pub methods: Option<String>,
    /// Seed for a reproducible split
    #[arg(long)]
    pub seed: Option<u64>,
    /// Save the full report as JSON in the results directory
    #[arg(long)]
    pub save: bool,
    /// Also score each grouped posting description and keep the best
    #[arg(long = "posting-descriptions")]
    pub posting_descriptions: bool,
}

#[derive(Subcommand)]
pub enum SuppliersCommands {
    /// Import suppliers from a Tripletex supplier JSON export.
    Import {
        /// Path to the JSON file
        file: String,
    },
    /// List suppliers.
    List,
}

#[derive(Subcommand)]
pub enum CategoriesCommands {
    /// List categories.
    List,
    /// Add a category.
    Add {
        /// Category name
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Monthly budget amount
        #[arg(long)]
        budget: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Delete every cached embedding.
    Clear,
}
