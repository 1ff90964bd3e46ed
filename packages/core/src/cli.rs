use std::path::PathBuf;

use clap::Parser;

/// Country GDP tracker CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "country-gdp-tracker",
    version,
    about = "Country metadata and exchange rates merged into estimated GDP records"
)]
pub struct Cli {
    /// Port to listen on
    #[arg(long)]
    pub port: Option<u16>,

    /// SQLite database URL
    #[arg(long)]
    pub database_url: Option<String>,

    /// Where the generated summary chart is written
    #[arg(long)]
    pub summary_image_path: Option<PathBuf>,

    /// Background refresh interval in seconds (0 disables it)
    #[arg(long)]
    pub refresh_interval: Option<u64>,

    /// Reject refreshes containing records without name, population or currency
    #[arg(long)]
    pub validate_records: bool,
}
