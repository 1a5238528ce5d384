use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::PathBuf;
use tracing::{info, instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use energy_trends::app::{Application, CheckOutcome, RunOutcome};
use energy_trends::config::Config;

#[derive(Parser)]
#[command(name = "energy-trends")]
#[command(about = "Fetch the latest Energy Trends crude oil release and reshape it to a long table", long_about = None)]
struct Cli {
    /// Listing page to scan (overrides ENERGY_PAGE_URL)
    #[arg(long)]
    page_url: Option<String>,

    /// Phrase that must appear on the page (overrides ENERGY_SEARCH_PHRASE)
    #[arg(long)]
    search_phrase: Option<String>,

    /// Directory for downloaded workbooks and the CSV output (overrides ENERGY_OUTPUT_DIR)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Show a progress bar while downloading
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Scan, gate, download if newer, reshape and export (default)
    Run,
    /// Scan and gate only; report whether a newer quarter is published
    Check,
    /// Reshape a local workbook (default: newest workbook in the output directory)
    Reshape {
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

#[tokio::main(flavor = "current_thread")]
#[instrument]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing with environment filter support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,energy_trends=debug")),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(page_url) = cli.page_url {
        config.page_url = page_url;
    }
    if let Some(search_phrase) = cli.search_phrase {
        config.search_phrase = search_phrase;
    }
    if let Some(output_dir) = cli.output_dir {
        // State kept under the old output directory moves with it
        if let Ok(relative) = config.state_file.strip_prefix(&config.output_dir) {
            config.state_file = output_dir.join(relative);
        }
        config.output_dir = output_dir;
    }
    info!("Starting energy trends batch with config: {:?}", config);

    let show_progress = cli.progress && std::io::stderr().is_terminal();
    let app = Application::build(config)?.with_progress(show_progress);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => match app.run().await? {
            RunOutcome::NoSpreadsheet => info!("No spreadsheet found on the listing page"),
            RunOutcome::UpToDate { latest } => info!(%latest, "Already up to date"),
            RunOutcome::Updated {
                newest,
                spreadsheet,
                report,
            } => info!(
                %newest,
                spreadsheet = %spreadsheet.display(),
                output = %report.output.display(),
                rows = report.rows,
                "Release processed"
            ),
        },
        Command::Check => match app.check().await? {
            CheckOutcome::NoSpreadsheet => info!("No spreadsheet found on the listing page"),
            CheckOutcome::Checked {
                candidate,
                decision,
            } => info!(
                url = %candidate.url,
                is_newer = decision.is_newer,
                newest = %decision.newest,
                "Checked release"
            ),
        },
        Command::Reshape { file } => {
            let report = match file {
                Some(path) => app.reshape_file(&path).await?,
                None => app.reshape_latest().await?,
            };
            info!(
                source = %report.source.display(),
                output = %report.output.display(),
                rows = report.rows,
                "Reshaped workbook"
            );
        }
    }

    Ok(())
}
