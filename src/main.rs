//! harvest-export - dump a Harvest account to one JSON file per collection

use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

use harvest_export::{
    logging, service::exit_codes, DateWindow, ExportConfig, ExportOutcome, ExportService,
};

#[derive(Parser, Debug)]
#[command(name = "harvest-export", version, about = "Export a Harvest account to JSON files")]
struct Cli {
    /// Directory the JSON (and CSV) files are written to
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Credentials file [default: ~/.harvest]
    #[arg(long, env = "HARVEST_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Override the account URL (https://<app>.harvestapp.com)
    #[arg(long)]
    base_url: Option<String>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout: u64,

    /// Export one entity type at a time
    #[arg(long)]
    sequential: bool,

    /// Start of the timesheet/expense window (YYYY-MM-DD) [default: Jan 1 this year]
    #[arg(long)]
    from: Option<NaiveDate>,

    /// End of the timesheet/expense window (YYYY-MM-DD) [default: Dec 31 this year]
    #[arg(long)]
    to: Option<NaiveDate>,

    /// Skip converting the exported JSON files to CSV
    #[arg(long)]
    no_csv: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Cli {
    fn export_config(&self) -> ExportConfig {
        let year = DateWindow::current_year();
        ExportConfig {
            output_dir: self.output_dir.clone(),
            base_url: self.base_url.clone(),
            timeout: Duration::from_secs(self.timeout),
            concurrent: !self.sequential,
            window: DateWindow::new(self.from.unwrap_or(year.from), self.to.unwrap_or(year.to)),
            convert_csv: !self.no_csv,
            ..ExportConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json_logs)?;

    info!("Starting Harvest export");

    let config = cli.export_config();
    if config.window.from > config.window.to {
        error!(
            "--from {} is after --to {}",
            config.window.from, config.window.to
        );
        return Ok(ExitCode::from(exit_codes::CONFIG));
    }

    let report = match ExportService::from_credentials_file(cli.credentials.as_deref(), config) {
        Ok(service) => service.run().await,
        Err(e) => Err(e),
    };

    let report = match report {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            return Ok(ExitCode::from(e.exit_code()));
        }
    };

    for (entity, outcome) in &report.outcomes {
        match outcome {
            ExportOutcome::Written { path, records } => {
                info!("{}: {} record(s) -> {}", entity, records, path.display())
            }
            ExportOutcome::Failed(e) => warn!("{}: not exported ({})", entity, e),
        }
    }
    for path in &report.csv_files {
        info!("CSV written: {}", path.display());
    }

    if report.is_success() {
        info!("Export finished: {} file(s) written", report.outcomes.len());
    } else {
        error!("Export finished with {} failure(s)", report.failures());
    }
    Ok(ExitCode::from(report.exit_code()))
}
