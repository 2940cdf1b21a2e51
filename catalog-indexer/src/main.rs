use std::process::ExitCode;
use tracing::{error, info};

use catalog_indexer::{logging, run, Settings};

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine.
    let _ = dotenv::dotenv();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = logging::init(settings.log_format) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    info!(run_once = settings.run_once, "Starting catalog indexer");
    match run(settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Catalog indexer stopped");
            ExitCode::FAILURE
        }
    }
}
