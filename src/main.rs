mod cli;
mod command;

use agent_sandbox::logger;
use anyhow::Result;
use tracing::{error, info};

fn main() -> Result<()> {
    logger::init()?;
    info!(args = ?std::env::args().collect::<Vec<_>>(), "sbx start");

    match cli::run() {
        Ok(result) => {
            info!("sbx finished successfully");
            Ok(result)
        }
        Err(err) => {
            error!(error = ?err, "sbx failed");
            Err(err)
        }
    }
}
