use clap::Parser;
use log::info;

use btpicker::error::{AppRunError, ConfigError};
use btpicker::picker::CliOptions;
use btpicker::{init_logging, run};

#[tokio::main]
async fn main() -> Result<(), AppRunError> {
    init_logging();
    info!(concat!("btpicker ", env!("CARGO_PKG_VERSION")));

    let options = CliOptions::parse();

    match run(options).await {
        Err(AppRunError::ConfigError { source: ConfigError::CanNotLock { .. } }) => {
            eprintln!("This application has already been started");
            Ok(())
        },
        Err(err) => {
            eprintln!("Unexpected error: {}", err);
            Err(err)
        },
        Ok(_) => Ok(()),
    }
}
