use std::env;

use crate::error::AppRunError;
use crate::picker::CliOptions;

pub mod config;
pub mod error;
pub mod picker;
pub mod radio;
pub mod session;

pub fn init_logging() {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {} {}] {}",
                humantime::format_rfc3339(std::time::SystemTime::now()),
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Info)
        .chain(std::io::stderr());

    if let Ok(log_file) = env::var("LOG_FILE") {
        dispatch = dispatch.chain(
            fern::log_file(log_file).expect("Failed to open LOG_FILE")
        );
    }

    dispatch.apply().expect("Failed to initialize logger");
}

pub async fn run(options: CliOptions) -> Result<(), AppRunError> {
    picker::run_picker(options).await?;
    Ok(())
}
