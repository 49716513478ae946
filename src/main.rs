use clap::Parser;
use std::process::ExitCode;
use webcast_lib::{logger, Config};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    logger::init(&config.log);

    match webcast_lib::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "webcast failed");
            ExitCode::FAILURE
        }
    }
}
