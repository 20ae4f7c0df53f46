pub mod browser;
pub mod calendar;
pub mod capture;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod imaging;
pub mod pipeline;
pub mod utils;

use std::process::ExitCode;

use clap::Parser;
use log::error;

pub fn run() -> ExitCode {
    utils::logging::init();

    let cli = cli::Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to start async runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(cli::execute(cli)) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
