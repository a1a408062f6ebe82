use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use magicpen::cli::{self, CliArgs};
use magicpen::logger;
use magicpen::{DbscanFilter, IntensityPredictor, MagicPenService};

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Initialize session log (overwrites previous session log)
    logger::init(args.log_file.as_deref(), args.verbose);
    log::info!("MagicPen {} starting", env!("CARGO_PKG_VERSION"));

    // The predictor is built once and shared by every request.
    let service = MagicPenService::new(Arc::new(IntensityPredictor), Arc::new(DbscanFilter));

    let code = cli::run(args, &service);
    log::logger().flush();
    code
}
