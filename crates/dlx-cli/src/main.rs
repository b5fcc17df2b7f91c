use dlx_core::logging;

mod cli;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    logging::init_logging().expect("failed to initialize logging");

    if let Err(err) = Cli::run_from_args().await {
        eprintln!("dlx error: {:#}", err);
        std::process::exit(1);
    }
}
