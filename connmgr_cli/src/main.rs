mod ui;

use crate::ui::cli;
use clap::Parser;
use connmgr_core::utils::logging::init_logging;

#[tokio::main]
async fn main() {
    init_logging();
    let args = cli::Args::parse();
    match cli::run_cli(args).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(cli::exit_code(&e));
        }
    }
}
