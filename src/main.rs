// src/main.rs

use clap::Parser;

use monorun::cli::Cli;
use monorun::logging::init_logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_level) {
        eprintln!("failed to initialise logging: {e}");
        std::process::exit(1);
    }

    match monorun::run(cli).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
