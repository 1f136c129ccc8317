// src/lib.rs

pub mod cache;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod globwalk;
pub mod hashing;
pub mod logging;
pub mod paths;
pub mod process;
pub mod run;
pub mod runcache;
pub mod scm;
pub mod taskhash;
pub mod ui;
pub mod workspace;

use anyhow::Result;

use crate::cli::{Cli, Command};
use crate::paths::AbsPath;

/// High-level entry point used by `main.rs`.
///
/// Resolves the repository root, dispatches the subcommand, and returns the
/// process exit code.
pub async fn run(cli: Cli) -> Result<i32> {
    let repo_root = match &cli.cwd {
        Some(cwd) => {
            let std_path = std::path::Path::new(cwd).canonicalize()?;
            AbsPath::from_std(&std_path)?
        }
        None => AbsPath::cwd()?,
    };

    match cli.command {
        Command::Run(args) => {
            let opts = args.into_options();
            match crate::run::run(&repo_root, opts).await {
                Ok(exit_code) => Ok(exit_code),
                Err(e) => {
                    eprintln!("{e}");
                    Ok(1)
                }
            }
        }
    }
}
