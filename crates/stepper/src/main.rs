// Stepper - Thread-plan execution engine
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Stepper - thread-plan stepping from the command line
//!
//! Loads a program into the simulated inferior, stops it where asked and
//! runs one built-in or scripted step plan through the step engine.

use clap::{Parser, Subcommand};
use eyre::Result;

mod cmd;

/// Command-line interface for Stepper
#[derive(Debug, Parser)]
#[command(name = "stepper")]
#[command(about = "Stepper - Run thread plans against a simulated inferior")]
#[command(version)]
pub struct Cli {
    /// Also write logs to a rotating file in the temp directory
    #[arg(long, env = "STEPPER_LOG_FILE")]
    pub log_file: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run one step plan on a thread of a simulated program
    Step(cmd::StepArgs),
    /// Classify instruction mnemonics for an architecture
    Classify(cmd::ClassifyArgs),
    /// List the scripted plans that can be requested with --class
    Plans,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    stepper_common::logging::init_logging("stepper", cli.log_file)?;

    match cli.command {
        Commands::Step(args) => cmd::run_step(args).await,
        Commands::Classify(args) => cmd::classify(&args),
        Commands::Plans => cmd::list_plans(),
    }
}
