// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::{Parser, Subcommand};
use leasehold::commands::list::ListCommand;
use leasehold::commands::purge::PurgeCommand;
use leasehold::commands::run::{RunCommand, parse_meta_pair};
use leasehold::commands::show::ShowCommand;
use leasehold::config::new_leasehold_config;
use leasehold::error::{Result, format_error_chain, get_exit_code};
use leasehold::locking::LockFilter;
use leasehold::logging;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "leasehold")]
#[command(author, version, about = "Lease-based distributed locks", long_about = None)]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command while holding a lock
    #[command(long_about = "Run a command while holding a lock

The lease is renewed in the background for as long as the command runs.
If the lease is lost the command is killed. Exits with the command's exit
code, or 75 when another holder already has the lock.

Examples:
  leasehold run nightly-report -- ./report.sh
  leasehold run reindex --meta shard=3 -- make reindex")]
    Run {
        /// Lock key
        key: String,

        /// Diagnostic metadata stored with the lock (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE", value_parser = parse_meta_pair)]
        meta: Vec<(String, Value)>,

        /// Command and arguments to run
        #[arg(last = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },

    /// List locks in the table
    #[command(visible_alias = "ls")]
    List {
        /// Show only locks whose lease has not expired
        #[arg(long, conflicts_with = "expired")]
        active: bool,

        /// Show only locks whose lease has expired
        #[arg(long)]
        expired: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show a single lock
    Show {
        /// Lock key
        key: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Delete expired lock rows
    Purge {
        /// Show what would be removed without deleting anything
        #[arg(long)]
        dry_run: bool,
    },
}

fn setup_logger(cli: &Cli) {
    logging::setup_logger(cli.verbose);
}

fn main() {
    let cli = Cli::parse();

    // Initialize logger based on CLI flags and environment
    setup_logger(&cli);

    // Load configuration once at startup
    let config = match new_leasehold_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", format_error_chain(&e));
            std::process::exit(get_exit_code(&e));
        }
    };

    let result: Result<i32> = (|| match cli.command {
        Commands::Run { key, meta, command } => {
            let command_runner = RunCommand::new(&config)?;
            command_runner.execute(&key, meta, &command)
        }
        Commands::List {
            active,
            expired,
            json,
        } => {
            let filter = match (active, expired) {
                (true, _) => LockFilter::Active,
                (_, true) => LockFilter::Expired,
                _ => LockFilter::All,
            };
            ListCommand::new(&config)?.execute(filter, json)?;
            Ok(0)
        }
        Commands::Show { key, json } => {
            ShowCommand::new(&config)?.execute(&key, json)?;
            Ok(0)
        }
        Commands::Purge { dry_run } => {
            PurgeCommand::new(&config)?.execute(dry_run)?;
            Ok(0)
        }
    })();

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{}", format_error_chain(&e));
            std::process::exit(get_exit_code(&e));
        }
    }
}
