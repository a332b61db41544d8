// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Parser, Debug)]
#[command(
    name = "tether",
    about = "Device node that exposes local capabilities to a remote gateway",
    version,
    long_about = None,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Path to a configuration file (overrides the default search path)
    #[arg(long, short = 'c', env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Gateway WebSocket URL (overrides `gateway.url` from config)
    #[arg(long, short = 'g', value_name = "URL")]
    pub gateway: Option<String>,

    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the gateway and serve commands until interrupted (default)
    Run,
    /// Print the device id and public key, creating the identity if needed
    Identity,
    /// Replace the device keypair and forget every stored session token
    ResetIdentity,
    /// Print the effective configuration and exit
    ShowConfig,
    /// Generate shell completion script
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "tether", &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_run() {
        let cli = Cli::try_parse_from(["tether"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn verbosity_counts_and_gateway_override() {
        let cli =
            Cli::try_parse_from(["tether", "-g", "ws://10.0.0.2:18789", "-vv", "run"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.gateway.as_deref(), Some("ws://10.0.0.2:18789"));
        assert!(matches!(cli.command, Some(Commands::Run)));
    }

    #[test]
    fn clap_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
