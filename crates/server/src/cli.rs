//! Command-line interface.

use clap::{Parser, Subcommand};

/// Authenticated remote administration gateway for a single host.
#[derive(Parser, Debug)]
#[command(name = "hostgate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Serve the HTTP API (default).
    Serve {
        /// Listen address, overrides HOST.
        #[arg(long)]
        host: Option<String>,
        /// Listen port, overrides PORT.
        #[arg(long)]
        port: Option<u16>,
    },
    /// Speak MCP over stdin/stdout.
    Stdio,
    /// Print the tool catalog as JSON and exit.
    Tools,
}

impl Cli {
    pub fn command(&self) -> Command {
        match &self.command {
            Some(Command::Serve { host, port }) => Command::Serve {
                host: host.clone(),
                port: *port,
            },
            Some(Command::Stdio) => Command::Stdio,
            Some(Command::Tools) => Command::Tools,
            None => Command::Serve {
                host: None,
                port: None,
            },
        }
    }
}
