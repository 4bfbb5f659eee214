//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log filter directive, e.g. `netmux_core=debug` (overrides --verbose)
    #[arg(long)]
    pub log: Option<String>,

    /// Configuration file path (TOML)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Print reports as JSON
    #[arg(long)]
    pub json: bool,

    /// Override the per-client event queue depth
    #[arg(long)]
    pub queue_capacity: Option<usize>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Echo a stream between two clients over a loopback TCP connection
    TcpEcho {
        /// Port the echo server listens on
        #[arg(short, long, default_value_t = 7)]
        port: u16,
        /// Number of messages to send
        #[arg(short, long, default_value_t = 8)]
        messages: usize,
        /// Size of each message in bytes
        #[arg(short, long, default_value_t = 256)]
        size: usize,
    },
    /// Echo datagrams between two clients over loopback UDP
    UdpEcho {
        /// Port the echo server binds
        #[arg(short, long, default_value_t = 7)]
        port: u16,
        /// Number of datagrams to send
        #[arg(short, long, default_value_t = 8)]
        messages: usize,
        /// Size of each datagram in bytes
        #[arg(short, long, default_value_t = 64)]
        size: usize,
    },
    /// Resolve a name through the loopback hosts table
    Resolve {
        /// Host name to look up
        name: String,
    },
    /// Print the effective configuration
    ShowConfig,
}
