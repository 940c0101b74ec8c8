use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::Level;

use crate::{
    config::Config,
    control::{OpenRequest, WriteRequest},
    events::OutboundMessage,
    server::DEFAULT_PORT,
};

/// The command line interface for serial relay.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Path to a configuration file
    pub config: Option<PathBuf>,

    /// Which port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The most detailed level logged to stdout.
    #[arg(long, default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Also log (at debug level) to daily rotated files in this directory.
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Serve an in-memory device with this port name, which echoes every line written to it.
    /// Real serial ports are not used then.
    #[arg(long, value_name = "NAME")]
    pub mock: Option<String>,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Commands available in the command line interface.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Examples for user convenience.
    #[clap(subcommand)]
    Examples(Examples),
}

/// Helpful examples for users.
#[derive(Subcommand, Clone, Debug)]
pub enum Examples {
    /// Show an example of a configuration file's contents.
    Config,

    /// Show an example JSON request for opening a device.
    OpenRequest,

    /// Show an example JSON request for writing a command.
    WriteRequest,

    /// Show an example JSON message (from server to subscriber) of a state change.
    StatusMessage,

    /// Show an example JSON message (from server to subscriber) of a device line.
    DataMessage,
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<could not serialize: {e}>"))
}

/// Render the given example.
pub fn example(example: &Examples) -> String {
    match example {
        Examples::Config => Config::example().serialize_pretty(),
        Examples::OpenRequest => to_json(&OpenRequest::example()),
        Examples::WriteRequest => to_json(&WriteRequest::example()),
        Examples::StatusMessage => OutboundMessage::example_status().serialize(),
        Examples::DataMessage => OutboundMessage::example_data().serialize(),
    }
}

/// Run the given command.
pub fn handle_command(command: Commands) {
    match command {
        Commands::Examples(e) => println!("{}", example(&e)),
    }
}
