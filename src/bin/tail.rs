use clap::Parser;
use color_eyre::Result;
use serial_relay::{client::StreamClient, events::OutboundMessage};
use tracing::{info, Level};

/// Prints what a running server streams: state changes and device lines.
#[derive(Parser, Debug)]
struct Args {
    /// Server address.
    #[arg(short, long, default_value = "localhost")]
    address: String,

    /// Server port.
    #[arg(short, long, default_value_t = serial_relay::server::DEFAULT_PORT)]
    port: u16,
}

async fn run(args: Args) -> Result<()> {
    let mut client = StreamClient::connect(&args.address, args.port).await?;

    while let Some(message) = client.next_message().await {
        match message? {
            OutboundMessage::Status { state } => println!("-- {state} --"),
            OutboundMessage::Data { line, .. } => print!("{line}"),
        }
    }

    info!("Server closed the stream");

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    serial_relay::logging::init(Level::WARN, None).await;

    let args = Args::parse();

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting");
            Ok(())
        }
        result = run(args) => result,
    }
}
