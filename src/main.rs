use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use serial_relay::{
    cli,
    config::Config,
    device::Connector,
    logging,
    manager::ConnectionManager,
    mock::MockConnector,
    serial::serial_port::SerialPortConnector,
    server,
};

use tracing::{debug, error, info, Level};

#[cfg(unix)]
async fn hangup() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    signal(SignalKind::hangup())?.recv().await;

    Ok(())
}

#[cfg(not(unix))]
async fn hangup() -> Result<()> {
    futures::future::pending().await
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = cli::Cli::parse();

    if let Some(command) = cli.command {
        cli::handle_command(command);

        return Ok(());
    }

    logging::init(cli.log_level, cli.log_dir.map(|dir| (Level::DEBUG, dir))).await;

    let config = if let Some(config_path) = cli.config {
        debug!(?config_path, "Config from path");
        Config::new_from_path(config_path)?
    } else {
        debug!("Default config");
        Config::default()
    };
    config.validate()?;

    let connector: Arc<dyn Connector> = match cli.mock {
        Some(name) => {
            info!(%name, "Serving a mock device instead of serial ports");

            let connector = MockConnector::new();
            connector.add_port(&name).loopback_forever();
            Arc::new(connector)
        }
        None => Arc::new(SerialPortConnector::new()),
    };

    let manager = ConnectionManager::new(connector, &config);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C, quitting")
        }
        _ = hangup() => {
            info!("Told to hang up, quitting")
        }
        result = server::run_on_port(config, manager.clone(), cli.port) => {
            error!(?result, "Server returned");
            result?;
            return Err(color_eyre::eyre::eyre!("Server stopped unexpectedly"));
        }
    }

    manager.close().await;
    logging::shutdown();

    Ok(())
}
