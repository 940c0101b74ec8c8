#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use color_eyre::Result;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Serialize};
use serial_relay::{
    config::Config,
    events::{ConnectionState, OutboundMessage},
    manager::ConnectionManager,
    mock::{MockConnector, MockDevice, MockPort},
};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, Level};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const PORT_NAME: &str = "COM3";
pub const BAUD: u32 = 115_200;

/// A running server backed by one mock port.
pub struct TestServer {
    pub port: u16,
    pub mock: MockPort,
    pub manager: ConnectionManager,
    http: reqwest::Client,
}

pub fn test_config() -> Config {
    Config {
        read_timeout_ms: 10,
        send_timeout_ms: 500,
        ..Default::default()
    }
}

pub async fn start() -> Result<TestServer> {
    start_with(test_config()).await
}

pub async fn start_with(config: Config) -> Result<TestServer> {
    serial_relay::logging::init(Level::INFO, None).await;

    let connector = MockConnector::new();
    let mock = connector.add_port(PORT_NAME);

    let manager = ConnectionManager::new(Arc::new(connector), &config);
    let (port_tx, port_rx) = oneshot::channel();

    let server_manager = manager.clone();
    tokio::spawn(async move {
        serial_relay::server::run_any_port(config, server_manager, port_tx).await
    });
    let port = port_rx
        .await
        .expect("Server should reply with allocated port");

    info!("Server on port {port}");

    Ok(TestServer {
        port,
        mock,
        manager,
        http: reqwest::Client::new(),
    })
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        Ok(self.http.get(self.url(path)).send().await?)
    }

    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        Ok(self.http.post(self.url(path)).json(body).send().await?)
    }

    /// Post, expecting the given status, and parse the response.
    pub async fn post_expect<B, R>(&self, path: &str, body: &B, status: StatusCode) -> Result<R>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let response = self.post(path, body).await?;
        assert_eq!(response.status(), status);

        Ok(response.json().await?)
    }

    /// Open the mock port over HTTP and return the device side.
    pub async fn open(&mut self) -> Result<MockDevice> {
        let response = self
            .post(
                "/open",
                &serde_json::json!({"port": PORT_NAME, "baud": BAUD}),
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);

        let device = timeout(Duration::from_secs(5), self.mock.next_device())
            .await?
            .ok_or_else(|| color_eyre::eyre::eyre!("Mock port gone"))?;

        Ok(device)
    }

    pub async fn connect(&self) -> Result<Client> {
        let (stream, http_response) =
            tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{}/ws", self.port)).await?;

        assert_eq!(http_response.status().as_u16(), 101);

        Ok(stream)
    }

    /// Connect and consume the status snapshot, which should be `state`.
    pub async fn connect_expecting(&self, state: ConnectionState) -> Result<Client> {
        let mut client = self.connect().await?;
        assert_eq!(receive(&mut client).await?, OutboundMessage::status(state));

        Ok(client)
    }
}

pub async fn receive(client: &mut Client) -> Result<OutboundMessage> {
    let message = timeout(Duration::from_secs(5), client.next())
        .await?
        .ok_or_else(|| color_eyre::eyre::eyre!("Stream closed"))??;

    let message = message.to_text()?;
    let message = serde_json::from_str(message)?;

    Ok(message)
}

pub async fn receive_status(client: &mut Client) -> Result<ConnectionState> {
    receive(client)
        .await?
        .as_status()
        .ok_or_else(|| color_eyre::eyre::eyre!("Expected a status message"))
}

pub async fn receive_line(client: &mut Client) -> Result<String> {
    match receive(client).await? {
        OutboundMessage::Data { line, .. } => Ok(line),
        other => Err(color_eyre::eyre::eyre!("Expected data, got {other}")),
    }
}

/// Nothing more arrives for a little while.
pub async fn assert_quiet(client: &mut Client) {
    let next = timeout(Duration::from_millis(100), client.next()).await;
    assert!(next.is_err(), "Expected silence, got {next:?}");
}
