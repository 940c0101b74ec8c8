use color_eyre::Result;
use futures::SinkExt;
use pretty_assertions::assert_eq;
use serial_relay::{
    client::StreamClient,
    events::{ConnectionState, OutboundMessage},
};

mod common;

use common::{assert_quiet, receive, receive_line, receive_status};

fn describe(message: &OutboundMessage) -> String {
    match message {
        OutboundMessage::Status { state } => state.to_string(),
        OutboundMessage::Data { line, .. } => line.clone(),
    }
}

#[tokio::test]
async fn snapshot_on_connect() -> Result<()> {
    let mut server = common::start().await?;

    let mut closed = server.connect().await?;
    assert_eq!(receive_status(&mut closed).await?, ConnectionState::Closed);

    let _device = server.open().await?;

    let mut open = server.connect().await?;
    assert_eq!(receive_status(&mut open).await?, ConnectionState::Open);
    assert_quiet(&mut open).await;

    Ok(())
}

#[tokio::test]
async fn device_line_is_streamed_once() -> Result<()> {
    let mut server = common::start().await?;
    let mut device = server.open().await?;
    let mut client = server.connect_expecting(ConnectionState::Open).await?;

    device.emit("OK\r\n").await?;

    let message = receive(&mut client).await?;
    match message {
        OutboundMessage::Data { line, ts } => {
            assert_eq!(line, "OK\r\n");
            assert!(ts > 0.0);
        }
        other => panic!("Expected data, got {other}"),
    }
    assert_quiet(&mut client).await;

    Ok(())
}

#[tokio::test]
async fn written_commands_come_back_from_a_loopback_device() -> Result<()> {
    let mut server = common::start().await?;
    let device = server.open().await?;
    let _loopback = device.loopback();
    let mut client = server.connect_expecting(ConnectionState::Open).await?;

    for cmd in ["STATUS", "RESET"] {
        server
            .post("/write", &serde_json::json!({ "cmd": cmd }))
            .await?;

        assert_eq!(receive_line(&mut client).await?, format!("{cmd}\n"));
    }

    Ok(())
}

#[tokio::test]
async fn subscribers_see_the_same_sequence() -> Result<()> {
    let mut server = common::start().await?;
    let mut a = server.connect_expecting(ConnectionState::Closed).await?;
    let mut b = server.connect_expecting(ConnectionState::Closed).await?;

    let mut device = server.open().await?;
    device.emit("one\ntwo\n").await?;

    // Everything so far, before closing.
    let mut seen_by_a = vec![];
    for _ in 0..4 {
        seen_by_a.push(receive(&mut a).await?);
    }

    server.post("/close", &serde_json::json!({})).await?;
    for _ in 0..2 {
        seen_by_a.push(receive(&mut a).await?);
    }

    let mut seen_by_b = vec![];
    for _ in 0..seen_by_a.len() {
        seen_by_b.push(receive(&mut b).await?);
    }

    assert_eq!(seen_by_a, seen_by_b);
    assert_eq!(
        seen_by_a.iter().map(describe).collect::<Vec<_>>(),
        vec!["opening", "open", "one\n", "two\n", "closing", "closed"]
    );

    assert_quiet(&mut a).await;
    assert_quiet(&mut b).await;

    Ok(())
}

#[tokio::test]
async fn inbound_frames_are_ignored() -> Result<()> {
    let mut server = common::start().await?;
    let mut client = server.connect_expecting(ConnectionState::Closed).await?;

    client
        .send(tungstenite::Message::Text("hello?".into()))
        .await?;
    assert_quiet(&mut client).await;

    // Still subscribed
    let _device = server.open().await?;
    assert_eq!(receive_status(&mut client).await?, ConnectionState::Opening);

    Ok(())
}

#[tokio::test]
async fn disconnecting_unsubscribes() -> Result<()> {
    let server = common::start().await?;
    let hub = server.manager.hub().clone();

    let mut client = server.connect_expecting(ConnectionState::Closed).await?;
    assert_eq!(hub.subscriber_count(), 1);

    client.close(None).await?;
    drop(client);

    tokio::time::timeout(std::time::Duration::from_secs(5), async {
        while hub.subscriber_count() != 0 {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await?;

    Ok(())
}

#[tokio::test]
async fn stream_client() -> Result<()> {
    let mut server = common::start().await?;
    let mut client = StreamClient::connect("127.0.0.1", server.port).await?;

    let first = client.next_message().await.transpose()?;
    assert_eq!(first, Some(OutboundMessage::status(ConnectionState::Closed)));

    let mut device = server.open().await?;
    device.emit("> ").await?;

    let mut messages = vec![];
    while messages.len() < 3 {
        let message = client
            .next_message()
            .await
            .ok_or_else(|| color_eyre::eyre::eyre!("Stream closed"))??;
        messages.push(message);
    }

    assert_eq!(messages[0], OutboundMessage::status(ConnectionState::Opening));
    assert_eq!(messages[1], OutboundMessage::status(ConnectionState::Open));
    assert_eq!(messages[2].as_data(), Some("> "));

    Ok(())
}
