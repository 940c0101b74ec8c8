use std::{net::SocketAddr, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};
use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{config::Config, hub::Subscriber, manager::ConnectionManager};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(manager): Extension<ConnectionManager>,
    Extension(config): Extension<Config>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{addr}` connected", user_agent.as_str());
    } else {
        info!("`{addr}` connected");
    }

    let send_timeout = config.send_timeout();

    ws.on_upgrade(move |socket| {
        let subscriber = manager.hub().subscribe();
        let span = info_span!("Peer", %addr, id = %subscriber.id());

        handle_websocket(socket, subscriber, send_timeout).instrument(span)
    })
}

/// Inbound frames carry no meaning, this only notices the peer leaving.
pub(crate) async fn read<S>(mut receiver: S)
where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                trace!(%text, "Ignoring text from peer");
            }
            Message::Binary(_) => {
                trace!("Ignoring binary data from peer");
            }
            Message::Ping(_) | Message::Pong(_) => {
                trace!("Ping/pong");
            }
            Message::Close(_) => {
                debug!("Peer closed the socket");
                return;
            }
        }
    }

    debug!("Peer gone");
}

/// Forward hub messages to the peer until either side gives up.
pub(crate) async fn write(
    mut sender: impl Sink<Message> + Unpin,
    mut subscriber: Subscriber,
    send_timeout: Duration,
) {
    while let Some(message) = subscriber.recv().await {
        trace!(%message, "Sending");

        match timeout(send_timeout, sender.send(Message::Text(message.serialize()))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                debug!("Peer disconnected");
                return;
            }
            Err(_) => {
                warn!(?send_timeout, "Peer too slow to receive, dropping it");
                return;
            }
        }
    }

    warn!("Dropped by the hub for not keeping up");
}

pub(crate) async fn handle_websocket(
    websocket: WebSocket,
    subscriber: Subscriber,
    send_timeout: Duration,
) {
    let (stream_sender, stream_receiver) = websocket.split();

    let mut read_handle = tokio::spawn(read(stream_receiver).instrument(info_span!("Read")));
    let mut write_handle = tokio::spawn(
        write(stream_sender, subscriber, send_timeout).instrument(info_span!("Write")),
    );

    // Whichever side ends first ends the session.
    // Aborting the write task drops the subscriber, which unsubscribes it,
    // and lets go of the socket, which closes the connection.
    tokio::select! {
        _ = &mut read_handle => {
            debug!("Read task ended, aborting write task");
            write_handle.abort();
        }
        _ = &mut write_handle => {
            debug!("Write task ended, aborting read task");
            read_handle.abort();
        }
    }

    info!("Disconnected");
}
