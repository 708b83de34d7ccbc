use std::net::SocketAddr;

use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};

use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::hub::{Hub, Subscriber};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(hub): Extension<Hub>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{addr}` connected", user_agent.as_str());
    } else {
        info!("`{addr}` connected");
    }

    ws.on_upgrade(move |socket| {
        let span = info_span!("client", %addr);

        handle_websocket(socket, addr, hub).instrument(span)
    })
}

/// Clients only listen.
/// Anything they send is logged and dropped.
pub(crate) async fn read<S>(mut receiver: S)
where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                debug!(%text, "client sent text, ignoring");
            }
            Message::Binary(_) => {
                debug!("client sent binary data, ignoring");
            }
            Message::Ping(_) => {
                trace!("socket ping");
            }
            Message::Pong(_) => {
                trace!("socket pong");
            }
            Message::Close(_) => {
                debug!("client disconnected");
                break;
            }
        }
    }

    debug!("no more stuff");
}

pub(crate) async fn write(mut sender: impl Sink<Message> + Unpin, mut subscriber: Subscriber) {
    while let Some(event) = subscriber.next().await {
        let text = match event.serialize() {
            Ok(text) => text,
            Err(e) => {
                warn!(?e, "Could not serialize {event}");
                continue;
            }
        };

        if sender.send(Message::Text(text)).await.is_err() {
            debug!("client disconnected");
            return;
        }
        trace!("Event flushed");
    }

    // The hub let go of us: too slow, or shutting down.
    debug!("Subscription ended, closing socket");
    let _ = sender.send(Message::Close(None)).await;
}

pub(crate) async fn handle_websocket(websocket: WebSocket, addr: SocketAddr, hub: Hub) {
    let (stream_sender, stream_receiver) = websocket.split();

    let subscriber = hub.register(&addr.to_string());

    let mut read_handle = tokio::spawn(read(stream_receiver).instrument(info_span!("read")));
    let mut write_handle =
        tokio::spawn(write(stream_sender, subscriber).instrument(info_span!("write")));

    // Whichever side finishes first takes the other down with it.
    // Aborting the write task drops the subscriber, which unregisters it.
    tokio::select! {
        result = &mut read_handle => {
            if let Err(e) = result {
                warn!("Read task join error: {e:?}");
            }
            debug!("Aborting write task");
            write_handle.abort();
        }
        result = &mut write_handle => {
            if let Err(e) = result {
                warn!("Write task join error: {e:?}");
            }
            debug!("Aborting read task");
            read_handle.abort();
        }
    }
}
