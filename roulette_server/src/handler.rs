//! WebSocket connection handling for the pairing server
//!
//! Each accepted socket gets a writer task that drains the connection's
//! outbound channel and sends keep-alive pings, and a read loop that parses
//! client events and dispatches them into [`ServerState`].

use crate::connections::{Connections, EventReceiver};
use crate::error::ClientRequestError;
use crate::protocol::{ClientEvent, ConnectionId, ServerEvent};
use crate::server::AppContext;
use crate::state::ServerState;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, header};
use tokio_tungstenite::tungstenite::{self, Message};

type WsStream = WebSocketStream<TcpStream>;

/// How long the writer gets to flush and close after the read side ends
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Parse one incoming frame. Control frames yield `Ok(None)`.
pub fn parse_request(
    message: Result<Message, tungstenite::Error>,
) -> Result<Option<ClientEvent>, ClientRequestError> {
    match message? {
        Message::Text(text) => Ok(Some(text.as_str().parse()?)),
        Message::Binary(_) => Err(ClientRequestError::UnsupportedType),
        Message::Close(_) => Err(ClientRequestError::Close),
        Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => Ok(None),
    }
}

/// Apply one client event to the pairing state
pub fn dispatch(state: &ServerState, id: ConnectionId, event: ClientEvent) {
    match event {
        ClientEvent::StartSearch(preferences) => {
            state.search(id, preferences.unwrap_or_default());
        }
        ClientEvent::NextPartner => state.next_partner(id),
        ClientEvent::Leave => state.leave(id),
        ClientEvent::Signal { session_id, signal } => {
            state.relay_signal(id, session_id, signal);
        }
        ClientEvent::Message { session_id, text } => {
            state.relay_message(id, session_id, text);
        }
    }
}

/// Serve one TCP connection from handshake to cleanup
pub async fn handle_connection(stream: TcpStream, peer_addr: SocketAddr, ctx: AppContext) {
    let config = ctx.config();
    let check_origin = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        let origin = request
            .headers()
            .get(header::ORIGIN)
            .and_then(|value| value.to_str().ok());
        if config.origin_allowed(origin) {
            Ok(response)
        } else {
            tracing::warn!(%peer_addr, ?origin, "rejecting handshake from disallowed origin");
            let mut rejection = ErrorResponse::new(Some("Origin not allowed".into()));
            *rejection.status_mut() = StatusCode::FORBIDDEN;
            Err(rejection)
        }
    };

    let websocket = match tokio_tungstenite::accept_hdr_async(stream, check_origin).await {
        Ok(websocket) => websocket,
        Err(err) => {
            tracing::debug!(%peer_addr, %err, "websocket handshake failed");
            return;
        }
    };

    let state = ctx.state();
    let (id, events) = state.connect();
    tracing::debug!(connection = %id, %peer_addr, "websocket established");

    let (sink, stream) = websocket.split();
    let mut writer = tokio::spawn(write_loop(sink, events, ctx.config().ping_interval));

    match read_loop(stream, id, &ctx).await {
        Ok(()) | Err(ClientRequestError::Close) => {}
        Err(err) => tracing::debug!(connection = %id, %err, "connection ended with error"),
    }

    state.disconnect(id);
    if time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    id: ConnectionId,
    ctx: &AppContext,
) -> Result<(), ClientRequestError> {
    let idle_timeout = ctx.config().idle_timeout;
    loop {
        let message = match time::timeout(idle_timeout, stream.next()).await {
            Ok(Some(message)) => message,
            Ok(None) => return Err(ClientRequestError::Close),
            Err(_) => {
                tracing::info!(connection = %id, "closing idle connection");
                return Ok(());
            }
        };

        match parse_request(message) {
            Ok(Some(event)) => dispatch(ctx.state(), id, event),
            Ok(None) => {}
            Err(ClientRequestError::Json(err)) => {
                tracing::debug!(connection = %id, %err, "invalid client event");
                ctx.connections()
                    .send(id, ServerEvent::Error(format!("Invalid request: {err}")));
            }
            Err(ClientRequestError::UnsupportedType) => {
                ctx.connections().send(
                    id,
                    ServerEvent::Error("Binary frames are not supported".into()),
                );
            }
            Err(err) => return Err(err),
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut events: EventReceiver,
    ping_interval: Duration,
) {
    let mut ping = time::interval_at(Instant::now() + ping_interval, ping_interval);
    loop {
        let message = tokio::select! {
            event = events.recv() => match event {
                Some(event) => match serde_json::to_string(&event) {
                    Ok(json) => Message::text(json),
                    Err(err) => {
                        tracing::warn!(%err, "failed to serialize server event");
                        continue;
                    }
                },
                None => break,
            },
            _ = ping.tick() => Message::Ping(Default::default()),
        };
        if let Err(err) = sink.send(message).await {
            tracing::debug!(%err, "websocket send failed");
            break;
        }
    }
    let _ = sink.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SessionId;

    #[test]
    fn text_frames_parse_into_events() {
        let event = parse_request(Ok(Message::text(r#"{"event":"leave"}"#))).unwrap();
        assert_eq!(event, Some(ClientEvent::Leave));

        let session_id = SessionId::new();
        let json = format!(
            r#"{{"event":"message","data":{{"sessionId":"{session_id}","text":"hello"}}}}"#
        );
        match parse_request(Ok(Message::text(json))).unwrap() {
            Some(ClientEvent::Message {
                session_id: parsed, ..
            }) => assert_eq!(parsed, session_id),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn control_frames_are_ignored() {
        assert!(parse_request(Ok(Message::Ping(Default::default())))
            .unwrap()
            .is_none());
        assert!(parse_request(Ok(Message::Pong(Default::default())))
            .unwrap()
            .is_none());
    }

    #[test]
    fn bad_frames_map_to_request_errors() {
        assert!(matches!(
            parse_request(Ok(Message::text("{"))),
            Err(ClientRequestError::Json(_))
        ));
        assert!(matches!(
            parse_request(Ok(Message::binary(vec![1, 2, 3]))),
            Err(ClientRequestError::UnsupportedType)
        ));
        assert!(matches!(
            parse_request(Ok(Message::Close(None))),
            Err(ClientRequestError::Close)
        ));
        assert!(matches!(
            parse_request(Err(tungstenite::Error::ConnectionClosed)),
            Err(ClientRequestError::WebSocket(_))
        ));
    }
}
