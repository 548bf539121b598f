//! Connection Tasks
//!
//! One Tokio task per socket. It performs the TCP connect and the WebSocket
//! handshake, then shuttles frames between the network and the event loop.
//! Everything it learns is reported as a `SocketSignal`; it never touches
//! loop-side state directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::client::{Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::event_loop::{LoopClient, Payload, SocketId, SocketSignal, TOKIO};

/// Close code reported when the connection ends without a closing handshake.
pub(crate) const ABNORMAL_CLOSURE: u16 = 1006;
/// Close code reported when the peer's close frame carried no status.
pub(crate) const NO_STATUS_RECEIVED: u16 = 1005;

/// Commands from the loop-side socket to its connection task.
#[derive(Debug)]
pub(crate) enum Outbound {
    Message(Payload),
    /// Start the closing handshake.
    Close { code: Option<u16>, reason: String },
    /// Drop the connection without a handshake.
    Abort,
}

/// Everything a connection task needs, moved onto the runtime.
pub(crate) struct Connection {
    pub id: SocketId,
    pub url: url::Url,
    pub outbound: mpsc::UnboundedReceiver<Outbound>,
    pub client: LoopClient,
    pub buffered: Arc<AtomicU64>,
}

pub(crate) fn spawn(connection: Connection, request: Request) {
    TOKIO.spawn(run(connection, request));
}

async fn run(mut connection: Connection, request: Request) {
    let id = connection.id;
    log::info!("[WebSocket {}] Connecting to {}", id, connection.url);

    let connecting = connect(id, connection.url.clone(), request);
    tokio::pin!(connecting);

    let (stream, response) = loop {
        tokio::select! {
            result = &mut connecting => match result {
                Ok(pair) => break pair,
                Err(message) => {
                    fail(&connection.client, id, message);
                    return;
                }
            },
            command = connection.outbound.recv() => match command {
                Some(Outbound::Message(_)) => continue,
                Some(Outbound::Close { .. }) | Some(Outbound::Abort) | None => {
                    log::info!("[WebSocket {}] Closed before the handshake finished", id);
                    abort(&connection.client, id);
                    return;
                }
            },
        }
    };

    let protocol = header(&response, "sec-websocket-protocol");
    let extensions = header(&response, "sec-websocket-extensions");
    connection
        .client
        .signal(id, SocketSignal::Opened { protocol, extensions });

    pump(connection, stream).await;
    log::info!("[WebSocket {}] Connection ended", id);
}

/// Establish TCP, then perform the client handshake.
async fn connect(
    id: SocketId,
    url: url::Url,
    request: Request,
) -> Result<(WebSocketStream<MaybeTlsStream<TcpStream>>, Response), String> {
    if url.scheme() == "wss" {
        return Err("wss is not supported: tokio-tungstenite is built without TLS".to_string());
    }
    let host = match url.host() {
        Some(url::Host::Ipv6(addr)) => addr.to_string(),
        Some(host) => host.to_string(),
        None => "localhost".to_string(),
    };
    let port = url.port_or_known_default().unwrap_or(80);

    log::info!("[WebSocket {}] Connecting TCP to {}:{}", id, host, port);
    let tcp_stream = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| format!("TCP connection failed: {}", e))?;

    log::info!("[WebSocket {}] Performing WebSocket handshake", id);
    let (stream, response) = tokio_tungstenite::client_async(request, MaybeTlsStream::Plain(tcp_stream))
        .await
        .map_err(|e| format!("Handshake failed: {}", e))?;

    log::info!(
        "[WebSocket {}] Connected successfully (status: {})",
        id,
        response.status()
    );
    Ok((stream, response))
}

/// Shuttle frames until either side ends the connection.
async fn pump(mut connection: Connection, stream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
    let id = connection.id;
    let client = connection.client.clone();
    let (mut write, mut read) = stream.split();

    let mut close_sent = false;
    let mut close_received: Option<(u16, String)> = None;

    loop {
        tokio::select! {
            command = connection.outbound.recv(), if !close_sent => match command {
                Some(Outbound::Message(payload)) => {
                    let len = payload.len() as u64;
                    if close_received.is_some() {
                        // tungstenite rejects writes once the peer has closed
                        connection.buffered.fetch_sub(len, Ordering::SeqCst);
                        log::debug!("[WebSocket {}] Dropping {} bytes queued after peer close", id, len);
                        continue;
                    }
                    let result = write.send(into_message(payload)).await;
                    connection.buffered.fetch_sub(len, Ordering::SeqCst);
                    if let Err(e) = result {
                        log::error!("[WebSocket {}] Send error: {}", id, e);
                        fail(&client, id, format!("Send error: {}", e));
                        return;
                    }
                }
                Some(Outbound::Close { .. }) if close_received.is_some() => {
                    // The reply to the peer's close is already queued.
                    close_sent = true;
                }
                Some(Outbound::Close { code, reason }) => {
                    log::info!("[WebSocket {}] Closing ({:?} {})", id, code, reason);
                    if let Err(e) = write.send(Message::Close(close_frame(code, reason))).await {
                        fail(&client, id, format!("Close error: {}", e));
                        return;
                    }
                    close_sent = true;
                }
                Some(Outbound::Abort) => {
                    abort(&client, id);
                    return;
                }
                None if close_received.is_some() => close_sent = true,
                None => {
                    log::info!("[WebSocket {}] Socket dropped, going away", id);
                    let frame = CloseFrame {
                        code: CloseCode::Away,
                        reason: "".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    close_sent = true;
                }
            },
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    log::debug!("[WebSocket {}] Received text ({} bytes)", id, text.len());
                    client.signal(id, SocketSignal::Received(Payload::Text(text.as_str().to_string())));
                }
                Some(Ok(Message::Binary(data))) => {
                    log::debug!("[WebSocket {}] Received binary ({} bytes)", id, data.len());
                    client.signal(id, SocketSignal::Received(Payload::Binary(data)));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    log::info!("[WebSocket {}] Received close: {} {}", id, code, reason);
                    if !close_sent {
                        client.signal(id, SocketSignal::Closing);
                    }
                    close_received = Some((code, reason));
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if close_received.is_some() {
                        break;
                    }
                    log::error!("[WebSocket {}] Read error: {}", id, e);
                    fail(&client, id, e.to_string());
                    return;
                }
                None => break,
            },
        }
    }

    let signal = match close_received {
        Some((code, reason)) => SocketSignal::Closed {
            code,
            reason,
            was_clean: true,
        },
        None => SocketSignal::Closed {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
            was_clean: false,
        },
    };
    client.signal(id, signal);
}

/// A reason without a code goes out as a normal closure, as browsers do.
fn close_frame(code: Option<u16>, reason: String) -> Option<CloseFrame> {
    let code = match code {
        Some(code) => code,
        None if reason.is_empty() => return None,
        None => u16::from(CloseCode::Normal),
    };
    Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.into(),
    })
}

fn into_message(payload: Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text.into()),
        Payload::Binary(bytes) => Message::Binary(bytes),
    }
}

fn header(response: &Response, name: &str) -> String {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Report a transport failure: an error, then an abnormal close.
fn fail(client: &LoopClient, id: SocketId, message: String) {
    log::error!("[WebSocket {}] {}", id, message);
    client.signal(id, SocketSignal::Failed { message });
    abort(client, id);
}

fn abort(client: &LoopClient, id: SocketId) {
    client.signal(
        id,
        SocketSignal::Closed {
            code: ABNORMAL_CLOSURE,
            reason: String::new(),
            was_clean: false,
        },
    );
}
