use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use ws_shim::{
    BinaryType, ConnectorConfig, EventEmitter, EventLoop, MessageData, Protocols, ReadyState,
    SendOptions, SocketEvent, SocketFacade, TungsteniteConnector, events,
};

const WAIT: Duration = Duration::from_secs(5);

/// Echoes text and binary frames and picks the last requested subprotocol.
/// Answers `"bye"` with a close 4000 of its own. Answers `"linger"` with the
/// same close frame, then holds the connection open for a while before
/// dropping it. Close codes sent by clients are recorded.
struct EchoServer {
    addr: SocketAddr,
    closes: Arc<Mutex<Vec<Option<u16>>>>,
    _runtime: Runtime,
}

const LINGER: Duration = Duration::from_millis(800);

fn server_close() -> CloseFrame {
    CloseFrame {
        code: 4000.into(),
        reason: "server".into(),
    }
}

impl EchoServer {
    fn start() -> Self {
        let runtime = Runtime::new().unwrap();
        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let addr = listener.local_addr().unwrap();
        let closes: Arc<Mutex<Vec<Option<u16>>>> = Arc::default();
        let recorded = closes.clone();

        runtime.spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                let closes = recorded.clone();
                tokio::spawn(async move {
                    let pick_protocol = |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
                        let chosen = req
                            .headers()
                            .get("sec-websocket-protocol")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.split(',').map(str::trim).last().map(str::to_string));
                        if let Some(chosen) = chosen {
                            resp.headers_mut()
                                .insert("sec-websocket-protocol", HeaderValue::from_str(&chosen).unwrap());
                        }
                        Ok(resp)
                    };
                    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, pick_protocol).await else {
                        return;
                    };

                    while let Some(Ok(message)) = ws.next().await {
                        if let Message::Close(frame) = &message {
                            closes.lock().unwrap().push(frame.as_ref().map(|f| u16::from(f.code)));
                        } else if matches!(&message, Message::Text(text) if text.as_str() == "bye") {
                            let _ = ws.close(Some(server_close())).await;
                        } else if matches!(&message, Message::Text(text) if text.as_str() == "linger") {
                            let _ = ws.send(Message::Close(Some(server_close()))).await;
                            tokio::time::sleep(LINGER).await;
                            break;
                        } else if (message.is_text() || message.is_binary()) && ws.send(message).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        Self {
            addr,
            closes,
            _runtime: runtime,
        }
    }

    /// Wait until a client close frame has been recorded.
    fn wait_for_close(&self, timeout: Duration) -> Option<Option<u16>> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(code) = self.closes.lock().unwrap().first().copied() {
                return Some(code);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }
}

type Journal = Rc<RefCell<Vec<(String, SocketEvent)>>>;

/// Record every lifecycle event in order.
fn record(ws: &SocketFacade) -> Journal {
    let journal: Journal = Rc::new(RefCell::new(Vec::new()));
    for name in [events::OPEN, events::MESSAGE, events::ERROR, events::CLOSE] {
        let journal = journal.clone();
        ws.on(name, move |event: &SocketEvent| {
            journal.borrow_mut().push((name.to_string(), event.clone()));
        });
    }
    journal
}

fn names(journal: &Journal) -> Vec<String> {
    journal.borrow().iter().map(|(name, _)| name.clone()).collect()
}

fn has(journal: &Journal, name: &str) -> bool {
    journal.borrow().iter().any(|(n, _)| n == name)
}

fn count(journal: &Journal, name: &str) -> usize {
    journal.borrow().iter().filter(|(n, _)| n == name).count()
}

fn unused_port() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

#[test]
fn echo_round_trip_opens_once_and_closes_with_the_requested_code() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let ws = SocketFacade::create(&connector, &server.url(), None, Protocols::none()).unwrap();
    assert_eq!(ws.ready_state(), ReadyState::Connecting);
    assert_eq!(ws.url(), format!("{}/", server.url()));
    let journal = record(&ws);

    assert!(event_loop.run_until(WAIT, || has(&journal, "open")));
    assert_eq!(ws.ready_state(), ReadyState::Open);

    ws.send("ping");
    assert!(event_loop.run_until(WAIT, || has(&journal, "message")));
    assert_eq!(
        journal.borrow()[1].1,
        SocketEvent::Message(MessageData::Text("ping".into()))
    );

    ws.close(Some(1000), Some("done")).unwrap();
    assert_eq!(ws.ready_state(), ReadyState::Closing);
    assert!(event_loop.run_until(WAIT, || has(&journal, "close")));

    assert_eq!(names(&journal), vec!["open", "message", "close"]);
    let close = journal.borrow()[2].1.as_close().cloned().unwrap();
    assert_eq!(close.code, 1000);
    assert_eq!(close.reason, "done");
    assert!(close.was_clean);
    assert_eq!(ws.ready_state(), ReadyState::Closed);
}

#[test]
fn refused_connection_reports_an_error_then_an_unclean_close() {
    let addr = unused_port();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let ws = SocketFacade::create(&connector, &format!("ws://{}", addr), None, Protocols::none()).unwrap();
    let journal = record(&ws);

    assert!(event_loop.run_until(WAIT, || has(&journal, "close")));

    assert_eq!(names(&journal), vec!["error", "close"]);
    let close = journal.borrow()[1].1.as_close().cloned().unwrap();
    assert!(!close.was_clean);
    assert_eq!(close.code, 1006);
    assert_eq!(ws.ready_state(), ReadyState::Closed);
}

#[test]
fn close_before_open_yields_a_single_close_and_no_open() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let ws = SocketFacade::create(&connector, &server.url(), None, Protocols::none()).unwrap();
    let journal = record(&ws);
    ws.close(None, None).unwrap();

    assert!(event_loop.run_until(WAIT, || has(&journal, "close")));
    // Give a late handshake the chance to show up.
    event_loop.run_until(Duration::from_millis(200), || false);

    assert!(!has(&journal, "open"));
    assert_eq!(count(&journal, "close"), 1);
    assert_eq!(ws.ready_state(), ReadyState::Closed);
}

#[test]
fn onmessage_runs_before_listeners_on_a_live_socket() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let ws = SocketFacade::create(&connector, &server.url(), None, Protocols::none()).unwrap();
    let order: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));

    let o = order.clone();
    ws.set_onmessage(Some(move |data: &MessageData| {
        o.borrow_mut().push(format!("slot:{}", data.as_text().unwrap_or_default()));
    }));
    let o = order.clone();
    ws.on(events::MESSAGE, move |event: &SocketEvent| {
        let text = event.as_message().and_then(MessageData::as_text).unwrap_or_default();
        o.borrow_mut().push(format!("listener:{}", text));
    });

    assert!(event_loop.run_until(WAIT, || ws.ready_state() == ReadyState::Open));
    ws.send("one");
    ws.send("two");
    assert!(event_loop.run_until(WAIT, || order.borrow().len() == 4));

    assert_eq!(
        *order.borrow(),
        vec!["slot:one", "listener:one", "slot:two", "listener:two"]
    );
}

#[test]
fn send_while_connecting_is_contained() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let ws = SocketFacade::create(&connector, &server.url(), None, Protocols::none()).unwrap();
    let sent = Rc::new(std::cell::Cell::new(false));
    let s = sent.clone();
    ws.send_with("too early", SendOptions::default(), move || s.set(true));

    assert!(!sent.get());
    assert_eq!(ws.buffered_amount(), 0);

    let journal = record(&ws);
    assert!(event_loop.run_until(WAIT, || has(&journal, "open")));
    event_loop.run_until(Duration::from_millis(100), || false);
    assert!(!has(&journal, "message"));
}

#[test]
fn subprotocol_is_negotiated() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let ws = SocketFacade::create(&connector, &server.url(), None, ["chat", "superchat"]).unwrap();
    assert_eq!(ws.protocol(), "");

    assert!(event_loop.run_until(WAIT, || ws.ready_state() == ReadyState::Open));
    assert_eq!(ws.protocol(), "superchat");
    assert_eq!(ws.extensions(), "");
}

#[test]
fn binary_payloads_follow_binary_type() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let ws = SocketFacade::create(&connector, &server.url(), None, Protocols::none()).unwrap();
    let journal = record(&ws);
    assert!(event_loop.run_until(WAIT, || has(&journal, "open")));

    ws.send(vec![1u8, 2, 3]);
    assert!(event_loop.run_until(WAIT, || count(&journal, "message") == 1));

    ws.set_binary_type(BinaryType::ArrayBuffer);
    ws.send(vec![4u8, 5]);
    assert!(event_loop.run_until(WAIT, || count(&journal, "message") == 2));

    let messages: Vec<MessageData> = journal
        .borrow()
        .iter()
        .filter_map(|(_, event)| event.as_message().cloned())
        .collect();
    assert_eq!(
        messages,
        vec![
            MessageData::Blob(vec![1u8, 2, 3].into()),
            MessageData::ArrayBuffer(vec![4, 5]),
        ]
    );
}

#[test]
fn server_initiated_close_is_reported_with_its_code() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let ws = SocketFacade::create(&connector, &server.url(), None, Protocols::none()).unwrap();
    let journal = record(&ws);
    assert!(event_loop.run_until(WAIT, || has(&journal, "open")));

    ws.send("bye");
    assert!(event_loop.run_until(WAIT, || has(&journal, "close")));

    let close = journal.borrow().last().and_then(|(_, e)| e.as_close().cloned()).unwrap();
    assert_eq!(close.code, 4000);
    assert_eq!(close.reason, "server");
    assert!(close.was_clean);
}

#[test]
fn buffered_amount_drains_and_ready_state_only_moves_forward() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let ws = Rc::new(SocketFacade::create(&connector, &server.url(), None, Protocols::none()).unwrap());
    let states: Rc<RefCell<Vec<ReadyState>>> = Rc::new(RefCell::new(vec![ws.ready_state()]));
    for name in [events::OPEN, events::MESSAGE, events::CLOSE] {
        let (states, weak) = (states.clone(), Rc::downgrade(&ws));
        ws.on(name, move |_: &SocketEvent| {
            if let Some(ws) = weak.upgrade() {
                states.borrow_mut().push(ws.ready_state());
            }
        });
    }

    assert!(event_loop.run_until(WAIT, || ws.ready_state() == ReadyState::Open));
    for n in 0..10 {
        ws.send(serde_json::json!({ "n": n }));
    }
    assert!(event_loop.run_until(WAIT, || states.borrow().len() == 12));
    assert_eq!(ws.buffered_amount(), 0);

    ws.close(Some(1000), None).unwrap();
    assert!(event_loop.run_until(WAIT, || ws.ready_state() == ReadyState::Closed));

    let states = states.borrow();
    assert!(states.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(states.first(), Some(&ReadyState::Connecting));
    assert_eq!(states.last(), Some(&ReadyState::Closed));
}

#[test]
fn run_returns_once_every_socket_has_closed() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let config = ConnectorConfig::new()
        .with_origin("http://localhost")
        .with_header("x-client", "ws-shim");
    let connector = TungsteniteConnector::with_config(&event_loop, config);

    let ws = Rc::new(SocketFacade::create(&connector, &server.url(), None, Protocols::none()).unwrap());
    let weak = Rc::downgrade(&ws);
    ws.set_onopen(Some(move |_: &ws_shim::OpenEvent| {
        if let Some(ws) = weak.upgrade() {
            ws.close(Some(1000), Some("done")).unwrap();
        }
    }));

    event_loop.run();
    assert_eq!(ws.ready_state(), ReadyState::Closed);
}

#[test]
fn invalid_addresses_fail_at_construction() {
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    assert!(SocketFacade::create(&connector, "not a url", None, Protocols::none()).is_err());
    assert!(SocketFacade::create(&connector, "ftp://example.com", None, Protocols::none()).is_err());
    assert!(SocketFacade::create(&connector, "ws://example.com", None, "bad protocol").is_err());
}

#[test]
fn send_after_the_peer_closed_keeps_the_close_clean() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let ws = SocketFacade::create(&connector, &server.url(), None, Protocols::none()).unwrap();
    let journal = record(&ws);
    assert!(event_loop.run_until(WAIT, || has(&journal, "open")));

    ws.send("linger");
    assert!(event_loop.run_until(WAIT, || ws.ready_state() == ReadyState::Closing));
    assert!(!has(&journal, "close"));

    let sent = Rc::new(std::cell::Cell::new(false));
    let s = sent.clone();
    ws.send_with("late", SendOptions::default(), move || s.set(true));
    assert!(!sent.get());
    assert_eq!(ws.buffered_amount(), 0);

    assert!(event_loop.run_until(WAIT, || has(&journal, "close")));
    assert_eq!(names(&journal), vec!["open", "close"]);
    let close = journal.borrow()[1].1.as_close().cloned().unwrap();
    assert_eq!(close.code, 4000);
    assert_eq!(close.reason, "server");
    assert!(close.was_clean);
}

#[test]
fn close_with_only_a_reason_uses_normal_closure() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let ws = SocketFacade::create(&connector, &server.url(), None, Protocols::none()).unwrap();
    let journal = record(&ws);
    assert!(event_loop.run_until(WAIT, || has(&journal, "open")));

    ws.close(None, Some("finished")).unwrap();
    assert!(event_loop.run_until(WAIT, || has(&journal, "close")));

    let close = journal.borrow()[1].1.as_close().cloned().unwrap();
    assert_eq!(close.code, 1000);
    assert_eq!(close.reason, "finished");
    assert_eq!(server.wait_for_close(WAIT), Some(Some(1000)));
}

#[test]
fn dropping_an_open_socket_sends_going_away() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let ws = SocketFacade::create(&connector, &server.url(), None, Protocols::none()).unwrap();
    let journal = record(&ws);
    assert!(event_loop.run_until(WAIT, || has(&journal, "open")));

    drop(ws);
    assert_eq!(event_loop.handle().live_sockets(), 0);
    assert_eq!(server.wait_for_close(WAIT), Some(Some(1001)));

    event_loop.run_until(Duration::from_millis(200), || false);
    assert_eq!(names(&journal), vec!["open"]);
}

#[test]
fn dropping_a_connecting_socket_aborts_without_a_close_frame() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let ws = SocketFacade::create(&connector, &server.url(), None, Protocols::none()).unwrap();
    let journal = record(&ws);
    drop(ws);
    assert_eq!(event_loop.handle().live_sockets(), 0);

    event_loop.run_until(Duration::from_millis(300), || false);
    assert!(journal.borrow().is_empty());
    assert_eq!(server.wait_for_close(Duration::from_millis(200)), None);
}

#[test]
fn secure_urls_fail_without_tls_support() {
    let server = EchoServer::start();
    let event_loop = EventLoop::new();
    let connector = TungsteniteConnector::new(&event_loop);

    let url = format!("wss://{}", server.addr);
    let ws = SocketFacade::create(&connector, &url, None, Protocols::none()).unwrap();
    let journal = record(&ws);

    assert!(event_loop.run_until(WAIT, || has(&journal, "close")));
    assert_eq!(names(&journal), vec!["error", "close"]);
    let close = journal.borrow()[1].1.as_close().cloned().unwrap();
    assert_eq!(close.code, 1006);
    assert!(!close.was_clean);
}
