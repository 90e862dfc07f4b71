//! Fakes shared by unit tests: a scripted HTTP transport, a one-shot raw
//! HTTP server, and a local gateway socket server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use frames::GatewayFrame;
use futures_util::{SinkExt, StreamExt};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::error::Error;
use crate::http::{HttpRequest, HttpResponse, HttpTransport};

// =============================================================================
// SCRIPTED TRANSPORT
// =============================================================================

pub type Scripted = Result<HttpResponse, Error>;

/// One call observed by [`ScriptedTransport`].
#[derive(Clone, Debug)]
pub struct Call {
    pub request: HttpRequest,
    pub started: Instant,
    pub finished: Instant,
}

/// Replies to requests from a queue, optionally holding each call open.
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<Call>>,
    latency: Duration,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Scripted>) -> Arc<Self> {
        Self::with_latency(replies, Duration::ZERO)
    }

    pub fn with_latency(replies: Vec<Scripted>, latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
            latency,
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait::async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, Error> {
        let started = Instant::now();
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let reply = self
            .replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Ok(response(200, &[], "")));
        self.calls.lock().expect("calls lock").push(Call {
            request: request.clone(),
            started,
            finished: Instant::now(),
        });
        reply
    }
}

pub fn response(status: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(
            HeaderName::from_bytes(name.as_bytes()).expect("header name"),
            HeaderValue::from_str(value).expect("header value"),
        );
    }
    HttpResponse {
        status: StatusCode::from_u16(status).expect("status"),
        headers: map,
        body: body.to_owned(),
    }
}

pub fn transport_error() -> Error {
    Error::from(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
}

// =============================================================================
// RAW HTTP SERVER
// =============================================================================

/// A request captured by [`serve_http_once`].
#[derive(Debug)]
pub struct RawRequest {
    pub head: String,
    pub body: String,
}

impl RawRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }
}

/// Accept one HTTP/1.1 request and answer with `raw_response`.
/// Returns the base URL and a receiver for the captured request.
pub async fn serve_http_once(raw_response: String) -> (String, mpsc::Receiver<RawRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (tx, rx) = mpsc::channel(1);

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = socket.read(&mut chunk).await.expect("read");
            assert!(n > 0, "client closed before sending headers");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = find(&buf, b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
        let request = RawRequest {
            head: head.clone(),
            body: String::new(),
        };
        let content_length = request
            .header("content-length")
            .and_then(|v| v.parse::<usize>().ok());
        let chunked = request
            .header("transfer-encoding")
            .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));

        loop {
            let body_len = buf.len() - head_end;
            let complete = match content_length {
                Some(len) => body_len >= len,
                None if chunked => find(&buf[head_end..], b"0\r\n\r\n").is_some(),
                None => true,
            };
            if complete {
                break;
            }
            let n = socket.read(&mut chunk).await.expect("read body");
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }

        let body = String::from_utf8_lossy(&buf[head_end..]).into_owned();
        socket
            .write_all(raw_response.as_bytes())
            .await
            .expect("write response");
        let _ = socket.shutdown().await;
        let _ = tx.send(RawRequest { head, body }).await;
    });

    (format!("http://{addr}"), rx)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

// =============================================================================
// GATEWAY SERVER
// =============================================================================

/// Events observed by [`GatewayServer`].
#[derive(Debug)]
pub enum ServerEvent {
    Opened(usize),
    Received(usize, String),
    Closed(usize, Option<u16>),
}

/// Local websocket server. Each accepted connection receives `on_open`
/// frames, then every client text frame is reported back.
pub struct GatewayServer {
    pub url: String,
    pub events: mpsc::UnboundedReceiver<ServerEvent>,
    pub push: mpsc::UnboundedSender<String>,
}

impl GatewayServer {
    pub async fn start(on_open: Vec<GatewayFrame>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (events_tx, events) = mpsc::unbounded_channel();
        let (push, push_rx) = mpsc::unbounded_channel::<String>();
        let push_rx = Arc::new(tokio::sync::Mutex::new(push_rx));

        tokio::spawn(async move {
            let mut index = 0;
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                let events_tx = events_tx.clone();
                let on_open = on_open.clone();
                let push_rx = Arc::clone(&push_rx);
                let id = index;
                index += 1;
                tokio::spawn(serve_connection(ws, id, on_open, events_tx, push_rx));
            }
        });

        Self {
            url: format!("ws://{addr}"),
            events,
            push,
        }
    }

    /// Next event, failing the test after `within`.
    pub async fn next_event(&mut self, within: Duration) -> ServerEvent {
        tokio::time::timeout(within, self.events.recv())
            .await
            .expect("server event timed out")
            .expect("server stopped")
    }
}

async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    id: usize,
    on_open: Vec<GatewayFrame>,
    events: mpsc::UnboundedSender<ServerEvent>,
    push_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>>,
) {
    let (mut sink, mut stream) = ws.split();
    let _ = events.send(ServerEvent::Opened(id));
    for frame in on_open {
        let _ = sink
            .send(Message::Text(frames::encode_frame(&frame).into()))
            .await;
    }
    loop {
        let mut push = push_rx.lock().await;
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(ServerEvent::Received(id, text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let _ = events.send(ServerEvent::Closed(id, frame.map(|f| u16::from(f.code))));
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => {
                    let _ = events.send(ServerEvent::Closed(id, None));
                    return;
                }
            },
            Some(text) = push.recv() => {
                let _ = sink.send(Message::Text(text.into())).await;
            }
        }
    }
}
