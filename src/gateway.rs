//! Gateway socket lifecycle.
//!
//! DESIGN
//! ======
//! `connect()` resolves the socket URL through `GET /gateway/bot`, opens the
//! first socket in the caller's task (so a bad URL or refused connection is
//! returned to the caller), then hands the socket to a driver task. The
//! driver owns the socket exclusively and runs one `select!` loop over:
//!
//! - the closed signal (`watch<bool>`), set by `close()`;
//! - the control channel, fed by `reconnect()` and by observers through
//!   [`GatewayLink::request_reconnect`];
//! - the outbound queue, fed by `send()` and by observers;
//! - inbound frames, fanned out to internal observers (sequence tracker,
//!   heartbeat monitor, session negotiator) and then to application
//!   observers in registration order.
//!
//! The outbound queue of the first socket is attached before `connect()`
//! returns; reopened sockets get a fresh queue from the driver.
//!
//! RECONNECT
//! =========
//! A reconnect request, a server close, or a read/write error drops the
//! socket. The outbound queue is detached first, so `send()` fails fast with
//! [`Error::NotConnected`] until a new socket is attached. The heartbeat
//! schedule is stopped, the driver waits `reconnect_delay` and reopens the
//! same URL, retrying until it succeeds or `close()` is called. Nothing about
//! a reconnect is surfaced to callers beyond logs.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use frames::GatewayFrame;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Error;
use crate::heartbeat::HeartbeatMonitor;
use crate::observer::{FrameObserver, GatewayLink, fan_out};
use crate::rest::RestClient;
use crate::sequence::SequenceTracker;
use crate::session::SessionNegotiator;

const GATEWAY_BOT_PATH: &str = "/gateway/bot";
const GATEWAY_VERSION: u8 = 6;
const CLOSE_REASON: &str = "Closed.";
/// Close code sent when dropping a socket in order to reconnect.
const RECONNECT_CLOSE_CODE: u16 = 4000;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Outbound = mpsc::UnboundedReceiver<Message>;

// =============================================================================
// LINK
// =============================================================================

#[derive(Debug)]
enum Control {
    Reconnect,
}

/// Command surface shared by the connection and its observers.
struct GatewayHandle {
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    control: mpsc::UnboundedSender<Control>,
}

impl GatewayHandle {
    fn attach(&self, outbound: mpsc::UnboundedSender<Message>) {
        *self.outbound.lock().unwrap_or_else(PoisonError::into_inner) = Some(outbound);
    }

    fn detach(&self) {
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn send_message(&self, message: Message) -> Result<(), Error> {
        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref() {
            Some(tx) => tx.send(message).map_err(|_| Error::NotConnected),
            None => Err(Error::NotConnected),
        }
    }
}

impl GatewayLink for GatewayHandle {
    fn send_frame(&self, frame: &GatewayFrame) -> Result<(), Error> {
        self.send_message(Message::Text(frames::encode_frame(frame).into()))
    }

    fn request_reconnect(&self) {
        let _ = self.control.send(Control::Reconnect);
    }
}

// =============================================================================
// CONNECTION
// =============================================================================

#[derive(Debug, Deserialize)]
struct Discovery {
    url: Option<String>,
    shards: Option<u32>,
}

#[derive(Clone, Debug)]
struct Endpoint {
    url: String,
    shards: Option<u32>,
}

enum Exit {
    Closed,
    Reconnect,
}

struct Shared {
    config: Arc<Config>,
    rest: RestClient,
    handle: Arc<GatewayHandle>,
    sequence: SequenceTracker,
    heartbeat: HeartbeatMonitor,
    internal: Vec<Arc<dyn FrameObserver>>,
    observers: RwLock<Vec<Arc<dyn FrameObserver>>>,
    endpoint: Mutex<Option<Endpoint>>,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<Control>>>,
    closed: watch::Sender<bool>,
    running: watch::Sender<bool>,
}

/// One gateway session: a socket plus the heartbeat and handshake logic
/// keeping it alive. Cloning shares the same connection.
#[derive(Clone)]
pub struct GatewayConnection {
    shared: Arc<Shared>,
}

impl GatewayConnection {
    #[must_use]
    pub fn new(config: Arc<Config>, rest: RestClient) -> Self {
        let (control, control_rx) = mpsc::unbounded_channel();
        let handle = Arc::new(GatewayHandle {
            outbound: Mutex::new(None),
            control,
        });
        let link: Arc<dyn GatewayLink> = handle.clone();

        let sequence = SequenceTracker::new();
        let heartbeat = HeartbeatMonitor::new(Arc::clone(&link), sequence.clone());
        let session = SessionNegotiator::new(link, Arc::clone(&config));
        let internal: Vec<Arc<dyn FrameObserver>> = vec![
            Arc::new(sequence.clone()),
            Arc::new(heartbeat.clone()),
            Arc::new(session),
        ];

        Self {
            shared: Arc::new(Shared {
                config,
                rest,
                handle,
                sequence,
                heartbeat,
                internal,
                observers: RwLock::new(Vec::new()),
                endpoint: Mutex::new(None),
                control_rx: Mutex::new(Some(control_rx)),
                closed: watch::Sender::new(false),
                running: watch::Sender::new(false),
            }),
        }
    }

    /// Register an application observer. Observers see every inbound frame,
    /// after the connection's own bookkeeping, in registration order.
    pub fn add_observer(&self, observer: Arc<dyn FrameObserver>) {
        self.shared
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Discover the gateway URL, open the socket and start the driver task.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if `close()` was already called.
    /// - [`Error::AlreadyConnected`] if a driver is already running.
    /// - Discovery errors: REST errors, [`Error::MalformedBody`], or
    ///   [`Error::ProtocolViolation`] when the response has no `url`.
    /// - [`Error::WebSocket`] if the first socket cannot be opened.
    ///
    /// After a failure `connect()` may be called again.
    pub async fn connect(&self) -> Result<(), Error> {
        let already_closed = *self.shared.closed.borrow();
        if already_closed {
            return Err(Error::Closed);
        }
        let mut control = self
            .shared
            .control_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(Error::AlreadyConnected)?;

        match self.shared.open_first().await {
            Ok(socket) => {
                // `send()` must succeed as soon as `connect()` resolves.
                let outbound = self.shared.attach(&mut control);
                self.shared.running.send_replace(true);
                tokio::spawn(drive(Arc::clone(&self.shared), socket, outbound, control));
                Ok(())
            }
            Err(e) => {
                *self
                    .shared
                    .control_rx
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(control);
                Err(e)
            }
        }
    }

    /// Queue a frame on the open socket.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] while no socket is attached, including
    /// during a reconnect.
    pub fn send(&self, frame: &GatewayFrame) -> Result<(), Error> {
        self.shared.handle.send_frame(frame)
    }

    /// Queue raw text on the open socket.
    ///
    /// # Errors
    ///
    /// As [`GatewayConnection::send`].
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), Error> {
        let text: String = text.into();
        self.shared.handle.send_message(Message::Text(text.into()))
    }

    /// Drop the current socket and open a new one.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] if `connect()` has not succeeded or the
    /// connection is closed.
    pub fn reconnect(&self) -> Result<(), Error> {
        if !*self.shared.running.borrow() {
            return Err(Error::NotConnected);
        }
        self.shared.handle.request_reconnect();
        Ok(())
    }

    /// Close the connection for good. Idempotent; safe before `connect()`.
    pub fn close(&self) {
        if self.shared.closed.send_replace(true) {
            return;
        }
        info!("gateway: close requested");
        self.shared.heartbeat.stop();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// Resolves once `close()` has been called and the driver has sent its
    /// close frame.
    pub async fn wait_closed(&self) {
        let mut closed = self.shared.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
        let mut running = self.shared.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }

    /// Recommended shard count from the last discovery call.
    #[must_use]
    pub fn discovered_shards(&self) -> Option<u32> {
        self.shared.endpoint().and_then(|endpoint| endpoint.shards)
    }

    /// Last dispatch sequence number seen on the current socket.
    #[must_use]
    pub fn last_sequence(&self) -> Option<u64> {
        self.shared.sequence.last_seen()
    }
}

impl Shared {
    fn endpoint(&self) -> Option<Endpoint> {
        self.endpoint
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn discover(&self) -> Result<Endpoint, Error> {
        let body = self.rest.get(GATEWAY_BOT_PATH).await?;
        let discovery: Discovery = serde_json::from_str(&body)?;
        let url = discovery
            .url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                Error::ProtocolViolation("gateway discovery response has no url".into())
            })?;

        Ok(Endpoint {
            url: format!(
                "{}/?v={GATEWAY_VERSION}&encoding=json",
                url.trim_end_matches('/')
            ),
            shards: discovery.shards,
        })
    }

    async fn open_first(&self) -> Result<Socket, Error> {
        let endpoint = self.discover().await?;
        info!(url = %endpoint.url, shards = ?endpoint.shards, "gateway: discovered");
        *self.endpoint.lock().unwrap_or_else(PoisonError::into_inner) = Some(endpoint.clone());
        open(&endpoint.url).await
    }

    /// Reopen after `reconnect_delay`, retrying until success or close.
    async fn reopen(&self, closed: &mut watch::Receiver<bool>) -> Option<Socket> {
        let url = self.endpoint()?.url;
        loop {
            tokio::select! {
                () = wait_for_close(closed) => return None,
                () = tokio::time::sleep(self.config.reconnect_delay()) => {}
            }
            match open(&url).await {
                Ok(socket) => return Some(socket),
                Err(e) => warn!(error = %e, "gateway: reconnect failed, retrying"),
            }
        }
    }

    /// Start a fresh outbound queue for a newly opened socket.
    fn attach(&self, control: &mut mpsc::UnboundedReceiver<Control>) -> Outbound {
        let (outbound_tx, outbound) = mpsc::unbounded_channel();

        // Requests queued against the previous socket are already satisfied.
        while control.try_recv().is_ok() {}
        self.sequence.reset();
        self.handle.attach(outbound_tx);
        outbound
    }

    async fn serve(
        &self,
        socket: Socket,
        mut outbound: Outbound,
        control: &mut mpsc::UnboundedReceiver<Control>,
        closed: &mut watch::Receiver<bool>,
    ) -> Exit {
        let (mut sink, mut stream) = socket.split();

        let exit = loop {
            tokio::select! {
                () = wait_for_close(closed) => {
                    let _ = sink.send(close_message(CloseCode::Normal, CLOSE_REASON)).await;
                    break Exit::Closed;
                }
                Some(Control::Reconnect) = control.recv() => {
                    info!("gateway: reconnect requested");
                    let code = CloseCode::from(RECONNECT_CLOSE_CODE);
                    let _ = sink.send(close_message(code, "Reconnecting.")).await;
                    break Exit::Reconnect;
                }
                Some(message) = outbound.recv() => {
                    if let Err(e) = sink.send(message).await {
                        warn!(error = %e, "gateway: write failed");
                        break Exit::Reconnect;
                    }
                }
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => self.dispatch(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "gateway: server closed socket");
                        break Exit::Reconnect;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "gateway: read failed");
                        break Exit::Reconnect;
                    }
                    None => {
                        warn!("gateway: socket ended");
                        break Exit::Reconnect;
                    }
                },
            }
        };

        self.handle.detach();
        self.heartbeat.stop();
        exit
    }

    fn dispatch(&self, text: &str) {
        let frame = match frames::decode_frame(text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "gateway: dropping undecodable frame");
                return;
            }
        };
        debug!(op = frame.op, s = ?frame.s, t = ?frame.t, "gateway: frame received");

        fan_out(&self.internal, &frame);
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        fan_out(&observers, &frame);
    }
}

/// Clears `running` when the driver exits, however it exits.
struct RunningGuard(Arc<Shared>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.running.send_replace(false);
    }
}

async fn drive(
    shared: Arc<Shared>,
    socket: Socket,
    outbound: Outbound,
    mut control: mpsc::UnboundedReceiver<Control>,
) {
    let _running = RunningGuard(Arc::clone(&shared));
    let mut closed = shared.closed.subscribe();
    let mut next = Some((socket, outbound));

    loop {
        let (socket, outbound) = match next.take() {
            Some(attached) => attached,
            None => match shared.reopen(&mut closed).await {
                Some(socket) => {
                    info!("gateway: reconnected");
                    (socket, shared.attach(&mut control))
                }
                None => break,
            },
        };
        match shared.serve(socket, outbound, &mut control, &mut closed).await {
            Exit::Closed => break,
            Exit::Reconnect => info!(
                delay_ms = shared.config.reconnect_delay().as_millis(),
                "gateway: socket dropped, reconnecting"
            ),
        }
    }
    info!("gateway: connection closed");
}

async fn open(url: &str) -> Result<Socket, Error> {
    let (socket, response) = connect_async(url).await?;
    debug!(status = %response.status(), "gateway: socket open");
    Ok(socket)
}

async fn wait_for_close(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|closed| *closed).await;
}

fn close_message(code: CloseCode, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}

#[cfg(test)]
#[path = "gateway_test.rs"]
mod tests;
