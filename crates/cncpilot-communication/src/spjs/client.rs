//! SPJS transport client.
//!
//! One multiplexed WebSocket session per client: a reader task
//! demultiplexes inbound frames to port bindings and the correlation
//! registry, periodic tasks poll the port list and re-dial a dropped
//! socket, and writers share the sink behind a mutex so at most one
//! reconnect is ever in flight.

use super::port::PortBinding;
use super::registry::{CommandId, Registry};
use super::wire::{InboundFrame, SerialPort, SerialPortMatcher};
use crate::firmware::Driver;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use cncpilot_core::{Error, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// How often to refresh the serial-port list.
const LIST_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// How often to check that the socket is still there.
const RECONNECT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

struct Conn {
    sink: WsSink,
    generation: u64,
}

pub(crate) struct ClientInner {
    weak: Weak<ClientInner>,
    url: String,
    base_id: String,
    sequence: AtomicU32,
    generation: AtomicU64,
    pub(crate) registry: Registry,
    /// The socket. A tokio mutex: held across the dial during reconnect,
    /// which serialises writers onto at most one reconnect.
    conn: tokio::sync::Mutex<Option<Conn>>,
    /// Latest port-list snapshot; cleared when the socket drops.
    pub(crate) serial_ports: Mutex<Vec<SerialPort>>,
    bindings: RwLock<Vec<Arc<PortBinding>>>,
}

/// Client for one SPJS endpoint. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a client and start its periodic tasks. Connection is
    /// established lazily by the first write or the health check.
    pub fn new(url: impl Into<String>) -> Self {
        let inner = Arc::new_cyclic(|weak| ClientInner {
            weak: weak.clone(),
            url: url.into(),
            base_id: BASE64.encode(rand::random::<[u8; 8]>()),
            sequence: AtomicU32::new(0),
            generation: AtomicU64::new(0),
            registry: Registry::default(),
            conn: tokio::sync::Mutex::new(None),
            serial_ports: Mutex::new(Vec::new()),
            bindings: RwLock::new(Vec::new()),
        });

        // periodic port list refresh
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(LIST_POLL_INTERVAL);
            loop {
                tick.tick().await;
                let Some(client) = weak.upgrade() else { return };
                if let Err(err) = client.write_frame("list").await {
                    warn!(%err, "port list poll");
                }
            }
        });

        // connection health check
        let weak = Arc::downgrade(&inner);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(RECONNECT_CHECK_INTERVAL);
            loop {
                tick.tick().await;
                let Some(client) = weak.upgrade() else { return };
                let mut guard = client.conn.lock().await;
                if guard.is_none() {
                    if let Err(err) = client.reconnect(&mut guard).await {
                        warn!(%err, "reconnect");
                    }
                }
            }
        });

        Self { inner }
    }

    /// Register a logical device: `matcher` claims its serial port from
    /// each port-list snapshot, `driver` receives its inbound data. The
    /// binding (and its send worker) lives for the client's lifetime.
    pub fn register_driver(
        &self,
        matcher: SerialPortMatcher,
        driver: Arc<dyn Driver>,
    ) -> Arc<PortBinding> {
        let binding = PortBinding::spawn(Arc::downgrade(&self.inner), matcher, driver);
        self.inner.bindings.write().push(binding.clone());
        info!(driver = binding.driver().name(), "registered driver");

        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(err) = inner.write_frame("list").await {
                warn!(%err, "port list refresh after driver registration");
            }
        });
        binding
    }

    /// The random base ID distinguishing this process's correlation IDs.
    pub fn base_id(&self) -> &str {
        &self.inner.base_id
    }
}

impl ClientInner {
    pub(crate) fn next_id(&self, port: String) -> CommandId {
        CommandId {
            port,
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }

    pub(crate) fn wire_id(&self, id: &CommandId) -> String {
        format!("{}-{}", self.base_id, id.sequence)
    }

    /// Sequence number of a wire ID, or `None` for foreign IDs.
    fn parse_wire_id(&self, id: &str) -> Option<u32> {
        id.strip_prefix(self.base_id.as_str())?
            .strip_prefix('-')?
            .parse()
            .ok()
    }

    /// Write one text frame, dialing first if there is no socket. A write
    /// failure reconnects and retries once; the second failure is the
    /// caller's.
    pub(crate) async fn write_frame(&self, frame: &str) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if guard.is_none() {
            self.reconnect(&mut guard).await?;
        }
        debug!(frame, "WRITE");

        let Some(conn) = guard.as_mut() else {
            return Err(Error::NetworkReset);
        };
        let Err(err) = conn.sink.send(Message::text(frame)).await else {
            return Ok(());
        };

        warn!(%err, "write to SPJS failed, reconnecting");
        self.reconnect(&mut guard).await?;
        let Some(conn) = guard.as_mut() else {
            return Err(Error::NetworkReset);
        };
        conn.sink
            .send(Message::text(frame))
            .await
            .map_err(|err| Error::Transport(format!("write SPJS: {err}")))
    }

    /// Tear down any existing connection state and dial again. Must be
    /// called with the connection lock held.
    async fn reconnect(&self, guard: &mut Option<Conn>) -> Result<()> {
        if guard.take().is_some() {
            self.drop_connection_state();
        }

        info!(url = %self.url, "connecting to SPJS");
        let (ws, _) = connect_async(self.url.as_str())
            .await
            .map_err(|err| Error::Transport(format!("dial SPJS: {err}")))?;
        let (mut sink, source) = ws.split();

        sink.send(Message::text("list"))
            .await
            .map_err(|err| Error::Transport(format!("write SPJS (list): {err}")))?;

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        *guard = Some(Conn { sink, generation });
        tokio::spawn(read_loop(self.weak.clone(), source, generation));
        Ok(())
    }

    /// Socket is gone: ports report not-connected and every in-flight
    /// command resolves with `NetworkReset`, exactly once.
    fn drop_connection_state(&self) {
        self.serial_ports.lock().clear();
        self.registry.resolve_all(Error::NetworkReset);
    }

    /// Demultiplex one inbound text frame.
    async fn handle_frame(&self, text: &str) {
        // Non-JSON control lines are not for us.
        if !text.trim_start().starts_with('{') {
            return;
        }
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%err, frame = text, "parse SPJS payload");
                return;
            }
        };

        if let Some(ports) = frame.serial_ports {
            self.update_ports(ports).await;
            return;
        }

        // Raw serial data: route to the driver bound to the source port.
        if !frame.port.is_empty() && frame.cmd.is_empty() && !frame.data.is_empty() {
            let Some(binding) = self.binding_for_port(&frame.port) else {
                return;
            };
            if let Err(err) = binding.driver().handle_data(&frame.data).await {
                warn!(
                    %err,
                    driver = binding.driver().name(),
                    data = %frame.data,
                    "handle serial data"
                );
            }
            return;
        }

        match frame.cmd.as_str() {
            "Open" => {
                if let Err(err) = self.write_frame("list").await {
                    warn!(%err, "port list refresh after open");
                }
            }
            "Write" => {
                if let Some(sequence) = self.parse_wire_id(&frame.id) {
                    self.registry.resolve_write(sequence);
                }
            }
            "Complete" => {
                if let Some(sequence) = self.parse_wire_id(&frame.id) {
                    self.registry.resolve_done(sequence, Ok(()));
                }
            }
            "Error" => {
                if let Some(sequence) = self.parse_wire_id(&frame.id) {
                    self.registry
                        .resolve_done(sequence, Err(Error::Device(frame.error_code)));
                }
            }
            "WipedQueue" | "Close" => {
                self.registry.resolve_port(&frame.queue_port, Error::PortReset);
            }
            _ => {}
        }
    }

    /// Replace the port snapshot and auto-open unopened ports that some
    /// binding claims, in the order SPJS listed them.
    async fn update_ports(&self, ports: Vec<SerialPort>) {
        *self.serial_ports.lock() = ports.clone();

        let bindings: Vec<Arc<PortBinding>> = self.bindings.read().clone();
        for port in ports.iter().filter(|port| !port.is_open) {
            if let Some(binding) = bindings.iter().find(|binding| binding.matches(port)) {
                if let Err(err) = binding.open(&port.name).await {
                    warn!(%err, port = %port.name, "auto-open port");
                }
            }
        }
    }

    fn binding_for_port(&self, port: &str) -> Option<Arc<PortBinding>> {
        self.bindings
            .read()
            .iter()
            .find(|binding| {
                binding
                    .current_name()
                    .is_some_and(|(name, _)| name == port)
            })
            .cloned()
    }
}

/// Reader task for one connection generation. On stream end the owning
/// generation clears the socket so the health check re-dials; a stale
/// generation (already replaced under the lock) touches nothing.
fn read_loop(
    weak: Weak<ClientInner>,
    mut source: WsSource,
    generation: u64,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        loop {
            match source.next().await {
                Some(Ok(Message::Text(text))) => {
                    let Some(client) = weak.upgrade() else { return };
                    debug!(frame = %text, "READ");
                    client.handle_frame(&text).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    warn!(%err, "read SPJS");
                    break;
                }
                Some(Ok(_)) => {}
            }
        }

        let Some(client) = weak.upgrade() else { return };
        let mut guard = client.conn.lock().await;
        if guard
            .as_ref()
            .is_some_and(|conn| conn.generation == generation)
        {
            *guard = None;
            client.drop_connection_state();
        }
    })
}
