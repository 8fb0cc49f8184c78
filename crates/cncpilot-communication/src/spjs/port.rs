//! Per-device send pipeline.
//!
//! Each binding owns a queue drained by one worker task, so commands
//! reach SPJS in submission order. Requests may ask for batching: the
//! worker accumulates payloads and emits one `sendjson` frame per batch,
//! per port change, or per flush sentinel.

use super::client::ClientInner;
use super::registry::{CommandHandle, CommandId};
use super::wire::{SendJson, SendJsonData, SerialPort, SerialPortMatcher};
use crate::firmware::Driver;
use cncpilot_core::{Error, Result};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outbound queue depth per binding.
const SEND_QUEUE_DEPTH: usize = 256;

pub(crate) enum SendRequest {
    Command {
        id: CommandId,
        payload: String,
        batch: usize,
    },
    /// Emit whatever is pending, now.
    Flush,
}

/// A logical device: a matcher claiming its serial port, the driver
/// handling its data, and the outbound queue feeding the transport.
pub struct PortBinding {
    client: Weak<ClientInner>,
    matcher: SerialPortMatcher,
    driver: Arc<dyn Driver>,
    queue_tx: mpsc::Sender<SendRequest>,
}

impl PortBinding {
    pub(crate) fn spawn(
        client: Weak<ClientInner>,
        matcher: SerialPortMatcher,
        driver: Arc<dyn Driver>,
    ) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let binding = Arc::new(Self {
            client: client.clone(),
            matcher,
            driver,
            queue_tx,
        });
        tokio::spawn(send_worker(client, queue_rx));
        binding
    }

    /// The driver bound to this device.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub(crate) fn matches(&self, port: &SerialPort) -> bool {
        (self.matcher)(port)
    }

    /// Name and open state of the port currently claimed by the matcher,
    /// derived from the latest snapshot.
    pub fn current_name(&self) -> Option<(String, bool)> {
        let client = self.client.upgrade()?;
        let ports = client.serial_ports.lock();
        ports
            .iter()
            .find(|port| (self.matcher)(port))
            .map(|port| (port.name.clone(), port.is_open))
    }

    /// True while the matched port exists and is open.
    pub fn connected(&self) -> bool {
        matches!(self.current_name(), Some((_, true)))
    }

    /// Ask SPJS to open the port with the driver's parameters.
    pub(crate) async fn open(&self, name: &str) -> Result<()> {
        let client = self.client.upgrade().ok_or(Error::NetworkReset)?;
        client
            .write_frame(&format!(
                "open {} {} {}",
                name,
                self.driver.baud_rate(),
                self.driver.buffer_algorithm()
            ))
            .await
    }

    /// Register and enqueue one command, returning its completion handle.
    /// `batch == 0` emits immediately; otherwise the worker accumulates
    /// `batch` payloads per frame.
    pub(crate) async fn submit(&self, payload: String, batch: usize) -> Result<CommandHandle> {
        let client = self.client.upgrade().ok_or(Error::NetworkReset)?;
        let (name, is_open) = self.current_name().ok_or(Error::PortNotAvailable)?;
        if !is_open {
            self.open(&name).await?;
        }

        let id = client.next_id(name);
        let handle = client.registry.register(id.clone());
        let request = SendRequest::Command {
            id: id.clone(),
            payload,
            batch,
        };
        if self.queue_tx.send(request).await.is_err() {
            let err = Error::Transport("send queue closed".into());
            client.registry.resolve_done(id.sequence, Err(err.clone()));
            return Err(err);
        }
        Ok(handle)
    }

    /// Submit one command. With `wait`, block until the device's terminal
    /// acknowledgement or until `cancel` fires; cancellation returns early
    /// without dequeuing the command (the registry resolves it normally,
    /// or the reconnect path does).
    pub async fn send_command(
        &self,
        payload: String,
        wait: bool,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut handle = self.submit(payload, 0).await?;
        if !wait {
            return Ok(());
        }
        tokio::select! {
            _ = cancel.cancelled() => Ok(()),
            result = handle.done() => result,
        }
    }

    /// Force the worker to emit any pending batch.
    pub(crate) async fn flush(&self) {
        let _ = self.queue_tx.send(SendRequest::Flush).await;
    }
}

async fn send_worker(client: Weak<ClientInner>, mut queue: mpsc::Receiver<SendRequest>) {
    let mut pending: Vec<(CommandId, String)> = Vec::new();
    let mut last_port = String::new();

    while let Some(request) = queue.recv().await {
        let Some(client) = client.upgrade() else { return };
        match request {
            SendRequest::Flush => emit(&client, &last_port, &mut pending).await,
            SendRequest::Command { id, payload, batch } => {
                if id.port != last_port {
                    // The device moved; whatever was batched for the old
                    // name can no longer be delivered.
                    for (stale, _) in pending.drain(..) {
                        client
                            .registry
                            .resolve_done(stale.sequence, Err(Error::PortChanged));
                    }
                    last_port = id.port.clone();
                }

                pending.push((id, payload));
                if batch == 0 || pending.len() >= batch {
                    emit(&client, &last_port, &mut pending).await;
                }
            }
        }
    }
}

/// Marshal the pending batch into one `sendjson` frame and write it. Any
/// failure resolves every batched entry with the error.
async fn emit(client: &Arc<ClientInner>, port: &str, pending: &mut Vec<(CommandId, String)>) {
    if pending.is_empty() {
        return;
    }

    let body = SendJson {
        port,
        data: pending
            .iter()
            .map(|(id, payload)| SendJsonData {
                data: payload.clone(),
                id: client.wire_id(id),
            })
            .collect(),
    };
    let frame = match serde_json::to_string(&body) {
        Ok(json) => format!("sendjson {json}"),
        Err(err) => {
            let err = Error::Transport(format!("marshal sendjson: {err}"));
            for (id, _) in pending.drain(..) {
                client.registry.resolve_done(id.sequence, Err(err.clone()));
            }
            return;
        }
    };

    if let Err(err) = client.write_frame(&frame).await {
        for (id, _) in pending.drain(..) {
            client.registry.resolve_done(id.sequence, Err(err.clone()));
        }
        return;
    }
    pending.clear();
}
