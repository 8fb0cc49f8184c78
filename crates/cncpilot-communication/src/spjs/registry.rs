//! Command-correlation registry.
//!
//! Every submitted command is registered under its sequence number before
//! the bytes leave the process. SPJS acknowledges asynchronously with
//! `Write`, then `Complete` or `Error`; resets (reconnect, wiped queue)
//! resolve whole groups at once. Each entry resolves exactly once and is
//! removed when it does.

use cncpilot_core::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Identity of one in-flight command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandId {
    /// Port the command was submitted against.
    pub port: String,
    /// Process-wide monotonic sequence number.
    pub sequence: u32,
}

struct InFlight {
    port: String,
    write_tx: Option<oneshot::Sender<()>>,
    done_tx: oneshot::Sender<Result<()>>,
}

/// Map of sequence number to in-flight command.
#[derive(Default)]
pub(crate) struct Registry {
    entries: Mutex<HashMap<u32, InFlight>>,
}

impl Registry {
    /// Register a command and hand back its completion handle.
    pub(crate) fn register(&self, id: CommandId) -> CommandHandle {
        let (write_tx, written) = oneshot::channel();
        let (done_tx, done) = oneshot::channel();
        self.entries.lock().insert(
            id.sequence,
            InFlight {
                port: id.port.clone(),
                write_tx: Some(write_tx),
                done_tx,
            },
        );
        CommandHandle { id, written, done }
    }

    /// SPJS wrote the command bytes to the serial port. The entry stays
    /// registered until `Complete` or `Error` arrives.
    pub(crate) fn resolve_write(&self, sequence: u32) {
        if let Some(entry) = self.entries.lock().get_mut(&sequence) {
            if let Some(tx) = entry.write_tx.take() {
                let _ = tx.send(());
            }
        }
    }

    /// Terminal acknowledgement for one command. Unknown sequence numbers
    /// are ignored (already resolved, or cancelled by a reset).
    pub(crate) fn resolve_done(&self, sequence: u32, result: Result<()>) {
        if let Some(entry) = self.entries.lock().remove(&sequence) {
            let _ = entry.done_tx.send(result);
        }
    }

    /// Resolve every entry scoped to `port` with `err`.
    pub(crate) fn resolve_port(&self, port: &str, err: Error) {
        let mut entries = self.entries.lock();
        let sequences: Vec<u32> = entries
            .iter()
            .filter(|(_, entry)| entry.port == port)
            .map(|(sequence, _)| *sequence)
            .collect();
        for sequence in sequences {
            if let Some(entry) = entries.remove(&sequence) {
                let _ = entry.done_tx.send(Err(err.clone()));
            }
        }
    }

    /// Resolve every outstanding entry with `err`, leaving the registry
    /// empty. Used when the socket drops.
    pub(crate) fn resolve_all(&self, err: Error) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for (_, entry) in entries {
            let _ = entry.done_tx.send(Err(err.clone()));
        }
    }

    #[cfg(test)]
    fn outstanding(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Completion handle for one submitted command.
///
/// `written` and `done` each fire at most once; `written` is observed no
/// later than `done`. When the terminal acknowledgement arrives before the
/// `Write` one (seen in practice), `written` reports `false` and the
/// caller accounts for both transitions at once.
pub struct CommandHandle {
    id: CommandId,
    written: oneshot::Receiver<()>,
    done: oneshot::Receiver<Result<()>>,
}

impl CommandHandle {
    /// Identity of the command this handle tracks.
    pub fn id(&self) -> &CommandId {
        &self.id
    }

    /// Wait for the `Write` acknowledgement. Returns `false` if the
    /// command resolved without one. Await at most once.
    pub async fn written(&mut self) -> bool {
        (&mut self.written).await.is_ok()
    }

    /// Wait for the terminal resolution. Await at most once.
    pub async fn done(&mut self) -> Result<()> {
        match (&mut self.done).await {
            Ok(result) => result,
            // The registry itself went away with the connection.
            Err(_) => Err(Error::NetworkReset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(port: &str, sequence: u32) -> CommandId {
        CommandId {
            port: port.into(),
            sequence,
        }
    }

    #[tokio::test]
    async fn write_then_complete() {
        let registry = Registry::default();
        let mut handle = registry.register(id("/dev/ttyUSB0", 1));

        registry.resolve_write(1);
        assert!(handle.written().await);

        registry.resolve_done(1, Ok(()));
        assert!(handle.done().await.is_ok());
        assert_eq!(registry.outstanding(), 0);
    }

    #[tokio::test]
    async fn complete_before_write_drops_the_write_signal() {
        let registry = Registry::default();
        let mut handle = registry.register(id("/dev/ttyUSB0", 1));

        registry.resolve_done(1, Ok(()));
        assert!(!handle.written().await);
        assert!(handle.done().await.is_ok());
    }

    #[tokio::test]
    async fn device_error_is_passed_through() {
        let registry = Registry::default();
        let mut handle = registry.register(id("/dev/ttyUSB0", 3));

        registry.resolve_done(3, Err(Error::Device("2".into())));
        assert_eq!(handle.done().await, Err(Error::Device("2".into())));
    }

    #[tokio::test]
    async fn port_reset_only_touches_matching_port() {
        let registry = Registry::default();
        let mut grbl = registry.register(id("/dev/ttyUSB0", 1));
        let mut pendant = registry.register(id("/dev/ttyUSB1", 2));

        registry.resolve_port("/dev/ttyUSB0", Error::PortReset);
        assert_eq!(grbl.done().await, Err(Error::PortReset));
        assert_eq!(registry.outstanding(), 1);

        registry.resolve_done(2, Ok(()));
        assert!(pendant.done().await.is_ok());
    }

    #[tokio::test]
    async fn network_reset_empties_the_registry() {
        let registry = Registry::default();
        let mut first = registry.register(id("/dev/ttyUSB0", 1));
        let mut second = registry.register(id("/dev/ttyUSB0", 2));

        registry.resolve_all(Error::NetworkReset);
        assert_eq!(registry.outstanding(), 0);
        assert_eq!(first.done().await, Err(Error::NetworkReset));
        assert_eq!(second.done().await, Err(Error::NetworkReset));
    }

    #[tokio::test]
    async fn unknown_sequence_is_ignored() {
        let registry = Registry::default();
        registry.resolve_write(99);
        registry.resolve_done(99, Ok(()));
        assert_eq!(registry.outstanding(), 0);
    }
}
