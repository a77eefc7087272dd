//! Connection registry shared between the transport and the pairing core
//!
//! The pairing core registers an outbound channel for every accepted socket
//! and removes it when the socket closes, under its own lock so the online
//! count always matches the registry. Otherwise it only asks whether a
//! connection is open and pushes events at it; sends never block and a send
//! to a closed connection is silently dropped.

use crate::protocol::{ConnectionId, ServerEvent};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use tokio::sync::mpsc;

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

/// What the pairing core needs from the transport layer
pub trait Connections: Send + Sync {
    /// Register a fresh connection and return its id with the receiving end
    /// of its outbound channel
    fn open(&self) -> (ConnectionId, EventReceiver);

    /// Unregister a connection. Returns false if it was not registered.
    fn close(&self, id: ConnectionId) -> bool;

    /// Whether `id` is currently open
    fn is_open(&self, id: ConnectionId) -> bool;

    /// Number of open connections
    fn open_count(&self) -> usize;

    /// Fire-and-forget delivery of `event` to `id`
    fn send(&self, id: ConnectionId, event: ServerEvent);

    /// Fire-and-forget delivery of `event` to every open connection
    fn broadcast(&self, event: ServerEvent);
}

/// Channel-backed [`Connections`] implementation used by the WebSocket server
#[derive(Debug, Default)]
pub struct ConnectionTable {
    senders: RwLock<HashMap<ConnectionId, EventSender>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Connections for ConnectionTable {
    fn open(&self) -> (ConnectionId, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        (id, rx)
    }

    fn close(&self, id: ConnectionId) -> bool {
        self.senders
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    fn is_open(&self, id: ConnectionId) -> bool {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .is_some_and(|sender| !sender.is_closed())
    }

    fn open_count(&self) -> usize {
        self.senders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn send(&self, id: ConnectionId, event: ServerEvent) {
        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        match senders.get(&id) {
            Some(sender) => {
                if sender.send(event).is_err() {
                    tracing::debug!(connection = %id, "dropping event for closed channel");
                }
            }
            None => tracing::debug!(connection = %id, "dropping event for unknown connection"),
        }
    }

    fn broadcast(&self, event: ServerEvent) {
        let senders = self.senders.read().unwrap_or_else(PoisonError::into_inner);
        for sender in senders.values() {
            let _ = sender.send(event.clone());
        }
    }
}
