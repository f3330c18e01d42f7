use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::playlist::SpiritRecord;

/// Outbound half of one client connection. The WebSocket task on the other
/// end writes every frame it receives to the socket.
pub type ClientSender = mpsc::UnboundedSender<String>;

/// The only frame the server ever pushes.
#[derive(Serialize)]
#[serde(tag = "type", rename = "spirit")]
pub struct SpiritMessage<'a> {
    pub data: &'a SpiritRecord,
    #[serde(rename = "timeSinceSpawnMs")]
    pub time_since_spawn_ms: u64,
    #[serde(rename = "spiritIntervalMs")]
    pub spirit_interval_ms: u64,
}

impl<'a> SpiritMessage<'a> {
    pub fn new(data: &'a SpiritRecord, elapsed: Duration, interval: Duration) -> Self {
        Self {
            data,
            time_since_spawn_ms: elapsed.as_millis() as u64,
            spirit_interval_ms: interval.as_millis() as u64,
        }
    }

    pub fn to_frame(&self) -> String {
        // A map of JSON values plus two integers cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Currently open client connections. Membership only.
#[derive(Default)]
pub struct ConnectionSet {
    clients: HashMap<Uuid, ClientSender>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: Uuid, tx: ClientSender) {
        self.clients.insert(id, tx);
    }

    /// Returns `true` when the connection was a member.
    pub fn remove(&mut self, id: &Uuid) -> bool {
        self.clients.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn clear(&mut self) {
        self.clients.clear();
    }

    /// Best-effort fan-out to every open connection. A failed send is dropped
    /// and never affects delivery to the others. Returns how many connections
    /// took the frame.
    pub fn broadcast(&self, item: &SpiritRecord, elapsed: Duration, interval: Duration) -> usize {
        let frame = SpiritMessage::new(item, elapsed, interval).to_frame();
        let mut delivered = 0;
        for (id, tx) in &self.clients {
            if tx.is_closed() {
                continue;
            }
            match tx.send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => debug!(client = %id, "dropping spirit frame for closed connection"),
            }
        }
        delivered
    }
}

/// Single frame to a connection that is not (yet) a member of the set.
pub fn send_to(tx: &ClientSender, item: &SpiritRecord, elapsed: Duration, interval: Duration) -> bool {
    tx.send(SpiritMessage::new(item, elapsed, interval).to_frame()).is_ok()
}
