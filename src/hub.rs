use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broadcast::{self, ClientSender, ConnectionSet};
use crate::playlist::{Playlist, SpiritRecord};
use crate::rotation::Rotation;

// --- Connection manager ------------------------------------------------------
//
// All rotation and connection state lives on one task. Socket tasks and HTTP
// handlers talk to it through `HubHandle`, which only enqueues events. Each
// event runs to completion before the next one, so nothing here needs a lock.

#[derive(Clone, Copy, Debug)]
pub struct HubSettings {
    pub interval: Duration,
    /// How long the set must stay empty after the last disconnect before the
    /// rotation goes Idle.
    pub debounce: Duration,
}

#[derive(Clone, Debug, Serialize)]
pub struct HubStatus {
    pub running: bool,
    pub clients: usize,
    pub cursor: usize,
    pub playlist_len: usize,
    pub interval_ms: u64,
    pub elapsed_ms: u64,
    pub current: Arc<SpiritRecord>,
}

enum HubEvent {
    Connect { id: Uuid, tx: ClientSender },
    Disconnect { id: Uuid },
    Status(oneshot::Sender<HubStatus>),
    Playlist(oneshot::Sender<Vec<Arc<SpiritRecord>>>),
    Teardown(oneshot::Sender<()>),
}

/// A registered client: its id and the stream of frames to write out.
pub struct ClientConnection {
    pub id: Uuid,
    pub frames: mpsc::UnboundedReceiver<String>,
}

#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<HubEvent>,
}

impl HubHandle {
    /// Register a new client. Its first frame is the current spirit with the
    /// late-join offset.
    pub fn connect(&self) -> anyhow::Result<ClientConnection> {
        let id = Uuid::new_v4();
        let (tx, frames) = mpsc::unbounded_channel();
        self.send(HubEvent::Connect { id, tx })?;
        Ok(ClientConnection { id, frames })
    }

    pub fn disconnect(&self, id: Uuid) {
        // A hub that is already gone has nothing left to clean up.
        if self.send(HubEvent::Disconnect { id }).is_err() {
            debug!(client = %id, "hub gone before disconnect");
        }
    }

    pub async fn status(&self) -> anyhow::Result<HubStatus> {
        let (tx, rx) = oneshot::channel();
        self.send(HubEvent::Status(tx))?;
        Ok(rx.await?)
    }

    pub async fn playlist(&self) -> anyhow::Result<Vec<Arc<SpiritRecord>>> {
        let (tx, rx) = oneshot::channel();
        self.send(HubEvent::Playlist(tx))?;
        Ok(rx.await?)
    }

    /// Stop the rotation, drop every connection, and end the dispatcher.
    pub async fn teardown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.send(HubEvent::Teardown(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    fn send(&self, ev: HubEvent) -> anyhow::Result<()> {
        self.events
            .send(ev)
            .map_err(|_| anyhow::anyhow!("spirit hub is not running"))
    }
}

pub struct Hub {
    rotation: Rotation,
    clients: ConnectionSet,
    settings: HubSettings,
    events: mpsc::UnboundedReceiver<HubEvent>,
    // Present only while Running.
    ticker: Option<Interval>,
    // Armed when the last client leaves.
    stop_deadline: Option<Instant>,
}

impl Hub {
    pub fn init(playlist: Playlist, settings: HubSettings) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            rotation: Rotation::new(playlist, Instant::now()),
            clients: ConnectionSet::new(),
            settings,
            events: rx,
            ticker: None,
            stop_deadline: None,
        };
        (hub, HubHandle { events: tx })
    }

    /// Dispatcher loop. Returns after teardown or once every handle is gone.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                ev = self.events.recv() => match ev {
                    Some(HubEvent::Connect { id, tx }) => self.on_connect(id, tx),
                    Some(HubEvent::Disconnect { id }) => self.on_disconnect(id),
                    Some(HubEvent::Status(reply)) => {
                        let _ = reply.send(self.status());
                    }
                    Some(HubEvent::Playlist(reply)) => {
                        let _ = reply.send(self.rotation.playlist().records().to_vec());
                    }
                    Some(HubEvent::Teardown(done)) => {
                        self.teardown();
                        let _ = done.send(());
                        return;
                    }
                    None => {
                        warn!("all hub handles dropped, shutting down rotation");
                        self.teardown();
                        return;
                    }
                },
                _ = next_tick(&mut self.ticker) => self.on_tick(),
                _ = wait_until(self.stop_deadline) => self.on_debounce_elapsed(),
            }
        }
    }

    fn on_connect(&mut self, id: Uuid, tx: ClientSender) {
        let now = Instant::now();
        self.stop_deadline = None;
        self.start(now);

        let elapsed = self.rotation.elapsed(now);
        let current = self.rotation.current();
        if !broadcast::send_to(&tx, &current, elapsed, self.settings.interval) {
            debug!(client = %id, "client closed before late-join frame");
        }

        self.clients.insert(id, tx);
        info!(
            client = %id,
            clients = self.clients.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "client connected"
        );
    }

    fn on_disconnect(&mut self, id: Uuid) {
        if !self.clients.remove(&id) {
            return;
        }
        info!(client = %id, clients = self.clients.len(), "client disconnected");
        if self.clients.is_empty() && self.rotation.is_running() {
            self.stop_deadline = Some(Instant::now() + self.settings.debounce);
        }
    }

    fn on_tick(&mut self) {
        let item = self.rotation.tick(Instant::now());
        let delivered = self.clients.broadcast(&item, Duration::ZERO, self.settings.interval);
        debug!(delivered, "spirit broadcast");
    }

    fn on_debounce_elapsed(&mut self) {
        self.stop_deadline = None;
        if self.clients.is_empty() {
            self.stop(Instant::now());
        }
    }

    fn start(&mut self, now: Instant) {
        if self.rotation.start(now) {
            let mut ticker = tokio::time::interval_at(now + self.settings.interval, self.settings.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            self.ticker = Some(ticker);
        }
    }

    fn stop(&mut self, now: Instant) {
        if self.rotation.stop(now) {
            self.ticker = None;
        }
    }

    fn teardown(&mut self) {
        self.stop_deadline = None;
        self.stop(Instant::now());
        // Dropping the senders ends every socket task.
        self.clients.clear();
        info!("spirit hub torn down");
    }

    fn status(&self) -> HubStatus {
        let now = Instant::now();
        let playlist = self.rotation.playlist();
        HubStatus {
            running: self.rotation.is_running(),
            clients: self.clients.len(),
            cursor: playlist.cursor(),
            playlist_len: playlist.len(),
            interval_ms: self.settings.interval.as_millis() as u64,
            elapsed_ms: self.rotation.elapsed(now).as_millis() as u64,
            current: self.rotation.current(),
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
