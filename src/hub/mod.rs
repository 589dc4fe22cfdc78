//! Realtime broadcast hub.
//!
//! One event loop ([`HubDriver`]) exclusively owns the client map; every
//! membership change and broadcast arrives as a command over a bounded
//! channel. The only state published outside the loop is an atomic client
//! count, read by the stats streamer to skip work while nobody is connected.
//!
//! Delivery is best-effort, at-most-once: each client has a bounded outbound
//! queue, and a broadcast that finds the queue full disconnects the client
//! on the spot instead of retrying. A slow consumer never delays the rest.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::fleet::FleetManager;
use crate::runtime::compose::ComposeInvoker;

mod protocol;

pub use protocol::{Message, MessageType, SubscriptionPayload};

/// Outbound queue depth per client.
pub const CLIENT_QUEUE_CAPACITY: usize = 256;

const COMMAND_QUEUE_CAPACITY: usize = 256;

enum Command {
    Register {
        id: u64,
        sender: mpsc::Sender<Message>,
    },
    Unregister {
        id: u64,
    },
    Subscribe {
        id: u64,
        projects: Vec<String>,
    },
    Unsubscribe {
        id: u64,
        projects: Vec<String>,
    },
    Broadcast {
        message: Message,
    },
}

/// Cheap handle for submitting commands to the driver.
#[derive(Clone)]
pub struct Hub {
    commands: mpsc::Sender<Command>,
    client_count: Arc<AtomicUsize>,
    next_id: Arc<AtomicU64>,
}

pub struct HubDriver {
    commands: mpsc::Receiver<Command>,
    clients: HashMap<u64, ClientEntry>,
    client_count: Arc<AtomicUsize>,
}

struct ClientEntry {
    sender: mpsc::Sender<Message>,
    subscriptions: HashSet<String>,
}

impl ClientEntry {
    /// An empty subscription set means "everything"; subscribing narrows
    /// delivery to matching project-scoped messages. Unscoped messages are
    /// always wanted.
    fn wants(&self, message: &Message) -> bool {
        match &message.project_id {
            None => true,
            Some(id) => self.subscriptions.is_empty() || self.subscriptions.contains(id),
        }
    }
}

pub fn new() -> (Hub, HubDriver) {
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    let client_count = Arc::new(AtomicUsize::new(0));
    let hub = Hub {
        commands: tx,
        client_count: Arc::clone(&client_count),
        next_id: Arc::new(AtomicU64::new(1)),
    };
    let driver = HubDriver {
        commands: rx,
        clients: HashMap::new(),
        client_count,
    };
    (hub, driver)
}

impl Hub {
    /// Registers a client's outbound queue and returns its id.
    pub async fn register(&self, sender: mpsc::Sender<Message>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Register { id, sender }).await;
        id
    }

    pub async fn unregister(&self, id: u64) {
        self.send(Command::Unregister { id }).await;
    }

    pub async fn subscribe(&self, id: u64, projects: Vec<String>) {
        self.send(Command::Subscribe { id, projects }).await;
    }

    pub async fn unsubscribe(&self, id: u64, projects: Vec<String>) {
        self.send(Command::Unsubscribe { id, projects }).await;
    }

    pub async fn broadcast(&self, message: Message) {
        self.send(Command::Broadcast { message }).await;
    }

    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }

    async fn send(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            log::debug!("hub driver is gone; command dropped");
        }
    }
}

impl HubDriver {
    /// Runs until every [`Hub`] handle is dropped.
    pub async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Register { id, sender } => {
                    self.clients.insert(
                        id,
                        ClientEntry {
                            sender,
                            subscriptions: HashSet::new(),
                        },
                    );
                    self.publish_count();
                    log::debug!("client {id} connected ({} total)", self.clients.len());
                }
                Command::Unregister { id } => {
                    if self.clients.remove(&id).is_some() {
                        self.publish_count();
                        log::debug!("client {id} disconnected ({} total)", self.clients.len());
                    }
                }
                Command::Subscribe { id, projects } => {
                    if let Some(client) = self.clients.get_mut(&id) {
                        client.subscriptions.extend(projects);
                    }
                }
                Command::Unsubscribe { id, projects } => {
                    if let Some(client) = self.clients.get_mut(&id) {
                        for project in &projects {
                            client.subscriptions.remove(project);
                        }
                    }
                }
                Command::Broadcast { message } => self.broadcast(message),
            }
        }
    }

    fn broadcast(&mut self, message: Message) {
        let mut dropped = Vec::new();
        for (id, client) in &self.clients {
            if !client.wants(&message) {
                continue;
            }
            match client.sender.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    log::warn!("client {id} cannot keep up; disconnecting");
                    dropped.push(*id);
                }
                Err(TrySendError::Closed(_)) => dropped.push(*id),
            }
        }

        for id in dropped {
            self.clients.remove(&id);
        }
        self.publish_count();
    }

    fn publish_count(&self) {
        self.client_count.store(self.clients.len(), Ordering::Relaxed);
    }
}

/// Periodically broadcasts one combined stats envelope covering every
/// non-stopped project. Skips all gathering while no client is connected.
pub async fn run_stats_streamer<C: ComposeInvoker>(
    hub: Hub,
    manager: Arc<FleetManager<C>>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if hub.client_count() == 0 {
            continue;
        }

        let stats = manager.collect_fleet_stats().await;
        match serde_json::to_value(&stats) {
            Ok(payload) => {
                hub.broadcast(Message::new(MessageType::ContainerStats, Some(payload)))
                    .await;
            }
            Err(err) => log::warn!("encoding stats broadcast: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        // Lets the driver drain its command queue.
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    fn stats_message(project_id: &str) -> Message {
        Message::scoped(MessageType::ContainerStats, project_id, None)
    }

    #[tokio::test]
    async fn test_slow_client_is_disconnected_others_unaffected() {
        let (hub, driver) = new();
        tokio::spawn(driver.run());

        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(16);
        hub.register(slow_tx).await;
        hub.register(fast_tx).await;
        settle().await;
        assert_eq!(hub.client_count(), 2);

        // The slow client never drains: the first broadcast fills its queue,
        // the second finds it full and disconnects it.
        hub.broadcast(Message::new(MessageType::ProjectList, None)).await;
        hub.broadcast(Message::new(MessageType::ProjectList, None)).await;
        hub.broadcast(Message::new(MessageType::ProjectList, None)).await;
        settle().await;

        assert_eq!(hub.client_count(), 1);
        for _ in 0..3 {
            assert!(fast_rx.recv().await.is_some());
        }

        // The slow client's sender was dropped by the driver: one buffered
        // message, then end-of-stream.
        assert!(slow_rx.recv().await.is_some());
        assert!(slow_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_subscription_receives_everything() {
        let (hub, driver) = new();
        tokio::spawn(driver.run());

        let (tx, mut rx) = mpsc::channel(16);
        hub.register(tx).await;

        hub.broadcast(stats_message("X")).await;
        hub.broadcast(stats_message("Y")).await;
        hub.broadcast(Message::new(MessageType::ProjectList, None)).await;
        settle().await;

        let mut received = 0;
        while rx.try_recv().is_ok() {
            received += 1;
        }
        assert_eq!(received, 3);
    }

    #[tokio::test]
    async fn test_subscription_narrows_delivery() {
        let (hub, driver) = new();
        tokio::spawn(driver.run());

        let (tx, mut rx) = mpsc::channel(16);
        let id = hub.register(tx).await;
        hub.subscribe(id, vec!["X".to_string()]).await;
        settle().await;

        hub.broadcast(stats_message("X")).await;
        hub.broadcast(stats_message("Y")).await;
        hub.broadcast(Message::new(MessageType::ProjectList, None)).await;
        settle().await;

        let first = rx.try_recv().unwrap();
        assert_eq!(first.project_id.as_deref(), Some("X"));
        let second = rx.try_recv().unwrap();
        assert_eq!(second.project_id, None);
        assert!(rx.try_recv().is_err());

        // Unsubscribing the last project returns the client to receive-all.
        hub.unsubscribe(id, vec!["X".to_string()]).await;
        settle().await;
        hub.broadcast(stats_message("Y")).await;
        settle().await;
        assert_eq!(rx.try_recv().unwrap().project_id.as_deref(), Some("Y"));
    }

    #[tokio::test]
    async fn test_unregister_updates_count() {
        let (hub, driver) = new();
        tokio::spawn(driver.run());

        let (tx, _rx) = mpsc::channel(16);
        let id = hub.register(tx).await;
        settle().await;
        assert_eq!(hub.client_count(), 1);

        hub.unregister(id).await;
        settle().await;
        assert_eq!(hub.client_count(), 0);
    }
}
