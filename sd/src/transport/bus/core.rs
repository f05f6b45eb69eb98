//! LoopbackBus task implementation

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use eyre::{Result, eyre};
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::handle::{BusHandle, Inbox};
use super::messages::{BusMetrics, BusRequest, Delivery};
use crate::config::TransportConfig;
use crate::protocol::topics;

/// Fault plan for one delivery: one delay per copy, empty when dropped
type DeliveryPlan = Vec<Duration>;

/// In-process publish/subscribe channel with injectable faults
///
/// Behaves like a small MQTT broker: topic filters with `+`/`#`, retained
/// last values replayed on subscribe, and at-least-once, unordered delivery
/// when drop, duplicate or jitter rates are set.
pub struct LoopbackBus {
    config: TransportConfig,
    tx: mpsc::Sender<BusRequest>,
    rx: mpsc::Receiver<BusRequest>,
}

impl LoopbackBus {
    pub fn new(config: TransportConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.channel_buffer.max(1));
        Self { config, tx, rx }
    }

    /// Get a sender for creating handles
    pub fn sender(&self) -> mpsc::Sender<BusRequest> {
        self.tx.clone()
    }

    /// Attach a client and return its outbound handle and inbox
    pub async fn connect(&self, client_id: &str) -> Result<(BusHandle, Inbox)> {
        connect_client(&self.tx, client_id, self.config.client_buffer).await
    }

    /// Request shutdown of the bus
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(BusRequest::Shutdown)
            .await
            .map_err(|_| eyre!("Bus channel closed"))?;
        Ok(())
    }

    /// Run the bus task
    ///
    /// This consumes the bus and runs until shutdown is requested.
    pub async fn run(mut self) {
        let mut clients: HashMap<String, mpsc::Sender<Delivery>> = HashMap::new();
        let mut subscriptions: HashMap<String, HashSet<String>> = HashMap::new();
        let mut retained: HashMap<String, String> = HashMap::new();
        let mut metrics = BusMetrics::default();

        info!(lossy = self.config.is_lossy(), "LoopbackBus started");

        while let Some(req) = self.rx.recv().await {
            match req {
                BusRequest::Connect { client_id, tx } => {
                    debug!(%client_id, "Connecting client");
                    clients.insert(client_id, tx);
                    metrics.connected_clients = clients.len();
                }

                BusRequest::Disconnect { client_id } => {
                    debug!(%client_id, "Disconnecting client");
                    clients.remove(&client_id);
                    for subscribers in subscriptions.values_mut() {
                        subscribers.remove(&client_id);
                    }
                    subscriptions.retain(|_, s| !s.is_empty());
                    metrics.connected_clients = clients.len();
                    metrics.total_subscriptions = subscriptions.values().map(|s| s.len()).sum();
                }

                BusRequest::Subscribe { client_id, filter } => {
                    debug!(%client_id, %filter, "Subscribing");
                    if let Some(tx) = clients.get(&client_id) {
                        for (topic, payload) in retained.iter().filter(|(t, _)| topics::matches(&filter, t)) {
                            let delivery = Delivery {
                                id: Uuid::now_v7(),
                                topic: topic.clone(),
                                payload: payload.clone(),
                                retained: true,
                            };
                            if tx.try_send(delivery).is_ok() {
                                metrics.delivered += 1;
                            }
                        }
                    }
                    subscriptions.entry(filter).or_default().insert(client_id);
                    metrics.total_subscriptions = subscriptions.values().map(|s| s.len()).sum();
                }

                BusRequest::Publish {
                    from,
                    topic,
                    payload,
                    retain,
                    reply_tx,
                } => {
                    metrics.published += 1;
                    trace!(%from, %topic, retain, "Publishing");

                    if retain {
                        if payload.is_empty() {
                            retained.remove(&topic);
                        } else {
                            retained.insert(topic.clone(), payload.clone());
                        }
                        metrics.retained_topics = retained.len();
                    }

                    let recipients: HashSet<&String> = subscriptions
                        .iter()
                        .filter(|(filter, _)| topics::matches(filter, &topic))
                        .flat_map(|(_, subscribers)| subscribers.iter())
                        .collect();

                    let id = Uuid::now_v7();
                    for client_id in recipients {
                        let Some(tx) = clients.get(client_id) else {
                            continue;
                        };
                        let plan = self.plan_delivery();
                        if plan.is_empty() {
                            metrics.dropped += 1;
                            continue;
                        }
                        if plan.len() > 1 {
                            metrics.duplicated += 1;
                        }
                        for delay in plan {
                            let delivery = Delivery {
                                id,
                                topic: topic.clone(),
                                payload: payload.clone(),
                                retained: false,
                            };
                            if delay.is_zero() {
                                match tx.try_send(delivery) {
                                    Ok(()) => metrics.delivered += 1,
                                    Err(_) => {
                                        warn!(%client_id, %topic, "Inbox full, dropping delivery");
                                        metrics.dropped += 1;
                                    }
                                }
                            } else {
                                let tx = tx.clone();
                                metrics.delivered += 1;
                                tokio::spawn(async move {
                                    tokio::time::sleep(delay).await;
                                    let _ = tx.try_send(delivery);
                                });
                            }
                        }
                    }

                    let _ = reply_tx.send(Ok(()));
                }

                BusRequest::GetMetrics { reply_tx } => {
                    let _ = reply_tx.send(metrics.clone());
                }

                BusRequest::Shutdown => {
                    info!("LoopbackBus shutting down");
                    break;
                }
            }
        }

        info!("LoopbackBus stopped");
    }

    fn plan_delivery(&self) -> DeliveryPlan {
        let cfg = &self.config;
        if !cfg.is_lossy() {
            return vec![Duration::ZERO];
        }
        let mut rng = rand::rng();
        if cfg.drop_rate > 0.0 && rng.random_bool(cfg.drop_rate.min(1.0)) {
            return Vec::new();
        }
        let copies = if cfg.duplicate_rate > 0.0 && rng.random_bool(cfg.duplicate_rate.min(1.0)) {
            2
        } else {
            1
        };
        (0..copies)
            .map(|_| {
                if cfg.reorder_jitter_ms == 0 {
                    Duration::ZERO
                } else {
                    Duration::from_millis(rng.random_range(0..=cfg.reorder_jitter_ms))
                }
            })
            .collect()
    }
}

/// Register a client inbox with the bus task
pub(super) async fn connect_client(
    tx: &mpsc::Sender<BusRequest>,
    client_id: &str,
    buffer: usize,
) -> Result<(BusHandle, Inbox)> {
    let (inbox_tx, inbox_rx) = mpsc::channel(buffer.max(1));

    tx.send(BusRequest::Connect {
        client_id: client_id.to_string(),
        tx: inbox_tx.clone(),
    })
    .await
    .map_err(|_| eyre!("Bus channel closed"))?;

    Ok((
        BusHandle::new(tx.clone(), inbox_tx, client_id.to_string()),
        Inbox::new(inbox_rx),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;

    fn bus(config: TransportConfig) -> (mpsc::Sender<BusRequest>, LoopbackBus) {
        let bus = LoopbackBus::new(config);
        (bus.sender(), bus)
    }

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers_only() {
        let (sender, bus) = bus(TransportConfig::default());
        let (a, mut inbox_a) = bus.connect("a").await.unwrap();
        let (_b, mut inbox_b) = bus.connect("b").await.unwrap();
        let task = tokio::spawn(bus.run());

        a.subscribe("traffic/green_status").await.unwrap();
        a.publish("traffic/green_status", "{}", false).await.unwrap();
        a.publish("traffic/duration", "{}", false).await.unwrap();

        let got = inbox_a.recv().await.unwrap();
        assert_eq!(got.topic, "traffic/green_status");
        assert!(inbox_a.try_recv().is_none());
        assert!(inbox_b.try_recv().is_none());

        sender.send(BusRequest::Shutdown).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_retained_replayed_on_subscribe() {
        let (sender, bus) = bus(TransportConfig::default());
        let (a, _inbox_a) = bus.connect("a").await.unwrap();
        let (b, mut inbox_b) = bus.connect("b").await.unwrap();
        let task = tokio::spawn(bus.run());

        a.publish("traffic/lane_status/1", "first", true).await.unwrap();
        a.publish("traffic/lane_status/1", "second", true).await.unwrap();
        b.subscribe("traffic/lane_status/+").await.unwrap();

        let got = inbox_b.recv().await.unwrap();
        assert!(got.retained);
        assert_eq!(got.payload, "second");

        let metrics = b.metrics().await.unwrap();
        assert_eq!(metrics.retained_topics, 1);
        assert_eq!(metrics.published, 2);

        sender.send(BusRequest::Shutdown).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_drop_rate_loses_everything() {
        let config = TransportConfig {
            drop_rate: 1.0,
            ..TransportConfig::default()
        };
        let (sender, bus) = bus(config);
        let (a, mut inbox) = bus.connect("a").await.unwrap();
        let task = tokio::spawn(bus.run());

        a.subscribe("#").await.unwrap();
        for _ in 0..5 {
            a.publish("traffic/duration", "{}", false).await.unwrap();
        }
        let metrics = a.metrics().await.unwrap();
        assert_eq!(metrics.dropped, 5);
        assert!(inbox.try_recv().is_none());

        sender.send(BusRequest::Shutdown).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_full_duplicate_rate_delivers_twice() {
        let config = TransportConfig {
            duplicate_rate: 1.0,
            ..TransportConfig::default()
        };
        let (sender, bus) = bus(config);
        let (a, mut inbox) = bus.connect("a").await.unwrap();
        let task = tokio::spawn(bus.run());

        a.subscribe("traffic/#").await.unwrap();
        a.publish("traffic/next_lane_ready", "{}", false).await.unwrap();

        let first = inbox.recv().await.unwrap();
        let second = inbox.recv().await.unwrap();
        assert_eq!(first.id, second.id);

        sender.send(BusRequest::Shutdown).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_removes_subscriptions() {
        let (sender, bus) = bus(TransportConfig::default());
        let (a, _inbox) = bus.connect("a").await.unwrap();
        let task = tokio::spawn(bus.run());

        a.subscribe("traffic/#").await.unwrap();
        a.disconnect().await.unwrap();

        let (b, _inbox_b) = connect_client(&sender, "b", 4).await.unwrap();
        let metrics = b.metrics().await.unwrap();
        assert_eq!(metrics.connected_clients, 1);
        assert_eq!(metrics.total_subscriptions, 0);

        sender.send(BusRequest::Shutdown).await.unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_is_closed() {
        let (sender, bus) = bus(TransportConfig::default());
        let (a, _inbox) = bus.connect("a").await.unwrap();
        let task = tokio::spawn(bus.run());
        sender.send(BusRequest::Shutdown).await.unwrap();
        task.await.unwrap();

        let result = a.publish("traffic/duration", "{}", false).await;
        assert_eq!(result, Err(crate::transport::TransportError::Closed));
    }
}
