use crate::{Error, PubSub, OPERATION_TOPIC};
use chrono::{DateTime, Utc};
use orb_db::{Store, StoreExt};
use orb_types::Operation;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

const INFLIGHT_PREFIX: &str = "/opqueue/inflight/";
const ERROR_PREFIX: &str = "/opqueue/error/";

/// A queued operation as carried over the broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMessage {
    pub id: Uuid,
    pub operation: Operation,
    pub protocol_version: u64,
    pub published_at: DateTime<Utc>,
    pub retry_count: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InflightRecord {
    message: OperationMessage,
    /// When the lease on this delivery expires and the message becomes
    /// eligible for re-publication.
    next_retry: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub topic: String,
    /// Number of cooperative subscriber tasks feeding the pending set.
    pub pool_size: usize,
    pub task_monitor_interval: Duration,
    pub max_retries: u32,
    pub retries_initial_delay: Duration,
    pub retries_max_delay: Duration,
    pub retries_multiplier: f64,
    pub lease: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            topic: OPERATION_TOPIC.to_string(),
            pool_size: 4,
            task_monitor_interval: Duration::from_secs(10),
            max_retries: 10,
            retries_initial_delay: Duration::from_secs(2),
            retries_max_delay: Duration::from_secs(30),
            retries_multiplier: 1.5,
            lease: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    fn backoff(&self, retry_count: u32) -> Duration {
        let delay =
            self.retries_initial_delay.as_secs_f64() * self.retries_multiplier.powi(retry_count as i32);
        Duration::from_secs_f64(delay.min(self.retries_max_delay.as_secs_f64()))
    }
}

/// Durable, multi-owner queue of pending operations with at-least-once
/// delivery. Messages are leased on delivery; an unacked lease expires and
/// the message is re-published with back-off, which is also the failover
/// path when a node holding deliveries goes away.
pub struct OperationQueue<DB, P> {
    db: DB,
    pubsub: Arc<P>,
    pending: Arc<Mutex<VecDeque<OperationMessage>>>,
    config: QueueConfig,
}

impl<DB, P> OperationQueue<DB, P>
where
    DB: Store + Clone + Send + Sync + 'static,
    P: PubSub + 'static,
{
    pub fn new(db: DB, pubsub: Arc<P>, config: QueueConfig) -> Self {
        Self {
            db,
            pubsub,
            pending: Arc::new(Mutex::new(VecDeque::new())),
            config,
        }
    }

    /// Spawn the subscriber pool and the lease monitor.
    pub async fn start(&self, cancel: CancellationToken) -> Result<Vec<JoinHandle<()>>, Error> {
        let mut handles = Vec::with_capacity(self.config.pool_size + 1);
        for _ in 0..self.config.pool_size.max(1) {
            let receiver = self.pubsub.subscribe(&self.config.topic).await?;
            let pending = Arc::clone(&self.pending);
            let db = self.db.clone();
            let lease = self.config.lease;
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    let data = tokio::select! {
                        _ = cancel.cancelled() => return,
                        received = receiver.recv_async() => match received {
                            Ok(data) => data,
                            Err(_) => return,
                        },
                    };
                    let message: OperationMessage = match serde_json::from_slice(&data) {
                        Ok(m) => m,
                        Err(e) => {
                            warn!(error = %e, "dropping malformed queue message");
                            continue;
                        }
                    };
                    let record = InflightRecord {
                        next_retry: Utc::now()
                            + chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::zero()),
                        message: message.clone(),
                    };
                    if let Err(e) = db.write_obj(inflight_key(&message.id), &record) {
                        error!(error = %e, "failed to record in-flight message");
                        continue;
                    }
                    pending.lock().push_back(message);
                }
            }));
        }
        handles.push(self.spawn_monitor(cancel));
        Ok(handles)
    }

    fn spawn_monitor(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let db = self.db.clone();
        let pubsub = Arc::clone(&self.pubsub);
        let config = self.config.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.task_monitor_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = sweep_expired(&db, pubsub.as_ref(), &config).await {
                    warn!(error = %e, "in-flight sweep failed");
                }
            }
        })
    }

    /// Publish a new operation onto the queue.
    pub async fn add(&self, operation: Operation, protocol_version: u64) -> Result<Uuid, Error> {
        let message = OperationMessage {
            id: Uuid::new_v4(),
            operation,
            protocol_version,
            published_at: Utc::now(),
            retry_count: 0,
        };
        let record = InflightRecord {
            next_retry: Utc::now()
                + chrono::Duration::from_std(self.config.lease).unwrap_or_else(|_| chrono::Duration::zero()),
            message: message.clone(),
        };
        self.db.write_obj(inflight_key(&message.id), &record)?;
        self.pubsub
            .publish(&self.config.topic, serde_json::to_vec(&message)?)
            .await?;
        debug!(id = %message.id, suffix = %message.operation.unique_suffix, "operation queued");
        Ok(message.id)
    }

    /// First `n` messages currently held by this node, without removing them.
    pub fn peek(&self, n: usize) -> Vec<OperationMessage> {
        self.pending.lock().iter().take(n).cloned().collect()
    }

    /// Atomically reserve up to `n` messages. The caller settles the
    /// reservation with [Reserved::ack] or [Reserved::nack].
    pub fn remove(&self, n: usize) -> Reserved<DB, P> {
        let mut pending = self.pending.lock();
        let take = n.min(pending.len());
        let messages: Vec<OperationMessage> = pending.drain(..take).collect();
        Reserved {
            messages,
            db: self.db.clone(),
            pubsub: Arc::clone(&self.pubsub),
            config: self.config.clone(),
        }
    }

    /// Number of messages currently held by this node.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

/// A batch of reserved messages awaiting settlement.
pub struct Reserved<DB, P> {
    messages: Vec<OperationMessage>,
    db: DB,
    pubsub: Arc<P>,
    config: QueueConfig,
}

impl<DB, P> Reserved<DB, P>
where
    DB: Store,
    P: PubSub,
{
    pub fn messages(&self) -> &[OperationMessage] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Settle the reservation: the messages are done and leave the queue.
    pub async fn ack(self) -> Result<(), Error> {
        for message in &self.messages {
            self.db.delete(inflight_key(&message.id))?;
        }
        Ok(())
    }

    /// Return the messages to the broker with an incremented retry count.
    pub async fn nack(self) -> Result<(), Error> {
        for mut message in self.messages {
            self.db.delete(inflight_key(&message.id))?;
            message.retry_count += 1;
            requeue(&self.db, self.pubsub.as_ref(), &self.config, message).await?;
        }
        Ok(())
    }
}

fn inflight_key(id: &Uuid) -> Vec<u8> {
    format!("{INFLIGHT_PREFIX}{id}").into_bytes()
}

/// Re-publish with back-off, or drop with an error record once the retry
/// budget is exhausted.
async fn requeue<DB: Store, P: PubSub + ?Sized>(
    db: &DB,
    pubsub: &P,
    config: &QueueConfig,
    message: OperationMessage,
) -> Result<(), Error> {
    if message.retry_count > config.max_retries {
        error!(id = %message.id, suffix = %message.operation.unique_suffix,
            retries = message.retry_count, "dropping operation after max retries");
        db.write_obj(
            format!("{ERROR_PREFIX}{}", message.id).into_bytes(),
            &message,
        )?;
        return Ok(());
    }
    let delay = config.backoff(message.retry_count.saturating_sub(1));
    pubsub
        .publish_after(&config.topic, serde_json::to_vec(&message)?, delay)
        .await
}

async fn sweep_expired<DB: Store, P: PubSub + ?Sized>(
    db: &DB,
    pubsub: &P,
    config: &QueueConfig,
) -> Result<(), Error> {
    let now = Utc::now();
    for (key, value) in db.scan_prefix(INFLIGHT_PREFIX.as_bytes())? {
        let record: InflightRecord = match serde_json::from_slice(&value) {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "dropping unreadable in-flight record");
                db.delete(&key)?;
                continue;
            }
        };
        if record.next_retry > now {
            continue;
        }
        db.delete(&key)?;
        let mut message = record.message;
        message.retry_count += 1;
        debug!(id = %message.id, retries = message.retry_count, "lease expired, re-publishing");
        requeue(db, pubsub, config, message).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryPubSub;
    use orb_db::MemoryDB;
    use orb_types::OperationType;

    fn operation(suffix: &str) -> Operation {
        Operation {
            unique_suffix: suffix.to_string(),
            operation_type: OperationType::Create,
            operation_request: b"payload".to_vec(),
            anchor_origin: "https://orb.domain1.com".to_string(),
            protocol_version: 1,
        }
    }

    fn fast_config() -> QueueConfig {
        QueueConfig {
            task_monitor_interval: Duration::from_millis(20),
            retries_initial_delay: Duration::from_millis(5),
            retries_max_delay: Duration::from_millis(20),
            // long enough that leases never expire mid-test
            lease: Duration::from_secs(5),
            ..Default::default()
        }
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn add_then_remove_and_ack() {
        let db = MemoryDB::default();
        let queue = OperationQueue::new(db.clone(), Arc::new(MemoryPubSub::new()), fast_config());
        let cancel = CancellationToken::new();
        queue.start(cancel.clone()).await.unwrap();

        queue.add(operation("EiDone"), 1).await.unwrap();
        queue.add(operation("EiDtwo"), 1).await.unwrap();
        wait_for(|| queue.len() == 2).await;

        assert_eq!(queue.peek(1).len(), 1);
        assert_eq!(queue.len(), 2, "peek must not remove");

        let reserved = queue.remove(10);
        assert_eq!(reserved.messages().len(), 2);
        assert_eq!(queue.len(), 0);
        reserved.ack().await.unwrap();

        // acked messages leave the in-flight index, so the sweep never
        // re-publishes them
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(queue.len(), 0);
        assert!(db.scan_prefix(INFLIGHT_PREFIX.as_bytes()).unwrap().is_empty());
        cancel.cancel();
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_retry() {
        let queue = OperationQueue::new(
            MemoryDB::default(),
            Arc::new(MemoryPubSub::new()),
            fast_config(),
        );
        let cancel = CancellationToken::new();
        queue.start(cancel.clone()).await.unwrap();

        queue.add(operation("EiDone"), 1).await.unwrap();
        wait_for(|| queue.len() == 1).await;

        queue.remove(1).nack().await.unwrap();
        wait_for(|| queue.len() == 1).await;
        assert_eq!(queue.peek(1)[0].retry_count, 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered_by_monitor() {
        let config = QueueConfig {
            lease: Duration::from_millis(50),
            ..fast_config()
        };
        let queue = OperationQueue::new(MemoryDB::default(), Arc::new(MemoryPubSub::new()), config);
        let cancel = CancellationToken::new();
        queue.start(cancel.clone()).await.unwrap();

        queue.add(operation("EiDone"), 1).await.unwrap();
        wait_for(|| queue.len() == 1).await;

        // reserve without settling; drop the reservation on the floor
        let reserved = queue.remove(1);
        assert_eq!(reserved.messages().len(), 1);
        drop(reserved);

        // monitor sweeps the expired lease and re-publishes
        wait_for(|| queue.len() == 1).await;
        assert!(queue.peek(1)[0].retry_count >= 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn exceeding_max_retries_drops_with_error_record() {
        let db = MemoryDB::default();
        let config = QueueConfig {
            max_retries: 1,
            ..fast_config()
        };
        let queue = OperationQueue::new(db.clone(), Arc::new(MemoryPubSub::new()), config);
        let cancel = CancellationToken::new();
        queue.start(cancel.clone()).await.unwrap();

        queue.add(operation("EiDone"), 1).await.unwrap();
        wait_for(|| queue.len() == 1).await;
        queue.remove(1).nack().await.unwrap(); // retry 1
        wait_for(|| queue.len() == 1).await;
        queue.remove(1).nack().await.unwrap(); // retry 2 > max, dropped

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(queue.len(), 0);
        assert_eq!(db.scan_prefix(ERROR_PREFIX.as_bytes()).unwrap().len(), 1);
        cancel.cancel();
    }
}
