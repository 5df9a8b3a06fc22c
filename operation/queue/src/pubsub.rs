use crate::Error;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

/// Message broker capability. Topics have queue semantics: subscribers to
/// the same topic compete for messages, which is what lets several node
/// instances share one operation queue.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), Error>;

    /// Publish `data` to `topic` after `delay`. Used for retry back-off.
    async fn publish_after(&self, topic: &str, data: Vec<u8>, delay: Duration)
        -> Result<(), Error>;

    async fn subscribe(&self, topic: &str) -> Result<flume::Receiver<Vec<u8>>, Error>;

    async fn health_check(&self) -> Result<(), Error>;
}

/// In-process broker over flume channels. Messages published to a topic
/// with no subscriber yet are buffered until one arrives.
#[derive(Default)]
pub struct MemoryPubSub {
    topics: Mutex<HashMap<String, (flume::Sender<Vec<u8>>, flume::Receiver<Vec<u8>>)>>,
}

impl MemoryPubSub {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, topic: &str) -> (flume::Sender<Vec<u8>>, flume::Receiver<Vec<u8>>) {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(flume::unbounded)
            .clone()
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn publish(&self, topic: &str, data: Vec<u8>) -> Result<(), Error> {
        let (sender, _) = self.channel(topic);
        sender
            .send_async(data)
            .await
            .map_err(|e| Error::Broker(e.to_string()))
    }

    async fn publish_after(
        &self,
        topic: &str,
        data: Vec<u8>,
        delay: Duration,
    ) -> Result<(), Error> {
        let (sender, _) = self.channel(topic);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // receiver side may be gone on shutdown; nothing to deliver to
            let _ = sender.send_async(data).await;
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<flume::Receiver<Vec<u8>>, Error> {
        let (_, receiver) = self.channel(topic);
        Ok(receiver)
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
