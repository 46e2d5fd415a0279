use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, mpsc};

use crate::error::{Error, Result};
use crate::frame::MessageData;

/// A handle to one subscription: its id, destination, and the receiving end
/// of the per-subscription sequence.
///
/// Dropping the handle does not unsubscribe at the broker; call
/// `Connection::unsubscribe` for that. Closing the connection closes the
/// sequence, after delivering a terminal `MessageData` carrying the error.
#[derive(Debug)]
pub struct Subscription {
    id: String,
    destination: String,
    receiver: mpsc::Receiver<MessageData>,
}

impl Subscription {
    pub(crate) fn new(
        id: String,
        destination: String,
        receiver: mpsc::Receiver<MessageData>,
    ) -> Self {
        Self {
            id,
            destination,
            receiver,
        }
    }

    /// The subscription id used for routing (and for `ack`/`unsubscribe`).
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// Next inbound item, or `None` once the sequence is closed.
    pub async fn recv(&mut self) -> Option<MessageData> {
        self.receiver.recv().await
    }

    /// Consume the handle and return the raw receiver.
    pub fn into_receiver(self) -> mpsc::Receiver<MessageData> {
        self.receiver
    }
}

/// Connection-local subscription registry: routing key to sequence sender.
///
/// The key is the subscription id for 1.1+; for 1.0, where MESSAGE frames
/// carry no `subscription` header, the destination serves as the key.
#[derive(Debug)]
pub(crate) struct Registry {
    entries: Mutex<HashMap<String, mpsc::Sender<MessageData>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate the next library-generated subscription id.
    pub(crate) fn generate_id(&self) -> String {
        self.next_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Register a routing key, failing on collision.
    pub(crate) async fn register(
        &self,
        key: &str,
        capacity: usize,
    ) -> Result<mpsc::Receiver<MessageData>> {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(key) {
            return Err(Error::DuplicateSubscriptionId);
        }
        let (tx, rx) = mpsc::channel(capacity);
        entries.insert(key.to_string(), tx);
        Ok(rx)
    }

    /// Sender for a routing key, for the reader to deliver on.
    pub(crate) async fn sender(&self, key: &str) -> Result<mpsc::Sender<MessageData>> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .cloned()
            .ok_or(Error::InvalidSubscriptionId)
    }

    /// Remove a routing key; dropping the sender closes the sequence.
    pub(crate) async fn unregister(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries
            .remove(key)
            .map(|_| ())
            .ok_or(Error::InvalidSubscriptionId)
    }

    /// Deliver a terminal error to every sequence and close them all.
    /// Best-effort: a saturated sequence is closed without the marker.
    pub(crate) async fn close_all(&self, error: Error) {
        let mut entries = self.entries.lock().await;
        for (_, tx) in entries.drain() {
            let _ = tx.try_send(MessageData::error(error.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_rejects_duplicate_id() {
        let reg = Registry::new();
        let _rx = reg.register("sub-1", 4).await.unwrap();
        assert_eq!(
            reg.register("sub-1", 4).await.err(),
            Some(Error::DuplicateSubscriptionId)
        );
    }

    #[tokio::test]
    async fn lookup_unknown_id_fails() {
        let reg = Registry::new();
        assert_eq!(
            reg.sender("nope").await.err(),
            Some(Error::InvalidSubscriptionId)
        );
    }

    #[tokio::test]
    async fn unregister_closes_sequence() {
        let reg = Registry::new();
        let mut rx = reg.register("sub-1", 4).await.unwrap();
        reg.unregister("sub-1").await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn close_all_delivers_terminal_error() {
        let reg = Registry::new();
        let mut rx = reg.register("sub-1", 4).await.unwrap();
        reg.close_all(Error::NotConnected).await;
        let md = rx.recv().await.unwrap();
        assert_eq!(md.error, Some(Error::NotConnected));
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn generated_ids_are_monotonic() {
        let reg = Registry::new();
        let a: u64 = reg.generate_id().parse().unwrap();
        let b: u64 = reg.generate_id().parse().unwrap();
        assert!(b > a);
    }
}
