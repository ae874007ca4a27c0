//! Bounded per-topic message buffer
//!
//! Consumer workers push raw payloads; dequeue calls poll them out. Pushing into
//! a full buffer waits until a slot frees, which throttles the workers.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};

use super::error::QueueError;

/// Bounded FIFO of raw payloads for one topic
#[derive(Debug)]
pub struct TopicBuffer {
    topic: String,
    tx: mpsc::Sender<String>,
    rx: Mutex<mpsc::Receiver<String>>,
    buffered: AtomicUsize,
}

/// A reserved buffer slot
///
/// The slot only counts towards [`TopicBuffer::len`] once a payload is sent
/// through it. Dropping it unused frees the slot.
pub struct BufferSlot<'a> {
    permit: mpsc::Permit<'a, String>,
    buffered: &'a AtomicUsize,
}

impl BufferSlot<'_> {
    /// Fill the slot with `value`
    pub fn send(self, value: String) {
        self.buffered.fetch_add(1, Ordering::AcqRel);
        self.permit.send(value);
    }
}

impl TopicBuffer {
    /// Create a buffer holding at most `capacity` payloads (minimum 1)
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            topic: topic.into(),
            tx,
            rx: Mutex::new(rx),
            buffered: AtomicUsize::new(0),
        }
    }

    /// Topic served by this buffer
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Append `value`, waiting while the buffer is full
    pub async fn push(&self, value: String) -> Result<(), QueueError> {
        self.reserve().await?.send(value);
        Ok(())
    }

    /// Wait for a free slot
    ///
    /// Cancelling the returned future loses nothing, so it can be raced against a
    /// shutdown signal while the payload is still held by the caller.
    pub async fn reserve(&self) -> Result<BufferSlot<'_>, QueueError> {
        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| QueueError::BufferClosed(self.topic.clone()))?;
        Ok(BufferSlot {
            permit,
            buffered: &self.buffered,
        })
    }

    /// Append `value` if a slot is free, handing it back otherwise
    pub fn try_push(&self, value: String) -> Result<(), String> {
        match self.tx.try_reserve() {
            Ok(permit) => {
                BufferSlot {
                    permit,
                    buffered: &self.buffered,
                }
                .send(value);
                Ok(())
            }
            Err(_) => Err(value),
        }
    }

    /// Take the oldest payload, waiting up to `timeout`
    pub async fn poll(&self, timeout: Duration) -> Option<String> {
        tokio::time::timeout(timeout, async {
            let mut rx = self.rx.lock().await;
            let value = rx.recv().await;
            if value.is_some() {
                self.buffered.fetch_sub(1, Ordering::AcqRel);
            }
            value
        })
        .await
        .ok()
        .flatten()
    }

    /// Remove and return everything currently buffered
    pub async fn drain(&self) -> Vec<String> {
        let mut rx = self.rx.lock().await;
        let mut drained = Vec::new();
        while let Ok(value) = rx.try_recv() {
            self.buffered.fetch_sub(1, Ordering::AcqRel);
            drained.push(value);
        }
        drained
    }

    /// Payloads currently buffered
    ///
    /// Slots that are reserved but not yet filled are not counted.
    pub fn len(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered payloads
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let buffer = TopicBuffer::new("t", 4);
        buffer.push("a".to_string()).await.unwrap();
        buffer.push("b".to_string()).await.unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.poll(Duration::from_millis(10)).await.as_deref(), Some("a"));
        assert_eq!(buffer.poll(Duration::from_millis(10)).await.as_deref(), Some("b"));
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_poll_times_out_when_empty() {
        let buffer = TopicBuffer::new("t", 1);
        assert_eq!(buffer.poll(Duration::from_millis(20)).await, None);
    }

    #[tokio::test]
    async fn test_push_waits_until_slot_frees() {
        let buffer = Arc::new(TopicBuffer::new("t", 1));
        buffer.push("first".to_string()).await.unwrap();
        assert_eq!(buffer.try_push("rejected".to_string()), Err("rejected".to_string()));

        let pusher = {
            let buffer = buffer.clone();
            tokio::spawn(async move { buffer.push("second".to_string()).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pusher.is_finished());
        assert_eq!(buffer.len(), 1);

        assert_eq!(buffer.poll(Duration::from_millis(10)).await.as_deref(), Some("first"));
        pusher.await.unwrap().unwrap();
        assert_eq!(buffer.poll(Duration::from_millis(100)).await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_reserved_slot_is_not_counted_until_sent() {
        let buffer = TopicBuffer::new("t", 2);
        let slot = buffer.reserve().await.unwrap();
        assert_eq!(buffer.len(), 0);
        assert!(buffer.is_empty());

        slot.send("a".to_string());
        assert_eq!(buffer.len(), 1);

        let unused = buffer.reserve().await.unwrap();
        assert_eq!(buffer.try_push("full".to_string()), Err("full".to_string()));
        assert_eq!(buffer.len(), 1);
        drop(unused);

        buffer.try_push("b".to_string()).unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.drain().await, vec!["a", "b"]);
        assert_eq!(buffer.len(), 0);
    }

    #[tokio::test]
    async fn test_drain_empties_buffer() {
        let buffer = TopicBuffer::new("t", 8);
        for i in 0..5 {
            buffer.push(i.to_string()).await.unwrap();
        }
        assert_eq!(buffer.drain().await, vec!["0", "1", "2", "3", "4"]);
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 8);
    }
}
