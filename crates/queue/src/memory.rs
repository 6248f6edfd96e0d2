//! In-process queue with SQS-like visibility semantics.
//!
//! Timing uses [`tokio::time::Instant`], so tests can drive delays and
//! visibility expiry with `tokio::time::pause` / `advance`.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::queue::{DurableQueue, QueueHealth, QueueMessage};

struct Entry {
    id: String,
    body: String,
    sent_at: DateTime<Utc>,
    visible_at: Instant,
    receive_count: u32,
    receipt: Option<String>,
}

#[derive(Default)]
struct Inner {
    entries: Vec<Entry>,
    dead_letters: Vec<String>,
}

pub struct MemoryQueue {
    name: String,
    visibility_timeout: Duration,
    /// Messages received this many times without an ack are dead-lettered.
    max_receives: Option<u32>,
    inner: Mutex<Inner>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>, visibility_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            visibility_timeout,
            max_receives: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn with_max_receives(mut self, max_receives: u32) -> Self {
        self.max_receives = Some(max_receives);
        self
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, QueueError> {
        self.inner
            .lock()
            .map_err(|_| QueueError::Provider(format!("queue {} lock poisoned", self.name)))
    }

    /// Messages stored, visible or not.
    pub fn len(&self) -> usize {
        self.lock().map(|inner| inner.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages that a `receive` right now would return.
    pub fn visible_len(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .map(|inner| inner.entries.iter().filter(|e| e.visible_at <= now).count())
            .unwrap_or(0)
    }

    /// Bodies of every stored message, in send order.
    pub fn peek_bodies(&self) -> Vec<String> {
        self.lock()
            .map(|inner| inner.entries.iter().map(|e| e.body.clone()).collect())
            .unwrap_or_default()
    }

    pub fn dead_letters(&self) -> Vec<String> {
        self.lock()
            .map(|inner| inner.dead_letters.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DurableQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, body: String, delay: Duration) -> Result<String, QueueError> {
        let id = Uuid::new_v4().to_string();
        let mut inner = self.lock()?;
        inner.entries.push(Entry {
            id: id.clone(),
            body,
            sent_at: Utc::now(),
            visible_at: Instant::now() + delay,
            receive_count: 0,
            receipt: None,
        });
        debug!(queue = %self.name, message_id = %id, delay_ms = delay.as_millis() as u64, "Enqueued");
        Ok(id)
    }

    async fn receive(&self, max_messages: u32) -> Result<Vec<QueueMessage>, QueueError> {
        let now = Instant::now();
        let mut guard = self.lock()?;
        let inner = &mut *guard;

        if let Some(max) = self.max_receives {
            let (dead, live): (Vec<Entry>, Vec<Entry>) = std::mem::take(&mut inner.entries)
                .into_iter()
                .partition(|e| e.visible_at <= now && e.receive_count >= max);
            inner.entries = live;
            for entry in dead {
                warn!(queue = %self.name, message_id = %entry.id, receives = entry.receive_count, "Dead-lettering message");
                inner.dead_letters.push(entry.body);
            }
        }

        let mut out = Vec::new();
        for entry in inner.entries.iter_mut() {
            if out.len() as u32 >= max_messages {
                break;
            }
            if entry.visible_at > now {
                continue;
            }
            let receipt = Uuid::new_v4().to_string();
            entry.receive_count += 1;
            entry.visible_at = now + self.visibility_timeout;
            entry.receipt = Some(receipt.clone());
            out.push(QueueMessage {
                id: entry.id.clone(),
                body: entry.body.clone(),
                receipt_handle: receipt,
                timestamp: entry.sent_at,
                attempt_count: entry.receive_count,
            });
        }
        Ok(out)
    }

    async fn ack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let before = inner.entries.len();
        inner
            .entries
            .retain(|e| e.receipt.as_deref() != Some(receipt_handle));
        if inner.entries.len() == before {
            // Visibility expired and the message was handed to another receiver.
            return Err(QueueError::Ack(format!("stale receipt handle on {}", self.name)));
        }
        Ok(())
    }

    async fn nack(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let entry = inner
            .entries
            .iter_mut()
            .find(|e| e.receipt.as_deref() == Some(receipt_handle))
            .ok_or_else(|| QueueError::Ack(format!("stale receipt handle on {}", self.name)))?;
        entry.visible_at = Instant::now();
        entry.receipt = None;
        Ok(())
    }

    async fn health_check(&self) -> Result<QueueHealth, QueueError> {
        Ok(QueueHealth {
            connected: true,
            approximate_message_count: Some(self.visible_len() as u64),
            provider: "memory".to_string(),
        })
    }

    async fn dlq_depth(&self) -> Result<Option<u64>, QueueError> {
        Ok(self.max_receives.map(|_| self.dead_letters().len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> MemoryQueue {
        MemoryQueue::new("test", Duration::from_secs(30))
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_message_becomes_visible_after_delay() {
        let q = queue();
        q.send("late".into(), Duration::from_secs(60)).await.unwrap();

        assert!(q.receive(10).await.unwrap().is_empty());
        tokio::time::advance(Duration::from_secs(61)).await;

        let got = q.receive(10).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].body, "late");
        assert_eq!(got[0].attempt_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_message_is_redelivered_after_visibility_timeout() {
        let q = queue();
        q.send("m".into(), Duration::ZERO).await.unwrap();

        let first = q.receive(1).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(q.receive(1).await.unwrap().is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        let second = q.receive(1).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, first[0].id);
        assert_eq!(second[0].attempt_count, 2);

        // The first receipt lost its claim.
        assert!(q.ack(&first[0].receipt_handle).await.is_err());
        q.ack(&second[0].receipt_handle).await.unwrap();
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn nack_makes_message_visible_immediately() {
        let q = queue();
        q.send("m".into(), Duration::ZERO).await.unwrap();
        let got = q.receive(1).await.unwrap();
        q.nack(&got[0].receipt_handle).await.unwrap();
        assert_eq!(q.visible_len(), 1);
    }

    #[tokio::test]
    async fn receive_respects_batch_size() {
        let q = queue();
        for i in 0..5 {
            q.send(format!("m{i}"), Duration::ZERO).await.unwrap();
        }
        assert_eq!(q.receive(3).await.unwrap().len(), 3);
        assert_eq!(q.receive(3).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn repeated_nacks_dead_letter_the_message() {
        let q = queue().with_max_receives(2);
        q.send("poison".into(), Duration::ZERO).await.unwrap();
        for _ in 0..2 {
            let got = q.receive(1).await.unwrap();
            q.nack(&got[0].receipt_handle).await.unwrap();
        }
        assert!(q.receive(1).await.unwrap().is_empty());
        assert_eq!(q.dead_letters(), vec!["poison".to_string()]);
        assert_eq!(q.dlq_depth().await.unwrap(), Some(1));
    }
}
