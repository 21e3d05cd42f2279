//! Message queues feeding the indexing daemons.
//!
//! Delivery is at-least-once: a received message stays claimed until it is
//! acked (gone) or requeued (visible again). Each strategy consumes its own
//! named queue.
//!
//! | Implementation | Backing |
//! |----------------|---------|
//! | [`SqliteQueue`] | `search_message` rows; stale claims are reclaimed |
//! | [`MemoryQueue`] | `tokio::sync::Mutex` + `Notify`, for tests and single-process use |

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::warn;

use trovesearch_core::messages::IndexMessage;

/// How often an idle [`SqliteQueue::receive`] polls.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A received message and the tag that acks or requeues it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: i64,
    pub message: IndexMessage,
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn publish(&self, messages: &[IndexMessage]) -> Result<()>;

    /// Up to `max` messages; waits at most `timeout` for the first one.
    async fn receive(&self, max: usize, timeout: Duration) -> Result<Vec<Delivery>>;

    async fn ack(&self, tags: &[i64]) -> Result<()>;

    async fn requeue(&self, tags: &[i64]) -> Result<()>;

    /// Messages not yet acked, claimed or not.
    async fn pending_count(&self) -> Result<u64>;
}

pub struct SqliteQueue {
    pool: SqlitePool,
    queue_name: String,
    visibility_timeout: Duration,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool, queue_name: impl Into<String>) -> Self {
        Self {
            pool,
            queue_name: queue_name.into(),
            visibility_timeout: Duration::from_secs(300),
        }
    }

    /// Claims older than this are handed out again.
    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    async fn claim(&self, max: usize) -> Result<Vec<Delivery>> {
        let now = Utc::now().timestamp();
        let stale_before = now - self.visibility_timeout.as_secs() as i64;
        let rows = sqlx::query(
            r#"
            UPDATE search_message SET claimed_at = ?
            WHERE id IN (
                SELECT id FROM search_message
                WHERE queue_name = ? AND (claimed_at IS NULL OR claimed_at < ?)
                ORDER BY id
                LIMIT ?
            )
            RETURNING id, message_type, target_id
            "#,
        )
        .bind(now)
        .bind(&self.queue_name)
        .bind(stale_before)
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut deliveries = Vec::with_capacity(rows.len());
        for row in rows {
            let tag: i64 = row.get("id");
            let message_type: String = row.get("message_type");
            match message_type.parse() {
                Ok(message_type) => deliveries.push(Delivery {
                    tag,
                    message: IndexMessage::new(message_type, row.get::<String, _>("target_id")),
                }),
                Err(err) => {
                    warn!(queue = %self.queue_name, tag, error = %err, "dropping unreadable message");
                    self.ack(&[tag]).await?;
                }
            }
        }
        deliveries.sort_by_key(|d| d.tag);
        Ok(deliveries)
    }
}

#[async_trait]
impl MessageQueue for SqliteQueue {
    async fn publish(&self, messages: &[IndexMessage]) -> Result<()> {
        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;
        for message in messages {
            sqlx::query(
                "INSERT INTO search_message (queue_name, message_type, target_id, created_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&self.queue_name)
            .bind(message.message_type.as_str())
            .bind(&message.target_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn receive(&self, max: usize, timeout: Duration) -> Result<Vec<Delivery>> {
        let deadline = Instant::now() + timeout;
        loop {
            let deliveries = self.claim(max).await?;
            if !deliveries.is_empty() {
                return Ok(deliveries);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn ack(&self, tags: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for tag in tags {
            sqlx::query("DELETE FROM search_message WHERE id = ?")
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn requeue(&self, tags: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for tag in tags {
            sqlx::query("UPDATE search_message SET claimed_at = NULL WHERE id = ?")
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM search_message WHERE queue_name = ?")
            .bind(&self.queue_name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[derive(Default)]
struct MemoryState {
    next_tag: i64,
    ready: VecDeque<Delivery>,
    claimed: BTreeMap<i64, IndexMessage>,
}

#[derive(Default)]
pub struct MemoryQueue {
    state: Mutex<MemoryState>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageQueue for MemoryQueue {
    async fn publish(&self, messages: &[IndexMessage]) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            for message in messages {
                state.next_tag += 1;
                let tag = state.next_tag;
                state.ready.push_back(Delivery {
                    tag,
                    message: message.clone(),
                });
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, max: usize, timeout: Duration) -> Result<Vec<Delivery>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().await;
                if !state.ready.is_empty() {
                    let take = max.min(state.ready.len());
                    let deliveries: Vec<Delivery> = state.ready.drain(..take).collect();
                    for delivery in &deliveries {
                        state.claimed.insert(delivery.tag, delivery.message.clone());
                    }
                    return Ok(deliveries);
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn ack(&self, tags: &[i64]) -> Result<()> {
        let mut state = self.state.lock().await;
        for tag in tags {
            state.claimed.remove(tag);
        }
        Ok(())
    }

    async fn requeue(&self, tags: &[i64]) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            let mut returned: Vec<Delivery> = tags
                .iter()
                .filter_map(|tag| {
                    state.claimed.remove(tag).map(|message| Delivery { tag: *tag, message })
                })
                .collect();
            returned.sort_by_key(|d| d.tag);
            for delivery in returned.into_iter().rev() {
                state.ready.push_front(delivery);
            }
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64> {
        let state = self.state.lock().await;
        Ok((state.ready.len() + state.claimed.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use trovesearch_core::messages::MessageType;

    fn update(target: &str) -> IndexMessage {
        IndexMessage::new(MessageType::UpdateIndexcard, target)
    }

    async fn exercise_queue(queue: &dyn MessageQueue) {
        queue
            .publish(&[update("a"), update("b"), update("c")])
            .await
            .unwrap();
        let first = queue.receive(2, Duration::from_millis(50)).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].message.target_id, "a");

        let rest = queue.receive(10, Duration::from_millis(50)).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert!(queue
            .receive(10, Duration::from_millis(20))
            .await
            .unwrap()
            .is_empty());

        queue.ack(&[first[0].tag]).await.unwrap();
        queue.requeue(&[first[1].tag]).await.unwrap();
        let again = queue.receive(10, Duration::from_millis(50)).await.unwrap();
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].message.target_id, "b");
        assert_eq!(queue.pending_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_memory_queue_semantics() {
        exercise_queue(&MemoryQueue::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_queue_semantics() {
        let dir = tempfile::tempdir().unwrap();
        let pool = crate::db::connect_path(&dir.path().join("q.sqlite"))
            .await
            .unwrap();
        crate::migrate::migrate(&pool).await.unwrap();
        exercise_queue(&SqliteQueue::new(pool.clone(), "s")).await;

        // queues are isolated by name
        let other = SqliteQueue::new(pool, "other");
        assert_eq!(other.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_memory_receive_wakes_on_publish() {
        let queue = Arc::new(MemoryQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.receive(5, Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.publish(&[update("x")]).await.unwrap();
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got.len(), 1);
    }
}
