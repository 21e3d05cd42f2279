//! Routes index messages to each strategy's queue.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

use trovesearch_core::messages::{IndexMessage, MessageType, MessagesChunk};
use trovesearch_core::strategy::selection::StrategyRegistry;

use crate::queue::{MemoryQueue, MessageQueue, SqliteQueue};

struct QueueRoute {
    strategy_name: String,
    message_types: Vec<MessageType>,
    queue: Arc<dyn MessageQueue>,
}

#[derive(Clone)]
pub struct IndexMessenger {
    routes: Arc<Vec<QueueRoute>>,
}

impl IndexMessenger {
    /// One queue per strategy, built by `make_queue(strategy_name)`.
    pub fn new<F>(registry: &StrategyRegistry, make_queue: F) -> Self
    where
        F: Fn(&str) -> Arc<dyn MessageQueue>,
    {
        let routes = registry
            .each_strategy()
            .map(|managed| QueueRoute {
                strategy_name: managed.strategy_name().to_string(),
                message_types: managed.supported_message_types().to_vec(),
                queue: make_queue(managed.strategy_name()),
            })
            .collect();
        Self {
            routes: Arc::new(routes),
        }
    }

    pub fn sqlite(registry: &StrategyRegistry, pool: &SqlitePool) -> Self {
        Self::new(registry, |name| {
            Arc::new(SqliteQueue::new(pool.clone(), name)) as Arc<dyn MessageQueue>
        })
    }

    pub fn in_memory(registry: &StrategyRegistry) -> Self {
        Self::new(registry, |_| Arc::new(MemoryQueue::new()) as Arc<dyn MessageQueue>)
    }

    pub fn queue_for(&self, strategy_name: &str) -> Option<Arc<dyn MessageQueue>> {
        self.routes
            .iter()
            .find(|route| route.strategy_name == strategy_name)
            .map(|route| route.queue.clone())
    }

    /// Publish to every strategy that accepts the chunk's message type.
    pub async fn send_messages_chunk(&self, chunk: &MessagesChunk) -> Result<()> {
        let messages: Vec<IndexMessage> = chunk.as_messages().collect();
        for route in self
            .routes
            .iter()
            .filter(|route| route.message_types.contains(&chunk.message_type))
        {
            route.queue.publish(&messages).await?;
            debug!(
                strategy = %route.strategy_name,
                message_type = %chunk.message_type,
                count = messages.len(),
                "published"
            );
        }
        Ok(())
    }

    pub async fn notify_indexcard_update(&self, indexcard_uuids: &[String]) -> Result<()> {
        self.send_messages_chunk(&MessagesChunk::new(
            MessageType::UpdateIndexcard,
            indexcard_uuids.to_vec(),
        ))
        .await
    }

    /// Publish `target_ids` to one strategy's queue, `chunk_size` at a time.
    pub async fn stream_message_chunks(
        &self,
        strategy_name: &str,
        message_type: MessageType,
        target_ids: Vec<String>,
        chunk_size: usize,
    ) -> Result<usize> {
        let queue = self
            .queue_for(strategy_name)
            .with_context(|| format!("no queue for strategy {strategy_name}"))?;
        let total = target_ids.len();
        for chunk in MessagesChunk::new(message_type, target_ids).chunked(chunk_size) {
            let messages: Vec<IndexMessage> = chunk.as_messages().collect();
            queue.publish(&messages).await?;
        }
        Ok(total)
    }
}
