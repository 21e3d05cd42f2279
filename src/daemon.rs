//! Indexing daemons: consume a strategy's queue and keep its live indexes current.
//!
//! Each [`IndexerDaemon`] buffers received messages by type and flushes a
//! buffer when it fills up or when its flush interval has elapsed. Only
//! messages confirmed written are acked; failed ones are requeued for
//! redelivery. Consecutive whole-batch failures back off exponentially and
//! become fatal after `retry_max_attempts`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use trovesearch_core::messages::{MessageType, MessagesChunk};
use trovesearch_core::strategy::selection::StrategyRegistry;
use trovesearch_core::strategy::ManagedStrategy;

use crate::config::DaemonConfig;
use crate::messenger::IndexMessenger;
use crate::queue::{Delivery, MessageQueue};

/// Counts reported when a daemon stops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonStats {
    pub messages_done: u64,
    pub messages_requeued: u64,
    pub messages_dropped: u64,
    pub flushes: u64,
    pub failed_flushes: u64,
}

struct Buffer {
    deliveries: Vec<Delivery>,
    last_flush: Instant,
}

impl Buffer {
    fn new() -> Self {
        Self {
            deliveries: Vec::new(),
            last_flush: Instant::now(),
        }
    }
}

pub struct IndexerDaemon {
    managed: Arc<ManagedStrategy>,
    queue: Arc<dyn MessageQueue>,
    config: DaemonConfig,
    stats: DaemonStats,
}

impl IndexerDaemon {
    pub fn new(
        managed: Arc<ManagedStrategy>,
        queue: Arc<dyn MessageQueue>,
        config: DaemonConfig,
    ) -> Self {
        Self {
            managed,
            queue,
            config,
            stats: DaemonStats::default(),
        }
    }

    /// Run until `stop` becomes true, then flush every buffer and return.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) -> Result<DaemonStats> {
        let strategy = self.managed.strategy_name().to_string();
        info!(strategy = %strategy, "indexer daemon started");
        let mut buffers: BTreeMap<MessageType, Buffer> = BTreeMap::new();
        let mut failures: u32 = 0;

        loop {
            if *stop.borrow() {
                break;
            }
            let received = tokio::select! {
                received = self.queue.receive(self.config.max_batch_size, self.config.receive_timeout()) => received,
                changed = stop.changed() => {
                    // a dropped sender also means stop
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };
            match received {
                Ok(deliveries) => {
                    for delivery in deliveries {
                        buffers
                            .entry(delivery.message.message_type)
                            .or_insert_with(Buffer::new)
                            .deliveries
                            .push(delivery);
                    }
                }
                Err(err) => {
                    failures = self.record_failure(&strategy, failures, &err)?;
                    self.backoff(failures, &mut stop).await;
                    continue;
                }
            }

            let mut batch_failed = None;
            for (message_type, buffer) in buffers.iter_mut() {
                let full = buffer.deliveries.len() >= self.config.max_batch_size;
                let due = !buffer.deliveries.is_empty()
                    && buffer.last_flush.elapsed() >= self.config.flush_interval();
                if full || due {
                    if let Err(err) = self.flush(*message_type, buffer).await {
                        batch_failed = Some(err);
                    }
                }
            }
            match batch_failed {
                Some(err) => {
                    failures = self.record_failure(&strategy, failures, &err)?;
                    self.backoff(failures, &mut stop).await;
                }
                None => failures = 0,
            }
        }

        for (message_type, buffer) in buffers.iter_mut() {
            if let Err(err) = self.flush(*message_type, buffer).await {
                error!(strategy = %strategy, error = %err, "final flush failed; messages requeued");
            }
        }
        info!(strategy = %strategy, stats = ?self.stats, "indexer daemon stopped");
        Ok(self.stats)
    }

    fn record_failure(&mut self, strategy: &str, failures: u32, err: &anyhow::Error) -> Result<u32> {
        let failures = failures + 1;
        error!(strategy, attempt = failures, error = %err, "indexing batch failed");
        if failures >= self.config.retry_max_attempts {
            bail!(
                "indexer daemon for {} giving up after {} consecutive failures: {}",
                strategy,
                failures,
                err
            );
        }
        Ok(failures)
    }

    async fn backoff(&self, failures: u32, stop: &mut watch::Receiver<bool>) {
        let delay = self.config.retry_delay(failures.saturating_sub(1));
        debug!(delay_ms = delay.as_millis() as u64, "backing off");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stop.changed() => {}
        }
    }

    /// Hand the buffer to the strategy, ack what was written, requeue the rest.
    ///
    /// An `Err` means the whole batch was requeued.
    async fn flush(&mut self, message_type: MessageType, buffer: &mut Buffer) -> Result<()> {
        buffer.last_flush = Instant::now();
        if buffer.deliveries.is_empty() {
            return Ok(());
        }
        let deliveries = std::mem::take(&mut buffer.deliveries);
        self.stats.flushes += 1;

        let all_tags: Vec<i64> = deliveries.iter().map(|d| d.tag).collect();
        if self.managed.assert_message_type(message_type).is_err() {
            warn!(
                strategy = self.managed.strategy_name(),
                %message_type,
                count = all_tags.len(),
                "dropping unsupported messages"
            );
            self.queue.ack(&all_tags).await?;
            self.stats.messages_dropped += all_tags.len() as u64;
            return Ok(());
        }

        let mut tags_by_target: HashMap<String, Vec<i64>> = HashMap::new();
        for delivery in &deliveries {
            tags_by_target
                .entry(delivery.message.target_id.clone())
                .or_default()
                .push(delivery.tag);
        }
        let chunk = MessagesChunk::new(
            message_type,
            deliveries
                .iter()
                .map(|d| d.message.target_id.clone())
                .collect(),
        );

        let responses = match self.managed.pls_handle_messages_chunk(&chunk).await {
            Ok(responses) => responses,
            Err(err) => {
                self.queue.requeue(&all_tags).await?;
                self.stats.failed_flushes += 1;
                self.stats.messages_requeued += all_tags.len() as u64;
                return Err(err);
            }
        };

        let mut done = Vec::new();
        for response in &responses {
            let Some(tags) = tags_by_target.remove(&response.index_message.target_id) else {
                continue;
            };
            if response.is_done {
                done.extend(tags);
            } else {
                debug!(
                    target = %response.index_message.target_id,
                    status = response.status_code,
                    error = response.error_text.as_deref().unwrap_or_default(),
                    "message not done; requeueing"
                );
                self.queue.requeue(&tags).await?;
                self.stats.messages_requeued += tags.len() as u64;
            }
        }
        // no response at all: leave for redelivery
        let unanswered: Vec<i64> = tags_by_target.into_values().flatten().collect();
        if !unanswered.is_empty() {
            self.queue.requeue(&unanswered).await?;
            self.stats.messages_requeued += unanswered.len() as u64;
        }
        self.queue.ack(&done).await?;
        self.stats.messages_done += done.len() as u64;
        debug!(
            strategy = self.managed.strategy_name(),
            %message_type,
            done = done.len(),
            total = all_tags.len(),
            "flushed"
        );
        Ok(())
    }
}

/// One running daemon per strategy.
pub struct DaemonSet {
    stop: watch::Sender<bool>,
    handles: Vec<(String, JoinHandle<Result<DaemonStats>>)>,
}

impl DaemonSet {
    pub fn start(registry: &StrategyRegistry, messenger: &IndexMessenger, config: &DaemonConfig) -> Result<Self> {
        let (stop, stop_rx) = watch::channel(false);
        let mut handles = Vec::new();
        for managed in registry.each_strategy() {
            let Some(queue) = messenger.queue_for(managed.strategy_name()) else {
                bail!("no queue for strategy {}", managed.strategy_name());
            };
            let daemon = IndexerDaemon::new(managed.clone(), queue, config.clone());
            handles.push((
                managed.strategy_name().to_string(),
                tokio::spawn(daemon.run(stop_rx.clone())),
            ));
        }
        Ok(Self { stop, handles })
    }

    pub fn stop(&self) {
        // receivers may already be gone if every daemon failed
        let _ = self.stop.send(true);
    }

    /// Wait for every daemon; the first failure is returned after all have finished.
    pub async fn join(self) -> Result<Vec<(String, DaemonStats)>> {
        let mut all_stats = Vec::new();
        let mut first_err = None;
        for (name, handle) in self.handles {
            match handle.await {
                Ok(Ok(stats)) => all_stats.push((name, stats)),
                Ok(Err(err)) => {
                    error!(strategy = %name, error = %err, "indexer daemon failed");
                    first_err.get_or_insert(err);
                }
                Err(join_err) => {
                    error!(strategy = %name, error = %join_err, "indexer daemon panicked");
                    first_err.get_or_insert(join_err.into());
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(all_stats),
        }
    }

    /// Stop and join.
    pub async fn shutdown(self) -> Result<Vec<(String, DaemonStats)>> {
        self.stop();
        self.join().await
    }
}
