use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::event_sourcing::core::{DeliveredEvent, LogPosition};

use super::event_store::{CheckpointStore, EventStore, EventStoreError};

// ============================================================================
// Persistent Subscription - durable, at-least-once delivery
// ============================================================================
//
// 1. Cursor is loaded from the checkpoint store when the subscription opens
// 2. The log is polled in batches into a bounded buffer
// 3. `ack` persists the position of a processed event
//
// Log positions are stamped by the writer before its batch commits, so an
// append can become visible behind events that were already read. Every
// poll re-reads a trailing `lookback` window below the highest position
// seen and drops event ids that were already delivered.
//
// Events fetched but not acked, and anything inside the window after a
// reopen, are delivered again, so consumers must tolerate redelivery.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    /// Upper bound of the in-memory delivery buffer
    pub batch_size: usize,
    /// Wait between polls when the log has nothing new
    pub poll_interval: Duration,
    /// How far behind the newest seen position late commits are picked up
    pub lookback: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
            lookback: Duration::from_secs(5),
        }
    }
}

pub struct PersistentSubscription {
    group: String,
    event_store: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    config: SubscriptionConfig,
    fetched_up_to: Option<LogPosition>,
    acked_up_to: Option<LogPosition>,
    buffer: VecDeque<DeliveredEvent>,
    /// Ids delivered inside the lookback window, with their log time
    delivered: HashMap<Uuid, DateTime<Utc>>,
}

impl PersistentSubscription {
    /// Subscribe `group` to the log, resuming from its stored checkpoint.
    pub async fn open(
        ctx: &RequestContext,
        group: impl Into<String>,
        event_store: Arc<dyn EventStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        config: SubscriptionConfig,
    ) -> Result<Self, EventStoreError> {
        let group = group.into();
        let checkpoint = checkpoints.load_checkpoint(ctx, &group).await?;

        tracing::info!(
            group = %group,
            resume_from = ?checkpoint.map(|p| p.event_id),
            lookback_ms = config.lookback.as_millis() as u64,
            "🔄 Subscription opened"
        );

        let mut delivered = HashMap::new();
        if let Some(position) = checkpoint {
            delivered.insert(position.event_id, position.recorded_at);
        }

        Ok(Self {
            group,
            event_store,
            checkpoints,
            buffer: VecDeque::with_capacity(config.batch_size.max(1)),
            config,
            fetched_up_to: checkpoint,
            acked_up_to: checkpoint,
            delivered,
        })
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn acked_position(&self) -> Option<LogPosition> {
        self.acked_up_to
    }

    /// Next undelivered event. Waits for new events while the log is idle;
    /// returns a context error once `ctx` is cancelled.
    pub async fn next(&mut self, ctx: &RequestContext) -> Result<DeliveredEvent, EventStoreError> {
        loop {
            if let Some(event) = self.buffer.pop_front() {
                return Ok(event);
            }

            let fresh = self.poll(ctx).await?;
            if !fresh.is_empty() {
                tracing::debug!(
                    group = %self.group,
                    count = fresh.len(),
                    "📬 Fetched events from log"
                );
                self.buffer.extend(fresh);
                continue;
            }

            ctx.run(tokio::time::sleep(self.config.poll_interval)).await?;
        }
    }

    /// Page through the log from the start of the lookback window until a
    /// page yields undelivered events or the log is exhausted.
    async fn poll(&mut self, ctx: &RequestContext) -> Result<Vec<DeliveredEvent>, EventStoreError> {
        let limit = self.config.batch_size.max(1);
        let mut after = self.window_start();
        let mut fresh = Vec::new();

        loop {
            let page = self.event_store.read_log(ctx, after, limit).await?;
            let exhausted = page.len() < limit;

            for event in page {
                after = Some(event.position);
                if self.delivered.contains_key(&event.envelope.event_id) {
                    continue;
                }
                if self.fetched_up_to.is_some_and(|high| event.position < high) {
                    tracing::warn!(
                        group = %self.group,
                        event_id = %event.envelope.event_id,
                        recorded_at = %event.position.recorded_at,
                        "⏪ Late commit picked up behind the cursor"
                    );
                }
                self.delivered
                    .insert(event.envelope.event_id, event.position.recorded_at);
                fresh.push(event);
            }

            if !fresh.is_empty() || exhausted {
                break;
            }
        }

        if let Some(newest) = fresh.iter().map(|e| e.position).max() {
            self.fetched_up_to = self.fetched_up_to.max(Some(newest));
            self.forget_outside_window();
        }
        Ok(fresh)
    }

    /// Lowest position a poll reads from; `None` reads the whole log.
    fn window_start(&self) -> Option<LogPosition> {
        let high = self.fetched_up_to?;
        let lookback = TimeDelta::from_std(self.config.lookback).unwrap_or(TimeDelta::zero());
        let recorded_at = high
            .recorded_at
            .checked_sub_signed(lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        Some(LogPosition {
            recorded_at,
            event_id: Uuid::nil(),
        })
    }

    fn forget_outside_window(&mut self) {
        if let Some(start) = self.window_start() {
            self.delivered
                .retain(|_, recorded_at| *recorded_at >= start.recorded_at);
        }
    }

    /// Record `event` as processed. Only call after the consumer succeeded.
    /// The checkpoint never moves backwards when a late commit is acked.
    pub async fn ack(
        &mut self,
        ctx: &RequestContext,
        event: &DeliveredEvent,
    ) -> Result<(), EventStoreError> {
        if self.acked_up_to.is_some_and(|acked| acked >= event.position) {
            return Ok(());
        }
        self.checkpoints
            .save_checkpoint(ctx, &self.group, event.position)
            .await?;
        self.acked_up_to = Some(event.position);
        Ok(())
    }
}
