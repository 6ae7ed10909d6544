use crate::clock::{Clock, Timestamp};
use crate::grouping_queue::{GroupingQueue, PacketGroup};
use crate::leader::{LeaderFlag, still_leader};
use crate::metrics_defs::{FLUSH_DURATION, GROUP_SIZE, GROUPS_FLUSHED};
use crate::shutdown::{Shutdown, triggered};
use async_trait::async_trait;
use shared::admin_service::Readiness;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(5000);
pub const DEFAULT_CONSUME_TIMEOUT: Duration = Duration::from_secs(30);

/// Receives each completed packet group exactly once.
#[async_trait]
pub trait GroupConsumer: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn consume(&self, group: PacketGroup) -> Result<(), Self::Error>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub delivered: usize,
    pub failed: usize,
    /// Groups aborted because the consumer did not finish before the deadline
    pub timed_out: usize,
}

/// Who this instance is and how to tell whether it should keep running.
#[derive(Clone)]
pub struct Leadership {
    pub flag: Arc<dyn LeaderFlag>,
    pub instance_id: String,
    pub readiness: Readiness,
}

/// Periodically drains groups whose window has closed and hands them to the
/// consumer.
pub struct Scheduler<C> {
    queue: Arc<GroupingQueue>,
    consumer: Arc<C>,
    clock: Arc<dyn Clock>,
    window: Duration,
    period: Duration,
    consume_timeout: Duration,
}

impl<C: GroupConsumer> Scheduler<C> {
    pub fn new(
        queue: Arc<GroupingQueue>,
        consumer: Arc<C>,
        clock: Arc<dyn Clock>,
        window: Duration,
        period: Duration,
    ) -> Self {
        Scheduler {
            queue,
            consumer,
            clock,
            window,
            period,
            consume_timeout: DEFAULT_CONSUME_TIMEOUT,
        }
    }

    /// Bounds how long one tick waits for its groups. Groups still in the
    /// consumer when it elapses are aborted so the next tick can run.
    pub fn with_consume_timeout(mut self, timeout: Duration) -> Self {
        self.consume_timeout = timeout;
        self
    }

    /// One tick: releases every group first seen more than one window ago.
    pub async fn flush(&self) -> FlushSummary {
        let cutoff = self
            .clock
            .now()
            .saturating_sub(self.window.as_millis() as Timestamp);
        self.flush_older_than(cutoff).await
    }

    /// Releases every pending group regardless of age.
    pub async fn flush_all(&self) -> FlushSummary {
        self.flush_older_than(Timestamp::MAX).await
    }

    async fn flush_older_than(&self, cutoff: Timestamp) -> FlushSummary {
        let start = Instant::now();
        let groups = self.queue.pop_packet_groups_older_than(cutoff);
        let mut summary = FlushSummary::default();
        if groups.is_empty() {
            return summary;
        }

        // Each group is consumed on its own task so that an error or a panic
        // in one cannot affect the others.
        let mut join_set = JoinSet::new();
        let mut packets = HashMap::new();
        for group in groups {
            histogram!(GROUP_SIZE).record(group.len() as f64);
            let packet_id = group.id();
            let consumer = self.consumer.clone();
            let handle = join_set.spawn(async move { consumer.consume(group).await });
            packets.insert(handle.id(), packet_id);
        }

        let deadline = tokio::time::sleep(self.consume_timeout);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = join_set.join_next_with_id() => match joined {
                    Some(joined) => record(joined, &packets, &mut summary),
                    None => break,
                },
                _ = &mut deadline => {
                    tracing::error!(
                        remaining = join_set.len(),
                        "consumer deadline reached, aborting packet groups"
                    );
                    join_set.abort_all();
                    break;
                }
            }
        }
        // Reap aborted tasks. One that finished right before the abort keeps
        // its own result.
        while let Some(joined) = join_set.join_next_with_id().await {
            record(joined, &packets, &mut summary);
        }

        histogram!(FLUSH_DURATION).record(start.elapsed().as_secs_f64());
        summary
    }

    /// Ticks every `period` until `shutdown` is set or another instance takes
    /// over the leader flag.
    ///
    /// On shutdown the remaining groups are flushed. On losing leadership
    /// they are dropped, `shutdown` is set so the caller can stop ingestion,
    /// and the instance reports not ready.
    pub async fn run(self, leadership: Leadership, shutdown: Shutdown) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stop = shutdown.subscribe();

        loop {
            if shutdown.is_triggered() {
                let summary = self.flush_all().await;
                tracing::info!(
                    delivered = summary.delivered,
                    failed = summary.failed,
                    timed_out = summary.timed_out,
                    "scheduler stopping, flushed pending groups"
                );
                return;
            }

            tokio::select! {
                _ = interval.tick() => {},
                _ = triggered(&mut stop) => continue,
            }

            if !still_leader(leadership.flag.as_ref(), &leadership.instance_id).await {
                tracing::error!(
                    instance_id = %leadership.instance_id,
                    pending = self.queue.len(),
                    "another instance is active, stopping this one"
                );
                leadership.readiness.set_ready(false);
                shutdown.trigger();
                return;
            }

            let summary = self.flush().await;
            if summary != FlushSummary::default() {
                tracing::debug!(
                    delivered = summary.delivered,
                    failed = summary.failed,
                    timed_out = summary.timed_out,
                    "flushed packet groups"
                );
            }
        }
    }
}

fn record<E: std::fmt::Display>(
    joined: Result<(Id, Result<(), E>), JoinError>,
    packets: &HashMap<Id, u32>,
    summary: &mut FlushSummary,
) {
    match joined {
        Ok((_, Ok(()))) => {
            summary.delivered += 1;
            counter!(GROUPS_FLUSHED, "result" => "ok").increment(1);
        }
        Ok((id, Err(e))) => {
            summary.failed += 1;
            counter!(GROUPS_FLUSHED, "result" => "error").increment(1);
            let packet_id = packets.get(&id).copied();
            tracing::error!(packet_id, "failed to process packet group: {e}");
        }
        Err(e) if e.is_cancelled() => {
            summary.timed_out += 1;
            counter!(GROUPS_FLUSHED, "result" => "timeout").increment(1);
            let packet_id = packets.get(&e.id()).copied();
            tracing::warn!(packet_id, "packet group timed out in the consumer");
        }
        Err(e) => {
            summary.failed += 1;
            counter!(GROUPS_FLUSHED, "result" => "panic").increment(1);
            let packet_id = packets.get(&e.id()).copied();
            tracing::error!(packet_id, "packet group task panicked: {e}");
        }
    }
}
