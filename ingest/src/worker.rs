use crate::clock::Clock;
use crate::decryptor::Decryptor;
use crate::dedup_cache::DedupCache;
use crate::envelope::{Envelope, node_hex};
use crate::errors::IngestError;
use crate::fingerprint::Fingerprint;
use crate::grouping_queue::{AddOutcome, GroupingQueue};
use crate::metrics_defs::{DECODE_ERRORS, DECRYPT_RESULT, MESSAGES_DROPPED, MESSAGES_RECEIVED};
use crate::shutdown::{Shutdown, triggered};
use bytes::Bytes;
use shared::counter;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A message as delivered by the transport.
#[derive(Clone, Debug, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Not a binary mesh topic (JSON mirror, stats, unrelated traffic).
    Topic,
    /// Outside the home area and not otherwise of interest.
    NotRelevant,
    /// An exact copy of a message seen recently.
    Duplicate,
    /// Envelope without a packet.
    Empty,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Topic => "topic",
            DropReason::NotRelevant => "not_relevant",
            DropReason::Duplicate => "duplicate",
            DropReason::Empty => "empty",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Grouped(AddOutcome),
    Dropped(DropReason),
}

/// Decides which messages are worth grouping.
#[derive(Clone, Debug, Default)]
pub struct TopicFilter {
    home_topics: Vec<String>,
    watched_nodes: HashSet<u32>,
}

impl TopicFilter {
    pub fn new(home_topics: Vec<String>, watched_nodes: HashSet<u32>) -> Self {
        TopicFilter {
            home_topics,
            watched_nodes,
        }
    }

    /// Binary protobuf mesh topics only.
    pub fn accepts_topic(&self, topic: &str) -> bool {
        topic.contains("msh") && !topic.contains("/json") && !topic.contains("/stat/")
    }

    pub fn is_home_topic(&self, topic: &str) -> bool {
        self.home_topics.iter().any(|home| topic.starts_with(home.as_str()))
    }

    /// Home traffic, traffic from watched nodes, and any further observation
    /// of a packet that already has a pending group.
    pub fn is_relevant(&self, topic: &str, from: u32, group_pending: bool) -> bool {
        self.is_home_topic(topic) || self.watched_nodes.contains(&from) || group_pending
    }
}

/// Turns transport messages into grouped envelopes.
///
/// The worker is the only writer of the dedup cache and handles one message
/// at a time, in the order the transport delivers them.
pub struct IngestWorker {
    decryptor: Decryptor,
    cache: DedupCache,
    queue: Arc<GroupingQueue>,
    clock: Arc<dyn Clock>,
    filter: TopicFilter,
    source: String,
}

impl IngestWorker {
    pub fn new(
        decryptor: Decryptor,
        cache: DedupCache,
        queue: Arc<GroupingQueue>,
        clock: Arc<dyn Clock>,
        filter: TopicFilter,
        source: impl Into<String>,
    ) -> Self {
        IngestWorker {
            decryptor,
            cache,
            queue,
            clock,
            filter,
            source: source.into(),
        }
    }

    pub fn handle(&mut self, message: &InboundMessage) -> Result<Outcome, IngestError> {
        let topic = message.topic.as_str();
        if !self.filter.accepts_topic(topic) {
            return Ok(Outcome::Dropped(DropReason::Topic));
        }

        let mut envelope =
            match Envelope::decode(topic, &self.source, &message.payload, self.clock.now()) {
                Ok(envelope) => envelope,
                Err(IngestError::MissingPacket) => return Ok(Outcome::Dropped(DropReason::Empty)),
                Err(e) => return Err(e),
            };

        let pending = self.queue.exists(envelope.packet_id());
        if !self.filter.is_relevant(topic, envelope.from(), pending) {
            return Ok(Outcome::Dropped(DropReason::NotRelevant));
        }

        if let Some(encrypted) = envelope.encrypted() {
            match self.decryptor.decrypt(
                encrypted,
                envelope.packet_id() as u64,
                envelope.from(),
            ) {
                Ok(data) => {
                    envelope.attach_decrypted(data);
                    counter!(DECRYPT_RESULT, "result" => "ok").increment(1);
                }
                Err(e) => {
                    tracing::debug!(
                        packet_id = envelope.packet_id(),
                        from = %node_hex(envelope.from()),
                        "leaving payload encrypted: {e}"
                    );
                    counter!(DECRYPT_RESULT, "result" => "failed").increment(1);
                }
            }
        }

        let fingerprint = Fingerprint::of(&envelope);
        if !self.cache.insert(fingerprint) {
            tracing::trace!(
                packet_id = envelope.packet_id(),
                gateway = envelope.gateway_id(),
                %fingerprint,
                "duplicate envelope"
            );
            return Ok(Outcome::Dropped(DropReason::Duplicate));
        }

        Ok(Outcome::Grouped(self.queue.add(envelope)))
    }

    /// Handles messages until the channel closes or shutdown is triggered.
    /// Errors are reported and never stop the loop.
    pub async fn run(mut self, mut rx: mpsc::Receiver<InboundMessage>, shutdown: Shutdown) {
        let mut stop = shutdown.subscribe();

        loop {
            let message = tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                _ = triggered(&mut stop) => break,
            };

            counter!(MESSAGES_RECEIVED).increment(1);
            match self.handle(&message) {
                Ok(Outcome::Dropped(reason)) => {
                    counter!(MESSAGES_DROPPED, "reason" => reason.as_str()).increment(1);
                }
                Ok(Outcome::Grouped(_)) => {}
                Err(e) => {
                    counter!(DECODE_ERRORS).increment(1);
                    // JSON published on a binary topic is common and not worth an alert.
                    if message.payload.first() == Some(&b'{') {
                        tracing::debug!(topic = %message.topic, "skipping non-protobuf payload: {e}");
                    } else {
                        tracing::error!(topic = %message.topic, "{e}");
                    }
                }
            }
        }

        tracing::info!("ingest worker stopped");
    }
}
