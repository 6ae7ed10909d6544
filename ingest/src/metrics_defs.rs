//! Metrics definitions for the ingestion pipeline.

use shared::metrics_defs::{MetricDef, MetricType};

pub const MESSAGES_RECEIVED: MetricDef = MetricDef {
    name: "ingest.messages.received",
    metric_type: MetricType::Counter,
    description: "Messages taken off the transport channel",
};

pub const MESSAGES_DROPPED: MetricDef = MetricDef {
    name: "ingest.messages.dropped",
    metric_type: MetricType::Counter,
    description: "Messages dropped before grouping. Tagged with reason.",
};

pub const DECODE_ERRORS: MetricDef = MetricDef {
    name: "ingest.decode.errors",
    metric_type: MetricType::Counter,
    description: "Messages that could not be decoded as a service envelope",
};

pub const DECRYPT_RESULT: MetricDef = MetricDef {
    name: "ingest.decrypt",
    metric_type: MetricType::Counter,
    description: "Decryption attempts. Tagged with result.",
};

pub const DEDUP_EVICTIONS: MetricDef = MetricDef {
    name: "ingest.dedup.evictions",
    metric_type: MetricType::Counter,
    description: "Fingerprints evicted from the dedup cache to make room",
};

pub const GROUPS_CREATED: MetricDef = MetricDef {
    name: "ingest.groups.created",
    metric_type: MetricType::Counter,
    description: "Packet groups started by a first observation",
};

pub const PENDING_GROUPS: MetricDef = MetricDef {
    name: "ingest.groups.pending",
    metric_type: MetricType::Gauge,
    description: "Packet groups waiting for their window to close",
};

pub const GROUPS_FLUSHED: MetricDef = MetricDef {
    name: "ingest.groups.flushed",
    metric_type: MetricType::Counter,
    description: "Packet groups handed to the consumer. Tagged with result.",
};

pub const GROUP_SIZE: MetricDef = MetricDef {
    name: "ingest.groups.size",
    metric_type: MetricType::Histogram,
    description: "Number of gateway observations in a flushed group",
};

pub const FLUSH_DURATION: MetricDef = MetricDef {
    name: "ingest.flush.duration",
    metric_type: MetricType::Histogram,
    description: "Time to drain the queue and consume all groups of one tick in seconds",
};

pub const BRIDGE_REQUESTS: MetricDef = MetricDef {
    name: "ingest.bridge.requests",
    metric_type: MetricType::Counter,
    description: "Publish requests received by the bridge. Tagged with status.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    MESSAGES_RECEIVED,
    MESSAGES_DROPPED,
    DECODE_ERRORS,
    DECRYPT_RESULT,
    DEDUP_EVICTIONS,
    GROUPS_CREATED,
    PENDING_GROUPS,
    GROUPS_FLUSHED,
    GROUP_SIZE,
    FLUSH_DURATION,
    BRIDGE_REQUESTS,
];
