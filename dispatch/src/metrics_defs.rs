//! Metrics definitions for group dispatch.

use shared::metrics_defs::{MetricDef, MetricType};

pub const GROUPS_DISPATCHED: MetricDef = MetricDef {
    name: "dispatch.groups",
    metric_type: MetricType::Counter,
    description: "Packet groups routed by port number. Tagged with port.",
};

pub const TEXT_MESSAGES: MetricDef = MetricDef {
    name: "dispatch.text",
    metric_type: MetricType::Counter,
    description: "Text message groups by outcome. Tagged with outcome.",
};

pub const WEBHOOK_DELIVERIES: MetricDef = MetricDef {
    name: "dispatch.webhook",
    metric_type: MetricType::Counter,
    description: "Webhook posts. Tagged with target and result.",
};

pub const NODES_UPDATED: MetricDef = MetricDef {
    name: "dispatch.nodes.updated",
    metric_type: MetricType::Counter,
    description: "Node directory updates from node info packets",
};

pub const DIRECTORY_SIZE: MetricDef = MetricDef {
    name: "dispatch.directory.size",
    metric_type: MetricType::Gauge,
    description: "Entries in a lookup directory. Tagged with directory.",
};

pub const DIRECTORY_REFRESH_FAILURES: MetricDef = MetricDef {
    name: "dispatch.directory.refresh_failures",
    metric_type: MetricType::Counter,
    description: "Failed remote refreshes. Tagged with directory.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    GROUPS_DISPATCHED,
    TEXT_MESSAGES,
    WEBHOOK_DELIVERIES,
    NODES_UPDATED,
    DIRECTORY_SIZE,
    DIRECTORY_REFRESH_FAILURES,
];
