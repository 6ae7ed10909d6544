//! Ingestion pipeline for Meshtastic packets relayed over MQTT.
//!
//! Messages published by gateways are decoded, decrypted with the configured
//! channel keys, deduplicated and grouped by packet id. The scheduler hands
//! each group to a [`GroupConsumer`] once its grouping window has closed, so
//! the consumer sees every gateway that heard the packet at once.

pub mod bridge;
pub mod clock;
pub mod config;
pub mod decryptor;
pub mod dedup_cache;
pub mod envelope;
pub mod errors;
pub mod fingerprint;
pub mod grouping_queue;
pub mod keys;
pub mod leader;
pub mod metrics_defs;
pub mod proto;
pub mod scheduler;
pub mod shutdown;
pub mod worker;

pub use envelope::Envelope;
pub use grouping_queue::{GroupingQueue, PacketGroup};
pub use scheduler::{GroupConsumer, Leadership, Scheduler};
pub use shutdown::Shutdown;
pub use worker::{InboundMessage, IngestWorker, TopicFilter};
