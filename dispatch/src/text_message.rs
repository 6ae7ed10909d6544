//! Relays text messages heard on home topics to Discord.

use crate::avatars::AvatarDirectory;
use crate::config::{Bot, Config, Topics, Webhooks};
use crate::ignore_list::IgnoreList;
use crate::metrics_defs::{TEXT_MESSAGES, WEBHOOK_DELIVERIES};
use crate::node_directory::NodeDirectory;
use crate::webhook::{Embed, EmbedAuthor, EmbedField, WebhookMessage, WebhookSender};
use chrono::{DateTime, SecondsFormat, Utc};
use ingest::PacketGroup;
use ingest::clock::{Clock, Timestamp};
use ingest::envelope::{BROADCAST_ADDR, Envelope, LinkQuality, node_hex, parse_node_hex};
use shared::counter;
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

const EMBED_COLOR: u32 = 6810260;
const MEDIUM_SLOW_CHANNEL: &str = "MediumSlow";
const STALE_AFTER_MS: Timestamp = 5 * 60 * 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextOutcome {
    /// Automated `seq <n>` range test message
    RangeTest,
    IgnoredSender,
    NotBroadcast,
    NotHome,
    Relayed { attempted: usize, delivered: usize },
}

impl TextOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextOutcome::RangeTest => "range_test",
            TextOutcome::IgnoredSender => "ignored_sender",
            TextOutcome::NotBroadcast => "not_broadcast",
            TextOutcome::NotHome => "not_home",
            TextOutcome::Relayed { .. } => "relayed",
        }
    }
}

fn is_range_test(text: &str) -> bool {
    match text.strip_prefix("seq ") {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Describes how a gateway heard the packet. Later rules win.
pub fn hop_summary(
    link: LinkQuality,
    self_gated: bool,
    max_hop_start: u32,
    source: &str,
) -> String {
    let hops = format!("{}/{} hops", link.hops_taken(), link.hop_start);
    let signal = format!("{} / {} dBm", link.rx_snr, link.rx_rssi);

    let mut summary = if link.hop_start == 0 && link.hop_limit == 0 {
        signal
    } else if link.hops_taken() == 0 {
        format!("{signal} {hops}")
    } else {
        hops.clone()
    };

    if self_gated {
        summary = format!("Self Gated {} hopper", link.hop_start);
    }
    if link.hop_start != max_hop_start {
        summary = format!(":older_man: {hops}");
    }
    if source == "public" {
        summary = format!(":poop: {hops}");
    }
    summary
}

pub struct TextHandler {
    nodes: Arc<NodeDirectory>,
    ignore_list: Arc<IgnoreList>,
    avatars: Arc<AvatarDirectory>,
    sender: Arc<dyn WebhookSender>,
    clock: Arc<dyn Clock>,
    webhooks: Webhooks,
    topics: Topics,
    bot: Bot,
    production: bool,
    links_base_url: String,
}

impl TextHandler {
    pub fn new(
        config: &Config,
        nodes: Arc<NodeDirectory>,
        ignore_list: Arc<IgnoreList>,
        avatars: Arc<AvatarDirectory>,
        sender: Arc<dyn WebhookSender>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        TextHandler {
            nodes,
            ignore_list,
            avatars,
            sender,
            clock,
            webhooks: config.webhooks.clone(),
            topics: config.topics.clone(),
            bot: config.bot.clone(),
            production: config.is_production(),
            links_base_url: config.links_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn handle(&self, group: &PacketGroup, text: &str) -> TextOutcome {
        let outcome = self.relay(group, text).await;
        counter!(TEXT_MESSAGES, "outcome" => outcome.as_str()).increment(1);
        outcome
    }

    async fn relay(&self, group: &PacketGroup, text: &str) -> TextOutcome {
        let first = group.first();
        let from = node_hex(first.from());
        let to = node_hex(first.to());

        if is_range_test(text) {
            return TextOutcome::RangeTest;
        }

        if self.ignore_list.contains(&from) {
            tracing::info!(packet_id = group.id(), %from, %to, "ignoring message from listed node: {text}");
            return TextOutcome::IgnoredSender;
        }

        let rx_time_ms = first.rx_time() as Timestamp * 1000;
        if rx_time_ms < self.clock.now().saturating_sub(STALE_AFTER_MS) {
            tracing::info!(packet_id = group.id(), %from, %to, "old message: {text}");
        }

        if self.production && first.to() != BROADCAST_ADDR {
            tracing::info!(packet_id = group.id(), topics = ?topics_of(group), "not to public channel");
            return TextOutcome::NotBroadcast;
        }

        if !group.envelopes().iter().any(|e| self.topics.is_home(e.topic())) {
            tracing::info!(packet_id = group.id(), topics = ?topics_of(group), "no envelope on a home topic");
            return TextOutcome::NotHome;
        }

        let message = self.build_message(group, text);
        tracing::info!(packet_id = group.id(), %from, %to, "relaying message: {text}");

        let targets = self.targets(group);
        let mut delivered = 0;
        for (target, url) in &targets {
            match self.sender.send(url, &message).await {
                Ok(()) => {
                    delivered += 1;
                    counter!(WEBHOOK_DELIVERIES, "target" => *target, "result" => "ok").increment(1);
                }
                Err(e) => {
                    counter!(WEBHOOK_DELIVERIES, "target" => *target, "result" => "error")
                        .increment(1);
                    tracing::error!(packet_id = group.id(), webhook = *target, "could not send discord message: {e}");
                }
            }
        }

        TextOutcome::Relayed {
            attempted: targets.len(),
            delivered,
        }
    }

    fn targets(&self, group: &PacketGroup) -> Vec<(&'static str, Url)> {
        let envelopes = group.envelopes();
        let mut targets = Vec::new();

        if envelopes.iter().any(|e| self.topics.is_primary(e.topic())) {
            match &self.webhooks.medium_slow {
                Some(url) if group.first().channel_id() == MEDIUM_SLOW_CHANNEL => {
                    targets.push(("medium_slow", url.clone()));
                }
                _ => targets.push(("primary", self.webhooks.primary.clone())),
            }
        }

        if let Some(url) = &self.webhooks.private {
            if envelopes.iter().any(|e| self.topics.is_private(e.topic())) {
                targets.push(("private", url.clone()));
            }
        }

        targets
    }

    pub fn build_message(&self, group: &PacketGroup, text: &str) -> WebhookMessage {
        let first = group.first();
        let from = node_hex(first.from());
        let sender = self.nodes.get(&from);
        let node_link = format!("{}/packet_list/{}", self.links_base_url, first.from());

        let max_hop_start = group
            .envelopes()
            .iter()
            .map(|e| e.link().hop_start)
            .max()
            .unwrap_or_default();

        let mut fields = vec![
            EmbedField {
                name: "Packet".into(),
                value: format!(
                    "[{:x}]({}/packet/{})",
                    group.id(),
                    self.links_base_url,
                    group.id()
                ),
                inline: true,
            },
            EmbedField {
                name: "Channel".into(),
                value: first.channel_id().to_string(),
                inline: true,
            },
        ];

        let mut seen = HashSet::new();
        for envelope in group.envelopes() {
            if seen.insert(envelope.gateway_id()) {
                fields.push(self.gateway_field(group, envelope, &from, max_hop_start));
            }
        }

        WebhookMessage {
            username: self.bot.username.clone(),
            avatar_url: self.bot.avatar_url.clone(),
            embeds: vec![Embed {
                url: node_link.clone(),
                color: EMBED_COLOR,
                timestamp: rfc3339(first.rx_time()),
                author: EmbedAuthor {
                    name: sender
                        .as_ref()
                        .map(|n| n.long_name.clone())
                        .filter(|name| !name.is_empty())
                        .unwrap_or_else(|| "Unknown".into()),
                    url: node_link,
                    icon_url: self.avatars.avatar_for(&from),
                },
                title: sender
                    .map(|n| n.short_name)
                    .filter(|name| !name.is_empty())
                    .unwrap_or_else(|| "UNK".into()),
                description: text.to_string(),
                fields,
            }],
        }
    }

    fn gateway_field(
        &self,
        group: &PacketGroup,
        envelope: &Envelope,
        from: &str,
        max_hop_start: u32,
    ) -> EmbedField {
        let gateway = envelope.gateway_hex();
        let name = self
            .nodes
            .get(gateway)
            .map(|n| n.short_name)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| gateway.to_string());
        let hops = hop_summary(envelope.link(), gateway == from, max_hop_start, envelope.source());
        let gateway_node = parse_node_hex(gateway)
            .map(|node| node.to_string())
            .unwrap_or_else(|| gateway.to_string());

        let mut value = format!(
            "[{name} ({hops})]({}/packet_list/{gateway_node})",
            self.links_base_url
        );
        let delay = envelope.received_at().saturating_sub(group.first_seen_at());
        if delay > 0 {
            value.push_str(&format!(" ({delay}ms)"));
        }

        EmbedField {
            name: "Gateway".into(),
            value,
            inline: true,
        }
    }
}

fn topics_of(group: &PacketGroup) -> Vec<&str> {
    group.envelopes().iter().map(|e| e.topic()).collect()
}

fn rfc3339(rx_time: u32) -> String {
    DateTime::<Utc>::from_timestamp(rx_time as i64, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::errors::WebhookError;
    use crate::node_directory::NodeInfo;
    use async_trait::async_trait;
    use ingest::GroupingQueue;
    use ingest::clock::ManualClock;
    use ingest::proto::mesh_packet::PayloadVariant;
    use ingest::proto::{Data, MeshPacket, PortNum, ServiceEnvelope};
    use parking_lot::Mutex;

    pub(crate) const SENDER: u32 = 0x43b6ff0c;
    pub(crate) const HOME: &str = "msh/US/CA/socalmesh/2/e/LongFast/";
    pub(crate) const PRIVATE: &str = "msh/US/CA/SacValley/2/e/LongFast/";

    #[derive(Default)]
    pub(crate) struct RecordingSender {
        pub(crate) sent: Mutex<Vec<(Url, WebhookMessage)>>,
        pub(crate) fail: bool,
    }

    #[async_trait]
    impl WebhookSender for RecordingSender {
        async fn send(&self, url: &Url, message: &WebhookMessage) -> Result<(), WebhookError> {
            self.sent.lock().push((url.clone(), message.clone()));
            if self.fail {
                return Err(WebhookError::Status(reqwest::StatusCode::TOO_MANY_REQUESTS));
            }
            Ok(())
        }
    }

    pub(crate) struct Observation {
        pub(crate) topic: &'static str,
        pub(crate) gateway: u32,
        pub(crate) source: &'static str,
        pub(crate) received_at: Timestamp,
        pub(crate) hop_start: u32,
        pub(crate) hop_limit: u32,
    }

    impl Observation {
        pub(crate) fn home(gateway: u32, received_at: Timestamp) -> Self {
            Observation {
                topic: HOME,
                gateway,
                source: "private",
                received_at,
                hop_start: 3,
                hop_limit: 2,
            }
        }
    }

    pub(crate) fn group_of(
        to: u32,
        channel: &str,
        data: Data,
        observations: Vec<Observation>,
    ) -> PacketGroup {
        let queue = GroupingQueue::new();
        for obs in observations {
            let gateway = format!("!{}", node_hex(obs.gateway));
            let service = ServiceEnvelope {
                packet: Some(MeshPacket {
                    from: SENDER,
                    to,
                    id: 0x1234,
                    rx_time: 1_700_000_000,
                    rx_snr: 6.25,
                    rx_rssi: -97,
                    hop_start: obs.hop_start,
                    hop_limit: obs.hop_limit,
                    payload_variant: Some(PayloadVariant::Decoded(data.clone())),
                    ..Default::default()
                }),
                channel_id: channel.into(),
                gateway_id: gateway.clone(),
            };
            let topic = format!("{}{gateway}", obs.topic);
            let envelope =
                Envelope::from_service(&topic, obs.source, service, obs.received_at).unwrap();
            queue.add(envelope);
        }
        queue.pop_packet_groups_older_than(Timestamp::MAX).remove(0)
    }

    pub(crate) fn text(s: &str) -> Data {
        Data {
            portnum: PortNum::TextMessageApp as i32,
            payload: s.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    pub(crate) fn config(environment: &str, medium_slow: bool) -> Config {
        let yaml = format!(
            r#"
environment: {environment}
webhooks:
    primary: "https://discord.test/primary"
    private: "https://discord.test/private"
    {}
topics:
    primary: ["msh/US/CA/socalmesh"]
    private: ["msh/US/CA/SacValley"]
links_base_url: "https://meshview.test/"
"#,
            if medium_slow {
                r#"medium_slow: "https://discord.test/medium_slow""#
            } else {
                ""
            }
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    pub(crate) fn handler(
        config: &Config,
        sender: Arc<RecordingSender>,
        nodes: Arc<NodeDirectory>,
    ) -> TextHandler {
        TextHandler::new(
            config,
            nodes,
            Arc::new(IgnoreList::new(["deadbeef"])),
            Arc::new(AvatarDirectory::default()),
            sender,
            Arc::new(ManualClock::new(1_700_000_000_000)),
        )
    }

    #[test]
    fn test_range_test_detection() {
        assert!(is_range_test("seq 6034"));
        assert!(!is_range_test("seq "));
        assert!(!is_range_test("seq 60a"));
        assert!(!is_range_test("my seq 1"));
        assert!(!is_range_test("seq 1 2"));
    }

    fn link(hop_start: u32, hop_limit: u32) -> LinkQuality {
        LinkQuality {
            rx_snr: 6.25,
            rx_rssi: -97,
            hop_start,
            hop_limit,
        }
    }

    #[test]
    fn test_hop_summary_rules() {
        assert_eq!(hop_summary(link(3, 1), false, 3, "private"), "2/3 hops");
        assert_eq!(hop_summary(link(0, 0), false, 0, "private"), "6.25 / -97 dBm");
        assert_eq!(
            hop_summary(link(3, 3), false, 3, "private"),
            "6.25 / -97 dBm 0/3 hops"
        );
        assert_eq!(hop_summary(link(3, 3), true, 3, "private"), "Self Gated 3 hopper");
        assert_eq!(
            hop_summary(link(3, 3), true, 7, "private"),
            ":older_man: 0/3 hops"
        );
        assert_eq!(hop_summary(link(7, 5), true, 7, "public"), ":poop: 2/7 hops");
    }

    #[tokio::test]
    async fn test_filters() {
        let sender = Arc::new(RecordingSender::default());
        let config = config("production", false);
        let handler = handler(&config, sender.clone(), Arc::new(NodeDirectory::in_memory()));
        let home = || vec![Observation::home(0xa, 0)];

        let group = group_of(BROADCAST_ADDR, "LongFast", text("seq 12"), home());
        assert_eq!(handler.handle(&group, "seq 12").await, TextOutcome::RangeTest);

        let group = group_of(0x1, "LongFast", text("dm"), home());
        assert_eq!(handler.handle(&group, "dm").await, TextOutcome::NotBroadcast);

        let away = vec![Observation {
            topic: "msh/US/NV/2/e/LongFast/",
            ..Observation::home(0xa, 0)
        }];
        let group = group_of(BROADCAST_ADDR, "LongFast", text("hi"), away);
        assert_eq!(handler.handle(&group, "hi").await, TextOutcome::NotHome);

        assert!(sender.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_direct_messages_pass_outside_production() {
        let sender = Arc::new(RecordingSender::default());
        let config = config("development", false);
        let handler = handler(&config, sender.clone(), Arc::new(NodeDirectory::in_memory()));

        let group = group_of(0x1, "LongFast", text("dm"), vec![Observation::home(0xa, 0)]);
        assert_eq!(
            handler.handle(&group, "dm").await,
            TextOutcome::Relayed {
                attempted: 1,
                delivered: 1
            }
        );
    }

    #[tokio::test]
    async fn test_ignored_sender() {
        let sender = Arc::new(RecordingSender::default());
        let config = config("production", false);
        let handler = TextHandler::new(
            &config,
            Arc::new(NodeDirectory::in_memory()),
            Arc::new(IgnoreList::new([node_hex(SENDER)])),
            Arc::new(AvatarDirectory::default()),
            sender.clone(),
            Arc::new(ManualClock::new(0)),
        );
        let group = group_of(BROADCAST_ADDR, "LongFast", text("hi"), vec![Observation::home(0xa, 0)]);
        assert_eq!(handler.handle(&group, "hi").await, TextOutcome::IgnoredSender);
        assert!(sender.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_delivery_targets() {
        let sender = Arc::new(RecordingSender::default());
        let config = config("production", true);
        let handler = handler(&config, sender.clone(), Arc::new(NodeDirectory::in_memory()));

        // primary and private topics, on the MediumSlow channel
        let observations = vec![
            Observation::home(0xa, 0),
            Observation {
                topic: PRIVATE,
                ..Observation::home(0xb, 10)
            },
        ];
        let group = group_of(BROADCAST_ADDR, "MediumSlow", text("hi"), observations);
        handler.handle(&group, "hi").await;

        let urls: Vec<String> = sender.sent.lock().iter().map(|(u, _)| u.to_string()).collect();
        assert_eq!(
            urls,
            vec!["https://discord.test/medium_slow", "https://discord.test/private"]
        );

        // private topic only
        sender.sent.lock().clear();
        let observations = vec![Observation {
            topic: PRIVATE,
            ..Observation::home(0xb, 0)
        }];
        let group = group_of(BROADCAST_ADDR, "LongFast", text("hi"), observations);
        handler.handle(&group, "hi").await;
        let urls: Vec<String> = sender.sent.lock().iter().map(|(u, _)| u.to_string()).collect();
        assert_eq!(urls, vec!["https://discord.test/private"]);
    }

    #[tokio::test]
    async fn test_webhook_failure_is_not_fatal() {
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..Default::default()
        });
        let config = config("production", false);
        let handler = handler(&config, sender.clone(), Arc::new(NodeDirectory::in_memory()));
        let group = group_of(BROADCAST_ADDR, "LongFast", text("hi"), vec![Observation::home(0xa, 0)]);
        assert_eq!(
            handler.handle(&group, "hi").await,
            TextOutcome::Relayed {
                attempted: 1,
                delivered: 0
            }
        );
    }

    #[tokio::test]
    async fn test_embed() {
        let nodes = Arc::new(NodeDirectory::in_memory());
        nodes
            .update(&node_hex(SENDER), NodeInfo {
                long_name: "KK6VSY Base".into(),
                short_name: "BASE".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        nodes
            .update("0000000a", NodeInfo {
                long_name: "Ridge".into(),
                short_name: "RDG".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let config = config("production", false);
        let handler = handler(&config, Arc::new(RecordingSender::default()), nodes);

        let observations = vec![
            Observation::home(0xa, 1_000),
            Observation::home(0xb, 1_250),
            // same gateway again, only the first observation is shown
            Observation::home(0xa, 1_300),
            Observation {
                source: "public",
                ..Observation::home(0xc, 1_000)
            },
        ];
        let group = group_of(BROADCAST_ADDR, "LongFast", text("hello mesh"), observations);
        let message = handler.build_message(&group, "hello mesh");
        let embed = &message.embeds[0];

        assert_eq!(message.username, "Captain Hook");
        assert_eq!(embed.author.name, "KK6VSY Base");
        assert_eq!(embed.author.icon_url, crate::avatars::DEFAULT_AVATAR);
        assert_eq!(embed.author.url, "https://meshview.test/packet_list/1136066316");
        assert_eq!(embed.title, "BASE");
        assert_eq!(embed.description, "hello mesh");
        assert_eq!(embed.timestamp, "2023-11-14T22:13:20.000Z");

        let values: Vec<&str> = embed.fields.iter().map(|f| f.value.as_str()).collect();
        assert_eq!(
            values,
            vec![
                "[1234](https://meshview.test/packet/4660)",
                "LongFast",
                "[RDG (1/3 hops)](https://meshview.test/packet_list/10)",
                "[0000000b (1/3 hops)](https://meshview.test/packet_list/11) (250ms)",
                "[0000000c (:poop: 1/3 hops)](https://meshview.test/packet_list/12)",
            ]
        );
    }

    #[test]
    fn test_unknown_sender_embed() {
        let config = config("production", false);
        let handler = handler(
            &config,
            Arc::new(RecordingSender::default()),
            Arc::new(NodeDirectory::in_memory()),
        );
        let group = group_of(BROADCAST_ADDR, "LongFast", text("hi"), vec![Observation::home(0xa, 0)]);
        let embed = &handler.build_message(&group, "hi").embeds[0];
        assert_eq!(embed.author.name, "Unknown");
        assert_eq!(embed.title, "UNK");
    }
}
