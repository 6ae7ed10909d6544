use crate::clock::Timestamp;
use crate::errors::IngestError;
use crate::proto::mesh_packet::PayloadVariant;
use crate::proto::{Data, MeshPacket, ServiceEnvelope};
use prost::Message;

/// Destination address of packets sent to everyone on the channel.
pub const BROADCAST_ADDR: u32 = 0xffff_ffff;

/// Formats a node number the way node ids are written on the mesh, without
/// the leading `!`.
pub fn node_hex(node: u32) -> String {
    format!("{node:08x}")
}

/// Parses an 8 digit hex node id, with or without the leading `!`.
pub fn parse_node_hex(s: &str) -> Option<u32> {
    let digits = s.strip_prefix('!').unwrap_or(s);
    if digits.is_empty() || digits.len() > 8 {
        return None;
    }
    u32::from_str_radix(digits, 16).ok()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinkQuality {
    pub rx_snr: f32,
    pub rx_rssi: i32,
    pub hop_start: u32,
    pub hop_limit: u32,
}

impl LinkQuality {
    /// Number of hops the packet travelled before reaching the gateway.
    pub fn hops_taken(&self) -> u32 {
        self.hop_start.saturating_sub(self.hop_limit)
    }
}

/// One gateway's observation of one logical packet.
///
/// Everything is fixed at construction except the decrypted payload, which
/// can be attached once.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    topic: String,
    source: String,
    received_at: Timestamp,
    packet: MeshPacket,
    channel_id: String,
    gateway_id: String,
    decrypted: Option<Data>,
}

impl Envelope {
    /// Decodes a `ServiceEnvelope` published on `topic`.
    pub fn decode(
        topic: &str,
        source: &str,
        payload: &[u8],
        received_at: Timestamp,
    ) -> Result<Self, IngestError> {
        let service = ServiceEnvelope::decode(payload)?;
        Self::from_service(topic, source, service, received_at)
    }

    pub fn from_service(
        topic: &str,
        source: &str,
        service: ServiceEnvelope,
        received_at: Timestamp,
    ) -> Result<Self, IngestError> {
        let packet = service.packet.ok_or(IngestError::MissingPacket)?;

        Ok(Envelope {
            topic: topic.to_string(),
            source: source.to_string(),
            received_at,
            packet,
            channel_id: service.channel_id,
            gateway_id: service.gateway_id,
            decrypted: None,
        })
    }

    pub fn packet_id(&self) -> u32 {
        self.packet.id
    }

    pub fn from(&self) -> u32 {
        self.packet.from
    }

    pub fn to(&self) -> u32 {
        self.packet.to
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Label of the transport the envelope arrived on.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn received_at(&self) -> Timestamp {
        self.received_at
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub fn gateway_id(&self) -> &str {
        &self.gateway_id
    }

    /// Gateway id without the leading `!`.
    pub fn gateway_hex(&self) -> &str {
        self.gateway_id.trim_start_matches('!')
    }

    /// Gateway receive time in seconds since the epoch.
    pub fn rx_time(&self) -> u32 {
        self.packet.rx_time
    }

    pub fn link(&self) -> LinkQuality {
        LinkQuality {
            rx_snr: self.packet.rx_snr,
            rx_rssi: self.packet.rx_rssi,
            hop_start: self.packet.hop_start,
            hop_limit: self.packet.hop_limit,
        }
    }

    pub fn packet(&self) -> &MeshPacket {
        &self.packet
    }

    /// The encrypted body, if the packet carries a non-empty one.
    pub fn encrypted(&self) -> Option<&[u8]> {
        match &self.packet.payload_variant {
            Some(PayloadVariant::Encrypted(bytes)) if !bytes.is_empty() => Some(bytes),
            _ => None,
        }
    }

    /// The application payload, either sent in the clear or recovered by
    /// the decryptor.
    pub fn decoded(&self) -> Option<&Data> {
        match &self.packet.payload_variant {
            Some(PayloadVariant::Decoded(data)) => Some(data),
            _ => self.decrypted.as_ref(),
        }
    }

    pub fn decrypted(&self) -> Option<&Data> {
        self.decrypted.as_ref()
    }

    /// Attaches a decrypted payload. Returns false, leaving the envelope
    /// untouched, when it already has one.
    pub fn attach_decrypted(&mut self, data: Data) -> bool {
        if self.decoded().is_some() {
            return false;
        }
        self.decrypted = Some(data);
        true
    }
}
