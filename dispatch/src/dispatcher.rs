use crate::errors::DispatchError;
use crate::metrics_defs::{GROUPS_DISPATCHED, NODES_UPDATED};
use crate::node_directory::{NodeDirectory, NodeInfo};
use crate::text_message::TextHandler;
use async_trait::async_trait;
use ingest::clock::Clock;
use ingest::envelope::node_hex;
use ingest::proto::{PortNum, User};
use ingest::{GroupConsumer, PacketGroup};
use prost::Message;
use shared::counter;
use std::sync::Arc;

/// Routes each completed packet group by the port number of its payload.
pub struct Dispatcher {
    text: TextHandler,
    nodes: Arc<NodeDirectory>,
    clock: Arc<dyn Clock>,
}

impl Dispatcher {
    pub fn new(text: TextHandler, nodes: Arc<NodeDirectory>, clock: Arc<dyn Clock>) -> Self {
        Dispatcher { text, nodes, clock }
    }

    async fn update_node(&self, group: &PacketGroup, payload: &[u8]) -> Result<(), DispatchError> {
        let user = User::decode(payload).map_err(|source| DispatchError::Decode {
            what: "User",
            source,
        })?;
        let node = node_hex(group.first().from());
        let hop_start = group
            .envelopes()
            .iter()
            .map(|e| e.link().hop_start)
            .max()
            .unwrap_or_default();

        tracing::debug!(packet_id = group.id(), %node, long_name = %user.long_name, "node info");
        self.nodes.update(
            &node,
            NodeInfo {
                long_name: user.long_name,
                short_name: user.short_name,
                hw_model: user.hw_model,
                role: user.role,
                hop_start,
                updated_at: self.clock.now(),
            },
        )
        .await?;
        counter!(NODES_UPDATED).increment(1);
        Ok(())
    }
}

#[async_trait]
impl GroupConsumer for Dispatcher {
    type Error = DispatchError;

    async fn consume(&self, group: PacketGroup) -> Result<(), Self::Error> {
        let Some(data) = group.first().decoded() else {
            counter!(GROUPS_DISPATCHED, "port" => "encrypted").increment(1);
            return Ok(());
        };

        match PortNum::try_from(data.portnum) {
            Ok(PortNum::TextMessageApp) => {
                counter!(GROUPS_DISPATCHED, "port" => "text").increment(1);
                let text = String::from_utf8_lossy(&data.payload);
                self.text.handle(&group, &text).await;
            }
            Ok(PortNum::PositionApp) => {
                counter!(GROUPS_DISPATCHED, "port" => "position").increment(1);
                tracing::debug!(
                    packet_id = group.id(),
                    from = %node_hex(group.first().from()),
                    gateways = group.len(),
                    "position"
                );
            }
            Ok(PortNum::NodeinfoApp) => {
                counter!(GROUPS_DISPATCHED, "port" => "nodeinfo").increment(1);
                self.update_node(&group, &data.payload).await?;
            }
            _ => {
                counter!(GROUPS_DISPATCHED, "port" => "other").increment(1);
            }
        }
        Ok(())
    }
}
