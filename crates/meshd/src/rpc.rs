//! Server-side RPC handlers: PING / STORE / FIND_NODE / FIND_VALUE.
//!
//! A malformed payload for a known RPC is treated the same as a
//! malformed envelope (spec 4.5/4.6 "silence = failure"): `None` tells
//! the caller to drop the datagram without replying.

use meshcas_core::ids::{key_to_target, NodeId};
use meshcas_core::wire::{
    DhtMessage, FindNodeRequest, FindNodeResponse, FindValueRequest, FindValueResponse,
    PongResponse, Rpc, StoreRequest, StoreResponse,
};
use meshcas_store::{DhtStorage, RoutingTable};
use serde_json::Value;

pub fn handle_request(
    msg: &DhtMessage,
    routing: &RoutingTable,
    storage: &DhtStorage,
) -> Option<Value> {
    match msg.rpc {
        Rpc::Ping => Some(serde_json::to_value(PongResponse::default()).unwrap()),
        Rpc::Store => {
            let req: StoreRequest = serde_json::from_value(msg.payload.clone()).ok()?;
            storage.store(&req.key, req.value);
            Some(serde_json::to_value(StoreResponse::default()).unwrap())
        }
        Rpc::FindNode => {
            let req: FindNodeRequest = serde_json::from_value(msg.payload.clone()).ok()?;
            let target = NodeId::from_hex(&req.target)?;
            let nodes = routing
                .closest_nodes(&target, routing.k())
                .into_iter()
                .filter(|n| n.node_id != msg.sender.node_id)
                .collect();
            Some(serde_json::to_value(FindNodeResponse { nodes }).unwrap())
        }
        Rpc::FindValue => {
            let req: FindValueRequest = serde_json::from_value(msg.payload.clone()).ok()?;
            if let Some(value) = storage.get(&req.key) {
                return Some(
                    serde_json::to_value(FindValueResponse {
                        found: true,
                        value: Some(value),
                        nodes: Vec::new(),
                    })
                    .unwrap(),
                );
            }
            let target = key_to_target(&req.key);
            let nodes = routing
                .closest_nodes(&target, routing.k())
                .into_iter()
                .filter(|n| n.node_id != msg.sender.node_id)
                .collect();
            Some(
                serde_json::to_value(FindValueResponse { found: false, value: None, nodes })
                    .unwrap(),
            )
        }
    }
}
