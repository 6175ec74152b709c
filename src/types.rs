//! Core data model shared by every component: node identity, the
//! client-visible `Command`, and small helper types. Grounded on the
//! teacher's `protos.rs`, which groups exactly this kind of shared,
//! wire-serializable vocabulary (`ServerId`, `Term`, `LogIndex`,
//! `LogEntry`) in one place ahead of the RPC request/response types.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Small integer identifying a node. Assigned out of band (configuration),
/// never negotiated at runtime.
pub type NodeId = u64;

/// An opaque network endpoint for a node or a client.
pub type Address = SocketAddr;

/// Monotonically increasing election epoch. At most one leader per term.
pub type Term = u64;

/// 1-based position in the replicated log. Index 0 is the implicit sentinel.
pub type LogIndex = u64;

/// Position in the fixed-size slot store, also 1-based (spec.md §3: `position∈[1..K]`).
pub type Position = u32;

/// A `(NodeId, Address)` pair naming one member of the fixed peer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub node_id: NodeId,
    pub address: Address,
}

/// The action a `Command` requests against the slot store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Get,
    Set,
}

/// A client-issued operation against the replicated register.
///
/// `old_value` and `executed` start empty/false and are filled in by
/// the state machine when the command is applied (spec.md §4.B),
/// which is what makes a follower's log truncation reversible instead
/// of requiring a full log replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub client_address: Address,
    /// `"<client_address>-<client_timestamp>"`, unique per client, used for
    /// server-side dedup of retried `SET`s (spec.md §3, §4.F).
    pub serial: String,
    pub action: Action,
    pub position: Position,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub new_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub old_value: Option<String>,
    #[serde(default)]
    pub executed: bool,
}

impl Command {
    pub fn new_get(client_address: Address, serial: String, position: Position) -> Self {
        Command {
            client_address,
            serial,
            action: Action::Get,
            position,
            new_value: None,
            old_value: None,
            executed: false,
        }
    }

    pub fn new_set(
        client_address: Address,
        serial: String,
        position: Position,
        new_value: String,
    ) -> Self {
        Command {
            client_address,
            serial,
            action: Action::Set,
            position,
            new_value: Some(new_value),
            old_value: None,
            executed: false,
        }
    }
}
