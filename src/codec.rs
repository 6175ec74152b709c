//! Component A: the wire codec.
//!
//! spec.md §4.A describes one envelope carrying any RPC, with most
//! fields nullable and the unused ones omitted; §9 "Nullable union
//! fields" asks for that envelope to become an explicit tagged
//! variant (sum type) instead of one struct with a pile of
//! `Option<T>` fields, and for decoding to reject a field set that
//! doesn't match its tag.
//!
//! We get both: `WireMessage` is the literal flat-with-many-optionals
//! shape from spec.md §6 (this is what actually goes over the
//! socket as JSON, and is what makes decoding tolerant of absent
//! fields the way the original Python `Message.deserialize` is), and
//! `Envelope`/`Body` is the sum type the rest of the engine works
//! with. `TryFrom<WireMessage>` is where the tag-consistency check
//! lives; unknown `msg_type` values are dropped (spec.md §7) by
//! returning `None` from `Envelope::decode` rather than an error.

use std::convert::TryFrom;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::replog::LogEntry;
use crate::types::{Address, Command, LogIndex, NodeId, Term};

/// Which way a message is flowing: outbound request or a reply to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Request,
    Reply,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteRequest {
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestVoteReply {
    pub granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub prev_index: LogIndex,
    pub prev_term: Term,
    pub entries: Vec<LogEntry>,
    pub commit_index: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesReply {
    pub success: bool,
    pub match_index: LogIndex,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRequestRequest {
    pub command: Command,
}

/// Exactly one of `response`/`leader_address` is normally set; both may
/// be absent when the server has no leader info (spec.md §6).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientRequestReply {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub leader_address: Option<Address>,
}

/// The per-`msg_type` payload, one request/reply pair per RPC kind.
#[derive(Debug, Clone)]
pub enum Body {
    RequestVote(RpcSide<RequestVoteRequest, RequestVoteReply>),
    AppendEntries(RpcSide<AppendEntriesRequest, AppendEntriesReply>),
    ClientRequest(RpcSide<ClientRequestRequest, ClientRequestReply>),
}

#[derive(Debug, Clone)]
pub enum RpcSide<Req, Rep> {
    Request(Req),
    Reply(Rep),
}

/// A fully decoded message: common envelope fields plus a typed body.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from_address: Address,
    pub to_address: Address,
    pub from_id: NodeId,
    pub term: Term,
    pub body: Body,
}

impl Envelope {
    pub fn direction(&self) -> Direction {
        match &self.body {
            Body::RequestVote(RpcSide::Request(_))
            | Body::AppendEntries(RpcSide::Request(_))
            | Body::ClientRequest(RpcSide::Request(_)) => Direction::Request,
            _ => Direction::Reply,
        }
    }

    /// Encodes to the wire's UTF-8 JSON form. Max expected datagram size
    /// is 4096 bytes (spec.md §6); callers are responsible for not
    /// exceeding it (a heartbeat with a handful of small entries never
    /// will in practice).
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&WireMessage::from(self))
    }

    /// Decodes a single datagram payload. Returns `Ok(None)` for a
    /// well-formed envelope whose `msg_type` this codec doesn't know
    /// about or whose fields are inconsistent with its tag — both are
    /// "drop silently, log" per spec.md §7, not hard errors. Returns
    /// `Err` only for payloads that aren't even valid JSON/UTF-8.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<Option<Envelope>> {
        let wire: WireMessage = serde_json::from_slice(bytes)?;
        Ok(Envelope::try_from(wire).ok())
    }
}

/// The literal flat wire shape from spec.md §6: one `msg_type` tag, one
/// `direction` tag, and every per-type field present as an `Option`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub msg_type: String,
    pub direction: Direction,
    pub from_address: Address,
    pub to_address: Address,
    pub from_id: NodeId,
    pub term: Term,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_log_index: Option<LogIndex>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_log_term: Option<Term>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub granted: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prev_index: Option<LogIndex>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prev_term: Option<Term>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entries: Option<Vec<LogEntry>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub commit_index: Option<LogIndex>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub match_index: Option<LogIndex>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub command: Option<Command>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub leader_address: Option<Address>,
}

const REQUEST_VOTE: &str = "RequestVote";
const APPEND_ENTRIES: &str = "AppendEntries";
const CLIENT_REQUEST: &str = "ClientRequest";

impl From<&Envelope> for WireMessage {
    fn from(e: &Envelope) -> Self {
        let mut w = WireMessage {
            msg_type: String::new(),
            direction: e.direction(),
            from_address: e.from_address,
            to_address: e.to_address,
            from_id: e.from_id,
            term: e.term,
            last_log_index: None,
            last_log_term: None,
            granted: None,
            prev_index: None,
            prev_term: None,
            entries: None,
            commit_index: None,
            success: None,
            match_index: None,
            command: None,
            response: None,
            leader_address: None,
        };

        match &e.body {
            Body::RequestVote(side) => {
                w.msg_type = REQUEST_VOTE.to_string();
                match side {
                    RpcSide::Request(req) => {
                        w.last_log_index = Some(req.last_log_index);
                        w.last_log_term = Some(req.last_log_term);
                    }
                    RpcSide::Reply(rep) => {
                        w.granted = Some(rep.granted);
                    }
                }
            }
            Body::AppendEntries(side) => {
                w.msg_type = APPEND_ENTRIES.to_string();
                match side {
                    RpcSide::Request(req) => {
                        w.prev_index = Some(req.prev_index);
                        w.prev_term = Some(req.prev_term);
                        w.entries = Some(req.entries.clone());
                        w.commit_index = Some(req.commit_index);
                    }
                    RpcSide::Reply(rep) => {
                        w.success = Some(rep.success);
                        w.match_index = Some(rep.match_index);
                    }
                }
            }
            Body::ClientRequest(side) => {
                w.msg_type = CLIENT_REQUEST.to_string();
                match side {
                    RpcSide::Request(req) => {
                        w.command = Some(req.command.clone());
                    }
                    RpcSide::Reply(rep) => {
                        w.response = rep.response.clone();
                        w.leader_address = rep.leader_address;
                    }
                }
            }
        }

        w
    }
}

/// Reason a `WireMessage` couldn't be reconstructed into a typed `Envelope`:
/// either the tag is unrecognized, or the field set doesn't match it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(pub String);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for DecodeError {}

impl TryFrom<WireMessage> for Envelope {
    type Error = DecodeError;

    fn try_from(w: WireMessage) -> Result<Self, Self::Error> {
        let body = match (w.msg_type.as_str(), w.direction) {
            (REQUEST_VOTE, Direction::Request) => {
                let last_log_index = w
                    .last_log_index
                    .ok_or_else(|| DecodeError("RequestVote request missing last_log_index".into()))?;
                let last_log_term = w
                    .last_log_term
                    .ok_or_else(|| DecodeError("RequestVote request missing last_log_term".into()))?;
                Body::RequestVote(RpcSide::Request(RequestVoteRequest {
                    last_log_index,
                    last_log_term,
                }))
            }
            (REQUEST_VOTE, Direction::Reply) => {
                let granted = w
                    .granted
                    .ok_or_else(|| DecodeError("RequestVote reply missing granted".into()))?;
                Body::RequestVote(RpcSide::Reply(RequestVoteReply { granted }))
            }
            (APPEND_ENTRIES, Direction::Request) => {
                let prev_index = w
                    .prev_index
                    .ok_or_else(|| DecodeError("AppendEntries request missing prev_index".into()))?;
                let prev_term = w
                    .prev_term
                    .ok_or_else(|| DecodeError("AppendEntries request missing prev_term".into()))?;
                let commit_index = w
                    .commit_index
                    .ok_or_else(|| DecodeError("AppendEntries request missing commit_index".into()))?;
                let entries = w.entries.unwrap_or_default();
                Body::AppendEntries(RpcSide::Request(AppendEntriesRequest {
                    prev_index,
                    prev_term,
                    entries,
                    commit_index,
                }))
            }
            (APPEND_ENTRIES, Direction::Reply) => {
                let success = w
                    .success
                    .ok_or_else(|| DecodeError("AppendEntries reply missing success".into()))?;
                let match_index = w.match_index.unwrap_or(0);
                Body::AppendEntries(RpcSide::Reply(AppendEntriesReply {
                    success,
                    match_index,
                }))
            }
            (CLIENT_REQUEST, Direction::Request) => {
                let command = w
                    .command
                    .ok_or_else(|| DecodeError("ClientRequest request missing command".into()))?;
                Body::ClientRequest(RpcSide::Request(ClientRequestRequest { command }))
            }
            (CLIENT_REQUEST, Direction::Reply) => {
                Body::ClientRequest(RpcSide::Reply(ClientRequestReply {
                    response: w.response,
                    leader_address: w.leader_address,
                }))
            }
            (other, _) => return Err(DecodeError(format!("unknown msg_type: {}", other))),
        };

        Ok(Envelope {
            from_address: w.from_address,
            to_address: w.to_address,
            from_id: w.from_id,
            term: w.term,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Command;

    fn addr(port: u16) -> Address {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn round_trip(e: Envelope) -> Envelope {
        let bytes = e.encode().unwrap();
        Envelope::decode(&bytes).unwrap().unwrap()
    }

    #[test]
    fn request_vote_round_trips() {
        let e = Envelope {
            from_address: addr(3001),
            to_address: addr(3002),
            from_id: 1,
            term: 4,
            body: Body::RequestVote(RpcSide::Request(RequestVoteRequest {
                last_log_index: 10,
                last_log_term: 3,
            })),
        };
        let got = round_trip(e);
        match got.body {
            Body::RequestVote(RpcSide::Request(r)) => {
                assert_eq!(r.last_log_index, 10);
                assert_eq!(r.last_log_term, 3);
            }
            _ => panic!("wrong body variant"),
        }
        assert_eq!(got.term, 4);
    }

    #[test]
    fn append_entries_with_entries_round_trips() {
        let cmd = Command::new_get(addr(4001), "c-1".into(), 2);
        let entry = LogEntry { command: cmd, term: 2 };
        let e = Envelope {
            from_address: addr(3001),
            to_address: addr(3002),
            from_id: 1,
            term: 2,
            body: Body::AppendEntries(RpcSide::Request(AppendEntriesRequest {
                prev_index: 0,
                prev_term: 0,
                entries: vec![entry],
                commit_index: 0,
            })),
        };
        let got = round_trip(e);
        match got.body {
            Body::AppendEntries(RpcSide::Request(r)) => assert_eq!(r.entries.len(), 1),
            _ => panic!("wrong body variant"),
        }
    }

    #[test]
    fn client_request_reply_with_neither_field_round_trips() {
        let e = Envelope {
            from_address: addr(3001),
            to_address: addr(4001),
            from_id: 1,
            term: 0,
            body: Body::ClientRequest(RpcSide::Reply(ClientRequestReply::default())),
        };
        let got = round_trip(e);
        match got.body {
            Body::ClientRequest(RpcSide::Reply(r)) => {
                assert!(r.response.is_none());
                assert!(r.leader_address.is_none());
            }
            _ => panic!("wrong body variant"),
        }
    }

    #[test]
    fn unknown_msg_type_is_dropped_not_errored() {
        let raw = serde_json::json!({
            "msg_type": "InstallSnapshot",
            "direction": "request",
            "from_address": "127.0.0.1:3001",
            "to_address": "127.0.0.1:3002",
            "from_id": 1,
            "term": 0,
        });
        let bytes = serde_json::to_vec(&raw).unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn field_set_inconsistent_with_tag_is_dropped() {
        let raw = serde_json::json!({
            "msg_type": "RequestVote",
            "direction": "request",
            "from_address": "127.0.0.1:3001",
            "to_address": "127.0.0.1:3002",
            "from_id": 1,
            "term": 0,
        });
        let bytes = serde_json::to_vec(&raw).unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        assert!(decoded.is_none());
    }
}
