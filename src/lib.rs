//! A fault-tolerant, leader-based replicated key-value register over
//! an unreliable UDP datagram network.
//!
//! The module layout mirrors the component breakdown: [`codec`] (wire
//! format), [`store`] (state machine), [`replog`] (replicated log —
//! named to avoid colliding with the `log` tracing crate), [`timers`]
//! (election/heartbeat deadlines), [`consensus`] (the role state
//! machine and RPC handlers), [`client`] (the client-side protocol
//! handler), [`config`] (bootstrap, parameters, snapshot persistence),
//! and [`node`] (the event loop tying it all to a real socket).

#[macro_use]
extern crate error_chain;

pub mod errors {
    error_chain! {
        foreign_links {
            Io(::std::io::Error);
            Json(::serde_json::Error);
            Addr(::std::net::AddrParseError);
        }

        errors {
            CorruptSnapshot(path: ::std::path::PathBuf) {
                description("corrupt per-node snapshot file")
                display("corrupt snapshot file at {:?}: refusing to start with unreadable persistent state", path)
            }

            UnknownPeer(id: u64) {
                description("reference to a node id not in the peer table")
                display("no such peer: {}", id)
            }

            NotLeader {
                description("this node is not the current leader")
                display("this node is not the current leader")
            }
        }
    }
}

pub mod types;

pub mod store;
pub mod replog;
pub mod codec;
pub mod timers;
pub mod consensus;
pub mod config;
pub mod client;
pub mod node;
