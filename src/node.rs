//! The event loop binding the consensus engine to a real UDP socket.
//!
//! spec.md §5 "Scheduling model": one inbound datagram socket, a
//! single cooperative loop that on every wake (message received OR
//! receive timed out) checks timers, then dispatches. Grounded on the
//! teacher's habit of keeping the reactor/transport thin and pushing
//! all the real state transitions into `ConsensusModule` — here there
//! is no reactor at all, just a blocking `recv_from` with a deadline.

use std::net::UdpSocket;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use crate::codec::{Body, Envelope, RpcSide};
use crate::config::{self, Bootstrap};
use crate::consensus::{ClientDecision, ConsensusModule, Effects};
use crate::errors::*;

const MAX_DATAGRAM: usize = 4096;

/// Owns the socket and the consensus engine, and runs the loop.
pub struct Node {
    socket: UdpSocket,
    consensus: ConsensusModule,
    snapshot_path: PathBuf,
    read_lease_wait: Duration,
}

impl Node {
    pub fn bootstrap(
        boot: Bootstrap,
        election_interval: (Duration, Duration),
        heartbeat_interval: Duration,
        read_lease_wait: Duration,
    ) -> Result<Node> {
        let socket = UdpSocket::bind(boot.address)?;
        let consensus = ConsensusModule::new(
            boot.node_id,
            boot.address,
            boot.peers,
            boot.current_term,
            boot.voted_for,
            boot.log,
            boot.store,
            election_interval,
            heartbeat_interval,
        );
        Ok(Node {
            socket,
            consensus,
            snapshot_path: boot.snapshot_path,
            read_lease_wait,
        })
    }

    /// Runs until killed. Never returns `Ok`; every loop iteration that
    /// can fail logs and continues rather than propagating, per
    /// spec.md §7 "nothing above the event loop raises to the process".
    pub fn run(&mut self) -> Result<()> {
        info!(
            "node {} listening on {} ({} peers)",
            self.consensus.id(),
            self.consensus.address(),
            self.consensus.peers().len()
        );

        let mut buf = [0u8; MAX_DATAGRAM];
        loop {
            let now = Instant::now();
            let timeout = self.consensus.next_wakeup(now).max(Duration::from_millis(1));
            self.socket.set_read_timeout(Some(timeout))?;

            let received = match self.socket.recv_from(&mut buf) {
                Ok((n, src)) => Some((n, src)),
                Err(e) if is_timeout(&e) => None,
                Err(e) => {
                    warn!("socket receive error: {}", e);
                    None
                }
            };

            let now = Instant::now();
            let mut effects = Effects::new();
            self.consensus.tick(now, &mut effects);

            if let Some((n, _src)) = received {
                match Envelope::decode(&buf[..n]) {
                    Ok(Some(envelope)) => self.dispatch(envelope, now, &mut effects),
                    Ok(None) => debug!("dropping unrecognized message"),
                    Err(e) => warn!("dropping malformed datagram: {}", e),
                }
            }

            self.flush(effects);
        }
    }

    fn dispatch(&mut self, envelope: Envelope, now: Instant, effects: &mut Effects) {
        let from_id = envelope.from_id;
        let from_address = envelope.from_address;
        let term = envelope.term;

        match envelope.body {
            Body::RequestVote(RpcSide::Request(req)) => {
                self.consensus.handle_request_vote(from_id, from_address, term, req, effects);
            }
            Body::RequestVote(RpcSide::Reply(reply)) => {
                self.consensus.handle_request_vote_reply(from_id, term, reply, now, effects);
            }
            Body::AppendEntries(RpcSide::Request(req)) => {
                self.consensus.handle_append_entries(from_address, term, req, effects);
            }
            Body::AppendEntries(RpcSide::Reply(reply)) => {
                self.consensus.handle_append_entries_reply(from_id, term, reply, effects);
            }
            Body::ClientRequest(RpcSide::Request(req)) => {
                self.handle_client_request(req.command, from_address, now, effects);
            }
            Body::ClientRequest(RpcSide::Reply(_)) => {
                debug!("node {} ignoring stray ClientRequest reply", self.consensus.id());
            }
        }
    }

    /// spec.md §4.F server-side `ClientRequest` handling. `GET`
    /// deliberately blocks this single-threaded loop for
    /// `read_lease_wait` after triggering a confirmation heartbeat —
    /// the documented read-lease approximation (spec.md §9).
    fn handle_client_request(
        &mut self,
        cmd: crate::types::Command,
        client_address: crate::types::Address,
        now: Instant,
        effects: &mut Effects,
    ) {
        let position = cmd.position;
        let decision = self.consensus.handle_client_request(cmd, now, effects);
        self.flush(std::mem::take(effects));

        match decision {
            ClientDecision::Redirect(leader_address) => {
                self.reply_to_client(client_address, None, leader_address);
            }
            ClientDecision::AlreadyExecuted => {
                self.reply_to_client(
                    client_address,
                    Some("Command already executed successfully!".to_string()),
                    None,
                );
            }
            ClientDecision::ReadPending { position: _ } => {
                std::thread::sleep(self.read_lease_wait);
                let value = self.consensus.read(position);
                self.reply_to_client(client_address, value, None);
            }
            ClientDecision::Appended => {
                // Reply is emitted later, from the apply step, once the entry commits.
            }
        }
    }

    fn reply_to_client(
        &mut self,
        client_address: crate::types::Address,
        response: Option<String>,
        leader_address: Option<crate::types::Address>,
    ) {
        let envelope = Envelope {
            from_address: self.consensus.address(),
            to_address: client_address,
            from_id: self.consensus.id(),
            term: self.consensus.current_term(),
            body: Body::ClientRequest(RpcSide::Reply(crate::codec::ClientRequestReply {
                response,
                leader_address,
            })),
        };
        self.send(envelope);
    }

    /// Persists state (if anything changed) before sending anything,
    /// then sends every accumulated outbound message. Matches spec.md
    /// §6 "rewritten atomically on each state-mutating RPC before the
    /// reply is sent."
    fn flush(&mut self, effects: Effects) {
        if effects.persist {
            if let Err(e) = self.persist() {
                error!("failed to persist snapshot: {}", e);
            }
        }
        for envelope in effects.outbound {
            self.send(envelope);
        }
    }

    fn persist(&self) -> Result<()> {
        let address = self.consensus.address();
        config::persist_snapshot(
            &self.snapshot_path,
            self.consensus.id(),
            address.ip(),
            address.port(),
            self.consensus.peers(),
            self.consensus.current_term(),
            self.consensus.voted_for(),
            self.consensus.log(),
            self.consensus.store(),
        )
    }

    fn send(&mut self, envelope: Envelope) {
        let to = envelope.to_address;
        match envelope.encode() {
            Ok(bytes) => {
                if let Err(e) = self.socket.send_to(&bytes, to) {
                    warn!("send to {} failed: {}", to, e);
                }
            }
            Err(e) => error!("failed to encode outbound message to {}: {}", to, e),
        }
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut)
}
