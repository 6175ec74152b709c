//! Component E: the consensus state machine.
//!
//! Grounded on the teacher's `ConsensusModule` in `consensus.rs`: a
//! struct holding persistent + volatile Raft state, a `cycle`/`tick`
//! entry point driven by wall-clock deadlines rather than a reactor,
//! and handler methods that take an output parameter (`tick: &mut
//! Tick` there, `effects: &mut Effects` here) instead of returning a
//! pile of side-effect values. The RPC handling itself follows
//! spec.md §4.E; the role/timer shapes follow §4.D.
//!
//! Unlike the teacher, there's no tokio reactor or RPC client struct:
//! every handler here is a plain, synchronous function call from the
//! single-threaded event loop in `node.rs`, and every message it wants
//! sent comes back out through `effects.outbound` instead of being
//! fired off internally.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::codec::{
    AppendEntriesReply, AppendEntriesRequest, Body, ClientRequestReply, Envelope, RequestVoteReply,
    RequestVoteRequest, RpcSide,
};
use crate::replog::{Log, LogEntry};
use crate::store::SlotStore;
use crate::types::{Action, Address, Command, LogIndex, NodeId, Peer, Term};

/// Accumulates the side effects of one call into the consensus module:
/// outbound messages to send, and whether persistent state changed
/// and needs to be flushed to the snapshot file before anything above
/// this layer is allowed to see the messages go out (spec.md §4.G
/// "Bootstrap and persistence": "before replying to any RPC that
/// changed persistent state").
#[derive(Debug, Default)]
pub struct Effects {
    pub persist: bool,
    pub outbound: Vec<Envelope>,
}

impl Effects {
    pub fn new() -> Self {
        Effects::default()
    }

    fn send(&mut self, envelope: Envelope) {
        self.outbound.push(envelope);
    }

    fn mark_persist(&mut self) {
        self.persist = true;
    }
}

/// What a leader should do about a client request right away; the
/// actual reply text for a freshly-appended `SET` doesn't exist yet
/// and arrives later out of [`ConsensusModule::apply_committed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientDecision {
    /// Not the leader: redirect to whoever we last heard from (if anyone).
    Redirect(Option<Address>),
    /// A log entry with this serial was already executed; reply now.
    AlreadyExecuted,
    /// Leader, `GET`: caller must send `effects.outbound` (the
    /// confirmation heartbeat), wait roughly a third of the client
    /// timeout, then call [`ConsensusModule::read`] and reply with the
    /// result (spec.md §4.F, §9 "approximate read lease").
    ReadPending { position: u32 },
    /// Leader, `SET`: appended to the log. The reply is emitted later,
    /// once the entry commits and is applied.
    Appended,
}

/// Volatile role state. Unlike the teacher's `ServerState` (which
/// keeps `meta`/`consensus_proxy` split apart for its async RPC
/// client), everything a role needs lives directly on its variant.
#[derive(Debug, Clone)]
enum Role {
    Follower,
    Candidate {
        votes: HashSet<NodeId>,
    },
    Leader {
        next_index: HashMap<NodeId, LogIndex>,
        match_index: HashMap<NodeId, LogIndex>,
    },
}

/// The replicated register's Raft core: one node's view of the
/// cluster. Owns persistent state (`current_term`, `voted_for`,
/// `log`), the state machine (`store`), and volatile role state, and
/// exposes a handler per spec.md §4.E step plus a periodic `tick`.
pub struct ConsensusModule {
    id: NodeId,
    address: Address,
    peers: Vec<Peer>,
    quorum: usize,

    current_term: Term,
    voted_for: Option<NodeId>,
    log: Log,
    store: SlotStore,

    commit_index: LogIndex,
    last_applied: LogIndex,
    leader_address: Option<Address>,
    role: Role,

    election_timer: crate::timers::ElectionTimer,
    heartbeat_timer: crate::timers::HeartbeatTimer,
}

impl ConsensusModule {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: NodeId,
        address: Address,
        peers: Vec<Peer>,
        current_term: Term,
        voted_for: Option<NodeId>,
        log: Log,
        store: SlotStore,
        election_timeout: (Duration, Duration),
        heartbeat_interval: Duration,
    ) -> Self {
        let total_nodes = peers.len() + 1;
        let quorum = total_nodes / 2 + 1;
        ConsensusModule {
            id,
            address,
            peers,
            quorum,
            current_term,
            voted_for,
            log,
            store,
            commit_index: 0,
            last_applied: 0,
            leader_address: None,
            role: Role::Follower,
            election_timer: crate::timers::ElectionTimer::new(election_timeout.0, election_timeout.1),
            heartbeat_timer: crate::timers::HeartbeatTimer::new(heartbeat_interval),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn is_leader(&self) -> bool {
        matches!(self.role, Role::Leader { .. })
    }

    pub fn role_label(&self) -> &'static str {
        match self.role {
            Role::Follower => "follower",
            Role::Candidate { .. } => "candidate",
            Role::Leader { .. } => "leader",
        }
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn voted_for(&self) -> Option<NodeId> {
        self.voted_for
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn store(&self) -> &SlotStore {
        &self.store
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn leader_address(&self) -> Option<Address> {
        self.leader_address
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn read(&self, position: u32) -> Option<String> {
        self.store.get(position).map(str::to_string)
    }

    /// How long the event loop's blocking receive should wait before
    /// the next timer needs checking (spec.md §5: "the recv call's
    /// timeout is set to the time remaining until the next deadline").
    pub fn next_wakeup(&self, now: Instant) -> Duration {
        match &self.role {
            Role::Leader { .. } => self.heartbeat_timer.remaining(now),
            _ => self
                .election_timer
                .remaining(now)
                .unwrap_or_else(|| Duration::from_millis(50)),
        }
    }

    /// Checks both timers against `now` and reacts: a follower or
    /// candidate whose election timer has elapsed starts (or restarts)
    /// an election; a leader whose heartbeat timer has elapsed sends
    /// another round (spec.md §4.D role table).
    pub fn tick(&mut self, now: Instant, effects: &mut Effects) {
        match &self.role {
            Role::Follower | Role::Candidate { .. } => {
                if self.election_timer.has_elapsed(now) {
                    self.start_election(now, effects);
                }
            }
            Role::Leader { .. } => {
                if self.heartbeat_timer.has_elapsed(now) {
                    self.broadcast_heartbeat(now, effects);
                }
            }
        }
    }

    /// Steps down to `Follower` and bumps `current_term` if `term` is
    /// newer than ours (spec.md §4.E "observe term" rule, applied at
    /// the top of every RPC handler). Returns `true` if we stepped
    /// down as a result.
    fn observe_term(&mut self, term: Term, effects: &mut Effects) -> bool {
        if term > self.current_term {
            self.current_term = term;
            self.voted_for = None;
            effects.mark_persist();
            self.role = Role::Follower;
            self.election_timer.reset();
            true
        } else {
            false
        }
    }

    fn start_election(&mut self, now: Instant, effects: &mut Effects) {
        self.current_term += 1;
        self.voted_for = Some(self.id);
        effects.mark_persist();
        let mut votes = HashSet::new();
        votes.insert(self.id);
        self.role = Role::Candidate { votes };
        self.election_timer.reset();

        info!("node {} starting election for term {}", self.id, self.current_term);

        let last_log_index = self.log.len();
        let last_log_term = self.log.term_at(last_log_index);
        for peer in &self.peers {
            effects.send(Envelope {
                from_address: self.address,
                to_address: peer.address,
                from_id: self.id,
                term: self.current_term,
                body: Body::RequestVote(RpcSide::Request(RequestVoteRequest {
                    last_log_index,
                    last_log_term,
                })),
            });
        }

        let _ = now;
    }

    fn become_leader(&mut self, now: Instant, effects: &mut Effects) {
        info!("node {} becoming leader for term {}", self.id, self.current_term);
        let last_log_index = self.log.len();
        let mut next_index = HashMap::new();
        let mut match_index = HashMap::new();
        for peer in &self.peers {
            next_index.insert(peer.node_id, last_log_index + 1);
            match_index.insert(peer.node_id, 0);
        }
        self.role = Role::Leader { next_index, match_index };
        self.leader_address = Some(self.address);
        self.election_timer.suspend();
        self.heartbeat_timer.reset(now);
        self.broadcast_heartbeat(now, effects);
    }

    fn broadcast_heartbeat(&mut self, now: Instant, effects: &mut Effects) {
        let next_index = match &self.role {
            Role::Leader { next_index, .. } => next_index.clone(),
            _ => return,
        };
        let term = self.current_term;
        let commit_index = self.commit_index;
        for peer in &self.peers {
            let next = *next_index.get(&peer.node_id).unwrap_or(&1);
            let prev_index = next.saturating_sub(1);
            let prev_term = self.log.term_at(prev_index);
            let entries = self.log.entries_from(next).to_vec();
            effects.send(Envelope {
                from_address: self.address,
                to_address: peer.address,
                from_id: self.id,
                term,
                body: Body::AppendEntries(RpcSide::Request(AppendEntriesRequest {
                    prev_index,
                    prev_term,
                    entries,
                    commit_index,
                })),
            });
        }
        self.heartbeat_timer.reset(now);
    }

    /// spec.md §4.E `RequestVote` handling.
    pub fn handle_request_vote(
        &mut self,
        from_id: NodeId,
        from_address: Address,
        term: Term,
        req: RequestVoteRequest,
        effects: &mut Effects,
    ) {
        self.observe_term(term, effects);

        let mut granted = false;
        if term == self.current_term {
            let our_last_term = self.log.term_at(self.log.len());
            let log_ok = req.last_log_term > our_last_term
                || (req.last_log_term == our_last_term && req.last_log_index >= self.log.len());
            let can_vote = self.voted_for.is_none() || self.voted_for == Some(from_id);
            if can_vote && log_ok {
                granted = true;
                self.voted_for = Some(from_id);
                effects.mark_persist();
                self.election_timer.reset();
            }
        }

        debug!("node {} voting {} for node {} in term {}", self.id, granted, from_id, term);

        effects.send(Envelope {
            from_address: self.address,
            to_address: from_address,
            from_id: self.id,
            term: self.current_term,
            body: Body::RequestVote(RpcSide::Reply(RequestVoteReply { granted })),
        });
    }

    /// spec.md §4.E `RequestVote` reply handling.
    pub fn handle_request_vote_reply(
        &mut self,
        from_id: NodeId,
        term: Term,
        reply: RequestVoteReply,
        now: Instant,
        effects: &mut Effects,
    ) {
        if self.observe_term(term, effects) {
            return;
        }
        if term != self.current_term || !reply.granted {
            return;
        }
        let became_leader = if let Role::Candidate { votes } = &mut self.role {
            votes.insert(from_id);
            votes.len() >= self.quorum
        } else {
            false
        };
        if became_leader {
            self.become_leader(now, effects);
        }
    }

    /// spec.md §4.E `AppendEntries` handling, including the log
    /// matching / truncation walk (§4.C) and commit-index advance on
    /// the follower side.
    pub fn handle_append_entries(
        &mut self,
        from_address: Address,
        term: Term,
        req: AppendEntriesRequest,
        effects: &mut Effects,
    ) {
        self.observe_term(term, effects);

        if term < self.current_term {
            effects.send(self.append_entries_reply(from_address, false, 0));
            return;
        }

        if term == self.current_term {
            self.role = Role::Follower;
            self.leader_address = Some(from_address);
            self.election_timer.reset();
        }

        let prev_ok = req.prev_index == 0
            || (req.prev_index <= self.log.len() && self.log.term_at(req.prev_index) == req.prev_term);
        if !prev_ok {
            effects.send(self.append_entries_reply(from_address, false, 0));
            return;
        }

        self.accept_entries(req.prev_index, &req.entries, effects);

        if req.commit_index > self.commit_index {
            self.commit_index = req.commit_index.min(self.log.len());
            self.apply_committed(effects);
        }

        let match_index = req.prev_index + req.entries.len() as LogIndex;
        effects.send(self.append_entries_reply(from_address, true, match_index));
    }

    /// Walks the incoming entries against our own log starting right
    /// after `prev_index`. The first position where our term disagrees
    /// with theirs truncates our log from there (reverting applied
    /// state along the way) and appends the rest of the batch;
    /// matching entries are left untouched (spec.md §4.C).
    fn accept_entries(&mut self, prev_index: LogIndex, entries: &[LogEntry], effects: &mut Effects) {
        let mut index = prev_index;
        for (i, incoming) in entries.iter().enumerate() {
            index += 1;
            match self.log.entry(index) {
                Some(existing) if existing.term == incoming.term => continue,
                Some(_) => {
                    self.log.truncate_from(index, &mut self.store);
                    self.log.append_all(entries[i..].iter().cloned());
                    effects.mark_persist();
                    return;
                }
                None => {
                    self.log.append_all(entries[i..].iter().cloned());
                    effects.mark_persist();
                    return;
                }
            }
        }
    }

    fn append_entries_reply(&self, to_address: Address, success: bool, match_index: LogIndex) -> Envelope {
        Envelope {
            from_address: self.address,
            to_address,
            from_id: self.id,
            term: self.current_term,
            body: Body::AppendEntries(RpcSide::Reply(AppendEntriesReply { success, match_index })),
        }
    }

    /// spec.md §4.E `AppendEntries` reply handling: advances
    /// `next_index`/`match_index` on success, backs off `next_index`
    /// on failure, then checks whether commit can advance.
    pub fn handle_append_entries_reply(
        &mut self,
        from_id: NodeId,
        term: Term,
        reply: AppendEntriesReply,
        effects: &mut Effects,
    ) {
        if self.observe_term(term, effects) {
            return;
        }
        if term != self.current_term {
            return;
        }
        if !matches!(self.role, Role::Leader { .. }) {
            return;
        }

        if reply.success {
            if let Role::Leader { next_index, match_index } = &mut self.role {
                match_index.insert(from_id, reply.match_index);
                next_index.insert(from_id, reply.match_index + 1);
            }
            self.advance_commit_index(effects);
        } else if let Role::Leader { next_index, .. } = &mut self.role {
            let cur = *next_index.get(&from_id).unwrap_or(&1);
            next_index.insert(from_id, cur.saturating_sub(1).max(1));
        }
    }

    /// spec.md §4.E commit advancement: the Q-th largest value among
    /// every peer's `match_index` plus our own (`log.len()`) is a
    /// candidate new `commit_index`, but only if that entry was
    /// appended in our current term — the §5.4.2 safety guard that
    /// keeps a leader from committing another leader's entry purely by
    /// replica count.
    fn advance_commit_index(&mut self, effects: &mut Effects) {
        let match_index = match &self.role {
            Role::Leader { match_index, .. } => match_index,
            _ => return,
        };
        let mut values: Vec<LogIndex> = match_index.values().copied().collect();
        values.push(self.log.len());
        values.sort_unstable_by(|a, b| b.cmp(a));
        let n = values[self.quorum - 1];
        if n > self.commit_index && self.log.term_at(n) == self.current_term {
            self.commit_index = n;
            self.apply_committed(effects);
        }
    }

    /// Applies every committed-but-not-yet-applied log entry to the
    /// state machine in order. For each one whose command came from a
    /// client, a leader also emits the client's reply right here
    /// (spec.md §4.E "immediately after applying... sends a
    /// ClientRequest reply"); a follower applies silently, since the
    /// client never contacted it. Marks persistence dirty on every
    /// entry applied: this can run off a bare heartbeat with no new
    /// entries of its own, so `accept_entries`'s `mark_persist()` alone
    /// doesn't cover it.
    fn apply_committed(&mut self, effects: &mut Effects) {
        while self.commit_index > self.last_applied {
            self.last_applied += 1;
            let idx = self.last_applied;
            let is_leader = self.is_leader();
            let address = self.address;
            let id = self.id;
            let term = self.current_term;
            if let Some(entry) = self.log.entry_mut(idx) {
                self.store.apply(&mut entry.command);
                effects.mark_persist();
                if is_leader {
                    effects.send(Envelope {
                        from_address: address,
                        to_address: entry.command.client_address,
                        from_id: id,
                        term,
                        body: Body::ClientRequest(RpcSide::Reply(ClientRequestReply {
                            response: Some("Command executed successfully!".to_string()),
                            leader_address: None,
                        })),
                    });
                }
            }
        }
    }

    /// spec.md §4.F client-request handling. `GET` never touches the
    /// log: the caller is told to trigger a confirmation heartbeat
    /// (already enqueued in `effects`), wait out the read-lease
    /// window, then read and reply — see [`ClientDecision::ReadPending`]
    /// and the hazard documented at spec.md §9.
    pub fn handle_client_request(&mut self, cmd: Command, now: Instant, effects: &mut Effects) -> ClientDecision {
        if !self.is_leader() {
            return ClientDecision::Redirect(self.leader_address);
        }

        match cmd.action {
            Action::Get => {
                self.broadcast_heartbeat(now, effects);
                ClientDecision::ReadPending { position: cmd.position }
            }
            Action::Set => {
                let already_done = self
                    .log
                    .entries_from(1)
                    .iter()
                    .any(|e| e.command.serial == cmd.serial && e.command.executed);
                if already_done {
                    return ClientDecision::AlreadyExecuted;
                }
                self.propose(cmd, now, effects);
                ClientDecision::Appended
            }
        }
    }

    fn propose(&mut self, cmd: Command, now: Instant, effects: &mut Effects) {
        let term = self.current_term;
        self.log.append(LogEntry { command: cmd, term });
        effects.mark_persist();
        self.broadcast_heartbeat(now, effects);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Command;
    use std::net::SocketAddr;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn peer(id: NodeId, port: u16) -> Peer {
        Peer { node_id: id, address: addr(port) }
    }

    fn module(id: NodeId, peers: Vec<Peer>) -> ConsensusModule {
        ConsensusModule::new(
            id,
            addr(3000 + id as u16),
            peers,
            0,
            None,
            Log::new(),
            SlotStore::default(),
            (Duration::from_millis(150), Duration::from_millis(300)),
            Duration::from_millis(50),
        )
    }

    #[test]
    fn quorum_is_majority_of_total_nodes_not_python_bug_formula() {
        let m = module(1, vec![peer(2, 3002), peer(3, 3003), peer(4, 3004)]);
        assert_eq!(m.quorum, 3); // floor(4/2)+1, not floor((4+1)/2)=2
    }

    #[test]
    fn candidate_becomes_leader_on_majority_votes() {
        let mut m = module(1, vec![peer(2, 3002), peer(3, 3003), peer(4, 3004)]);
        let mut effects = Effects::new();
        m.start_election(Instant::now(), &mut effects);
        assert_eq!(m.current_term, 1);

        let mut effects = Effects::new();
        m.handle_request_vote_reply(2, 1, RequestVoteReply { granted: true }, Instant::now(), &mut effects);
        assert!(!m.is_leader());

        let mut effects = Effects::new();
        m.handle_request_vote_reply(3, 1, RequestVoteReply { granted: true }, Instant::now(), &mut effects);
        assert!(m.is_leader());
        assert!(!effects.outbound.is_empty());
    }

    #[test]
    fn higher_term_vote_request_causes_step_down() {
        let mut m = module(1, vec![peer(2, 3002)]);
        m.become_leader(Instant::now(), &mut Effects::new());
        assert!(m.is_leader());

        let mut effects = Effects::new();
        m.handle_request_vote(
            2,
            addr(3002),
            5,
            RequestVoteRequest { last_log_index: 0, last_log_term: 0 },
            &mut effects,
        );
        assert!(!m.is_leader());
        assert_eq!(m.current_term, 5);
    }

    #[test]
    fn leader_appends_and_commits_after_majority_replication() {
        let mut m = module(1, vec![peer(2, 3002), peer(3, 3003)]);
        m.become_leader(Instant::now(), &mut Effects::new());

        let cmd = Command::new_set(addr(9000), "c-1".into(), 1, "hello".into());
        let mut effects = Effects::new();
        let decision = m.handle_client_request(cmd, Instant::now(), &mut effects);
        assert_eq!(decision, ClientDecision::Appended);
        assert_eq!(m.log.len(), 1);

        let mut effects = Effects::new();
        m.handle_append_entries_reply(2, 1, AppendEntriesReply { success: true, match_index: 1 }, &mut effects);
        assert_eq!(m.commit_index, 1);
        assert_eq!(m.store.get(1), Some("hello"));
        assert_eq!(effects.outbound.len(), 1); // the client reply
    }

    #[test]
    fn duplicate_set_with_executed_serial_is_reported_without_reappending() {
        let mut m = module(1, vec![peer(2, 3002), peer(3, 3003)]);
        m.become_leader(Instant::now(), &mut Effects::new());

        let cmd = Command::new_set(addr(9000), "c-1".into(), 1, "hello".into());
        m.handle_client_request(cmd.clone(), Instant::now(), &mut Effects::new());
        m.handle_append_entries_reply(2, 1, AppendEntriesReply { success: true, match_index: 1 }, &mut Effects::new());

        let decision = m.handle_client_request(cmd, Instant::now(), &mut Effects::new());
        assert_eq!(decision, ClientDecision::AlreadyExecuted);
        assert_eq!(m.log.len(), 1);
    }

    #[test]
    fn follower_truncates_conflicting_suffix_on_append_entries() {
        let mut m = module(2, vec![peer(1, 3001)]);
        m.current_term = 1;
        m.log.append(LogEntry {
            command: Command::new_set(addr(9000), "stale".into(), 1, "wrong".into()),
            term: 1,
        });

        let new_entry = LogEntry {
            command: Command::new_set(addr(9000), "fresh".into(), 1, "right".into()),
            term: 2,
        };
        let mut effects = Effects::new();
        m.handle_append_entries(
            addr(3001),
            2,
            AppendEntriesRequest { prev_index: 0, prev_term: 0, entries: vec![new_entry], commit_index: 0 },
            &mut effects,
        );

        assert_eq!(m.log.len(), 1);
        assert_eq!(m.log.entry(1).unwrap().command.serial, "fresh");
        match &effects.outbound[0].body {
            Body::AppendEntries(RpcSide::Reply(r)) => assert!(r.success),
            _ => panic!("expected AppendEntries reply"),
        }
    }

    #[test]
    fn not_leader_redirects_client_to_last_known_leader() {
        let mut m = module(2, vec![peer(1, 3001)]);
        m.leader_address = Some(addr(3001));
        let cmd = Command::new_get(addr(9000), "c-1".into(), 1);
        let decision = m.handle_client_request(cmd, Instant::now(), &mut Effects::new());
        assert_eq!(decision, ClientDecision::Redirect(Some(addr(3001))));
    }

    #[test]
    fn get_triggers_heartbeat_round_before_read() {
        let mut m = module(1, vec![peer(2, 3002)]);
        m.become_leader(Instant::now(), &mut Effects::new());
        let cmd = Command::new_get(addr(9000), "c-1".into(), 1);
        let mut effects = Effects::new();
        let decision = m.handle_client_request(cmd, Instant::now(), &mut effects);
        assert_eq!(decision, ClientDecision::ReadPending { position: 1 });
        assert_eq!(effects.outbound.len(), 1);
    }
}
