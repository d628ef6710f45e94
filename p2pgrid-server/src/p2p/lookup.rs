// Copyright 2025 OPPO.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::p2p::{AskingNodeMsg, NodeManagerRef, NodeReservation, PeerMessage, PeerRef};
use log::{debug, info, warn};
use orpc::rpc::{Mailbox, ReplyFuture, ReplySender, RpcEndpoint};
use orpc::sync::LockExt;
use p2pgrid_common::conf::P2pConf;
use p2pgrid_common::state::{NodeCount, NodeFilter, NodeHandle, PeerAddr};
use p2pgrid_common::GridResult;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, Instant};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupState {
    Collecting = 0,
    Satisfied = 1,
    TimedOut = 2,
    Cancelled = 3,
}

impl LookupState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LookupState::Collecting)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LookupState::Collecting => "collecting",
            LookupState::Satisfied => "satisfied",
            LookupState::TimedOut => "timed_out",
            LookupState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for LookupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Answer of a session to a single node offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeAck {
    Ack,
    Nack,
}

pub enum LookupMessage {
    GiveNode {
        node: NodeHandle,
        manager: NodeManagerRef,
        reply: ReplySender<NodeAck>,
    },
    GiveNodesForMax {
        nodes: Vec<NodeHandle>,
        manager: NodeManagerRef,
    },
    WakeUp,
    Cancel,
}

#[derive(Default)]
struct LookupBook {
    // Accepted, not yet handed to the consumer.
    pending: Vec<NodeReservation>,
    // Handed to the consumer, only released by an explicit kill.
    claimed: Vec<NodeReservation>,
}

impl LookupBook {
    fn acquired(&self) -> usize {
        self.pending.len() + self.claimed.len()
    }

    fn holds(&self, node: &NodeHandle) -> bool {
        self.pending
            .iter()
            .chain(self.claimed.iter())
            .any(|r| r.node() == node)
    }
}

struct LookupShared {
    id: String,
    target: NodeCount,
    vn_name: String,
    job_id: String,
    filter: Option<NodeFilter>,
    consumer: PeerAddr,
    book: Mutex<LookupBook>,
    state: watch::Sender<LookupState>,
}

/// Handle on a node lookup session. Cloned into every asking-node message so
/// that providers can offer nodes straight to the session.
#[derive(Clone)]
pub struct LookupRef {
    shared: Arc<LookupShared>,
    endpoint: RpcEndpoint<LookupMessage>,
}

impl LookupRef {
    /// Creates the handle and the mailbox the session will serve.
    pub fn open(
        id: String,
        target: NodeCount,
        vn_name: &str,
        job_id: &str,
        filter: Option<NodeFilter>,
        consumer: PeerAddr,
        capacity: usize,
    ) -> (LookupRef, Mailbox<LookupMessage>) {
        let (endpoint, mailbox) = Mailbox::channel(format!("lookup-{}", id), capacity);
        let (state, _) = watch::channel(LookupState::Collecting);
        let shared = LookupShared {
            id,
            target,
            vn_name: vn_name.to_string(),
            job_id: job_id.to_string(),
            filter,
            consumer,
            book: Mutex::new(LookupBook::default()),
            state,
        };
        let lookup = LookupRef {
            shared: Arc::new(shared),
            endpoint,
        };
        (lookup, mailbox)
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn target(&self) -> NodeCount {
        self.shared.target
    }

    pub fn vn_name(&self) -> &str {
        &self.shared.vn_name
    }

    pub fn job_id(&self) -> &str {
        &self.shared.job_id
    }

    pub fn filter(&self) -> Option<&NodeFilter> {
        self.shared.filter.as_ref()
    }

    pub fn consumer(&self) -> &PeerAddr {
        &self.shared.consumer
    }

    pub fn status(&self) -> LookupState {
        *self.shared.state.borrow()
    }

    pub fn is_collecting(&self) -> bool {
        !self.status().is_terminal()
    }

    /// Nodes accepted so far, claimed or not.
    pub fn acquired(&self) -> usize {
        self.shared.book.lock_safe().acquired()
    }

    pub fn n_arrived(&self, n: usize) -> bool {
        self.acquired() >= n
    }

    pub fn all_arrived(&self) -> bool {
        self.target().is_reached(self.acquired())
    }

    pub fn give_node(
        &self,
        node: NodeHandle,
        manager: NodeManagerRef,
    ) -> GridResult<ReplyFuture<NodeAck>> {
        let future = self.endpoint.ask(|reply| LookupMessage::GiveNode {
            node,
            manager,
            reply,
        })?;
        Ok(future)
    }

    pub fn give_nodes_for_max(
        &self,
        nodes: Vec<NodeHandle>,
        manager: NodeManagerRef,
    ) -> GridResult<()> {
        self.endpoint
            .tell(LookupMessage::GiveNodesForMax { nodes, manager })?;
        Ok(())
    }

    /// Hint that new acquaintances appeared. Losing it is harmless.
    pub fn wake_up(&self) {
        if let Err(e) = self.endpoint.tell(LookupMessage::WakeUp) {
            debug!("Wake up of lookup {} skipped: {}", self.id(), e);
        }
    }

    /// Idempotent, a finished session ignores it.
    pub fn cancel(&self) {
        if self.is_collecting() {
            if let Err(e) = self.endpoint.tell(LookupMessage::Cancel) {
                debug!("Cancel of lookup {} skipped: {}", self.id(), e);
            }
        }
    }

    /// Hands every accepted node to the caller. Claimed nodes stay booked
    /// until killed.
    pub fn take_nodes(&self) -> Vec<NodeHandle> {
        let mut book = self.shared.book.lock_safe();
        let taken: Vec<_> = book.pending.drain(..).collect();
        let nodes = taken.iter().map(|r| r.node().clone()).collect();
        book.claimed.extend(taken);
        nodes
    }

    pub fn claimed_nodes(&self) -> Vec<NodeHandle> {
        self.shared
            .book
            .lock_safe()
            .claimed
            .iter()
            .map(|r| r.node().clone())
            .collect()
    }

    /// Releases one node back to its provider and cancels the session.
    pub fn kill_node(&self, url: &str) -> bool {
        let reservation = {
            let mut book = self.shared.book.lock_safe();
            let claimed = book.claimed.iter().position(|r| r.node().url() == url);
            match claimed {
                Some(i) => Some(book.claimed.remove(i)),
                None => book
                    .pending
                    .iter()
                    .position(|r| r.node().url() == url)
                    .map(|i| book.pending.remove(i)),
            }
        };

        self.cancel();
        match reservation {
            Some(r) => {
                self.release(r);
                true
            }
            None => false,
        }
    }

    /// Releases every node of the session and cancels it. Returns how many
    /// nodes were given back.
    pub fn kill_all_nodes(&self) -> usize {
        let all: Vec<_> = {
            let mut book = self.shared.book.lock_safe();
            let mut all: Vec<_> = book.claimed.drain(..).collect();
            all.extend(book.pending.drain(..));
            all
        };

        self.cancel();
        let n = all.len();
        for r in all {
            self.release(r);
        }
        n
    }

    fn release(&self, mut reservation: NodeReservation) {
        let manager = reservation.manager().clone();
        if let Err(e) = reservation.release() {
            warn!(
                "Lookup {} failed to release {} on {}: {}",
                self.id(),
                reservation.node(),
                manager.id(),
                e
            );
        }
        if let Err(e) = manager.remove_acquaintance(self.consumer().as_str()) {
            debug!("Cannot forget runtime {} on {}: {}", self.consumer(), manager.id(), e);
        }
    }

    /// Waits until the session leaves the collecting state.
    pub async fn wait_finished(&self) -> LookupState {
        let mut rx = self.shared.state.subscribe();
        let state = match rx.wait_for(|s| s.is_terminal()).await {
            Ok(state) => *state,
            Err(_) => self.status(),
        };
        state
    }

    pub async fn wait_finished_timeout(&self, timeout: Duration) -> Option<LookupState> {
        time::timeout(timeout, self.wait_finished()).await.ok()
    }
}

impl fmt::Debug for LookupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupRef")
            .field("id", &self.id())
            .field("target", &self.target())
            .field("state", &self.status())
            .finish()
    }
}

/// The consumer side of a node request. It re-broadcasts through the local
/// peer every `lookup_freq` until the target is met, the deadline passes or
/// the consumer cancels.
pub(crate) struct NodeLookupSession {
    lookup: LookupRef,
    mailbox: Mailbox<LookupMessage>,
    local: PeerRef,
    // Node manager of the consumer runtime.
    local_manager: NodeManagerRef,
    ttl: u32,
    lookup_freq: Duration,
    deadline: Option<Instant>,
    cancelled: bool,
}

impl NodeLookupSession {
    pub fn new(
        lookup: LookupRef,
        mailbox: Mailbox<LookupMessage>,
        local: PeerRef,
        local_manager: NodeManagerRef,
        conf: &P2pConf,
    ) -> Self {
        // MAX lookups only end on cancellation.
        let deadline = if lookup.target().is_max() {
            None
        } else {
            Some(Instant::now() + conf.acquisition_timeout)
        };

        Self {
            lookup,
            mailbox,
            local,
            local_manager,
            ttl: conf.ttl,
            lookup_freq: conf.lookup_freq,
            deadline,
            cancelled: false,
        }
    }

    pub async fn run(mut self) {
        info!(
            "Lookup {} looking for {} nodes for {}/{}",
            self.lookup.id(),
            self.lookup.target(),
            self.lookup.vn_name(),
            self.lookup.job_id()
        );

        if let Err(e) = self.local.tell(PeerMessage::NewLookup(self.lookup.clone())) {
            warn!("Lookup {} cannot register on {}: {}", self.lookup.id(), self.local, e);
        }

        let state = loop {
            self.broadcast();
            self.serve().await;
            if let Some(state) = self.exit_state() {
                break state;
            }
        };

        self.finish(state);
        self.drain();
    }

    fn broadcast(&self) {
        let count = self.lookup.target().remaining(self.lookup.acquired());
        if count.is_exhausted() {
            return;
        }

        let msg = AskingNodeMsg {
            ttl: self.ttl,
            id: None,
            origin: self.local.clone(),
            count,
            lookup: self.lookup.clone(),
            vn_name: self.lookup.vn_name().to_string(),
            job_id: self.lookup.job_id().to_string(),
            filter: self.lookup.filter().cloned(),
        };
        if let Err(e) = self.local.asking_node(msg) {
            warn!("Lookup {} cannot reach {}: {}", self.lookup.id(), self.local, e);
        }
    }

    // Serves offers until the next broadcast is due, or earlier when an exit
    // condition may have changed.
    async fn serve(&mut self) {
        let mut wait = self.lookup_freq;
        if let Some(deadline) = self.deadline {
            wait = wait.min(deadline.saturating_duration_since(Instant::now()));
        }
        let tick = time::sleep(wait);
        tokio::pin!(tick);

        loop {
            tokio::select! {
                _ = &mut tick => return,

                msg = self.mailbox.recv() => match msg {
                    Some(msg) => {
                        if self.handle(msg) {
                            return;
                        }
                    }
                    None => {
                        self.cancelled = true;
                        return;
                    }
                }
            }
        }
    }

    // Returns true when the session should re-evaluate right away.
    fn handle(&mut self, msg: LookupMessage) -> bool {
        match msg {
            LookupMessage::GiveNode {
                node,
                manager,
                reply,
            } => {
                let ack = self.accept(&node, &manager);
                if !reply.send(ack) && ack == NodeAck::Ack {
                    // The provider stopped waiting and already released the node.
                    debug!("Lookup {}: offer of {} withdrawn", self.lookup.id(), node);
                    self.withdraw(&node);
                }
                self.lookup.target().is_reached(self.lookup.acquired())
            }

            LookupMessage::GiveNodesForMax { nodes, manager } => {
                for node in nodes {
                    self.accept(&node, &manager);
                }
                false
            }

            LookupMessage::WakeUp => true,

            LookupMessage::Cancel => {
                self.cancelled = true;
                true
            }
        }
    }

    fn accept(&mut self, node: &NodeHandle, manager: &NodeManagerRef) -> NodeAck {
        if self.cancelled {
            debug!("Lookup {} cancelled, NACK {}", self.lookup.id(), node);
            return NodeAck::Nack;
        }

        {
            let mut book = self.lookup.shared.book.lock_safe();
            if self.lookup.target().is_reached(book.acquired()) {
                debug!("Lookup {} has enough nodes, NACK {}", self.lookup.id(), node);
                return NodeAck::Nack;
            }
            if book.holds(node) {
                debug!("Lookup {} already holds {}", self.lookup.id(), node);
                return NodeAck::Nack;
            }
            book.pending
                .push(NodeReservation::acknowledged(node.clone(), manager.clone()));
        }

        // Consumer and provider runtimes know each other from now on.
        if let Err(e) = manager.add_acquaintance(self.lookup.consumer().as_str()) {
            warn!(
                "Lookup {} cannot register runtime on {}: {}",
                self.lookup.id(),
                manager.id(),
                e
            );
        }
        if let Err(e) = self.local_manager.add_acquaintance(manager.id()) {
            warn!(
                "Lookup {} cannot register provider {} on {}: {}",
                self.lookup.id(),
                manager.id(),
                self.local_manager.id(),
                e
            );
        }
        info!(
            "Lookup {} received node {} from {} ({}/{})",
            self.lookup.id(),
            node,
            manager.id(),
            self.lookup.acquired(),
            self.lookup.target()
        );
        NodeAck::Ack
    }

    fn withdraw(&mut self, node: &NodeHandle) {
        let mut book = self.lookup.shared.book.lock_safe();
        book.pending.retain(|r| r.node() != node);
    }

    fn exit_state(&self) -> Option<LookupState> {
        if self.cancelled {
            Some(LookupState::Cancelled)
        } else if self.lookup.target().is_reached(self.lookup.acquired()) {
            Some(LookupState::Satisfied)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(LookupState::TimedOut)
        } else {
            None
        }
    }

    // Satisfied and timed out sessions hand what they hold to the consumer,
    // a cancelled session gives unclaimed nodes back.
    fn finish(&mut self, state: LookupState) {
        let released: Vec<_> = {
            let mut book = self.lookup.shared.book.lock_safe();
            let pending: Vec<_> = book.pending.drain(..).collect();
            if state == LookupState::Cancelled {
                pending
            } else {
                book.claimed.extend(pending);
                vec![]
            }
        };
        for r in released {
            self.lookup.release(r);
        }

        self.lookup.shared.state.send_replace(state);
        info!(
            "Lookup {} ends {} with {} nodes",
            self.lookup.id(),
            state,
            self.lookup.acquired()
        );
    }

    // Late offers are refused so that providers release their nodes.
    fn drain(&mut self) {
        self.mailbox.close();
        while let Some(msg) = self.mailbox.try_recv() {
            match msg {
                LookupMessage::GiveNode { reply, .. } => {
                    reply.send(NodeAck::Nack);
                }
                LookupMessage::GiveNodesForMax { nodes, manager } => {
                    for node in nodes {
                        if let Err(e) = manager.release(&node) {
                            warn!("Failed to release late node {}: {}", node, e);
                        }
                    }
                }
                LookupMessage::WakeUp | LookupMessage::Cancel => (),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::p2p::LocalNodeManager;

    fn open(target: NodeCount) -> (LookupRef, Mailbox<LookupMessage>) {
        LookupRef::open(
            "t1".to_string(),
            target,
            "vn",
            "job",
            None,
            PeerAddr::from("consumer"),
            64,
        )
    }

    fn session(target: NodeCount) -> (LookupRef, NodeLookupSession, Mailbox<PeerMessage>) {
        session_with(target, Arc::new(LocalNodeManager::new("consumer")))
    }

    fn session_with(
        target: NodeCount,
        local_manager: NodeManagerRef,
    ) -> (LookupRef, NodeLookupSession, Mailbox<PeerMessage>) {
        let (lookup, mailbox) = open(target);
        let (ep, peer_mailbox) = Mailbox::channel("consumer", 64);
        let local = PeerRef::new(PeerAddr::from("consumer"), ep);
        let conf = P2pConf::default()
            .with_durations("1s", "100ms", "300ms", "50ms")
            .unwrap();
        let s = NodeLookupSession::new(lookup.clone(), mailbox, local, local_manager, &conf);
        (lookup, s, peer_mailbox)
    }

    #[test]
    fn take_and_kill() {
        let manager: NodeManagerRef = Arc::new(LocalNodeManager::with_capacity("m", 2, "cpu"));
        let (lookup, mut s, _pm) = session(NodeCount::Exact(2));

        let a = manager.asking_node(None).unwrap().unwrap();
        let b = manager.asking_node(None).unwrap().unwrap();
        assert_eq!(s.accept(&a, &manager), NodeAck::Ack);
        assert_eq!(s.accept(&a, &manager), NodeAck::Nack);
        assert_eq!(s.accept(&b, &manager), NodeAck::Ack);
        assert!(lookup.all_arrived());
        assert_eq!(s.exit_state(), Some(LookupState::Satisfied));

        let taken = lookup.take_nodes();
        assert_eq!(taken.len(), 2);
        assert!(lookup.take_nodes().is_empty());
        assert_eq!(lookup.claimed_nodes().len(), 2);

        assert!(lookup.kill_node(a.url()));
        assert!(!lookup.kill_node(a.url()));
        assert_eq!(lookup.kill_all_nodes(), 1);
        assert_eq!(lookup.acquired(), 0);
    }

    #[test]
    fn accept_links_both_runtimes() {
        let consumer = Arc::new(LocalNodeManager::new("consumer"));
        let provider = Arc::new(LocalNodeManager::with_capacity("provider", 2, "cpu"));
        let manager: NodeManagerRef = provider.clone();
        let (_lookup, mut s, _pm) = session_with(NodeCount::Exact(1), consumer.clone());

        let a = manager.asking_node(None).unwrap().unwrap();
        assert_eq!(s.accept(&a, &manager), NodeAck::Ack);
        assert_eq!(provider.acquaintances(), vec!["consumer".to_string()]);
        assert_eq!(consumer.acquaintances(), vec!["provider".to_string()]);

        // A refused offer links nothing new.
        let b = manager.asking_node(None).unwrap().unwrap();
        assert_eq!(s.accept(&b, &manager), NodeAck::Nack);
        assert_eq!(consumer.acquaintances(), vec!["provider".to_string()]);
    }

    #[tokio::test]
    async fn cancel_releases_unclaimed() {
        let concrete = Arc::new(LocalNodeManager::with_capacity("m", 3, "cpu"));
        let manager: NodeManagerRef = concrete.clone();
        let (lookup, s, mut peer_mailbox) = session(NodeCount::Max);
        let handle = tokio::spawn(s.run());

        // The session registers itself then broadcasts through its local peer.
        assert!(matches!(
            peer_mailbox.recv().await,
            Some(PeerMessage::NewLookup(_))
        ));
        assert!(matches!(
            peer_mailbox.recv().await,
            Some(PeerMessage::AskingNode(_))
        ));

        let nodes = manager.asking_all_nodes(None).unwrap();
        lookup.give_nodes_for_max(nodes, manager.clone()).unwrap();
        while lookup.acquired() < 3 {
            time::sleep(Duration::from_millis(10)).await;
        }
        let claimed = lookup.take_nodes();
        assert_eq!(claimed.len(), 3);
        lookup.kill_node(claimed[0].url());

        assert_eq!(lookup.wait_finished().await, LookupState::Cancelled);
        handle.await.unwrap();
        assert_eq!(concrete.free_count(), 1);
        assert_eq!(concrete.booked_count(), 2);

        // Cancelling again is harmless.
        lookup.cancel();
        assert_eq!(lookup.status(), LookupState::Cancelled);
    }

    #[tokio::test]
    async fn times_out_with_partial_result() {
        let manager: NodeManagerRef = Arc::new(LocalNodeManager::with_capacity("m", 1, "cpu"));
        let (lookup, s, _pm) = session(NodeCount::Exact(3));
        let handle = tokio::spawn(s.run());

        let node = manager.asking_node(None).unwrap().unwrap();
        let ack = lookup
            .give_node(node.clone(), manager.clone())
            .unwrap()
            .wait(Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ack, NodeAck::Ack);

        assert_eq!(lookup.wait_finished().await, LookupState::TimedOut);
        handle.await.unwrap();
        assert_eq!(lookup.claimed_nodes(), vec![node]);

        // Late offers are refused once the session is over.
        let other = NodeHandle::new("node://late/0", "cpu");
        assert!(lookup.give_node(other, manager).is_err());
    }
}
