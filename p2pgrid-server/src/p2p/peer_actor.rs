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

use crate::p2p::{
    AcquaintanceSet, Admission, AskingNodeMsg, ExploringMsg, GossipPhase, LookupRef, NodeAck,
    NodeManagerRef, NodeReservation, OverlayFlooder, PeerMessage, PeerRef, PeerSnapshot,
    PeerStats,
};
use futures::future::BoxFuture;
use log::{debug, info, warn};
use orpc::common::LocalTime;
use orpc::rpc::{Mailbox, ReplyFuture, ReplySender};
use p2pgrid_common::conf::P2pConf;
use p2pgrid_common::state::{MessageId, NodeFilter, NodeHandle};
use p2pgrid_common::GridResult;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::{self, Instant, MissedTickBehavior};

enum Offer {
    NoneFree,
    Given,
    Abort,
}

/// The actor behind a `P2pService`. It owns the mailbox and every piece of
/// mutable peer state, and runs the gossip loop next to message handling.
pub(crate) struct PeerActor {
    conf: P2pConf,
    local: PeerRef,
    acquaintances: Arc<AcquaintanceSet>,
    node_manager: NodeManagerRef,
    stats: Arc<PeerStats>,
    exploring: OverlayFlooder,
    asking: OverlayFlooder,
    rng: StdRng,
    mailbox: Mailbox<PeerMessage>,
    // Asking-node requests deferred while an acknowledgement is awaited.
    backlog: VecDeque<PeerMessage>,
    lookups: Vec<LookupRef>,
    running: bool,
}

impl PeerActor {
    pub fn new(
        conf: P2pConf,
        local: PeerRef,
        acquaintances: Arc<AcquaintanceSet>,
        node_manager: NodeManagerRef,
        stats: Arc<PeerStats>,
        mailbox: Mailbox<PeerMessage>,
    ) -> Self {
        let rng = match conf.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let exploring = OverlayFlooder::new(local.addr().clone(), conf.msg_memory);
        let asking = OverlayFlooder::new(local.addr().clone(), conf.msg_memory);

        Self {
            conf,
            local,
            acquaintances,
            node_manager,
            stats,
            exploring,
            asking,
            rng,
            mailbox,
            backlog: VecDeque::new(),
            lookups: vec![],
            running: true,
        }
    }

    pub async fn run(mut self) {
        info!(
            "P2P service {} started, noa {}, ttl {}, ttu {:?}",
            self.local, self.conf.noa, self.conf.ttl, self.conf.ttu
        );

        let mut ticker = time::interval(self.conf.ttu);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.running {
            if let Some(msg) = self.backlog.pop_front() {
                self.dispatch(msg).await;
                continue;
            }

            tokio::select! {
                _ = ticker.tick() => self.gossip_round().await,

                msg = self.mailbox.recv() => match msg {
                    Some(msg) => self.dispatch(msg).await,
                    None => break,
                }
            }
        }

        self.mailbox.close();
        self.stats.set_phase(GossipPhase::Idle);
        info!("P2P service {} stopped", self.local);
    }

    fn dispatch(&mut self, msg: PeerMessage) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            match msg {
                PeerMessage::Register { peer, reply } => {
                    let ok = self.register(peer);
                    reply.send(ok);
                }

                PeerMessage::HeartBeat => (),

                PeerMessage::Exploring(msg) => self.exploring(msg).await,

                PeerMessage::AskingNode(msg) => self.asking_node(msg).await,

                PeerMessage::Remove { peer } => {
                    self.acquaintances.remove(&peer);
                }

                PeerMessage::GetANode {
                    hops,
                    vn_name,
                    job_id,
                    reply,
                } => self.get_a_node(hops, vn_name, job_id, reply),

                PeerMessage::AcquaintanceList { reply } => {
                    reply.send(self.acquaintances.addrs());
                }

                PeerMessage::NewLookup(lookup) => {
                    self.lookups.push(lookup);
                    self.prune_lookups();
                }

                PeerMessage::Snapshot { reply } => {
                    reply.send(self.snapshot());
                }

                PeerMessage::Stop => self.running = false,
            }
        })
    }

    // Returns true when `peer` is an acquaintance after the call.
    fn register(&mut self, peer: PeerRef) -> bool {
        if self.acquaintances.add(peer.clone()) {
            self.wake_up_lookups();
        }
        self.acquaintances.contains(peer.addr())
    }

    async fn gossip_round(&mut self) {
        self.stats.gossip_started(LocalTime::mills());

        self.stats.set_phase(GossipPhase::Heartbeating);
        for peer in self.acquaintances.snapshot() {
            let res = peer.heart_beat();
            self.send_or_prune(&peer, res);
        }

        if self.acquaintances.size() > self.conf.noa {
            self.drop_random_peer();
        }

        self.stats.set_phase(GossipPhase::Exploring);
        if self.acquaintances.size() < self.conf.noa {
            debug!(
                "{} has {} acquaintances, exploring",
                self.local,
                self.acquaintances.size()
            );
            for peer in self.acquaintances.snapshot() {
                let msg = ExploringMsg {
                    ttl: self.conf.ttl,
                    id: None,
                    origin: self.local.clone(),
                };
                let res = peer.exploring(msg);
                self.send_or_prune(&peer, res);
            }
        }

        self.stats.set_phase(GossipPhase::Waiting);
    }

    fn drop_random_peer(&mut self) {
        if let Some(peer) = self.acquaintances.random_peer(&mut self.rng) {
            debug!("{} has too many acquaintances, dropping {}", self.local, peer);
            self.acquaintances.remove(peer.addr());
            if let Err(e) = peer.remove(self.local.addr().clone()) {
                debug!("Cannot tell {} to forget {}: {}", peer, self.local, e);
            }
        }
    }

    async fn exploring(&mut self, msg: ExploringMsg) {
        let ExploringMsg { mut ttl, id, origin } = msg;
        if id.is_some() {
            ttl = ttl.saturating_sub(1);
        }

        let decision = self.exploring.should_forward(ttl, id.as_ref(), &origin);
        self.publish_duplicates();
        if decision.is_duplicate() {
            return;
        }

        let admission = Admission::decide(
            self.acquaintances.contains(origin.addr()),
            self.acquaintances.size(),
            self.conf.noa,
            self.conf.exploring_msg_percent,
            &mut self.rng,
        );

        if admission.is_accepted() {
            debug!("{} admits {}: {:?}", self.local, origin, admission);
            if self.acquaintances.add(origin.clone()) {
                self.wake_up_lookups();
                let reply = origin.register(self.local.clone());
                let deadline = Instant::now() + self.conf.rpc_timeout;
                if self.await_reply(reply, deadline, false).await != Some(true) {
                    debug!("Trouble with registering {} on {}", self.local, origin);
                    self.acquaintances.remove(origin.addr());
                }
            }
            return;
        }

        debug!("{} does not admit {}: {:?}", self.local, origin, admission);
        if !decision.is_forward() {
            return;
        }

        let id = self.message_id(id, true);
        for peer in self.acquaintances.snapshot() {
            let msg = ExploringMsg {
                ttl,
                id: Some(id),
                origin: origin.clone(),
            };
            let res = peer.exploring(msg);
            self.send_or_prune(&peer, res);
        }
    }

    async fn asking_node(&mut self, msg: AskingNodeMsg) {
        let AskingNodeMsg {
            mut ttl,
            id,
            origin,
            mut count,
            lookup,
            vn_name,
            job_id,
            filter,
        } = msg;

        if !lookup.is_collecting() {
            debug!("{} drops request of finished lookup {}", self.local, lookup.id());
            return;
        }

        // Without id the request comes from a local session: broadcast it,
        // and only serve it locally in MAX mode.
        let forward = match id {
            Some(_) => {
                ttl = ttl.saturating_sub(1);
                let decision = self.asking.should_forward(ttl, id.as_ref(), &origin);
                self.publish_duplicates();
                if decision.is_duplicate() {
                    return;
                }
                decision.is_forward()
            }
            None => true,
        };

        if id.is_some() || count.is_max() {
            if count.is_max() {
                self.offer_all_nodes(&lookup, &vn_name, &job_id, filter.as_ref());
            } else {
                match self
                    .offer_one_node(&lookup, &vn_name, &job_id, filter.as_ref())
                    .await
                {
                    Offer::NoneFree => (),
                    Offer::Given => count = count.decrement(),
                    Offer::Abort => return,
                }
            }
        }

        if count.is_exhausted() {
            debug!("No more nodes are needed for lookup {}", lookup.id());
            return;
        }
        if !forward || !lookup.is_collecting() {
            return;
        }

        let id = self.message_id(id, false);
        for peer in self.acquaintances.snapshot() {
            let msg = AskingNodeMsg {
                ttl,
                id: Some(id),
                origin: origin.clone(),
                count,
                lookup: lookup.clone(),
                vn_name: vn_name.clone(),
                job_id: job_id.clone(),
                filter: filter.clone(),
            };
            let res = peer.asking_node(msg);
            self.send_or_prune(&peer, res);
        }
    }

    async fn offer_one_node(
        &mut self,
        lookup: &LookupRef,
        vn_name: &str,
        job_id: &str,
        filter: Option<&NodeFilter>,
    ) -> Offer {
        let node = match self.node_manager.asking_node(filter) {
            Ok(Some(node)) => node,
            Ok(None) => return Offer::NoneFree,
            Err(e) => {
                warn!("{} cannot book a node: {}", self.local, e);
                return Offer::NoneFree;
            }
        };

        // Tagged before the offer: the session may hand the node out as soon
        // as it accepts it. A release clears the tags.
        self.tag(&node, vn_name, job_id);
        let mut reservation =
            NodeReservation::pending(node.clone(), self.node_manager.clone(), self.conf.acq_timeout);
        let reply = match lookup.give_node(node.clone(), self.node_manager.clone()) {
            Ok(v) => v,
            Err(e) => {
                info!("Cannot contact the remote lookup {}: {}", lookup.id(), e);
                self.release(&mut reservation);
                return Offer::Abort;
            }
        };

        let deadline = reservation.deadline();
        match self.await_reply(Ok(reply), deadline, true).await {
            Some(NodeAck::Ack) => {
                reservation.acknowledge();
                info!(
                    "{} gives node {} to lookup {}",
                    self.local,
                    node,
                    lookup.id()
                );
                Offer::Given
            }

            Some(NodeAck::Nack) => {
                debug!("NACK for {} from lookup {}", node, lookup.id());
                self.release(&mut reservation);
                Offer::Abort
            }

            None => {
                debug!(
                    "Ack timeout expired for {} on lookup {}, release it",
                    node,
                    lookup.id()
                );
                self.release(&mut reservation);
                Offer::Abort
            }
        }
    }

    fn offer_all_nodes(
        &mut self,
        lookup: &LookupRef,
        vn_name: &str,
        job_id: &str,
        filter: Option<&NodeFilter>,
    ) {
        let nodes = match self.node_manager.asking_all_nodes(filter) {
            Ok(v) => v,
            Err(e) => {
                warn!("{} cannot book nodes: {}", self.local, e);
                return;
            }
        };
        if nodes.is_empty() {
            return;
        }

        for node in &nodes {
            self.tag(node, vn_name, job_id);
        }
        info!(
            "{} gives {} nodes to lookup {}",
            self.local,
            nodes.len(),
            lookup.id()
        );

        if let Err(e) = lookup.give_nodes_for_max(nodes.clone(), self.node_manager.clone()) {
            info!("Cannot contact the remote lookup {}: {}", lookup.id(), e);
            for node in &nodes {
                if let Err(e) = self.node_manager.release(node) {
                    warn!("{} failed to release {}: {}", self.local, node, e);
                }
            }
        }
    }

    fn get_a_node(
        &mut self,
        hops: u32,
        vn_name: String,
        job_id: String,
        reply: ReplySender<Option<NodeHandle>>,
    ) {
        match self.node_manager.asking_node(None) {
            Ok(Some(node)) => {
                self.tag(&node, &vn_name, &job_id);
                if !reply.send(Some(node.clone())) {
                    debug!("Requester of {} is gone, release it", node);
                    if let Err(e) = self.node_manager.release(&node) {
                        warn!("{} failed to release {}: {}", self.local, node, e);
                    }
                }
                return;
            }
            Ok(None) => (),
            Err(e) => warn!("{} cannot book a node: {}", self.local, e),
        }

        if hops == 0 {
            reply.send(None);
            return;
        }

        match self.acquaintances.random_peer(&mut self.rng) {
            Some(peer) => {
                let msg = PeerMessage::GetANode {
                    hops: hops - 1,
                    vn_name,
                    job_id,
                    reply,
                };
                // On failure the reply slot is dropped and the requester sees no node.
                if let Err(e) = peer.tell(msg) {
                    debug!("Random walk stops at {}: {}", self.local, e);
                }
            }
            None => {
                reply.send(None);
            }
        }
    }

    // Waits for `reply` until `deadline` while still serving the mailbox.
    // With `defer_asking`, asking-node requests are parked in the backlog.
    async fn await_reply<T: Send>(
        &mut self,
        reply: GridResult<ReplyFuture<T>>,
        deadline: Instant,
        defer_asking: bool,
    ) -> Option<T> {
        let mut reply = match reply {
            Ok(v) => v,
            Err(e) => {
                debug!("{} request failed: {}", self.local, e);
                return None;
            }
        };

        let expire = time::sleep_until(deadline);
        tokio::pin!(expire);

        loop {
            tokio::select! {
                biased;

                res = reply.resolved() => return res.ok(),

                _ = &mut expire => return reply.close(),

                msg = self.mailbox.recv() => match msg {
                    Some(msg) if defer_asking && msg.is_asking_node() => {
                        self.backlog.push_back(msg)
                    }
                    Some(msg) => self.dispatch(msg).await,
                    None => return reply.close(),
                }
            }
        }
    }

    fn message_id(&mut self, id: Option<MessageId>, exploring: bool) -> MessageId {
        match id {
            Some(id) => id,
            None => {
                let id = MessageId::random();
                if exploring {
                    self.exploring.remember(id);
                } else {
                    self.asking.remember(id);
                }
                id
            }
        }
    }

    fn tag(&self, node: &NodeHandle, vn_name: &str, job_id: &str) {
        if let Err(e) = self.node_manager.register_virtual_node(node, vn_name) {
            warn!("Cannot register {} on {}: {}", vn_name, node, e);
        }
        if let Err(e) = self.node_manager.set_job_id(node, job_id) {
            warn!("Cannot set job {} on {}: {}", job_id, node, e);
        }
    }

    fn release(&self, reservation: &mut NodeReservation) {
        if let Err(e) = reservation.release() {
            warn!(
                "{} failed to release {}: {}",
                self.local,
                reservation.node(),
                e
            );
        }
    }

    fn send_or_prune(&self, peer: &PeerRef, res: GridResult<()>) {
        if let Err(e) = res {
            if peer.is_alive() {
                debug!("Message from {} to {} dropped: {}", self.local, peer, e);
            } else {
                warn!("{} is unreachable, removed from {}", peer, self.local);
                self.acquaintances.remove(peer.addr());
            }
        }
    }

    fn wake_up_lookups(&mut self) {
        self.prune_lookups();
        for lookup in &self.lookups {
            lookup.wake_up();
        }
    }

    fn prune_lookups(&mut self) {
        self.lookups.retain(|l| l.is_collecting());
        self.stats.set_waiting_lookups(self.lookups.len());
    }

    fn publish_duplicates(&self) {
        self.stats
            .set_duplicates(self.exploring.duplicates() + self.asking.duplicates());
    }

    fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            addr: self.local.addr().clone(),
            acquaintances: self.acquaintances.addrs(),
            phase: self.stats.phase(),
            duplicates: self.stats.duplicates(),
            gossip_rounds: self.stats.gossip_rounds(),
            waiting_lookups: self.stats.waiting_lookups(),
            last_gossip_ms: self.stats.last_gossip_ms(),
        }
    }
}
