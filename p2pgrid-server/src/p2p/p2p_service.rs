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

use crate::p2p::first_contact::FirstContact;
use crate::p2p::lookup::NodeLookupSession;
use crate::p2p::peer_actor::PeerActor;
use crate::p2p::{
    AcquaintanceSet, FirstContactReport, LocalNetwork, LookupRef, NodeManagerRef, P2pState,
    PeerMessage, PeerRef, PeerSnapshot, PeerStats,
};
use log::{info, warn};
use orpc::rpc::{Mailbox, RpcError};
use orpc::runtime::Runtime;
use orpc::sync::LockExt;
use p2pgrid_common::conf::P2pConf;
use p2pgrid_common::error::GridError;
use p2pgrid_common::state::{NodeCount, NodeFilter, NodeHandle, PeerAddr};
use p2pgrid_common::GridResult;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Public face of one overlay peer.
///
/// The peer itself runs as an actor task on the shared runtime. This handle
/// sends it messages and reads the state it publishes.
pub struct P2pService {
    conf: P2pConf,
    rt: Arc<Runtime>,
    local: PeerRef,
    network: Arc<LocalNetwork>,
    acquaintances: Arc<AcquaintanceSet>,
    node_manager: NodeManagerRef,
    stats: Arc<PeerStats>,
    state: AtomicU8,
    lookup_seq: AtomicU64,
    // Picks the first hop of random walks.
    rng: Mutex<StdRng>,
}

impl P2pService {
    pub fn start<T: Into<PeerAddr>>(
        addr: T,
        conf: P2pConf,
        network: Arc<LocalNetwork>,
        node_manager: NodeManagerRef,
        rt: Arc<Runtime>,
    ) -> GridResult<Self> {
        let addr = addr.into();
        let (endpoint, mailbox) = Mailbox::channel(addr.as_str(), conf.mailbox_capacity);
        let local = PeerRef::new(addr.clone(), endpoint);
        network.bind(local.clone())?;

        let rng = match conf.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let acquaintances = Arc::new(AcquaintanceSet::new(addr));
        let stats = Arc::new(PeerStats::default());
        let actor = PeerActor::new(
            conf.clone(),
            local.clone(),
            acquaintances.clone(),
            node_manager.clone(),
            stats.clone(),
            mailbox,
        );
        rt.spawn(actor.run());

        Ok(Self {
            conf,
            rt,
            local,
            network,
            acquaintances,
            node_manager,
            stats,
            state: AtomicU8::new(P2pState::Running as u8),
            lookup_seq: AtomicU64::new(0),
            rng: Mutex::new(rng),
        })
    }

    pub fn addr(&self) -> &PeerAddr {
        self.local.addr()
    }

    pub fn peer_ref(&self) -> PeerRef {
        self.local.clone()
    }

    pub fn conf(&self) -> &P2pConf {
        &self.conf
    }

    pub fn node_manager(&self) -> &NodeManagerRef {
        &self.node_manager
    }

    pub fn state(&self) -> P2pState {
        P2pState::from(self.state.load(Ordering::SeqCst))
    }

    fn check_running(&self) -> GridResult<()> {
        if self.state() != P2pState::Running || !self.local.is_alive() {
            return Err(GridError::Closed(format!("p2p service {}", self.local)));
        }
        Ok(())
    }

    /// Registers with the given seeds in the background. The returned handle
    /// resolves once every seed was contacted or the retries are spent.
    pub fn first_contact(&self, seeds: Vec<PeerAddr>) -> JoinHandle<FirstContactReport> {
        let task = FirstContact::new(
            self.local.clone(),
            self.acquaintances.clone(),
            self.network.clone(),
            seeds,
            &self.conf,
        );
        self.rt.spawn(task.run())
    }

    /// Starts a session asking the overlay for `count` nodes.
    pub fn get_nodes(
        &self,
        count: usize,
        filter: Option<&str>,
        vn_name: &str,
        job_id: &str,
    ) -> GridResult<LookupRef> {
        if count == 0 {
            return Err(GridError::invalid("number of nodes must be greater than 0"));
        }
        let filter = match filter {
            Some(pattern) => Some(NodeFilter::new(pattern)?),
            None => None,
        };
        self.start_lookup(NodeCount::Exact(count), filter, vn_name, job_id)
    }

    /// Starts a session collecting every free node it can reach, until cancelled.
    pub fn get_maximum_nodes(&self, vn_name: &str, job_id: &str) -> GridResult<LookupRef> {
        self.start_lookup(NodeCount::Max, None, vn_name, job_id)
    }

    fn start_lookup(
        &self,
        count: NodeCount,
        filter: Option<NodeFilter>,
        vn_name: &str,
        job_id: &str,
    ) -> GridResult<LookupRef> {
        self.check_running()?;
        let seq = self.lookup_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("{}-{}", self.local.addr(), seq);

        let (lookup, mailbox) = LookupRef::open(
            id,
            count,
            vn_name,
            job_id,
            filter,
            self.local.addr().clone(),
            self.conf.mailbox_capacity,
        );
        let session = NodeLookupSession::new(
            lookup.clone(),
            mailbox,
            self.local.clone(),
            self.node_manager.clone(),
            &self.conf,
        );
        self.rt.spawn(session.run());
        Ok(lookup)
    }

    /// Random walk of at most TTL hops for a single free node.
    pub async fn get_a_node(&self, vn_name: &str, job_id: &str) -> GridResult<Option<NodeHandle>> {
        self.check_running()?;
        let first = self
            .acquaintances
            .random_peer(&mut *self.rng.lock_safe())
            .unwrap_or_else(|| self.local.clone());

        let hops = self.conf.ttl;
        let reply = first.endpoint().ask(|reply| PeerMessage::GetANode {
            hops,
            vn_name: vn_name.to_string(),
            job_id: job_id.to_string(),
            reply,
        })?;

        match reply.wait(self.conf.rpc_timeout).await {
            Ok(node) => Ok(node),
            Err(RpcError::Dropped(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn acquaintance_list(&self) -> Vec<PeerAddr> {
        self.acquaintances.addrs()
    }

    pub fn size(&self) -> usize {
        self.acquaintances.size()
    }

    pub fn contains(&self, addr: &PeerAddr) -> bool {
        self.acquaintances.contains(addr)
    }

    pub fn snapshot(&self) -> PeerSnapshot {
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

    /// Stops the peer. Other peers see it as unreachable from now on.
    pub fn stop(&self) {
        let prev = self.state.swap(P2pState::Stopped as u8, Ordering::SeqCst);
        if P2pState::from(prev) == P2pState::Stopped {
            return;
        }
        if let Err(e) = self.local.tell(PeerMessage::Stop) {
            warn!("Stop of {} not delivered: {}", self.local, e);
        }
        self.network.unbind(&self.local);
        info!("P2P service {} stopping", self.local);
    }
}

impl Drop for P2pService {
    fn drop(&mut self) {
        self.stop()
    }
}
