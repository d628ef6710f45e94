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

use crate::p2p::{AcquaintanceSet, LocalNetwork, PeerMessage, PeerRef};
use log::{info, warn};
use p2pgrid_common::conf::P2pConf;
use p2pgrid_common::state::PeerAddr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct FirstContactReport {
    pub contacted: Vec<PeerAddr>,
    pub unreachable: Vec<PeerAddr>,
}

/// Connects a new peer to a static list of seeds with mutual registration.
/// Seeds that cannot be reached are retried every TTU, a bounded number of
/// times, as long as the peer has fewer than NOA acquaintances.
pub(crate) struct FirstContact {
    local: PeerRef,
    acquaintances: Arc<AcquaintanceSet>,
    network: Arc<LocalNetwork>,
    preferred: Vec<PeerAddr>,
    noa: usize,
    ttu: Duration,
    retries: u32,
    rpc_timeout: Duration,
}

impl FirstContact {
    pub fn new(
        local: PeerRef,
        acquaintances: Arc<AcquaintanceSet>,
        network: Arc<LocalNetwork>,
        seeds: Vec<PeerAddr>,
        conf: &P2pConf,
    ) -> Self {
        let mut preferred: Vec<PeerAddr> = vec![];
        for seed in seeds {
            if &seed != local.addr() && !preferred.contains(&seed) {
                preferred.push(seed);
            }
        }

        Self {
            local,
            acquaintances,
            network,
            preferred,
            noa: conf.noa,
            ttu: conf.ttu,
            retries: conf.first_contact_retries,
            rpc_timeout: conf.rpc_timeout,
        }
    }

    pub async fn run(mut self) -> FirstContactReport {
        let mut report = FirstContactReport::default();
        let mut round = 0;

        loop {
            self.contact_round(&mut report).await;
            if self.preferred.is_empty()
                || self.acquaintances.size() >= self.noa
                || round >= self.retries
                || !self.local.is_alive()
            {
                break;
            }
            round += 1;
            tokio::time::sleep(self.ttu).await;
        }

        report.unreachable = self.preferred;
        info!(
            "First contact of {} done: {} contacted, {} unreachable",
            self.local,
            report.contacted.len(),
            report.unreachable.len()
        );
        report
    }

    async fn contact_round(&mut self, report: &mut FirstContactReport) {
        let pending = std::mem::take(&mut self.preferred);

        for addr in pending {
            if self.acquaintances.contains(&addr) {
                continue;
            }
            if self.acquaintances.size() >= self.noa {
                self.preferred.push(addr);
                continue;
            }

            let peer = match self.network.resolve(&addr) {
                Some(v) => v,
                None => {
                    warn!("The peer at {} couldn't be contacted", addr);
                    self.preferred.push(addr);
                    continue;
                }
            };

            if self.register_mutually(&peer).await {
                report.contacted.push(addr);
            } else {
                self.preferred.push(addr);
            }
        }
    }

    async fn register_mutually(&self, peer: &PeerRef) -> bool {
        match self.call_register(&self.local, peer.clone()).await {
            Some(true) => (),
            _ => return false,
        }

        match self.call_register(peer, self.local.clone()).await {
            Some(true) => true,
            _ => {
                warn!("{} refused registration of {}", peer, self.local);
                if let Err(e) = self.local.remove(peer.addr().clone()) {
                    warn!("Cannot undo registration of {}: {}", peer, e);
                }
                false
            }
        }
    }

    async fn call_register(&self, target: &PeerRef, peer: PeerRef) -> Option<bool> {
        let res = target
            .endpoint()
            .call(|reply| PeerMessage::Register { peer, reply }, self.rpc_timeout)
            .await;
        match res {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("Register on {} failed: {}", target, e);
                None
            }
        }
    }
}
