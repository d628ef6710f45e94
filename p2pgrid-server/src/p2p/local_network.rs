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

use crate::p2p::PeerRef;
use log::debug;
use orpc::sync::FastDashMap;
use p2pgrid_common::error::GridError;
use p2pgrid_common::state::PeerAddr;
use p2pgrid_common::GridResult;
use std::sync::Arc;

/// Address directory of the in-process overlay: resolves a peer address to
/// the reference of a running peer.
#[derive(Default)]
pub struct LocalNetwork {
    peers: FastDashMap<PeerAddr, PeerRef>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails if a running peer already uses the address.
    pub fn bind(&self, peer: PeerRef) -> GridResult<()> {
        if let Some(old) = self.peers.get(peer.addr()) {
            if old.is_alive() {
                return Err(GridError::invalid(format!(
                    "address {} is already bound",
                    peer.addr()
                )));
            }
        }
        self.peers.insert(peer.addr().clone(), peer);
        Ok(())
    }

    /// Removes the binding of `peer`, leaving a newer peer on the same
    /// address in place.
    pub fn unbind(&self, peer: &PeerRef) {
        self.peers
            .remove_if(peer.addr(), |_, v| v.endpoint().same_endpoint(peer.endpoint()));
    }

    pub fn resolve(&self, addr: &PeerAddr) -> Option<PeerRef> {
        let peer = self.peers.get(addr).map(|v| v.value().clone())?;
        if peer.is_alive() {
            Some(peer)
        } else {
            debug!("Peer {} is gone, unbind it", addr);
            self.unbind(&peer);
            None
        }
    }

    pub fn addrs(&self) -> Vec<PeerAddr> {
        let mut addrs: Vec<_> = self.peers.iter().map(|v| v.key().clone()).collect();
        addrs.sort();
        addrs
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
