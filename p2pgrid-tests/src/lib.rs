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

use once_cell::sync::Lazy;
use orpc::common::Logger;
use orpc::runtime::Runtime;
use p2pgrid_common::conf::P2pConf;
use p2pgrid_common::GridResult;
use p2pgrid_server::p2p::{FirstContactReport, LocalNetwork, LocalNodeManager, P2pService};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

static RUNTIME: Lazy<Arc<Runtime>> = Lazy::new(|| Arc::new(Runtime::new("p2pgrid-test", 4, 4)));

/// One peer of a test overlay and the node pool it serves.
pub struct TestPeer {
    pub service: P2pService,
    pub manager: Arc<LocalNodeManager>,
}

impl TestPeer {
    pub fn addr(&self) -> &str {
        self.service.addr().as_str()
    }
}

/// In-process overlay: peers share one network directory and one runtime.
pub struct Testing {
    network: Arc<LocalNetwork>,
    conf: P2pConf,
}

impl Testing {
    pub fn new(conf: P2pConf) -> Self {
        Logger::init_default();
        Self {
            network: LocalNetwork::new(),
            conf,
        }
    }

    pub fn rt() -> Arc<Runtime> {
        RUNTIME.clone()
    }

    /// Fast gossip, so that overlay maintenance is visible within a test.
    pub fn gossip_conf() -> P2pConf {
        let conf = P2pConf {
            first_contact_retries: 2,
            rpc_timeout_str: "1s".to_string(),
            ..Default::default()
        };
        conf.with_durations("200ms", "300ms", "5s", "200ms").unwrap()
    }

    /// Gossip effectively disabled, so that the topology built by the test
    /// stays as it is.
    pub fn static_conf() -> P2pConf {
        let conf = P2pConf {
            rpc_timeout_str: "1s".to_string(),
            seed: Some(7),
            ..Default::default()
        };
        conf.with_durations("60s", "500ms", "10s", "200ms").unwrap()
    }

    pub fn conf(&self) -> &P2pConf {
        &self.conf
    }

    pub fn network(&self) -> &Arc<LocalNetwork> {
        &self.network
    }

    pub fn start_peer(&self, addr: &str, nodes: usize) -> GridResult<TestPeer> {
        let manager = LocalNodeManager::with_capacity(addr, nodes, "cpu");
        self.start_peer_with(addr, Arc::new(manager))
    }

    pub fn start_peer_with(
        &self,
        addr: &str,
        manager: Arc<LocalNodeManager>,
    ) -> GridResult<TestPeer> {
        let service = P2pService::start(
            addr,
            self.conf.clone(),
            self.network.clone(),
            manager.clone(),
            Self::rt(),
        )?;
        Ok(TestPeer { service, manager })
    }

    pub async fn connect(&self, peer: &TestPeer, seeds: &[&str]) -> FirstContactReport {
        let seeds = seeds.iter().map(|s| (*s).into()).collect();
        peer.service.first_contact(seeds).await.unwrap_or_default()
    }

    /// Links every peer to the previous one.
    pub async fn chain(&self, peers: &[&TestPeer]) {
        for pair in peers.windows(2) {
            let report = self.connect(pair[1], &[pair[0].addr()]).await;
            assert_eq!(
                report.contacted.len(),
                1,
                "{} -> {}",
                pair[1].addr(),
                pair[0].addr()
            );
        }
    }
}

/// Polls `f` every 20ms until it holds or `timeout` passes.
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut f: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if f() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(20)).await;
    }
}

pub fn booked(peers: &[&TestPeer]) -> usize {
    peers.iter().map(|p| p.manager.booked_count()).sum()
}
