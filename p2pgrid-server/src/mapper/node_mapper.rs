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

use crate::mapper::{ContractRef, DeployedNode, NodeProvider, NodeProviderRegistry};
use log::{debug, info, warn};
use orpc::runtime::Runtime;
use orpc::sync::LockExt;
use p2pgrid_common::conf::MapperConf;
use p2pgrid_common::error::GridError;
use p2pgrid_common::GridResult;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A deployment announced that its provider started these nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodesRegistered {
    pub deployment_id: String,
    pub provider_id: String,
    pub nodes: Vec<String>,
}

impl NodesRegistered {
    pub fn new<T: Into<String>>(deployment_id: &str, provider_id: &str, nodes: Vec<T>) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            provider_id: provider_id.to_string(),
            nodes: nodes.into_iter().map(Into::into).collect(),
        }
    }
}

pub trait NodeRegistrationListener: Send + Sync {
    /// Returns how many nodes were mapped before the call returned.
    fn on_nodes_registered(&self, event: NodesRegistered) -> GridResult<usize>;
}

struct PendingNode {
    node: DeployedNode,
    provider: Arc<NodeProvider>,
}

#[derive(Default)]
struct MapperState {
    contracts: Vec<ContractRef>,
    stage2: VecDeque<PendingNode>,
    stage3: VecDeque<PendingNode>,
}

enum Offer {
    Claimed(usize),
    Refused,
}

/// Distributes freshly registered nodes to virtual nodes in three stages:
/// explicit provider contracts first, then plain capacity needs, then greedy
/// consumers. Stage 1 runs inside the registration call; stages 2 and 3 run
/// on a background worker. One mutex guards the queues and the contract list.
pub struct NodeMapper {
    conf: MapperConf,
    registry: Arc<NodeProviderRegistry>,
    state: Mutex<MapperState>,
    wakeup: Notify,
    running: AtomicBool,
}

impl NodeMapper {
    pub fn new(conf: MapperConf, registry: Arc<NodeProviderRegistry>) -> Arc<Self> {
        Arc::new(Self {
            conf,
            registry,
            state: Mutex::new(MapperState::default()),
            wakeup: Notify::new(),
            running: AtomicBool::new(false),
        })
    }

    pub fn registry(&self) -> &Arc<NodeProviderRegistry> {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the stage 2/3 worker. It wakes up after every registration
    /// batch and every `greedy_interval`.
    pub fn start(self: &Arc<Self>, rt: &Runtime) -> JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);
        let mapper = self.clone();
        rt.spawn(async move {
            let mut ticker = tokio::time::interval(mapper.conf.greedy_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            info!(
                "Node mapper started, greedy interval {:?}",
                mapper.conf.greedy_interval
            );
            while mapper.is_running() {
                tokio::select! {
                    _ = mapper.wakeup.notified() => {
                        mapper.run_stage2();
                    }
                    _ = ticker.tick() => {
                        mapper.run_stage2();
                        mapper.run_stage3();
                    }
                }
            }
            info!("Node mapper stopped");
        })
    }

    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            self.wakeup.notify_one();
        }
    }

    pub fn add_contract(&self, contract: ContractRef) -> GridResult<()> {
        let mut state = self.state.lock_safe();
        if state.contracts.iter().any(|c| c.name() == contract.name()) {
            return Err(GridError::invalid(format!(
                "virtual node {} already registered",
                contract.name()
            )));
        }
        info!("Virtual node {} registered to the node mapper", contract.name());
        state.contracts.push(contract);
        drop(state);

        // Waiting nodes may fit the new consumer.
        self.wakeup.notify_one();
        Ok(())
    }

    pub fn contracts(&self) -> Vec<ContractRef> {
        self.state.lock_safe().contracts.clone()
    }

    /// Nodes nobody claimed yet, in stage 2 or stage 3.
    pub fn unmapped_nodes(&self) -> Vec<DeployedNode> {
        let state = self.state.lock_safe();
        state
            .stage2
            .iter()
            .chain(state.stage3.iter())
            .map(|p| p.node.clone())
            .collect()
    }

    /// Runs stages 2 and 3 once on the calling thread.
    pub fn dispatch_pending(&self) {
        self.run_stage2();
        self.run_stage3();
    }

    fn stage1(&self, state: &mut MapperState, pending: PendingNode) -> bool {
        let offer = Self::offer(&state.contracts, &pending, "stage 1", |c, n, p| {
            c.does_node_provider_need(n, p)
        });
        match offer {
            Offer::Claimed(_) => true,
            Offer::Refused => {
                state.stage2.push_back(pending);
                false
            }
        }
    }

    fn run_stage2(&self) {
        let mut state = self.state.lock_safe();
        let queue = std::mem::take(&mut state.stage2);
        for pending in queue {
            // Contracts holding an unsatisfied claim on this provider go first.
            let owners: Vec<ContractRef> = state
                .contracts
                .iter()
                .filter(|c| Self::unsatisfied_with(c, &pending.provider))
                .cloned()
                .collect();
            if !owners.is_empty() {
                let offer = Self::offer(&owners, &pending, "stage 2", |c, n, p| {
                    c.does_node_provider_need(n, p)
                });
                if let Offer::Refused = offer {
                    debug!(
                        "{} kept for the unsatisfied contracts of {}",
                        pending.node, pending.provider
                    );
                    state.stage2.push_back(pending);
                }
                continue;
            }

            let offer = Self::offer(&state.contracts, &pending, "stage 2", |c, n, p| {
                c.do_you_need(n, p)
            });
            if let Offer::Refused = offer {
                state.stage3.push_back(pending);
            }
        }
    }

    fn run_stage3(&self) {
        let mut state = self.state.lock_safe();
        let queue = std::mem::take(&mut state.stage3);
        for pending in queue {
            let offer = Self::offer(&state.contracts, &pending, "stage 3", |c, n, p| {
                c.do_you_want(n, p)
            });
            match offer {
                Offer::Claimed(i) => state.contracts.rotate_left(i + 1),
                Offer::Refused => state.stage3.push_back(pending),
            }
        }
    }

    fn unsatisfied_with(contract: &ContractRef, provider: &NodeProvider) -> bool {
        match contract.has_unsatisfied_contract_with(provider) {
            Ok(v) => v,
            Err(e) => {
                warn!("Skip contract {}: {}", contract.name(), e);
                false
            }
        }
    }

    fn offer<F>(contracts: &[ContractRef], pending: &PendingNode, stage: &str, ask: F) -> Offer
    where
        F: Fn(&ContractRef, &DeployedNode, &NodeProvider) -> GridResult<bool>,
    {
        for (i, contract) in contracts.iter().enumerate() {
            match ask(contract, &pending.node, &*pending.provider) {
                Ok(true) => {
                    info!("{} mapped to {} in {}", pending.node, contract.name(), stage);
                    return Offer::Claimed(i);
                }
                Ok(false) => (),
                Err(e) => {
                    let e = GridError::contract(contract.name(), e.to_string());
                    warn!("Skip contract for {} in {}: {}", pending.node, stage, e);
                }
            }
        }
        Offer::Refused
    }

    /// Delivers registration events to this mapper from a dedicated task,
    /// so that publishers never run the allocation themselves.
    pub fn registration_channel(
        self: &Arc<Self>,
        rt: &Runtime,
    ) -> (mpsc::UnboundedSender<NodesRegistered>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<NodesRegistered>();
        let mapper = self.clone();
        let handle = rt.spawn(async move {
            while let Some(event) = rx.recv().await {
                let deployment = event.deployment_id.clone();
                if let Err(e) = mapper.on_nodes_registered(event) {
                    warn!("Registration from deployment {} failed: {}", deployment, e);
                }
            }
        });
        (tx, handle)
    }
}

impl NodeRegistrationListener for NodeMapper {
    fn on_nodes_registered(&self, event: NodesRegistered) -> GridResult<usize> {
        let provider = self.registry.register_provider(&event.provider_id);
        self.registry
            .add_descriptor(&event.provider_id, &event.deployment_id)?;

        let mut mapped = 0;
        let mut state = self.state.lock_safe();
        for url in &event.nodes {
            let pending = PendingNode {
                node: DeployedNode::new(url, &event.provider_id, &event.deployment_id),
                provider: provider.clone(),
            };
            if self.stage1(&mut state, pending) {
                mapped += 1;
            }
        }
        drop(state);

        debug!(
            "Deployment {} registered {} nodes, {} mapped in stage 1",
            event.deployment_id,
            event.nodes.len(),
            mapped
        );
        self.wakeup.notify_one();
        Ok(mapped)
    }
}
