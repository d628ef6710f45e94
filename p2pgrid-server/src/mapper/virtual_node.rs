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

use crate::mapper::NodeProvider;
use log::{debug, info, warn};
use orpc::sync::LockExt;
use p2pgrid_common::error::GridError;
use p2pgrid_common::state::Capacity;
use p2pgrid_common::GridResult;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// A node started by a deployment and not yet used by anybody.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeployedNode {
    url: String,
    provider_id: String,
    deployment_id: String,
}

impl DeployedNode {
    pub fn new(url: &str, provider_id: &str, deployment_id: &str) -> Self {
        Self {
            url: url.to_string(),
            provider_id: provider_id.to_string(),
            deployment_id: deployment_id.to_string(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    pub fn deployment_id(&self) -> &str {
        &self.deployment_id
    }
}

impl fmt::Display for DeployedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.url, self.provider_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualNodeEvent {
    NodeAttached { vn_name: String, node: DeployedNode },
    Ready { vn_name: String },
}

/// What the mapper asks a consumer of nodes. Every method that returns true
/// has attached the node to the consumer.
pub trait VirtualNodeContract: Send + Sync {
    fn name(&self) -> &str;

    /// Stage 1: the node comes from a provider this consumer has an
    /// unsatisfied contract with.
    fn does_node_provider_need(
        &self,
        node: &DeployedNode,
        provider: &NodeProvider,
    ) -> GridResult<bool>;

    /// Stage 2: the consumer still misses nodes, whatever the provider.
    fn do_you_need(&self, node: &DeployedNode, provider: &NodeProvider) -> GridResult<bool>;

    /// Stage 3: greedy consumers take what nobody needed.
    fn do_you_want(&self, node: &DeployedNode, provider: &NodeProvider) -> GridResult<bool>;

    fn has_contract_with(&self, provider: &NodeProvider) -> GridResult<bool>;

    fn has_unsatisfied_contract(&self) -> GridResult<bool>;

    /// True while the contract with `provider` can still claim one of its nodes.
    fn has_unsatisfied_contract_with(&self, provider: &NodeProvider) -> GridResult<bool> {
        Ok(self.has_contract_with(provider)? && self.has_unsatisfied_contract()?)
    }
}

pub type ContractRef = Arc<dyn VirtualNodeContract>;

struct ProviderContract {
    provider_id: String,
    capacity: Capacity,
    nodes: u64,
}

impl ProviderContract {
    fn need_node(&self) -> bool {
        !self.capacity.is_greedy() && !self.capacity.is_full(self.nodes)
    }
}

#[derive(Default)]
struct VirtualNodeState {
    contracts: Vec<ProviderContract>,
    nodes: Vec<DeployedNode>,
    // Nodes already returned by get_a_node.
    handed_out: usize,
    // Nodes already returned by get_new_nodes.
    reported: usize,
    ready_sent: bool,
    subscribers: Vec<mpsc::UnboundedSender<VirtualNodeEvent>>,
}

/// Group of nodes requested by an application, filled by the mapper.
pub struct VirtualNode {
    name: String,
    capacity: Capacity,
    state: Mutex<VirtualNodeState>,
    changed: Condvar,
}

impl VirtualNode {
    pub fn new<T: Into<String>>(name: T, capacity: Capacity) -> Self {
        Self {
            name: name.into(),
            capacity,
            state: Mutex::new(VirtualNodeState::default()),
            changed: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> Capacity {
        self.capacity
    }

    pub fn is_greedy(&self) -> bool {
        self.capacity.is_greedy()
    }

    pub fn add_node_provider_contract(
        &self,
        provider: &NodeProvider,
        capacity: Capacity,
    ) -> GridResult<()> {
        let mut state = self.state.lock_safe();
        if state
            .contracts
            .iter()
            .any(|c| c.provider_id == provider.id())
        {
            return Err(GridError::invalid(format!(
                "{} already has a contract with {}",
                self.name, provider
            )));
        }

        state.contracts.push(ProviderContract {
            provider_id: provider.id().to_string(),
            capacity,
            nodes: 0,
        });

        if let Capacity::Limited(limit) = self.capacity {
            let total: u64 = state.contracts.iter().filter_map(|c| c.capacity.limit()).sum();
            if total > limit {
                warn!(
                    "Contracts of {} ask {} nodes, more than its capacity {}",
                    self.name, total, limit
                );
            }
        }
        Ok(())
    }

    fn need_node(&self, state: &VirtualNodeState) -> bool {
        !self.capacity.is_full(state.nodes.len() as u64) && !self.is_greedy()
    }

    fn ready(&self, state: &VirtualNodeState) -> bool {
        !self.need_node(state) && !state.contracts.iter().any(|c| c.need_node())
    }

    pub fn is_ready(&self) -> bool {
        let state = self.state.lock_safe();
        self.ready(&state)
    }

    /// Declared capacity, 0 for a greedy node.
    pub fn nb_required_nodes(&self) -> u64 {
        self.capacity.limit().unwrap_or(0)
    }

    pub fn nb_current_nodes(&self) -> usize {
        self.state.lock_safe().nodes.len()
    }

    pub fn current_nodes(&self) -> Vec<DeployedNode> {
        self.state.lock_safe().nodes.clone()
    }

    /// Nodes attached since the previous call.
    pub fn get_new_nodes(&self) -> Vec<DeployedNode> {
        let mut state = self.state.lock_safe();
        let new = state.nodes[state.reported..].to_vec();
        state.reported = state.nodes.len();
        new
    }

    /// Next node not handed out yet, waiting up to `timeout` for one.
    pub fn get_a_node(&self, timeout: Duration) -> Option<DeployedNode> {
        let guard = self.state.lock_safe();
        let (mut state, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |s| s.handed_out >= s.nodes.len())
            .unwrap_or_else(|e| e.into_inner());

        if state.handed_out < state.nodes.len() {
            let node = state.nodes[state.handed_out].clone();
            state.handed_out += 1;
            Some(node)
        } else {
            None
        }
    }

    pub fn wait_ready(&self, timeout: Duration) -> GridResult<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock_safe();
        loop {
            if self.ready(&state) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(GridError::Timeout(self.unmet_requirements(&state)));
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .map(|(s, _)| s)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    fn unmet_requirements(&self, state: &VirtualNodeState) -> String {
        let mut msg = format!("{} is not ready.", self.name);
        if let Capacity::Limited(limit) = self.capacity {
            let current = state.nodes.len() as u64;
            if current < limit {
                msg.push_str(&format!(" It needs {} more nodes.", limit - current));
            }
        }
        for c in state.contracts.iter().filter(|c| c.need_node()) {
            if let Capacity::Limited(limit) = c.capacity {
                msg.push_str(&format!(
                    " Contract with {} needs {} more nodes.",
                    c.provider_id,
                    limit - c.nodes
                ));
            }
        }
        msg
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<VirtualNodeEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock_safe().subscribers.push(tx);
        rx
    }

    fn contract_index(state: &VirtualNodeState, provider: &NodeProvider) -> Option<usize> {
        state
            .contracts
            .iter()
            .position(|c| c.provider_id == provider.id())
    }

    fn attach(
        &self,
        state: &mut MutexGuard<'_, VirtualNodeState>,
        node: &DeployedNode,
        contract: Option<usize>,
    ) {
        if let Some(i) = contract {
            state.contracts[i].nodes += 1;
        }
        state.nodes.push(node.clone());
        info!("{} attached to {}", node, self.name);

        let mut events = vec![VirtualNodeEvent::NodeAttached {
            vn_name: self.name.clone(),
            node: node.clone(),
        }];
        if !state.ready_sent && self.ready(state) {
            state.ready_sent = true;
            info!("{} is ready", self.name);
            events.push(VirtualNodeEvent::Ready {
                vn_name: self.name.clone(),
            });
        }

        state
            .subscribers
            .retain(|tx| events.iter().all(|e| tx.send(e.clone()).is_ok()));
        self.changed.notify_all();
    }
}

impl VirtualNodeContract for VirtualNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn does_node_provider_need(
        &self,
        node: &DeployedNode,
        provider: &NodeProvider,
    ) -> GridResult<bool> {
        let mut state = self.state.lock_safe();
        let index = match Self::contract_index(&state, provider) {
            Some(i) if state.contracts[i].need_node() => i,
            _ => return Ok(false),
        };
        if !(self.need_node(&state) || self.is_greedy()) {
            return Ok(false);
        }
        self.attach(&mut state, node, Some(index));
        Ok(true)
    }

    fn do_you_need(&self, node: &DeployedNode, provider: &NodeProvider) -> GridResult<bool> {
        let mut state = self.state.lock_safe();
        if !self.need_node(&state) {
            return Ok(false);
        }
        let index = Self::contract_index(&state, provider).filter(|i| {
            let c = &state.contracts[*i];
            c.capacity.is_greedy() || c.need_node()
        });
        self.attach(&mut state, node, index);
        Ok(true)
    }

    fn do_you_want(&self, node: &DeployedNode, provider: &NodeProvider) -> GridResult<bool> {
        if !self.is_greedy() {
            return Ok(false);
        }
        let mut state = self.state.lock_safe();
        if state.contracts.is_empty() {
            self.attach(&mut state, node, None);
            return Ok(true);
        }
        match Self::contract_index(&state, provider) {
            Some(i) if state.contracts[i].capacity.is_greedy() => {
                self.attach(&mut state, node, Some(i));
                Ok(true)
            }
            _ => {
                debug!("{} has no greedy contract with {}", self.name, provider);
                Ok(false)
            }
        }
    }

    fn has_contract_with(&self, provider: &NodeProvider) -> GridResult<bool> {
        let state = self.state.lock_safe();
        Ok(Self::contract_index(&state, provider).is_some())
    }

    fn has_unsatisfied_contract(&self) -> GridResult<bool> {
        Ok(self.state.lock_safe().contracts.iter().any(|c| c.need_node()))
    }

    fn has_unsatisfied_contract_with(&self, provider: &NodeProvider) -> GridResult<bool> {
        let state = self.state.lock_safe();
        let need = match Self::contract_index(&state, provider) {
            Some(i) => state.contracts[i].need_node() && (self.need_node(&state) || self.is_greedy()),
            None => false,
        };
        Ok(need)
    }
}

impl fmt::Debug for VirtualNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualNode")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("nodes", &self.nb_current_nodes())
            .finish()
    }
}
