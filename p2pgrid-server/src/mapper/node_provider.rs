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

use indexmap::IndexMap;
use log::info;
use orpc::sync::RwLockExt;
use p2pgrid_common::error::GridError;
use p2pgrid_common::GridResult;
use std::fmt;
use std::sync::{Arc, RwLock};

/// A source of nodes: one or more deployment descriptors whose deployments
/// register nodes with the mapper.
pub struct NodeProvider {
    id: String,
    descriptors: RwLock<Vec<String>>,
}

impl NodeProvider {
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self {
            id: id.into(),
            descriptors: RwLock::new(vec![]),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn descriptors(&self) -> Vec<String> {
        self.descriptors.read_safe().clone()
    }

    fn add_descriptor(&self, deployment_id: &str) -> bool {
        let mut descriptors = self.descriptors.write_safe();
        if descriptors.iter().any(|d| d == deployment_id) {
            false
        } else {
            descriptors.push(deployment_id.to_string());
            true
        }
    }
}

impl PartialEq for NodeProvider {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeProvider {}

impl fmt::Debug for NodeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeProvider")
            .field("id", &self.id)
            .field("descriptors", &self.descriptors())
            .finish()
    }
}

impl fmt::Display for NodeProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

#[derive(Default)]
struct RegistryState {
    providers: IndexMap<String, Arc<NodeProvider>>,
    deployments: IndexMap<String, String>,
}

/// Known node providers and the deployments they own.
#[derive(Default)]
pub struct NodeProviderRegistry {
    state: RwLock<RegistryState>,
}

impl NodeProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the provider with this id, creating it if needed.
    pub fn register_provider(&self, id: &str) -> Arc<NodeProvider> {
        let mut state = self.state.write_safe();
        state
            .providers
            .entry(id.to_string())
            .or_insert_with(|| {
                info!("Node provider {} registered", id);
                Arc::new(NodeProvider::new(id))
            })
            .clone()
    }

    /// Attaches a deployment descriptor to a provider. A deployment belongs to
    /// exactly one provider.
    pub fn add_descriptor(&self, provider_id: &str, deployment_id: &str) -> GridResult<()> {
        let mut state = self.state.write_safe();
        if let Some(owner) = state.deployments.get(deployment_id) {
            if owner != provider_id {
                return Err(GridError::invalid(format!(
                    "deployment {} already belongs to provider {}",
                    deployment_id, owner
                )));
            }
        }

        let provider = match state.providers.get(provider_id) {
            Some(v) => v.clone(),
            None => {
                return Err(GridError::invalid(format!(
                    "unknown node provider {}",
                    provider_id
                )))
            }
        };
        provider.add_descriptor(deployment_id);
        state
            .deployments
            .insert(deployment_id.to_string(), provider_id.to_string());
        Ok(())
    }

    pub fn provider(&self, id: &str) -> Option<Arc<NodeProvider>> {
        self.state.read_safe().providers.get(id).cloned()
    }

    pub fn provider_for_deployment(&self, deployment_id: &str) -> Option<Arc<NodeProvider>> {
        let state = self.state.read_safe();
        let provider_id = state.deployments.get(deployment_id)?;
        state.providers.get(provider_id).cloned()
    }

    pub fn providers(&self) -> Vec<Arc<NodeProvider>> {
        self.state.read_safe().providers.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry() {
        let registry = NodeProviderRegistry::new();
        let px = registry.register_provider("px");
        assert!(Arc::ptr_eq(&px, &registry.register_provider("px")));

        registry.add_descriptor("px", "deploy-1").unwrap();
        registry.add_descriptor("px", "deploy-1").unwrap();
        assert_eq!(px.descriptors(), vec!["deploy-1".to_string()]);

        registry.register_provider("py");
        assert!(registry.add_descriptor("py", "deploy-1").is_err());
        assert!(registry.add_descriptor("pz", "deploy-2").is_err());

        assert_eq!(
            registry.provider_for_deployment("deploy-1").unwrap().id(),
            "px"
        );
        assert!(registry.provider_for_deployment("deploy-9").is_none());
        assert_eq!(registry.providers().len(), 2);
    }
}
