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
use log::{debug, info};
use orpc::sync::LockExt;
use p2pgrid_common::error::GridError;
use p2pgrid_common::state::{NodeFilter, NodeHandle};
use p2pgrid_common::GridResult;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Books the compute nodes hosted next to a peer.
///
/// A node returned by `asking_node` or `asking_all_nodes` is booked and will
/// not be handed out again until `release` is called for it.
pub trait NodeManager: Send + Sync {
    fn id(&self) -> &str;

    fn asking_node(&self, filter: Option<&NodeFilter>) -> GridResult<Option<NodeHandle>>;

    fn asking_all_nodes(&self, filter: Option<&NodeFilter>) -> GridResult<Vec<NodeHandle>>;

    /// Returns the node to the free pool and forgets its tags.
    fn release(&self, node: &NodeHandle) -> GridResult<()>;

    fn register_virtual_node(&self, node: &NodeHandle, vn_name: &str) -> GridResult<()>;

    fn set_job_id(&self, node: &NodeHandle, job_id: &str) -> GridResult<()>;

    /// Records a consumer runtime that now uses nodes of this manager.
    fn add_acquaintance(&self, _runtime: &str) -> GridResult<()> {
        Ok(())
    }

    fn remove_acquaintance(&self, _runtime: &str) -> GridResult<()> {
        Ok(())
    }
}

pub type NodeManagerRef = Arc<dyn NodeManager>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeTags {
    pub vn_names: Vec<String>,
    pub job_id: Option<String>,
}

#[derive(Default)]
struct NodePool {
    free: VecDeque<NodeHandle>,
    booked: IndexMap<String, (NodeHandle, NodeTags)>,
    acquaintances: HashSet<String>,
}

/// In-process node manager over a fixed pool of nodes.
pub struct LocalNodeManager {
    id: String,
    closed: AtomicBool,
    pool: Mutex<NodePool>,
}

impl LocalNodeManager {
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self {
            id: id.into(),
            closed: AtomicBool::new(false),
            pool: Mutex::new(NodePool::default()),
        }
    }

    pub fn with_nodes<T: Into<String>>(id: T, nodes: Vec<NodeHandle>) -> Self {
        let manager = Self::new(id);
        for node in nodes {
            manager.add_node(node);
        }
        manager
    }

    /// Creates `n` nodes named `node://<id>/<i>` of the given family.
    pub fn with_capacity<T: Into<String>>(id: T, n: usize, family: &str) -> Self {
        let id = id.into();
        let nodes = (0..n)
            .map(|i| NodeHandle::new(format!("node://{}/{}", id, i), family))
            .collect();
        Self::with_nodes(id, nodes)
    }

    pub fn add_node(&self, node: NodeHandle) {
        self.pool.lock_safe().free.push_back(node);
    }

    pub fn free_count(&self) -> usize {
        self.pool.lock_safe().free.len()
    }

    pub fn booked_count(&self) -> usize {
        self.pool.lock_safe().booked.len()
    }

    pub fn is_booked(&self, url: &str) -> bool {
        self.pool.lock_safe().booked.contains_key(url)
    }

    pub fn tags(&self, url: &str) -> Option<NodeTags> {
        self.pool
            .lock_safe()
            .booked
            .get(url)
            .map(|(_, tags)| tags.clone())
    }

    pub fn acquaintances(&self) -> Vec<String> {
        let mut list: Vec<_> = self.pool.lock_safe().acquaintances.iter().cloned().collect();
        list.sort();
        list
    }

    /// Makes every later call fail as if the manager had crashed.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn check_open(&self) -> GridResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(GridError::unreachable(format!("node manager {}", self.id)))
        } else {
            Ok(())
        }
    }

    fn book(pool: &mut NodePool, index: usize) -> Option<NodeHandle> {
        let node = pool.free.remove(index)?;
        pool.booked
            .insert(node.url().to_string(), (node.clone(), NodeTags::default()));
        Some(node)
    }

    fn with_booked<F>(&self, node: &NodeHandle, f: F) -> GridResult<()>
    where
        F: FnOnce(&mut NodeTags),
    {
        self.check_open()?;
        let mut pool = self.pool.lock_safe();
        match pool.booked.get_mut(node.url()) {
            Some((_, tags)) => {
                f(tags);
                Ok(())
            }
            None => Err(GridError::invalid(format!(
                "node {} is not booked on {}",
                node, self.id
            ))),
        }
    }
}

impl NodeManager for LocalNodeManager {
    fn id(&self) -> &str {
        &self.id
    }

    fn asking_node(&self, filter: Option<&NodeFilter>) -> GridResult<Option<NodeHandle>> {
        self.check_open()?;
        let mut pool = self.pool.lock_safe();
        let index = pool
            .free
            .iter()
            .position(|n| filter.map_or(true, |f| f.matches(n)));

        let node = index.and_then(|i| Self::book(&mut pool, i));
        if let Some(node) = &node {
            debug!("{} books node {}", self.id, node);
        }
        Ok(node)
    }

    fn asking_all_nodes(&self, filter: Option<&NodeFilter>) -> GridResult<Vec<NodeHandle>> {
        self.check_open()?;
        let mut pool = self.pool.lock_safe();
        let mut nodes = vec![];
        let mut i = 0;
        while i < pool.free.len() {
            if filter.map_or(true, |f| f.matches(&pool.free[i])) {
                if let Some(node) = Self::book(&mut pool, i) {
                    nodes.push(node);
                }
            } else {
                i += 1;
            }
        }
        if !nodes.is_empty() {
            debug!("{} books {} nodes", self.id, nodes.len());
        }
        Ok(nodes)
    }

    fn release(&self, node: &NodeHandle) -> GridResult<()> {
        self.check_open()?;
        let mut pool = self.pool.lock_safe();
        match pool.booked.shift_remove(node.url()) {
            Some((node, _)) => {
                info!("{} releases node {}", self.id, node);
                pool.free.push_front(node);
            }
            None => debug!("{} was not booked on {}", node, self.id),
        }
        Ok(())
    }

    fn register_virtual_node(&self, node: &NodeHandle, vn_name: &str) -> GridResult<()> {
        self.with_booked(node, |tags| {
            if !tags.vn_names.iter().any(|v| v == vn_name) {
                tags.vn_names.push(vn_name.to_string());
            }
        })
    }

    fn set_job_id(&self, node: &NodeHandle, job_id: &str) -> GridResult<()> {
        self.with_booked(node, |tags| tags.job_id = Some(job_id.to_string()))
    }

    fn add_acquaintance(&self, runtime: &str) -> GridResult<()> {
        self.check_open()?;
        self.pool.lock_safe().acquaintances.insert(runtime.to_string());
        Ok(())
    }

    fn remove_acquaintance(&self, runtime: &str) -> GridResult<()> {
        self.check_open()?;
        self.pool.lock_safe().acquaintances.remove(runtime);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn book_and_release() {
        let manager = LocalNodeManager::with_capacity("m1", 2, "cpu");
        let a = manager.asking_node(None).unwrap().unwrap();
        let b = manager.asking_node(None).unwrap().unwrap();
        assert_ne!(a, b);
        assert!(manager.asking_node(None).unwrap().is_none());
        assert_eq!(manager.booked_count(), 2);

        manager.register_virtual_node(&a, "vn1").unwrap();
        manager.set_job_id(&a, "job-1").unwrap();
        let tags = manager.tags(a.url()).unwrap();
        assert_eq!(tags.vn_names, vec!["vn1".to_string()]);
        assert_eq!(tags.job_id.as_deref(), Some("job-1"));

        manager.release(&a).unwrap();
        manager.release(&a).unwrap();
        assert_eq!(manager.free_count(), 1);
        assert!(manager.tags(a.url()).is_none());
        assert!(manager.set_job_id(&a, "job-2").is_err());
    }

    #[test]
    fn release_clears_tags() {
        let manager = LocalNodeManager::with_capacity("m1", 1, "cpu");
        let node = manager.asking_node(None).unwrap().unwrap();
        manager.register_virtual_node(&node, "vn1").unwrap();
        manager.set_job_id(&node, "job-1").unwrap();
        manager.release(&node).unwrap();

        let again = manager.asking_node(None).unwrap().unwrap();
        assert_eq!(again, node);
        assert_eq!(manager.tags(again.url()), Some(NodeTags::default()));
    }

    #[test]
    fn filters_and_all_nodes() {
        let manager = LocalNodeManager::with_nodes(
            "m1",
            vec![
                NodeHandle::new("n1", "cpu"),
                NodeHandle::new("n2", "gpu"),
                NodeHandle::new("n3", "cpu"),
            ],
        );
        let gpu = NodeFilter::new("gpu").unwrap();
        assert_eq!(manager.asking_node(Some(&gpu)).unwrap().unwrap().url(), "n2");
        assert!(manager.asking_node(Some(&gpu)).unwrap().is_none());

        let all = manager.asking_all_nodes(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(manager.free_count(), 0);
    }

    #[test]
    fn shutdown_is_unreachable() {
        let manager = LocalNodeManager::with_capacity("m1", 1, "cpu");
        manager.shutdown();
        assert!(manager.asking_node(None).unwrap_err().is_unreachable());
    }
}
