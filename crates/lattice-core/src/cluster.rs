//! Front-end view of every interpreter process.
//!
//! The cluster keeps one [`ConnectionPool`] per interpreter group and answers
//! resource lookups that a process relays through its event poller by asking
//! all the other processes in parallel.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::angular::{AngularObjectListener, AngularObjectRegistry};
use crate::client::{ConnectionPool, ConnectionPoolConfig};
use crate::process::InterpreterProcess;
use crate::resource::{
    ResourceInfo, ResourcePool, ResourcePoolEventHandler, ResourceValue, location_matches, matches,
};

/// Connection pools by group id, plus an optional resource pool owned by the
/// front-end itself.
pub struct Cluster {
    pools: Mutex<BTreeMap<String, Arc<ConnectionPool>>>,
    local_pool: Option<ResourcePool>,
    config: ConnectionPoolConfig,
    angular_listener: Option<Arc<dyn AngularObjectListener>>,
}

impl Cluster {
    pub fn new(config: ConnectionPoolConfig) -> Arc<Self> {
        Self::build(config, None, false)
    }

    /// A cluster whose front-end also holds resources, visible to every
    /// process.
    pub fn with_local_pool(config: ConnectionPoolConfig) -> Arc<Self> {
        Self::build(config, None, true)
    }

    /// Register the listener that receives angular changes of every group.
    pub fn with_angular_listener(
        config: ConnectionPoolConfig,
        listener: Arc<dyn AngularObjectListener>,
        local_pool: bool,
    ) -> Arc<Self> {
        Self::build(config, Some(listener), local_pool)
    }

    fn build(
        config: ConnectionPoolConfig,
        angular_listener: Option<Arc<dyn AngularObjectListener>>,
        local_pool: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|cluster: &Weak<Cluster>| Self {
            pools: Mutex::new(BTreeMap::new()),
            local_pool: local_pool.then(|| {
                ResourcePool::new(Some(Arc::new(ClusterRelay {
                    cluster: cluster.clone(),
                })))
            }),
            config,
            angular_listener,
        })
    }

    /// The front-end's own resource pool, if any.
    pub fn local_pool(&self) -> Option<&ResourcePool> {
        self.local_pool.as_ref()
    }

    /// Connection pool for a group, created with `process` if missing.
    ///
    /// An existing pool whose process is down and that nobody references is
    /// replaced.
    pub fn connection_pool(
        self: &Arc<Self>,
        group_id: &str,
        process: impl FnOnce() -> Arc<dyn InterpreterProcess>,
    ) -> Arc<ConnectionPool> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(group_id)
            && (pool.is_running() || pool.reference_count() > 0)
        {
            return pool.clone();
        }

        debug!(group = group_id, "creating connection pool");
        let registry = Arc::new(AngularObjectRegistry::new(
            group_id,
            self.angular_listener.clone(),
        ));
        let pool = ConnectionPool::new(
            group_id,
            process(),
            registry,
            self.config.clone(),
            Arc::downgrade(self),
        );
        pools.insert(group_id.to_string(), pool.clone());
        pool
    }

    pub fn get(&self, group_id: &str) -> Option<Arc<ConnectionPool>> {
        self.pools.lock().get(group_id).cloned()
    }

    pub fn remove(&self, group_id: &str) -> Option<Arc<ConnectionPool>> {
        self.pools.lock().remove(group_id)
    }

    /// Every connection pool, ordered by group id.
    pub fn members(&self) -> Vec<Arc<ConnectionPool>> {
        self.pools.lock().values().cloned().collect()
    }

    /// Search the running processes, skipping `exclude_group`.
    pub fn search_members(
        &self,
        exclude_group: Option<&str>,
        location: &str,
        name_pattern: &str,
    ) -> Vec<ResourceInfo> {
        let members = self.running_members(exclude_group);
        let found: Vec<Vec<ResourceInfo>> = members
            .par_iter()
            .map(|pool| match pool.search_resources(location, name_pattern) {
                Ok(infos) => infos,
                Err(e) => {
                    warn!(group = pool.group_id(), "resource search failed: {}", e);
                    Vec::new()
                }
            })
            .collect();

        let mut infos: Vec<ResourceInfo> = Vec::new();
        for info in found.into_iter().flatten() {
            if !infos.contains(&info) {
                infos.push(info);
            }
        }
        infos
    }

    /// Search the running processes (except `exclude_group`) and the
    /// front-end's own pool.
    pub fn search_all(
        &self,
        exclude_group: Option<&str>,
        location: &str,
        name_pattern: &str,
    ) -> Vec<ResourceInfo> {
        let mut infos = match &self.local_pool {
            Some(local) if location_matches(location, local.id()) => local
                .search_local(name_pattern)
                .into_iter()
                .filter(|info| matches(location, name_pattern, info))
                .collect(),
            _ => Vec::new(),
        };
        for info in self.search_members(exclude_group, location, name_pattern) {
            if !infos.contains(&info) {
                infos.push(info);
            }
        }
        infos
    }

    /// Payload of the first matching resource among the running processes
    /// (except `exclude_group`), in group order.
    pub fn get_members(&self, exclude_group: Option<&str>, location: &str, name: &str) -> Option<Vec<u8>> {
        let members = self.running_members(exclude_group);
        members
            .par_iter()
            .find_map_first(|pool| match pool.get_resource(location, name) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(group = pool.group_id(), "resource get failed: {}", e);
                    None
                }
            })
    }

    /// Like [`get_members`](Self::get_members), trying the front-end's own
    /// pool first.
    pub fn get_from_all(&self, exclude_group: Option<&str>, location: &str, name: &str) -> Option<Vec<u8>> {
        if let Some(local) = &self.local_pool
            && location_matches(location, local.id())
            && let Some(value) = local.get_local(name)
        {
            match value.to_bytes() {
                Ok(Some(bytes)) => return Some(bytes),
                Ok(None) => debug!(name, "local resource cannot leave the front-end"),
                Err(e) => warn!(name, "cannot encode local resource: {}", e),
            }
        }
        self.get_members(exclude_group, location, name)
    }

    fn running_members(&self, exclude_group: Option<&str>) -> Vec<Arc<ConnectionPool>> {
        self.pools
            .lock()
            .values()
            .filter(|pool| Some(pool.group_id()) != exclude_group && pool.is_running())
            .cloned()
            .collect()
    }
}

/// Lets the front-end's own pool reach the processes.
struct ClusterRelay {
    cluster: Weak<Cluster>,
}

impl ResourcePoolEventHandler for ClusterRelay {
    fn resource_pool_search(&self, location: &str, name_pattern: &str) -> Option<Vec<ResourceInfo>> {
        let cluster = self.cluster.upgrade()?;
        Some(cluster.search_members(None, location, name_pattern))
    }

    fn resource_pool_get_object(&self, location: &str, name: &str) -> Option<ResourceValue> {
        let cluster = self.cluster.upgrade()?;
        let bytes = cluster.get_members(None, location, name)?;
        match ResourceValue::from_bytes(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(name, "cannot decode remote resource: {}", e);
                None
            }
        }
    }
}
