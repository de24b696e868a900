//! Process-local resource pool with cluster-wide lookup.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::{LOCATION_ANY, NamePattern, ResourceInfo, ResourceKey, ResourceValue, location_matches};
use crate::error::Result;

/// Reaches the resource pools of other processes.
///
/// Both calls return `None` when the answer could not be obtained in time.
pub trait ResourcePoolEventHandler: Send + Sync {
    fn resource_pool_search(&self, location: &str, name_pattern: &str) -> Option<Vec<ResourceInfo>>;

    fn resource_pool_get_object(&self, location: &str, name: &str) -> Option<ResourceValue>;
}

/// Resources owned by one process.
pub struct ResourcePool {
    id: String,
    resources: Mutex<HashMap<ResourceKey, ResourceValue>>,
    handler: Option<Arc<dyn ResourcePoolEventHandler>>,
}

impl ResourcePool {
    /// New pool with a freshly generated id.
    pub fn new(handler: Option<Arc<dyn ResourcePoolEventHandler>>) -> Self {
        Self::with_id(format!("resourcePool_{}", uuid::Uuid::new_v4()), handler)
    }

    pub fn with_id(id: impl Into<String>, handler: Option<Arc<dyn ResourcePoolEventHandler>>) -> Self {
        Self {
            id: id.into(),
            resources: Mutex::new(HashMap::new()),
            handler,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Store a resource under `name`, replacing any previous value.
    pub fn put(&self, name: impl Into<String>, value: impl Into<ResourceValue>) {
        let key = ResourceKey::new(self.id.clone(), name);
        debug!(resource = %key, "put resource");
        self.resources.lock().insert(key, value.into());
    }

    /// Store a value as JSON.
    pub fn put_serializable<T: Serialize>(&self, name: impl Into<String>, value: &T) -> Result<()> {
        self.put(name, ResourceValue::Serializable(serde_json::to_value(value)?));
        Ok(())
    }

    /// Local resource by name.
    pub fn get_local(&self, name: &str) -> Option<ResourceValue> {
        self.resources
            .lock()
            .get(&ResourceKey::new(self.id.clone(), name))
            .cloned()
    }

    /// Resource by name from anywhere in the cluster, local pool first.
    pub fn get(&self, name: &str) -> Option<ResourceValue> {
        self.get_in(LOCATION_ANY, name)
    }

    /// Resource by name from the pool `location` (or `*`).
    pub fn get_in(&self, location: &str, name: &str) -> Option<ResourceValue> {
        if location == self.id {
            return self.get_local(name);
        }
        if location == LOCATION_ANY
            && let Some(value) = self.get_local(name)
        {
            return Some(value);
        }
        self.handler
            .as_ref()?
            .resource_pool_get_object(location, name)
    }

    /// Decode a resource found anywhere in the cluster.
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.get(name) {
            Some(value) => value.deserialize(),
            None => Ok(None),
        }
    }

    /// Local resources whose name matches `name_pattern`.
    pub fn search_local(&self, name_pattern: &str) -> Vec<ResourceInfo> {
        let pattern = match NamePattern::new(name_pattern) {
            Ok(pattern) => pattern,
            Err(e) => {
                warn!("{}", e);
                return Vec::new();
            }
        };
        let mut infos: Vec<ResourceInfo> = self
            .resources
            .lock()
            .iter()
            .filter(|(key, _)| pattern.is_match(&key.name))
            .map(|(key, value)| {
                ResourceInfo::new(key.location.clone(), key.name.clone(), value.is_serializable())
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Resources matching `name_pattern` in every pool of the cluster.
    pub fn search(&self, name_pattern: &str) -> Vec<ResourceInfo> {
        self.search_in(LOCATION_ANY, name_pattern)
    }

    /// Resources matching `name_pattern` in the pool `location` (or `*`).
    ///
    /// A wildcard search always includes local matches, even when the other
    /// pools cannot be reached in time.
    pub fn search_in(&self, location: &str, name_pattern: &str) -> Vec<ResourceInfo> {
        if location == self.id {
            return self.search_local(name_pattern);
        }

        let mut infos = if location == LOCATION_ANY {
            self.search_local(name_pattern)
        } else {
            Vec::new()
        };

        let Some(handler) = &self.handler else {
            return infos;
        };
        match handler.resource_pool_search(location, name_pattern) {
            Some(remote) => {
                for info in remote {
                    if location_matches(location, &info.location) && !infos.contains(&info) {
                        infos.push(info);
                    }
                }
            }
            None => warn!(location, name_pattern, "resource search got no answer in time"),
        }
        infos
    }

    /// Remove a local resource.
    pub fn remove(&self, name: &str) -> Option<ResourceValue> {
        self.resources
            .lock()
            .remove(&ResourceKey::new(self.id.clone(), name))
    }

    pub fn len(&self) -> usize {
        self.resources.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("id", &self.id)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::NAME_ANY;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers as if one other pool held `remote_name`.
    struct FakeCluster {
        remote_id: String,
        remote_name: String,
        answer: bool,
        calls: AtomicUsize,
    }

    impl FakeCluster {
        fn new(answer: bool) -> Arc<Self> {
            Arc::new(Self {
                remote_id: "remote".to_string(),
                remote_name: "shared".to_string(),
                answer,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl ResourcePoolEventHandler for FakeCluster {
        fn resource_pool_search(&self, location: &str, name_pattern: &str) -> Option<Vec<ResourceInfo>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.answer {
                return None;
            }
            let info = ResourceInfo::new(self.remote_id.clone(), self.remote_name.clone(), true);
            Some(if crate::resource::matches(location, name_pattern, &info) {
                vec![info]
            } else {
                Vec::new()
            })
        }

        fn resource_pool_get_object(&self, location: &str, name: &str) -> Option<ResourceValue> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let hit = self.answer
                && name == self.remote_name
                && location_matches(location, &self.remote_id);
            hit.then(|| ResourceValue::from("from remote"))
        }
    }

    #[test]
    fn test_local_resource_access() {
        let pool = ResourcePool::new(None);
        pool.put("instance1", "value1");
        pool.put("instance2", "value2");

        assert_eq!(pool.get_local("instance1").unwrap().as_json(), Some(&json!("value1")));
        assert_eq!(pool.get("instance2").unwrap().as_json(), Some(&json!("value2")));
        assert_eq!(pool.search_local(NAME_ANY).len(), 2);
        assert_eq!(pool.search_local("instance[12]").len(), 2);
        assert_eq!(pool.search_local("instance").len(), 0);
    }

    #[test]
    fn test_last_put_wins() {
        let pool = ResourcePool::new(None);
        pool.put("x", "old");
        pool.put("x", "new");

        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get_local("x").unwrap().as_json(), Some(&json!("new")));
    }

    #[test]
    fn test_remove() {
        let pool = ResourcePool::new(None);
        pool.put("x", "value");

        assert!(pool.remove("x").is_some());
        assert!(pool.remove("x").is_none());
        assert!(pool.get_local("x").is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_local_value_is_reported_non_serializable() {
        let pool = ResourcePool::new(None);
        pool.put("handle", ResourceValue::local(42u32));

        let infos = pool.search_local("handle");
        assert_eq!(infos.len(), 1);
        assert!(!infos[0].serializable);
        assert_eq!(infos[0].location, pool.id());
    }

    #[test]
    fn test_wildcard_search_unites_local_and_remote() {
        let cluster = FakeCluster::new(true);
        let pool = ResourcePool::new(Some(cluster.clone()));
        pool.put("mine", "v");

        let names: Vec<String> = pool.search(NAME_ANY).into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["mine".to_string(), "shared".to_string()]);
    }

    #[test]
    fn test_wildcard_search_falls_back_to_local_on_timeout() {
        let pool = ResourcePool::new(Some(FakeCluster::new(false)));
        pool.put("mine", "v");

        let infos = pool.search(NAME_ANY);
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].name, "mine");
    }

    #[test]
    fn test_own_location_never_asks_the_cluster() {
        let cluster = FakeCluster::new(true);
        let pool = ResourcePool::new(Some(cluster.clone()));
        pool.put("mine", "v");

        assert_eq!(pool.search_in(pool.id(), NAME_ANY).len(), 1);
        assert!(pool.get_in(pool.id(), "shared").is_none());
        assert_eq!(cluster.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_get_prefers_local_then_remote() {
        let cluster = FakeCluster::new(true);
        let pool = ResourcePool::new(Some(cluster.clone()));
        pool.put("shared", "local copy");

        assert_eq!(pool.get("shared").unwrap().as_json(), Some(&json!("local copy")));
        assert_eq!(cluster.calls.load(Ordering::SeqCst), 0);

        pool.remove("shared");
        assert_eq!(pool.get("shared").unwrap().as_json(), Some(&json!("from remote")));
        assert_eq!(pool.get_in("remote", "shared").unwrap().as_json(), Some(&json!("from remote")));
        assert!(pool.get_in("elsewhere", "shared").is_none());
    }

    #[test]
    fn test_typed_helpers() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Point {
            x: i32,
            y: i32,
        }

        let pool = ResourcePool::new(None);
        pool.put_serializable("p", &Point { x: 1, y: 2 }).unwrap();
        assert_eq!(pool.get_as::<Point>("p").unwrap(), Some(Point { x: 1, y: 2 }));
        assert_eq!(pool.get_as::<Point>("missing").unwrap(), None);
    }
}
