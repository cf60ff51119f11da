//! In-process catalog double for tests: a hand-written fake living
//! beside the live client rather than a generated mock.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::client::{CatalogClient, CatalogError, Fetched};
use super::query::{Dependency, NodeInfo, QueryResult, ServiceInstance};

#[derive(Default)]
struct FakeState {
    services: HashMap<String, Vec<ServiceInstance>>,
    catalog_tags: HashMap<String, Vec<String>>,
    kv: BTreeMap<String, String>,
    nodes: Vec<NodeInfo>,
    index: u64,
}

/// An in-memory catalog whose long-poll simulates Consul's blocking
/// read: it resolves immediately if the caller's index is stale, and
/// otherwise waits for the next mutation (bounded by `poll_timeout` so
/// a test never deadlocks on a call nobody will ever satisfy).
pub struct FakeCatalogClient {
    state: Mutex<FakeState>,
    changed: Notify,
    poll_timeout: Duration,
}

impl FakeCatalogClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            changed: Notify::new(),
            poll_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_poll_timeout(poll_timeout: Duration) -> Self {
        Self {
            poll_timeout,
            ..Self::new()
        }
    }

    async fn bump(&self) {
        let mut state = self.state.lock().await;
        state.index += 1;
        drop(state);
        self.changed.notify_waiters();
    }

    pub async fn register_service(&self, service_name: &str, instance: ServiceInstance) {
        {
            let mut state = self.state.lock().await;
            state
                .services
                .entry(service_name.to_string())
                .or_default()
                .retain(|existing| existing.id != instance.id);
            state
                .services
                .get_mut(service_name)
                .unwrap()
                .push(instance.clone());
            state
                .catalog_tags
                .entry(service_name.to_string())
                .or_insert_with(|| instance.tags.clone());
        }
        self.bump().await;
    }

    pub async fn deregister_service(&self, service_name: &str, instance_id: &str) {
        {
            let mut state = self.state.lock().await;
            if let Some(list) = state.services.get_mut(service_name) {
                list.retain(|i| i.id != instance_id);
                if list.is_empty() {
                    state.services.remove(service_name);
                    state.catalog_tags.remove(service_name);
                }
            }
        }
        self.bump().await;
    }

    pub async fn set_kv(&self, key: &str, value: &str) {
        {
            let mut state = self.state.lock().await;
            state.kv.insert(key.to_string(), value.to_string());
        }
        self.bump().await;
    }

    pub async fn delete_kv(&self, key: &str) {
        {
            let mut state = self.state.lock().await;
            state.kv.remove(key);
        }
        self.bump().await;
    }

    pub async fn set_nodes(&self, nodes: Vec<NodeInfo>) {
        {
            let mut state = self.state.lock().await;
            state.nodes = nodes;
        }
        self.bump().await;
    }

    fn evaluate(dependency: &Dependency, state: &FakeState) -> QueryResult {
        let mut result = match dependency {
            Dependency::ServiceHealthByName { name, .. } => QueryResult::ServiceList(
                state.services.get(name).cloned().unwrap_or_default(),
            ),
            Dependency::ServiceHealthByRegex { pattern, .. } => {
                let re = regex::Regex::new(pattern).unwrap_or_else(|_| regex::Regex::new("$^").unwrap());
                let mut items = Vec::new();
                for (name, instances) in &state.services {
                    if re.is_match(name) {
                        items.extend(instances.iter().cloned());
                    }
                }
                QueryResult::ServiceList(items)
            }
            Dependency::CatalogServiceList { regex, .. } => {
                let items: Vec<(String, Vec<String>)> = state
                    .catalog_tags
                    .iter()
                    .filter(|(name, _)| match regex {
                        Some(pattern) => regex::Regex::new(pattern)
                            .map(|re| re.is_match(name))
                            .unwrap_or(false),
                        None => true,
                    })
                    .map(|(n, t)| (n.clone(), t.clone()))
                    .collect();
                QueryResult::CatalogServiceList(items)
            }
            Dependency::KvSingle { path, .. } => {
                QueryResult::KvSingle(state.kv.get(path).cloned())
            }
            Dependency::KvTree { path, .. } => {
                let prefix = path.clone();
                let subtree: BTreeMap<String, String> = state
                    .kv
                    .iter()
                    .filter(|(k, _)| k.starts_with(&prefix))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                QueryResult::KvTree(subtree)
            }
            Dependency::NodeList { .. } => QueryResult::NodeList(state.nodes.clone()),
        };
        result.normalize();
        result
    }
}

impl Default for FakeCatalogClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogClient for FakeCatalogClient {
    async fn blocking_read(
        &self,
        dependency: &Dependency,
        wait_index: u64,
    ) -> Result<Fetched, CatalogError> {
        loop {
            let state = self.state.lock().await;
            let current_index = state.index;
            if current_index != wait_index {
                let result = Self::evaluate(dependency, &state);
                return Ok(Fetched {
                    result,
                    index: current_index,
                });
            }
            drop(state);

            let wait = self.changed.notified();
            tokio::select! {
                _ = wait => {}
                _ = tokio::time::sleep(self.poll_timeout) => {
                    let state = self.state.lock().await;
                    let result = Self::evaluate(dependency, &state);
                    return Ok(Fetched { result, index: state.index });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str) -> ServiceInstance {
        ServiceInstance {
            id: id.to_string(),
            name: "api".to_string(),
            node: "node-1".to_string(),
            address: "10.0.0.1".to_string(),
            port: 8080,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn first_read_returns_empty_with_advancing_index() {
        let fake = FakeCatalogClient::new();
        let dep = Dependency::ServiceHealthByName {
            name: "api".into(),
            datacenter: None,
            namespace: None,
            node_meta: None,
            filter: None,
        };
        // index starts at 0; a caller with wait_index 0 must still get
        // an immediate answer the very first time around, so seed one
        // mutation before the zero-index read would otherwise block.
        fake.register_service("api", instance("api-1")).await;
        let fetched = fake.blocking_read(&dep, 0).await.unwrap();
        match fetched.result {
            QueryResult::ServiceList(items) => assert_eq!(items.len(), 1),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn register_then_deregister_round_trips_to_empty() {
        let fake = FakeCatalogClient::new();
        let dep = Dependency::ServiceHealthByName {
            name: "api".into(),
            datacenter: None,
            namespace: None,
            node_meta: None,
            filter: None,
        };
        fake.register_service("api", instance("api-1")).await;
        let first = fake.blocking_read(&dep, 0).await.unwrap();
        fake.deregister_service("api", "api-1").await;
        let second = fake.blocking_read(&dep, first.index).await.unwrap();
        match second.result {
            QueryResult::ServiceList(items) => assert!(items.is_empty()),
            _ => unreachable!(),
        }
        assert!(second.index > first.index);
    }

    #[tokio::test]
    async fn kv_tree_returns_subtree_sorted_by_key() {
        let fake = FakeCatalogClient::new();
        fake.set_kv("k/child", "v2").await;
        fake.set_kv("k", "v1").await;
        let dep = Dependency::KvTree {
            path: "k".into(),
            datacenter: None,
        };
        let fetched = fake.blocking_read(&dep, 0).await.unwrap();
        match fetched.result {
            QueryResult::KvTree(map) => {
                let keys: Vec<_> = map.keys().cloned().collect();
                assert_eq!(keys, vec!["k".to_string(), "k/child".to_string()]);
            }
            _ => unreachable!(),
        }
    }
}
