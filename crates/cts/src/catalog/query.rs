//! Dependency identity and the values a catalog query can return.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One catalog query. Two dependencies with equal kind + parameters are
/// the same identity (`Hash`/`Eq`) and share a single [`crate::view::View`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Dependency {
    ServiceHealthByName {
        name: String,
        datacenter: Option<String>,
        namespace: Option<String>,
        node_meta: Option<String>,
        filter: Option<String>,
    },
    ServiceHealthByRegex {
        pattern: String,
        datacenter: Option<String>,
        namespace: Option<String>,
    },
    CatalogServiceList {
        datacenter: Option<String>,
        regex: Option<String>,
    },
    KvSingle {
        path: String,
        datacenter: Option<String>,
    },
    KvTree {
        path: String,
        datacenter: Option<String>,
    },
    NodeList {
        datacenter: Option<String>,
    },
}

impl Dependency {
    /// Stable human-readable identity, used in log lines and as the map
    /// key for things that can't hold the full enum (e.g. dashboards).
    pub fn label(&self) -> String {
        match self {
            Dependency::ServiceHealthByName { name, .. } => format!("service(\"{name}\")"),
            Dependency::ServiceHealthByRegex { pattern, .. } => {
                format!("service(~> \"{pattern}\")")
            }
            Dependency::CatalogServiceList { regex, .. } => match regex {
                Some(r) => format!("catalog-services(~> \"{r}\")"),
                None => "catalog-services".to_string(),
            },
            Dependency::KvSingle { path, .. } => format!("kv(\"{path}\")"),
            Dependency::KvTree { path, .. } => format!("kv-tree(\"{path}\")"),
            Dependency::NodeList { .. } => "nodes".to_string(),
        }
    }

    /// `catalog-service-list` carries an artificial 1s hold-back so
    /// health queries can catch up to a registration.
    pub fn propagation_delay(&self) -> Option<std::time::Duration> {
        match self {
            Dependency::CatalogServiceList { .. } => Some(std::time::Duration::from_secs(1)),
            _ => None,
        }
    }
}

/// A single service-health instance, as returned by
/// `ServiceHealthByName`/`ServiceHealthByRegex`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub node: String,
    pub address: String,
    pub port: u16,
    pub tags: Vec<String>,
}

/// One registered node info entry for `NodeList`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node: String,
    pub address: String,
}

/// Wire shape of one `/v1/health/service/<name>` row. Deliberately
/// looser than [`ServiceInstance`] (flattened `Node`/`Service` structs
/// the way Consul's API actually nests them) so decoding stays a pure
/// mechanical `From` conversion.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceHealthRow {
    #[serde(rename = "Service")]
    pub service: ServiceHealthRowService,
    #[serde(rename = "Node")]
    pub node: ServiceHealthRowNode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceHealthRowService {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Service")]
    pub name: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceHealthRowNode {
    #[serde(rename = "Node")]
    pub node: String,
}

impl From<ServiceHealthRow> for ServiceInstance {
    fn from(row: ServiceHealthRow) -> Self {
        ServiceInstance {
            id: row.service.id,
            name: row.service.name,
            node: row.node.node,
            address: row.service.address,
            port: row.service.port,
            tags: row.service.tags,
        }
    }
}

/// Wire shape of one `/v1/catalog/services` entry: `{name: [tags...]}`
/// flattened to a row by the decoder before it reaches us.
#[derive(Debug, Clone)]
pub struct CatalogServiceListRow {
    pub name: String,
    pub tags: Vec<String>,
}

impl CatalogServiceListRow {
    pub fn from_map(map: std::collections::HashMap<String, Vec<String>>) -> Vec<Self> {
        map.into_iter()
            .map(|(name, tags)| CatalogServiceListRow { name, tags })
            .collect()
    }
}

impl From<CatalogServiceListRow> for (String, Vec<String>) {
    fn from(row: CatalogServiceListRow) -> Self {
        (row.name, row.tags)
    }
}

/// Wire shape of one `/v1/kv/<path>` row.
#[derive(Debug, Clone, Deserialize)]
pub struct KvPair {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value", with = "kv_value_base64")]
    pub value: Option<String>,
}

mod kv_value_base64 {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        match encoded {
            None => Ok(None),
            Some(s) => {
                use base64::Engine;
                base64::engine::general_purpose::STANDARD
                    .decode(s)
                    .map_err(serde::de::Error::custom)
                    .and_then(|bytes| {
                        String::from_utf8(bytes).map_err(serde::de::Error::custom)
                    })
                    .map(Some)
            }
        }
    }
}

/// Wire shape of one `/v1/catalog/nodes` row.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeListRow {
    #[serde(rename = "Node")]
    pub node: String,
    #[serde(rename = "Address")]
    pub address: String,
}

impl From<NodeListRow> for NodeInfo {
    fn from(row: NodeListRow) -> Self {
        NodeInfo {
            node: row.node,
            address: row.address,
        }
    }
}

/// The value side of a view: what a query returned, independent of the
/// index it was returned at (the index lives on the view itself).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryResult {
    /// Ordered by (node, service-id) per the template engine's
    /// determinism contract.
    ServiceList(Vec<ServiceInstance>),
    /// (name, tags) pairs, tags sorted, list sorted by name.
    CatalogServiceList(Vec<(String, Vec<String>)>),
    KvSingle(Option<String>),
    /// Flat map sorted by key (`BTreeMap` gives this for free).
    KvTree(BTreeMap<String, String>),
    NodeList(Vec<NodeInfo>),
}

impl QueryResult {
    /// Normalizes ordering in place so two fetches of logically-equal
    /// data always compare equal and serialize to the same bytes.
    pub fn normalize(&mut self) {
        match self {
            QueryResult::ServiceList(items) => {
                items.sort_by(|a, b| (&a.node, &a.id).cmp(&(&b.node, &b.id)));
            }
            QueryResult::CatalogServiceList(items) => {
                for (_, tags) in items.iter_mut() {
                    tags.sort();
                }
                items.sort_by(|a, b| a.0.cmp(&b.0));
            }
            QueryResult::NodeList(items) => {
                items.sort_by(|a, b| a.node.cmp(&b.node));
            }
            QueryResult::KvSingle(_) | QueryResult::KvTree(_) => {}
        }
    }
}
