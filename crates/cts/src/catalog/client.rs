//! Catalog client trait and its live (reqwest) implementation.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use thiserror::Error;

use crate::error::{Classified, ErrorKind};

use super::error_map::classify_status;
use super::query::{
    CatalogServiceListRow, Dependency, KvPair, NodeListRow, QueryResult, ServiceHealthRow,
};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("catalog returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("response missing index header")]
    MissingIndex,

    #[error("malformed response body: {0}")]
    Decode(String),

    #[error("read timed out")]
    Timeout,

    #[error("invalid regex pattern: {0}")]
    InvalidRegex(#[from] regex::Error),
}

impl Classified for CatalogError {
    fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::Request(_) => ErrorKind::Transient,
            CatalogError::Status { status, .. } => classify_status(*status),
            CatalogError::MissingIndex | CatalogError::Decode(_) => ErrorKind::Configuration,
            CatalogError::Timeout => ErrorKind::Transient,
            CatalogError::InvalidRegex(_) => ErrorKind::Configuration,
        }
    }
}

/// One blocking-read response: the value plus the index it was
/// observed at.
pub struct Fetched {
    pub result: QueryResult,
    pub index: u64,
}

/// Abstracts the upstream catalog HTTP API so the fetch loop can run
/// against either Consul or, in tests, [`super::fake::FakeCatalogClient`].
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Perform one blocking read. `wait_index` is the client's last
    /// observed index for this dependency (0 means "no prior value").
    /// Implementations must honor the server-side wait timeout and a
    /// client-side read deadline of double that.
    async fn blocking_read(
        &self,
        dependency: &Dependency,
        wait_index: u64,
    ) -> Result<Fetched, CatalogError>;
}

/// Configuration needed to reach a live Consul-compatible catalog.
#[derive(Debug, Clone)]
pub struct CatalogEndpoint {
    pub address: String,
    pub wait_timeout: Duration,
    pub stale: bool,
}

impl Default for CatalogEndpoint {
    fn default() -> Self {
        Self {
            address: "http://127.0.0.1:8500".to_string(),
            wait_timeout: Duration::from_secs(60),
            stale: false,
        }
    }
}

/// Talks to a real catalog over HTTP(S) using `reqwest`.
pub struct LiveCatalogClient {
    http: reqwest::Client,
    endpoint: CatalogEndpoint,
}

impl LiveCatalogClient {
    pub fn new(http: reqwest::Client, endpoint: CatalogEndpoint) -> Self {
        Self { http, endpoint }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.address, path)
    }

    /// Issues the GET and returns the raw response regardless of status,
    /// so callers that need to distinguish status codes (e.g. KV's 404)
    /// can still read headers off a non-2xx response.
    async fn send(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<reqwest::Response, CatalogError> {
        let client_deadline = self.endpoint.wait_timeout * 2;
        tokio::time::timeout(
            client_deadline,
            self.http.get(self.url(path)).query(query).send(),
        )
        .await
        .map_err(|_| CatalogError::Timeout)?
        .map_err(CatalogError::Request)
    }

    async fn get(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<reqwest::Response, CatalogError> {
        let response = self.send(path, query).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    fn index_header(response: &reqwest::Response) -> Result<u64, CatalogError> {
        response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .ok_or(CatalogError::MissingIndex)
    }

    fn blocking_query(&self, wait_index: u64) -> Vec<(String, String)> {
        let mut q = Vec::new();
        if wait_index > 0 {
            q.push(("index".into(), wait_index.to_string()));
            q.push((
                "wait".into(),
                format!("{}s", self.endpoint.wait_timeout.as_secs()),
            ));
        }
        if self.endpoint.stale {
            q.push(("stale".into(), String::new()));
        }
        q
    }

    async fn fetch_service_by_name(
        &self,
        name: &str,
        datacenter: &Option<String>,
        namespace: &Option<String>,
        node_meta: &Option<String>,
        filter: &Option<String>,
        wait_index: u64,
    ) -> Result<Fetched, CatalogError> {
        let mut query = self.blocking_query(wait_index);
        if let Some(dc) = datacenter {
            query.push(("dc".into(), dc.clone()));
        }
        if let Some(ns) = namespace {
            query.push(("ns".into(), ns.clone()));
        }
        if let Some(nm) = node_meta {
            query.push(("node-meta".into(), nm.clone()));
        }
        if let Some(f) = filter {
            query.push(("filter".into(), f.clone()));
        }
        query.push(("passing".into(), "true".into()));

        let response = self.get(&format!("/v1/health/service/{name}"), &query).await?;
        let index = Self::index_header(&response)?;
        let rows: Vec<ServiceHealthRow> = response
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;
        let mut result = QueryResult::ServiceList(rows.into_iter().map(Into::into).collect());
        result.normalize();
        Ok(Fetched { result, index })
    }

    /// List service names, filter by regex, then issue one health query
    /// per match. The composite index returned to the caller is the
    /// catalog-list index.
    async fn fetch_service_by_regex(
        &self,
        pattern: &str,
        datacenter: &Option<String>,
        namespace: &Option<String>,
        wait_index: u64,
    ) -> Result<Fetched, CatalogError> {
        let re = regex::Regex::new(pattern)?;

        let mut list_query = self.blocking_query(wait_index);
        if let Some(dc) = datacenter {
            list_query.push(("dc".into(), dc.clone()));
        }
        let response = self.get("/v1/catalog/services", &list_query).await?;
        let list_index = Self::index_header(&response)?;
        let map: std::collections::HashMap<String, Vec<String>> = response
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;
        let rows = CatalogServiceListRow::from_map(map);

        let matched: Vec<String> = rows
            .into_iter()
            .map(|r| r.name)
            .filter(|name| re.is_match(name))
            .collect();

        let health_futures = matched.iter().map(|name| {
            self.fetch_service_by_name(name, datacenter, namespace, &None, &None, 0)
        });
        let mut instances = Vec::new();
        for outcome in join_all(health_futures).await {
            match outcome {
                Ok(fetched) => {
                    if let QueryResult::ServiceList(mut items) = fetched.result {
                        instances.append(&mut items);
                    }
                }
                Err(e) => return Err(e),
            }
        }

        let mut result = QueryResult::ServiceList(instances);
        result.normalize();
        Ok(Fetched {
            result,
            index: list_index,
        })
    }

    async fn fetch_catalog_service_list(
        &self,
        datacenter: &Option<String>,
        regex_filter: &Option<String>,
        wait_index: u64,
    ) -> Result<Fetched, CatalogError> {
        let mut query = self.blocking_query(wait_index);
        if let Some(dc) = datacenter {
            query.push(("dc".into(), dc.clone()));
        }
        let response = self.get("/v1/catalog/services", &query).await?;
        let index = Self::index_header(&response)?;
        let map: std::collections::HashMap<String, Vec<String>> = response
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;
        let rows = CatalogServiceListRow::from_map(map);

        let filtered: Vec<(String, Vec<String>)> = match regex_filter {
            Some(pattern) => {
                let re = regex::Regex::new(pattern)?;
                rows.into_iter()
                    .filter(|r| re.is_match(&r.name))
                    .map(Into::into)
                    .collect()
            }
            None => rows.into_iter().map(Into::into).collect(),
        };

        let mut result = QueryResult::CatalogServiceList(filtered);
        result.normalize();
        Ok(Fetched { result, index })
    }

    async fn fetch_kv(
        &self,
        path: &str,
        datacenter: &Option<String>,
        recurse: bool,
        wait_index: u64,
    ) -> Result<Fetched, CatalogError> {
        let mut query = self.blocking_query(wait_index);
        if let Some(dc) = datacenter {
            query.push(("dc".into(), dc.clone()));
        }
        if recurse {
            query.push(("recurse".into(), "true".into()));
        }

        let response = self.send(&format!("/v1/kv/{path}"), &query).await?;
        let status = response.status();
        // A missing key returns 404 with an empty body, not an error, but
        // Consul still stamps it with the real X-Consul-Index so blocking
        // callers can tell it apart from a stale read.
        let (index, rows) = if status.as_u16() == 404 {
            let index = Self::index_header(&response)?;
            (index, Vec::new())
        } else if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Status {
                status: status.as_u16(),
                body,
            });
        } else {
            let index = Self::index_header(&response)?;
            let rows: Vec<KvPair> = response
                .json()
                .await
                .map_err(|e| CatalogError::Decode(e.to_string()))?;
            (index, rows)
        };

        let result = if recurse {
            let mut map = std::collections::BTreeMap::new();
            for row in rows {
                if let Some(v) = row.value {
                    map.insert(row.key, v);
                }
            }
            QueryResult::KvTree(map)
        } else {
            QueryResult::KvSingle(rows.into_iter().next().and_then(|r| r.value))
        };
        Ok(Fetched { result, index })
    }

    async fn fetch_nodes(
        &self,
        datacenter: &Option<String>,
        wait_index: u64,
    ) -> Result<Fetched, CatalogError> {
        let mut query = self.blocking_query(wait_index);
        if let Some(dc) = datacenter {
            query.push(("dc".into(), dc.clone()));
        }
        let response = self.get("/v1/catalog/nodes", &query).await?;
        let index = Self::index_header(&response)?;
        let rows: Vec<NodeListRow> = response
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))?;
        let mut result = QueryResult::NodeList(rows.into_iter().map(Into::into).collect());
        result.normalize();
        Ok(Fetched { result, index })
    }
}

#[async_trait]
impl CatalogClient for LiveCatalogClient {
    async fn blocking_read(
        &self,
        dependency: &Dependency,
        wait_index: u64,
    ) -> Result<Fetched, CatalogError> {
        match dependency {
            Dependency::ServiceHealthByName {
                name,
                datacenter,
                namespace,
                node_meta,
                filter,
            } => {
                self.fetch_service_by_name(name, datacenter, namespace, node_meta, filter, wait_index)
                    .await
            }
            Dependency::ServiceHealthByRegex {
                pattern,
                datacenter,
                namespace,
            } => {
                self.fetch_service_by_regex(pattern, datacenter, namespace, wait_index)
                    .await
            }
            Dependency::CatalogServiceList { datacenter, regex } => {
                self.fetch_catalog_service_list(datacenter, regex, wait_index)
                    .await
            }
            Dependency::KvSingle { path, datacenter } => {
                self.fetch_kv(path, datacenter, false, wait_index).await
            }
            Dependency::KvTree { path, datacenter } => {
                self.fetch_kv(path, datacenter, true, wait_index).await
            }
            Dependency::NodeList { datacenter } => self.fetch_nodes(datacenter, wait_index).await,
        }
    }
}
