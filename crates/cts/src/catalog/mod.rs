//! Everything needed to read from a Consul-compatible catalog: the
//! dependency/query-result vocabulary, HTTP error classification, the
//! live client, and a fake for tests.

pub mod client;
pub mod error_map;
pub mod query;

#[cfg(test)]
pub mod fake;

pub use client::{CatalogClient, CatalogEndpoint, CatalogError, Fetched, LiveCatalogClient};
pub use query::{
    CatalogServiceListRow, Dependency, KvPair, NodeInfo, NodeListRow, QueryResult,
    ServiceHealthRow, ServiceInstance,
};

#[cfg(test)]
pub use fake::FakeCatalogClient;
