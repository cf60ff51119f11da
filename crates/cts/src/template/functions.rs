//! Built-in, dependency-producing template functions.

use thiserror::Error;

use crate::catalog::{Dependency, QueryResult};

#[derive(Debug, Error, PartialEq)]
pub enum FunctionError {
    #[error("unknown template function \"{0}\"")]
    Unknown(String),
    #[error("function \"{0}\" requires a string argument")]
    MissingArgument(String),
    #[error("function \"{0}\" takes no argument")]
    UnexpectedArgument(String),
}

/// What shape of output a call site produces once its dependency is
/// populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderKind {
    ServiceList,
    CatalogServices,
    KvSingle,
    KvTree,
    NodeList,
}

/// Resolves one `{{ function "arg" }}` call to the dependency it
/// subscribes to and the shape its output takes.
pub fn resolve(name: &str, arg: Option<&str>) -> Result<(Dependency, RenderKind), FunctionError> {
    match name {
        "service" => {
            let name = require_arg(name, arg)?;
            Ok((
                Dependency::ServiceHealthByName {
                    name: name.to_string(),
                    datacenter: None,
                    namespace: None,
                    node_meta: None,
                    filter: None,
                },
                RenderKind::ServiceList,
            ))
        }
        "serviceRegex" => {
            let pattern = require_arg(name, arg)?;
            Ok((
                Dependency::ServiceHealthByRegex {
                    pattern: pattern.to_string(),
                    datacenter: None,
                    namespace: None,
                },
                RenderKind::ServiceList,
            ))
        }
        "catalogServices" => {
            reject_arg(name, arg)?;
            Ok((
                Dependency::CatalogServiceList {
                    datacenter: None,
                    regex: None,
                },
                RenderKind::CatalogServices,
            ))
        }
        "catalogServicesRegex" => {
            let pattern = require_arg(name, arg)?;
            Ok((
                Dependency::CatalogServiceList {
                    datacenter: None,
                    regex: Some(pattern.to_string()),
                },
                RenderKind::CatalogServices,
            ))
        }
        "consulKV" => {
            let path = require_arg(name, arg)?;
            Ok((
                Dependency::KvSingle {
                    path: path.to_string(),
                    datacenter: None,
                },
                RenderKind::KvSingle,
            ))
        }
        "consulKVRecurse" => {
            let path = require_arg(name, arg)?;
            Ok((
                Dependency::KvTree {
                    path: path.to_string(),
                    datacenter: None,
                },
                RenderKind::KvTree,
            ))
        }
        "nodes" => {
            reject_arg(name, arg)?;
            Ok((Dependency::NodeList { datacenter: None }, RenderKind::NodeList))
        }
        other => Err(FunctionError::Unknown(other.to_string())),
    }
}

fn require_arg<'a>(name: &str, arg: Option<&'a str>) -> Result<&'a str, FunctionError> {
    arg.ok_or_else(|| FunctionError::MissingArgument(name.to_string()))
}

fn reject_arg(name: &str, arg: Option<&str>) -> Result<(), FunctionError> {
    if arg.is_some() {
        return Err(FunctionError::UnexpectedArgument(name.to_string()));
    }
    Ok(())
}

/// Deterministic textual rendering of one dependency's current value.
/// Ordering is already normalized on [`QueryResult`]; this only
/// controls the textual shape.
pub fn render_value(kind: RenderKind, result: &QueryResult) -> String {
    match (kind, result) {
        (RenderKind::ServiceList, QueryResult::ServiceList(items)) => {
            serde_json::to_string(items).unwrap_or_default()
        }
        (RenderKind::CatalogServices, QueryResult::CatalogServiceList(items)) => {
            serde_json::to_string(items).unwrap_or_default()
        }
        (RenderKind::KvSingle, QueryResult::KvSingle(value)) => {
            value.clone().unwrap_or_default()
        }
        (RenderKind::KvTree, QueryResult::KvTree(map)) => {
            serde_json::to_string(map).unwrap_or_default()
        }
        (RenderKind::NodeList, QueryResult::NodeList(items)) => {
            serde_json::to_string(items).unwrap_or_default()
        }
        // A mismatched (kind, result) pair means a dependency identity
        // collided across two calls that disagree on shape, which
        // `compile` prevents by keying the dependency set on the
        // dependency itself, not the call site.
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_requires_argument() {
        assert_eq!(
            resolve("service", None),
            Err(FunctionError::MissingArgument("service".to_string()))
        );
    }

    #[test]
    fn nodes_rejects_argument() {
        assert_eq!(
            resolve("nodes", Some("x")),
            Err(FunctionError::UnexpectedArgument("nodes".to_string()))
        );
    }

    #[test]
    fn unknown_function_is_rejected() {
        assert_eq!(
            resolve("bogus", None),
            Err(FunctionError::Unknown("bogus".to_string()))
        );
    }
}
