//! Deterministic rendering of a compiled template against the current
//! value of each dependency in its set.

use crate::catalog::{Dependency, QueryResult};

use super::compile::{Segment, Template};
use super::functions;

/// Result of one render attempt.
pub struct RenderOutcome {
    pub bytes: Vec<u8>,
    /// True iff every declared view was populated (the template was
    /// not *missing*) and the output differs from the previous render.
    pub changed: bool,
    /// False while any declared dependency has never been populated.
    pub ready: bool,
}

/// Holds the last rendered output so repeated renders of an unchanged
/// template are reported as `changed = false`.
pub struct Renderer {
    last: parking_lot::Mutex<Option<Vec<u8>>>,
}

impl Renderer {
    pub fn new() -> Self {
        Self {
            last: parking_lot::Mutex::new(None),
        }
    }

    /// `values` resolves a dependency to its current stored value;
    /// `None` means the view has never fetched.
    pub fn render(
        &self,
        template: &Template,
        values: impl Fn(&Dependency) -> Option<QueryResult>,
    ) -> RenderOutcome {
        for dependency in template.dependencies() {
            if values(dependency).is_none() {
                return RenderOutcome {
                    bytes: Vec::new(),
                    changed: false,
                    ready: false,
                };
            }
        }

        let mut out = String::new();
        for segment in &template.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Call { dependency, render } => {
                    let value = values(dependency).expect("checked ready above");
                    out.push_str(&functions::render_value(*render, &value));
                }
            }
        }

        let bytes = out.into_bytes();
        let mut last = self.last.lock();
        let changed = last.as_deref() != Some(bytes.as_slice());
        if changed {
            *last = Some(bytes.clone());
        }
        RenderOutcome {
            bytes,
            changed,
            ready: true,
        }
    }
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::compile::compile;
    use super::*;
    use std::collections::HashMap;

    fn service_list(ids: &[&str]) -> QueryResult {
        QueryResult::ServiceList(
            ids.iter()
                .map(|id| crate::catalog::ServiceInstance {
                    id: id.to_string(),
                    name: "api".into(),
                    node: "node-1".into(),
                    address: "10.0.0.1".into(),
                    port: 8080,
                    tags: vec![],
                })
                .collect(),
        )
    }

    #[test]
    fn missing_dependency_renders_nothing_and_is_not_ready() {
        let template = compile(r#"{{ service "api" }}"#).unwrap();
        let renderer = Renderer::new();
        let outcome = renderer.render(&template, |_| None);
        assert!(!outcome.ready);
        assert!(!outcome.changed);
        assert!(outcome.bytes.is_empty());
    }

    #[test]
    fn rendering_twice_without_change_is_idempotent() {
        let template = compile(r#"{{ service "api" }}"#).unwrap();
        let renderer = Renderer::new();
        let values: HashMap<Dependency, QueryResult> = template
            .dependencies()
            .iter()
            .map(|d| (d.clone(), service_list(&["api-1"])))
            .collect();
        let lookup = |d: &Dependency| values.get(d).cloned();

        let first = renderer.render(&template, lookup);
        assert!(first.ready);
        assert!(first.changed);

        let second = renderer.render(&template, lookup);
        assert!(second.ready);
        assert!(!second.changed);
        assert_eq!(first.bytes, second.bytes);
    }
}
