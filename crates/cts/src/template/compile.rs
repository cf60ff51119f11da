//! Walks `{{ function "arg" }}` call expressions embedded in literal
//! text and returns the complete dependency set before the first
//! render, the way a staged/runtime template engine would only learn
//! incrementally.

use std::collections::HashSet;

use thiserror::Error;

use crate::catalog::Dependency;
use crate::error::{Classified, ErrorKind};

use super::functions::{self, FunctionError, RenderKind};

#[derive(Debug, Error, PartialEq)]
pub enum CompileError {
    #[error("unterminated \"{{{{\" in template source")]
    UnterminatedCall,
    #[error("empty call expression \"{{{{  }}}}\"")]
    EmptyCall,
    #[error(transparent)]
    Function(#[from] FunctionError),
}

impl Classified for CompileError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Configuration
    }
}

#[derive(Debug, Clone)]
pub(super) enum Segment {
    Literal(String),
    Call {
        dependency: Dependency,
        render: RenderKind,
    },
}

/// A compiled task template: literal text interleaved with resolved
/// calls, plus the union of every call's dependency.
#[derive(Debug, Clone)]
pub struct Template {
    pub(super) segments: Vec<Segment>,
    dependencies: HashSet<Dependency>,
}

impl Template {
    pub fn dependencies(&self) -> &HashSet<Dependency> {
        &self.dependencies
    }
}

/// Parses `source`, resolving each `{{ ... }}` call to a dependency.
/// Repeated identical calls share one dependency instance per the
/// `Dependency` identity contract.
pub fn compile(source: &str) -> Result<Template, CompileError> {
    let mut segments = Vec::new();
    let mut dependencies = HashSet::new();

    let mut rest = source;
    loop {
        match rest.find("{{") {
            None => {
                if !rest.is_empty() {
                    segments.push(Segment::Literal(rest.to_string()));
                }
                break;
            }
            Some(open) => {
                if open > 0 {
                    segments.push(Segment::Literal(rest[..open].to_string()));
                }
                let after_open = &rest[open + 2..];
                let close = after_open
                    .find("}}")
                    .ok_or(CompileError::UnterminatedCall)?;
                let call_src = after_open[..close].trim();
                if call_src.is_empty() {
                    return Err(CompileError::EmptyCall);
                }
                let (name, arg) = split_call(call_src);
                let (dependency, render) = functions::resolve(name, arg)?;
                dependencies.insert(dependency.clone());
                segments.push(Segment::Call { dependency, render });
                rest = &after_open[close + 2..];
            }
        }
    }

    Ok(Template {
        segments,
        dependencies,
    })
}

/// Splits `service "api"` into `("service", Some("api"))`, and
/// `nodes` into `("nodes", None)`.
fn split_call(call_src: &str) -> (&str, Option<&str>) {
    match call_src.split_once(char::is_whitespace) {
        Some((name, rest)) => {
            let arg = rest.trim().trim_matches('"');
            (name, Some(arg))
        }
        None => (call_src, None),
    }
}
