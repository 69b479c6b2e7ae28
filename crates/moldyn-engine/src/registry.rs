//! Node creation registry: name-prefix to factory mapping.
//!
//! The configuration loader selects a factory by the longest registered
//! prefix of a group's name, then hands the factory the group plus the
//! resolved argument list. The table is built once, before any engine, and
//! read-only afterwards.

use crate::engine::{ArgList, BuiltNode};
use crate::error::{EngineError, Result};
use serde_json::Value;
use std::collections::BTreeMap;

/// A factory turning a configuration group and an argument list into a node.
pub type NodeFactory = Box<dyn Fn(&Value, &mut ArgList<'_>) -> Result<BuiltNode> + Send + Sync>;

/// True when `prefix` is an initial substring of `name`.
#[inline]
pub fn is_prefix(prefix: &str, name: &str) -> bool {
    name.starts_with(prefix)
}

/// Prefix-keyed factory table.
#[derive(Default)]
pub struct NodeRegistry {
    map: BTreeMap<String, NodeFactory>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `prefix`. Registering the same prefix twice
    /// is an error.
    pub fn register(&mut self, prefix: &str, factory: NodeFactory) -> Result<()> {
        if self.map.contains_key(prefix) {
            return Err(EngineError::Registry(format!(
                "node prefix '{prefix}' is already registered"
            )));
        }
        self.map.insert(prefix.to_string(), factory);
        Ok(())
    }

    /// The factory whose prefix is the longest initial substring of `name`.
    pub fn lookup(&self, name: &str) -> Option<&NodeFactory> {
        self.map
            .iter()
            .filter(|(prefix, _)| is_prefix(prefix, name))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, factory)| factory)
    }

    /// Registered prefixes, sorted.
    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

/// Wrap a constructor so the argument count is validated before it runs.
pub fn factory_fixed<F>(n_args: usize, f: F) -> NodeFactory
where
    F: Fn(&Value, &mut ArgList<'_>) -> Result<BuiltNode> + Send + Sync + 'static,
{
    Box::new(move |grp, args| {
        check_arguments_length(args, n_args)?;
        f(grp, args)
    })
}

/// Wrap a constructor accepting any non-empty argument list.
pub fn factory_variadic<F>(f: F) -> NodeFactory
where
    F: Fn(&Value, &mut ArgList<'_>) -> Result<BuiltNode> + Send + Sync + 'static,
{
    Box::new(move |grp, args| {
        if args.is_empty() {
            return Err(EngineError::Configuration(
                "expected at least 1 argument".to_string(),
            ));
        }
        f(grp, args)
    })
}

/// Fail unless exactly `expected` arguments were supplied.
pub fn check_arguments_length(args: &ArgList<'_>, expected: usize) -> Result<()> {
    if args.len() != expected {
        return Err(EngineError::Configuration(format!(
            "expected {expected} arguments but got {}",
            args.len()
        )));
    }
    Ok(())
}

/// Fail unless argument `k` has exactly the expected element width.
pub fn check_elem_width(args: &ArgList<'_>, k: usize, expected: usize) -> Result<()> {
    let width = args.elem_width(k);
    if width != expected {
        return Err(EngineError::Configuration(format!(
            "argument {k} has element width {width} but {expected} is required"
        )));
    }
    Ok(())
}

/// Fail unless argument `k` has at least the given element width.
pub fn check_elem_width_lower_bound(args: &ArgList<'_>, k: usize, bound: usize) -> Result<()> {
    let width = args.elem_width(k);
    if width < bound {
        return Err(EngineError::Configuration(format!(
            "argument {k} has element width {width} but at least {bound} is required"
        )));
    }
    Ok(())
}
