//! Engine materialization from parsed configuration documents.

use crate::error::{ConfigError, Result};
use log::debug;
use moldyn_engine::{DerivEngine, NodeRegistry};
use serde::Deserialize;
use serde_json::Value;

/// Top-level configuration document.
#[derive(Debug, Deserialize)]
pub struct SystemConfig {
    /// Number of atoms in the position node.
    pub n_atom: usize,
    /// Node groups in declaration order.
    #[serde(default)]
    pub potential: Vec<Value>,
}

/// Instantiate an engine from a parsed JSON document.
pub fn initialize_engine_from_value(
    config: &Value,
    registry: &NodeRegistry,
) -> Result<DerivEngine> {
    let system: SystemConfig = serde_json::from_value(config.clone())?;
    let mut engine = DerivEngine::new(system.n_atom);

    for group in &system.potential {
        let name = group
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ConfigError::MissingField("name".to_string()))?;
        let arguments: Vec<String> = match group.get("arguments") {
            None => Vec::new(),
            Some(v) => serde_json::from_value(v.clone())?,
        };
        let argument_refs: Vec<&str> = arguments.iter().map(String::as_str).collect();

        let factory = registry
            .lookup(name)
            .ok_or_else(|| ConfigError::UnknownPrefix(name.to_string()))?;
        debug!("instantiating node '{name}' with arguments {arguments:?}");
        engine.add_node(name, &argument_refs, |args| factory(group, args))?;
    }
    Ok(engine)
}

/// Instantiate an engine from JSON text.
pub fn initialize_engine_from_str(config: &str, registry: &NodeRegistry) -> Result<DerivEngine> {
    let value: Value = serde_json::from_str(config)?;
    initialize_engine_from_value(&value, registry)
}
