//! Graph configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::bus::BusConfig;
use crate::error::{ExecutionError, StateNetError, StateNetResult, ValidationError};
use crate::graph::InstructionSet;
use crate::namespace;
use crate::value::Value;

/// Configuration for building a state graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct GraphConfig {
    /// Namespace of the root node.
    pub namespace: String,
    /// Root instructions; these win over instruction keys in the seed.
    pub instructions: InstructionSet,
    /// Reserved. Paged containers are not supported; `true` is rejected.
    pub paging: bool,
    /// Listener bus settings, used when the graph creates its own bus.
    pub bus: BusConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            namespace: "$".to_string(),
            instructions: InstructionSet::default(),
            paging: false,
            bus: BusConfig::default(),
        }
    }
}

fn invalid(reason: impl Into<String>) -> StateNetError {
    StateNetError::Validation(ValidationError::InvalidConfiguration { reason: reason.into() })
}

impl GraphConfig {
    /// Parses a JSON document.
    pub fn from_json_str(s: &str) -> StateNetResult<Self> {
        serde_json::from_str::<Self>(s)
            .map_err(|e| invalid(e.to_string()))?
            .validate()
    }

    /// Reads and parses a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> StateNetResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| invalid(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&text)
    }

    /// Builds a configuration from a plain object value.
    pub fn from_value(value: &Value) -> StateNetResult<Self> {
        serde_json::from_value::<Self>(value.to_json())
            .map_err(|e| invalid(e.to_string()))?
            .validate()
    }

    /// Checks the root namespace and rejects unsupported features.
    pub fn validate(self) -> StateNetResult<Self> {
        let parsed = namespace::parse(&self.namespace).map_err(|e| invalid(e.to_string()))?;
        if parsed.is_wildcard() {
            return Err(invalid(format!(
                "root namespace '{}' may not contain selectors",
                self.namespace
            )));
        }
        if self.paging {
            return Err(StateNetError::Execution(ExecutionError::NotImplemented {
                feature: "paging".to_string(),
            }));
        }
        if self.bus.async_queue_capacity == 0 {
            return Err(invalid("bus.asyncQueueCapacity must be at least 1"));
        }
        Ok(self)
    }
}
