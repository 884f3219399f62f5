//! Engine configuration.

use crate::context::Order;
use serde::{Deserialize, Serialize};
use sqlbook_core::{ConfigError, Error, Result};

/// Engine-wide defaults. Per-operation settings live in `Options`.
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```ignore
/// let config = EngineConfig::from_json(r#"{ "order_by_pk": "desc" }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Save associated records along with their owner.
    pub save_associations: bool,
    /// Log every executed statement at `info` instead of `debug`.
    pub log_statements: bool,
    /// Primary-key ordering applied to queries without an explicit order.
    pub order_by_pk: Option<Order>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            save_associations: true,
            log_statements: false,
            order_by_pk: None,
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid engine config: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }

    pub fn save_associations(mut self, enabled: bool) -> Self {
        self.save_associations = enabled;
        self
    }

    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    pub fn order_by_pk(mut self, order: Option<Order>) -> Self {
        self.order_by_pk = order;
        self
    }
}
