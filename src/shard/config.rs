//! Declarative shard tree configuration.
//!
//! A [`ShardConfig`] describes one node and its children; building it
//! through a [`ShardRegistry`] reconstructs the subtree, and
//! [`ShardConfig::from_shard`] serialises a live subtree back. The two
//! directions round-trip: topology, type tags, and per-node config are
//! preserved.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{ConfigMap, Shard, ShardError, ShardRegistry};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing shard type")]
    MissingShardType,
    #[error("unknown shard type '{name}'")]
    UnknownShardType { name: String },
    #[error("forwarding table key '{key}' is not an integer")]
    NonIntegerKey { key: String },
    #[error("malformed configuration: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Shard(#[from] ShardError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ShardConfig>,
}

impl ShardConfig {
    /// Build the subtree this config describes, linking parents as
    /// children are attached.
    pub fn build<C: Send + 'static>(
        &self,
        registry: &ShardRegistry<C>,
    ) -> Result<Arc<dyn Shard<C>>, ConfigError> {
        if self.kind.is_empty() {
            return Err(ConfigError::MissingShardType);
        }
        let factory = registry
            .get(&self.kind)
            .ok_or_else(|| ConfigError::UnknownShardType {
                name: self.kind.clone(),
            })?;
        let shard = factory(&self.config)?;
        for child_config in &self.children {
            let child = child_config.build(registry)?;
            shard.clone().add_child(child);
        }
        Ok(shard)
    }

    /// Serialise a live subtree back into a config that [`build`]
    /// (ShardConfig::build) would reconstruct.
    pub fn from_shard<C: Send + 'static>(shard: &Arc<dyn Shard<C>>) -> ShardConfig {
        ShardConfig {
            kind: shard.kind().to_string(),
            config: shard.config().unwrap_or_default(),
            children: shard
                .children()
                .iter()
                .map(ShardConfig::from_shard)
                .collect(),
        }
    }
}
