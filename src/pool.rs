//! Node pools: registration, routing, and player lookup across nodes.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::events::EventHandler;
use crate::node::Node;
use crate::player::Player;

/// Identifier given to the first node created without an explicit one.
const DEFAULT_IDENTIFIER: &str = "MAIN";

/// A registry of nodes that routes guilds to the least-loaded one.
///
/// Cloning the pool is cheap; all clones share the same node set.
#[derive(Clone, Default)]
pub struct NodePool {
    inner: Arc<PoolInner>,
}

#[derive(Default)]
pub(crate) struct PoolInner {
    pub(crate) nodes: DashMap<String, Node>,
}

impl NodePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.inner
            .nodes
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.nodes.is_empty()
    }

    /// Registers an existing node. Fails when a node with the same
    /// identifier is already present.
    pub fn add_node(&self, node: Node) -> Result<Node> {
        let identifier = node.identifier().to_string();
        if self.inner.nodes.contains_key(&identifier) {
            return Err(Error::NodeConflict(identifier));
        }
        node.set_pool(Arc::downgrade(&self.inner));
        info!("📡 Registered node {identifier} on the pool");
        self.inner.nodes.insert(identifier, node.clone());
        Ok(node)
    }

    /// Creates a node from its config and registers it. The pool's first
    /// node gets the identifier `MAIN` unless the config names one.
    pub fn create_node(
        &self,
        mut config: NodeConfig,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Result<Node> {
        if config.identifier.is_none() && self.is_empty() {
            config.identifier = Some(DEFAULT_IDENTIFIER.to_string());
        }
        self.add_node(Node::new(config, handler))
    }

    /// Creates, registers and connects a node in one step.
    pub async fn start_node(
        &self,
        config: NodeConfig,
        handler: Option<Arc<dyn EventHandler>>,
    ) -> Result<Node> {
        let node = self.create_node(config, handler)?;
        node.connect().await?;
        Ok(node)
    }

    /// Picks a node, by explicit identifier or by load.
    ///
    /// Without an identifier the least-loaded node (fewest players) wins,
    /// optionally restricted to nodes serving `region`.
    pub fn get_node(
        &self,
        identifier: Option<&str>,
        region: Option<&str>,
    ) -> Result<Node> {
        if self.is_empty() {
            return Err(Error::NoAvailableNodes);
        }

        if let Some(identifier) = identifier {
            return self
                .inner
                .nodes
                .get(identifier)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| Error::NoMatchingNodes {
                    identifier: Some(identifier.to_string()),
                    region: region.map(str::to_string),
                });
        }

        self.inner
            .nodes
            .iter()
            .filter(|entry| match region {
                Some(region) => entry.value().region() == Some(region),
                None => true,
            })
            .min_by_key(|entry| entry.value().player_count())
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NoMatchingNodes {
                identifier: None,
                region: region.map(str::to_string),
            })
    }

    /// Returns the player for a guild, searching every node first and
    /// falling back to creating one on `node` (or the best available
    /// node) when no node knows the guild yet.
    pub fn get_player(&self, guild_id: u64, node: Option<&Node>) -> Result<Player> {
        for entry in self.inner.nodes.iter() {
            if let Ok(player) = entry.value().get_player(guild_id) {
                return Ok(player);
            }
        }
        let node = match node {
            Some(node) => node.clone(),
            None => self.get_node(None, None)?,
        };
        Ok(node.player(guild_id))
    }

    /// Destroys a node by identifier and removes it from the pool.
    pub async fn destroy_node(&self, identifier: &str) -> Result<()> {
        let Some((_, node)) = self.inner.nodes.remove(identifier) else {
            return Err(Error::NoMatchingNodes {
                identifier: Some(identifier.to_string()),
                region: None,
            });
        };
        node.destroy().await
    }

    /// Destroys every node on the pool.
    pub async fn destroy(&self) -> Result<()> {
        let identifiers: Vec<String> = self
            .inner
            .nodes
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for identifier in identifiers {
            if let Some((_, node)) = self.inner.nodes.remove(&identifier) {
                node.destroy().await?;
            }
        }
        Ok(())
    }
}
