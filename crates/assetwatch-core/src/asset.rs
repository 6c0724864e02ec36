//! Asset keys, asset definitions and the asset graph.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::partition::PartitionsDefinition;
use crate::partition_mapping::{PartitionMapping, default_partition_mapping};

const ASSET_KEY_SEPARATOR: char = '/';

/// Hierarchical asset identifier.
///
/// Equality is structural over the path segments. The string form joins the
/// segments with `/` and is the key used by persisted sensor cursors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct AssetKey(Vec<String>);

impl AssetKey {
    /// Builds a key from its path segments.
    pub fn new<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(path.into_iter().map(Into::into).collect())
    }

    /// Parses the `/`-joined form produced by [`AssetKey::to_user_string`].
    #[must_use]
    pub fn from_user_string(value: &str) -> Self {
        Self::new(value.split(ASSET_KEY_SEPARATOR))
    }

    /// The path segments.
    #[must_use]
    pub fn path(&self) -> &[String] {
        &self.0
    }

    /// The `/`-joined form of this key.
    #[must_use]
    pub fn to_user_string(&self) -> String {
        self.0.join("/")
    }
}

impl fmt::Display for AssetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_user_string())
    }
}

impl From<String> for AssetKey {
    fn from(value: String) -> Self {
        Self::from_user_string(&value)
    }
}

impl From<&str> for AssetKey {
    fn from(value: &str) -> Self {
        Self::from_user_string(value)
    }
}

impl From<AssetKey> for String {
    fn from(value: AssetKey) -> Self {
        value.to_user_string()
    }
}

/// Definition of one asset known to the engine.
#[derive(Debug, Clone)]
pub struct AssetDefinition {
    key: AssetKey,
    group_name: Option<String>,
    partitions_def: Option<PartitionsDefinition>,
    partition_mappings: HashMap<AssetKey, Arc<dyn PartitionMapping>>,
}

impl AssetDefinition {
    /// Creates an unpartitioned asset with no group.
    #[must_use]
    pub fn new(key: AssetKey) -> Self {
        Self {
            key,
            group_name: None,
            partitions_def: None,
            partition_mappings: HashMap::new(),
        }
    }

    /// Assigns the asset to a group.
    #[must_use]
    pub fn with_group(mut self, group_name: impl Into<String>) -> Self {
        self.group_name = Some(group_name.into());
        self
    }

    /// Partitions the asset.
    #[must_use]
    pub fn with_partitions(mut self, partitions_def: PartitionsDefinition) -> Self {
        self.partitions_def = Some(partitions_def);
        self
    }

    /// Overrides how partitions of `upstream` map onto this asset's partitions.
    #[must_use]
    pub fn with_partition_mapping(
        mut self,
        upstream: AssetKey,
        mapping: Arc<dyn PartitionMapping>,
    ) -> Self {
        self.partition_mappings.insert(upstream, mapping);
        self
    }

    /// The asset key.
    #[must_use]
    pub fn key(&self) -> &AssetKey {
        &self.key
    }

    /// The group this asset belongs to, if any.
    #[must_use]
    pub fn group_name(&self) -> Option<&str> {
        self.group_name.as_deref()
    }

    /// The partitions definition, or `None` for unpartitioned assets.
    #[must_use]
    pub fn partitions_def(&self) -> Option<&PartitionsDefinition> {
        self.partitions_def.as_ref()
    }

    /// Upstream assets with an explicitly registered partition mapping.
    pub fn mapped_upstreams(&self) -> impl Iterator<Item = &AssetKey> {
        self.partition_mappings.keys()
    }

    /// The mapping used to translate partitions of `upstream` into this
    /// asset's partitions. Falls back to the default mapping for the pair of
    /// partitions definitions when no explicit mapping was registered.
    #[must_use]
    pub fn partition_mapping_for(&self, upstream: &AssetDefinition) -> Arc<dyn PartitionMapping> {
        self.partition_mappings
            .get(&upstream.key)
            .cloned()
            .unwrap_or_else(|| {
                default_partition_mapping(upstream.partitions_def(), self.partitions_def())
            })
    }
}

/// Selects the set of assets a sensor monitors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSelection {
    /// Exactly these keys, in this order.
    Keys(Vec<AssetKey>),
    /// Every asset belonging to one of these groups.
    Groups(Vec<String>),
    /// Every asset in the graph.
    All,
}

impl AssetSelection {
    /// Convenience constructor for a key selection.
    pub fn keys<I, K>(keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<AssetKey>,
    {
        Self::Keys(keys.into_iter().map(Into::into).collect())
    }
}

/// All asset definitions of a repository, indexed by key.
#[derive(Debug, Clone, Default)]
pub struct AssetGraph {
    assets: BTreeMap<AssetKey, AssetDefinition>,
}

impl AssetGraph {
    /// Builds a graph from a list of definitions.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidDefinition` if two definitions share a key,
    /// or if a key segment contains the `/` separator. Such a key would share
    /// its string form with the key split at that separator.
    pub fn new(definitions: Vec<AssetDefinition>) -> Result<Self, DomainError> {
        let mut assets = BTreeMap::new();
        for definition in definitions {
            let key = definition.key.clone();
            if let Some(segment) = key
                .path()
                .iter()
                .find(|segment| segment.contains(ASSET_KEY_SEPARATOR))
            {
                return Err(DomainError::InvalidDefinition(format!(
                    "asset key segment {segment:?} of {key} contains the separator \
                     {ASSET_KEY_SEPARATOR:?}"
                )));
            }
            if assets.insert(key.clone(), definition).is_some() {
                return Err(DomainError::InvalidDefinition(format!(
                    "asset {key} is defined more than once"
                )));
            }
        }
        Ok(Self { assets })
    }

    /// Looks up a definition.
    #[must_use]
    pub fn get(&self, key: &AssetKey) -> Option<&AssetDefinition> {
        self.assets.get(key)
    }

    /// Returns `true` if the graph defines `key`.
    #[must_use]
    pub fn contains(&self, key: &AssetKey) -> bool {
        self.assets.contains_key(key)
    }

    /// Iterates over all keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &AssetKey> {
        self.assets.keys()
    }

    /// Resolves a selection to concrete keys.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidDefinition` if a selected key is not in the
    /// graph, or if the selection resolves to no assets at all.
    pub fn resolve(&self, selection: &AssetSelection) -> Result<Vec<AssetKey>, DomainError> {
        let keys: Vec<AssetKey> = match selection {
            AssetSelection::Keys(keys) => {
                let mut resolved = Vec::with_capacity(keys.len());
                for key in keys {
                    if !self.contains(key) {
                        return Err(DomainError::InvalidDefinition(format!(
                            "no asset with key {key} found in asset graph"
                        )));
                    }
                    if !resolved.contains(key) {
                        resolved.push(key.clone());
                    }
                }
                resolved
            }
            AssetSelection::Groups(groups) => self
                .assets
                .values()
                .filter(|a| a.group_name().is_some_and(|g| groups.iter().any(|s| s == g)))
                .map(|a| a.key.clone())
                .collect(),
            AssetSelection::All => self.assets.keys().cloned().collect(),
        };

        if keys.is_empty() {
            return Err(DomainError::InvalidDefinition(
                "asset selection resolved to no assets".to_owned(),
            ));
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::StaticPartitionsDefinition;

    fn graph() -> AssetGraph {
        AssetGraph::new(vec![
            AssetDefinition::new(AssetKey::new(["raw", "orders"])).with_group("ingest"),
            AssetDefinition::new(AssetKey::new(["raw", "users"])).with_group("ingest"),
            AssetDefinition::new(AssetKey::from("marts/revenue"))
                .with_group("marts")
                .with_partitions(PartitionsDefinition::Static(
                    StaticPartitionsDefinition::new(["a", "b"]).unwrap(),
                )),
        ])
        .unwrap()
    }

    #[test]
    fn test_asset_key_string_round_trip() {
        let key = AssetKey::new(["warehouse", "orders"]);
        assert_eq!(key.to_user_string(), "warehouse/orders");
        assert_eq!(AssetKey::from_user_string("warehouse/orders"), key);
    }

    #[test]
    fn test_asset_key_serializes_as_string() {
        let key = AssetKey::new(["a", "b"]);
        let json = serde_json::to_value(&key).unwrap();
        assert_eq!(json, serde_json::json!("a/b"));
        let back: AssetKey = serde_json::from_value(json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_segment_containing_separator_is_rejected() {
        let result = AssetGraph::new(vec![
            AssetDefinition::new(AssetKey::new(["a", "b"])),
            AssetDefinition::new(AssetKey::new(["a/b"])),
        ]);
        assert!(matches!(result, Err(DomainError::InvalidDefinition(_))));
    }

    #[test]
    fn test_duplicate_asset_is_rejected() {
        let result = AssetGraph::new(vec![
            AssetDefinition::new(AssetKey::from("a")),
            AssetDefinition::new(AssetKey::from("a")),
        ]);
        assert!(matches!(result, Err(DomainError::InvalidDefinition(_))));
    }

    #[test]
    fn test_resolve_keys_preserves_order_and_dedups() {
        let keys = graph()
            .resolve(&AssetSelection::keys(["raw/users", "raw/orders", "raw/users"]))
            .unwrap();
        assert_eq!(
            keys,
            vec![AssetKey::from("raw/users"), AssetKey::from("raw/orders")]
        );
    }

    #[test]
    fn test_resolve_unknown_key_fails() {
        let result = graph().resolve(&AssetSelection::keys(["nope"]));
        assert!(matches!(result, Err(DomainError::InvalidDefinition(_))));
    }

    #[test]
    fn test_resolve_groups() {
        let keys = graph()
            .resolve(&AssetSelection::Groups(vec!["marts".to_owned()]))
            .unwrap();
        assert_eq!(keys, vec![AssetKey::from("marts/revenue")]);
    }

    #[test]
    fn test_resolve_empty_group_fails() {
        let result = graph().resolve(&AssetSelection::Groups(vec!["missing".to_owned()]));
        assert!(matches!(result, Err(DomainError::InvalidDefinition(_))));
    }

    #[test]
    fn test_resolve_all_is_sorted() {
        let keys = graph().resolve(&AssetSelection::All).unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(keys[0], AssetKey::from("marts/revenue"));
    }
}
