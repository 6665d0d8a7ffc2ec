//! Feature flags gating standard definitions.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::types::WorkspaceSyncContext;

/// Flag keys referenced by the built-in standard schema.
pub mod keys {
    pub const IS_BLOCKLIST_ENABLED: &str = "IS_BLOCKLIST_ENABLED";
    pub const IS_CALENDAR_ENABLED: &str = "IS_CALENDAR_ENABLED";
}

/// Snapshot of flag values for one workspace. Unknown flags are disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlagMap(BTreeMap<String, bool>);

impl FeatureFlagMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_flag(mut self, key: impl Into<String>, enabled: bool) -> Self {
        self.0.insert(key.into(), enabled);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, enabled: bool) {
        self.0.insert(key.into(), enabled);
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.0.get(key).copied().unwrap_or(false)
    }

    /// Whether a definition with the given gate is active.
    pub fn is_gate_open(&self, gate: Option<&str>) -> bool {
        gate.map_or(true, |key| self.is_enabled(key))
    }

    /// Overlay `other` on top of `self`.
    pub fn merged(mut self, other: &FeatureFlagMap) -> Self {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), *value);
        }
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl From<BTreeMap<String, bool>> for FeatureFlagMap {
    fn from(map: BTreeMap<String, bool>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, bool)> for FeatureFlagMap {
    fn from_iter<T: IntoIterator<Item = (String, bool)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Produces the active flag set for a workspace.
#[async_trait]
pub trait FeatureFlagResolver: Send + Sync {
    async fn resolve(&self, context: &WorkspaceSyncContext) -> Result<FeatureFlagMap>;
}

/// Resolver backed by fixed defaults and per-workspace overrides.
#[derive(Debug, Clone, Default)]
pub struct StaticFeatureFlagResolver {
    defaults: FeatureFlagMap,
    workspaces: HashMap<String, FeatureFlagMap>,
}

impl StaticFeatureFlagResolver {
    pub fn new(defaults: FeatureFlagMap) -> Self {
        Self {
            defaults,
            workspaces: HashMap::new(),
        }
    }

    pub fn with_workspace(mut self, workspace_id: impl Into<String>, flags: FeatureFlagMap) -> Self {
        self.workspaces.insert(workspace_id.into(), flags);
        self
    }
}

#[async_trait]
impl FeatureFlagResolver for StaticFeatureFlagResolver {
    async fn resolve(&self, context: &WorkspaceSyncContext) -> Result<FeatureFlagMap> {
        let flags = match self.workspaces.get(&context.workspace_id) {
            Some(overrides) => self.defaults.clone().merged(overrides),
            None => self.defaults.clone(),
        };
        Ok(flags)
    }
}
