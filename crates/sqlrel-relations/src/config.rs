//! Relation engine configuration.

use serde::{Deserialize, Serialize};
use sqlrel_core::{ConfigError, Error, Result};

/// Behaviour switches shared by every state a binder creates.
///
/// ```
/// use sqlrel_relations::RelationConfig;
///
/// let config = RelationConfig::new().atomic_save(false);
/// assert!(!config.atomic_save);
/// assert!(config.lazy_reload);
///
/// let parsed = RelationConfig::from_json(r#"{"lazy_reload": false}"#).unwrap();
/// assert!(parsed.atomic_save);
/// assert!(!parsed.lazy_reload);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelationConfig {
    /// Run each `save()` inside one store transaction, rolling back on
    /// error or cancellation.
    pub atomic_save: bool,
    /// Reload on first read through a bound relation.
    pub lazy_reload: bool,
    /// After a save, mark cached inverse relations of touched records stale.
    pub invalidate_inverse: bool,
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self {
            atomic_save: true,
            lazy_reload: true,
            invalidate_inverse: true,
        }
    }
}

impl RelationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn atomic_save(mut self, enabled: bool) -> Self {
        self.atomic_save = enabled;
        self
    }

    pub fn lazy_reload(mut self, enabled: bool) -> Self {
        self.lazy_reload = enabled;
        self
    }

    pub fn invalidate_inverse(mut self, enabled: bool) -> Self {
        self.invalidate_inverse = enabled;
        self
    }

    /// Parse a JSON config document; omitted keys keep their defaults.
    pub fn from_json(document: &str) -> Result<Self> {
        serde_json::from_str(document).map_err(|e| {
            Error::Config(ConfigError {
                message: format!("invalid relation config: {e}"),
                source: Some(Box::new(e)),
            })
        })
    }
}
