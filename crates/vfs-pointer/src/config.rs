//! Index configuration.

use serde::{Deserialize, Serialize};

use crate::error::{PointerError, Result};
use crate::url::DEFAULT_ARCHIVE_SEPARATOR;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Marks the boundary between an archive and its entries in a path.
    pub archive_separator: String,
    /// Re-validate every tree after each event batch.
    pub debug_checks: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            archive_separator: DEFAULT_ARCHIVE_SEPARATOR.to_string(),
            debug_checks: cfg!(debug_assertions),
        }
    }
}

impl IndexConfig {
    pub fn with_archive_separator(mut self, separator: impl Into<String>) -> Self {
        self.archive_separator = separator.into();
        self
    }

    pub fn with_debug_checks(mut self, enabled: bool) -> Self {
        self.debug_checks = enabled;
        self
    }

    /// Rejects settings the path model cannot work with.
    ///
    /// The archive separator must be non-empty and must not start with `/`,
    /// otherwise it would match at every segment boundary.
    pub fn validate(&self) -> Result<()> {
        if self.archive_separator.is_empty() {
            return Err(PointerError::InvalidConfig(
                "archive_separator must not be empty".to_string(),
            ));
        }
        if self.archive_separator.starts_with('/') {
            return Err(PointerError::InvalidConfig(format!(
                "archive_separator {:?} must not start with '/'",
                self.archive_separator
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.archive_separator, "!/");
        assert_eq!(config.debug_checks, cfg!(debug_assertions));
    }

    #[test]
    fn deserializes_partial_config() {
        let config: IndexConfig = serde_json::from_str(r#"{"debug_checks": true}"#).unwrap();
        assert!(config.debug_checks);
        assert_eq!(config.archive_separator, "!/");

        let config: IndexConfig =
            serde_json::from_str(r##"{"archive_separator": "#/", "debug_checks": false}"##).unwrap();
        assert_eq!(config, IndexConfig::default().with_archive_separator("#/").with_debug_checks(false));
        config.validate().unwrap();
    }

    #[test]
    fn rejects_unusable_archive_separator() {
        let empty: IndexConfig = serde_json::from_str(r#"{"archive_separator": ""}"#).unwrap();
        assert!(matches!(empty.validate(), Err(PointerError::InvalidConfig(_))));
        assert!(matches!(
            IndexConfig::default().with_archive_separator("/x").validate(),
            Err(PointerError::InvalidConfig(_))
        ));
        IndexConfig::default().validate().unwrap();
    }
}
