use serde::{Deserialize, Serialize};

use crate::diagnostics::DEFAULT_DIAGNOSTIC_LIMIT;

/// Options for the component resolver.
///
/// Every field is optional when loading from JSON; missing fields take the
/// defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverConfig {
    /// Namespace prefix stripped from tag names before lookup (`z-card` → `card`).
    pub prefix: String,
    /// Placeholder element receiving projected content.
    pub slot_tag: String,
    /// Inserted between a template's inline style and the usage-site style.
    pub style_separator: String,
    /// Maximum component nesting depth before instantiation is refused.
    pub max_depth: usize,
    /// Distinct diagnostics kept by the runtime's sink; the oldest are dropped.
    pub diagnostic_limit: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            prefix: "z-".to_string(),
            slot_tag: "slot".to_string(),
            style_separator: "; ".to_string(),
            max_depth: 64,
            diagnostic_limit: DEFAULT_DIAGNOSTIC_LIMIT,
        }
    }
}

impl ResolverConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ResolverConfig::from_json(r#"{ "prefix": "x-", "maxDepth": 8 }"#).unwrap();
        assert_eq!(config.prefix, "x-");
        assert_eq!(config.max_depth, 8);
        assert_eq!(config.slot_tag, "slot");
        assert_eq!(config.diagnostic_limit, DEFAULT_DIAGNOSTIC_LIMIT);
    }

    #[test]
    fn test_diagnostic_limit_from_json() {
        let config = ResolverConfig::from_json(r#"{ "diagnosticLimit": 16 }"#).unwrap();
        assert_eq!(config.diagnostic_limit, 16);
    }

    #[test]
    fn test_empty_json_is_default() {
        assert_eq!(ResolverConfig::from_json("{}").unwrap(), ResolverConfig::default());
    }

    #[test]
    fn test_rejects_wrong_types() {
        assert!(ResolverConfig::from_json(r#"{ "maxDepth": "deep" }"#).is_err());
    }
}
