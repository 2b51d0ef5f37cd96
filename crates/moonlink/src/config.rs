//! Session configuration
//!
//! Options can be built in code or read from the `[bridge]` table of a TOML
//! document:
//!
//! ```toml
//! [bridge]
//! blacklisted_namespaces = ["moonlink.reflect", "Host.Internal"]
//! implicit_static = false
//! register_globals = true
//! max_call_depth = 200
//! max_array_length = 16777216
//! ```

use serde::{Deserialize, Serialize};

use crate::error::BridgeResult;

/// Options for one marshaling session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Objects whose class lives in one of these namespaces are pushed as
    /// their string form instead of as live references
    pub blacklisted_namespaces: Vec<String>,

    /// Let instance lookups fall back to same-named static members
    pub implicit_static: bool,

    /// Install `import_type`, `get_method_bysig` and `get_constructor_bysig`
    pub register_globals: bool,

    /// VM call depth limit
    pub max_call_depth: usize,

    /// Largest array a script may allocate with `Type[n]`
    pub max_array_length: usize,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            blacklisted_namespaces: vec!["moonlink.reflect".to_string()],
            implicit_static: false,
            register_globals: true,
            max_call_depth: 200,
            max_array_length: 1 << 24,
        }
    }
}

#[derive(Deserialize)]
struct ConfigDocument {
    #[serde(default)]
    bridge: BridgeOptions,
}

impl BridgeOptions {
    /// Parse the `[bridge]` table of a TOML document. Missing keys keep
    /// their defaults; a document without the table yields the defaults.
    pub fn from_toml_str(content: &str) -> BridgeResult<Self> {
        let doc: ConfigDocument = toml::from_str(content)?;
        Ok(doc.bridge)
    }

    /// True if objects of classes in `namespace` must not be exposed
    pub fn is_blacklisted(&self, namespace: &str) -> bool {
        self.blacklisted_namespaces.iter().any(|ns| {
            namespace == ns
                || (namespace.starts_with(ns.as_str())
                    && namespace.as_bytes().get(ns.len()) == Some(&b'.'))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;

    #[test]
    fn test_defaults() {
        let options = BridgeOptions::default();
        assert!(!options.implicit_static);
        assert!(options.register_globals);
        assert_eq!(options.max_call_depth, 200);
        assert_eq!(options.max_array_length, 1 << 24);
        assert!(options.is_blacklisted("moonlink.reflect"));
    }

    #[test]
    fn test_from_toml_partial() {
        let options = BridgeOptions::from_toml_str(
            r#"
            [bridge]
            implicit_static = true
            blacklisted_namespaces = ["Host.Secrets"]
            max_array_length = 64
            "#,
        )
        .unwrap();
        assert!(options.implicit_static);
        assert!(options.register_globals);
        assert_eq!(options.max_array_length, 64);
        assert!(options.is_blacklisted("Host.Secrets.Vault"));
        assert!(!options.is_blacklisted("Host.SecretsPublic"));
        assert!(!options.is_blacklisted("moonlink.reflect"));
    }

    #[test]
    fn test_from_toml_empty_document() {
        assert_eq!(BridgeOptions::from_toml_str("").unwrap(), BridgeOptions::default());
    }

    #[test]
    fn test_from_toml_invalid() {
        let err = BridgeOptions::from_toml_str("[bridge]\nmax_call_depth = \"deep\"").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }
}
