//! Parser lookup by source id.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use namestats_core::config::IngestConfig;
use namestats_core::error::AppError;
use namestats_core::result::AppResult;

use super::Parser;
use super::delimited::DelimitedParser;
use crate::error::IngestError;
use crate::normalizer::Normalizer;

/// Registered parsers keyed by upper-cased source id.
#[derive(Debug, Default)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn Parser>>,
}

impl ParserRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the delimited parser registered for every configured country.
    pub fn with_builtin(config: &IngestConfig) -> AppResult<Self> {
        let normalizer = Normalizer::new(config.normalizer.clone());
        let mut registry = Self::new();
        for country in &config.countries {
            let parser = DelimitedParser::new(country, normalizer.clone())
                .with_delimiter(config.delimiter)
                .with_channel_capacity(config.channel_capacity);
            registry.register(Arc::new(parser))?;
        }
        Ok(registry)
    }

    /// Register a parser. Empty and duplicate source ids are rejected.
    pub fn register(&mut self, parser: Arc<dyn Parser>) -> AppResult<()> {
        let key = parser.metadata().source_id.trim().to_uppercase();
        if key.is_empty() {
            return Err(AppError::validation("Parser source id must not be empty"));
        }
        if self.parsers.contains_key(&key) {
            return Err(AppError::conflict(format!(
                "A parser is already registered for source '{key}'"
            )));
        }

        info!(
            source_id = %key,
            display_name = %parser.metadata().display_name,
            version = %parser.metadata().version,
            "Registered parser"
        );
        self.parsers.insert(key, parser);
        Ok(())
    }

    /// Look up a parser, ignoring case.
    pub fn get(&self, source_id: &str) -> Option<Arc<dyn Parser>> {
        self.parsers
            .get(&source_id.trim().to_uppercase())
            .cloned()
    }

    /// Look up a parser or report [`IngestError::NoParser`].
    pub fn resolve(&self, source_id: &str) -> Result<Arc<dyn Parser>, IngestError> {
        self.get(source_id)
            .ok_or_else(|| IngestError::NoParser(source_id.to_string()))
    }

    /// Registered source ids, sorted.
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.parsers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered parsers.
    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    /// Whether no parser is registered.
    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use namestats_core::error::ErrorKind;

    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ParserRegistry::new();
        registry
            .register(Arc::new(DelimitedParser::new("us", Normalizer::default())))
            .unwrap();
        registry
            .register(Arc::new(DelimitedParser::new("CA", Normalizer::default())))
            .unwrap();

        assert_eq!(registry.source_ids(), vec!["CA", "US"]);
        assert!(registry.get("Us").is_some());
        assert!(registry.get("GB").is_none());
        assert!(matches!(
            registry.resolve("gb"),
            Err(IngestError::NoParser(id)) if id == "gb"
        ));
    }

    #[test]
    fn test_rejects_duplicates_and_empty_ids() {
        let mut registry = ParserRegistry::new();
        registry
            .register(Arc::new(DelimitedParser::new("US", Normalizer::default())))
            .unwrap();

        let dup = registry
            .register(Arc::new(DelimitedParser::new("us", Normalizer::default())))
            .unwrap_err();
        assert_eq!(dup.kind, ErrorKind::Conflict);

        let empty = registry
            .register(Arc::new(DelimitedParser::new("  ", Normalizer::default())))
            .unwrap_err();
        assert_eq!(empty.kind, ErrorKind::Validation);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_with_builtin_uses_configured_countries() {
        let config = IngestConfig {
            countries: vec!["us".to_string(), "MX".to_string()],
            ..IngestConfig::default()
        };
        let registry = ParserRegistry::with_builtin(&config).unwrap();
        assert_eq!(registry.source_ids(), vec!["MX", "US"]);
    }
}
