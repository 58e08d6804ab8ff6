//! Tuning knobs for query execution.

use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SearchError};

/// Fallback for an out-of-range store-first cutoff.
const DEFAULT_DB_FIRST_CUTOFF: f32 = 0.8;

/// Configuration for a search.
///
/// # Example
///
/// ```
/// use mailquery::config::SearchConfig;
///
/// let mut config = SearchConfig::default();
/// config.preload_chunk_size = 10;
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Hits requested from a leaf per fetch.
    pub chunk_size: usize,

    /// Hits pulled per batch by the preloading stage.
    pub preload_chunk_size: usize,

    /// Upper bound on rows fetched from the store in one round trip.
    pub max_db_hits_per_chunk: usize,

    /// Fraction of indexed documents above which a single term is considered
    /// too common to drive the search, so the store runs first.
    pub db_first_term_freq_cutoff: f32,

    /// Index hit count above which the store count is consulted before
    /// choosing an evaluation order.
    pub db_first_index_hit_threshold: usize,

    /// Cap on the growth of successive top-docs requests.
    pub max_topdocs_chunk: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            chunk_size: 100,
            preload_chunk_size: 25,
            max_db_hits_per_chunk: 2000,
            db_first_term_freq_cutoff: DEFAULT_DB_FIRST_CUTOFF,
            db_first_index_hit_threshold: 1000,
            max_topdocs_chunk: 1_000_000,
        }
    }
}

impl SearchConfig {
    /// Load a configuration from a JSON file. Missing keys take defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let config: SearchConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `MAILQUERY_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Some(v) = env_usize("MAILQUERY_CHUNK_SIZE")? {
            self.chunk_size = v;
        }
        if let Some(v) = env_usize("MAILQUERY_PRELOAD_CHUNK_SIZE")? {
            self.preload_chunk_size = v;
        }
        if let Some(v) = env_usize("MAILQUERY_MAX_DB_HITS_PER_CHUNK")? {
            self.max_db_hits_per_chunk = v;
        }
        if let Ok(v) = env::var("MAILQUERY_DB_FIRST_TERM_FREQ_CUTOFF") {
            self.db_first_term_freq_cutoff = v
                .parse()
                .map_err(|_| SearchError::invalid_config(format!("not a number: {v}")))?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Check the configuration for values that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(SearchError::invalid_config("chunk_size must be positive"));
        }
        if self.preload_chunk_size == 0 {
            return Err(SearchError::invalid_config(
                "preload_chunk_size must be positive",
            ));
        }
        if self.max_db_hits_per_chunk == 0 {
            return Err(SearchError::invalid_config(
                "max_db_hits_per_chunk must be positive",
            ));
        }
        Ok(())
    }

    /// The store-first cutoff, clamped to its valid range.
    pub fn db_first_cutoff(&self) -> f32 {
        let f = self.db_first_term_freq_cutoff;
        if (0.0..=1.0).contains(&f) {
            f
        } else {
            DEFAULT_DB_FIRST_CUTOFF
        }
    }
}

fn env_usize(key: &str) -> Result<Option<usize>> {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .map(Some)
            .map_err(|_| SearchError::invalid_config(format!("{key} is not a count: {v}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(SearchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let config = SearchConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cutoff_falls_back() {
        let mut config = SearchConfig::default();
        config.db_first_term_freq_cutoff = 1.5;
        assert_eq!(config.db_first_cutoff(), 0.8);
        config.db_first_term_freq_cutoff = 0.25;
        assert_eq!(config.db_first_cutoff(), 0.25);
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"chunk_size": 7}}"#).unwrap();

        let config = SearchConfig::from_file(file.path()).unwrap();
        assert_eq!(config.chunk_size, 7);
        assert_eq!(config.preload_chunk_size, 25);
    }
}
