use crate::error::{Error, Result};
use crate::ranking::{Bm25Params, Boosts};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub index_dir: PathBuf,
    /// Word ids per barrel.
    pub barrel_size: u32,
    /// Documents accumulated before a forward/lexicon flush during a build.
    pub batch_size: usize,
    pub max_query_terms: usize,
    /// Scored (doc, score) pairs kept by top-K selection before dedup.
    pub candidate_pool: usize,
    pub display_limit: usize,
    pub cache_results: usize,
    pub bm25: Bm25Params,
    pub boosts: Boosts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("./index"),
            barrel_size: 1001,
            batch_size: 1000,
            max_query_terms: 10,
            candidate_pool: 150,
            display_limit: 30,
            cache_results: 5,
            bm25: Bm25Params::default(),
            boosts: Boosts::default(),
        }
    }
}

impl EngineConfig {
    pub fn new<P: AsRef<Path>>(index_dir: P) -> Self {
        Self { index_dir: index_dir.as_ref().to_path_buf(), ..Self::default() }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.barrel_size < 2 {
            return Err(Error::Config(format!("barrel_size must be at least 2, got {}", self.barrel_size)));
        }
        if self.batch_size == 0 || self.max_query_terms == 0 || self.candidate_pool == 0 || self.display_limit == 0 {
            return Err(Error::Config("batch_size, max_query_terms, candidate_pool and display_limit must be positive".into()));
        }
        if self.display_limit > self.candidate_pool {
            return Err(Error::Config(format!(
                "display_limit ({}) cannot exceed candidate_pool ({})",
                self.display_limit, self.candidate_pool
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"barrel_size": 50, "boosts": {"title": 4.0}}"#).unwrap();
        assert_eq!(cfg.barrel_size, 50);
        assert_eq!(cfg.batch_size, 1000);
        assert_eq!(cfg.boosts.title, 4.0);
        assert_eq!(cfg.boosts.author, 12.0);
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_display_limit_over_pool() {
        let cfg = EngineConfig { display_limit: 200, ..EngineConfig::default() };
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }
}
