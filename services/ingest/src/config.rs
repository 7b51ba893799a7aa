use std::path::PathBuf;

use anyhow::{Context, Result};
use records::FieldSynonyms;

use crate::validate::UploadLimits;

#[derive(Debug, Clone)]
pub struct Config {
    db_url: Option<String>,
    pub storage_dir: PathBuf,
    pub limits: UploadLimits,
    pub synonyms: FieldSynonyms,
}

impl Config {
    /// Reads the environment; call `dotenvy::dotenv()` first to pick up a
    /// local `.env`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            db_url: lookup("DB_URL").filter(|v| !v.trim().is_empty()),
            storage_dir: PathBuf::from(
                lookup("STORAGE_DIR").unwrap_or_else(|| "./data/uploads".to_string()),
            ),
            limits: UploadLimits::from_lookup(&lookup),
            synonyms: FieldSynonyms::from_lookup(&lookup),
        }
    }

    pub fn db_url(&self) -> Result<&str> {
        self.db_url.as_deref().context("DB_URL env var missing")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(|_| None);
        assert!(config.db_url().is_err());
        assert_eq!(config.storage_dir, PathBuf::from("./data/uploads"));
        assert_eq!(config.limits, UploadLimits::default());
        assert_eq!(config.synonyms, FieldSynonyms::default());
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(|key| match key {
            "DB_URL" => Some("postgres://localhost/portal".to_string()),
            "STORAGE_DIR" => Some("/srv/uploads".to_string()),
            "DEPARTMENT_KEYS" => Some("Unidad, area".to_string()),
            _ => None,
        });
        assert_eq!(config.db_url().unwrap(), "postgres://localhost/portal");
        assert_eq!(config.storage_dir, PathBuf::from("/srv/uploads"));
        assert_eq!(config.synonyms.department, vec!["unidad", "area"]);
    }
}
