use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

pub const DB_PATH_VAR: &str = "PURCHASE_APPROVAL_DB";
pub const GENERATION_TIMEOUT_VAR: &str = "PURCHASE_APPROVAL_GENERATION_TIMEOUT_MS";
pub const EXTRACTION_TIMEOUT_VAR: &str = "PURCHASE_APPROVAL_EXTRACTION_TIMEOUT_MS";
pub const LOG_FILTER_VAR: &str = "RUST_LOG";

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    pub database_path: PathBuf,
    pub generation_timeout: Duration,
    pub extraction_timeout: Duration,
    pub log_filter: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("purchase_approval.db"),
            generation_timeout: Duration::from_secs(30),
            extraction_timeout: Duration::from_secs(30),
            log_filter: "purchase_approval=info".to_string(),
        }
    }
}

impl WorkflowConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, falling back to defaults for unset keys
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let database_path = lookup(DB_PATH_VAR)
            .map(PathBuf::from)
            .unwrap_or(defaults.database_path);
        let generation_timeout = match lookup(GENERATION_TIMEOUT_VAR) {
            Some(raw) => parse_millis(GENERATION_TIMEOUT_VAR, &raw)?,
            None => defaults.generation_timeout,
        };
        let extraction_timeout = match lookup(EXTRACTION_TIMEOUT_VAR) {
            Some(raw) => parse_millis(EXTRACTION_TIMEOUT_VAR, &raw)?,
            None => defaults.extraction_timeout,
        };
        let log_filter = lookup(LOG_FILTER_VAR).unwrap_or(defaults.log_filter);

        Ok(Self {
            database_path,
            generation_timeout,
            extraction_timeout,
            log_filter,
        })
    }
}

fn parse_millis(key: &str, raw: &str) -> Result<Duration> {
    let millis: u64 = raw
        .trim()
        .parse()
        .with_context(|| format!("{key} must be a whole number of milliseconds, got `{raw}`"))?;
    anyhow::ensure!(millis > 0, "{key} must be greater than zero");
    Ok(Duration::from_millis(millis))
}
