use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::state::PipelineSettings;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub ledger_path: PathBuf,

    pub llm_base_url: Option<String>,
    pub llm_model: String,
    pub classify_timeout_secs: u64,

    pub persist_retries: u32,
    pub persist_backoff_ms: u64,
    pub max_concurrent_runs: usize,
    pub max_kpis: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ledger_path = lookup("LEDGER_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("data/autobi_ledger.bin"));

        let llm_base_url = lookup("LLM_BASE_URL").filter(|v| !v.trim().is_empty());
        let llm_model = lookup("LLM_MODEL").unwrap_or_else(|| "default".to_string());

        let classify_timeout_secs = parse(&lookup, "CLASSIFY_TIMEOUT_SECS", 30)?;
        let persist_retries = parse(&lookup, "PERSIST_RETRIES", 3)?;
        let persist_backoff_ms = parse(&lookup, "PERSIST_BACKOFF_MS", 50)?;
        let max_concurrent_runs = parse(&lookup, "MAX_CONCURRENT_RUNS", 2)?;
        let max_kpis = parse(&lookup, "MAX_KPIS", agents::kpi::DEFAULT_MAX_KPIS)?;

        // Tiny sanity checks (fail fast, fail loud)
        if let Some(url) = &llm_base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("LLM_BASE_URL must start with http:// or https://");
            }
        }
        if classify_timeout_secs == 0 {
            bail!("CLASSIFY_TIMEOUT_SECS must be at least 1");
        }
        if persist_retries == 0 {
            bail!("PERSIST_RETRIES must be at least 1");
        }
        if max_concurrent_runs == 0 {
            bail!("MAX_CONCURRENT_RUNS must be at least 1");
        }
        if max_kpis == 0 {
            bail!("MAX_KPIS must be at least 1");
        }

        Ok(Self {
            ledger_path,
            llm_base_url,
            llm_model,
            classify_timeout_secs,
            persist_retries,
            persist_backoff_ms,
            max_concurrent_runs,
            max_kpis,
        })
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            classify_timeout: Duration::from_secs(self.classify_timeout_secs),
            persist_retries: self.persist_retries,
            persist_backoff: Duration::from_millis(self.persist_backoff_ms),
            max_concurrent_runs: self.max_concurrent_runs,
            max_kpis: self.max_kpis,
        }
    }
}

fn parse<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for env var {key}: {raw}")),
        None => Ok(default),
    }
}
