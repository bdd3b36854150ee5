use std::sync::Arc;
use std::time::Duration;

use agents::{ClassificationCapability, DomainClassifier, KeywordCapability};
use anyhow::{Context, Result};
use ledger::{FileBackedStorage, Ledger, Storage};
use tokio::sync::{RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::provider::LlmDomainCapability;
use crate::provider_lmstudio::LmStudioProvider;

pub type SharedLedger = Arc<RwLock<Ledger<Box<dyn Storage>>>>;
pub type SharedState = Arc<AppState>;

/// Knobs the pipeline reads at run time.
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub classify_timeout: Duration,
    pub persist_retries: u32,
    pub persist_backoff: Duration,
    pub max_concurrent_runs: usize,
    pub max_kpis: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            classify_timeout: Duration::from_secs(30),
            persist_retries: 3,
            persist_backoff: Duration::from_millis(50),
            max_concurrent_runs: 2,
            max_kpis: agents::kpi::DEFAULT_MAX_KPIS,
        }
    }
}

pub struct AppState {
    pub ledger: SharedLedger,
    pub classifier: DomainClassifier,
    pub settings: PipelineSettings,
    /// Bounds how many runs execute at once.
    pub permits: Arc<Semaphore>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(
        storage: Box<dyn Storage>,
        capability: Arc<dyn ClassificationCapability>,
        settings: PipelineSettings,
    ) -> Result<SharedState> {
        let ledger = Ledger::open(storage).context("Failed to open ledger")?;
        let classifier = DomainClassifier::new(capability, settings.classify_timeout);
        info!(
            capability = classifier.capability_name(),
            timeout_ms = settings.classify_timeout.as_millis() as u64,
            "domain classifier ready"
        );
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_runs));
        Ok(Arc::new(Self {
            ledger: Arc::new(RwLock::new(ledger)),
            classifier,
            settings,
            permits,
            shutdown: CancellationToken::new(),
        }))
    }

    pub fn from_config(cfg: &AppConfig) -> Result<SharedState> {
        let storage = FileBackedStorage::new(&cfg.ledger_path)
            .with_context(|| format!("Failed to init storage at {}", cfg.ledger_path.display()))?;

        let capability: Arc<dyn ClassificationCapability> = match &cfg.llm_base_url {
            Some(url) => {
                info!(base_url=%url, model=%cfg.llm_model, "domain classification via LLM");
                let provider = LmStudioProvider::new(url.clone(), cfg.llm_model.clone());
                Arc::new(LlmDomainCapability::new(provider))
            }
            None => {
                info!("LLM_BASE_URL not set, domain classification via keywords");
                Arc::new(KeywordCapability)
            }
        };

        Self::new(Box::new(storage), capability, cfg.settings())
    }
}
