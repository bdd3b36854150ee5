use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::warn;

use crate::run_store::RunStoreError;

pub async fn with_ledger_blocking<S, R, F>(
    ledger: Arc<RwLock<S>>,
    f: F,
) -> Result<R, tokio::task::JoinError>
where
    S: Send + Sync + 'static,
    R: Send + 'static,
    F: FnOnce(&mut S) -> R + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut guard = ledger.blocking_write();
        f(&mut *guard)
    })
    .await
}

pub async fn with_ledger_read<S, R, F>(
    ledger: Arc<RwLock<S>>,
    f: F,
) -> Result<R, tokio::task::JoinError>
where
    S: Send + Sync + 'static,
    R: Send + 'static,
    F: FnOnce(&S) -> R + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let guard = ledger.blocking_read();
        f(&*guard)
    })
    .await
}

/// Run a write up to `attempts` times with linear backoff between tries.
///
/// Only errors that [`RunStoreError::is_retryable`] are retried; the last
/// error is returned once attempts run out.
pub async fn persist_with_retry<S, R, F>(
    ledger: Arc<RwLock<S>>,
    attempts: u32,
    backoff: Duration,
    what: &str,
    f: F,
) -> Result<R, RunStoreError>
where
    S: Send + Sync + 'static,
    R: Send + 'static,
    F: Fn(&mut S) -> Result<R, RunStoreError> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        let call = f.clone();
        let res = with_ledger_blocking(ledger.clone(), move |db| call(db)).await?;
        match res {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < attempts => {
                warn!(attempt, attempts, what, "persist failed, retrying: {e}");
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
