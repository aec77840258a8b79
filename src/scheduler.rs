//! Periodic per-group summarization scheduler.
//!
//! Each tick fans out one unit of work per group, bounded by a semaphore
//! sized `min(group_count, 8)` — the same bounded-fan-out shape as an
//! axum handler gating concurrent work behind `Arc<Semaphore>`. A tick joins
//! all its units before the next tick's timer fires, so windows across ticks
//! never overlap for a given group.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tracing::{info, warn};

use crate::orchestrator;
use crate::provider::Provider;
use crate::store::Store;

const MAX_CONCURRENT_GROUPS: usize = 8;
const PROVIDER_DEADLINE_CLOUD: Duration = Duration::from_secs(30);
const PROVIDER_DEADLINE_LOCAL: Duration = Duration::from_secs(120);

pub struct SchedulerConfig {
    pub interval: Duration,
    pub provider_is_local: bool,
}

/// Drives `tick` at fixed periods until `shutdown` fires.
pub async fn run(
    config: SchedulerConfig,
    store: Arc<Store>,
    provider: Arc<dyn Provider>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                tick(&config, &store, &provider, &shutdown).await;
            }
        }
    }
}

async fn tick(
    config: &SchedulerConfig,
    store: &Arc<Store>,
    provider: &Arc<dyn Provider>,
    shutdown: &watch::Receiver<bool>,
) {
    let group_ids = match store.list_group_ids().await {
        Ok(ids) => ids,
        Err(err) => {
            warn!(error = %err, "failed to list groups, skipping tick");
            return;
        }
    };

    if group_ids.is_empty() {
        return;
    }

    let permits = group_ids.len().min(MAX_CONCURRENT_GROUPS);
    let semaphore = Arc::new(Semaphore::new(permits));
    let now_ms = now_millis();
    let window_start = now_ms - duration_to_millis(config.interval);
    let deadline = if config.provider_is_local {
        PROVIDER_DEADLINE_LOCAL
    } else {
        PROVIDER_DEADLINE_CLOUD
    };

    let mut handles = Vec::with_capacity(group_ids.len());
    for group_id in group_ids {
        if *shutdown.borrow() {
            break;
        }
        let semaphore = semaphore.clone();
        let store = store.clone();
        let provider = provider.clone();
        handles.push(tokio::spawn(async move {
            let Ok(permit) = semaphore.acquire_owned().await else {
                return;
            };
            let _permit = permit;
            summarize_group(&store, provider.as_ref(), group_id, window_start, now_ms, deadline).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }
}

async fn summarize_group(
    store: &Store,
    provider: &dyn Provider,
    group_id: i64,
    window_start_ms: i64,
    window_end_ms: i64,
    deadline: Duration,
) {
    let messages = match store.fetch_window(group_id, window_start_ms, window_end_ms).await {
        Ok(m) => m,
        Err(err) => {
            warn!(error = %err, group_id, "fetch_window failed, skipping group this tick");
            return;
        }
    };

    if messages.is_empty() {
        return;
    }

    match orchestrator::summarize(store, provider, &messages, deadline).await {
        Ok(text) => {
            if let Err(err) = store.save_summary(group_id, &text, window_start_ms, window_end_ms).await {
                warn!(error = %err, group_id, "failed to persist summary");
            } else {
                info!(group_id, "summary saved");
            }
        }
        Err(err) => {
            warn!(error = %err, group_id, "summarization failed, no summary written");
        }
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn duration_to_millis(d: Duration) -> i64 {
    d.as_millis() as i64
}
