//! Optional synchronisation of the detection history with a remote copy.
//!
//! The crate ships no network transport. Applications implement
//! [`SyncTransport`] over whatever they have and hand it to a [`SyncManager`].
//! A sync round pulls the remote copy, resolves it against the local one with
//! `sync.conflictResolution`, writes the result locally if it changed and
//! pushes it back. Each round is bounded by `sync.timeout`; failed or timed-out
//! rounds are retried up to `sync.retryAttempts` times in total, waiting
//! `errorHandling.retryDelay` in between. A remote copy holding invalid
//! records fails the round without touching local data and is not retried.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;

use crate::clock::ClockHandle;
use crate::config::{ConfigManager, ConflictResolution};
use crate::diagnostics::Diagnostics;
use crate::errors::StoreError;
use crate::events::{EventBus, SYNC_COMPLETED, SYNC_FAILED};
use crate::record::{LocaleDetectionHistory, StorageOperationResult};
use crate::store::RecordStore;

pub trait SyncTransport: Send + Sync {
    /// Fetches the remote history, `None` if there is none yet.
    fn pull(&self) -> impl Future<Output = anyhow::Result<Option<LocaleDetectionHistory>>> + Send;

    fn push(&self, history: &LocaleDetectionHistory) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub strategy: ConflictResolution,
    pub remote_found: bool,
    pub local_changed: bool,
    pub record_count: usize,
    pub attempts: u32,
}

/// Picks the history both sides should hold after a round.
pub fn resolve(
    local: &LocaleDetectionHistory,
    remote: Option<&LocaleDetectionHistory>,
    strategy: ConflictResolution,
) -> LocaleDetectionHistory {
    let Some(remote) = remote else {
        return local.clone();
    };
    match strategy {
        ConflictResolution::Local => local.clone(),
        ConflictResolution::Remote => remote.clone(),
        ConflictResolution::Latest => {
            if remote.last_updated > local.last_updated {
                remote.clone()
            } else {
                local.clone()
            }
        }
        ConflictResolution::Merge => {
            let mut seen = HashSet::new();
            let mut history: Vec<_> = local
                .history
                .iter()
                .chain(remote.history.iter())
                .filter(|r| seen.insert(r.identity()))
                .cloned()
                .collect();
            history.sort_by_key(|r| r.timestamp);
            LocaleDetectionHistory::new(history, local.last_updated.max(remote.last_updated))
        }
    }
}

pub struct SyncManager<T: SyncTransport> {
    transport: T,
    history: Arc<RecordStore>,
    config: Arc<ConfigManager>,
    events: Arc<EventBus>,
    diagnostics: Arc<Diagnostics>,
    clock: ClockHandle,
}

impl<T: SyncTransport> SyncManager<T> {
    pub fn new(
        transport: T,
        history: Arc<RecordStore>,
        config: Arc<ConfigManager>,
        events: Arc<EventBus>,
        diagnostics: Arc<Diagnostics>,
        clock: ClockHandle,
    ) -> Self {
        Self {
            transport,
            history,
            config,
            events,
            diagnostics,
            clock,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn sync(&self) -> StorageOperationResult<SyncOutcome> {
        let config = self.config.snapshot();
        let settings = config.sync.clone();
        if !settings.enabled {
            return StorageOperationResult::failed(StoreError::SyncDisabled, None, self.clock.now_ms());
        }

        let max_attempts = settings.retry_attempts.max(1);
        let limit = Duration::from_millis(settings.timeout);
        let mut last_error = StoreError::SyncDisabled;
        let mut attempts = 0;

        for attempt in 1..=max_attempts {
            attempts = attempt;
            let outcome = match tokio::time::timeout(limit, self.round(settings.conflict_resolution)).await {
                Ok(result) => result,
                Err(_) => Err(StoreError::Timeout {
                    operation: "sync".to_string(),
                    after_ms: settings.timeout,
                }),
            };
            match outcome {
                Ok(mut outcome) => {
                    outcome.attempts = attempt;
                    self.events.emit(
                        SYNC_COMPLETED,
                        serde_json::to_value(&outcome).unwrap_or_else(|_| json!({})),
                    );
                    return StorageOperationResult::ok(outcome, None, self.clock.now_ms());
                }
                Err(e) => {
                    self.diagnostics.warn(
                        &format!("sync attempt {attempt}/{max_attempts} failed: {e}"),
                        None,
                    );
                    let retryable = !matches!(e, StoreError::Validation(_));
                    last_error = e;
                    if !retryable {
                        break;
                    }
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(Duration::from_millis(config.error_handling.retry_delay)).await;
            }
        }

        self.diagnostics.error(&format!("sync abandoned: {last_error}"), None);
        self.events.emit(
            SYNC_FAILED,
            json!({ "attempts": attempts, "error": last_error.to_string() }),
        );
        StorageOperationResult::failed(last_error, None, self.clock.now_ms())
    }

    async fn round(&self, strategy: ConflictResolution) -> Result<SyncOutcome, StoreError> {
        let local = self
            .history
            .read()
            .into_result()
            .map_err(StoreError::BackendUnavailable)?;
        let remote = self.transport.pull().await.map_err(transport_error)?;
        if let Some(remote) = &remote {
            let violations: Vec<_> = remote
                .history
                .iter()
                .enumerate()
                .flat_map(|(i, r)| r.violations(i))
                .collect();
            if !violations.is_empty() {
                return Err(StoreError::Validation(violations));
            }
        }

        let resolved = resolve(&local, remote.as_ref(), strategy);
        let local_changed = resolved.history != local.history;
        let to_push = if local_changed {
            self.history
                .replace(resolved, self.history.kind().written_event())
                .into_result()
                .map_err(StoreError::BackendUnavailable)?
        } else {
            resolved
        };
        self.transport.push(&to_push).await.map_err(transport_error)?;

        Ok(SyncOutcome {
            strategy,
            remote_found: remote.is_some(),
            local_changed,
            record_count: to_push.history.len(),
            attempts: 0,
        })
    }
}

impl<T: SyncTransport + 'static> SyncManager<T> {
    /// Syncs every `sync.interval` on the current tokio runtime. Returns `None`
    /// when sync is disabled.
    pub fn spawn_periodic(self: Arc<Self>) -> Option<JoinHandle<()>> {
        let settings = self.config.snapshot().sync.clone();
        if !settings.enabled || settings.interval == 0 {
            return None;
        }
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(settings.interval));
            loop {
                ticker.tick().await;
                let _ = self.sync().await;
            }
        }))
    }
}

fn transport_error(e: anyhow::Error) -> StoreError {
    StoreError::BackendUnavailable(format!("sync transport: {e}"))
}
