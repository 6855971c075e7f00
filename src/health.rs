//! Backend health probing.
//!
//! Each adapter in the chain is probed with a write, read-back and remove of a
//! reserved key. A probe fails if any step errors, the value read back differs,
//! or the round trip takes longer than `healthCheck.timeout`. Failed probes are
//! retried up to `healthCheck.retryAttempts` times in total. A probe key that
//! could not be removed afterwards is logged and reported as `cleanupError`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::{AdapterHandle, BackendKind, BackendManager};
use crate::clock::ClockHandle;
use crate::config::ConfigManager;
use crate::diagnostics::Diagnostics;
use crate::events::{EventBus, HEALTH_CHECKED};

pub const PROBE_KEY: &str = "__locale_store_health_probe__";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    pub backend: BackendKind,
    pub available: bool,
    /// Duration of the last attempt.
    pub response_time: u64,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// The probe key was left behind by the last attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    /// Every backend in the chain passed.
    pub healthy: bool,
    /// At least one backend passed, but not all.
    pub degraded: bool,
    pub backends: Vec<BackendHealth>,
    pub timestamp: i64,
}

pub struct HealthChecker {
    backends: Arc<BackendManager>,
    config: Arc<ConfigManager>,
    events: Arc<EventBus>,
    diagnostics: Arc<Diagnostics>,
    clock: ClockHandle,
}

impl HealthChecker {
    pub fn new(
        backends: Arc<BackendManager>,
        config: Arc<ConfigManager>,
        events: Arc<EventBus>,
        diagnostics: Arc<Diagnostics>,
        clock: ClockHandle,
    ) -> Self {
        Self {
            backends,
            config,
            events,
            diagnostics,
            clock,
        }
    }

    pub fn perform_health_check(&self) -> HealthReport {
        let settings = self.config.snapshot().health_check.clone();
        let max_attempts = settings.retry_attempts.max(1);

        let backends: Vec<BackendHealth> = self
            .backends
            .adapters()
            .iter()
            .map(|adapter| {
                let mut health = BackendHealth {
                    backend: adapter.kind(),
                    available: false,
                    response_time: 0,
                    attempts: 0,
                    error: None,
                    cleanup_error: None,
                };
                while health.attempts < max_attempts {
                    health.attempts += 1;
                    let probe = probe(adapter, settings.timeout);
                    health.response_time = probe.elapsed;
                    if let Some(err) = &probe.cleanup_error {
                        self.diagnostics.warn(
                            &format!("could not remove health probe key from {}: {err}", adapter.kind()),
                            None,
                        );
                    }
                    health.cleanup_error = probe.cleanup_error;
                    match probe.outcome {
                        Ok(()) => {
                            health.available = true;
                            health.error = None;
                            break;
                        }
                        Err(e) => health.error = Some(e),
                    }
                }
                if let Some(err) = &health.error {
                    self.diagnostics.warn(
                        &format!("{} failed its health check: {err}", health.backend),
                        Some(json!({ "attempts": health.attempts })),
                    );
                }
                health
            })
            .collect();

        let passing = backends.iter().filter(|b| b.available).count();
        let report = HealthReport {
            healthy: passing == backends.len(),
            degraded: passing > 0 && passing < backends.len(),
            backends,
            timestamp: self.clock.now_ms(),
        };
        self.events.emit(
            HEALTH_CHECKED,
            serde_json::to_value(&report).unwrap_or_else(|_| json!({})),
        );
        report
    }

    /// Runs [`perform_health_check`](Self::perform_health_check) every
    /// `healthCheck.interval` on the current tokio runtime. Returns `None` when
    /// health checks are disabled.
    pub fn spawn_periodic(self: Arc<Self>) -> Option<JoinHandle<()>> {
        let settings = self.config.snapshot().health_check.clone();
        if !settings.enabled || settings.interval == 0 {
            return None;
        }
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(settings.interval));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let report = self.perform_health_check();
                log::debug!(target: "locale_store", "periodic health check: healthy={}", report.healthy);
            }
        }))
    }
}

struct Probe {
    elapsed: u64,
    outcome: Result<(), String>,
    cleanup_error: Option<String>,
}

fn probe(adapter: &AdapterHandle, timeout_ms: u64) -> Probe {
    let started = Instant::now();
    let value = Uuid::new_v4().to_string();
    let mut cleanup_error = None;
    let outcome = (|| -> Result<(), String> {
        adapter.set(PROBE_KEY, &value).map_err(|e| e.to_string())?;
        let read = adapter.get(PROBE_KEY).map_err(|e| e.to_string());
        cleanup_error = adapter.remove(PROBE_KEY).err().map(|e| e.to_string());
        match read? {
            Some(v) if v == value => Ok(()),
            Some(_) => Err("probe read back a different value".to_string()),
            None => Err("probe value was not persisted".to_string()),
        }
    })();
    let elapsed = started.elapsed().as_millis() as u64;
    let outcome = outcome.and_then(|()| {
        if elapsed > timeout_ms {
            Err(format!("probe took {elapsed}ms, limit {timeout_ms}ms"))
        } else {
            Ok(())
        }
    });
    Probe {
        elapsed,
        outcome,
        cleanup_error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::FlakyBackend;
    use crate::backend::BackendAdapter;
    use crate::clock::ManualClock;
    use crate::config::StorageConfig;
    use crate::errors::BackendError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn checker(adapters: Vec<AdapterHandle>, config: StorageConfig) -> (HealthChecker, Arc<EventBus>) {
        let clock = Arc::new(ManualClock::new(42));
        let diagnostics = Arc::new(Diagnostics::new(&config, clock.clone()));
        let events = Arc::new(EventBus::new(clock.clone(), None));
        let backends = Arc::new(BackendManager::new(adapters, diagnostics.clone()));
        let checker = HealthChecker::new(
            backends,
            Arc::new(ConfigManager::new(config)),
            events.clone(),
            diagnostics,
            clock,
        );
        (checker, events)
    }

    /// Fails the first `n` writes, then behaves.
    struct Recovering {
        inner: FlakyBackend,
        failures_left: AtomicU32,
    }

    impl BackendAdapter for Recovering {
        fn kind(&self) -> BackendKind {
            BackendKind::Cookie
        }
        fn get(&self, key: &str) -> Result<Option<String>, BackendError> {
            self.inner.get(key)
        }
        fn set(&self, key: &str, value: &str) -> Result<(), BackendError> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(BackendError::Unavailable {
                    backend: BackendKind::Cookie,
                    reason: "warming up".into(),
                });
            }
            self.inner.set(key, value)
        }
        fn remove(&self, key: &str) -> Result<(), BackendError> {
            self.inner.remove(key)
        }
    }

    #[test]
    fn healthy_chain_reports_every_backend() {
        let (checker, events) = checker(
            vec![Arc::new(FlakyBackend::new(BackendKind::LocalStorage))],
            StorageConfig::default(),
        );
        let report = checker.perform_health_check();
        assert!(report.healthy);
        assert!(!report.degraded);
        assert_eq!(report.backends.len(), 2);
        assert!(report.backends.iter().all(|b| b.attempts == 1));
        assert_eq!(report.timestamp, 42);
        assert_eq!(events.get_event_history(None)[0].event_type, HEALTH_CHECKED);
    }

    #[test]
    fn failing_backend_is_retried_then_reported() {
        let mut config = StorageConfig::default();
        config.health_check.retry_attempts = 3;
        let (checker, _) = checker(
            vec![Arc::new(FlakyBackend::failing_writes(BackendKind::LocalStorage))],
            config,
        );
        let report = checker.perform_health_check();
        assert!(!report.healthy);
        assert!(report.degraded);
        let local = &report.backends[0];
        assert!(!local.available);
        assert_eq!(local.attempts, 3);
        assert!(local.error.as_ref().unwrap().contains("quota"));
    }

    #[test]
    fn retry_recovers_transient_failure() {
        let adapter = Arc::new(Recovering {
            inner: FlakyBackend::new(BackendKind::Cookie),
            failures_left: AtomicU32::new(1),
        });
        let (checker, _) = checker(vec![adapter.clone()], StorageConfig::default());
        let report = checker.perform_health_check();
        assert!(report.backends[0].available);
        assert_eq!(report.backends[0].attempts, 2);
        // probe key is cleaned up
        assert_eq!(adapter.get(PROBE_KEY).unwrap(), None);
    }

    #[test]
    fn disabled_checks_do_not_spawn() {
        let mut config = StorageConfig::default();
        config.health_check.enabled = false;
        let (checker, _) = checker(vec![], config);
        assert!(Arc::new(checker).spawn_periodic().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_checks_run_on_interval() {
        let (checker, events) = checker(vec![], StorageConfig::default());
        let handle = Arc::new(checker).spawn_periodic().unwrap();
        tokio::time::sleep(Duration::from_millis(60_000 * 2 + 10)).await;
        let runs = events
            .get_event_history(None)
            .iter()
            .filter(|e| e.event_type == HEALTH_CHECKED)
            .count();
        assert_eq!(runs, 2);
        handle.abort();
    }

    #[test]
    fn leftover_probe_key_is_logged_and_reported() {
        let mut config = StorageConfig::default();
        config.debug.enabled = true;
        config.debug.log_to_storage = true;
        let sticky = Arc::new(FlakyBackend::new(BackendKind::LocalStorage));
        sticky.set_failing_removes(true);
        let (checker, _) = checker(vec![sticky.clone()], config);

        let report = checker.perform_health_check();
        let local = &report.backends[0];
        assert!(local.available);
        assert!(local.cleanup_error.as_ref().unwrap().contains("scripted remove failure"));
        assert!(report.backends[1].cleanup_error.is_none());
        assert!(sticky.get(PROBE_KEY).unwrap().is_some());
        assert!(checker
            .diagnostics
            .entries()
            .iter()
            .any(|e| e.level == "warn" && e.message.contains("health probe key")));
    }
}
