use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Context;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryCounters {
    pub transactions_created: usize,
    pub transactions_completed: usize,
    pub transactions_failed: usize,
    pub transactions_reversed: usize,
    pub compliance_blocks: usize,
    pub fraud_blocks: usize,
    pub needs_review: usize,
    pub login_lockouts: usize,
}

#[derive(Debug)]
struct TelemetryStore {
    path: PathBuf,
}

impl TelemetryStore {
    fn from_env() -> Option<Self> {
        let home = env::var_os("CODEX_HOME")?;
        let mut path = PathBuf::from(home);
        path.push("banking");
        path.push("telemetry.json");
        Some(Self { path })
    }

    fn read(&self) -> anyhow::Result<Option<TelemetryCounters>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let counters = serde_json::from_slice(&data)
            .with_context(|| format!("failed to parse {}", self.path.display()))?;
        Ok(Some(counters))
    }

    fn persist(&self, counters: &TelemetryCounters) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data =
            serde_json::to_vec_pretty(counters).context("failed to encode telemetry counters")?;
        fs::write(&self.path, data)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct TelemetryInner {
    counters: TelemetryCounters,
    store: Option<TelemetryStore>,
}

impl TelemetryInner {
    fn with_store(store: Option<TelemetryStore>) -> Self {
        match store {
            Some(store) => {
                let counters = match store.read() {
                    Ok(Some(existing)) => existing,
                    Ok(None) => TelemetryCounters::default(),
                    Err(err) => {
                        warn!(
                            path = %store.path.display(),
                            error = %err,
                            "failed to load persisted telemetry; continuing with defaults"
                        );
                        TelemetryCounters::default()
                    }
                };
                Self {
                    counters,
                    store: Some(store),
                }
            }
            None => Self::default(),
        }
    }

    fn persist(&self) {
        if let Some(store) = &self.store
            && let Err(err) = store.persist(&self.counters)
        {
            warn!(
                path = %store.path.display(),
                error = %err,
                "failed to persist telemetry counters"
            );
        }
    }
}

/// Counters for the transaction lifecycle, persisted to
/// `$CODEX_HOME/banking/telemetry.json` the way the teacher's
/// `AccountingTelemetry` persists reconciliation/approval counters.
#[derive(Clone, Default)]
pub struct BankingTelemetry {
    inner: Arc<Mutex<TelemetryInner>>,
}

impl BankingTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::from_store(None)
    }

    #[must_use]
    pub fn persistent_from_env() -> Self {
        Self::from_store(TelemetryStore::from_env())
    }

    #[must_use]
    pub fn with_store_path(path: PathBuf) -> Self {
        Self::from_store(Some(TelemetryStore { path }))
    }

    fn from_store(store: Option<TelemetryStore>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TelemetryInner::with_store(store))),
        }
    }

    fn update<F>(&self, mut updater: F)
    where
        F: FnMut(&mut TelemetryCounters),
    {
        if let Ok(mut inner) = self.inner.lock() {
            updater(&mut inner.counters);
            inner.persist();
        }
    }

    pub fn record_created(&self) {
        self.update(|counters| counters.transactions_created += 1);
    }

    pub fn record_completed(&self) {
        self.update(|counters| counters.transactions_completed += 1);
    }

    pub fn record_failed(&self) {
        self.update(|counters| counters.transactions_failed += 1);
    }

    pub fn record_reversed(&self) {
        self.update(|counters| counters.transactions_reversed += 1);
    }

    pub fn record_compliance_block(&self) {
        self.update(|counters| counters.compliance_blocks += 1);
    }

    pub fn record_fraud_block(&self) {
        self.update(|counters| counters.fraud_blocks += 1);
    }

    pub fn record_needs_review(&self) {
        self.update(|counters| counters.needs_review += 1);
    }

    pub fn record_login_lockout(&self) {
        self.update(|counters| counters.login_lockouts += 1);
    }

    #[must_use]
    pub fn snapshot(&self) -> TelemetryCounters {
        self.inner
            .lock()
            .map(|inner| inner.counters.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn store_path(&self) -> Option<PathBuf> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.store.as_ref().map(|store| store.path.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn counters_accumulate() {
        let telemetry = BankingTelemetry::new();
        telemetry.record_created();
        telemetry.record_completed();
        telemetry.record_failed();
        telemetry.record_reversed();
        telemetry.record_compliance_block();
        telemetry.record_fraud_block();
        telemetry.record_needs_review();

        let counters = telemetry.snapshot();
        assert_eq!(counters.transactions_created, 1);
        assert_eq!(counters.transactions_completed, 1);
        assert_eq!(counters.transactions_failed, 1);
        assert_eq!(counters.transactions_reversed, 1);
        assert_eq!(counters.compliance_blocks, 1);
        assert_eq!(counters.fraud_blocks, 1);
        assert_eq!(counters.needs_review, 1);
    }

    #[test]
    fn persistence_survives_restart() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("telemetry.json");
        {
            let telemetry = BankingTelemetry::with_store_path(path.clone());
            telemetry.record_created();
            telemetry.record_completed();
        }
        let telemetry = BankingTelemetry::with_store_path(path);
        let counters = telemetry.snapshot();
        assert_eq!(counters.transactions_created, 1);
        assert_eq!(counters.transactions_completed, 1);
    }

    #[test]
    fn persistence_recovers_from_corrupt_file() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("telemetry.json");
        fs::write(&path, b"not json").expect("write corrupt telemetry");

        let telemetry = BankingTelemetry::with_store_path(path.clone());
        let counters = telemetry.snapshot();
        assert_eq!(counters.transactions_created, 0);

        telemetry.record_created();

        let reloaded = BankingTelemetry::with_store_path(path);
        let counters = reloaded.snapshot();
        assert_eq!(counters.transactions_created, 1);

        let stored_path = reloaded.store_path().expect("telemetry path recorded");
        assert!(
            stored_path.ends_with("telemetry.json"),
            "unexpected path: {stored_path:?}"
        );
    }
}
