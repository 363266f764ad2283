use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use crate::config::AssessorConfig;
use crate::error::AssessError;
use crate::log_capture::LogState;
use crate::pipeline::context::RunStatus;
use crate::pipeline::Pipeline;
use crate::provider::{AnyProvider, PageMetricsProvider};
use crate::settings::{load_settings, settings_path, PersistentSettings};

pub type SharedState<P = AnyProvider> = Arc<AppState<P>>;

pub struct AppState<P: PageMetricsProvider = AnyProvider> {
    pub config: AssessorConfig,
    pub pipeline: Pipeline<P>,
    pub settings: RwLock<PersistentSettings>,
    pub runs: RwLock<HashMap<String, ActiveRun>>,
    pub logs: LogState,
    pub started_at: DateTime<Utc>,
}

/// Registry entry for a run whose stream is still open.
pub struct ActiveRun {
    pub status: watch::Receiver<RunStatus>,
    pub stop: watch::Sender<bool>,
}

impl<P: PageMetricsProvider> AppState<P> {
    pub fn new(config: AssessorConfig, provider: Arc<P>) -> Self {
        let logs = LogState::new();
        let settings = settings_path(&config)
            .map(|path| load_settings(&path))
            .unwrap_or_default();
        let pipeline = Pipeline::from_config(provider, &config).with_logs(logs.clone());

        Self {
            config,
            pipeline,
            settings: RwLock::new(settings),
            runs: RwLock::new(HashMap::new()),
            logs,
            started_at: Utc::now(),
        }
    }

    pub async fn register_run(&self, id: String, run: ActiveRun) {
        self.runs.write().await.insert(id, run);
    }

    pub async fn forget_run(&self, id: &str) {
        self.runs.write().await.remove(id);
    }

    /// Snapshot of every open run, oldest first.
    pub async fn list_runs(&self) -> Vec<RunStatus> {
        let runs = self.runs.read().await;
        let mut list: Vec<RunStatus> = runs.values().map(|r| r.status.borrow().clone()).collect();
        list.sort_by_key(|s| s.started_at);
        list
    }

    pub async fn cancel_run(&self, id: &str) -> Result<(), AssessError> {
        let runs = self.runs.read().await;
        let run = runs
            .get(id)
            .ok_or_else(|| AssessError::NotFound(format!("run {}", id)))?;
        let _ = run.stop.send(true);
        Ok(())
    }

    /// Ask every open run to stop; used on shutdown.
    pub async fn cancel_all(&self) -> usize {
        let runs = self.runs.read().await;
        for run in runs.values() {
            let _ = run.stop.send(true);
        }
        runs.len()
    }
}
