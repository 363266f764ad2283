//! Stage pipeline orchestrator. One spawned task per run owns its
//! [`RunContext`], walks the planned stages in precedence order and reports
//! through the run's event channel until a terminal event or cancellation.

pub mod context;
pub mod request;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::config::{
    AssessorConfig, PipelineTuning, ProbeMode, EVENT_CHANNEL_SIZE, MAX_CONCURRENCY,
    MAX_DURATION_SECS, STOP_NOTICE_TIMEOUT_MS,
};
use crate::error::AssessError;
use crate::events::{Emitter, Event};
use crate::log_capture::{LogLevel, LogSource, LogState};
use crate::provider::{PageMetricsProvider, ResourceTracker};
use crate::scoring::{self, AssessmentMetrics, Report};
use crate::stages::{self, run_stage, StageEnv, StageKind};
use crate::target::parse_target;

use context::{RunContext, RunStatus};
use request::TestConfig;

/// Handle to a started run.
#[derive(Debug)]
pub struct RunHandle {
    pub id: String,
    pub events: mpsc::Receiver<Event>,
    pub status: watch::Receiver<RunStatus>,
    pub stop: watch::Sender<bool>,
    pub task: JoinHandle<()>,
}

pub struct Pipeline<P: PageMetricsProvider> {
    provider: Arc<P>,
    tuning: PipelineTuning,
    mode: ProbeMode,
    max_concurrency: u32,
    max_duration: u64,
    tracker: ResourceTracker,
    logs: Option<LogState>,
}

impl<P: PageMetricsProvider> Clone for Pipeline<P> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            tuning: self.tuning.clone(),
            mode: self.mode,
            max_concurrency: self.max_concurrency,
            max_duration: self.max_duration,
            tracker: self.tracker.clone(),
            logs: self.logs.clone(),
        }
    }
}

impl<P: PageMetricsProvider> Pipeline<P> {
    pub fn new(provider: Arc<P>) -> Self {
        Self {
            provider,
            tuning: PipelineTuning::default(),
            mode: ProbeMode::Simulated,
            max_concurrency: MAX_CONCURRENCY,
            max_duration: MAX_DURATION_SECS,
            tracker: ResourceTracker::new(),
            logs: None,
        }
    }

    /// Pipeline wired from the service configuration.
    pub fn from_config(provider: Arc<P>, config: &AssessorConfig) -> Self {
        Self::new(provider)
            .with_tuning(config.tuning.clone())
            .with_mode(config.probe_mode)
            .with_limits(config.max_concurrency, config.max_duration)
    }

    pub fn with_tuning(mut self, tuning: PipelineTuning) -> Self {
        self.tuning = tuning;
        self
    }

    pub fn with_mode(mut self, mode: ProbeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_limits(mut self, max_concurrency: u32, max_duration: u64) -> Self {
        self.max_concurrency = max_concurrency;
        self.max_duration = max_duration;
        self
    }

    pub fn with_logs(mut self, logs: LogState) -> Self {
        self.logs = Some(logs);
        self
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    pub fn limits(&self) -> (u32, u64) {
        (self.max_concurrency, self.max_duration)
    }

    /// Validate the request and spawn the run. Validation failures return
    /// here, before any stage or event exists.
    pub fn start(&self, url: &str, config: TestConfig) -> Result<RunHandle, AssessError> {
        let target = parse_target(url)?;
        config.validate(self.max_concurrency, self.max_duration)?;

        let plan = stages::plan(&config.stages);
        let id = uuid::Uuid::new_v4().to_string();
        let (emitter, events) = Emitter::channel(EVENT_CHANNEL_SIZE);
        let (ctx, status) = RunContext::new(id.clone(), target, config, &plan, emitter);
        let (stop, stop_rx) = watch::channel(false);

        info!(
            "Starting run {} for {} ({} stages)",
            id,
            ctx.target(),
            plan.len()
        );

        let task = tokio::spawn(orchestrate(
            self.clone(),
            plan,
            ctx,
            stop_rx,
        ));

        Ok(RunHandle {
            id,
            events,
            status,
            stop,
            task,
        })
    }

    /// Start a run and hand back just its event stream. Dropping the stream
    /// cancels the run.
    pub fn run(&self, url: &str, config: TestConfig) -> Result<ReceiverStream<Event>, AssessError> {
        let handle = self.start(url, config)?;
        Ok(ReceiverStream::new(handle.events))
    }

    async fn log(&self, level: LogLevel, message: String) {
        self.log_from(LogSource::Pipeline, level, message).await
    }

    async fn log_from(&self, source: LogSource, level: LogLevel, message: String) {
        if let Some(logs) = &self.logs {
            logs.emit(source, level, message).await;
        }
    }
}

enum Ended {
    Finished(Result<Report, AssessError>),
    Disconnected,
    Stopped,
}

async fn orchestrate<P: PageMetricsProvider>(
    pipeline: Pipeline<P>,
    plan: Vec<(StageKind, u8)>,
    mut ctx: RunContext,
    mut stop_rx: watch::Receiver<bool>,
) {
    let env = StageEnv {
        provider: pipeline.provider.as_ref(),
        tracker: &pipeline.tracker,
        tuning: &pipeline.tuning,
        mode: pipeline.mode,
    };
    let emitter = ctx.emitter().clone();
    let id = ctx.id().to_string();
    pipeline
        .log(LogLevel::Info, format!("Run {} started for {}", id, ctx.target()))
        .await;

    // Dropping the losing branch drops the in-flight stage, and with it
    // every provider lease it holds.
    let ended = tokio::select! {
        result = execute(&env, &plan, &mut ctx) => Ended::Finished(result),
        _ = emitter.closed() => Ended::Disconnected,
        _ = stop_requested(&mut stop_rx) => Ended::Stopped,
    };

    match ended {
        Ended::Finished(Ok(report)) => {
            let score = report.score;
            match ctx.finish(report).await {
                Ok(()) => {
                    info!("Run {} completed with score {}", id, score);
                    pipeline
                        .log(LogLevel::Info, format!("Run {} completed: score {}", id, score))
                        .await;
                }
                Err(_) => {
                    ctx.abort("caller disconnected");
                    debug!("Run {} finished after its caller left", id);
                }
            }
        }
        Ended::Finished(Err(AssessError::StreamAborted)) | Ended::Disconnected => {
            ctx.abort("caller disconnected");
            warn!("Run {} aborted: caller disconnected", id);
            pipeline
                .log(LogLevel::Warn, format!("Run {} aborted: caller disconnected", id))
                .await;
        }
        Ended::Finished(Err(e)) => {
            ctx.fail_stage();
            error!("Run {} failed: {}", id, e);
            let source = match e {
                AssessError::ProviderUnavailable(_) => LogSource::Provider,
                _ => LogSource::Pipeline,
            };
            pipeline
                .log_from(source, LogLevel::Error, format!("Run {} failed: {}", id, e))
                .await;
            ctx.fail(&e).await;
        }
        Ended::Stopped => {
            ctx.abort("stop requested");
            info!("Run {} stopped on request", id);
            pipeline
                .log(LogLevel::Info, format!("Run {} stopped on request", id))
                .await;
            let notice = Event::failure(&AssessError::Cancelled("stopped on request".to_string()));
            if let Err(e) = emitter
                .send_within(notice, Duration::from_millis(STOP_NOTICE_TIMEOUT_MS))
                .await
            {
                debug!("Run {}: cancellation notice not delivered: {}", id, e);
            }
        }
    }
}

async fn execute<P: PageMetricsProvider>(
    env: &StageEnv<'_, P>,
    plan: &[(StageKind, u8)],
    ctx: &mut RunContext,
) -> Result<Report, AssessError> {
    let mut bundle = AssessmentMetrics::new(ctx.target().to_string(), Utc::now());

    for (kind, weight) in plan {
        debug!("Run {}: stage {:?} (weight {})", ctx.id(), kind, weight);
        ctx.begin_stage(*kind).await?;
        let outcome = run_stage(env, *kind, ctx).await?;
        let delta = outcome.completion_metrics();
        outcome.apply(&mut bundle);
        ctx.complete_stage(delta).await?;
    }

    let page = ctx.page_profile();
    bundle.speed_index = page.speed_index_ms.map(|ms| ms / 1000.0);
    bundle.page_requests = page.page_requests;
    bundle.web_vitals = page.web_vitals.clone();
    bundle.timestamp = Utc::now();

    Ok(scoring::score(&bundle))
}

/// Resolves once `true` is published. A dropped sender never resolves.
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    loop {
        if *stop_rx.borrow_and_update() {
            return;
        }
        if stop_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
