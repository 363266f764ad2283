use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::StageEnv;
use crate::config::{FALLBACK_LOAD_TIME_MAX, FALLBACK_LOAD_TIME_MIN, LOCAL_LOAD_TIME_SECS};
use crate::error::AssessError;
use crate::events::metrics;
use crate::pipeline::context::RunContext;
use crate::provider::{BrowserProfile, PageMetricsProvider, ResourceTracker};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTimeSample {
    pub browser: BrowserProfile,
    pub seconds: f64,
    pub degraded: bool,
    pub status: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadTimeResult {
    /// Slowest sample across browser profiles.
    pub seconds: f64,
    /// At least one sample came from the fallback range rather than a real
    /// measurement.
    pub degraded: bool,
    /// Measured against a loopback/private host via a connectivity check.
    pub local: bool,
    pub samples: Vec<LoadTimeSample>,
}

/// Load-time probe. Private hosts only get a TCP connectivity check and a
/// synthetic local value; public hosts get a HEAD request per browser
/// profile, falling back to a flagged plausible value on timeout or error.
pub async fn measure<P: PageMetricsProvider>(
    env: &StageEnv<'_, P>,
    ctx: &mut RunContext,
) -> Result<LoadTimeResult, AssessError> {
    let target = ctx.target().clone();
    let browsers = ctx.config().browsers.clone();
    let total = browsers.len();
    let mut samples = Vec::with_capacity(total);

    for (i, browser) in browsers.into_iter().enumerate() {
        let sample = if target.private {
            local_sample(&target, browser, env.tracker, env.tuning.connect_timeout).await
        } else {
            match env.head(&target.url, browser).await {
                Ok(outcome) => LoadTimeSample {
                    browser,
                    seconds: outcome.elapsed.as_secs_f64(),
                    degraded: false,
                    status: Some(outcome.status),
                },
                Err(e) => {
                    let seconds = fallback_load_time();
                    warn!(
                        "Load-time probe for {} ({}) failed: {}; using fallback {:.2}s",
                        target,
                        browser.label(),
                        e,
                        seconds
                    );
                    LoadTimeSample {
                        browser,
                        seconds,
                        degraded: true,
                        status: None,
                    }
                }
            }
        };

        // Still inside the stage: leave headroom so completion is the only
        // event that reaches the stage's full weight.
        let fraction = (i + 1) as f64 / (total + 1) as f64;
        ctx.report(
            fraction,
            format!("Measured load time ({})", browser.label()),
            metrics(json!({
                "loadTimeSamples": i + 1,
                "loadTime": sample.seconds,
            })),
        )
        .await?;
        samples.push(sample);
    }

    let seconds = samples.iter().map(|s| s.seconds).fold(0.0_f64, f64::max);
    let degraded = samples.iter().any(|s| s.degraded);

    Ok(LoadTimeResult {
        seconds,
        degraded,
        local: target.private,
        samples,
    })
}

async fn local_sample(
    target: &crate::target::TargetUrl,
    browser: BrowserProfile,
    tracker: &ResourceTracker,
    connect_timeout: Duration,
) -> LoadTimeSample {
    let reachable = match target.host_port() {
        Some((host, port)) => {
            tracker
                .leased(check_connectivity(&host, port, connect_timeout))
                .await
        }
        None => false,
    };
    if !reachable {
        warn!("Local target {} did not accept a connection", target);
    }

    LoadTimeSample {
        browser,
        seconds: LOCAL_LOAD_TIME_SECS,
        degraded: !reachable,
        status: None,
    }
}

/// True when a TCP connection to `host:port` opens within the timeout.
pub async fn check_connectivity(host: &str, port: u16, timeout: Duration) -> bool {
    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => {
            debug!("Connected to {}:{} in {:?}", host, port, start.elapsed());
            true
        }
        Ok(Err(e)) => {
            debug!("Connect to {}:{} failed: {}", host, port, e);
            false
        }
        Err(_) => false,
    }
}

fn fallback_load_time() -> f64 {
    rand::thread_rng().gen_range(FALLBACK_LOAD_TIME_MIN..FALLBACK_LOAD_TIME_MAX)
}
