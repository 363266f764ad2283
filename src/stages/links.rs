use futures::future::join_all;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use super::StageEnv;
use crate::config::{
    ProbeMode, LINK_CHECK_BATCH, MAX_LINKS, SIMULATED_LINK_BATCHES, SIMULATED_LINK_CANDIDATES,
};
use crate::error::{AssessError, ProviderError};
use crate::events::metrics;
use crate::pipeline::context::RunContext;
use crate::provider::{BrowserProfile, DeviceProfile, PageMetricsProvider};

const SIMULATED_BROKEN_PROBABILITY: f64 = 0.05;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokenLink {
    pub url: String,
    pub status: Option<u16>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkReport {
    pub checked: u32,
    pub broken: Vec<BrokenLink>,
    pub simulated: bool,
    /// The page itself could not be read, so no links were checked.
    pub degraded: bool,
}

pub async fn scan<P: PageMetricsProvider>(
    env: &StageEnv<'_, P>,
    ctx: &mut RunContext,
) -> Result<LinkReport, AssessError> {
    match env.mode {
        ProbeMode::Simulated => simulate(env, ctx).await,
        ProbeMode::Measured => measure(env, ctx).await,
    }
}

async fn simulate<P: PageMetricsProvider>(
    env: &StageEnv<'_, P>,
    ctx: &mut RunContext,
) -> Result<LinkReport, AssessError> {
    let base = ctx.target().url.clone();
    let per_batch = SIMULATED_LINK_CANDIDATES / SIMULATED_LINK_BATCHES;
    let mut report = LinkReport {
        simulated: true,
        ..Default::default()
    };

    for batch in 0..SIMULATED_LINK_BATCHES {
        let start = batch * per_batch;
        let broken = simulated_batch(&base, start, per_batch);
        report.checked += per_batch as u32;
        report.broken.extend(broken);

        ctx.report(
            (batch + 1) as f64 / (SIMULATED_LINK_BATCHES + 1) as f64,
            format!(
                "Checked {} of {} links",
                report.checked, SIMULATED_LINK_CANDIDATES
            ),
            metrics(json!({
                "linksChecked": report.checked,
                "brokenLinkCount": report.broken.len(),
            })),
        )
        .await?;
        env.pause().await;
    }

    Ok(report)
}

fn simulated_batch(base: &Url, start: usize, size: usize) -> Vec<BrokenLink> {
    let mut rng = rand::thread_rng();
    (start..start + size)
        .filter(|_| rng.gen_bool(SIMULATED_BROKEN_PROBABILITY))
        .map(|n| BrokenLink {
            url: base
                .join(&format!("page-{}", n + 1))
                .map(|u| u.to_string())
                .unwrap_or_else(|_| format!("{}page-{}", base, n + 1)),
            status: Some(404),
            reason: "not found".to_string(),
        })
        .collect()
}

async fn measure<P: PageMetricsProvider>(
    env: &StageEnv<'_, P>,
    ctx: &mut RunContext,
) -> Result<LinkReport, AssessError> {
    let target = ctx.target().url.clone();
    let snapshot = match env.navigate(&target, DeviceProfile::Desktop).await {
        Ok(snapshot) => snapshot,
        Err(ProviderError::Unavailable(msg)) => {
            return Err(AssessError::ProviderUnavailable(msg));
        }
        Err(e) => {
            warn!("Link scan could not load {}: {}", target, e);
            return Ok(LinkReport {
                degraded: true,
                ..Default::default()
            });
        }
    };
    ctx.observe_snapshot(&snapshot);

    let links: Vec<Url> = snapshot
        .document
        .map(|d| d.links)
        .unwrap_or_default()
        .iter()
        .filter_map(|l| Url::parse(l).ok())
        .filter(|u| matches!(u.scheme(), "http" | "https"))
        .take(MAX_LINKS)
        .collect();
    debug!("Checking {} links found on {}", links.len(), target);

    let mut report = LinkReport::default();
    let chunks: Vec<&[Url]> = links.chunks(LINK_CHECK_BATCH).collect();
    let total_chunks = chunks.len();

    if chunks.is_empty() {
        ctx.report(
            0.5,
            format!("No links found on {}", target),
            metrics(json!({ "linksChecked": 0, "brokenLinkCount": 0 })),
        )
        .await?;
        env.pause().await;
        return Ok(report);
    }

    for (i, chunk) in chunks.into_iter().enumerate() {
        let results = join_all(
            chunk
                .iter()
                .map(|link| async move { (link, env.head(link, BrowserProfile::Chrome).await) }),
        )
        .await;

        for (link, result) in results {
            report.checked += 1;
            match result {
                Ok(outcome) if outcome.status >= 400 => report.broken.push(BrokenLink {
                    url: link.to_string(),
                    status: Some(outcome.status),
                    reason: format!("HTTP {}", outcome.status),
                }),
                Ok(_) => {}
                Err(e) => {
                    debug!("Link {} failed: {}", link, e);
                    report.broken.push(BrokenLink {
                        url: link.to_string(),
                        status: None,
                        reason: "timeout/error".to_string(),
                    });
                }
            }
        }

        ctx.report(
            (i + 1) as f64 / (total_chunks + 1) as f64,
            format!("Checked {} of {} links", report.checked, links.len()),
            metrics(json!({
                "linksChecked": report.checked,
                "brokenLinkCount": report.broken.len(),
            })),
        )
        .await?;
        env.pause().await;
    }

    Ok(report)
}
