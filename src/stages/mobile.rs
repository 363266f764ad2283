use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::StageEnv;
use crate::config::{ProbeMode, MOBILE_BREAKPOINTS};
use crate::error::{AssessError, ProviderError};
use crate::events::metrics;
use crate::pipeline::context::RunContext;
use crate::provider::{DeviceProfile, DocumentFacts, PageMetricsProvider};

const BASE_SCORE: u8 = 70;
const VIEWPORT_META_BONUS: u8 = 15;
const MOBILE_NAV_BONUS: u8 = 10;
const NARROW_LAYOUT_BONUS: u8 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointCheck {
    pub name: String,
    pub width: u32,
    pub passed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MobileResult {
    pub score: u8,
    pub simulated: bool,
    pub has_viewport_meta: bool,
    pub mobile_nav_elements: u32,
    pub mobile_width: Option<u32>,
    pub desktop_width: Option<u32>,
    pub breakpoints: Vec<BreakpointCheck>,
    pub degraded: bool,
}

pub async fn probe<P: PageMetricsProvider>(
    env: &StageEnv<'_, P>,
    ctx: &mut RunContext,
) -> Result<MobileResult, AssessError> {
    match env.mode {
        ProbeMode::Simulated => simulate(env, ctx).await,
        ProbeMode::Measured => measure(env, ctx).await,
    }
}

async fn simulate<P: PageMetricsProvider>(
    env: &StageEnv<'_, P>,
    ctx: &mut RunContext,
) -> Result<MobileResult, AssessError> {
    let total = MOBILE_BREAKPOINTS.len();
    let mut breakpoints = Vec::with_capacity(total);

    for (i, (name, width)) in MOBILE_BREAKPOINTS.iter().enumerate() {
        breakpoints.push(BreakpointCheck {
            name: name.to_string(),
            width: *width,
            passed: true,
        });
        ctx.report(
            (i + 1) as f64 / (total + 1) as f64,
            format!("Checked {} layout ({}px)", name, width),
            metrics(json!({ "breakpointsChecked": i + 1 })),
        )
        .await?;
        env.pause().await;
    }

    Ok(MobileResult {
        score: simulated_score(),
        simulated: true,
        breakpoints,
        ..Default::default()
    })
}

fn simulated_score() -> u8 {
    rand::thread_rng().gen_range(BASE_SCORE..=100)
}

async fn measure<P: PageMetricsProvider>(
    env: &StageEnv<'_, P>,
    ctx: &mut RunContext,
) -> Result<MobileResult, AssessError> {
    let target = ctx.target().url.clone();
    let mut facts: [Option<DocumentFacts>; 2] = [None, None];

    for (i, device) in [DeviceProfile::Mobile, DeviceProfile::Desktop]
        .into_iter()
        .enumerate()
    {
        match env.navigate(&target, device).await {
            Ok(snapshot) => {
                ctx.observe_snapshot(&snapshot);
                facts[i] = snapshot.document;
            }
            Err(ProviderError::Unavailable(msg)) => {
                return Err(AssessError::ProviderUnavailable(msg));
            }
            Err(e) => warn!("Mobile probe navigation ({:?}) failed: {}", device, e),
        }
        ctx.report(
            (i + 1) as f64 / 3.0,
            format!("Rendered {:?} layout", device).to_lowercase(),
            metrics(json!({ "breakpointsChecked": i + 1 })),
        )
        .await?;
    }

    let [mobile, desktop] = facts;
    let Some(mobile) = mobile else {
        return Ok(MobileResult {
            score: BASE_SCORE,
            degraded: true,
            ..Default::default()
        });
    };

    let mobile_width = mobile.viewport_width;
    let desktop_width = desktop.as_ref().and_then(|d| d.viewport_width);
    let narrower = matches!((mobile_width, desktop_width), (Some(m), Some(d)) if m < d);

    let breakpoints = MOBILE_BREAKPOINTS
        .iter()
        .map(|(name, width)| BreakpointCheck {
            name: name.to_string(),
            width: *width,
            passed: mobile.has_viewport_meta
                || *width >= DeviceProfile::Desktop.viewport_width(),
        })
        .collect();

    Ok(MobileResult {
        score: measured_score(mobile.has_viewport_meta, mobile.mobile_nav_elements, narrower),
        simulated: false,
        has_viewport_meta: mobile.has_viewport_meta,
        mobile_nav_elements: mobile.mobile_nav_elements,
        mobile_width,
        desktop_width,
        breakpoints,
        degraded: desktop.is_none(),
    })
}

pub fn measured_score(viewport_meta: bool, mobile_nav_elements: u32, narrower: bool) -> u8 {
    let mut score = BASE_SCORE;
    if viewport_meta {
        score += VIEWPORT_META_BONUS;
    }
    if mobile_nav_elements > 0 {
        score += MOBILE_NAV_BONUS;
    }
    if narrower {
        score += NARROW_LAYOUT_BONUS;
    }
    score.min(100)
}
