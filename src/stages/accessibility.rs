use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::StageEnv;
use crate::error::{AssessError, ProviderError};
use crate::events::metrics;
use crate::pipeline::context::RunContext;
use crate::provider::{DeviceProfile, DocumentFacts, PageMetricsProvider};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub rule: String,
    pub count: u32,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibilityResult {
    pub violations: Vec<Violation>,
    pub degraded: bool,
}

impl AccessibilityResult {
    /// Sum of offending elements across all rules.
    pub fn violation_count(&self) -> u32 {
        self.violations.iter().map(|v| v.count).sum()
    }
}

/// Static heuristics over the rendered desktop document. Always reads the
/// real page; there is no simulated variant.
pub async fn audit<P: PageMetricsProvider>(
    env: &StageEnv<'_, P>,
    ctx: &mut RunContext,
) -> Result<AccessibilityResult, AssessError> {
    let target = ctx.target().url.clone();
    let document = match env.navigate(&target, DeviceProfile::Desktop).await {
        Ok(snapshot) => {
            ctx.observe_snapshot(&snapshot);
            snapshot.document
        }
        Err(ProviderError::Unavailable(msg)) => return Err(AssessError::ProviderUnavailable(msg)),
        Err(e) => {
            warn!("Accessibility audit could not load {}: {}", target, e);
            None
        }
    };

    let Some(document) = document else {
        return Ok(AccessibilityResult {
            violations: Vec::new(),
            degraded: true,
        });
    };

    let result = AccessibilityResult {
        violations: violations(&document),
        degraded: false,
    };
    ctx.report(
        0.5,
        "Evaluated accessibility rules",
        metrics(json!({ "accessibilityViolations": result.violation_count() })),
    )
    .await?;
    Ok(result)
}

pub fn violations(doc: &DocumentFacts) -> Vec<Violation> {
    let mut out = Vec::new();
    if doc.images_missing_alt > 0 {
        out.push(Violation {
            rule: "image-alt".to_string(),
            count: doc.images_missing_alt,
            description: format!(
                "{} of {} images have no alt text",
                doc.images_missing_alt, doc.images_total
            ),
        });
    }
    if !doc.has_lang {
        out.push(Violation {
            rule: "html-has-lang".to_string(),
            count: 1,
            description: "The <html> element has no lang attribute".to_string(),
        });
    }
    if !doc.has_title {
        out.push(Violation {
            rule: "document-title".to_string(),
            count: 1,
            description: "The document has no <title>".to_string(),
        });
    }
    if doc.inputs_without_label > 0 {
        out.push(Violation {
            rule: "label".to_string(),
            count: doc.inputs_without_label,
            description: format!("{} form inputs have no label", doc.inputs_without_label),
        });
    }
    out
}
