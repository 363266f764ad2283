use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use super::StageEnv;
use crate::config::MAX_FORMS;
use crate::error::{AssessError, ProviderError};
use crate::events::metrics;
use crate::pipeline::context::RunContext;
use crate::provider::{DeviceProfile, FormFacts, PageMetricsProvider};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormResult {
    pub forms_found: u32,
    pub forms_checked: u32,
    pub inputs: u32,
    pub buttons: u32,
    pub forms_without_submit: u32,
    pub unlabeled_inputs: u32,
    pub degraded: bool,
}

pub async fn probe<P: PageMetricsProvider>(
    env: &StageEnv<'_, P>,
    ctx: &mut RunContext,
) -> Result<FormResult, AssessError> {
    let target = ctx.target().url.clone();
    let forms = match env.navigate(&target, DeviceProfile::Desktop).await {
        Ok(snapshot) => {
            ctx.observe_snapshot(&snapshot);
            snapshot.document.map(|d| d.forms)
        }
        Err(ProviderError::Unavailable(msg)) => return Err(AssessError::ProviderUnavailable(msg)),
        Err(e) => {
            warn!("Form probe could not load {}: {}", target, e);
            None
        }
    };

    let Some(forms) = forms else {
        return Ok(FormResult {
            degraded: true,
            ..Default::default()
        });
    };

    let result = summarize(&forms);
    ctx.report(
        0.5,
        format!("Inspected {} forms", result.forms_checked),
        metrics(json!({
            "formsFound": result.forms_found,
            "formsChecked": result.forms_checked,
        })),
    )
    .await?;
    Ok(result)
}

/// Only the first few forms are inspected.
pub fn summarize(forms: &[FormFacts]) -> FormResult {
    let mut result = FormResult {
        forms_found: forms.len() as u32,
        ..Default::default()
    };
    for form in forms.iter().take(MAX_FORMS) {
        result.forms_checked += 1;
        result.inputs += form.inputs;
        result.buttons += form.buttons;
        result.unlabeled_inputs += form.unlabeled_inputs;
        if !form.has_submit {
            result.forms_without_submit += 1;
        }
    }
    result
}
