//! Scoring and recommendations. [`score`] is a pure function of the metrics
//! bundle; identical input always yields an identical report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::load_generator::LoadTestSummary;
use crate::provider::WebVitals;
use crate::stages::accessibility::AccessibilityResult;
use crate::stages::forms::FormResult;
use crate::stages::links::LinkReport;
use crate::stages::load_time::LoadTimeResult;
use crate::stages::mobile::MobileResult;

const ACCESSIBILITY_PENALTY_CAP: i64 = 10;

/// Everything the pipeline measured for one run. Stages that were not
/// enabled leave their slot empty and contribute no penalty.
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentMetrics {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub load_time: Option<LoadTimeResult>,
    pub speed_index: Option<f64>,
    pub page_requests: Option<u32>,
    pub links: Option<LinkReport>,
    pub mobile: Option<MobileResult>,
    pub load_test: Option<LoadTestSummary>,
    pub accessibility: Option<AccessibilityResult>,
    pub forms: Option<FormResult>,
    pub web_vitals: Option<WebVitals>,
}

impl AssessmentMetrics {
    pub fn new(url: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            url: url.into(),
            timestamp,
            load_time: None,
            speed_index: None,
            page_requests: None,
            links: None,
            mobile: None,
            load_test: None,
            accessibility: None,
            forms: None,
            web_vitals: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    LoadTime,
    Mobile,
    FailedRequests,
    BrokenLinks,
    Accessibility,
    Forms,
}

impl IssueCategory {
    pub fn recommendation(&self) -> &'static str {
        match self {
            IssueCategory::LoadTime => {
                "Optimize page load time: compress images, minify CSS/JS, enable caching and consider a CDN"
            }
            IssueCategory::Mobile => {
                "Improve mobile responsiveness: add a viewport meta tag, use responsive layouts and test on small screens"
            }
            IssueCategory::FailedRequests => {
                "Investigate failed requests under load: review server capacity, error logs and connection limits"
            }
            IssueCategory::BrokenLinks => {
                "Fix or remove broken links and set up redirects for moved content"
            }
            IssueCategory::Accessibility => {
                "Address accessibility issues: add alt text, label form inputs and declare the page language and title"
            }
            IssueCategory::Forms => "Give every form a clear submit control",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub category: IssueCategory,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportMetrics {
    pub load_time: Option<f64>,
    pub speed_index: Option<f64>,
    pub page_requests: Option<u32>,
    pub total_requests: Option<u32>,
    pub failed_requests: Option<u32>,
    pub avg_latency: Option<f64>,
    pub max_latency: Option<f64>,
    pub mobile_score: Option<u8>,
    pub links_checked: Option<u32>,
    pub broken_links: Vec<String>,
    pub accessibility_violations: Option<u32>,
    pub forms_without_submit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_vitals: Option<WebVitals>,
}

/// Final assessment. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    pub score: u8,
    pub metrics: ReportMetrics,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
    /// Measurements produced by fallback logic rather than observed.
    #[serde(default)]
    pub degraded: Vec<String>,
}

pub fn score(m: &AssessmentMetrics) -> Report {
    let mut total: i64 = 100;
    let mut issues = Vec::new();

    if let Some(lt) = &m.load_time {
        let (penalty, severity) = if lt.seconds > 3.0 {
            (20, Severity::High)
        } else if lt.seconds > 2.0 {
            (10, Severity::Medium)
        } else if lt.seconds > 1.0 {
            (5, Severity::Medium)
        } else {
            (0, Severity::Medium)
        };
        if penalty > 0 {
            total -= penalty;
            issues.push(Issue {
                category: IssueCategory::LoadTime,
                severity,
                description: format!("Page load time is {:.2}s", lt.seconds),
            });
        }
    }

    if let Some(mobile) = &m.mobile {
        let penalty = if mobile.score < 80 {
            15
        } else if mobile.score < 90 {
            5
        } else {
            0
        };
        if penalty > 0 {
            total -= penalty;
            issues.push(Issue {
                category: IssueCategory::Mobile,
                severity: Severity::Medium,
                description: format!("Mobile responsiveness score is {}/100", mobile.score),
            });
        }
    }

    if let Some(load) = &m.load_test {
        if load.failed > 0 {
            total -= load.failed as i64 * 5;
            issues.push(Issue {
                category: IssueCategory::FailedRequests,
                severity: Severity::Medium,
                description: format!(
                    "{} of {} requests failed under load",
                    load.failed, load.total
                ),
            });
        }
    }

    if let Some(links) = &m.links {
        if !links.broken.is_empty() {
            let count = links.broken.len() as i64;
            total -= count * 10;
            issues.push(Issue {
                category: IssueCategory::BrokenLinks,
                severity: Severity::High,
                description: format!("Found {} broken links", count),
            });
        }
    }

    if let Some(a11y) = &m.accessibility {
        let count = a11y.violation_count();
        if count > 0 {
            total -= (count as i64 * 2).min(ACCESSIBILITY_PENALTY_CAP);
            issues.push(Issue {
                category: IssueCategory::Accessibility,
                severity: Severity::Medium,
                description: format!("Found {} accessibility violations", count),
            });
        }
    }

    if let Some(forms) = &m.forms {
        if forms.forms_without_submit > 0 {
            total -= 5;
            issues.push(Issue {
                category: IssueCategory::Forms,
                severity: Severity::Medium,
                description: format!(
                    "{} of {} forms have no submit control",
                    forms.forms_without_submit, forms.forms_checked
                ),
            });
        }
    }

    // One recommendation per category that fired, in issue order.
    let mut recommendations: Vec<String> = Vec::new();
    for issue in &issues {
        let text = issue.category.recommendation();
        if !recommendations.iter().any(|r| r == text) {
            recommendations.push(text.to_string());
        }
    }

    Report {
        url: m.url.clone(),
        timestamp: m.timestamp,
        score: total.clamp(0, 100) as u8,
        metrics: report_metrics(m),
        issues,
        recommendations,
        degraded: degraded(m),
    }
}

fn report_metrics(m: &AssessmentMetrics) -> ReportMetrics {
    ReportMetrics {
        load_time: m.load_time.as_ref().map(|l| l.seconds),
        speed_index: m.speed_index,
        page_requests: m.page_requests,
        total_requests: m.load_test.as_ref().map(|l| l.total),
        failed_requests: m.load_test.as_ref().map(|l| l.failed),
        avg_latency: m.load_test.as_ref().and_then(|l| l.avg_latency),
        max_latency: m.load_test.as_ref().and_then(|l| l.max_latency),
        mobile_score: m.mobile.as_ref().map(|r| r.score),
        links_checked: m.links.as_ref().map(|l| l.checked),
        broken_links: m
            .links
            .as_ref()
            .map(|l| l.broken.iter().map(|b| b.url.clone()).collect())
            .unwrap_or_default(),
        accessibility_violations: m.accessibility.as_ref().map(|a| a.violation_count()),
        forms_without_submit: m.forms.as_ref().map(|f| f.forms_without_submit),
        web_vitals: m.web_vitals.clone(),
    }
}

fn degraded(m: &AssessmentMetrics) -> Vec<String> {
    let flags = [
        ("loadTime", m.load_time.as_ref().is_some_and(|r| r.degraded)),
        ("linkIntegrity", m.links.as_ref().is_some_and(|r| r.degraded)),
        ("mobile", m.mobile.as_ref().is_some_and(|r| r.degraded)),
        (
            "accessibility",
            m.accessibility.as_ref().is_some_and(|r| r.degraded),
        ),
        ("forms", m.forms.as_ref().is_some_and(|r| r.degraded)),
    ];
    flags
        .into_iter()
        .filter(|(_, flagged)| *flagged)
        .map(|(name, _)| name.to_string())
        .collect()
}
