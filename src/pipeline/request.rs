use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::{DEFAULT_CONCURRENCY, DEFAULT_DURATION_SECS};
use crate::error::AssessError;
use crate::provider::{BrowserProfile, DeviceProfile};
use crate::stages::StageKind;

/// Resolved configuration of one assessment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Virtual users per load-test batch.
    pub concurrent: u32,
    /// Load-test duration in seconds.
    pub duration: u64,
    pub stages: BTreeSet<StageKind>,
    pub browsers: Vec<BrowserProfile>,
    pub devices: Vec<DeviceProfile>,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            concurrent: DEFAULT_CONCURRENCY,
            duration: DEFAULT_DURATION_SECS,
            stages: StageKind::default_set(),
            browsers: vec![BrowserProfile::Chrome],
            devices: vec![DeviceProfile::Desktop, DeviceProfile::Mobile],
        }
    }
}

/// Partial configuration as sent by a caller or stored in settings. Unset
/// fields fall through to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrent: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stages: Option<BTreeSet<StageKind>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browsers: Option<Vec<BrowserProfile>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<Vec<DeviceProfile>>,
}

/// Body of `POST /assess`.
#[derive(Debug, Clone, Deserialize)]
pub struct AssessRequest {
    pub url: String,
    #[serde(default)]
    pub config: TestConfigOverrides,
}

impl TestConfig {
    pub fn apply(mut self, overrides: &TestConfigOverrides) -> Self {
        if let Some(c) = overrides.concurrent {
            self.concurrent = c;
        }
        if let Some(d) = overrides.duration {
            self.duration = d;
        }
        if let Some(s) = &overrides.stages {
            self.stages = s.clone();
        }
        if let Some(b) = &overrides.browsers {
            self.browsers = b.clone();
        }
        if let Some(d) = &overrides.devices {
            self.devices = d.clone();
        }
        self
    }

    pub fn validate(&self, max_concurrency: u32, max_duration: u64) -> Result<(), AssessError> {
        if self.stages.is_empty() {
            return Err(AssessError::Validation("no stages enabled".to_string()));
        }
        if self.concurrent == 0 || self.concurrent > max_concurrency {
            return Err(AssessError::Validation(format!(
                "concurrent must be between 1 and {}, got {}",
                max_concurrency, self.concurrent
            )));
        }
        if self.duration == 0 || self.duration > max_duration {
            return Err(AssessError::Validation(format!(
                "duration must be between 1 and {} seconds, got {}",
                max_duration, self.duration
            )));
        }
        if self.browsers.is_empty() {
            return Err(AssessError::Validation("no browser profiles given".to_string()));
        }
        if self.devices.is_empty() {
            return Err(AssessError::Validation("no device profiles given".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_deserializes_with_partial_config() {
        let req: AssessRequest = serde_json::from_value(json!({
            "url": "localhost:3000",
            "config": {"concurrent": 5, "stages": ["load_time", "loadTest"]}
        }))
        .unwrap();
        let config = TestConfig::default().apply(&req.config);
        assert_eq!(config.concurrent, 5);
        assert_eq!(config.duration, DEFAULT_DURATION_SECS);
        assert_eq!(
            config.stages.into_iter().collect::<Vec<_>>(),
            vec![StageKind::LoadTime, StageKind::LoadTest]
        );
    }

    #[test]
    fn test_request_without_config() {
        let req: AssessRequest = serde_json::from_value(json!({"url": "example.com"})).unwrap();
        assert_eq!(req.config, TestConfigOverrides::default());
    }

    #[test]
    fn test_layers_apply_in_order() {
        let settings = TestConfigOverrides {
            concurrent: Some(20),
            duration: Some(60),
            ..Default::default()
        };
        let request = TestConfigOverrides {
            duration: Some(5),
            ..Default::default()
        };
        let config = TestConfig::default().apply(&settings).apply(&request);
        assert_eq!(config.concurrent, 20);
        assert_eq!(config.duration, 5);
    }

    #[test]
    fn test_validate_bounds() {
        let ok = TestConfig::default();
        assert!(ok.validate(100, 300).is_ok());

        let zero = TestConfig {
            concurrent: 0,
            ..TestConfig::default()
        };
        assert!(zero.validate(100, 300).is_err());

        let too_long = TestConfig {
            duration: 301,
            ..TestConfig::default()
        };
        assert!(too_long.validate(100, 300).is_err());

        let empty = TestConfig {
            stages: BTreeSet::new(),
            ..TestConfig::default()
        };
        assert_eq!(empty.validate(100, 300).unwrap_err().kind(), "validation_error");
    }

    #[test]
    fn test_unknown_stage_rejected() {
        let res: Result<AssessRequest, _> = serde_json::from_value(json!({
            "url": "example.com",
            "config": {"stages": ["warp_drive"]}
        }));
        assert!(res.is_err());
    }
}
