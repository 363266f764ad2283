use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::config::AssessorConfig;
use crate::error::AssessError;
use crate::pipeline::request::{TestConfig, TestConfigOverrides};

/// Service-wide request defaults, layered between the built-in defaults and
/// each request's own `config`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PersistentSettings {
    #[serde(default)]
    pub defaults: TestConfigOverrides,
}

impl PersistentSettings {
    /// Built-in defaults, then these settings, then the request overrides.
    pub fn resolve(&self, request: &TestConfigOverrides) -> TestConfig {
        TestConfig::default().apply(&self.defaults).apply(request)
    }
}

pub fn settings_path(config: &AssessorConfig) -> Option<PathBuf> {
    config.settings_file.clone()
}

pub fn load_settings(path: &Path) -> PersistentSettings {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring unreadable settings file {:?}: {}", path, e);
            PersistentSettings::default()
        }),
        Err(_) => PersistentSettings::default(),
    }
}

pub fn save_settings(path: &Path, settings: &PersistentSettings) -> Result<(), AssessError> {
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| AssessError::Other(format!("Failed to serialize settings: {}", e)))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, json)?;
    Ok(())
}
