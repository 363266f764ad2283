use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;
use url::Url;

use crate::error::AssessError;

/// Bare `host:port[/path]` forms on loopback or private networks.
static PRIVATE_BARE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(localhost|127\.0\.0\.1|192\.168\.\d{1,3}\.\d{1,3}|10\.\d{1,3}\.\d{1,3}\.\d{1,3}):\d{1,5}(/\S*)?$",
    )
    .expect("private host pattern")
});

static PRIVATE_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(localhost|127\.0\.0\.1|192\.168\.\d{1,3}\.\d{1,3}|10\.\d{1,3}\.\d{1,3}\.\d{1,3})$")
        .expect("private host pattern")
});

/// A validated, normalized assessment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetUrl {
    pub url: Url,
    /// Loopback or private-network host; probes never reach out to a remote
    /// provider for these.
    pub private: bool,
}

impl TargetUrl {
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    /// Host and effective port, for connectivity checks.
    pub fn host_port(&self) -> Option<(String, u16)> {
        let host = self.url.host_str()?.to_string();
        let port = self.url.port_or_known_default()?;
        Some((host, port))
    }
}

impl std::fmt::Display for TargetUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.url.as_str())
    }
}

pub fn is_private_host(host: &str) -> bool {
    PRIVATE_HOST.is_match(host)
}

/// Validate raw caller input and normalize it into an absolute http(s) URL.
///
/// Bare private `host:port` inputs get `http://`; any other bare input gets
/// `https://` and must then name a dotted public host.
pub fn parse_target(input: &str) -> Result<TargetUrl, AssessError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(AssessError::Validation("URL is empty".to_string()));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(AssessError::Validation(format!(
            "URL contains whitespace: {}",
            trimmed
        )));
    }

    let bare = !trimmed.contains("://");
    let bare_private = bare && PRIVATE_BARE.is_match(trimmed);
    let candidate = if bare_private {
        format!("http://{}", trimmed)
    } else if bare {
        format!("https://{}", trimmed)
    } else {
        trimmed.to_string()
    };

    let url = Url::parse(&candidate)
        .map_err(|e| AssessError::Validation(format!("{}: {}", trimmed, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(AssessError::Validation(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }

    let host = match url.host_str() {
        Some(h) if !h.is_empty() => h.to_string(),
        _ => {
            return Err(AssessError::Validation(format!(
                "URL has no host: {}",
                trimmed
            )))
        }
    };

    let private = is_private_host(&host);
    // Bare inputs only qualify as a public domain or a private host:port.
    if bare && !bare_private && (private || !host.contains('.')) {
        return Err(AssessError::Validation(format!(
            "'{}' is neither a public domain nor a private host:port",
            trimmed
        )));
    }

    Ok(TargetUrl { url, private })
}
