use std::time::Duration;

use url::Url;

use crate::attempts::RetryPolicy;
use crate::error::ConfigError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RESYNC_PERIOD: Duration = Duration::from_secs(30);
pub const DEFAULT_AUTOSAVE_IDLE: Duration = Duration::from_secs(5);

/// Where and how to reach the exam backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub base_url: Url,
    pub api_token: Option<String>,
    pub request_timeout: Duration,
}

/// Cadence of the background work of an active attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    /// Local countdown step.
    pub tick_interval: Duration,
    /// How often remaining time is re-read from the server.
    pub resync_period: Duration,
    /// How long a dirty answer may sit unchanged before it is saved.
    pub autosave_idle: Duration,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            resync_period: DEFAULT_RESYNC_PERIOD,
            autosave_idle: DEFAULT_AUTOSAVE_IDLE,
        }
    }
}

impl SessionTimings {
    fn validate(self) -> Result<Self, ConfigError> {
        for (field, value) in [
            ("tick_interval", self.tick_interval),
            ("resync_period", self.resync_period),
            ("autosave_idle", self.autosave_idle),
        ] {
            if value.is_zero() {
                return Err(ConfigError::Zero { field });
            }
        }
        Ok(self)
    }
}

/// Unvalidated engine settings, typically filled from flags or the environment.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigDraft {
    pub api_base_url: Option<String>,
    pub api_token: Option<String>,
    pub request_timeout: Option<Duration>,
    pub timings: SessionTimings,
    pub retry: RetryPolicy,
}

/// Validated engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub gateway: GatewayConfig,
    pub timings: SessionTimings,
    pub retry: RetryPolicy,
}

impl EngineConfigDraft {
    /// Validate the draft into an `EngineConfig`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the base URL is missing or not http(s), or any
    /// duration or retry bound is zero.
    pub fn validate(self) -> Result<EngineConfig, ConfigError> {
        let raw = self
            .api_base_url
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .ok_or(ConfigError::MissingBaseUrl)?;
        let base_url = parse_base_url(raw)?;

        let api_token = self
            .api_token
            .map(|token| token.trim().to_owned())
            .filter(|token| !token.is_empty());

        let request_timeout = self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        if request_timeout.is_zero() {
            return Err(ConfigError::Zero {
                field: "request_timeout",
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "retry.max_attempts",
            });
        }

        Ok(EngineConfig {
            gateway: GatewayConfig {
                base_url,
                api_token,
                request_timeout,
            },
            timings: self.timings.validate()?,
            retry: self.retry.with_attempt_timeout(request_timeout),
        })
    }
}

impl EngineConfig {
    /// Build a config from `EXAM_*` environment variables.
    ///
    /// Returns `Ok(None)` when `EXAM_API_URL` is not set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for malformed values.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an injectable variable source.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for malformed values.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let Some(api_base_url) = lookup("EXAM_API_URL") else {
            return Ok(None);
        };

        let mut draft = EngineConfigDraft {
            api_base_url: Some(api_base_url),
            api_token: lookup("EXAM_API_TOKEN"),
            ..EngineConfigDraft::default()
        };
        if let Some(secs) = seconds(&lookup, "EXAM_REQUEST_TIMEOUT_SECS")? {
            draft.request_timeout = Some(secs);
        }
        if let Some(secs) = seconds(&lookup, "EXAM_RESYNC_SECS")? {
            draft.timings.resync_period = secs;
        }
        if let Some(secs) = seconds(&lookup, "EXAM_AUTOSAVE_SECS")? {
            draft.timings.autosave_idle = secs;
        }

        draft.validate().map(Some)
    }
}

fn seconds(
    lookup: &impl Fn(&str) -> Option<String>,
    field: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    let Some(raw) = lookup(field) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(|secs| Some(Duration::from_secs(secs)))
        .map_err(|_| ConfigError::InvalidNumber { field, raw })
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw).map_err(|e| ConfigError::InvalidBaseUrl(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidBaseUrl(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }
    // Relative joins drop the last path segment unless the base ends in '/'.
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
