use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use shared::protocol::TELEMETRY_TOPIC;
use url::Url;

pub const DEFAULT_CONFIG_FILE: &str = "dashboard.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleSettings {
    pub api_origin: String,
    pub api_prefix: String,
    pub ws_url: String,
    pub topic: String,
    pub reconnect_delay_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            api_origin: "http://localhost:9090".into(),
            api_prefix: "/client/api/v1".into(),
            ws_url: "ws://localhost:9090/ws-stomp".into(),
            topic: TELEMETRY_TOPIC.into(),
            reconnect_delay_ms: 5000,
            request_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_origin: Option<String>,
    api_prefix: Option<String>,
    ws_url: Option<String>,
    topic: Option<String>,
    reconnect_delay_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
}

impl ConsoleSettings {
    /// `origin` + `prefix` with exactly one slash between them.
    pub fn api_base(&self) -> String {
        let origin = self.api_origin.trim_end_matches('/');
        let prefix = self.api_prefix.trim_matches('/');
        if prefix.is_empty() {
            origin.to_string()
        } else {
            format!("{origin}/{prefix}")
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        let origin = Url::parse(&self.api_origin)
            .with_context(|| format!("invalid api origin '{}'", self.api_origin))?;
        if !matches!(origin.scheme(), "http" | "https") {
            bail!("api origin must be http or https, got '{}'", self.api_origin);
        }
        let ws = Url::parse(&self.ws_url)
            .with_context(|| format!("invalid websocket url '{}'", self.ws_url))?;
        if !matches!(ws.scheme(), "ws" | "wss") {
            bail!("websocket url must be ws or wss, got '{}'", self.ws_url);
        }
        if self.topic.trim().is_empty() {
            bail!("telemetry topic must not be empty");
        }
        if self.request_timeout_ms == 0 {
            bail!("request timeout must be positive");
        }
        Ok(())
    }

    fn merge_file(&mut self, file: FileSettings) {
        if let Some(v) = file.api_origin {
            self.api_origin = v;
        }
        if let Some(v) = file.api_prefix {
            self.api_prefix = v;
        }
        if let Some(v) = file.ws_url {
            self.ws_url = v;
        }
        if let Some(v) = file.topic {
            self.topic = v;
        }
        if let Some(v) = file.reconnect_delay_ms {
            self.reconnect_delay_ms = v;
        }
        if let Some(v) = file.request_timeout_ms {
            self.request_timeout_ms = v;
        }
    }

    fn merge_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("COFFEE_API_ORIGIN") {
            self.api_origin = v;
        }
        if let Some(v) = env("APP__API_ORIGIN") {
            self.api_origin = v;
        }

        if let Some(v) = env("COFFEE_API_PREFIX") {
            self.api_prefix = v;
        }
        if let Some(v) = env("APP__API_PREFIX") {
            self.api_prefix = v;
        }

        if let Some(v) = env("COFFEE_WS_URL") {
            self.ws_url = v;
        }
        if let Some(v) = env("APP__WS_URL") {
            self.ws_url = v;
        }

        if let Some(v) = env("APP__TELEMETRY_TOPIC") {
            self.topic = v;
        }

        if let Some(v) = env("APP__RECONNECT_DELAY_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.reconnect_delay_ms = parsed;
            }
        }
        if let Some(v) = env("APP__REQUEST_TIMEOUT_MS") {
            if let Ok(parsed) = v.parse::<u64>() {
                self.request_timeout_ms = parsed;
            }
        }
    }
}

/// Defaults, then the config file, then the process environment.
///
/// An explicit `path` must exist; the default `dashboard.toml` is optional.
pub fn load_settings(path: Option<&Path>) -> Result<ConsoleSettings> {
    load_settings_with(path, |key| std::env::var(key).ok())
}

pub fn load_settings_with(
    path: Option<&Path>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<ConsoleSettings> {
    let mut settings = ConsoleSettings::default();

    let (file, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };
    match fs::read_to_string(&file) {
        Ok(raw) => {
            let parsed = toml::from_str::<FileSettings>(&raw)
                .with_context(|| format!("failed to parse '{}'", file.display()))?;
            settings.merge_file(parsed);
        }
        Err(err) if required => {
            return Err(err).with_context(|| format!("failed to read '{}'", file.display()));
        }
        Err(_) => {}
    }

    settings.merge_env(env);
    Ok(settings)
}
