use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result};
use client_core::{ClientOptions, ReconnectPolicy};
use serde::Deserialize;
use tracing::warn;
use url::Url;

pub const SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_url: String,
    pub ws_path: String,
    pub image_origin: Option<String>,
    pub response_timeout_secs: Option<u64>,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
    pub reconnect_max_retries: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:3000".into(),
            ws_path: "/ws".into(),
            image_origin: None,
            response_timeout_secs: None,
            reconnect_initial_ms: 500,
            reconnect_max_ms: 10_000,
            reconnect_max_retries: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    server_url: Option<String>,
    ws_path: Option<String>,
    image_origin: Option<String>,
    response_timeout_secs: Option<u64>,
    reconnect_initial_ms: Option<u64>,
    reconnect_max_ms: Option<u64>,
    reconnect_max_retries: Option<u32>,
}

impl Settings {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            server_url: self.server_url.clone(),
            ws_path: self.ws_path.clone(),
            reconnect: ReconnectPolicy {
                initial_delay: Duration::from_millis(self.reconnect_initial_ms),
                max_delay: Duration::from_millis(self.reconnect_max_ms),
                max_retries: self.reconnect_max_retries,
            },
            response_timeout: self
                .response_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    /// Origin that relative image references are resolved against.
    pub fn image_origin_url(&self) -> Result<Url> {
        let origin = self.image_origin.as_deref().unwrap_or(&self.server_url);
        Url::parse(origin).with_context(|| format!("invalid image origin '{origin}'"))
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.server_url {
            self.server_url = v;
        }
        if let Some(v) = file.ws_path {
            self.ws_path = v;
        }
        if let Some(v) = file.image_origin {
            self.image_origin = Some(v);
        }
        if let Some(v) = file.response_timeout_secs {
            self.response_timeout_secs = Some(v);
        }
        if let Some(v) = file.reconnect_initial_ms {
            self.reconnect_initial_ms = v;
        }
        if let Some(v) = file.reconnect_max_ms {
            self.reconnect_max_ms = v;
        }
        if let Some(v) = file.reconnect_max_retries {
            self.reconnect_max_retries = Some(v);
        }
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("CHAT_SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = env("APP__SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = env("APP__WS_PATH") {
            self.ws_path = v;
        }
        if let Some(v) = env("APP__IMAGE_ORIGIN") {
            self.image_origin = Some(v);
        }
        if let Some(v) = parsed_env(&env, "APP__RESPONSE_TIMEOUT_SECS") {
            self.response_timeout_secs = Some(v);
        }
        if let Some(v) = parsed_env(&env, "APP__RECONNECT_INITIAL_MS") {
            self.reconnect_initial_ms = v;
        }
        if let Some(v) = parsed_env(&env, "APP__RECONNECT_MAX_MS") {
            self.reconnect_max_ms = v;
        }
        if let Some(v) = parsed_env(&env, "APP__RECONNECT_MAX_RETRIES") {
            self.reconnect_max_retries = Some(v);
        }
    }
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from(Path::new(SETTINGS_FILE), |key| std::env::var(key).ok())
}

fn load_settings_from(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Settings> {
    let mut settings = Settings::default();

    if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
        let file: FileSettings = toml::from_str(&raw)
            .with_context(|| format!("invalid settings file '{}'", path.display()))?;
        settings.apply_file(file);
    }

    settings.apply_env(env);
    Ok(settings)
}

fn parsed_env<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable setting override");
            None
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
