use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

const APP_DIR: &str = "pixel-toaster";
const CONFIG_FILE: &str = "config.toml";

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_TOOL: &str = "ffmpeg";

/// Runtime settings. Loaded once at startup and handed to each component.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub temperature: f32,
    pub log_level: String,
    pub log_to_file: bool,
    pub request_timeout_secs: u64,
    pub ffmpeg_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.1,
            log_level: "info".to_string(),
            log_to_file: false,
            request_timeout_secs: 120,
            ffmpeg_path: DEFAULT_TOOL.to_string(),
        }
    }
}

/// On-disk shape: every key optional, unknown keys rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSettings {
    api_key: Option<String>,
    model: Option<String>,
    base_url: Option<String>,
    temperature: Option<f32>,
    log_level: Option<String>,
    log_to_file: Option<bool>,
    request_timeout_secs: Option<u64>,
    ffmpeg_path: Option<String>,
}

/// `<platform config dir>/pixel-toaster`
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR))
}

pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join(CONFIG_FILE))
}

impl Settings {
    /// Defaults, then the config file, then environment variables, then the
    /// `--model` override. A missing API key is an error.
    pub fn load(model_override: Option<&str>) -> Result<Self> {
        let path = config_path();
        let file_text = match &path {
            Some(p) if p.is_file() => Some(
                fs::read_to_string(p)
                    .with_context(|| format!("failed to read config file {}", p.display()))?,
            ),
            _ => None,
        };

        let mut settings = Self::from_sources(file_text.as_deref(), |key| std::env::var(key).ok())
            .with_context(|| match &path {
                Some(p) => format!("invalid config file {}", p.display()),
                None => "invalid configuration".to_string(),
            })?;

        if let Some(model) = model_override.map(str::trim).filter(|m| !m.is_empty()) {
            settings.model = model.to_string();
        }

        settings.ensure_api_key(path.as_deref())?;
        Ok(settings)
    }

    /// Layers a TOML document and an environment lookup over the defaults.
    pub fn from_sources(
        file_text: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(text) = file_text {
            let file: FileSettings = toml::from_str(text).context("config is not valid TOML")?;
            settings.apply_file(file);
        }

        let lookup = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        if let Some(key) = lookup("OPENAI_API_KEY") {
            settings.api_key = key;
        }
        if let Some(url) = lookup("OPENAI_BASE_URL") {
            settings.base_url = url;
        }
        if let Some(model) = lookup("TOAST_MODEL") {
            settings.model = model;
        }
        if let Some(level) = lookup("TOAST_LOG_LEVEL") {
            settings.log_level = level;
        }
        if let Some(tool) = lookup("TOAST_FFMPEG") {
            settings.ffmpeg_path = tool;
        }

        if !(0.0..=2.0).contains(&settings.temperature) {
            bail!("temperature must be between 0.0 and 2.0, got {}", settings.temperature);
        }
        if settings.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        Ok(settings)
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.api_key {
            self.api_key = v;
        }
        if let Some(v) = file.model {
            self.model = v;
        }
        if let Some(v) = file.base_url {
            self.base_url = v;
        }
        if let Some(v) = file.temperature {
            self.temperature = v;
        }
        if let Some(v) = file.log_level {
            self.log_level = v;
        }
        if let Some(v) = file.log_to_file {
            self.log_to_file = v;
        }
        if let Some(v) = file.request_timeout_secs {
            self.request_timeout_secs = v;
        }
        if let Some(v) = file.ffmpeg_path {
            self.ffmpeg_path = v;
        }
    }

    fn ensure_api_key(&self, path: Option<&Path>) -> Result<()> {
        if !self.api_key.trim().is_empty() {
            return Ok(());
        }
        let location = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("<config dir>/{APP_DIR}/{CONFIG_FILE}"));
        bail!("no API key configured: set OPENAI_API_KEY or add `api_key = \"...\"` to {location}")
    }
}
