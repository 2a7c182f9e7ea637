//! Session configuration: model choice, sampling parameters and token budget.
//!
//! Settings live in a small YAML file.  Each field is read on its own, so a
//! corrupt or partial file only costs the fields that are wrong; those fall
//! back to their defaults with a warning.  Every setter persists the whole
//! file immediately.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::message::ChatMessage;
use crate::model::{KnownModel, ModelInfo};
use crate::observability::CONFIG_FALLBACKS;
use crate::utils::fs::write_atomic;

/// Filename of the settings file under the confab home.
pub const CONFIG_FILE: &str = "config.yaml";

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// Default requested completion length.
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Largest accepted sampling temperature.
pub const MAX_TEMPERATURE: f64 = 2.0;

/// Approximate number of characters per token used by [`estimate_cost`].
///
/// [`estimate_cost`]: SessionSettings::estimate_cost
pub const CHARS_PER_TOKEN: f64 = 4.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettingsFile {
    model: KnownModel,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

/// A rough, pre-call price estimate for one turn.
///
/// Input tokens are approximated from character counts and output tokens as
/// half the configured budget.  This is a heuristic and not what the provider
/// will bill.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub input_tokens: f64,
    pub output_tokens: f64,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total: f64,
}

impl CostEstimate {
    /// Estimated tokens for the whole turn, rounded to a whole count.
    pub fn total_tokens(&self) -> u32 {
        (self.input_tokens + self.output_tokens).round().clamp(0.0, u32::MAX as f64) as u32
    }
}

/// The active session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    path: Option<PathBuf>,
    model: KnownModel,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            path: None,
            model: KnownModel::default(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            stream: true,
        }
    }
}

impl SessionSettings {
    /// Loads settings from `path`, falling back field by field.
    ///
    /// Never fails.  A missing file yields the defaults; it is written the
    /// first time a setter runs.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut settings = SessionSettings {
            path: Some(path.clone()),
            ..SessionSettings::default()
        };
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file; using defaults");
                return settings;
            }
            Err(err) => {
                config_fallback(&path, &format!("cannot read settings: {err}"));
                return settings;
            }
        };
        let mapping = match serde_yaml::from_str::<serde_yaml::Value>(&text) {
            Ok(serde_yaml::Value::Mapping(mapping)) => mapping,
            Ok(serde_yaml::Value::Null) => return settings,
            Ok(_) => {
                config_fallback(&path, "settings file is not a mapping");
                return settings;
            }
            Err(err) => {
                config_fallback(&path, &format!("cannot parse settings: {err}"));
                return settings;
            }
        };

        if let Some(model) = field::<KnownModel>(&path, &mapping, "model") {
            settings.model = model;
        }
        if let Some(temperature) = field::<f64>(&path, &mapping, "temperature") {
            match validate_temperature(temperature) {
                Ok(()) => settings.temperature = temperature,
                Err(err) => config_fallback(&path, &err.to_string()),
            }
        }
        if let Some(max_tokens) = field::<u32>(&path, &mapping, "max_tokens") {
            match validate_max_tokens(max_tokens) {
                Ok(()) => settings.max_tokens = max_tokens,
                Err(err) => config_fallback(&path, &err.to_string()),
            }
        }
        if let Some(stream) = field::<bool>(&path, &mapping, "stream") {
            settings.stream = stream;
        }
        settings
    }

    /// Path the settings persist to, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn model(&self) -> KnownModel {
        self.model
    }

    /// Catalog entry of the active model.
    pub fn model_info(&self) -> &'static ModelInfo {
        self.model.info()
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    /// The token budget actually sent: the configured budget capped at the
    /// model's ceiling.
    pub fn effective_max_tokens(&self) -> u32 {
        self.max_tokens.min(self.model.info().max_tokens)
    }

    /// Selects a model from the catalog and persists.
    pub fn set_model(&mut self, id: &str) -> Result<()> {
        let model: KnownModel = id.parse()?;
        self.update(|settings| settings.model = model)
    }

    /// Sets the sampling temperature (0.0 to 2.0) and persists.
    pub fn set_temperature(&mut self, temperature: f64) -> Result<()> {
        validate_temperature(temperature)?;
        self.update(|settings| settings.temperature = temperature)
    }

    /// Sets the requested completion length and persists.
    pub fn set_max_tokens(&mut self, max_tokens: u32) -> Result<()> {
        validate_max_tokens(max_tokens)?;
        self.update(|settings| settings.max_tokens = max_tokens)
    }

    /// Turns streamed replies on or off and persists.
    pub fn set_stream(&mut self, stream: bool) -> Result<()> {
        self.update(|settings| settings.stream = stream)
    }

    /// Estimates the price of sending `messages` with the active model.
    pub fn estimate_cost(&self, messages: &[ChatMessage]) -> CostEstimate {
        let info = self.model.info();
        let characters: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        let input_tokens = characters as f64 / CHARS_PER_TOKEN;
        let output_tokens = f64::from(self.max_tokens) / 2.0;
        let input_cost = input_tokens / 1000.0 * info.input_cost_per_1k;
        let output_cost = output_tokens / 1000.0 * info.output_cost_per_1k;
        CostEstimate {
            input_tokens,
            output_tokens,
            input_cost,
            output_cost,
            total: input_cost + output_cost,
        }
    }

    /// Writes the settings file, if this configuration has one.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = SettingsFile {
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: self.stream,
        };
        let yaml = serde_yaml::to_string(&file)?;
        write_atomic(path, yaml.as_bytes())
    }

    fn update(&mut self, apply: impl FnOnce(&mut Self)) -> Result<()> {
        let previous = self.clone();
        apply(self);
        if let Err(err) = self.save() {
            *self = previous;
            return Err(err);
        }
        Ok(())
    }
}

fn field<T: DeserializeOwned>(path: &Path, mapping: &serde_yaml::Mapping, key: &str) -> Option<T> {
    let value = mapping.get(key)?;
    match serde_yaml::from_value(value.clone()) {
        Ok(value) => Some(value),
        Err(err) => {
            config_fallback(path, &format!("invalid {key}: {err}"));
            None
        }
    }
}

fn config_fallback(path: &Path, message: &str) {
    CONFIG_FALLBACKS.click();
    let err = Error::configuration(message, Some(path.display().to_string()));
    tracing::warn!(error = %err, "using default settings value");
}

fn validate_temperature(temperature: f64) -> Result<()> {
    if (0.0..=MAX_TEMPERATURE).contains(&temperature) {
        Ok(())
    } else {
        Err(Error::validation(
            format!("temperature must be between 0.0 and {MAX_TEMPERATURE}, got {temperature}"),
            Some("temperature".to_string()),
        ))
    }
}

fn validate_max_tokens(max_tokens: u32) -> Result<()> {
    if max_tokens > 0 {
        Ok(())
    } else {
        Err(Error::validation(
            "max_tokens must be positive",
            Some("max_tokens".to_string()),
        ))
    }
}
