use std::time::Duration;

use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;

use crate::{
    domain::search::{ConcurrencyMode, QuotaPolicy},
    services::{HarvestProfile, ModelSettings, RetryPolicy, GEMINI_BASE_URL},
};

#[derive(Deserialize, Clone, Debug)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub api_keys: ApiKeySettings,
    pub extraction: ExtractionSettings,
    pub harvest: HarvestSettings,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ApplicationSettings {
    pub host: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
}

fn default_max_concurrent_runs() -> usize {
    1
}

#[derive(Deserialize, Clone, Debug, Default)]
pub struct ApiKeySettings {
    #[serde(default)]
    pub gemini: Option<String>,
    #[serde(default)]
    pub openai: Option<String>,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gemini,
    Openai,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ExtractionSettings {
    pub provider: Provider,
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub temperature: f32,
    pub grounded: bool,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    GEMINI_BASE_URL.to_string()
}

impl ExtractionSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn model_settings(&self) -> ModelSettings {
        ModelSettings {
            model: self.model.clone(),
            temperature: self.temperature,
            grounded: self.grounded,
            request_timeout: self.request_timeout(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct HarvestSettings {
    pub parallel: ProfileSettings,
    pub deep: ProfileSettings,
}

impl HarvestSettings {
    pub fn profile(&self, mode: ConcurrencyMode) -> HarvestProfile {
        match mode {
            ConcurrencyMode::Parallel => self.parallel.to_profile(mode),
            ConcurrencyMode::SequentialThrottled => self.deep.to_profile(mode),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct ProfileSettings {
    pub segments: Vec<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub inter_phase_delay_ms: u64,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_retries: u32,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_backoff_ms: u64,
    pub quota_policy: QuotaPolicy,
    pub phone_mandatory: bool,
}

impl ProfileSettings {
    pub fn to_profile(&self, mode: ConcurrencyMode) -> HarvestProfile {
        HarvestProfile {
            mode,
            segments: self.segments.clone(),
            inter_phase_delay: Duration::from_millis(self.inter_phase_delay_ms),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                backoff: Duration::from_millis(self.retry_backoff_ms),
            },
            quota_policy: self.quota_policy,
            phone_mandatory: self.phone_mandatory,
        }
    }
}

pub enum Environment {
    Local,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Local => "local",
            Environment::Production => "production",
        }
    }
}

impl TryFrom<String> for Environment {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "local" => Ok(Environment::Local),
            "production" => Ok(Environment::Production),
            other => Err(format!(
                "{} is not a supported environment. Use either `local` or `production`.",
                other
            )),
        }
    }
}

/// Reads `configuration/base.yaml`, then the file for `APP_ENVIRONMENT`,
/// then `APP_`-prefixed environment variables (`__` separates levels).
pub fn get_configuration() -> Result<Settings, config::ConfigError> {
    let base_path = std::env::current_dir()
        .map_err(|e| config::ConfigError::Message(format!("No current directory: {}", e)))?;
    let configuration_directory = base_path.join("configuration");

    let environment: Environment = std::env::var("APP_ENVIRONMENT")
        .unwrap_or_else(|_| "local".into())
        .try_into()
        .map_err(config::ConfigError::Message)?;
    let environment_filename = format!("{}.yaml", environment.as_str());

    let settings = config::Config::builder()
        .add_source(config::File::from(configuration_directory.join("base.yaml")))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename)).required(false),
        )
        .add_source(
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
