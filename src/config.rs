use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::audio::{AudioDeviceConfig, DEFAULT_FRAME_SIZE};
use crate::controller::DEFAULT_ORDER_NUMBER_BASE;
use crate::sales::{AssistantProfile, AssistantTone, PaymentMethod, Product, StaticCatalog, VoiceName};
use crate::session::SessionConfig;

/// Prefix of environment overrides, e.g. `VOICE_POS__ENGINE__MODEL`
pub const ENV_PREFIX: &str = "VOICE_POS";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub business: BusinessConfig,
    #[serde(default)]
    pub orders: OrdersConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "voice-pos".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EngineConfig {
    /// WebSocket endpoint of the live engine
    pub url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub connect_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            model: SessionConfig::default().model,
            api_key_env: "GEMINI_API_KEY".to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl EngineConfig {
    /// API key from the configured environment variable, if set
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
    }
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    /// Drop reply audio beyond this backlog; unset means unbounded
    pub max_backlog_secs: Option<f64>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16000,
            output_sample_rate: 24000,
            frame_size: DEFAULT_FRAME_SIZE,
            max_backlog_secs: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BusinessConfig {
    pub company_name: String,
    #[serde(default)]
    pub voice: VoiceName,
    #[serde(default)]
    pub tone: AssistantTone,
    #[serde(default)]
    pub products: Vec<Product>,
    #[serde(default)]
    pub payment_methods: Vec<PaymentMethod>,
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            company_name: AssistantProfile::default().company_name,
            voice: VoiceName::default(),
            tone: AssistantTone::default(),
            products: Vec::new(),
            payment_methods: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OrdersConfig {
    pub number_base: u64,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            number_base: DEFAULT_ORDER_NUMBER_BASE,
        }
    }
}

impl Config {
    /// Load `path` (extension optional) plus `VOICE_POS__*` overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        settings
            .try_deserialize()
            .with_context(|| format!("Invalid config in {}", path))
    }

    /// Template for every session started by the controller
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            model: self.engine.model.clone(),
            voice: self.business.voice.to_string(),
            input_sample_rate: self.audio.input_sample_rate,
            output_sample_rate: self.audio.output_sample_rate,
            frame_size: self.audio.frame_size,
            connect_timeout: Duration::from_secs(self.engine.connect_timeout_secs),
            max_backlog: self
                .audio
                .max_backlog_secs
                .filter(|secs| *secs > 0.0)
                .map(Duration::from_secs_f64),
            ..SessionConfig::default()
        }
    }

    pub fn device_config(&self) -> AudioDeviceConfig {
        AudioDeviceConfig {
            input_sample_rate: self.audio.input_sample_rate,
            output_sample_rate: self.audio.output_sample_rate,
            ..AudioDeviceConfig::default()
        }
    }

    pub fn profile(&self) -> AssistantProfile {
        AssistantProfile {
            company_name: self.business.company_name.clone(),
            voice: self.business.voice,
            tone: self.business.tone,
        }
    }

    pub fn catalog(&self) -> StaticCatalog {
        StaticCatalog {
            products: self.business.products.clone(),
            payment_methods: self.business.payment_methods.clone(),
        }
    }
}
