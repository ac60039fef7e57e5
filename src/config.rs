//! Configuration management module
//!
//! Loads and validates environment-based configuration.
//! Designed to be production-ready and easily extensible.

use serde::Deserialize;
use std::env;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Invalid number format in environment variable")]
    ParseError,
}

/// Server configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Sensor simulator configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorSettings {
    /// Whether the background simulator feeds the registered nodes
    pub enabled: bool,
    /// Interval in milliseconds between simulated readings
    pub interval_ms: u64,
}

/// SMS provider configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct SmsSettings {
    pub enabled: bool,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub phone_number: Option<String>,
    /// Provider API base URL, overridable for testing
    pub api_base_url: String,
}

impl SmsSettings {
    /// The provider is usable only when every credential is present.
    pub fn configured(&self) -> bool {
        self.account_sid.is_some() && self.auth_token.is_some() && self.phone_number.is_some()
    }
}

/// Prediction feed configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct PredictionSettings {
    /// Path to the static daily-forecast CSV
    pub csv_path: String,
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server: ServerSettings,
    pub simulator: SimulatorSettings,
    pub sms: SmsSettings,
    pub prediction: PredictionSettings,
}

impl Settings {
    /// Load settings from environment variables
    pub fn from_env() -> Result<Self, SettingsError> {
        let port = env::var("SERVER_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .map_err(|_| SettingsError::ParseError)?;

        let simulator_enabled = env::var("SIMULATOR_ENABLED")
            .unwrap_or_else(|_| "true".into())
            .parse()
            .map_err(|_| SettingsError::ParseError)?;

        let interval_ms = env::var("SIMULATOR_INTERVAL_MS")
            .unwrap_or_else(|_| "10000".into())
            .parse()
            .map_err(|_| SettingsError::ParseError)?;

        let sms_enabled = env::var("SMS_ENABLED")
            .unwrap_or_else(|_| "false".into())
            .parse()
            .map_err(|_| SettingsError::ParseError)?;

        Ok(Self {
            server: ServerSettings {
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
                port,
            },
            simulator: SimulatorSettings {
                enabled: simulator_enabled,
                interval_ms,
            },
            sms: SmsSettings {
                enabled: sms_enabled,
                account_sid: env::var("SMS_ACCOUNT_SID").ok(),
                auth_token: env::var("SMS_AUTH_TOKEN").ok(),
                phone_number: env::var("SMS_PHONE_NUMBER").ok(),
                api_base_url: env::var("SMS_API_BASE_URL")
                    .unwrap_or_else(|_| "https://api.twilio.com".into()),
            },
            prediction: PredictionSettings {
                csv_path: env::var("PREDICTION_CSV_PATH")
                    .unwrap_or_else(|_| "data/cloudburst_forecast.csv".into()),
            },
        })
    }
}
