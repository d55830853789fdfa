use config::{Config, ConfigError, Environment, File};
use rusty_scope::{Channel, ConnectionConfig, Endpoint, TransportKind, WaveformFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub instrument: InstrumentConfig,
    pub logging: LoggingConfig,
    pub waveform: WaveformConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct InstrumentConfig {
    pub kind: TransportKind,
    /// Host name or address for `network`, device path for `local_bus`
    pub endpoint: String,
    pub port: u16,
    pub timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub opc_poll_interval_ms: u64,
    /// Refuse to talk to anything whose `*IDN?` model differs
    pub expected_model: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WaveformConfig {
    pub channel: u8,
    pub format: String,
    pub points: Option<u32>,
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        let defaults = ConnectionConfig::default();
        Self {
            kind: TransportKind::Network,
            endpoint: "192.168.1.100".to_string(),
            port: 5555,
            timeout_ms: defaults.timeout.as_millis() as u64,
            connect_timeout_ms: defaults.connect_timeout.as_millis() as u64,
            opc_poll_interval_ms: defaults.opc_poll_interval.as_millis() as u64,
            expected_model: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            channel: 1,
            format: "BYTE".to_string(),
            points: None,
        }
    }
}

impl AppConfig {
    /// Validate all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instrument.endpoint.trim().is_empty() {
            return Err(ConfigError::Message(
                "instrument.endpoint must not be empty".to_string(),
            ));
        }
        if self.instrument.timeout_ms == 0 {
            return Err(ConfigError::Message(
                "instrument.timeout_ms must be positive".to_string(),
            ));
        }
        Channel::new(self.waveform.channel)
            .map_err(|e| ConfigError::Message(format!("Invalid waveform.channel: {}", e)))?;
        self.waveform
            .format
            .parse::<WaveformFormat>()
            .map_err(|e| ConfigError::Message(format!("Invalid waveform.format: {}", e)))?;
        Ok(())
    }
}

impl InstrumentConfig {
    pub fn connection_config(&self) -> ConnectionConfig {
        let endpoint = match self.kind {
            TransportKind::Network => Endpoint::Network {
                host: self.endpoint.clone(),
                port: self.port,
            },
            TransportKind::LocalBus => Endpoint::LocalBus {
                path: PathBuf::from(&self.endpoint),
            },
        };

        ConnectionConfig {
            endpoint,
            timeout: Duration::from_millis(self.timeout_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            opc_poll_interval: Duration::from_millis(self.opc_poll_interval_ms),
            expected_model: self.expected_model.clone(),
        }
    }
}

/// Load configuration with layered fallbacks: defaults, then the file, then
/// `RUSTY_SCOPE__SECTION__KEY` environment variables.
pub fn load_config(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

    if let Some(path) = config_path {
        if !path.exists() {
            return Err(ConfigError::Message(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        builder = builder.add_source(File::from(path));
    } else {
        for path in ["scope.toml", "config.toml"] {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
                break;
            }
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("RUSTY_SCOPE")
            .separator("__")
            .try_parsing(true),
    );

    let app_config = builder.build()?.try_deserialize::<AppConfig>()?;
    app_config.validate()?;

    Ok(app_config)
}

/// Load configuration, falling back to defaults only when no file was named.
///
/// An explicitly given file that fails to load is an error rather than a
/// silent fallback. When defaults are used, the reason is returned so it can
/// be logged once logging is set up.
pub fn load_config_or_default(
    config_path: Option<&Path>,
) -> Result<(AppConfig, Option<ConfigError>), ConfigError> {
    fall_back_to_defaults(load_config(config_path), config_path.is_some())
}

fn fall_back_to_defaults(
    loaded: Result<AppConfig, ConfigError>,
    explicit: bool,
) -> Result<(AppConfig, Option<ConfigError>), ConfigError> {
    match loaded {
        Ok(config) => Ok((config, None)),
        Err(e) if explicit => Err(e),
        Err(e) => Ok((AppConfig::default(), Some(e))),
    }
}
