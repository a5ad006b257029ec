use crate::prelude::*;

use serde::Deserialize;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub device: Device,

    #[serde(default = "Config::default_mqtt")]
    pub mqtt: Mqtt,

    #[serde(default = "Config::default_api")]
    pub api: Api,

    #[serde(default = "Config::default_stats")]
    pub stats: Stats,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Device {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Device {
    /// Device serial number, used in the MQTT topic pair.
    pub serial: String,
    /// Numeric cloud device id, used for the HTTP API and cache paths.
    pub id: String,
}

impl Device {
    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn id(&self) -> &str {
        &self.id
    }
} // }}}

// Mqtt {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Mqtt {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_mqtt_host")]
    pub host: String,
    #[serde(default = "Config::default_mqtt_port")]
    pub port: u16,
    #[serde(default = "Config::default_mqtt_username")]
    pub username: String,
    #[serde(default = "Config::default_mqtt_password")]
    pub password: String,

    #[serde(default = "Config::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Mqtt {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn poll_interval_secs(&self) -> u64 {
        self.poll_interval_secs
    }
} // }}}

// Api {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Api {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    #[serde(default = "Config::default_api_base_url")]
    pub base_url: String,

    #[serde(default = "Config::default_api_timeout_secs")]
    pub timeout_secs: u64,
}

impl Api {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
} // }}}

// Stats {{{
#[derive(Clone, Debug, Deserialize)]
pub struct Stats {
    #[serde(default = "Config::default_cache_dir")]
    pub cache_dir: String,

    #[serde(default = "Config::default_tariff")]
    pub tariff_vnd_per_kwh: f64,

    #[serde(default = "Config::default_daily_interval_secs")]
    pub daily_interval_secs: u64,
}

impl Stats {
    pub fn cache_dir(&self) -> &str {
        &self.cache_dir
    }

    pub fn tariff_vnd_per_kwh(&self) -> f64 {
        self.tariff_vnd_per_kwh
    }

    pub fn daily_interval_secs(&self) -> u64 {
        self.daily_interval_secs
    }
} // }}}

pub struct ConfigWrapper {
    config: Arc<Mutex<Config>>,
}

impl Clone for ConfigWrapper {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
        }
    }
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        let config = Config::new(file)?;
        Ok(Self::from_config(config))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(Mutex::new(config)),
        }
    }

    pub fn device(&self) -> Device {
        self.config.lock().unwrap().device.clone()
    }

    pub fn mqtt(&self) -> Mqtt {
        self.config.lock().unwrap().mqtt.clone()
    }

    pub fn api(&self) -> Api {
        self.config.lock().unwrap().api.clone()
    }

    pub fn stats(&self) -> Stats {
        self.config.lock().unwrap().stats.clone()
    }

    pub fn loglevel(&self) -> String {
        self.config.lock().unwrap().loglevel.clone()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        let config: Self = serde_yaml::from_str(&content)?;

        info!("Configuration loaded successfully:");
        info!("  Device:");
        info!("    Serial: {}", config.device.serial);
        info!("    Id: {}", config.device.id);

        info!("  MQTT: {}", if config.mqtt.enabled { "enabled" } else { "disabled" });
        if config.mqtt.enabled {
            info!("    Host: {}", config.mqtt.host);
            info!("    Port: {}", config.mqtt.port);
            info!("    Poll Interval: {}s", config.mqtt.poll_interval_secs);
        }

        info!("  API: {}", if config.api.enabled { "enabled" } else { "disabled" });
        if config.api.enabled {
            info!("    Base URL: {}", config.api.base_url);
            info!("    Timeout: {}s", config.api.timeout_secs);
        }

        info!("  Stats:");
        info!("    Cache Dir: {}", config.stats.cache_dir);
        info!("    Tariff: {} VND/kWh", config.stats.tariff_vnd_per_kwh);
        info!("    Daily Interval: {}s", config.stats.daily_interval_secs);

        info!("  Log Level: {}", config.loglevel);

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.device.serial.is_empty() {
            bail!("device.serial cannot be empty");
        }
        if self.device.id.is_empty() {
            bail!("device.id cannot be empty");
        }

        if self.mqtt.enabled {
            if self.mqtt.port == 0 {
                bail!("mqtt.port must be between 1 and 65535");
            }
            if self.mqtt.host.is_empty() {
                bail!("mqtt.host cannot be empty");
            }
            if self.mqtt.poll_interval_secs == 0 {
                bail!("mqtt.poll_interval_secs must be at least 1");
            }
        }

        if self.api.enabled {
            if self.api.base_url.is_empty() {
                bail!("api.base_url cannot be empty");
            }
            if self.api.timeout_secs == 0 {
                bail!("api.timeout_secs must be at least 1");
            }
        }

        if self.stats.cache_dir.is_empty() {
            bail!("stats.cache_dir cannot be empty");
        }
        if self.stats.tariff_vnd_per_kwh < 0.0 {
            bail!("stats.tariff_vnd_per_kwh cannot be negative");
        }
        if self.stats.daily_interval_secs == 0 {
            bail!("stats.daily_interval_secs must be at least 1");
        }

        Ok(())
    }

    fn default_mqtt() -> Mqtt {
        Mqtt {
            enabled: Self::default_enabled(),
            host: Self::default_mqtt_host(),
            port: Self::default_mqtt_port(),
            username: Self::default_mqtt_username(),
            password: Self::default_mqtt_password(),
            poll_interval_secs: Self::default_poll_interval_secs(),
        }
    }

    fn default_api() -> Api {
        Api {
            enabled: Self::default_enabled(),
            base_url: Self::default_api_base_url(),
            timeout_secs: Self::default_api_timeout_secs(),
        }
    }

    fn default_stats() -> Stats {
        Stats {
            cache_dir: Self::default_cache_dir(),
            tariff_vnd_per_kwh: Self::default_tariff(),
            daily_interval_secs: Self::default_daily_interval_secs(),
        }
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_mqtt_host() -> String {
        "lesvr.suntcn.com".to_string()
    }

    fn default_mqtt_port() -> u16 {
        1886
    }

    fn default_mqtt_username() -> String {
        "appuser".to_string()
    }

    fn default_mqtt_password() -> String {
        "app666".to_string()
    }

    fn default_poll_interval_secs() -> u64 {
        5
    }

    fn default_api_base_url() -> String {
        "http://lesvr.suntcn.com".to_string()
    }

    fn default_api_timeout_secs() -> u64 {
        30
    }

    fn default_cache_dir() -> String {
        ".storage/lumentree_stats".to_string()
    }

    fn default_tariff() -> f64 {
        2900.0
    }

    fn default_daily_interval_secs() -> u64 {
        300
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
