use std::{path::PathBuf, time::Duration};

use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct StorageSettings {
    pub path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("study-reminder.json"),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SpeechSettings {
    pub enabled: bool,
    pub program: String,
    pub language: String,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "espeak-ng".to_owned(),
            language: "zh-CN".to_owned(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub app_name: String,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            app_name: "学习打卡".to_owned(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BackgroundSettings {
    pub enabled: bool,
    pub cache_dir: PathBuf,
    pub cache_version: String,
    pub asset_dir: Option<PathBuf>,
    pub assets: Vec<String>,
    pub heartbeat_interval_secs: u64,
    pub cache_timeout_secs: u64,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_dir: PathBuf::from("cache"),
            cache_version: "study-checkin-v1.0.0".to_owned(),
            asset_dir: None,
            assets: [
                "/",
                "/index.html",
                "/manifest.json",
                "/icon-72.png",
                "/icon-96.png",
                "/icon-144.png",
                "/icon-192.png",
                "/icon-512.png",
            ]
            .map(str::to_owned)
            .to_vec(),
            heartbeat_interval_secs: 60,
            cache_timeout_secs: 10,
        }
    }
}

impl BackgroundSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_secs(self.cache_timeout_secs)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub speech: SpeechSettings,
    #[serde(default)]
    pub notifications: NotificationSettings,
    #[serde(default)]
    pub background: BackgroundSettings,
}

fn default_timezone() -> Tz {
    chrono_tz::Asia::Shanghai
}

impl AppSettings {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("appsettings").required(true))
            .add_source(File::with_name("appsettings.local").required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
