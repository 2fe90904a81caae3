use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use crate::{reminder::ReminderCategory, storage::KeyValueStore};

pub const SETTINGS_PREFIX: &str = "voiceReminder_";
pub const DEFAULT_REPEAT_COUNT: u32 = 3;

const ENABLED_KEY: &str = "voiceReminderEnabled";
const VOLUME_KEY: &str = "voiceReminderVolume";
const RATE_KEY: &str = "voiceReminderRate";
const PITCH_KEY: &str = "voiceReminderPitch";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceSettings {
    pub volume: f32,
    pub rate: f32,
    pub pitch: f32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            volume: 0.8,
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

impl VoiceSettings {
    pub fn clamped(self) -> Self {
        let defaults = Self::default();
        Self {
            volume: clamp_or(self.volume, 0.0, 1.0, defaults.volume),
            rate: clamp_or(self.rate, 0.5, 2.0, defaults.rate),
            pitch: clamp_or(self.pitch, 0.5, 2.0, defaults.pitch),
        }
    }
}

fn clamp_or(value: f32, min: f32, max: f32, fallback: f32) -> f32 {
    if value.is_nan() {
        fallback
    } else {
        value.clamp(min, max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategorySettings {
    pub enabled: bool,
    pub repeat_count: u32,
}

impl Default for CategorySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            repeat_count: DEFAULT_REPEAT_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderPreset {
    All,
    None,
    Essential,
}

/// Every reminder preference. Categories are indexed by
/// [`ReminderCategory::index`], so each category always has a record.
#[derive(Debug, Clone, PartialEq)]
pub struct ReminderSettings {
    pub enabled: bool,
    pub voice: VoiceSettings,
    categories: [CategorySettings; ReminderCategory::ALL.len()],
}

impl Default for ReminderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            voice: VoiceSettings::default(),
            categories: Default::default(),
        }
    }
}

impl ReminderSettings {
    pub fn category(&self, category: ReminderCategory) -> CategorySettings {
        self.categories[category.index()]
    }

    pub fn set_category(&mut self, category: ReminderCategory, settings: CategorySettings) {
        self.categories[category.index()] = settings;
    }

    pub fn set_enabled(&mut self, category: ReminderCategory, enabled: bool) {
        self.categories[category.index()].enabled = enabled;
    }

    pub fn set_repeat_count(&mut self, category: ReminderCategory, repeat_count: u32) {
        self.categories[category.index()].repeat_count = repeat_count;
    }

    /// The master switch and the category flag both have to be on.
    pub fn is_enabled(&self, category: ReminderCategory) -> bool {
        self.enabled && self.category(category).enabled
    }

    /// Explicit count, then the category's configured count, then the default.
    pub fn resolve_repeat_count(&self, category: Option<ReminderCategory>, explicit: Option<u32>) -> u32 {
        explicit
            .or_else(|| category.map(|c| self.category(c).repeat_count))
            .unwrap_or(DEFAULT_REPEAT_COUNT)
    }

    pub fn apply_preset(&mut self, preset: ReminderPreset) {
        for category in ReminderCategory::ALL {
            let enabled = match preset {
                ReminderPreset::All => true,
                ReminderPreset::None => false,
                ReminderPreset::Essential => ReminderCategory::ESSENTIAL.contains(&category),
            };
            self.set_enabled(category, enabled);
        }
    }

    /// `(enabled, total)` category counts.
    pub fn enabled_stats(&self) -> (usize, usize) {
        let enabled = self.categories.iter().filter(|c| c.enabled).count();
        (enabled, self.categories.len())
    }
}

/// Typed access to the reminder preferences in the origin's key-value storage.
#[derive(Clone)]
pub struct SettingsStore {
    store: Arc<dyn KeyValueStore>,
}

impl SettingsStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn storage_key(key: &str) -> String {
        format!("{SETTINGS_PREFIX}{key}")
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let storage_key = Self::storage_key(key);
        let raw = match self.store.get_raw(&storage_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return default,
            Err(error) => {
                log::warn!("Failed to read setting {storage_key}: {error}");
                return default;
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|error| {
            log::warn!("Setting {storage_key} holds a corrupt value {raw:?}, using the default: {error}");
            default
        })
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        let storage_key = Self::storage_key(key);
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(error) => {
                log::warn!("Setting {storage_key} could not be encoded: {error}");
                return;
            }
        };

        if let Err(error) = self.store.set_raw(&storage_key, raw).await {
            log::warn!("Failed to save setting {storage_key}: {error}");
        }
    }

    pub async fn load_reminder_settings(&self) -> ReminderSettings {
        let defaults = ReminderSettings::default();
        let mut settings = ReminderSettings {
            enabled: self.get(ENABLED_KEY, defaults.enabled).await,
            voice: VoiceSettings {
                volume: self.get(VOLUME_KEY, defaults.voice.volume).await,
                rate: self.get(RATE_KEY, defaults.voice.rate).await,
                pitch: self.get(PITCH_KEY, defaults.voice.pitch).await,
            }
            .clamped(),
            ..defaults
        };

        for category in ReminderCategory::ALL {
            let fallback = CategorySettings::default();
            let loaded = CategorySettings {
                enabled: self.get(category.enabled_key(), fallback.enabled).await,
                repeat_count: self.get(category.repeat_key(), fallback.repeat_count).await,
            };
            settings.set_category(category, loaded);
        }

        settings
    }

    pub async fn save_reminder_settings(&self, settings: &ReminderSettings) {
        self.set(ENABLED_KEY, &settings.enabled).await;
        self.set(VOLUME_KEY, &settings.voice.volume).await;
        self.set(RATE_KEY, &settings.voice.rate).await;
        self.set(PITCH_KEY, &settings.voice.pitch).await;

        for category in ReminderCategory::ALL {
            let values = settings.category(category);
            self.set(category.enabled_key(), &values.enabled).await;
            self.set(category.repeat_key(), &values.repeat_count).await;
        }
    }
}
