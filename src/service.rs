use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::{
    sync::{Mutex, broadcast, watch},
    task::JoinHandle,
};

use crate::{
    clock::{Clock, date_key},
    messages::{EncouragementContext, ReminderMessages, SettingChange},
    notification::{NotificationFallback, Notifier},
    relay::{AssetCache, RelayEvent, RelayHandle},
    reminder::{FiredReminder, ReminderCategory, SubEvent},
    scheduling::{ReminderDelivery, ReminderScheduler},
    settings::{ReminderPreset, ReminderSettings, SettingsStore, VoiceSettings},
    speech::{
        DisplayWakeLock, SpeakRequest, SpeechClient, SpeechEngineArgs, SpeechEngineHandle,
        SpeechPlatform, SpeechState,
    },
    storage::{KeyValueStore, Plan},
};

const TEST_VOICE_TEXT: &str = "这是语音提醒的试听效果";

/// How the background relay is started. Without it reminders only fire from
/// the foreground timers.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub heartbeat_interval: Duration,
    pub cache_timeout: Duration,
    pub asset_cache: Option<AssetCache>,
}

pub struct ServiceDependencies {
    pub store: Arc<dyn KeyValueStore>,
    pub clock: Arc<dyn Clock>,
    pub platform: Arc<dyn SpeechPlatform>,
    pub notifier: Arc<dyn Notifier>,
    pub wake_lock: Arc<dyn DisplayWakeLock>,
    pub language: String,
    pub relay: Option<RelayOptions>,
}

struct Running {
    scheduler: ReminderScheduler,
    speech: SpeechEngineHandle,
    relay: Option<RelayHandle>,
    relay_listener: Option<JoinHandle<()>>,
    loaded: Option<(NaiveDate, Vec<Plan>)>,
}

/// The reminder engine of one user: settings, timers, speech and the
/// background relay, with an explicit `initialize`/`shutdown` lifecycle.
pub struct ReminderService {
    settings_store: SettingsStore,
    settings: watch::Sender<ReminderSettings>,
    clock: Arc<dyn Clock>,
    platform: Arc<dyn SpeechPlatform>,
    notifier: Arc<dyn Notifier>,
    wake_lock: Arc<dyn DisplayWakeLock>,
    language: String,
    relay_options: Option<RelayOptions>,
    messages: Arc<ReminderMessages>,
    running: Mutex<Option<Running>>,
}

impl ReminderService {
    pub fn new(deps: ServiceDependencies) -> Self {
        let (settings, _) = watch::channel(ReminderSettings::default());
        Self {
            settings_store: SettingsStore::new(deps.store),
            settings,
            clock: deps.clock,
            platform: deps.platform,
            notifier: deps.notifier,
            wake_lock: deps.wake_lock,
            language: deps.language,
            relay_options: deps.relay,
            messages: Arc::new(ReminderMessages::default()),
            running: Mutex::new(None),
        }
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            log::warn!("Reminder service is already initialized");
            return Ok(());
        }

        let settings = self.settings_store.load_reminder_settings().await;
        let (enabled, total) = settings.enabled_stats();
        log::info!(
            "Loaded reminder settings: master switch {}, {enabled}/{total} categories enabled",
            if settings.enabled { "on" } else { "off" }
        );
        self.settings.send_replace(settings);

        let relay = self.start_relay().await;
        let speech = SpeechEngineHandle::start(SpeechEngineArgs {
            platform: Arc::clone(&self.platform),
            settings: self.settings.subscribe(),
            fallback: NotificationFallback::new(Arc::clone(&self.notifier)),
            wake_lock: Arc::clone(&self.wake_lock),
            language: self.language.clone(),
        })
        .await?;

        let relay_client = relay.as_ref().map(RelayHandle::client);
        let relay_listener = relay_client
            .as_ref()
            .map(|client| tokio::spawn(listen_to_relay(client.subscribe())));

        // The relay already shows a notification for every time-anchored
        // reminder; the foreground does so itself only when it runs alone.
        let redundant = relay
            .is_none()
            .then(|| NotificationFallback::new(Arc::clone(&self.notifier)));
        let delivery = Arc::new(VoiceDelivery {
            speech: speech.client(),
            settings: self.settings.subscribe(),
            messages: Arc::clone(&self.messages),
            redundant,
        });

        *running = Some(Running {
            scheduler: ReminderScheduler::new(Arc::clone(&self.clock), delivery, relay_client),
            speech,
            relay,
            relay_listener,
            loaded: None,
        });
        log::info!("Reminder service initialized");
        Ok(())
    }

    async fn start_relay(&self) -> Option<RelayHandle> {
        let options = self.relay_options.clone()?;
        match RelayHandle::start(
            Arc::clone(&self.clock),
            Arc::clone(&self.notifier),
            options.asset_cache,
            options.heartbeat_interval,
            options.cache_timeout,
        )
        .await
        {
            Ok(relay) => Some(relay),
            Err(error) => {
                log::warn!("Background relay failed to start, using foreground timers only: {error:#}");
                None
            }
        }
    }

    pub async fn shutdown(&self) {
        let Some(mut running) = self.running.lock().await.take() else {
            return;
        };

        running.scheduler.clear_all();
        running.speech.shutdown().await;
        if let Some(relay) = running.relay {
            relay.shutdown().await;
        }
        if let Some(listener) = running.relay_listener {
            listener.abort();
        }
        log::info!("Reminder service stopped");
    }

    /// Resyncs the timers from the plans stored under `date`'s key.
    pub async fn update_all_task_reminders(
        &self,
        study_data: &HashMap<String, Vec<Plan>>,
        date: NaiveDate,
    ) {
        let plans = study_data.get(&date_key(date)).cloned().unwrap_or_default();
        self.resync_plans(plans, date).await;
    }

    pub async fn resync_plans(&self, plans: Vec<Plan>, date: NaiveDate) {
        let settings = self.settings();
        let mut running = self.running.lock().await;
        let Some(running) = running.as_mut() else {
            log::warn!("Reminder service is not initialized, ignoring plans for {date}");
            return;
        };

        running.scheduler.resync(&plans, date, &settings);
        running.loaded = Some((date, plans));
    }

    pub async fn play_task_complete(&self, task_name: &str) {
        let text = self.messages.task_complete(task_name);
        self.speak(SpeakRequest::new(text, ReminderCategory::TaskComplete))
            .await;
    }

    pub async fn play_task_master(&self, task_name: &str, points: u32) {
        let text = self.messages.task_master(task_name, points);
        self.speak(SpeakRequest::new(text, ReminderCategory::TaskMaster))
            .await;
    }

    pub async fn play_setting_confirm(&self, change: &SettingChange) {
        let text = self.messages.setting_confirm(change);
        self.speak(SpeakRequest::new(text, ReminderCategory::SettingConfirm))
            .await;
    }

    pub async fn play_plan_added(&self, plan_name: &str, task_count: usize) {
        let text = self.messages.plan_added(plan_name, task_count);
        self.speak(SpeakRequest::new(text, ReminderCategory::PlanAdded))
            .await;
    }

    pub async fn play_encouragement(&self, context: EncouragementContext) {
        let text = self.messages.encouragement(context);
        self.speak(SpeakRequest::new(text, ReminderCategory::Encouragement))
            .await;
    }

    /// Speaks a sample once with `voice`, leaving the stored settings alone.
    pub async fn test_voice(&self, voice: VoiceSettings) {
        self.speak(SpeakRequest {
            text: TEST_VOICE_TEXT.to_owned(),
            category: None,
            repeat_count: Some(1),
            voice_override: Some(voice),
        })
        .await;
    }

    /// Persists `settings`, applies them to the engine and the timers of the
    /// loaded day, then confirms by voice.
    pub async fn save_settings(&self, mut settings: ReminderSettings) {
        settings.voice = settings.voice.clamped();
        self.settings_store.save_reminder_settings(&settings).await;
        self.settings.send_replace(settings.clone());

        {
            let mut running = self.running.lock().await;
            if let Some(running) = running.as_mut() {
                if let Some((date, plans)) = &running.loaded {
                    running.scheduler.resync(plans, *date, &settings);
                }
            }
        }

        self.play_setting_confirm(&SettingChange::VoiceSettings).await;
    }

    pub async fn apply_preset(&self, preset: ReminderPreset) {
        let mut settings = self.settings();
        settings.apply_preset(preset);
        log::info!("Applying reminder preset {preset:?}");
        self.save_settings(settings).await;
    }

    pub fn settings(&self) -> ReminderSettings {
        self.settings.borrow().clone()
    }

    pub fn enabled_stats(&self) -> (usize, usize) {
        self.settings.borrow().enabled_stats()
    }

    pub async fn speech_state(&self) -> Option<SpeechState> {
        let running = self.running.lock().await;
        running.as_ref().map(|running| running.speech.client().state())
    }

    /// `(start, end)` timers armed for the loaded day.
    pub async fn armed_counts(&self) -> (usize, usize) {
        let running = self.running.lock().await;
        running
            .as_ref()
            .map(|running| running.scheduler.armed_counts())
            .unwrap_or_default()
    }

    async fn speak(&self, request: SpeakRequest) {
        let running = self.running.lock().await;
        match running.as_ref() {
            Some(running) => running.speech.client().speak(request),
            None => log::warn!("Reminder service is not initialized, not speaking {:?}", request.text),
        }
    }
}

/// Turns a fired time-anchored timer into speech.
struct VoiceDelivery {
    speech: SpeechClient,
    settings: watch::Receiver<ReminderSettings>,
    messages: Arc<ReminderMessages>,
    redundant: Option<NotificationFallback>,
}

#[async_trait]
impl ReminderDelivery for VoiceDelivery {
    async fn deliver(&self, reminder: &FiredReminder) {
        let category = reminder.event.category();
        if !self.settings.borrow().is_enabled(category) {
            log::debug!("Skipping {} of {}, {category} is disabled", reminder.event.suffix(), reminder.key);
            return;
        }

        let text = match reminder.event {
            SubEvent::Start => self.messages.study_start(
                &reminder.task_name,
                &reminder.key.plan_name,
                &reminder.slot,
            ),
            SubEvent::End => self.messages.study_end(&reminder.task_name),
        };
        log::info!("Reminder {} {} fired", reminder.key, reminder.event.suffix());

        if let Some(fallback) = &self.redundant {
            fallback.notify(ReminderMessages::title(category), &text);
        }
        self.speech.speak(SpeakRequest::new(text, category));
    }
}

async fn listen_to_relay(mut events: broadcast::Receiver<RelayEvent>) {
    loop {
        match events.recv().await {
            Ok(RelayEvent::ReminderTriggered { entry }) => {
                log::debug!("Relay triggered {} at {}", entry.id, entry.trigger_time);
            }
            Ok(RelayEvent::Heartbeat { timestamp, count }) => {
                log::debug!("Relay heartbeat at {timestamp}: {count} armed");
            }
            Ok(RelayEvent::Version { version, protocol }) => {
                log::info!("Relay version {version}, protocol {protocol}");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("Missed {skipped} relay events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
