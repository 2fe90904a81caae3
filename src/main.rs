use std::sync::Arc;

use anyhow::Context;
use study_reminder::{
    appsettings::AppSettings,
    clock::{Clock, DayWatcher, SystemClock},
    notification::DesktopNotifier,
    relay::AssetCache,
    service::{RelayOptions, ReminderService, ServiceDependencies},
    speech::{EspeakPlatform, NoWakeLock, NullSpeechPlatform, SpeechPlatform},
    storage::{DailyStats, InMemoryStore, JsonFileStore, KeyValueStore, StudyStore},
};

fn init_logging() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned());
    pretty_env_logger::formatted_timed_builder()
        .parse_filters(&filter)
        .init();
}

async fn open_store(settings: &AppSettings) -> Arc<dyn KeyValueStore> {
    match JsonFileStore::open(&settings.storage.path).await {
        Ok(store) => Arc::new(store),
        Err(error) => {
            log::warn!(
                "Cannot open storage {}: {error}; nothing will be kept after exit",
                settings.storage.path.display()
            );
            Arc::new(InMemoryStore::new())
        }
    }
}

fn relay_options(settings: &AppSettings) -> Option<RelayOptions> {
    let background = &settings.background;
    if !background.enabled {
        log::info!("Background relay disabled by configuration");
        return None;
    }

    Some(RelayOptions {
        heartbeat_interval: background.heartbeat_interval(),
        cache_timeout: background.cache_timeout(),
        asset_cache: background.asset_dir.as_ref().map(|asset_dir| {
            AssetCache::new(
                background.cache_dir.clone(),
                background.cache_version.clone(),
                asset_dir.clone(),
                background.assets.clone(),
            )
        }),
    })
}

async fn resync_day(service: &ReminderService, study: &StudyStore, date: chrono::NaiveDate) {
    let plans = study.plans_for(date).await;
    let stats = DailyStats::from_plans(&plans);
    log::info!(
        "Plans for {date}: {} plans, {}% mastered, {}/{} points",
        stats.total_plans,
        stats.completion_rate,
        stats.earned_points,
        stats.total_points
    );
    service.resync_plans(plans, date).await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(error) = dotenvy::dotenv() {
        if !error.not_found() {
            eprintln!("Ignoring unreadable .env file: {error}");
        }
    }
    init_logging();

    let settings = AppSettings::load().context("Failed to load appsettings")?;
    log::info!("Starting study reminders in {}", settings.timezone);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(settings.timezone));
    let store = open_store(&settings).await;
    let platform: Arc<dyn SpeechPlatform> = if settings.speech.enabled {
        Arc::new(EspeakPlatform::new(settings.speech.program.clone()))
    } else {
        Arc::new(NullSpeechPlatform)
    };

    let service = ReminderService::new(ServiceDependencies {
        store: Arc::clone(&store),
        clock: Arc::clone(&clock),
        platform,
        notifier: Arc::new(DesktopNotifier::new(
            settings.notifications.enabled,
            settings.notifications.app_name.clone(),
        )),
        wake_lock: Arc::new(NoWakeLock),
        language: settings.speech.language.clone(),
        relay: relay_options(&settings),
    });
    service.initialize().await?;

    let study = StudyStore::new(store);
    let date = study
        .take_selected_date()
        .await
        .unwrap_or_else(|| clock.today());
    resync_day(&service, &study, date).await;

    let mut day = DayWatcher::new(Arc::clone(&clock), clock.today());
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(error) = result {
                    log::error!("Cannot listen for Ctrl-C: {error}");
                }
                break;
            }
            today = day.changed() => {
                log::info!("Day changed to {today}, resyncing reminders");
                resync_day(&service, &study, today).await;
            }
        }
    }

    log::info!("Shutting down");
    service.shutdown().await;
    Ok(())
}
