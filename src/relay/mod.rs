mod asset_cache;
mod protocol;

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{
    actor::{self, Actor, ActorContext, ActorHandle, ActorReference, ActorStatus},
    clock::Clock,
    notification::Notifier,
    scheduling::ScheduledTimer,
};

pub use asset_cache::{AssetCache, AssetError, CacheReport};
pub use protocol::{PROTOCOL_VERSION, RelayCommand, RelayEvent, ReminderEntry};

const EVENT_CAPACITY: usize = 64;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("the background relay is not running")]
    Unavailable,
}

/// Mirrors scheduled reminders in a context of its own, so that they are
/// still shown when nothing in the foreground is listening.
pub struct BackgroundRelay;

pub enum RelayMessage {
    Command(RelayCommand),
    Fire { id: String, generation: u64 },
    HeartbeatTick,
    Shutdown,
}

pub struct RelayArgs {
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub asset_cache: Option<Arc<AssetCache>>,
    pub events: broadcast::Sender<RelayEvent>,
    pub version: String,
    pub heartbeat_interval: Duration,
    pub cache_timeout: Duration,
}

struct ArmedEntry {
    entry: ReminderEntry,
    generation: u64,
    _timer: ScheduledTimer,
}

pub struct RelayState {
    armed: HashMap<String, ArmedEntry>,
    next_generation: u64,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    events: broadcast::Sender<RelayEvent>,
    version: String,
    _heartbeat: ScheduledTimer,
}

impl RelayState {
    fn schedule(&mut self, entry: ReminderEntry, self_ref: &ActorReference<BackgroundRelay>) {
        let now = self.clock.now().fixed_offset();

        // A copy that is already due but whose timer message is still queued
        // is delivered before being replaced.
        if let Some(previous) = self.armed.remove(&entry.id) {
            if previous.entry.trigger_time <= now {
                self.deliver(previous.entry);
            }
        }

        let delay = entry.trigger_time.signed_duration_since(now);
        let Ok(delay) = delay.to_std() else {
            log::info!(
                "Dropping reminder {} for {}, it is already in the past",
                entry.id,
                entry.trigger_time
            );
            return;
        };
        if delay.is_zero() {
            log::info!("Dropping reminder {}, it is due right now", entry.id);
            return;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let timer = fire_after(self_ref.clone(), entry.id.clone(), generation, delay);

        log::debug!(
            "Relay armed {} for {} ({} armed)",
            entry.id,
            entry.trigger_time,
            self.armed.len() + 1
        );
        self.armed.insert(
            entry.id.clone(),
            ArmedEntry {
                entry,
                generation,
                _timer: timer,
            },
        );
    }

    fn fire(&mut self, id: &str, generation: u64) {
        let is_current = self
            .armed
            .get(id)
            .is_some_and(|armed| armed.generation == generation);
        if !is_current {
            log::debug!("Ignoring stale relay timer for {id}");
            return;
        }

        if let Some(armed) = self.armed.remove(id) {
            self.deliver(armed.entry);
        }
    }

    fn deliver(&self, entry: ReminderEntry) {
        log::info!("Relay firing {}", entry.id);
        self.notifier.notify(&entry.title, &entry.body);
        self.broadcast(RelayEvent::ReminderTriggered { entry });
    }

    fn heartbeat(&self) {
        let count = self.armed.len();
        log::debug!("Relay heartbeat, {count} armed");
        self.broadcast(RelayEvent::Heartbeat {
            timestamp: self.clock.now().fixed_offset(),
            count,
        });
    }

    fn broadcast(&self, event: RelayEvent) {
        // No subscriber is a normal state, the notification has already been shown.
        let _ = self.events.send(event);
    }
}

fn fire_after(
    reference: ActorReference<BackgroundRelay>,
    id: String,
    generation: u64,
    delay: Duration,
) -> ScheduledTimer {
    let token = CancellationToken::new();
    let task_token = token.clone();
    let handle = tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = task_token.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                reference.send_message(RelayMessage::Fire { id, generation });
            }
        }
    });
    ScheduledTimer::new(handle, token)
}

fn heartbeat_ticker(reference: ActorReference<BackgroundRelay>, period: Duration) -> ScheduledTimer {
    let token = CancellationToken::new();
    let task_token = token.clone();
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                biased;
                _ = task_token.cancelled() => break,
                _ = interval.tick() => {
                    if !reference.send_message(RelayMessage::HeartbeatTick) {
                        break;
                    }
                }
            }
        }
    });
    ScheduledTimer::new(handle, token)
}

#[async_trait]
impl Actor for BackgroundRelay {
    type Message = RelayMessage;
    type State = RelayState;
    type InitArgs = RelayArgs;

    fn handle_message(
        msg: Self::Message,
        mut state: Self::State,
        context: &ActorContext<Self>,
    ) -> anyhow::Result<ActorStatus<Self::State>> {
        match msg {
            RelayMessage::Command(RelayCommand::ScheduleReminder { entry }) => {
                state.schedule(entry, context.self_ref());
            }
            RelayMessage::Command(RelayCommand::CancelReminder { id }) => {
                if state.armed.remove(&id).is_some() {
                    log::debug!("Relay cancelled {id}");
                }
            }
            RelayMessage::Command(RelayCommand::ClearAll) => {
                log::debug!("Relay clearing {} armed reminders", state.armed.len());
                state.armed.clear();
            }
            RelayMessage::Command(RelayCommand::GetVersion) => {
                state.broadcast(RelayEvent::Version {
                    version: state.version.clone(),
                    protocol: PROTOCOL_VERSION,
                });
            }
            RelayMessage::Command(RelayCommand::HeartbeatRequest) | RelayMessage::HeartbeatTick => {
                state.heartbeat();
            }
            RelayMessage::Command(RelayCommand::SkipWaiting) => {
                log::debug!("Relay is already active, ignoring SKIP_WAITING");
            }
            RelayMessage::Fire { id, generation } => state.fire(&id, generation),
            RelayMessage::Shutdown => {
                log::info!("Background relay stopping with {} armed", state.armed.len());
                return Ok(ActorStatus::Stop);
            }
        }

        Ok(ActorStatus::Continue(state))
    }

    async fn init_state(
        args: Self::InitArgs,
        context: &ActorContext<Self>,
    ) -> anyhow::Result<Self::State> {
        if let Some(cache) = &args.asset_cache {
            match tokio::time::timeout(args.cache_timeout, cache.activate()).await {
                Ok(Ok(report)) => log::info!(
                    "Asset cache {} activated: {} cached, {} failed, {} stale removed",
                    cache.version(),
                    report.cached,
                    report.failed,
                    report.removed_versions.len()
                ),
                Ok(Err(error)) => log::warn!("Asset cache activation failed: {error}"),
                Err(_) => log::warn!(
                    "Asset cache activation did not finish within {:?}, continuing without it",
                    args.cache_timeout
                ),
            }
        }

        Ok(RelayState {
            armed: HashMap::new(),
            next_generation: 0,
            clock: args.clock,
            notifier: args.notifier,
            events: args.events,
            version: args.version,
            _heartbeat: heartbeat_ticker(context.self_ref().clone(), args.heartbeat_interval),
        })
    }
}

/// Sending side of the relay, handed to the scheduler.
#[derive(Clone)]
pub struct RelayClient {
    reference: ActorReference<BackgroundRelay>,
    events: broadcast::Sender<RelayEvent>,
}

impl RelayClient {
    pub fn send(&self, command: RelayCommand) -> Result<(), RelayError> {
        if self.reference.send_message(RelayMessage::Command(command)) {
            Ok(())
        } else {
            Err(RelayError::Unavailable)
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RelayEvent> {
        self.events.subscribe()
    }
}

pub struct RelayHandle {
    actor: ActorHandle<BackgroundRelay>,
    client: RelayClient,
    asset_cache: Option<Arc<AssetCache>>,
}

impl RelayHandle {
    pub async fn start(
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn Notifier>,
        asset_cache: Option<AssetCache>,
        heartbeat_interval: Duration,
        cache_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let asset_cache = asset_cache.map(Arc::new);
        let version = asset_cache
            .as_ref()
            .map(|cache| cache.version().to_owned())
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_owned());

        let actor = actor::start::<BackgroundRelay>(RelayArgs {
            clock,
            notifier,
            asset_cache: asset_cache.clone(),
            events: events.clone(),
            version,
            heartbeat_interval,
            cache_timeout,
        })
        .await?;

        let client = RelayClient {
            reference: actor.actor_reference().clone(),
            events,
        };

        Ok(Self {
            actor,
            client,
            asset_cache,
        })
    }

    pub fn client(&self) -> RelayClient {
        self.client.clone()
    }

    pub fn asset_cache(&self) -> Option<&AssetCache> {
        self.asset_cache.as_deref()
    }

    pub async fn shutdown(self) {
        self.actor
            .actor_reference()
            .send_message(RelayMessage::Shutdown);
        self.actor.join(SHUTDOWN_TIMEOUT).await;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta};
    use chrono_tz::{Asia::Shanghai, Tz};

    use crate::{
        clock::{VirtualClock, at_time_on},
        reminder::ReminderCategory,
        test_utils::{RecordingNotifier, TempDir},
    };

    use super::*;

    const HEARTBEAT: Duration = Duration::from_secs(60);

    struct TestContext {
        notifier: Arc<RecordingNotifier>,
        relay: RelayHandle,
        origin: DateTime<Tz>,
    }

    impl TestContext {
        async fn new() -> Self {
            let origin = at_time_on(
                Shanghai,
                NaiveDate::from_ymd_opt(2025, 5, 31).unwrap(),
                NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
            );
            let notifier = Arc::new(RecordingNotifier::default());
            let relay = RelayHandle::start(
                Arc::new(VirtualClock::new(origin)),
                notifier.clone(),
                None,
                HEARTBEAT,
                Duration::from_secs(1),
            )
            .await
            .unwrap();

            Self {
                notifier,
                relay,
                origin,
            }
        }

        fn entry(&self, id: &str, after: TimeDelta) -> ReminderEntry {
            ReminderEntry {
                id: id.to_owned(),
                title: "学习开始".to_owned(),
                body: id.to_owned(),
                trigger_time: (self.origin + after).fixed_offset(),
                category: ReminderCategory::StudyStart,
            }
        }

        fn schedule(&self, entry: ReminderEntry) {
            self.relay
                .client()
                .send(RelayCommand::ScheduleReminder { entry })
                .unwrap();
        }
    }

    async fn wait(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn triggered_ids(events: &mut broadcast::Receiver<RelayEvent>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let RelayEvent::ReminderTriggered { entry } = event {
                ids.push(entry.id);
            }
        }
        ids
    }

    #[tokio::test(start_paused = true)]
    async fn fires_notification_and_broadcasts() {
        let ctx = TestContext::new().await;
        let mut events = ctx.relay.client().subscribe();

        ctx.schedule(ctx.entry("a", TimeDelta::minutes(30)));
        wait(Duration::from_secs(29 * 60)).await;
        assert!(ctx.notifier.titles().is_empty());

        wait(Duration::from_secs(2 * 60)).await;

        assert_eq!(ctx.notifier.bodies(), ["a"]);
        assert_eq!(triggered_ids(&mut events), ["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn past_trigger_is_dropped_without_error() {
        let ctx = TestContext::new().await;
        let mut events = ctx.relay.client().subscribe();

        ctx.schedule(ctx.entry("late", TimeDelta::minutes(-5)));
        ctx.relay.client().send(RelayCommand::HeartbeatRequest).unwrap();
        wait(Duration::from_secs(1)).await;

        let counts: Vec<usize> = std::iter::from_fn(|| events.try_recv().ok())
            .filter_map(|event| match event {
                RelayEvent::Heartbeat { count, .. } => Some(count),
                _ => None,
            })
            .collect();
        assert_eq!(counts, [0]);
        assert!(ctx.notifier.titles().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_and_cleared_entries_never_fire() {
        let ctx = TestContext::new().await;
        let client = ctx.relay.client();

        ctx.schedule(ctx.entry("a", TimeDelta::minutes(10)));
        ctx.schedule(ctx.entry("b", TimeDelta::minutes(10)));
        ctx.schedule(ctx.entry("c", TimeDelta::minutes(10)));
        client
            .send(RelayCommand::CancelReminder { id: "a".into() })
            .unwrap();
        client
            .send(RelayCommand::CancelReminder { id: "unknown".into() })
            .unwrap();
        wait(Duration::from_secs(60)).await;
        assert_eq!(ctx.notifier.titles().len(), 0);

        client.send(RelayCommand::CancelReminder { id: "b".into() }).unwrap();
        client.send(RelayCommand::ClearAll).unwrap();
        wait(Duration::from_secs(20 * 60)).await;

        assert!(ctx.notifier.titles().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_armed_copy() {
        let ctx = TestContext::new().await;

        ctx.schedule(ctx.entry("a", TimeDelta::minutes(10)));
        ctx.schedule(ctx.entry("a", TimeDelta::minutes(20)));
        wait(Duration::from_secs(15 * 60)).await;
        assert!(ctx.notifier.titles().is_empty());

        wait(Duration::from_secs(10 * 60)).await;
        assert_eq!(ctx.notifier.bodies(), ["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_heartbeat_reports_armed_count() {
        let ctx = TestContext::new().await;
        let mut events = ctx.relay.client().subscribe();

        ctx.schedule(ctx.entry("a", TimeDelta::hours(2)));
        ctx.schedule(ctx.entry("b", TimeDelta::hours(3)));
        wait(HEARTBEAT + Duration::from_secs(1)).await;

        let heartbeat = std::iter::from_fn(|| events.try_recv().ok())
            .find(|event| matches!(event, RelayEvent::Heartbeat { .. }));
        assert!(matches!(heartbeat, Some(RelayEvent::Heartbeat { count: 2, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_version_and_stops() {
        let ctx = TestContext::new().await;
        let client = ctx.relay.client();
        let mut events = client.subscribe();

        client.send(RelayCommand::GetVersion).unwrap();
        client.send(RelayCommand::SkipWaiting).unwrap();
        wait(Duration::from_millis(10)).await;

        assert!(matches!(
            events.try_recv(),
            Ok(RelayEvent::Version { protocol: PROTOCOL_VERSION, .. })
        ));

        ctx.relay.shutdown().await;
        assert!(matches!(
            client.send(RelayCommand::ClearAll),
            Err(RelayError::Unavailable)
        ));
    }

    #[tokio::test]
    async fn activation_populates_the_asset_cache() {
        let dir = TempDir::new("relay-assets");
        std::fs::create_dir_all(dir.path().join("public")).unwrap();
        std::fs::write(dir.path().join("public/index.html"), "<html>").unwrap();
        let origin: DateTime<FixedOffset> =
            DateTime::parse_from_rfc3339("2025-05-31T07:00:00+08:00").unwrap();

        let relay = RelayHandle::start(
            Arc::new(VirtualClock::new(origin.with_timezone(&Shanghai))),
            Arc::new(RecordingNotifier::default()),
            Some(AssetCache::new(
                dir.path().join("cache"),
                "v-test",
                dir.path().join("public"),
                vec!["/".into(), "/icon-72.png".into()],
            )),
            HEARTBEAT,
            Duration::from_secs(10),
        )
        .await
        .unwrap();

        assert!(dir.path().join("cache/v-test/index.html").exists());
        let cache = relay.asset_cache().unwrap();
        assert_eq!(cache.fetch("/index.html").await.unwrap(), b"<html>");
    }
}
