use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, NaiveDate, NaiveTime};
use chrono_tz::Tz;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    clock::{Clock, at_time_on, next_day},
    messages::ReminderMessages,
    relay::{RelayClient, RelayCommand, ReminderEntry},
    reminder::{FiredReminder, ReminderKey, ReminderTask, SubEvent},
    settings::ReminderSettings,
    storage::{Plan, StudyTask},
    time_slot::TimeSlot,
};

use super::{ReminderDelivery, ScheduledTimer};

/// Delays longer than this are logged as suspicious; they still fire.
pub const SUSPICIOUS_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Today's occurrence of `start`, or tomorrow's once today's is no longer in
/// the future. The rollover is exact: a start equal to `now` is tomorrow.
pub fn compute_next_trigger(start: NaiveTime, now: DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = at_time_on(tz, now.date_naive(), start);
    if today <= now {
        at_time_on(tz, next_day(now.date_naive()), start)
    } else {
        today
    }
}

/// The end instant on the base date of the resolved start. A slot that
/// crosses midnight ends on the following day.
pub fn compute_end_trigger(slot: &TimeSlot, start_trigger: DateTime<Tz>) -> DateTime<Tz> {
    let base = start_trigger.date_naive();
    let date = if slot.crosses_midnight() {
        next_day(base)
    } else {
        base
    };
    at_time_on(start_trigger.timezone(), date, slot.end())
}

fn delay_until(fire_at: DateTime<Tz>, now: DateTime<Tz>) -> Duration {
    (fire_at - now).to_std().unwrap_or(Duration::ZERO)
}

/// A sub-event timer and the instant it fires at next.
struct ArmedTimer {
    timer: ScheduledTimer,
    next_fire: watch::Receiver<DateTime<Tz>>,
}

struct ArmedReminder {
    task: ReminderTask,
    start_timer: Option<ArmedTimer>,
    end_timer: Option<ArmedTimer>,
}

/// Owns every armed time-anchored reminder of the loaded day.
///
/// Each registered task gets at most one start and one end timer. Both re-arm
/// themselves for the next day after firing and are mirrored to the
/// background relay when one is attached.
pub struct ReminderScheduler {
    reminders: HashMap<ReminderKey, ArmedReminder>,
    clock: Arc<dyn Clock>,
    delivery: Arc<dyn ReminderDelivery>,
    relay: Option<RelayClient>,
    loaded_date: Option<NaiveDate>,
}

impl ReminderScheduler {
    pub fn new(
        clock: Arc<dyn Clock>,
        delivery: Arc<dyn ReminderDelivery>,
        relay: Option<RelayClient>,
    ) -> Self {
        Self {
            reminders: HashMap::new(),
            clock,
            delivery,
            relay,
            loaded_date: None,
        }
    }

    pub fn register_task(&mut self, task: &StudyTask, plan_name: &str, settings: &ReminderSettings) {
        let key = ReminderKey::new(&task.id, plan_name);
        let Some(slot) = task.parsed_slot() else {
            log::debug!("Task {key} has no usable time slot ({:?})", task.time_slot);
            return;
        };

        self.clear_task(&key);

        if !settings.enabled {
            return;
        }

        let next_start = compute_next_trigger(slot.start(), self.clock.now());
        let next_end = compute_end_trigger(&slot, next_start);
        let reminder = ReminderTask {
            key: key.clone(),
            task_name: task.name.clone(),
            slot,
            next_start,
            next_end,
        };

        let start_timer = settings
            .is_enabled(SubEvent::Start.category())
            .then(|| self.arm(&reminder, plan_name, SubEvent::Start));
        let end_timer = settings
            .is_enabled(SubEvent::End.category())
            .then(|| self.arm(&reminder, plan_name, SubEvent::End));

        if start_timer.is_none() && end_timer.is_none() {
            return;
        }

        self.reminders.insert(
            key,
            ArmedReminder {
                task: reminder,
                start_timer,
                end_timer,
            },
        );
    }

    pub fn clear_task(&mut self, key: &ReminderKey) {
        let Some(armed) = self.reminders.remove(key) else {
            return;
        };

        for (event, timer) in [
            (SubEvent::Start, armed.start_timer),
            (SubEvent::End, armed.end_timer),
        ] {
            if let Some(armed_timer) = timer {
                armed_timer.timer.cancel();
                self.send_to_relay(RelayCommand::CancelReminder {
                    id: key.relay_id(event),
                });
            }
        }
        log::debug!("Cleared reminders of {key}");
    }

    pub fn clear_all(&mut self) {
        let keys: Vec<ReminderKey> = self.reminders.keys().cloned().collect();
        for key in &keys {
            self.clear_task(key);
        }
    }

    pub fn resync(&mut self, plans: &[Plan], date: NaiveDate, settings: &ReminderSettings) {
        self.clear_all();
        self.loaded_date = Some(date);

        for plan in plans {
            for task in plan.tasks.iter().filter(|task| !task.time_slot.trim().is_empty()) {
                self.register_task(task, &plan.name, settings);
            }
        }

        let (starts, ends) = self.armed_counts();
        log::info!(
            "Resynced reminders for {date}: {} tasks, {starts} start and {ends} end timers",
            self.reminders.len()
        );
    }

    pub fn loaded_date(&self) -> Option<NaiveDate> {
        self.loaded_date
    }

    pub fn len(&self) -> usize {
        self.reminders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reminders.is_empty()
    }

    pub fn contains(&self, key: &ReminderKey) -> bool {
        self.reminders.contains_key(key)
    }

    /// The armed reminder with the instants its timers will fire at next.
    pub fn reminder(&self, key: &ReminderKey) -> Option<ReminderTask> {
        let armed = self.reminders.get(key)?;
        let next_fire = |timer: &Option<ArmedTimer>, fallback: DateTime<Tz>| {
            timer
                .as_ref()
                .map_or(fallback, |timer| *timer.next_fire.borrow())
        };

        Some(ReminderTask {
            next_start: next_fire(&armed.start_timer, armed.task.next_start),
            next_end: next_fire(&armed.end_timer, armed.task.next_end),
            ..armed.task.clone()
        })
    }

    /// `(start, end)` timers currently armed.
    pub fn armed_counts(&self) -> (usize, usize) {
        self.reminders.values().fold((0, 0), |(starts, ends), armed| {
            (
                starts + usize::from(armed.start_timer.is_some()),
                ends + usize::from(armed.end_timer.is_some()),
            )
        })
    }

    fn arm(&self, reminder: &ReminderTask, plan_name: &str, event: SubEvent) -> ArmedTimer {
        let fire_at = reminder.next_fire(event);
        let delay = delay_until(fire_at, self.clock.now());
        if delay > SUSPICIOUS_DELAY {
            log::warn!(
                "Reminder {} {} is {delay:?} away, more than a day",
                reminder.key,
                event.suffix()
            );
        }
        log::info!(
            "Armed {} reminder for {} ({}) at {fire_at}",
            event.suffix(),
            reminder.key,
            reminder.slot
        );

        let mirror = RelayMirror {
            relay: self.relay.clone(),
            id: reminder.key.relay_id(event),
            title: ReminderMessages::title(event.category()).to_owned(),
            body: format!("{} · {} · {}", plan_name, reminder.task_name, reminder.slot),
            event,
        };
        mirror.schedule(fire_at);

        let token = CancellationToken::new();
        let task_token = token.clone();
        let clock = Arc::clone(&self.clock);
        let delivery = Arc::clone(&self.delivery);
        let fired = FiredReminder {
            key: reminder.key.clone(),
            task_name: reminder.task_name.clone(),
            slot: reminder.slot,
            event,
            fired_at: fire_at,
        };
        let time_of_day = event.time_of_day(&reminder.slot);
        let (next_fire_tx, next_fire) = watch::channel(fire_at);

        let handle = tokio::spawn(async move {
            let mut fired = fired;
            loop {
                let delay = delay_until(fired.fired_at, clock.now());
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if task_token.is_cancelled() {
                    return;
                }

                delivery.deliver(&fired).await;

                let next_date = next_day(fired.fired_at.date_naive());
                fired.fired_at = at_time_on(fired.fired_at.timezone(), next_date, time_of_day);
                next_fire_tx.send_replace(fired.fired_at);
                if task_token.is_cancelled() {
                    return;
                }
                mirror.schedule(fired.fired_at);
                log::debug!(
                    "Re-armed {} reminder for {} at {}",
                    fired.event.suffix(),
                    fired.key,
                    fired.fired_at
                );
            }
        });

        ArmedTimer {
            timer: ScheduledTimer::new(handle, token),
            next_fire,
        }
    }

    fn send_to_relay(&self, command: RelayCommand) {
        if let Some(relay) = &self.relay {
            if let Err(error) = relay.send(command) {
                log::warn!("Background relay unreachable, keeping foreground timers only: {error}");
            }
        }
    }
}

/// The relay's copy of one sub-event.
struct RelayMirror {
    relay: Option<RelayClient>,
    id: String,
    title: String,
    body: String,
    event: SubEvent,
}

impl RelayMirror {
    fn schedule(&self, fire_at: DateTime<Tz>) {
        let Some(relay) = &self.relay else {
            return;
        };

        let entry = ReminderEntry {
            id: self.id.clone(),
            title: self.title.clone(),
            body: self.body.clone(),
            trigger_time: fire_at.fixed_offset(),
            category: self.event.category(),
        };
        if let Err(error) = relay.send(RelayCommand::ScheduleReminder { entry }) {
            log::warn!("Could not mirror {} to the background relay: {error}", self.id);
        }
    }
}
