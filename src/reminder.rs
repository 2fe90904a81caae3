use std::fmt;

use chrono::{DateTime, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::time_slot::TimeSlot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReminderCategory {
    StudyStart,
    StudyEnd,
    TaskComplete,
    TaskMaster,
    SettingConfirm,
    PlanAdded,
    Encouragement,
}

impl ReminderCategory {
    pub const ALL: [ReminderCategory; 7] = [
        ReminderCategory::StudyStart,
        ReminderCategory::StudyEnd,
        ReminderCategory::TaskComplete,
        ReminderCategory::TaskMaster,
        ReminderCategory::SettingConfirm,
        ReminderCategory::PlanAdded,
        ReminderCategory::Encouragement,
    ];

    pub const ESSENTIAL: [ReminderCategory; 3] = [
        ReminderCategory::StudyStart,
        ReminderCategory::StudyEnd,
        ReminderCategory::TaskMaster,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReminderCategory::StudyStart => "studyStart",
            ReminderCategory::StudyEnd => "studyEnd",
            ReminderCategory::TaskComplete => "taskComplete",
            ReminderCategory::TaskMaster => "taskMaster",
            ReminderCategory::SettingConfirm => "settingConfirm",
            ReminderCategory::PlanAdded => "planAdded",
            ReminderCategory::Encouragement => "encouragement",
        }
    }

    pub fn enabled_key(self) -> &'static str {
        match self {
            ReminderCategory::StudyStart => "voiceStudyStart",
            ReminderCategory::StudyEnd => "voiceStudyEnd",
            ReminderCategory::TaskComplete => "voiceTaskComplete",
            ReminderCategory::TaskMaster => "voiceTaskMaster",
            ReminderCategory::SettingConfirm => "voiceSettingConfirm",
            ReminderCategory::PlanAdded => "voicePlanAdded",
            ReminderCategory::Encouragement => "voiceEncouragement",
        }
    }

    pub fn repeat_key(self) -> &'static str {
        match self {
            ReminderCategory::StudyStart => "voiceStudyStartRepeat",
            ReminderCategory::StudyEnd => "voiceStudyEndRepeat",
            ReminderCategory::TaskComplete => "voiceTaskCompleteRepeat",
            ReminderCategory::TaskMaster => "voiceTaskMasterRepeat",
            ReminderCategory::SettingConfirm => "voiceSettingConfirmRepeat",
            ReminderCategory::PlanAdded => "voicePlanAddedRepeat",
            ReminderCategory::Encouragement => "voiceEncouragementRepeat",
        }
    }

    /// Categories fired by a task's time slot rather than by a user action.
    pub fn is_time_anchored(self) -> bool {
        matches!(
            self,
            ReminderCategory::StudyStart | ReminderCategory::StudyEnd
        )
    }
}

impl fmt::Display for ReminderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a scheduled reminder: the same task id may appear in several plans.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReminderKey {
    pub task_id: String,
    pub plan_name: String,
}

impl ReminderKey {
    pub fn new(task_id: impl Into<String>, plan_name: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            plan_name: plan_name.into(),
        }
    }

    pub fn relay_id(&self, event: SubEvent) -> String {
        format!("{self}_{}", event.suffix())
    }
}

impl fmt::Display for ReminderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.task_id, self.plan_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubEvent {
    Start,
    End,
}

impl SubEvent {
    pub fn category(self) -> ReminderCategory {
        match self {
            SubEvent::Start => ReminderCategory::StudyStart,
            SubEvent::End => ReminderCategory::StudyEnd,
        }
    }

    pub fn suffix(self) -> &'static str {
        match self {
            SubEvent::Start => "start",
            SubEvent::End => "end",
        }
    }

    pub fn time_of_day(self, slot: &TimeSlot) -> NaiveTime {
        match self {
            SubEvent::Start => slot.start(),
            SubEvent::End => slot.end(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReminderTask {
    pub key: ReminderKey,
    pub task_name: String,
    pub slot: TimeSlot,
    pub next_start: DateTime<Tz>,
    pub next_end: DateTime<Tz>,
}

impl ReminderTask {
    pub fn next_fire(&self, event: SubEvent) -> DateTime<Tz> {
        match event {
            SubEvent::Start => self.next_start,
            SubEvent::End => self.next_end,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FiredReminder {
    pub key: ReminderKey,
    pub task_name: String,
    pub slot: TimeSlot,
    pub event: SubEvent,
    pub fired_at: DateTime<Tz>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_wire_names_match_settings_names() {
        for category in ReminderCategory::ALL {
            let json = serde_json::to_string(&category).unwrap();

            assert_eq!(json, format!("\"{}\"", category.as_str()));
            assert_eq!(ReminderCategory::ALL[category.index()], category);
        }
    }

    #[test]
    fn relay_ids_distinguish_sub_events() {
        let key = ReminderKey::new("1", "我的日常学习");

        assert_eq!(key.relay_id(SubEvent::Start), "1_我的日常学习_start");
        assert_eq!(key.relay_id(SubEvent::End), "1_我的日常学习_end");
    }
}
