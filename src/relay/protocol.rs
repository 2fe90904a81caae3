use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::reminder::ReminderCategory;

/// Bumped whenever a message shape changes.
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderEntry {
    pub id: String,
    pub title: String,
    pub body: String,
    pub trigger_time: DateTime<FixedOffset>,
    pub category: ReminderCategory,
}

/// Foreground to relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum RelayCommand {
    ScheduleReminder { entry: ReminderEntry },
    CancelReminder { id: String },
    ClearAll,
    GetVersion,
    HeartbeatRequest,
    SkipWaiting,
}

/// Relay to every subscribed foreground context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum RelayEvent {
    ReminderTriggered { entry: ReminderEntry },
    Heartbeat { timestamp: DateTime<FixedOffset>, count: usize },
    Version { version: String, protocol: u32 },
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn schedule_command_wire_shape() {
        let entry = ReminderEntry {
            id: "1_晨读_start".into(),
            title: "学习开始".into(),
            body: "英语".into(),
            trigger_time: DateTime::parse_from_rfc3339("2025-06-01T08:00:00+08:00").unwrap(),
            category: ReminderCategory::StudyStart,
        };

        let value = serde_json::to_value(RelayCommand::ScheduleReminder { entry }).unwrap();

        assert_eq!(
            value,
            json!({
                "type": "SCHEDULE_REMINDER",
                "entry": {
                    "id": "1_晨读_start",
                    "title": "学习开始",
                    "body": "英语",
                    "triggerTime": "2025-06-01T08:00:00+08:00",
                    "category": "studyStart"
                }
            })
        );
    }

    #[test]
    fn commands_parse_from_the_page_format() {
        let cancel: RelayCommand =
            serde_json::from_value(json!({"type": "CANCEL_REMINDER", "id": "1_晨读_end"})).unwrap();
        let clear: RelayCommand = serde_json::from_value(json!({"type": "CLEAR_ALL"})).unwrap();

        assert_eq!(cancel, RelayCommand::CancelReminder { id: "1_晨读_end".into() });
        assert_eq!(clear, RelayCommand::ClearAll);
        assert!(serde_json::from_value::<RelayCommand>(json!({"type": "REBOOT"})).is_err());
    }

    #[test]
    fn heartbeat_event_wire_shape() {
        let event = RelayEvent::Heartbeat {
            timestamp: DateTime::parse_from_rfc3339("2025-06-01T08:00:00Z").unwrap(),
            count: 2,
        };

        let value = serde_json::to_value(event).unwrap();

        assert_eq!(value["type"], "HEARTBEAT");
        assert_eq!(value["count"], 2);
    }
}
