use std::sync::atomic::{AtomicUsize, Ordering};

use crate::{reminder::ReminderCategory, time_slot::TimeSlot};

/// Rotates through a pool so consecutive reminders do not repeat verbatim.
#[derive(Debug, Default)]
pub struct MessagePicker {
    cursor: AtomicUsize,
}

impl MessagePicker {
    pub fn pick(&self, pool: Vec<String>) -> String {
        if pool.is_empty() {
            return String::new();
        }
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % pool.len();
        pool.into_iter().nth(index).unwrap_or_default()
    }
}

pub enum SettingChange {
    TimeSlot { task_name: String, slot: String },
    Points(u32),
    VoiceSettings,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncouragementContext {
    #[default]
    General,
    DailyGoal,
    WeeklyGoal,
}

#[derive(Debug, Default)]
pub struct ReminderMessages {
    picker: MessagePicker,
}

impl ReminderMessages {
    pub fn title(category: ReminderCategory) -> &'static str {
        match category {
            ReminderCategory::StudyStart => "学习开始",
            ReminderCategory::StudyEnd => "学习结束",
            ReminderCategory::TaskComplete => "任务完成",
            ReminderCategory::TaskMaster => "任务掌握",
            ReminderCategory::SettingConfirm => "设置已保存",
            ReminderCategory::PlanAdded => "新的学习计划",
            ReminderCategory::Encouragement => "学习鼓励",
        }
    }

    pub fn study_start(&self, task_name: &str, plan_name: &str, slot: &TimeSlot) -> String {
        let minutes = slot.duration_minutes();
        self.picker.pick(vec![
            format!("{task_name}的时间到了，现在开始学习"),
            format!("{plan_name}：{task_name}，这一段安排了{minutes}分钟"),
            format!("准备好了吗？{task_name}现在开始"),
            format!("收收心，开始{task_name}吧"),
        ])
    }

    pub fn study_end(&self, task_name: &str) -> String {
        self.picker.pick(vec![
            format!("{task_name}这一段结束了，起来活动一下吧"),
            format!("{task_name}完成了一段，别忘了打卡"),
            format!("{task_name}的时间到，可以休息了"),
        ])
    }

    pub fn task_complete(&self, task_name: &str) -> String {
        self.picker.pick(vec![
            format!("{task_name}已经标记为学完"),
            format!("{task_name}学完了，做得好"),
            format!("又完成一项：{task_name}"),
        ])
    }

    pub fn task_master(&self, task_name: &str, points: u32) -> String {
        self.picker.pick(vec![
            format!("{task_name}已经掌握，积分加{points}"),
            format!("掌握了{task_name}，这次拿到{points}分"),
            format!("{task_name}完全掌握，收获{points}积分"),
        ])
    }

    pub fn setting_confirm(&self, change: &SettingChange) -> String {
        match change {
            SettingChange::TimeSlot { task_name, slot } => {
                format!("{task_name}的提醒时间已设为{slot}")
            }
            SettingChange::Points(points) => format!("积分已设为{points}分"),
            SettingChange::VoiceSettings => "语音提醒设置已更新".to_owned(),
            SettingChange::Other => "设置已更新".to_owned(),
        }
    }

    pub fn plan_added(&self, plan_name: &str, task_count: usize) -> String {
        self.picker.pick(vec![
            format!("已添加计划{plan_name}，一共{task_count}项任务"),
            format!("{plan_name}准备好了，{task_count}项任务等你完成"),
        ])
    }

    pub fn encouragement(&self, context: EncouragementContext) -> String {
        let pool = match context {
            EncouragementContext::General => vec![
                "每天多学一点，积少成多",
                "慢一点没关系，重要的是不停下",
                "今天的努力，明天会看见",
            ],
            EncouragementContext::DailyGoal => vec![
                "今天的计划全部完成，真不错",
                "今日目标达成，好好休息一下",
            ],
            EncouragementContext::WeeklyGoal => vec![
                "这一周的目标完成了，给自己点个赞",
                "坚持了一整周，继续保持这个节奏",
            ],
        };
        self.picker.pick(pool.into_iter().map(str::to_owned).collect())
    }
}
