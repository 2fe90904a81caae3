use serde::{Deserialize, Deserializer, Serialize};

use crate::time_slot::TimeSlot;

pub const STUDY_POINTS_RATIO: f64 = 0.3;
pub const MASTER_POINTS_RATIO: f64 = 0.7;

/// Reads `null` like a missing field, so one blank value does not discard
/// the whole stored day.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudyTask {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub time_slot: String,
    #[serde(deserialize_with = "null_as_default")]
    pub study_completed: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub mastered_completed: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub points: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub earned_points: u32,
}

impl StudyTask {
    pub fn new(id: impl Into<String>, name: impl Into<String>, time_slot: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            time_slot: time_slot.into(),
            ..Default::default()
        }
    }

    pub fn with_points(mut self, points: u32) -> Self {
        self.points = points;
        self
    }

    pub fn parsed_slot(&self) -> Option<TimeSlot> {
        TimeSlot::parse(&self.time_slot)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Plan {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub tasks: Vec<StudyTask>,
}

impl Plan {
    pub fn from_template(id: impl Into<String>, template: &StudyTemplate) -> Self {
        let tasks = template
            .tasks
            .iter()
            .enumerate()
            .map(|(index, task)| StudyTask {
                id: (index + 1).to_string(),
                name: task.name.clone(),
                time_slot: task.time_slot.clone().unwrap_or_default(),
                points: task.points.unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        Self {
            id: id.into(),
            name: template.name.clone(),
            tasks,
        }
    }

    pub fn stats(&self) -> PlanStats {
        let total_tasks = self.tasks.len();
        let completed_tasks = self
            .tasks
            .iter()
            .filter(|task| task.mastered_completed)
            .count();

        PlanStats {
            total_tasks,
            completed_tasks,
            completion_rate: percentage(completed_tasks, total_tasks),
            total_points: self.tasks.iter().map(|task| task.points).sum(),
            earned_points: self.tasks.iter().map(calculate_task_earned_points).sum(),
        }
    }
}

/// Built-in plan offered when nothing has been saved as the default yet.
pub fn builtin_default_plan(id: impl Into<String>) -> Plan {
    Plan {
        id: id.into(),
        name: "我的日常学习".to_owned(),
        tasks: vec![
            StudyTask::new("1", "英语学习", "08:00-09:00"),
            StudyTask::new("2", "专业课程", "09:00-10:00"),
            StudyTask::new("3", "阅读时间", "20:00-21:00"),
        ],
    }
}

/// Studying earns 30% of a task's points and mastering it another 70%.
pub fn calculate_task_earned_points(task: &StudyTask) -> u32 {
    let points = f64::from(task.points);
    let mut earned = 0;

    if task.study_completed {
        earned += (points * STUDY_POINTS_RATIO).round() as u32;
    }
    if task.mastered_completed {
        earned += (points * MASTER_POINTS_RATIO).round() as u32;
    }

    earned
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanStats {
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub completion_rate: u32,
    pub total_points: u32,
    pub earned_points: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyStats {
    pub total_plans: usize,
    pub completed_tasks: usize,
    pub completion_rate: u32,
    pub total_points: u32,
    pub earned_points: u32,
}

impl DailyStats {
    pub fn from_plans(plans: &[Plan]) -> Self {
        let stats: Vec<PlanStats> = plans.iter().map(Plan::stats).collect();
        let completed_tasks = stats.iter().map(|s| s.completed_tasks).sum();
        let total_tasks = stats.iter().map(|s| s.total_tasks).sum();

        Self {
            total_plans: plans.len(),
            completed_tasks,
            completion_rate: percentage(completed_tasks, total_tasks),
            total_points: stats.iter().map(|s| s.total_points).sum(),
            earned_points: stats.iter().map(|s| s.earned_points).sum(),
        }
    }
}

fn percentage(part: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    (part as f64 / total as f64 * 100.0).round() as u32
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateTask {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_slot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StudyTemplate {
    pub id: String,
    pub name: String,
    pub content: String,
    pub create_time: String,
    pub tasks: Vec<TemplateTask>,
}

pub struct NewTemplate {
    pub name: String,
    pub content: String,
    pub tasks: Vec<TemplateTask>,
}
