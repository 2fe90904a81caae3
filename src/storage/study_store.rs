use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::clock::{date_key, parse_date_key};

use super::{
    kv_store::{KeyValueStore, StorageError},
    model::{
        NewTemplate, Plan, StudyTemplate, builtin_default_plan, calculate_task_earned_points,
    },
};

const TOTAL_POINTS_KEY: &str = "user_total_points";
const PLANS_KEY_PREFIX: &str = "study_plans_";
const SELECTED_DATE_KEY: &str = "selected_date";
const DEFAULT_PLAN_KEY: &str = "default_study_plan";
const TEMPLATES_KEY: &str = "study_templates";

pub fn plans_key(date: NaiveDate) -> String {
    format!("{PLANS_KEY_PREFIX}{}", date_key(date))
}

/// Plan, points and template records of the check-in page.
#[derive(Clone)]
pub struct StudyStore {
    store: Arc<dyn KeyValueStore>,
}

impl StudyStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub async fn total_points(&self) -> u32 {
        self.read(TOTAL_POINTS_KEY).await.unwrap_or(0)
    }

    pub async fn set_total_points(&self, points: u32) -> Result<(), StorageError> {
        self.write(TOTAL_POINTS_KEY, &points).await
    }

    pub async fn plans_for(&self, date: NaiveDate) -> Vec<Plan> {
        self.read(&plans_key(date)).await.unwrap_or_default()
    }

    pub async fn save_plans(&self, date: NaiveDate, plans: &[Plan]) -> Result<(), StorageError> {
        self.write(&plans_key(date), &plans).await
    }

    /// The date handed over by the calendar view. It is consumed on read.
    pub async fn take_selected_date(&self) -> Option<NaiveDate> {
        let raw: String = self.read(SELECTED_DATE_KEY).await?;
        if let Err(error) = self.store.remove(SELECTED_DATE_KEY).await {
            log::warn!("Failed to clear {SELECTED_DATE_KEY}: {error}");
        }

        // The calendar stores either a bare date or a full ISO timestamp.
        parse_date_key(&raw).or_else(|| {
            DateTime::parse_from_rfc3339(&raw)
                .ok()
                .map(|instant| instant.date_naive())
        })
    }

    pub async fn set_selected_date(&self, date: NaiveDate) -> Result<(), StorageError> {
        self.write(SELECTED_DATE_KEY, &date_key(date)).await
    }

    pub async fn default_plan(&self) -> Plan {
        match self.read(DEFAULT_PLAN_KEY).await {
            Some(plan) => plan,
            None => builtin_default_plan(Utc::now().timestamp_millis().to_string()),
        }
    }

    pub async fn save_default_plan(&self, plan: &Plan) -> Result<(), StorageError> {
        self.write(DEFAULT_PLAN_KEY, plan).await
    }

    pub async fn templates(&self) -> Vec<StudyTemplate> {
        self.read(TEMPLATES_KEY).await.unwrap_or_default()
    }

    pub async fn add_template(&self, template: NewTemplate) -> Result<StudyTemplate, StorageError> {
        let now = Utc::now();
        let template = StudyTemplate {
            id: now.timestamp_millis().to_string(),
            name: template.name,
            content: template.content,
            create_time: now.to_rfc3339(),
            tasks: template.tasks,
        };

        let mut templates = self.templates().await;
        templates.push(template.clone());
        self.write(TEMPLATES_KEY, &templates).await?;

        Ok(template)
    }

    /// Returns `false` when no template has the given id.
    pub async fn delete_template(&self, id: &str) -> Result<bool, StorageError> {
        let mut templates = self.templates().await;
        let before = templates.len();
        templates.retain(|template| template.id != id);

        if templates.len() == before {
            return Ok(false);
        }

        self.write(TEMPLATES_KEY, &templates).await?;
        Ok(true)
    }

    /// Updates a task's completion flags, its earned points and the user's
    /// running total. Returns the task's new earned points, or `None` when the
    /// plan or task does not exist for that day.
    pub async fn update_task_completion(
        &self,
        date: NaiveDate,
        plan_id: &str,
        task_id: &str,
        study_completed: bool,
        mastered_completed: bool,
    ) -> Result<Option<u32>, StorageError> {
        let mut plans = self.plans_for(date).await;
        let Some(task) = plans
            .iter_mut()
            .filter(|plan| plan.id == plan_id)
            .flat_map(|plan| plan.tasks.iter_mut())
            .find(|task| task.id == task_id)
        else {
            return Ok(None);
        };

        let previous = task.earned_points;
        task.study_completed = study_completed;
        task.mastered_completed = mastered_completed;
        task.earned_points = calculate_task_earned_points(task);
        let earned = task.earned_points;

        self.save_plans(date, &plans).await?;

        let total = i64::from(self.total_points().await) + i64::from(earned) - i64::from(previous);
        self.set_total_points(u32::try_from(total.max(0)).unwrap_or(u32::MAX))
            .await?;

        Ok(Some(earned))
    }

    async fn read<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get_raw(key).await {
            Ok(raw) => raw?,
            Err(error) => {
                log::warn!("Failed to read {key}: {error}");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(error) => {
                log::warn!("Stored value of {key} is corrupt, ignoring it: {error}");
                None
            }
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let raw = serde_json::to_string(value)?;
        self.store.set_raw(key, raw).await
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{
        kv_store::InMemoryStore,
        model::{StudyTask, TemplateTask},
    };

    use super::*;

    fn store() -> (Arc<InMemoryStore>, StudyStore) {
        let kv = Arc::new(InMemoryStore::new());
        (Arc::clone(&kv), StudyStore::new(kv))
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 31).unwrap()
    }

    #[tokio::test]
    async fn plans_are_stored_per_day() {
        let (kv, store) = store();
        let plan = Plan {
            id: "p".into(),
            name: "晨读".into(),
            tasks: vec![StudyTask::new("1", "单词", "07:00-07:30")],
        };

        store.save_plans(date(), &[plan.clone()]).await.unwrap();

        assert!(kv.get_raw("study_plans_2025-05-31").await.unwrap().is_some());
        assert_eq!(store.plans_for(date()).await, vec![plan]);
        assert!(store.plans_for(date().succ_opt().unwrap()).await.is_empty());
    }

    #[tokio::test]
    async fn selected_date_is_read_once() {
        let (kv, store) = store();
        kv.set_raw("selected_date", "\"2025-05-31T16:00:00.000Z\"".into())
            .await
            .unwrap();

        assert_eq!(store.take_selected_date().await, Some(date()));
        assert_eq!(store.take_selected_date().await, None);

        store.set_selected_date(date()).await.unwrap();
        assert_eq!(store.take_selected_date().await, Some(date()));
    }

    #[tokio::test]
    async fn corrupt_records_read_as_empty() {
        let (kv, store) = store();
        kv.set_raw("study_plans_2025-05-31", "[{".into()).await.unwrap();
        kv.set_raw("user_total_points", "\"lots\"".into()).await.unwrap();

        assert!(store.plans_for(date()).await.is_empty());
        assert_eq!(store.total_points().await, 0);
    }

    #[tokio::test]
    async fn blank_task_fields_keep_the_day() {
        let (kv, store) = store();
        kv.set_raw(
            "study_plans_2025-05-31",
            r#"[{"id":"p","name":"晨读","tasks":[{"id":"1","timeSlot":"08:00-09:00"},{"id":"2","timeSlot":null,"points":null}]}]"#.into(),
        )
        .await
        .unwrap();

        let plans = store.plans_for(date()).await;

        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].tasks.len(), 2);
        assert!(plans[0].tasks[0].parsed_slot().is_some());
        assert_eq!(plans[0].tasks[1].time_slot, "");
    }

    #[tokio::test]
    async fn completion_updates_task_and_total() {
        let (_, store) = store();
        let plan = Plan {
            id: "p".into(),
            name: "Plan".into(),
            tasks: vec![StudyTask::new("1", "English", "08:00-09:00").with_points(10)],
        };
        store.save_plans(date(), &[plan]).await.unwrap();
        store.set_total_points(5).await.unwrap();

        let earned = store
            .update_task_completion(date(), "p", "1", true, false)
            .await
            .unwrap();
        assert_eq!(earned, Some(3));
        assert_eq!(store.total_points().await, 8);

        store
            .update_task_completion(date(), "p", "1", true, true)
            .await
            .unwrap();
        assert_eq!(store.total_points().await, 15);
        assert_eq!(store.plans_for(date()).await[0].tasks[0].earned_points, 10);

        store
            .update_task_completion(date(), "p", "1", false, false)
            .await
            .unwrap();
        assert_eq!(store.total_points().await, 5);

        let missing = store
            .update_task_completion(date(), "p", "nope", true, true)
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn default_plan_falls_back_to_builtin() {
        let (_, store) = store();

        let plan = store.default_plan().await;
        let slots: Vec<_> = plan.tasks.iter().map(|t| t.time_slot.as_str()).collect();
        assert_eq!(slots, ["08:00-09:00", "09:00-10:00", "20:00-21:00"]);

        let custom = Plan {
            id: "mine".into(),
            name: "Mine".into(),
            tasks: vec![],
        };
        store.save_default_plan(&custom).await.unwrap();
        assert_eq!(store.default_plan().await, custom);
    }

    #[tokio::test]
    async fn templates_can_be_added_and_deleted() {
        let (_, store) = store();

        let added = store
            .add_template(NewTemplate {
                name: "周末".into(),
                content: "两门课".into(),
                tasks: vec![TemplateTask {
                    name: "数学".into(),
                    time_slot: Some("10:00-11:00".into()),
                    points: None,
                }],
            })
            .await
            .unwrap();

        assert!(DateTime::parse_from_rfc3339(&added.create_time).is_ok());
        assert_eq!(store.templates().await, vec![added.clone()]);

        assert!(store.delete_template(&added.id).await.unwrap());
        assert!(!store.delete_template(&added.id).await.unwrap());
        assert!(store.templates().await.is_empty());
    }
}
