mod kv_store;
mod model;
mod study_store;

pub use kv_store::{InMemoryStore, JsonFileStore, KeyValueStore, StorageError};
pub use model::{
    DailyStats, NewTemplate, Plan, PlanStats, StudyTask, StudyTemplate, TemplateTask,
    builtin_default_plan, calculate_task_earned_points,
};
pub use study_store::{StudyStore, plans_key};
