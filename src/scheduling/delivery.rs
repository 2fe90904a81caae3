use async_trait::async_trait;

use crate::reminder::FiredReminder;

/// Receives time-anchored reminders when their local timer fires.
#[async_trait]
pub trait ReminderDelivery: Send + Sync {
    async fn deliver(&self, reminder: &FiredReminder);
}
