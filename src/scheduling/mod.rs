mod delivery;
mod scheduler;
mod timer;


pub use delivery::ReminderDelivery;
pub use scheduler::{ReminderScheduler, SUSPICIOUS_DELAY, compute_end_trigger, compute_next_trigger};
pub use timer::ScheduledTimer;
