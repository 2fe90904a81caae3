pub mod actor;
pub mod appsettings;
pub mod clock;
pub mod messages;
pub mod notification;
pub mod relay;
pub mod reminder;
pub mod scheduling;
pub mod service;
pub mod settings;
pub mod speech;
pub mod storage;
pub mod time_slot;

#[cfg(test)]
mod test_utils;
