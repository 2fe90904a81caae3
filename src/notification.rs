use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use notify_rust::{Notification, Timeout};

pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Desktop notifications through the platform notification daemon.
pub struct DesktopNotifier {
    enabled: bool,
    app_name: String,
}

impl DesktopNotifier {
    pub fn new(enabled: bool, app_name: impl Into<String>) -> Self {
        Self {
            enabled,
            app_name: app_name.into(),
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, body: &str) {
        if !self.enabled {
            log::debug!("Notifications disabled, dropping: {title}");
            return;
        }

        let app_name = self.app_name.clone();
        let title = title.to_owned();
        let body = body.to_owned();

        // Showing a notification blocks on the session bus.
        std::thread::spawn(move || {
            let result = Notification::new()
                .appname(&app_name)
                .summary(&title)
                .body(&body)
                .icon("dialog-information")
                .timeout(Timeout::Milliseconds(5000))
                .show();

            if let Err(error) = result {
                log::warn!("Failed to show notification {title:?}: {error}");
            }
        });
    }
}

const DEGRADED_TITLE: &str = "语音提醒不可用";
const DEGRADED_BODY: &str = "当前设备不支持语音播报，提醒将以通知形式显示。";

/// Shows a reminder as a notification when it cannot be spoken.
#[derive(Clone)]
pub struct NotificationFallback {
    notifier: Arc<dyn Notifier>,
    degraded_notice_shown: Arc<AtomicBool>,
}

impl NotificationFallback {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            degraded_notice_shown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn notify(&self, title: &str, body: &str) {
        self.notifier.notify(title, body);
    }

    /// Tells the user once per session that speech is unavailable.
    pub fn degraded_notice_once(&self) {
        if !self.degraded_notice_shown.swap(true, Ordering::SeqCst) {
            self.notifier.notify(DEGRADED_TITLE, DEGRADED_BODY);
        }
    }
}
