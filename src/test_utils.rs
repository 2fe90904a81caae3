use std::{
    collections::VecDeque,
    future::Future,
    path::{Path, PathBuf},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use proptest::test_runner::TestCaseError;

use crate::{
    notification::Notifier,
    reminder::FiredReminder,
    scheduling::ReminderDelivery,
    speech::{ACTIVATION_TEXT, DisplayWakeLock, PlaybackError, SpeechPlatform, Utterance, Voice},
};

/// Runs an async property test on a paused current-thread runtime.
pub fn tokio_ct(
    future: impl Future<Output = Result<(), TestCaseError>>,
) -> Result<(), TestCaseError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
        .block_on(future)
}

/// A scratch directory removed on drop.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(prefix: &str) -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        let path = std::env::temp_dir().join(format!(
            "study-reminder-{prefix}-{}-{nanos}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        std::fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    shown: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.shown.lock().unwrap().iter().map(|(t, _)| t.clone()).collect()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.shown.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, body: &str) {
        self.shown
            .lock()
            .unwrap()
            .push((title.to_owned(), body.to_owned()));
    }
}

#[derive(Default)]
pub struct RecordingDelivery {
    delivered: Mutex<Vec<FiredReminder>>,
}

impl RecordingDelivery {
    pub fn delivered(&self) -> Vec<FiredReminder> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }
}

#[async_trait]
impl ReminderDelivery for RecordingDelivery {
    async fn deliver(&self, reminder: &FiredReminder) {
        self.delivered.lock().unwrap().push(reminder.clone());
    }
}

#[derive(Default)]
pub struct RecordingWakeLock {
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl RecordingWakeLock {
    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

impl DisplayWakeLock for RecordingWakeLock {
    fn acquire(&self) {
        self.acquired.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Speech platform with scripted outcomes. Real utterances take
/// `utterance_duration` of tokio time; activation utterances finish at once.
pub struct ScriptedPlatform {
    available: bool,
    utterance_duration: Duration,
    outcomes: Mutex<VecDeque<Result<(), PlaybackError>>>,
    activation_blocked: Mutex<bool>,
    spoken: Mutex<Vec<Utterance>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedPlatform {
    pub fn new(utterance_duration: Duration) -> Self {
        Self {
            available: true,
            utterance_duration,
            outcomes: Mutex::new(VecDeque::new()),
            activation_blocked: Mutex::new(false),
            spoken: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new(Duration::ZERO)
        }
    }

    /// Outcomes of the next real utterances, in order; later ones succeed.
    pub fn script(&self, outcomes: impl IntoIterator<Item = Result<(), PlaybackError>>) {
        self.outcomes.lock().unwrap().extend(outcomes);
    }

    pub fn block_activation(&self) {
        *self.activation_blocked.lock().unwrap() = true;
    }

    pub fn spoken(&self) -> Vec<Utterance> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn spoken_texts(&self) -> Vec<String> {
        self.spoken()
            .into_iter()
            .filter(|u| u.text != ACTIVATION_TEXT)
            .map(|u| u.text)
            .collect()
    }

    pub fn activation_count(&self) -> usize {
        self.spoken()
            .iter()
            .filter(|u| u.text == ACTIVATION_TEXT)
            .count()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechPlatform for ScriptedPlatform {
    async fn is_available(&self) -> bool {
        self.available
    }

    async fn voices(&self) -> Vec<Voice> {
        vec![Voice::new("test-zh", "zh-CN")]
    }

    async fn speak(&self, utterance: &Utterance) -> Result<(), PlaybackError> {
        self.spoken.lock().unwrap().push(utterance.clone());

        if utterance.text == ACTIVATION_TEXT {
            return if *self.activation_blocked.lock().unwrap() {
                Err(PlaybackError::Blocked)
            } else {
                Ok(())
            };
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.utterance_duration).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}
