use std::{collections::VecDeque, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    actor::{self, Actor, ActorContext, ActorHandle, ActorReference, ActorStatus},
    messages::ReminderMessages,
    notification::NotificationFallback,
    reminder::ReminderCategory,
    settings::{ReminderSettings, VoiceSettings},
};

use super::platform::{
    DisplayWakeLock, PlaybackError, SpeechPlatform, Utterance, Voice, select_voice,
};

pub const REPEAT_PACING: Duration = Duration::from_millis(800);
pub const ERROR_CONTINUE_DELAY: Duration = Duration::from_secs(1);
pub const ACTIVATION_ATTEMPTS: u32 = 3;
pub const ACTIVATION_TIMEOUT: Duration = Duration::from_secs(1);
pub const REACTIVATION_DELAY: Duration = Duration::from_secs(2);
pub const ACTIVATION_TEXT: &str = ".";
const ACTIVATION_VOLUME: f32 = 0.01;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechState {
    Uninitialized,
    Ready,
    Activating,
    Speaking { current: u32, total: u32 },
    Blocked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeakRequest {
    pub text: String,
    pub category: Option<ReminderCategory>,
    pub repeat_count: Option<u32>,
    pub voice_override: Option<VoiceSettings>,
}

impl SpeakRequest {
    pub fn new(text: impl Into<String>, category: ReminderCategory) -> Self {
        Self {
            text: text.into(),
            category: Some(category),
            repeat_count: None,
            voice_override: None,
        }
    }

    pub fn repeat(mut self, count: u32) -> Self {
        self.repeat_count = Some(count);
        self
    }
}

pub enum SpeechMessage {
    Speak(SpeakRequest),
    ActivationFinished { activated: bool },
    UtteranceFinished { result: Result<(), PlaybackError> },
    ContinueJob,
    Reactivate,
    Shutdown,
}

pub struct SpeechEngineArgs {
    pub platform: Arc<dyn SpeechPlatform>,
    pub settings: watch::Receiver<ReminderSettings>,
    pub fallback: NotificationFallback,
    pub wake_lock: Arc<dyn DisplayWakeLock>,
    pub language: String,
}

struct Job {
    text: String,
    category: Option<ReminderCategory>,
    voice: VoiceSettings,
    total: u32,
    current: u32,
    succeeded: u32,
}

impl Job {
    fn is_time_anchored(&self) -> bool {
        self.category
            .is_some_and(ReminderCategory::is_time_anchored)
    }

    fn title(&self) -> &'static str {
        self.category.map(ReminderMessages::title).unwrap_or("学习提醒")
    }
}

pub struct EngineState {
    platform: Arc<dyn SpeechPlatform>,
    settings: watch::Receiver<ReminderSettings>,
    fallback: NotificationFallback,
    wake_lock: Arc<dyn DisplayWakeLock>,
    published: watch::Sender<SpeechState>,
    language: String,
    voice: Option<Voice>,
    available: bool,
    activated: bool,
    activating: bool,
    reactivation_pending: bool,
    current: Option<Job>,
    queue: VecDeque<Job>,
}

impl EngineState {
    fn publish(&self, state: SpeechState) {
        self.published.send_replace(state);
    }

    fn is_busy(&self) -> bool {
        self.activating || self.current.is_some()
    }

    fn accept(&mut self, request: SpeakRequest, self_ref: &ActorReference<SpeechEngine>) {
        let settings = self.settings.borrow().clone();

        if let Some(category) = request.category {
            if !settings.is_enabled(category) {
                log::debug!("Not speaking, {category} reminders are disabled");
                return;
            }
        }
        let total = settings.resolve_repeat_count(request.category, request.repeat_count);
        if total == 0 {
            log::debug!("Not speaking, repeat count is 0");
            return;
        }

        match request.category {
            Some(ReminderCategory::StudyStart) => self.wake_lock.acquire(),
            Some(ReminderCategory::StudyEnd) => self.wake_lock.release(),
            _ => {}
        }

        let job = Job {
            text: request.text,
            category: request.category,
            voice: request.voice_override.unwrap_or(settings.voice).clamped(),
            total,
            current: 0,
            succeeded: 0,
        };

        if !self.available {
            log::warn!("Speech is unavailable, cannot speak {:?}", job.text);
            self.fallback.degraded_notice_once();
            if job.is_time_anchored() {
                self.fallback.notify(job.title(), &job.text);
            }
            return;
        }

        if self.is_busy() {
            log::debug!("Speech busy, deferring {:?}", job.text);
            self.queue.push_back(job);
            return;
        }

        self.start_job(job, self_ref);
    }

    fn start_job(&mut self, job: Job, self_ref: &ActorReference<SpeechEngine>) {
        self.current = Some(job);
        if self.activated {
            self.submit_current(self_ref);
        } else {
            self.begin_activation(self_ref);
        }
    }

    fn begin_activation(&mut self, self_ref: &ActorReference<SpeechEngine>) {
        self.activating = true;
        self.publish(SpeechState::Activating);

        let platform = Arc::clone(&self.platform);
        let utterance = Utterance {
            text: ACTIVATION_TEXT.to_owned(),
            volume: ACTIVATION_VOLUME,
            rate: 1.0,
            pitch: 1.0,
            lang: self.language.clone(),
            voice: self.voice.clone(),
        };
        let reference = self_ref.clone();

        tokio::spawn(async move {
            for attempt in 1..=ACTIVATION_ATTEMPTS {
                match tokio::time::timeout(ACTIVATION_TIMEOUT, platform.speak(&utterance)).await {
                    Ok(Ok(())) => {
                        reference.send_message(SpeechMessage::ActivationFinished { activated: true });
                        return;
                    }
                    Ok(Err(error)) => log::debug!("Activation attempt {attempt} failed: {error}"),
                    Err(_) => log::debug!("Activation attempt {attempt} timed out"),
                }
            }
            reference.send_message(SpeechMessage::ActivationFinished { activated: false });
        });
    }

    fn activation_finished(&mut self, activated: bool, self_ref: &ActorReference<SpeechEngine>) {
        self.activating = false;

        if activated {
            log::info!("Speech engine activated");
            self.activated = true;
            self.publish(SpeechState::Ready);
            if self.current.is_some() {
                self.submit_current(self_ref);
                return;
            }
        } else {
            log::warn!("Speech engine could not be activated");
            self.publish(SpeechState::Blocked);
            if let Some(job) = &self.current {
                self.fallback.notify(job.title(), &job.text);
            }
        }

        self.finish_job(self_ref);
    }

    fn submit_current(&mut self, self_ref: &ActorReference<SpeechEngine>) {
        let Some(job) = self.current.as_mut() else {
            return;
        };
        job.current += 1;

        let utterance = Utterance {
            text: job.text.clone(),
            volume: job.voice.volume,
            rate: job.voice.rate,
            pitch: job.voice.pitch,
            lang: self.language.clone(),
            voice: self.voice.clone(),
        };
        let state = SpeechState::Speaking {
            current: job.current,
            total: job.total,
        };
        self.publish(state);

        let platform = Arc::clone(&self.platform);
        let reference = self_ref.clone();
        tokio::spawn(async move {
            let result = platform.speak(&utterance).await;
            reference.send_message(SpeechMessage::UtteranceFinished { result });
        });
    }

    fn utterance_finished(
        &mut self,
        result: Result<(), PlaybackError>,
        context: &ActorContext<SpeechEngine>,
    ) {
        let Some(job) = self.current.as_mut() else {
            log::warn!("Utterance finished without an active job");
            return;
        };

        match result {
            Ok(()) => {
                job.succeeded += 1;
                self.activated = true;
                if job.current < job.total {
                    self.publish(SpeechState::Ready);
                    context.send_after(SpeechMessage::ContinueJob, REPEAT_PACING);
                    return;
                }
            }
            Err(error) if error.is_blocking() => {
                log::warn!("Speech blocked ({error}), showing a notification instead");
                let time_anchored = job.is_time_anchored();
                self.fallback.notify(job.title(), &job.text);
                self.activated = false;
                self.publish(SpeechState::Blocked);

                if time_anchored && !self.reactivation_pending {
                    self.reactivation_pending = true;
                    context.send_after(SpeechMessage::Reactivate, REACTIVATION_DELAY);
                }
            }
            Err(error) => {
                log::warn!(
                    "Speaking repetition {}/{} failed: {error}",
                    job.current,
                    job.total
                );
                if job.current < job.total {
                    context.send_after(SpeechMessage::ContinueJob, ERROR_CONTINUE_DELAY);
                    return;
                }
                if job.succeeded == 0 {
                    self.fallback.notify(job.title(), &job.text);
                }
            }
        }

        self.finish_job(context.self_ref());
    }

    fn reactivate(&mut self, self_ref: &ActorReference<SpeechEngine>) {
        self.reactivation_pending = false;
        if self.activated || self.is_busy() {
            return;
        }
        log::info!("Retrying speech activation");
        self.begin_activation(self_ref);
    }

    fn finish_job(&mut self, self_ref: &ActorReference<SpeechEngine>) {
        self.current = None;
        if self.activated {
            self.publish(SpeechState::Ready);
        }

        if let Some(next) = self.queue.pop_front() {
            self.start_job(next, self_ref);
        }
    }
}

/// Serializes every spoken reminder: one utterance at a time, repeats paced,
/// later requests queued behind the running one.
pub struct SpeechEngine;

#[async_trait]
impl Actor for SpeechEngine {
    type Message = SpeechMessage;
    type State = EngineState;
    type InitArgs = (SpeechEngineArgs, watch::Sender<SpeechState>);

    fn handle_message(
        msg: Self::Message,
        mut state: Self::State,
        context: &ActorContext<Self>,
    ) -> anyhow::Result<ActorStatus<Self::State>> {
        match msg {
            SpeechMessage::Speak(request) => state.accept(request, context.self_ref()),
            SpeechMessage::ActivationFinished { activated } => {
                state.activation_finished(activated, context.self_ref())
            }
            SpeechMessage::UtteranceFinished { result } => state.utterance_finished(result, context),
            SpeechMessage::ContinueJob => state.submit_current(context.self_ref()),
            SpeechMessage::Reactivate => state.reactivate(context.self_ref()),
            SpeechMessage::Shutdown => {
                state.wake_lock.release();
                return Ok(ActorStatus::Stop);
            }
        }

        Ok(ActorStatus::Continue(state))
    }

    async fn init_state(
        args: Self::InitArgs,
        _context: &ActorContext<Self>,
    ) -> anyhow::Result<Self::State> {
        let (args, published) = args;
        let available = args.platform.is_available().await;
        let voice = if available {
            let voices = args.platform.voices().await;
            let voice = select_voice(&voices, &args.language);
            match &voice {
                Some(voice) => log::info!("Speaking with voice {} ({})", voice.name, voice.lang),
                None => log::info!(
                    "No {} voice among {} voices, using the platform default",
                    args.language,
                    voices.len()
                ),
            }
            voice
        } else {
            log::warn!("No speech capability, reminders fall back to notifications");
            None
        };

        let state = EngineState {
            platform: args.platform,
            settings: args.settings,
            fallback: args.fallback,
            wake_lock: args.wake_lock,
            published,
            language: args.language,
            voice,
            available,
            activated: false,
            activating: false,
            reactivation_pending: false,
            current: None,
            queue: VecDeque::new(),
        };
        if available {
            state.publish(SpeechState::Ready);
        }
        Ok(state)
    }
}

#[derive(Clone)]
pub struct SpeechClient {
    reference: ActorReference<SpeechEngine>,
    state: watch::Receiver<SpeechState>,
}

impl SpeechClient {
    pub fn speak(&self, request: SpeakRequest) {
        if !self.reference.send_message(SpeechMessage::Speak(request)) {
            log::warn!("Speech engine has stopped, dropping request");
        }
    }

    pub fn state(&self) -> SpeechState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SpeechState> {
        self.state.clone()
    }
}

pub struct SpeechEngineHandle {
    actor: ActorHandle<SpeechEngine>,
    client: SpeechClient,
}

impl SpeechEngineHandle {
    pub async fn start(args: SpeechEngineArgs) -> anyhow::Result<Self> {
        let (published, state) = watch::channel(SpeechState::Uninitialized);
        let actor = actor::start::<SpeechEngine>((args, published)).await?;
        let client = SpeechClient {
            reference: actor.actor_reference().clone(),
            state,
        };
        Ok(Self { actor, client })
    }

    pub fn client(&self) -> SpeechClient {
        self.client.clone()
    }

    pub async fn shutdown(self) {
        self.actor
            .actor_reference()
            .send_message(SpeechMessage::Shutdown);
        self.actor.join(SHUTDOWN_TIMEOUT).await;
    }
}
