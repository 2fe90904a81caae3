mod engine;
mod espeak;
mod platform;

pub use engine::{
    ACTIVATION_ATTEMPTS, ACTIVATION_TEXT, REPEAT_PACING, SpeakRequest, SpeechClient,
    SpeechEngineArgs, SpeechEngineHandle, SpeechState,
};
pub use espeak::EspeakPlatform;
pub use platform::{
    DisplayWakeLock, NoWakeLock, NullSpeechPlatform, PlaybackError, SpeechPlatform, Utterance,
    Voice, select_voice,
};
