use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    /// The platform refused to start audio, e.g. an autoplay policy.
    #[error("playback was not allowed")]
    Blocked,

    #[error("playback was interrupted")]
    Interrupted,

    #[error("playback failed: {0}")]
    Failed(String),
}

impl PlaybackError {
    pub fn is_blocking(&self) -> bool {
        matches!(self, PlaybackError::Blocked | PlaybackError::Interrupted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    pub lang: String,
    /// Other languages the voice serves, with the synthesizer's priority
    /// (lower is preferred).
    pub aliases: Vec<(String, u8)>,
}

impl Voice {
    pub fn new(name: impl Into<String>, lang: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lang: lang.into(),
            aliases: Vec::new(),
        }
    }

    fn languages(&self) -> impl Iterator<Item = (&str, u8)> {
        std::iter::once((self.lang.as_str(), 0)).chain(
            self.aliases
                .iter()
                .map(|(lang, priority)| (lang.as_str(), *priority)),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub volume: f32,
    pub rate: f32,
    pub pitch: f32,
    pub lang: String,
    pub voice: Option<Voice>,
}

/// Text-to-speech backend.
#[async_trait]
pub trait SpeechPlatform: Send + Sync {
    async fn is_available(&self) -> bool;

    /// May be empty; the platform default voice is used then.
    async fn voices(&self) -> Vec<Voice>;

    /// Resolves once the utterance has finished or failed.
    async fn speak(&self, utterance: &Utterance) -> Result<(), PlaybackError>;
}

fn normalize_locale(lang: &str) -> String {
    lang.to_lowercase().replace('_', "-")
}

/// Picks the voice whose language or alias best matches `lang`: the exact
/// locale first, then the bare language, then any locale of that language.
/// Ties go to the lower alias priority, then to the earlier voice.
pub fn select_voice(voices: &[Voice], lang: &str) -> Option<Voice> {
    let wanted = normalize_locale(lang);
    let language = wanted.split('-').next().unwrap_or_default().to_owned();
    if language.is_empty() {
        return None;
    }
    let regional = format!("{language}-");

    voices
        .iter()
        .filter_map(|voice| {
            voice
                .languages()
                .filter_map(|(tag, priority)| {
                    let tag = normalize_locale(tag);
                    let rank = if tag == wanted {
                        0
                    } else if tag == language {
                        1
                    } else if tag.starts_with(&regional) {
                        2
                    } else {
                        return None;
                    };
                    Some((rank, priority))
                })
                .min()
                .map(|score| (score, voice))
        })
        .min_by_key(|(score, _)| *score)
        .map(|(_, voice)| voice.clone())
}

/// Platform without any speech support.
pub struct NullSpeechPlatform;

#[async_trait]
impl SpeechPlatform for NullSpeechPlatform {
    async fn is_available(&self) -> bool {
        false
    }

    async fn voices(&self) -> Vec<Voice> {
        Vec::new()
    }

    async fn speak(&self, _utterance: &Utterance) -> Result<(), PlaybackError> {
        Err(PlaybackError::Failed("no speech platform".to_owned()))
    }
}

/// Keeps the display on while a study slot is running.
pub trait DisplayWakeLock: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

pub struct NoWakeLock;

impl DisplayWakeLock for NoWakeLock {
    fn acquire(&self) {
        log::debug!("No display wake lock on this platform");
    }

    fn release(&self) {}
}
