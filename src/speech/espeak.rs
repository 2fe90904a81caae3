use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    sync::LazyLock,
};

use async_trait::async_trait;
use regex::Regex;
use tokio::{process::Command, sync::OnceCell};

use super::platform::{PlaybackError, SpeechPlatform, Utterance, Voice};

const MAX_AMPLITUDE: f32 = 200.0;
const DEFAULT_WORDS_PER_MINUTE: f32 = 175.0;
const DEFAULT_PITCH: f32 = 50.0;

/// One `(language priority)` entry of the "Other Languages" column.
static VOICE_ALIAS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\(([^\s()]+)\s+(\d+)\)").expect("The voice alias pattern is a valid regex.")
});

/// Speech through the `espeak-ng` command line synthesizer, or any program
/// accepting the same flags.
pub struct EspeakPlatform {
    program: String,
    resolved: OnceCell<Option<PathBuf>>,
}

impl EspeakPlatform {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            resolved: OnceCell::new(),
        }
    }

    async fn executable(&self) -> Option<&Path> {
        self.resolved
            .get_or_init(|| async {
                let found = find_on_path(&self.program);
                match &found {
                    Some(path) => log::info!("Using speech synthesizer {}", path.display()),
                    None => log::warn!("Speech synthesizer {} not found on PATH", self.program),
                }
                found
            })
            .await
            .as_deref()
    }
}

fn find_on_path(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

/// Parses the table printed by `espeak-ng --voices`:
/// `Pty Language Age/Gender VoiceName File Other Languages`.
fn parse_voice_table(output: &str) -> Vec<Voice> {
    output
        .lines()
        .skip(1)
        .filter_map(|line| {
            let columns: Vec<&str> = line.split_whitespace().collect();
            match columns.as_slice() {
                [_, lang, _, name, _, other @ ..] => Some(Voice {
                    aliases: parse_aliases(&other.join(" ")),
                    ..Voice::new(*name, *lang)
                }),
                [_, lang, _, name, ..] => Some(Voice::new(*name, *lang)),
                _ => None,
            }
        })
        .collect()
}

fn parse_aliases(column: &str) -> Vec<(String, u8)> {
    VOICE_ALIAS
        .captures_iter(column)
        .filter_map(|captures| {
            let priority = captures[2].parse().ok()?;
            Some((captures[1].to_owned(), priority))
        })
        .collect()
}

#[cfg(unix)]
fn killed_by_signal(status: &ExitStatus) -> bool {
    use std::os::unix::process::ExitStatusExt;
    status.signal().is_some()
}

#[cfg(not(unix))]
fn killed_by_signal(_status: &ExitStatus) -> bool {
    false
}

fn speak_args(utterance: &Utterance) -> Vec<String> {
    let mut args = vec![
        "-a".to_owned(),
        ((utterance.volume * MAX_AMPLITUDE).round() as u32).to_string(),
        "-s".to_owned(),
        ((utterance.rate * DEFAULT_WORDS_PER_MINUTE).round() as u32).to_string(),
        "-p".to_owned(),
        ((utterance.pitch * DEFAULT_PITCH).round().min(99.0) as u32).to_string(),
    ];
    // Without a matching voice, espeak still resolves a bare language name.
    let voice = match &utterance.voice {
        Some(voice) => Some(voice.lang.clone()),
        None => utterance
            .lang
            .split(['-', '_'])
            .next()
            .filter(|language| !language.is_empty())
            .map(str::to_lowercase),
    };
    if let Some(voice) = voice {
        args.push("-v".to_owned());
        args.push(voice);
    }
    args.push("--".to_owned());
    args.push(utterance.text.clone());
    args
}

#[async_trait]
impl SpeechPlatform for EspeakPlatform {
    async fn is_available(&self) -> bool {
        self.executable().await.is_some()
    }

    async fn voices(&self) -> Vec<Voice> {
        let Some(program) = self.executable().await else {
            return Vec::new();
        };

        match Command::new(program).arg("--voices").output().await {
            Ok(output) if output.status.success() => {
                parse_voice_table(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                log::warn!("Listing voices exited with {}", output.status);
                Vec::new()
            }
            Err(error) => {
                log::warn!("Listing voices failed: {error}");
                Vec::new()
            }
        }
    }

    async fn speak(&self, utterance: &Utterance) -> Result<(), PlaybackError> {
        let program = self
            .executable()
            .await
            .ok_or_else(|| PlaybackError::Failed(format!("{} is not installed", self.program)))?;

        let output = Command::new(program)
            .args(speak_args(utterance))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|error| PlaybackError::Failed(error.to_string()))?;

        if output.status.success() {
            return Ok(());
        }
        if killed_by_signal(&output.status) {
            return Err(PlaybackError::Interrupted);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(PlaybackError::Failed(format!(
            "{} exited with {}: {}",
            self.program,
            output.status,
            stderr.trim()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::speech::platform::select_voice;

    const LISTING: &str = "\
Pty Language       Age/Gender VoiceName          File                 Other Languages
 5  af              --/M      Afrikaans          gmw/af
 5  cmn             --/M      Chinese_(Mandarin) sit/cmn              (zh-cmn 5)(zh 5)
 5  yue             --/M      Chinese_(Cantonese) sit/yue             (zh-yue 5)(zh 8)
";

    #[test]
    fn parses_voice_listing() {
        let voices = parse_voice_table(LISTING);

        assert_eq!(voices.len(), 3);
        assert!(voices[0].aliases.is_empty());
        assert_eq!(voices[1].lang, "cmn");
        assert_eq!(voices[1].name, "Chinese_(Mandarin)");
        assert_eq!(
            voices[1].aliases,
            [("zh-cmn".to_owned(), 5), ("zh".to_owned(), 5)]
        );
    }

    #[test]
    fn chinese_locale_picks_mandarin_through_aliases() {
        let voices = parse_voice_table(LISTING);

        let voice = select_voice(&voices, "zh-CN").unwrap();

        assert_eq!(voice.lang, "cmn");
    }

    #[test]
    fn maps_voice_settings_onto_flags() {
        let utterance = Utterance {
            text: "-开始".into(),
            volume: 0.8,
            rate: 1.5,
            pitch: 2.0,
            lang: "zh-CN".into(),
            voice: Some(Voice::new("Chinese", "cmn")),
        };

        assert_eq!(
            speak_args(&utterance),
            ["-a", "160", "-s", "263", "-p", "99", "-v", "cmn", "--", "-开始"]
        );
    }

    #[test]
    fn language_is_passed_without_a_voice() {
        let utterance = Utterance {
            text: "开始".into(),
            volume: 1.0,
            rate: 1.0,
            pitch: 1.0,
            lang: "zh-CN".into(),
            voice: None,
        };

        assert_eq!(
            speak_args(&utterance),
            ["-a", "200", "-s", "175", "-p", "50", "-v", "zh", "--", "开始"]
        );
    }

    #[tokio::test]
    async fn missing_program_is_unavailable() {
        let platform = EspeakPlatform::new("definitely-not-a-speech-synth");

        assert!(!platform.is_available().await);
        assert!(platform.voices().await.is_empty());
        assert!(matches!(
            platform
                .speak(&Utterance {
                    text: "x".into(),
                    volume: 1.0,
                    rate: 1.0,
                    pitch: 1.0,
                    lang: "zh-CN".into(),
                    voice: None,
                })
                .await,
            Err(PlaybackError::Failed(_))
        ));
    }
}
