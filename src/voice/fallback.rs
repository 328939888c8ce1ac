//! Local speech fallback
//!
//! Used when remote synthesis is unconfigured or failing. The device speech
//! program needs no network, so the only way it fails is the platform not
//! having one.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::{Error, Result};

/// Speech programs tried in order when none is configured
const CANDIDATES: [&str; 4] = ["espeak-ng", "espeak", "say", "spd-say"];

/// Shortest duration reported for any utterance
const MIN_DURATION_MS: u64 = 500;

/// A prepared utterance for the device speech engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpeechHandle {
    pub program: PathBuf,
    pub text: String,
    pub words_per_minute: u32,
    pub estimated_duration_ms: u64,
}

impl DeviceSpeechHandle {
    /// Prepare `text` for `program` at the given speaking rate
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, text: &str, words_per_minute: u32) -> Self {
        Self {
            program: program.into(),
            text: text.to_string(),
            words_per_minute,
            estimated_duration_ms: estimate_duration_ms(text, words_per_minute),
        }
    }

    /// Command-line arguments for the speech program
    #[must_use]
    pub fn args(&self) -> Vec<String> {
        let rate = self.words_per_minute.to_string();
        let name = self
            .program
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();

        // `--` keeps text such as "- Stay out" from being read as options
        let text = self.text.clone();
        match name {
            "espeak-ng" | "espeak" => vec!["-s".into(), rate, "--".into(), text],
            "say" => vec!["-r".into(), rate, "--".into(), text],
            // Block until the utterance finishes so exit means "done"
            "spd-say" => vec!["-w".into(), "--".into(), text],
            _ => vec![text],
        }
    }
}

/// Estimate how long `text` takes to speak
#[must_use]
pub fn estimate_duration_ms(text: &str, words_per_minute: u32) -> u64 {
    let words = text.split_whitespace().count() as u64;
    let wpm = u64::from(words_per_minute.max(1));
    (words * 60_000 / wpm).max(MIN_DURATION_MS)
}

/// Always-local speech capability
#[async_trait]
pub trait SpeechFallback: Send + Sync {
    /// Prepare `text` for the device speech engine
    ///
    /// # Errors
    ///
    /// Returns `Error::Playback` if no speech engine exists on this platform
    async fn speak(&self, text: &str) -> Result<DeviceSpeechHandle>;

    /// Whether a speech engine is present
    fn is_available(&self) -> bool;
}

/// Fallback backed by a system speech program (`espeak-ng`, `say`, ...)
#[derive(Debug, Clone)]
pub struct SystemSpeech {
    program: Option<String>,
    words_per_minute: u32,
}

impl SystemSpeech {
    /// Create a fallback; `program` overrides the search on `PATH`
    #[must_use]
    pub const fn new(program: Option<String>, words_per_minute: u32) -> Self {
        Self {
            program,
            words_per_minute,
        }
    }

    /// Locate the speech program
    #[must_use]
    pub fn locate(&self) -> Option<PathBuf> {
        match &self.program {
            Some(program) if Path::new(program).is_absolute() => {
                Path::new(program).is_file().then(|| PathBuf::from(program))
            }
            Some(program) => which::which(program).ok(),
            None => CANDIDATES.iter().find_map(|c| which::which(c).ok()),
        }
    }
}

#[async_trait]
impl SpeechFallback for SystemSpeech {
    async fn speak(&self, text: &str) -> Result<DeviceSpeechHandle> {
        let program = self.locate().ok_or_else(|| {
            Error::Playback(match &self.program {
                Some(p) => format!("speech program not found: {p}"),
                None => format!("no speech program found (tried {})", CANDIDATES.join(", ")),
            })
        })?;

        tracing::debug!(program = %program.display(), "using local speech fallback");
        Ok(DeviceSpeechHandle::new(program, text, self.words_per_minute))
    }

    fn is_available(&self) -> bool {
        self.locate().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_scales_with_words() {
        // 175 words at 175 wpm is one minute
        let text = vec!["word"; 175].join(" ");
        assert_eq!(estimate_duration_ms(&text, 175), 60_000);
    }

    #[test]
    fn estimate_has_floor() {
        assert_eq!(estimate_duration_ms("Go", 175), MIN_DURATION_MS);
        assert_eq!(estimate_duration_ms("", 0), MIN_DURATION_MS);
    }

    #[test]
    fn args_per_program() {
        let espeak = DeviceSpeechHandle::new("/usr/bin/espeak-ng", "Stay calm", 160);
        assert_eq!(espeak.args(), vec!["-s", "160", "--", "Stay calm"]);

        let say = DeviceSpeechHandle::new("/usr/bin/say", "Stay calm", 160);
        assert_eq!(say.args(), vec!["-r", "160", "--", "Stay calm"]);

        let spd = DeviceSpeechHandle::new("spd-say", "Stay calm", 160);
        assert_eq!(spd.args(), vec!["-w", "--", "Stay calm"]);
    }

    #[test]
    fn dash_leading_text_stays_positional() {
        let text = "- Stay out of the water";
        for program in ["/usr/bin/espeak-ng", "espeak", "say", "spd-say"] {
            let args = DeviceSpeechHandle::new(program, text, 175).args();
            let separator = args.iter().position(|a| a == "--");
            assert_eq!(separator, Some(args.len() - 2), "{program}: {args:?}");
            assert_eq!(args.last().map(String::as_str), Some(text));
        }
    }

    #[tokio::test]
    async fn missing_program_is_playback_error() {
        let speech = SystemSpeech::new(Some("/nonexistent/tidesense-speech".to_string()), 175);
        assert!(!speech.is_available());
        assert!(matches!(
            speech.speak("Stay out of the water.").await,
            Err(Error::Playback(_))
        ));
    }
}
