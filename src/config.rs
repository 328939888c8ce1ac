//! Configuration management for voice guidance
//!
//! Values are layered: built-in defaults, then an optional `voice.toml`,
//! then environment variables. API keys are only read from the environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::{Error, Result};

/// Default ElevenLabs voice ("Rachel")
pub const DEFAULT_ELEVENLABS_VOICE: &str = "21m00Tcm4TlvDq8ikWAM";

/// Default ElevenLabs model
pub const DEFAULT_ELEVENLABS_MODEL: &str = "eleven_turbo_v2_5";

/// Default `OpenAI` voice
pub const DEFAULT_OPENAI_VOICE: &str = "alloy";

/// Default `OpenAI` model
pub const DEFAULT_OPENAI_MODEL: &str = "tts-1";

/// Default bound on a single synthesis call
const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Default artifact store size cap
const DEFAULT_CACHE_MAX_MB: u64 = 100;

/// Default progress sampling interval
const DEFAULT_PROGRESS_INTERVAL_MS: u64 = 100;

/// Default speaking rate used to estimate local speech duration
const DEFAULT_SPEECH_WPM: u32 = 175;

/// Voice guidance configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Remote synthesis settings
    pub synthesis: SynthesisConfig,

    /// Artifact store settings
    pub cache: CacheConfig,

    /// Playback controller settings
    pub playback: PlaybackConfig,

    /// Local speech fallback settings
    pub speech: SpeechConfig,
}

/// Remote TTS provider backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TtsProvider {
    #[default]
    ElevenLabs,
    OpenAi,
}

impl FromStr for TtsProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "elevenlabs" | "eleven_labs" => Ok(Self::ElevenLabs),
            "openai" => Ok(Self::OpenAi),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Remote synthesis configuration
#[derive(Debug, Clone)]
pub struct SynthesisConfig {
    /// Which remote service to call
    pub provider: TtsProvider,

    /// API key for the selected provider; `None` means unconfigured
    pub api_key: Option<SecretString>,

    /// Voice identifier (ElevenLabs voice ID or `OpenAI` voice name)
    pub voice: String,

    /// Model identifier
    pub model: String,

    /// Speed multiplier (`OpenAI` only, 0.25 to 4.0)
    pub speed: f32,

    /// Override for the provider base URL
    pub base_url: Option<String>,

    /// Upper bound on a single synthesis call
    pub timeout: Duration,
}

/// Artifact store configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding `<key>.mp3` artifacts
    pub dir: PathBuf,

    /// Size cap in bytes; `None` keeps artifacts indefinitely
    pub max_bytes: Option<u64>,
}

/// Playback controller configuration
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// How often progress snapshots are published while playing
    pub progress_interval: Duration,
}

/// Local speech fallback configuration
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Explicit speech program; searched on `PATH` when unset
    pub program: Option<String>,

    /// Speaking rate used for duration estimates
    pub words_per_minute: u32,
}

/// On-disk configuration (`voice.toml`)
///
/// Every field is optional; unset fields fall through to defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub provider: Option<TtsProvider>,
    pub voice: Option<String>,
    pub model: Option<String>,
    pub speed: Option<f32>,
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
    pub cache_dir: Option<PathBuf>,
    pub cache_max_mb: Option<u64>,
    pub progress_interval_ms: Option<u64>,
    pub speech_program: Option<String>,
    pub speech_wpm: Option<u32>,
}

impl FileConfig {
    /// Parse a config file from TOML text
    ///
    /// # Errors
    ///
    /// Returns error if the TOML is malformed or has unknown keys
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Return the default artifact directory, creating it if needed
///
/// Uses `~/.cache/tidesense/audio/` on Linux
pub fn audio_cache_dir() -> PathBuf {
    let cache_dir = directories::ProjectDirs::from("app", "tidesense", "tidesense").map_or_else(
        || PathBuf::from(".cache/tidesense/audio"),
        |d| d.cache_dir().join("audio"),
    );

    if let Err(e) = std::fs::create_dir_all(&cache_dir) {
        tracing::warn!(
            path = %cache_dir.display(),
            error = %e,
            "failed to create audio cache directory"
        );
    }

    cache_dir
}

impl Config {
    /// Load configuration from `voice.toml` and the environment
    ///
    /// # Errors
    ///
    /// Returns error if the config file is malformed or a value is out of range
    pub fn load() -> Result<Self> {
        let file = match Self::find_config_file() {
            Some(path) => {
                let content = std::fs::read_to_string(&path)?;
                let file = FileConfig::parse(&content)?;
                tracing::info!(path = %path.display(), "loaded voice config");
                file
            }
            None => FileConfig::default(),
        };

        Self::from_sources(file, |name| std::env::var(name).ok())
    }

    /// Build configuration from a parsed file and an environment lookup
    ///
    /// Environment values override file values.
    ///
    /// # Errors
    ///
    /// Returns error if a value is out of range
    pub fn from_sources(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let provider = match env("TIDESENSE_TTS_PROVIDER") {
            Some(p) => p.parse()?,
            None => file.provider.unwrap_or_default(),
        };

        let (key_var, default_voice, default_model) = match provider {
            TtsProvider::ElevenLabs => (
                "ELEVENLABS_API_KEY",
                DEFAULT_ELEVENLABS_VOICE,
                DEFAULT_ELEVENLABS_MODEL,
            ),
            TtsProvider::OpenAi => ("OPENAI_API_KEY", DEFAULT_OPENAI_VOICE, DEFAULT_OPENAI_MODEL),
        };

        let api_key = env(key_var)
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);

        let (voice_var, model_var, base_var) = match provider {
            TtsProvider::ElevenLabs => (
                "ELEVENLABS_VOICE_ID",
                "ELEVENLABS_MODEL_ID",
                "ELEVENLABS_BASE_URL",
            ),
            TtsProvider::OpenAi => ("OPENAI_TTS_VOICE", "OPENAI_TTS_MODEL", "OPENAI_BASE_URL"),
        };

        let speed = file.speed.unwrap_or(1.0);
        if !(0.25..=4.0).contains(&speed) {
            return Err(Error::Config(format!(
                "TTS speed must be between 0.25 and 4.0, got {speed}"
            )));
        }

        let timeout_secs = env_parse(&env, "TIDESENSE_TTS_TIMEOUT_SECS")
            .or(file.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(Error::Config("synthesis timeout must be non-zero".to_string()));
        }

        let synthesis = SynthesisConfig {
            provider,
            api_key,
            voice: env(voice_var)
                .or(file.voice)
                .unwrap_or_else(|| default_voice.to_string()),
            model: env(model_var)
                .or(file.model)
                .unwrap_or_else(|| default_model.to_string()),
            speed,
            base_url: env(base_var).or(file.base_url),
            timeout: Duration::from_secs(timeout_secs),
        };

        let dir = env("TIDESENSE_AUDIO_CACHE_DIR")
            .map(PathBuf::from)
            .or(file.cache_dir)
            .unwrap_or_else(audio_cache_dir);
        let max_mb = env_parse(&env, "TIDESENSE_CACHE_MAX_MB")
            .or(file.cache_max_mb)
            .unwrap_or(DEFAULT_CACHE_MAX_MB);
        let cache = CacheConfig {
            dir,
            max_bytes: (max_mb > 0).then(|| max_mb.saturating_mul(1024 * 1024)),
        };

        let interval_ms = env_parse(&env, "TIDESENSE_PROGRESS_INTERVAL_MS")
            .or(file.progress_interval_ms)
            .unwrap_or(DEFAULT_PROGRESS_INTERVAL_MS);
        if interval_ms == 0 {
            return Err(Error::Config(
                "progress interval must be non-zero".to_string(),
            ));
        }

        let speech = SpeechConfig {
            program: env("TIDESENSE_SPEECH_PROGRAM").or(file.speech_program),
            words_per_minute: env_parse(&env, "TIDESENSE_SPEECH_WPM")
                .or(file.speech_wpm)
                .filter(|wpm| *wpm > 0)
                .unwrap_or(DEFAULT_SPEECH_WPM),
        };

        Ok(Self {
            synthesis,
            cache,
            playback: PlaybackConfig {
                progress_interval: Duration::from_millis(interval_ms),
            },
            speech,
        })
    }

    /// Find `voice.toml` in standard locations
    fn find_config_file() -> Option<PathBuf> {
        // 1. Environment variable
        if let Ok(path) = std::env::var("TIDESENSE_CONFIG") {
            let p = PathBuf::from(path);
            if p.exists() {
                return Some(p);
            }
            tracing::warn!(path = %p.display(), "TIDESENSE_CONFIG points to a missing file");
        }

        // 2. XDG config ~/.config/tidesense/voice.toml
        directories::ProjectDirs::from("app", "tidesense", "tidesense")
            .map(|d| d.config_dir().join("voice.toml"))
            .filter(|p| p.exists())
    }
}

/// Parse a numeric environment value, ignoring malformed input
fn env_parse<T: FromStr>(env: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = env(name)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring malformed environment value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_without_file_or_env() {
        let env = env_from(&[("TIDESENSE_AUDIO_CACHE_DIR", "/tmp/tidesense-test")]);
        let config = Config::from_sources(FileConfig::default(), env).unwrap();

        assert_eq!(config.synthesis.provider, TtsProvider::ElevenLabs);
        assert!(config.synthesis.api_key.is_none());
        assert_eq!(config.synthesis.voice, DEFAULT_ELEVENLABS_VOICE);
        assert_eq!(config.synthesis.model, DEFAULT_ELEVENLABS_MODEL);
        assert_eq!(config.synthesis.timeout, Duration::from_secs(15));
        assert_eq!(config.cache.max_bytes, Some(100 * 1024 * 1024));
        assert_eq!(config.playback.progress_interval, Duration::from_millis(100));
        assert_eq!(config.speech.words_per_minute, 175);
    }

    #[test]
    fn env_overrides_file() {
        let file = FileConfig::parse(
            r#"
            voice = "file-voice"
            timeout_secs = 10
            cache_dir = "/var/cache/tidesense"
            cache_max_mb = 5
            "#,
        )
        .unwrap();
        let env = env_from(&[
            ("ELEVENLABS_API_KEY", "xi-test"),
            ("ELEVENLABS_VOICE_ID", "env-voice"),
        ]);
        let config = Config::from_sources(file, env).unwrap();

        assert_eq!(config.synthesis.voice, "env-voice");
        assert_eq!(config.synthesis.timeout, Duration::from_secs(10));
        assert_eq!(
            config.synthesis.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("xi-test".to_string())
        );
        assert_eq!(config.cache.dir, PathBuf::from("/var/cache/tidesense"));
        assert_eq!(config.cache.max_bytes, Some(5 * 1024 * 1024));
    }

    #[test]
    fn openai_provider_uses_openai_defaults() {
        let env = env_from(&[
            ("TIDESENSE_TTS_PROVIDER", "openai"),
            ("OPENAI_API_KEY", "sk-test"),
            ("ELEVENLABS_API_KEY", "xi-ignored"),
            ("TIDESENSE_AUDIO_CACHE_DIR", "/tmp/tidesense-test"),
        ]);
        let config = Config::from_sources(FileConfig::default(), env).unwrap();

        assert_eq!(config.synthesis.provider, TtsProvider::OpenAi);
        assert_eq!(config.synthesis.voice, DEFAULT_OPENAI_VOICE);
        assert_eq!(config.synthesis.model, DEFAULT_OPENAI_MODEL);
        assert_eq!(
            config.synthesis.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("sk-test".to_string())
        );
    }

    #[test]
    fn blank_api_key_is_unconfigured() {
        let env = env_from(&[
            ("ELEVENLABS_API_KEY", "   "),
            ("TIDESENSE_AUDIO_CACHE_DIR", "/tmp/tidesense-test"),
        ]);
        let config = Config::from_sources(FileConfig::default(), env).unwrap();
        assert!(config.synthesis.api_key.is_none());
    }

    #[test]
    fn zero_cache_cap_means_unbounded() {
        let env = env_from(&[
            ("TIDESENSE_CACHE_MAX_MB", "0"),
            ("TIDESENSE_AUDIO_CACHE_DIR", "/tmp/tidesense-test"),
        ]);
        let config = Config::from_sources(FileConfig::default(), env).unwrap();
        assert_eq!(config.cache.max_bytes, None);
    }

    #[test]
    fn malformed_env_number_falls_back_to_default() {
        let env = env_from(&[
            ("TIDESENSE_TTS_TIMEOUT_SECS", "soon"),
            ("TIDESENSE_AUDIO_CACHE_DIR", "/tmp/tidesense-test"),
        ]);
        let config = Config::from_sources(FileConfig::default(), env).unwrap();
        assert_eq!(config.synthesis.timeout, Duration::from_secs(15));
    }

    #[test]
    fn rejects_zero_timeout_and_bad_speed() {
        let env = env_from(&[
            ("TIDESENSE_TTS_TIMEOUT_SECS", "0"),
            ("TIDESENSE_AUDIO_CACHE_DIR", "/tmp/tidesense-test"),
        ]);
        assert!(Config::from_sources(FileConfig::default(), env).is_err());

        let file = FileConfig::parse("speed = 9.0").unwrap();
        let env = env_from(&[("TIDESENSE_AUDIO_CACHE_DIR", "/tmp/tidesense-test")]);
        assert!(Config::from_sources(file, env).is_err());
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        assert!(FileConfig::parse("voice_id = \"x\"").is_err());
    }

    #[test]
    fn provider_from_str() {
        assert_eq!("ElevenLabs".parse::<TtsProvider>().unwrap(), TtsProvider::ElevenLabs);
        assert_eq!(" openai ".parse::<TtsProvider>().unwrap(), TtsProvider::OpenAi);
        assert!("polly".parse::<TtsProvider>().is_err());
    }
}
