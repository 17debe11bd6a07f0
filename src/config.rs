// src/config.rs
// Engine configuration: backend endpoint plus the fixed thresholds the
// conversation protocol branches on. Loaded from ~/.sommelier/config.toml
// with environment-variable fallback.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Confidence below which an image result triggers grounded verification
/// and result messages switch to the hedged variant.
const DEFAULT_LOW_CONFIDENCE: f32 = 0.55;

/// Confidence at or above which the confident message variant is used.
const DEFAULT_HIGH_CONFIDENCE: f32 = 0.75;

/// How long the enrichment "thinking" indicator stays legible before the
/// results card is revealed.
const DEFAULT_CARD_DELAY_MS: u64 = 900;

/// Expiry window for the retry snapshot.
const DEFAULT_LAST_ACTION_EXPIRY_SECS: u64 = 120;

/// Client-side throttle for free-text enrichment deltas.
const DEFAULT_TEXT_DELTA_THROTTLE_MS: u64 = 120;

/// Free text at or below this length gets the "too brief, please confirm"
/// guard instead of an immediate identification call.
const DEFAULT_BRIEF_INPUT_MAX_CHARS: usize = 3;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the recognition/catalog backend.
    pub backend_url: String,
    pub api_key: Option<String>,
    pub low_confidence: f32,
    pub high_confidence: f32,
    pub card_delay_ms: u64,
    pub last_action_expiry_secs: u64,
    pub text_delta_throttle_ms: u64,
    pub brief_input_max_chars: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://localhost:8490".into(),
            api_key: None,
            low_confidence: DEFAULT_LOW_CONFIDENCE,
            high_confidence: DEFAULT_HIGH_CONFIDENCE,
            card_delay_ms: DEFAULT_CARD_DELAY_MS,
            last_action_expiry_secs: DEFAULT_LAST_ACTION_EXPIRY_SECS,
            text_delta_throttle_ms: DEFAULT_TEXT_DELTA_THROTTLE_MS,
            brief_input_max_chars: DEFAULT_BRIEF_INPUT_MAX_CHARS,
        }
    }
}

impl Config {
    /// Load config from ~/.sommelier/config.toml, then apply env overrides.
    pub fn load() -> Self {
        let mut config = Self::load_file(&config_path());
        if let Ok(url) = std::env::var("SOMMELIER_BACKEND_URL") {
            config.backend_url = url;
        }
        if let Ok(key) = std::env::var("SOMMELIER_API_KEY") {
            config.api_key = Some(key);
        }
        config
    }

    fn load_file(path: &PathBuf) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: failed to parse {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: failed to read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn card_delay(&self) -> Duration {
        Duration::from_millis(self.card_delay_ms)
    }

    pub fn last_action_expiry(&self) -> Duration {
        Duration::from_secs(self.last_action_expiry_secs)
    }

    pub fn text_delta_throttle(&self) -> Duration {
        Duration::from_millis(self.text_delta_throttle_ms)
    }
}

/// Config file location.
pub fn config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".sommelier")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.low_confidence < config.high_confidence);
        assert_eq!(config.card_delay(), Duration::from_millis(900));
    }

    #[test]
    fn test_load_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "backend_url = \"https://wine.example\"").unwrap();
        writeln!(file, "high_confidence = 0.8").unwrap();

        let config = Config::load_file(&path);
        assert_eq!(config.backend_url, "https://wine.example");
        assert_eq!(config.high_confidence, 0.8);
        // Untouched fields keep their defaults.
        assert_eq!(config.low_confidence, DEFAULT_LOW_CONFIDENCE);
    }

    #[test]
    fn test_config_path() {
        let path = config_path();
        assert!(path.to_string_lossy().contains(".sommelier"));
    }
}
