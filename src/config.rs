use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

/// Tuning knobs for timing, mistakes and filler detours.
///
/// Every field has a default; a config file only needs to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Relative jitter applied on top of the uniform per-character delay.
    pub burst_variability: f64,
    pub min_char_delay_ms: u64,
    /// Characters followed by an extra `2 x max_delay` pause.
    pub punctuation: String,
    pub sentence_break_chance: f64,
    pub sentence_break_min_ms: u64,
    pub sentence_break_max_ms: u64,
    pub zone_out_chance: f64,
    pub zone_out_min_ms: u64,
    pub zone_out_max_ms: u64,
    /// Backspace cadence as a fraction of a character delay.
    pub backspace_delay_factor: f64,
    pub typo_notice_min_ms: u64,
    pub typo_notice_max_ms: u64,

    pub delayed_correction_chance: f64,
    pub correction_threshold_min: usize,
    pub correction_threshold_max: usize,
    pub max_pending_corrections: usize,
    pub hesitation_chance: f64,

    pub filler_min_words: usize,
    pub filler_base_chance: f64,
    pub filler_punctuation_chance: f64,
    pub filler_sentence_end_chance: f64,
    pub filler_cooldown_words: usize,
    /// Micro-hesitation chance per character while a filler phrase is typed.
    pub filler_hesitation_chance: f64,
    pub thinking_pause_mean_ms: f64,
    pub thinking_pause_std_ms: f64,
    pub regret_pause_mean_ms: f64,
    pub regret_pause_std_ms: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            burst_variability: 0.3,
            min_char_delay_ms: 5,
            punctuation: ",;:.!?".to_string(),
            sentence_break_chance: 0.4,
            sentence_break_min_ms: 2_000,
            sentence_break_max_ms: 8_000,
            zone_out_chance: 0.0005,
            zone_out_min_ms: 15_000,
            zone_out_max_ms: 45_000,
            backspace_delay_factor: 0.6,
            typo_notice_min_ms: 120,
            typo_notice_max_ms: 420,

            delayed_correction_chance: 0.15,
            correction_threshold_min: 20,
            correction_threshold_max: 40,
            max_pending_corrections: 2,
            hesitation_chance: 0.003,

            filler_min_words: 10,
            filler_base_chance: 0.002,
            filler_punctuation_chance: 0.05,
            filler_sentence_end_chance: 0.15,
            filler_cooldown_words: 15,
            filler_hesitation_chance: 0.02,
            thinking_pause_mean_ms: 1_400.0,
            thinking_pause_std_ms: 450.0,
            regret_pause_mean_ms: 900.0,
            regret_pause_std_ms: 300.0,
        }
    }
}

fn ensure_probability(value: f64, name: &str) -> Result<()> {
    ensure!(
        (0.0..=1.0).contains(&value),
        "{name} must be between 0.0 and 1.0"
    );
    Ok(())
}

pub(crate) fn validate_behavior(cfg: &BehaviorConfig) -> Result<()> {
    ensure!(
        cfg.burst_variability.is_finite() && (0.0..1.0).contains(&cfg.burst_variability),
        "burst_variability must be in [0.0, 1.0)"
    );
    ensure!(
        cfg.backspace_delay_factor.is_finite() && cfg.backspace_delay_factor > 0.0,
        "backspace_delay_factor must be > 0"
    );

    ensure_probability(cfg.sentence_break_chance, "sentence_break_chance")?;
    ensure_probability(cfg.zone_out_chance, "zone_out_chance")?;
    ensure_probability(cfg.delayed_correction_chance, "delayed_correction_chance")?;
    ensure_probability(cfg.hesitation_chance, "hesitation_chance")?;
    ensure_probability(cfg.filler_base_chance, "filler_base_chance")?;
    ensure_probability(cfg.filler_punctuation_chance, "filler_punctuation_chance")?;
    ensure_probability(cfg.filler_sentence_end_chance, "filler_sentence_end_chance")?;
    ensure_probability(cfg.filler_hesitation_chance, "filler_hesitation_chance")?;

    ensure!(
        cfg.sentence_break_min_ms <= cfg.sentence_break_max_ms,
        "sentence_break_min_ms must be <= sentence_break_max_ms"
    );
    ensure!(
        cfg.zone_out_min_ms <= cfg.zone_out_max_ms,
        "zone_out_min_ms must be <= zone_out_max_ms"
    );
    ensure!(
        cfg.typo_notice_min_ms <= cfg.typo_notice_max_ms,
        "typo_notice_min_ms must be <= typo_notice_max_ms"
    );
    ensure!(
        cfg.correction_threshold_min <= cfg.correction_threshold_max,
        "correction_threshold_min must be <= correction_threshold_max"
    );

    for (name, mean, std) in [
        (
            "thinking_pause",
            cfg.thinking_pause_mean_ms,
            cfg.thinking_pause_std_ms,
        ),
        (
            "regret_pause",
            cfg.regret_pause_mean_ms,
            cfg.regret_pause_std_ms,
        ),
    ] {
        ensure!(
            mean.is_finite() && mean >= 0.0 && std.is_finite() && std >= 0.0,
            "{name} mean and std must be finite and >= 0"
        );
    }

    Ok(())
}

/// Where the filler generator lives. Secrets are usually filled in from the environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillerSettings {
    pub endpoint: Option<String>,
    pub license_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for FillerSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            license_key: None,
            timeout_ms: 8_000,
        }
    }
}

/// Settings loaded from `--config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub behavior: BehaviorConfig,
    pub filler: FillerSettings,
    pub session_log: Option<PathBuf>,
    pub join_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            behavior: BehaviorConfig::default(),
            filler: FillerSettings::default(),
            session_log: None,
            join_timeout_ms: 2_000,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let cfg: EngineConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        validate_behavior(&cfg.behavior)
            .with_context(|| format!("invalid behavior in {}", path.display()))?;
        Ok(cfg)
    }

    /// The configured log path, or the per-user default.
    pub fn session_log_path(&self) -> Option<PathBuf> {
        self.session_log.clone().or_else(default_session_log_path)
    }
}

pub fn default_session_log_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "ghosttype")
        .map(|dirs| dirs.data_dir().join("sessions.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_file_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_str(
            r#"{ "behavior": { "hesitation_chance": 0.0 }, "filler": { "timeout_ms": 500 } }"#,
        )
        .unwrap();

        assert_eq!(cfg.behavior.hesitation_chance, 0.0);
        assert_eq!(cfg.behavior.correction_threshold_max, 40);
        assert_eq!(cfg.filler.timeout_ms, 500);
        assert_eq!(cfg.join_timeout_ms, 2_000);
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let cfg = BehaviorConfig {
            zone_out_min_ms: 50_000,
            ..BehaviorConfig::default()
        };
        let err = validate_behavior(&cfg).unwrap_err();
        assert!(err.to_string().contains("zone_out_min_ms"));

        let cfg = BehaviorConfig {
            filler_base_chance: 1.5,
            ..BehaviorConfig::default()
        };
        assert!(validate_behavior(&cfg).is_err());
    }
}
