use std::time::Duration;

use anyhow::ensure;

use crate::config::{validate_behavior, BehaviorConfig};
use crate::error::{EngineError, Result};

const MAX_DELAY_MS: f64 = 60_000.0;

fn duration_from_ms(ms: f64) -> Duration {
    Duration::from_micros((ms * 1000.0).round() as u64)
}

/// Delay presets, per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpeedProfile {
    Slow,
    #[default]
    Normal,
    Fast,
    Custom,
}

impl SpeedProfile {
    /// `(min, max)` delay in milliseconds, or `None` for [`SpeedProfile::Custom`].
    pub fn delay_range_ms(self) -> Option<(u64, u64)> {
        match self {
            SpeedProfile::Slow => Some((120, 250)),
            SpeedProfile::Normal => Some((60, 140)),
            SpeedProfile::Fast => Some((30, 80)),
            SpeedProfile::Custom => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpeedProfile::Slow => "slow",
            SpeedProfile::Normal => "normal",
            SpeedProfile::Fast => "fast",
            SpeedProfile::Custom => "custom",
        }
    }
}

/// Everything a session needs to know. Immutable once built.
#[derive(Debug, Clone)]
pub struct TypingRequest {
    text: String,
    min_delay: Duration,
    max_delay: Duration,
    typo_rate: f64,
    pause_frequency: usize,
    preview_only: bool,
    advanced_anti_detect: bool,
    profile: String,
    seed: Option<u64>,
    behavior: BehaviorConfig,
}

impl TypingRequest {
    pub fn builder(text: impl Into<String>) -> TypingRequestBuilder {
        TypingRequestBuilder::new(text.into())
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn typo_rate(&self) -> f64 {
        self.typo_rate
    }

    /// Characters between periodic pauses; 0 disables them.
    pub fn pause_frequency(&self) -> usize {
        self.pause_frequency
    }

    pub fn preview_only(&self) -> bool {
        self.preview_only
    }

    pub fn advanced_anti_detect(&self) -> bool {
        self.advanced_anti_detect
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    pub fn behavior(&self) -> &BehaviorConfig {
        &self.behavior
    }
}

#[derive(Debug, Clone)]
pub struct TypingRequestBuilder {
    text: String,
    speed: SpeedProfile,
    delay_range_ms: Option<(f64, f64)>,
    typo_rate: f64,
    pause_frequency: i64,
    preview_only: bool,
    advanced_anti_detect: bool,
    profile: Option<String>,
    seed: Option<u64>,
    behavior: BehaviorConfig,
}

impl TypingRequestBuilder {
    fn new(text: String) -> Self {
        Self {
            text,
            speed: SpeedProfile::default(),
            delay_range_ms: None,
            typo_rate: 0.0,
            pause_frequency: 0,
            preview_only: false,
            advanced_anti_detect: false,
            profile: None,
            seed: None,
            behavior: BehaviorConfig::default(),
        }
    }

    pub fn speed(mut self, speed: SpeedProfile) -> Self {
        self.speed = speed;
        self
    }

    /// Explicit delay range. Overrides the speed preset.
    pub fn delay_range_ms(mut self, min: f64, max: f64) -> Self {
        self.delay_range_ms = Some((min, max));
        self
    }

    pub fn typo_rate(mut self, rate: f64) -> Self {
        self.typo_rate = rate;
        self
    }

    pub fn pause_frequency(mut self, every_chars: i64) -> Self {
        self.pause_frequency = every_chars;
        self
    }

    pub fn preview_only(mut self, preview_only: bool) -> Self {
        self.preview_only = preview_only;
        self
    }

    pub fn advanced_anti_detect(mut self, enabled: bool) -> Self {
        self.advanced_anti_detect = enabled;
        self
    }

    /// Label reported with stats. Defaults to the speed preset's name.
    pub fn profile(mut self, label: impl Into<String>) -> Self {
        self.profile = Some(label.into());
        self
    }

    pub fn seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn behavior(mut self, behavior: BehaviorConfig) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn build(self) -> Result<TypingRequest> {
        self.validate()
            .map_err(|e| EngineError::invalid(format!("{e:#}")))?;

        let (min_ms, max_ms) = match (self.delay_range_ms, self.speed.delay_range_ms()) {
            (Some(range), _) => range,
            (None, Some((min, max))) => (min as f64, max as f64),
            (None, None) => {
                return Err(EngineError::invalid(
                    "custom speed profile requires an explicit delay range",
                ))
            }
        };

        Ok(TypingRequest {
            text: self.text,
            min_delay: duration_from_ms(min_ms),
            max_delay: duration_from_ms(max_ms),
            typo_rate: self.typo_rate,
            pause_frequency: self.pause_frequency as usize,
            preview_only: self.preview_only,
            advanced_anti_detect: self.advanced_anti_detect,
            profile: self
                .profile
                .unwrap_or_else(|| self.speed.label().to_string()),
            seed: self.seed,
            behavior: self.behavior,
        })
    }

    fn validate(&self) -> anyhow::Result<()> {
        ensure!(!self.text.is_empty(), "text must not be empty");

        if let Some((min, max)) = self.delay_range_ms {
            ensure!(
                min.is_finite() && max.is_finite(),
                "delays must be finite"
            );
            ensure!(min >= 0.0 && max >= 0.0, "delays must be >= 0");
            ensure!(min <= max, "min delay must be <= max delay");
            ensure!(max <= MAX_DELAY_MS, "delays must be <= {MAX_DELAY_MS} ms");
        }

        ensure!(
            self.typo_rate.is_finite() && (0.0..=1.0).contains(&self.typo_rate),
            "typo_rate must be between 0.0 and 1.0"
        );
        ensure!(self.pause_frequency >= 0, "pause_frequency must be >= 0");

        validate_behavior(&self.behavior)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_supplies_delays_and_label() {
        let req = TypingRequest::builder("hi")
            .speed(SpeedProfile::Fast)
            .build()
            .unwrap();
        assert_eq!(req.min_delay(), Duration::from_millis(30));
        assert_eq!(req.max_delay(), Duration::from_millis(80));
        assert_eq!(req.profile(), "fast");
    }

    #[test]
    fn explicit_range_overrides_preset() {
        let req = TypingRequest::builder("hi")
            .speed(SpeedProfile::Slow)
            .delay_range_ms(10.0, 20.0)
            .profile("mine")
            .build()
            .unwrap();
        assert_eq!(req.max_delay(), Duration::from_millis(20));
        assert_eq!(req.profile(), "mine");
    }

    #[test]
    fn custom_profile_without_range_is_rejected() {
        let err = TypingRequest::builder("hi")
            .speed(SpeedProfile::Custom)
            .build()
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration(_)));
    }
}
