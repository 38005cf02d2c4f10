//! Fake edits: a short phrase is typed, regretted, and deleted again.
//!
//! The phrase comes from a remote generator when one is configured and reachable,
//! otherwise from a fixed list. Filler problems never fail a session.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::cancel::CancellationToken;
use crate::error::FillerError;
use crate::keyboard::keystroke_for_output_char;
use crate::mistakes::micro_hesitation;
use crate::output::{Flow, Interrupt, TypedOutput, STATUS_TYPING};
use crate::request::TypingRequest;

pub const MAX_FILLER_CHARS: usize = 80;
pub const CONTEXT_CHARS: usize = 200;

pub(crate) const STATUS_THINKING: &str = "Thinking...";

const FALLBACK_PHRASES: &[&str] = &[
    "I think that",
    "maybe it would be",
    "on the other hand",
    "what I mean is",
    "in other words",
    "to be honest",
    "let me rephrase",
    "it seems like",
    "the point is",
    "for example",
];

/// What is sent to the filler generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillerPrompt {
    /// Tail of the visible text the phrase should continue.
    pub context: String,
    pub prompt: String,
}

impl FillerPrompt {
    pub fn from_visible(visible: &[char]) -> Self {
        let start = visible.len().saturating_sub(CONTEXT_CHARS);
        let context: String = visible[start..].iter().collect();
        let prompt = format!(
            "Continue this text with a short phrase of three to eight words that a writer might \
             start typing and then delete. Reply with the phrase only.\n\nText:\n{context}"
        );
        Self { context, prompt }
    }
}

/// Source of filler phrases.
pub trait FillerSource: Send + Sync {
    /// Fetch one phrase. Implementations return promptly once `token` is stopped.
    fn fetch(
        &self,
        prompt: &FillerPrompt,
        token: &CancellationToken,
    ) -> Result<String, FillerError>;
}

/// Never reaches the network; every detour uses a fallback phrase.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineFillerSource;

impl FillerSource for OfflineFillerSource {
    fn fetch(
        &self,
        _prompt: &FillerPrompt,
        _token: &CancellationToken,
    ) -> Result<String, FillerError> {
        Err(FillerError::Disabled)
    }
}

/// Record of one filler detour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillerAttempt {
    pub context_prefix: String,
    pub timeout: Duration,
    pub result: String,
    pub was_fallback: bool,
}

/// Clean up a generator reply so it can be typed on a US keyboard.
pub fn sanitize_filler(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let unquoted = trimmed
        .trim_start_matches(['"', '\'', '“', '‘'])
        .trim_end_matches(['"', '\'', '”', '’']);

    let mut out = String::new();
    for c in unquoted.chars() {
        if c.is_whitespace() {
            if !out.is_empty() && !out.ends_with(' ') {
                out.push(' ');
            }
            continue;
        }
        if keystroke_for_output_char(c).is_some() {
            out.push(c);
        }
    }

    let capped: String = out.chars().take(MAX_FILLER_CHARS).collect();
    let capped = capped.trim().to_string();
    (!capped.is_empty()).then_some(capped)
}

/// Fit a phrase to where it is typed: sentence case after a sentence end, a leading
/// space after a non-space character.
pub fn adapt_to_context(phrase: &str, visible: &[char]) -> String {
    let last_non_space = visible.iter().rev().find(|c| !c.is_whitespace());
    let sentence_start = matches!(last_non_space, None | Some('.' | '!' | '?'));

    let mut chars = phrase.chars();
    let mut out = String::with_capacity(phrase.len() + 1);
    if visible.last().is_some_and(|c| !c.is_whitespace()) {
        out.push(' ');
    }

    if let Some(first) = chars.next() {
        let second_is_lower = phrase.chars().nth(1).is_some_and(|c| c.is_lowercase());
        if sentence_start {
            out.extend(first.to_uppercase());
        } else if second_is_lower {
            out.extend(first.to_lowercase());
        } else {
            out.push(first);
        }
    }
    out.extend(chars);
    out
}

pub(crate) struct FillerWorkflow {
    source: Arc<dyn FillerSource>,
    timeout: Duration,
    min_words: usize,
    base_chance: f64,
    punctuation_chance: f64,
    sentence_end_chance: f64,
    cooldown_words: usize,
    hesitation_chance: f64,
    last_fired_at_words: Option<usize>,
}

impl FillerWorkflow {
    pub(crate) fn new(
        request: &TypingRequest,
        source: Arc<dyn FillerSource>,
        timeout: Duration,
    ) -> Self {
        let b = request.behavior();
        Self {
            source,
            timeout,
            min_words: b.filler_min_words,
            base_chance: b.filler_base_chance,
            punctuation_chance: b.filler_punctuation_chance,
            sentence_end_chance: b.filler_sentence_end_chance,
            cooldown_words: b.filler_cooldown_words,
            hesitation_chance: b.filler_hesitation_chance,
            last_fired_at_words: None,
        }
    }

    /// Roll for a detour before the next character. `prev` is the character typed last.
    pub(crate) fn should_fire(
        &self,
        prev: Option<char>,
        words_typed: usize,
        rng: &mut impl Rng,
    ) -> bool {
        if words_typed < self.min_words {
            return false;
        }
        if let Some(last) = self.last_fired_at_words {
            if words_typed.saturating_sub(last) < self.cooldown_words {
                return false;
            }
        }

        let chance = match prev {
            Some('.' | '!' | '?') => self.sentence_end_chance,
            Some(',' | ';' | ':') => self.punctuation_chance,
            _ => self.base_chance,
        };
        rng.gen_bool(chance)
    }

    /// Run one detour. The visible text is the same before and after.
    pub(crate) fn run_detour(
        &mut self,
        out: &mut TypedOutput,
        words_typed: usize,
    ) -> Flow<FillerAttempt> {
        self.last_fired_at_words = Some(words_typed);

        out.events.status(STATUS_THINKING);
        let thinking = out.timing.thinking_pause(&mut out.rng);
        out.wait(thinking)?;

        let prompt = FillerPrompt::from_visible(out.visible());
        let fetched = self.source.fetch(&prompt, out.token());
        if out.token().is_stopped() {
            return Err(Interrupt::Stopped);
        }

        let (phrase, was_fallback) = match fetched.map(|raw| sanitize_filler(&raw)) {
            Ok(Some(phrase)) => (phrase, false),
            Ok(None) => {
                tracing::debug!(error = %FillerError::Empty, "using fallback filler");
                (self.fallback(out), true)
            }
            Err(err) => {
                tracing::debug!(error = %err, "using fallback filler");
                (self.fallback(out), true)
            }
        };
        let phrase = adapt_to_context(&phrase, out.visible());

        out.events.status(STATUS_TYPING);
        for c in phrase.chars() {
            if self.hesitation_chance > 0.0 && out.rng.gen_bool(self.hesitation_chance) {
                micro_hesitation(out)?;
            }
            out.type_char(c)?;
        }

        let regret = out.timing.regret_pause(&mut out.rng);
        out.wait(regret)?;
        out.backspace_n(phrase.chars().count())?;

        Ok(FillerAttempt {
            context_prefix: prompt.context,
            timeout: self.timeout,
            result: phrase,
            was_fallback,
        })
    }

    fn fallback(&self, out: &mut TypedOutput) -> String {
        FALLBACK_PHRASES[out.rng.gen_range(0..FALLBACK_PHRASES.len())].to_string()
    }
}

#[cfg(feature = "remote-filler")]
pub mod remote {
    use super::*;

    use anyhow::{Context, Result};
    use reqwest::StatusCode;
    use serde::{Deserialize, Serialize};

    use crate::cancel::POLL_INTERVAL;
    use crate::config::FillerSettings;

    pub const FILLER_ENDPOINT_ENV: &str = "GHOSTTYPE_FILLER_ENDPOINT";
    pub const LICENSE_KEY_ENV: &str = "GHOSTTYPE_LICENSE_KEY";

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct FillerRequestBody<'a> {
        prompt: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        license_key: Option<&'a str>,
    }

    #[derive(Debug, Deserialize)]
    struct FillerResponseBody {
        filler: String,
    }

    /// Fill unset endpoint/key from the environment (and `.env`).
    pub fn settings_with_env(mut settings: FillerSettings) -> FillerSettings {
        dotenvy::dotenv().ok();
        if settings.endpoint.is_none() {
            settings.endpoint = std::env::var(FILLER_ENDPOINT_ENV)
                .ok()
                .filter(|v| !v.is_empty());
        }
        if settings.license_key.is_none() {
            settings.license_key = std::env::var(LICENSE_KEY_ENV)
                .ok()
                .filter(|v| !v.is_empty());
        }
        settings
    }

    /// Blocking client for the filler endpoint. Owns a small single-threaded runtime.
    #[derive(Debug)]
    pub struct RemoteFillerSource {
        client: reqwest::Client,
        runtime: tokio::runtime::Runtime,
        endpoint: String,
        license_key: Option<String>,
        timeout: Duration,
    }

    impl RemoteFillerSource {
        pub fn new(
            endpoint: impl Into<String>,
            license_key: Option<String>,
            timeout: Duration,
        ) -> Result<Self> {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to build filler runtime")?;
            let client = reqwest::Client::builder()
                .build()
                .context("failed to build HTTP client")?;

            Ok(Self {
                client,
                runtime,
                endpoint: endpoint.into(),
                license_key,
                timeout,
            })
        }

        /// `Ok(None)` when no endpoint is configured.
        pub fn from_settings(settings: &FillerSettings) -> Result<Option<Self>> {
            let Some(endpoint) = settings.endpoint.clone() else {
                return Ok(None);
            };
            Self::new(
                endpoint,
                settings.license_key.clone(),
                Duration::from_millis(settings.timeout_ms),
            )
            .map(Some)
        }

        async fn post(&self, prompt: &FillerPrompt) -> Result<String, FillerError> {
            let body = FillerRequestBody {
                prompt: &prompt.prompt,
                license_key: self.license_key.as_deref(),
            };
            let resp = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .await
                .map_err(|e| FillerError::Transport(e.to_string()))?;

            if resp.status() != StatusCode::OK {
                return Err(FillerError::Status(resp.status().as_u16()));
            }

            let body: FillerResponseBody = resp
                .json()
                .await
                .map_err(|e| FillerError::MalformedBody(e.to_string()))?;
            sanitize_filler(&body.filler).ok_or(FillerError::Empty)
        }
    }

    async fn wait_for_stop(token: &CancellationToken) {
        while !token.is_stopped() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    impl FillerSource for RemoteFillerSource {
        fn fetch(
            &self,
            prompt: &FillerPrompt,
            token: &CancellationToken,
        ) -> Result<String, FillerError> {
            self.runtime.block_on(async {
                tokio::select! {
                    res = tokio::time::timeout(self.timeout, self.post(prompt)) => {
                        res.map_err(|_| FillerError::Timeout(self.timeout))?
                    }
                    _ = wait_for_stop(token) => Err(FillerError::Cancelled),
                }
            })
        }
    }
}

#[cfg(not(feature = "remote-filler"))]
pub mod remote {
    use super::*;

    use anyhow::{anyhow, Result};

    use crate::config::FillerSettings;

    pub fn settings_with_env(settings: FillerSettings) -> FillerSettings {
        settings
    }

    #[derive(Debug)]
    pub struct RemoteFillerSource;

    impl RemoteFillerSource {
        pub fn new(
            _endpoint: impl Into<String>,
            _license_key: Option<String>,
            _timeout: Duration,
        ) -> Result<Self> {
            Err(anyhow!(
                "remote filler support is disabled (build with --features remote-filler)"
            ))
        }

        pub fn from_settings(settings: &FillerSettings) -> Result<Option<Self>> {
            if settings.endpoint.is_some() {
                tracing::warn!(
                    "filler endpoint configured but remote filler support is disabled in this build"
                );
            }
            Ok(None)
        }
    }

    impl FillerSource for RemoteFillerSource {
        fn fetch(
            &self,
            _prompt: &FillerPrompt,
            _token: &CancellationToken,
        ) -> Result<String, FillerError> {
            Err(FillerError::Disabled)
        }
    }
}

/// Remote source when configured, offline fallback otherwise.
pub fn source_from_settings(settings: &crate::config::FillerSettings) -> Arc<dyn FillerSource> {
    match remote::RemoteFillerSource::from_settings(settings) {
        Ok(Some(source)) => Arc::new(source),
        Ok(None) => Arc::new(OfflineFillerSource),
        Err(err) => {
            tracing::warn!(
                error = %format!("{err:#}"),
                "remote filler unavailable, using fallback phrases"
            );
            Arc::new(OfflineFillerSource)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_quotes_and_untypeable_chars() {
        assert_eq!(
            sanitize_filler("  \"well, what I meant\nwas\u{00e9}\"  ").as_deref(),
            Some("well, what I meant was")
        );
        assert_eq!(sanitize_filler("\u{4f60}\u{597d}"), None);
        assert_eq!(sanitize_filler("   "), None);
    }

    #[test]
    fn sanitize_caps_length() {
        let long = "word ".repeat(40);
        let out = sanitize_filler(&long).unwrap();
        assert!(out.chars().count() <= MAX_FILLER_CHARS);
        assert!(!out.ends_with(' '));
    }

    #[test]
    fn phrase_is_capitalized_after_sentence_end() {
        let visible: Vec<char> = "It rained.".chars().collect();
        assert_eq!(adapt_to_context("maybe it would be", &visible), " Maybe it would be");

        let visible: Vec<char> = "It rained. ".chars().collect();
        assert_eq!(adapt_to_context("maybe it would be", &visible), "Maybe it would be");
    }

    #[test]
    fn phrase_is_lowercased_mid_sentence_but_keeps_pronoun_i() {
        let visible: Vec<char> = "It rained and".chars().collect();
        assert_eq!(adapt_to_context("On the other hand", &visible), " on the other hand");
        assert_eq!(adapt_to_context("I think that", &visible), " I think that");
    }

    #[test]
    fn prompt_uses_last_context_chars() {
        let visible: Vec<char> = "x".repeat(250).chars().chain("tail".chars()).collect();
        let prompt = FillerPrompt::from_visible(&visible);
        assert_eq!(prompt.context.chars().count(), CONTEXT_CHARS);
        assert!(prompt.context.ends_with("tail"));
        assert!(prompt.prompt.ends_with("tail"));
    }
}
