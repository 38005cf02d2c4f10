use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::events::{EventSink, SessionEvent};

/// Words between two usage increments.
pub const USAGE_STEP_WORDS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    /// Source characters typed; mistakes that were taken back do not count.
    pub chars_emitted: usize,
    pub words_typed: usize,
    pub typos_injected: usize,
    /// Seconds from the first typed character to the end of the session.
    pub duration: f64,
    pub wpm: u32,
}

pub fn words_per_minute(words: usize, duration: Duration) -> u32 {
    let minutes = duration.as_secs_f64() / 60.0;
    if minutes <= 0.0 {
        return 0;
    }
    (words as f64 / minutes).round() as u32
}

fn escape_for_log(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

pub fn format_log_line(
    timestamp: DateTime<Local>,
    text: &str,
    profile: &str,
    duration: Duration,
) -> String {
    format!(
        "[{}] {} (profile={}, duration={:.2})",
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, false),
        escape_for_log(text),
        profile,
        duration.as_secs_f64()
    )
}

pub fn append_session_log(path: &Path, line: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open session log {}", path.display()))?;
    writeln!(file, "{line}")
        .with_context(|| format!("failed to write session log {}", path.display()))?;
    Ok(())
}

/// Counters fed by the worker while it types, turned into [`SessionStats`] at the end.
pub(crate) struct SessionReporter {
    profile: String,
    log_path: Option<PathBuf>,
    started_at: Option<Duration>,
    chars: usize,
    words: usize,
    in_word: bool,
    unreported_words: usize,
}

impl SessionReporter {
    pub(crate) fn new(profile: impl Into<String>, log_path: Option<PathBuf>) -> Self {
        Self {
            profile: profile.into(),
            log_path,
            started_at: None,
            chars: 0,
            words: 0,
            in_word: false,
            unreported_words: 0,
        }
    }

    pub(crate) fn start(&mut self, now: Duration) {
        self.started_at = Some(now);
    }

    pub(crate) fn words(&self) -> usize {
        self.words
    }

    /// A source character has been typed for good.
    pub(crate) fn record_char(&mut self, c: char, events: &EventSink) {
        self.chars += 1;
        if !c.is_whitespace() {
            self.in_word = true;
            return;
        }
        if self.in_word {
            self.in_word = false;
            self.count_word(events);
        }
    }

    fn count_word(&mut self, events: &EventSink) {
        self.words += 1;
        self.unreported_words += 1;
        // A dropped step stays unreported and goes out with a later one.
        if self.unreported_words >= USAGE_STEP_WORDS
            && events.send(SessionEvent::UsageIncrement(USAGE_STEP_WORDS))
        {
            self.unreported_words -= USAGE_STEP_WORDS;
        }
    }

    /// Close the books: flush usage, write the log line, publish the stats.
    ///
    /// The trailing word only counts when the text ran to its end; a stop can cut it
    /// off half typed.
    pub(crate) fn finish(
        &mut self,
        now: Duration,
        completed: bool,
        typos_injected: usize,
        visible_text: &str,
        events: &EventSink,
    ) -> SessionStats {
        if self.in_word && completed {
            self.words += 1;
            self.unreported_words += 1;
        }
        self.in_word = false;
        if self.unreported_words > 0 {
            events.send_final(SessionEvent::UsageIncrement(self.unreported_words));
            self.unreported_words = 0;
        }

        let elapsed = now.saturating_sub(self.started_at.unwrap_or(now));
        let stats = SessionStats {
            chars_emitted: self.chars,
            words_typed: self.words,
            typos_injected,
            duration: elapsed.as_secs_f64(),
            wpm: words_per_minute(self.words, elapsed),
        };

        if let Some(path) = &self.log_path {
            let line = format_log_line(Local::now(), visible_text, &self.profile, elapsed);
            if let Err(err) = append_session_log(path, &line) {
                tracing::warn!(error = %format!("{err:#}"), "failed to append session log");
            }
        }

        tracing::info!(
            chars = stats.chars_emitted,
            words = stats.words_typed,
            typos = stats.typos_injected,
            wpm = stats.wpm,
            profile = %self.profile,
            "session finished"
        );

        events.send_final(SessionEvent::Complete {
            stats: stats.clone(),
            profile: self.profile.clone(),
        });
        stats
    }
}
