//! Delay sampling.
//!
//! Everything here is a pure function of the configuration and the RNG. The session
//! turns the returned durations into interruptible waits.

use std::time::Duration;

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::request::TypingRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseKind {
    Punctuation,
    SentenceBreak,
    Periodic,
    ZoneOut,
}

impl PauseKind {
    /// Long breaks are announced on the status line.
    pub fn is_break(self) -> bool {
        matches!(self, PauseKind::SentenceBreak | PauseKind::ZoneOut)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pause {
    pub kind: PauseKind,
    pub duration: Duration,
}

fn ms(value: f64) -> Duration {
    Duration::from_micros((value.max(0.0) * 1000.0).round() as u64)
}

fn uniform_ms(range: (u64, u64), rng: &mut impl Rng) -> Duration {
    let (lo, hi) = range;
    if lo >= hi {
        return Duration::from_millis(lo);
    }
    Duration::from_millis(rng.gen_range(lo..=hi))
}

fn normal_ms(mean: f64, std: f64, rng: &mut impl Rng) -> Duration {
    let sample = Normal::new(mean, std)
        .map(|dist| dist.sample(rng))
        .unwrap_or(mean);
    ms(sample.clamp(mean * 0.3, mean * 3.0))
}

#[derive(Debug, Clone)]
pub struct TimingModel {
    min_ms: f64,
    max_ms: f64,
    burst: f64,
    floor_ms: f64,
    punctuation: Vec<char>,
    sentence_break_chance: f64,
    sentence_break_ms: (u64, u64),
    pause_every: usize,
    zone_out_chance: f64,
    zone_out_ms: (u64, u64),
    backspace_factor: f64,
    notice_ms: (u64, u64),
    thinking_ms: (f64, f64),
    regret_ms: (f64, f64),
}

impl TimingModel {
    pub fn from_request(request: &TypingRequest) -> Self {
        let b = request.behavior();
        Self {
            min_ms: request.min_delay().as_micros() as f64 / 1000.0,
            max_ms: request.max_delay().as_micros() as f64 / 1000.0,
            burst: b.burst_variability,
            floor_ms: b.min_char_delay_ms as f64,
            punctuation: b.punctuation.chars().collect(),
            sentence_break_chance: b.sentence_break_chance,
            sentence_break_ms: (b.sentence_break_min_ms, b.sentence_break_max_ms),
            pause_every: request.pause_frequency(),
            zone_out_chance: b.zone_out_chance,
            zone_out_ms: (b.zone_out_min_ms, b.zone_out_max_ms),
            backspace_factor: b.backspace_delay_factor,
            notice_ms: (b.typo_notice_min_ms, b.typo_notice_max_ms),
            thinking_ms: (b.thinking_pause_mean_ms, b.thinking_pause_std_ms),
            regret_ms: (b.regret_pause_mean_ms, b.regret_pause_std_ms),
        }
    }

    /// Delay after one emitted character.
    pub fn char_delay(&self, rng: &mut impl Rng) -> Duration {
        ms(self.char_delay_ms(rng))
    }

    fn char_delay_ms(&self, rng: &mut impl Rng) -> f64 {
        let base = if self.min_ms < self.max_ms {
            rng.gen_range(self.min_ms..=self.max_ms)
        } else {
            self.min_ms
        };
        let jitter = if self.burst > 0.0 {
            rng.gen_range(-self.burst..=self.burst)
        } else {
            0.0
        };
        (base * (1.0 + jitter)).max(self.floor_ms)
    }

    pub fn backspace_delay(&self, rng: &mut impl Rng) -> Duration {
        ms((self.char_delay_ms(rng) * self.backspace_factor).max(self.floor_ms))
    }

    /// Hold between a typo and its correction.
    pub fn typo_notice(&self, rng: &mut impl Rng) -> Duration {
        uniform_ms(self.notice_ms, rng)
    }

    pub fn thinking_pause(&self, rng: &mut impl Rng) -> Duration {
        normal_ms(self.thinking_ms.0, self.thinking_ms.1, rng)
    }

    pub fn regret_pause(&self, rng: &mut impl Rng) -> Duration {
        normal_ms(self.regret_ms.0, self.regret_ms.1, rng)
    }

    /// Extra pauses owed after `c`, in the order they should be taken.
    ///
    /// `typed_count` is the number of source characters processed so far, `c` included.
    pub fn pauses_after(&self, c: char, typed_count: usize, rng: &mut impl Rng) -> Vec<Pause> {
        let mut pauses = Vec::new();

        if self.punctuation.contains(&c) {
            pauses.push(Pause {
                kind: PauseKind::Punctuation,
                duration: ms(self.max_ms * 2.0),
            });
        }

        if matches!(c, '.' | '!' | '?') && rng.gen_bool(self.sentence_break_chance) {
            pauses.push(Pause {
                kind: PauseKind::SentenceBreak,
                duration: uniform_ms(self.sentence_break_ms, rng),
            });
        }

        if self.pause_every > 0 && typed_count > 0 && typed_count % self.pause_every == 0 {
            pauses.push(Pause {
                kind: PauseKind::Periodic,
                duration: ms(self.max_ms),
            });
        }

        if rng.gen_bool(self.zone_out_chance) {
            pauses.push(Pause {
                kind: PauseKind::ZoneOut,
                duration: uniform_ms(self.zone_out_ms, rng),
            });
        }

        pauses
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BehaviorConfig;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn model(pause_frequency: i64, behavior: BehaviorConfig) -> TimingModel {
        let req = TypingRequest::builder("x")
            .delay_range_ms(100.0, 200.0)
            .pause_frequency(pause_frequency)
            .behavior(behavior)
            .build()
            .unwrap();
        TimingModel::from_request(&req)
    }

    fn quiet() -> BehaviorConfig {
        BehaviorConfig {
            sentence_break_chance: 0.0,
            zone_out_chance: 0.0,
            ..BehaviorConfig::default()
        }
    }

    #[test]
    fn char_delay_stays_within_jittered_range() {
        let model = model(0, BehaviorConfig::default());
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..500 {
            let d = model.char_delay(&mut rng);
            assert!(d >= Duration::from_millis(69), "{d:?}");
            assert!(d <= Duration::from_millis(261), "{d:?}");
        }
    }

    #[test]
    fn char_delay_respects_floor() {
        let req = TypingRequest::builder("x")
            .delay_range_ms(0.0, 0.0)
            .build()
            .unwrap();
        let model = TimingModel::from_request(&req);
        let mut rng = StdRng::seed_from_u64(2);
        assert_eq!(model.char_delay(&mut rng), Duration::from_millis(5));
    }

    #[test]
    fn punctuation_and_periodic_pauses_are_ordered() {
        let model = model(4, quiet());
        let mut rng = StdRng::seed_from_u64(3);

        assert_eq!(model.pauses_after('a', 3, &mut rng), vec![]);
        assert_eq!(
            model.pauses_after(',', 4, &mut rng),
            vec![
                Pause {
                    kind: PauseKind::Punctuation,
                    duration: Duration::from_millis(400),
                },
                Pause {
                    kind: PauseKind::Periodic,
                    duration: Duration::from_millis(200),
                },
            ]
        );
    }

    #[test]
    fn zero_pause_frequency_disables_periodic_pauses() {
        let model = model(0, quiet());
        let mut rng = StdRng::seed_from_u64(4);
        for n in 1..200 {
            assert!(model.pauses_after('a', n, &mut rng).is_empty());
        }
    }

    #[test]
    fn certain_sentence_break_lands_in_range() {
        let model = model(
            0,
            BehaviorConfig {
                sentence_break_chance: 1.0,
                zone_out_chance: 0.0,
                ..BehaviorConfig::default()
            },
        );
        let mut rng = StdRng::seed_from_u64(5);
        let pauses = model.pauses_after('?', 1, &mut rng);
        assert_eq!(pauses.len(), 2);
        assert_eq!(pauses[1].kind, PauseKind::SentenceBreak);
        assert!(pauses[1].duration >= Duration::from_secs(2));
        assert!(pauses[1].duration <= Duration::from_secs(8));
    }

    #[test]
    fn thinking_pause_is_clamped_around_mean() {
        let model = model(0, BehaviorConfig::default());
        let mut rng = StdRng::seed_from_u64(6);
        for _ in 0..200 {
            let d = model.thinking_pause(&mut rng);
            assert!(d >= Duration::from_millis(420) && d <= Duration::from_millis(4_200));
        }
    }
}
