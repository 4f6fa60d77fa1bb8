//! Auto-capture throttling: which emotions are watched and when each may be
//! captured again.

use crate::emotion::Emotion;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Default minimum time between two auto-captures of the same label.
pub const DEFAULT_CAPTURE_COOLDOWN: Duration = Duration::from_secs(2);

/// Last capture time per label.
///
/// A label is capturable when it has never been captured or when at least
/// `cooldown` has elapsed since its last capture. Entries are never evicted.
#[derive(Debug, Clone)]
pub struct CooldownLedger {
    cooldown: Duration,
    last_capture: HashMap<String, Instant>,
}

impl CooldownLedger {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_capture: HashMap::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether `label` may be captured at `now`.
    pub fn is_ready(&self, label: &str, now: Instant) -> bool {
        match self.last_capture.get(label) {
            None => true,
            Some(&last) => now.saturating_duration_since(last) >= self.cooldown,
        }
    }

    /// Record a capture of `label` at `now` if it is ready. Returns whether it was.
    pub fn try_claim(&mut self, label: &str, now: Instant) -> bool {
        if !self.is_ready(label, now) {
            return false;
        }
        self.last_capture.insert(label.to_string(), now);
        true
    }

    pub fn last_capture(&self, label: &str) -> Option<Instant> {
        self.last_capture.get(label).copied()
    }
}

impl Default for CooldownLedger {
    fn default() -> Self {
        Self::new(DEFAULT_CAPTURE_COOLDOWN)
    }
}

/// Emotions that trigger an automatic snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSet(Vec<Emotion>);

impl WatchSet {
    pub fn new(emotions: impl IntoIterator<Item = Emotion>) -> Self {
        let mut set = Vec::new();
        for emotion in emotions {
            if !set.contains(&emotion) {
                set.push(emotion);
            }
        }
        Self(set)
    }

    pub fn contains(&self, emotion: Emotion) -> bool {
        self.0.contains(&emotion)
    }

    pub fn emotions(&self) -> &[Emotion] {
        &self.0
    }
}

impl Default for WatchSet {
    fn default() -> Self {
        Self::new([
            Emotion::Happy,
            Emotion::Surprise,
            Emotion::Angry,
            Emotion::Fear,
            Emotion::Sad,
        ])
    }
}

impl fmt::Display for WatchSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(|e| e.as_str()).collect();
        f.write_str(&names.join(", "))
    }
}

impl FromStr for WatchSet {
    type Err = crate::emotion::UnknownEmotion;

    /// Parse a comma-separated list such as `"happy, surprise"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let emotions = s
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Emotion>, _>>()?;
        Ok(Self::new(emotions))
    }
}
