//! Temporal Consistency Tracker.
//!
//! Keeps a short rolling window of recognition events per identity and
//! nudges fresh confidences toward the recent trend: a person matched
//! confidently minutes ago is probably still the same person in the
//! next photo. Secondary signal only; feature-flagged in config.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::config::TemporalConfig;
use crate::types::RecognitionEvent;

pub struct TemporalTracker {
    cfg: TemporalConfig,
    windows: Mutex<HashMap<String, VecDeque<RecognitionEvent>>>,
}

impl TemporalTracker {
    pub fn new(cfg: TemporalConfig) -> Self {
        Self {
            cfg,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Append a finalized event to the identity's window and prune
    /// entries past the retention horizon.
    pub fn record(&self, event: RecognitionEvent) {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = event.at - Duration::seconds(self.cfg.retention_secs);
        let window = windows.entry(event.identity_id.clone()).or_default();
        window.push_back(event);
        while window.front().is_some_and(|e| e.at < cutoff) {
            window.pop_front();
        }
    }

    /// Adjust a fresh confidence by the identity's recent trend.
    ///
    /// Averages every event inside the consistency window, accepted or
    /// not (a run of low-confidence rejections is itself a signal):
    /// average above the boost band multiplies the confidence up
    /// (capped at 1.0), average below the dampen band multiplies it
    /// down. Applied before the threshold comparison. Identity when
    /// disabled or when there is no recent history.
    pub fn adjust(&self, identity_id: &str, confidence: f32, now: DateTime<Utc>) -> f32 {
        if !self.cfg.enabled {
            return confidence;
        }

        let Some(recent_avg) = self.recent_average(identity_id, now) else {
            return confidence;
        };

        if recent_avg > self.cfg.boost_above {
            (confidence * self.cfg.boost_factor).min(1.0)
        } else if recent_avg < self.cfg.dampen_below {
            confidence * self.cfg.dampen_factor
        } else {
            confidence
        }
    }

    /// Average confidence of events inside the consistency window, or
    /// `None` when the identity has no recent events.
    fn recent_average(&self, identity_id: &str, now: DateTime<Utc>) -> Option<f32> {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let window = windows.get(identity_id)?;
        let cutoff = now - Duration::seconds(self.cfg.consistency_window_secs);

        let mut sum = 0.0f32;
        let mut count = 0usize;
        for event in window.iter().rev() {
            if event.at < cutoff {
                break;
            }
            sum += event.confidence;
            count += 1;
        }
        if count == 0 {
            None
        } else {
            Some(sum / count as f32)
        }
    }

    /// Events currently retained for an identity (diagnostics).
    pub fn events(&self, identity_id: &str) -> Vec<RecognitionEvent> {
        let windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows
            .get(identity_id)
            .map(|w| w.iter().cloned().collect())
            .unwrap_or_default()
    }
}
