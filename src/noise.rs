//! Ambient noise detection
//!
//! Keeps a short rolling window of audio energy samples. A violation fires only
//! for a sustained pattern (at least 2 of the newest 3 samples above the floor)
//! so a single cough or door slam never counts, and a cooldown keeps
//! continuous noise from flooding the ledger.

use crate::config::{NoiseConfig, MAX_NOISE_WINDOW};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Sustained-noise finding for one tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseAlert {
    /// Mean energy of the inspected recent samples
    pub recent_average: f64,
    /// Loud samples among the inspected ones
    pub loud_samples: usize,
}

/// Rolling-window noise detector
#[derive(Debug, Clone)]
pub struct NoiseDetector {
    config: NoiseConfig,
    window: VecDeque<f64>,
    last_fired_at: Option<DateTime<Utc>>,
}

impl NoiseDetector {
    pub fn new(config: NoiseConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window.min(MAX_NOISE_WINDOW)),
            config,
            last_fired_at: None,
        }
    }

    /// Most recent sample, for level meters
    pub fn current_level(&self) -> Option<f64> {
        self.window.back().copied()
    }

    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.window.iter().copied()
    }

    pub fn last_fired_at(&self) -> Option<DateTime<Utc>> {
        self.last_fired_at
    }

    /// Push one energy sample taken at `now`; returns an alert when a
    /// violation should be recorded.
    pub fn observe(&mut self, energy: f64, now: DateTime<Utc>) -> Option<NoiseAlert> {
        self.window.push_back(energy);
        while self.window.len() > self.config.window {
            self.window.pop_front();
        }

        if self.window.len() < self.config.recent {
            return None;
        }

        let recent: Vec<f64> = self
            .window
            .iter()
            .rev()
            .take(self.config.recent)
            .copied()
            .collect();
        let loud_samples = recent.iter().filter(|&&e| e > self.config.floor).count();
        if loud_samples < self.config.min_loud {
            return None;
        }

        if let Some(last) = self.last_fired_at {
            if now - last <= Duration::seconds(self.config.cooldown_secs) {
                return None;
            }
        }

        self.last_fired_at = Some(now);
        Some(NoiseAlert {
            recent_average: recent.iter().sum::<f64>() / recent.len() as f64,
            loud_samples,
        })
    }

    /// Forget samples and cooldown
    pub fn clear(&mut self) {
        self.window.clear();
        self.last_fired_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn run(levels: &[f64]) -> Vec<i64> {
        let mut detector = NoiseDetector::new(NoiseConfig::default());
        levels
            .iter()
            .enumerate()
            .filter_map(|(i, &level)| detector.observe(level, t(i as i64)).map(|_| i as i64))
            .collect()
    }

    #[test]
    fn test_single_spike_never_fires() {
        assert!(run(&[10.0, 95.0, 10.0, 10.0, 95.0, 10.0, 10.0]).is_empty());
    }

    #[test]
    fn test_needs_three_samples_before_judging() {
        let mut detector = NoiseDetector::new(NoiseConfig::default());
        assert!(detector.observe(90.0, t(0)).is_none());
        assert!(detector.observe(90.0, t(1)).is_none());
        let alert = detector.observe(30.0, t(2)).unwrap();
        assert_eq!(alert.loud_samples, 2);
        assert!((alert.recent_average - 70.0).abs() < 1e-9);
    }

    #[test]
    fn test_continuous_noise_respects_cooldown() {
        // Loud for 25 seconds: fires at 2, then strictly more than 10s later
        let fired = run(&[80.0; 25]);
        assert_eq!(fired, vec![2, 13, 24]);
    }

    #[test]
    fn test_floor_is_exclusive() {
        assert!(run(&[60.0, 60.0, 60.0]).is_empty());
        assert_eq!(run(&[60.5, 60.5, 0.0]), vec![2]);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut detector = NoiseDetector::new(NoiseConfig::default());
        for i in 0..20 {
            detector.observe(i as f64, t(i));
        }
        let samples: Vec<f64> = detector.samples().collect();
        assert_eq!(samples, vec![15.0, 16.0, 17.0, 18.0, 19.0]);
        assert_eq!(detector.current_level(), Some(19.0));
    }

    proptest! {
        #[test]
        fn prop_fires_only_on_sustained_noise_and_respects_cooldown(
            levels in proptest::collection::vec(0.0f64..120.0, 0..120)
        ) {
            let config = NoiseConfig::default();
            let mut detector = NoiseDetector::new(config.clone());
            let mut last_fire: Option<i64> = None;

            for (i, &level) in levels.iter().enumerate() {
                let fired = detector.observe(level, t(i as i64)).is_some();
                if fired {
                    prop_assert!(i + 1 >= config.recent);
                    let start = i + 1 - config.recent;
                    let loud = levels[start..=i].iter().filter(|&&l| l > config.floor).count();
                    prop_assert!(loud >= config.min_loud);
                    if let Some(prev) = last_fire {
                        prop_assert!(i as i64 - prev > config.cooldown_secs);
                    }
                    last_fire = Some(i as i64);
                }
            }
        }
    }
}
