//! Legacy-sync drift correction
//!
//! Video is the master clock; concatenated audio follows. Each tick the
//! engine reports `|audio - video|`. The corrector fires a one-shot
//! correction when drift exceeds the threshold, then holds off until drift
//! has settled (below `threshold * rearm_ratio`) or a cooldown expires, so
//! a follower that cannot keep up is not repositioned on every tick.

use crate::config::PlaybackConfig;
use tracing::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftPolicy {
    /// Seconds of drift that trigger a correction
    pub threshold: f64,
    pub rearm_ratio: f64,
    pub cooldown_ticks: u32,
    /// Consecutive corrections after which drift is reported unrecoverable
    pub unrecoverable_after: u32,
}

impl From<&PlaybackConfig> for DriftPolicy {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            threshold: config.drift_threshold(),
            rearm_ratio: config.drift_rearm_ratio,
            cooldown_ticks: config.correction_cooldown_ticks,
            unrecoverable_after: config.unrecoverable_after_corrections,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CorrectorState {
    Armed,
    Cooling { ticks_left: u32 },
}

/// Outcome of one drift check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriftDecision {
    /// Within threshold
    InSync,
    /// Over threshold but a recent correction is still settling
    Hold,
    /// Reposition the follower onto the master clock
    Correct {
        /// Corrections in the current streak, this one included
        consecutive: u32,
        /// Streak reached the unrecoverable limit
        unrecoverable: bool,
    },
}

#[derive(Debug, Clone)]
pub struct DriftCorrector {
    policy: DriftPolicy,
    state: CorrectorState,
    consecutive: u32,
    total_corrections: u64,
}

impl DriftCorrector {
    pub fn new(policy: DriftPolicy) -> Self {
        Self {
            policy,
            state: CorrectorState::Armed,
            consecutive: 0,
            total_corrections: 0,
        }
    }

    pub fn policy(&self) -> &DriftPolicy {
        &self.policy
    }

    pub fn total_corrections(&self) -> u64 {
        self.total_corrections
    }

    /// Re-arm after a user seek; both clocks were just set explicitly
    pub fn reset(&mut self) {
        self.state = CorrectorState::Armed;
        self.consecutive = 0;
    }

    pub fn check(&mut self, drift: f64) -> DriftDecision {
        let threshold = self.policy.threshold;

        if let CorrectorState::Cooling { ticks_left } = self.state {
            if drift <= threshold * self.policy.rearm_ratio || ticks_left <= 1 {
                self.state = CorrectorState::Armed;
            } else {
                self.state = CorrectorState::Cooling {
                    ticks_left: ticks_left - 1,
                };
                trace!("Drift {:.3}s held during cooldown", drift);
                return if drift > threshold {
                    DriftDecision::Hold
                } else {
                    DriftDecision::InSync
                };
            }
        }

        if drift <= threshold {
            self.consecutive = 0;
            return DriftDecision::InSync;
        }

        self.consecutive += 1;
        self.total_corrections += 1;
        self.state = CorrectorState::Cooling {
            ticks_left: self.policy.cooldown_ticks,
        };

        let unrecoverable = self.consecutive >= self.policy.unrecoverable_after;
        if unrecoverable {
            warn!(
                "Audio/video drift {:.3}s persists after {} consecutive corrections",
                drift, self.consecutive
            );
        }
        DriftDecision::Correct {
            consecutive: self.consecutive,
            unrecoverable,
        }
    }
}
