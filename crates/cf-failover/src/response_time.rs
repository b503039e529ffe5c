//! ---
//! cf_section: "07-resilience-fault-tolerance"
//! cf_subsection: "module"
//! cf_type: "source"
//! cf_scope: "code"
//! cf_description: "Smoothed response time estimator and anomaly flag window."
//! cf_version: "v0.0.0-prealpha"
//! cf_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use cf_common::FailoverConfig;

/// Gain of the smoothed round-trip estimate.
pub const ALPHA: f64 = 1.0 / 8.0;
/// Gain of the smoothed deviation.
pub const BETA: f64 = 1.0 / 4.0;

/// Result of folding one accepted sample into the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleVerdict {
    /// The sample exceeded `rtt + k·rttVar` after warm-up.
    pub flagged: bool,
    /// The flag pushed the window past its threshold; the window was emptied.
    pub demote: bool,
}

/// Per-cluster latency statistics. Not persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseTimeInfo {
    pub request_count: u64,
    /// Smoothed round-trip time in milliseconds.
    pub rtt: f64,
    /// Smoothed mean deviation in milliseconds.
    pub rtt_var: f64,
    /// Anomaly timestamps, oldest first.
    pub flags: VecDeque<Instant>,
    pub last_update: Option<Instant>,
    pub last_transition: Option<Instant>,
}

impl ResponseTimeInfo {
    /// Fold `sample_ms` into the estimator, flagging it first if it is anomalous.
    ///
    /// The caller applies the sampling interval; this always accepts.
    pub fn record(&mut self, sample_ms: f64, now: Instant, tuning: &FailoverConfig) -> SampleVerdict {
        let flagged = self.request_count > tuning.min_request_count
            && sample_ms > self.rtt + tuning.anomaly_deviations * self.rtt_var;
        let demote = flagged && self.flag(now, tuning.flag_window, tuning.flag_threshold);

        if self.request_count == 0 {
            self.rtt = sample_ms;
            self.rtt_var = sample_ms / 2.0;
        } else {
            // The deviation uses the estimate from before this sample.
            self.rtt_var = self.rtt_var * (1.0 - BETA) + (sample_ms - self.rtt).abs() * BETA;
            self.rtt = self.rtt * (1.0 - ALPHA) + sample_ms * ALPHA;
        }
        self.request_count += 1;
        self.last_update = Some(now);

        SampleVerdict { flagged, demote }
    }

    /// Append a flag, evict those older than `window`, and report whether more
    /// than `threshold` remain. Reaching the threshold empties the window.
    pub fn flag(&mut self, now: Instant, window: Duration, threshold: usize) -> bool {
        self.flags.push_back(now);
        while let Some(oldest) = self.flags.front() {
            if now.saturating_duration_since(*oldest) > window {
                self.flags.pop_front();
            } else {
                break;
            }
        }
        if self.flags.len() > threshold {
            self.flags.clear();
            return true;
        }
        false
    }

    pub fn in_cooldown(&self, cooldown: Duration, now: Instant) -> bool {
        !cf_common::time::has_elapsed(self.last_transition, cooldown, now)
    }
}
