//! Sustain pedal at each note.
//!
//! The sustain controller is treated as a piecewise-linear curve through
//! its events (zero outside them). Releases are the prominent dips of
//! that curve.

use super::matched::MatchedScore;
use super::{stats, FeatureOptions, FeatureOutput, FeatureTable};
use crate::performance::Performance;

/// Resolution of the sampled pedal curve.
const CURVE_SAMPLES: usize = 500;
/// Minimum depth of a dip counted as a release, in controller units.
const RELEASE_PROMINENCE: f64 = 10.0;
/// Controller value above which the pedal counts as down.
const PEDAL_DOWN: f64 = 10.0;
/// Largest distance to a release reported, in seconds.
const MAX_RELEASE_DISTANCE: f64 = 10.0;

/// Sustain controller curve of a performance.
#[derive(Debug, Clone, PartialEq)]
pub struct PedalCurve {
    times: Vec<f64>,
    values: Vec<f64>,
}

impl PedalCurve {
    /// With at most one sustain event the curve is flat zero.
    pub fn from_performance(performance: &Performance) -> Self {
        let events = performance.sustain_events();
        if events.len() <= 1 {
            return Self {
                times: vec![0.0, 0.0],
                values: vec![0.0, 0.0],
            };
        }
        Self {
            times: events.iter().map(|e| e.time).collect(),
            values: events.iter().map(|e| e.value as f64).collect(),
        }
    }

    pub fn value_at(&self, time: f64) -> f64 {
        stats::interp(time, &self.times, &self.values, 0.0)
    }

    pub fn final_time(&self) -> f64 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// Times of pedal releases.
    pub fn releases(&self) -> Vec<f64> {
        let x = stats::linspace(0.0, self.final_time(), CURVE_SAMPLES);
        let inverted: Vec<f64> = x.iter().map(|&t| -self.value_at(t)).collect();
        stats::find_peaks(&inverted, RELEASE_PROMINENCE)
            .into_iter()
            .map(|k| x[k])
            .collect()
    }

    /// Mean controller value over `[0, final_time]`.
    pub fn average(&self) -> f64 {
        let end = self.final_time();
        if end == 0.0 {
            return 0.0;
        }
        stats::trapezoid(&self.times, &self.values) / end
    }

    /// Share of `[0, final_time]` with the pedal down.
    pub fn coverage(&self) -> f64 {
        let end = self.final_time();
        if end == 0.0 {
            return 0.0;
        }
        let down = stats::linspace(0.0, end, CURVE_SAMPLES)
            .into_iter()
            .filter(|&t| self.value_at(t) > PEDAL_DOWN)
            .count();
        down as f64 / CURVE_SAMPLES as f64
    }
}

pub fn pedal_feature(
    matched: &MatchedScore,
    performance: &Performance,
    _options: &FeatureOptions,
) -> FeatureOutput {
    let n = matched.len();
    let curve = PedalCurve::from_performance(performance);
    let releases = curve.releases();
    let average = curve.average();
    let coverage = curve.coverage();

    let mut onset_value = Vec::with_capacity(n);
    let mut offset_value = Vec::with_capacity(n);
    let mut to_prev = Vec::with_capacity(n);
    let mut to_next = Vec::with_capacity(n);

    for note in &matched.notes {
        let (on, off) = (note.p_onset, note.p_offset());
        onset_value.push(curve.value_at(on));
        offset_value.push(curve.value_at(off));

        let prev = releases
            .iter()
            .copied()
            .filter(|&r| r <= on)
            .fold(f64::NEG_INFINITY, f64::max);
        to_prev.push(if prev.is_finite() {
            (on - prev).min(MAX_RELEASE_DISTANCE)
        } else {
            0.0
        });

        let next = releases
            .iter()
            .copied()
            .filter(|&r| r >= off)
            .fold(f64::INFINITY, f64::min);
        to_next.push(if next.is_finite() {
            (next - off).min(MAX_RELEASE_DISTANCE)
        } else {
            0.0
        });
    }

    let mut table = FeatureTable::new(n);
    table.push("onset_value", onset_value);
    table.push("offset_value", offset_value);
    table.push("to_prev_release", to_prev);
    table.push("to_next_release", to_next);
    table.push("average_pedal", vec![average; n]);
    table.push("pedal_coverage", vec![coverage; n]);
    FeatureOutput::new(table)
}
