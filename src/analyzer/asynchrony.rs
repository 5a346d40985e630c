//! Onset asynchrony within chords.
//!
//! For every group of notes sharing a score onset: how far apart the
//! performed onsets are, how much the voices drift from each other, and
//! whether the spread follows pitch or velocity.

use std::collections::BTreeMap;

use super::matched::{onsetwise_to_notewise, MatchedScore};
use super::{stats, ExtraArray, FeatureOptions, FeatureOutput, FeatureTable};
use crate::performance::Performance;

/// Interval class names, indexed by [`interval_class`].
pub const INTERVAL_CLASSES: [&str; 8] = ["U", "m2m7", "M2M7", "m3m6", "M3M6", "P4", "TT", "P5"];

/// Inversion-equivalent class of an interval in semitones.
pub fn interval_class(semitones: i32) -> usize {
    match semitones.rem_euclid(12) {
        0 => 0,
        1 | 11 => 1,
        2 | 10 => 2,
        3 | 9 => 3,
        4 | 8 => 4,
        5 => 5,
        6 => 6,
        _ => 7,
    }
}

/// Largest onset spread reported, in seconds.
const MAX_SPREAD: f64 = 1.0;

#[derive(Debug, Default, Clone, Copy)]
struct ChordAsynchrony {
    delta: f64,
    pitch_cor: f64,
    vel_cor: f64,
    pitch_vel_cor: f64,
    voice_std: f64,
    no_cor: bool,
}

/// Correlation of two series after shifting each to a zero minimum.
/// Zero when either series is constant.
fn shifted_cor(x: &[f64], y: &[f64]) -> f64 {
    let shift = |v: &[f64]| {
        let min = v.iter().copied().fold(f64::INFINITY, f64::min);
        v.iter().map(|a| a - min).collect::<Vec<f64>>()
    };
    let (x, y) = (shift(x), shift(y));
    if x.iter().sum::<f64>() == 0.0 || y.iter().sum::<f64>() == 0.0 {
        return 0.0;
    }
    stats::pearson(&x, &y).unwrap_or(0.0)
}

pub fn asynchrony_feature(
    matched: &MatchedScore,
    _performance: &Performance,
    _options: &FeatureOptions,
) -> FeatureOutput {
    let n = matched.len();
    let mut per_group = Vec::with_capacity(matched.groups.len());
    let mut interval_mask: BTreeMap<String, Vec<bool>> = INTERVAL_CLASSES
        .iter()
        .map(|c| (c.to_string(), vec![false; n]))
        .collect();

    for (_, group) in matched.groups.iter() {
        let notes: Vec<_> = group.iter().map(|&i| &matched.notes[i]).collect();
        let p_onsets: Vec<f64> = notes.iter().map(|n| n.p_onset).collect();
        let pitches: Vec<f64> = notes.iter().map(|n| n.pitch as f64).collect();
        let velocities: Vec<f64> = notes.iter().map(|n| n.velocity as f64).collect();

        let max = p_onsets.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = p_onsets.iter().copied().fold(f64::INFINITY, f64::min);

        let mut voices: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
        for note in &notes {
            voices.entry(note.voice).or_default().push(note.p_onset);
        }
        let voice_means: Vec<f64> = voices.values().map(|v| stats::mean(v)).collect();

        let mut chord = ChordAsynchrony {
            delta: (max - min).min(MAX_SPREAD),
            voice_std: stats::std_dev(&voice_means).min(MAX_SPREAD),
            ..Default::default()
        };

        if notes.len() == 1 {
            chord.no_cor = true;
            per_group.push(chord);
            continue;
        }

        // earlier onsets in higher voices give a positive correlation
        chord.pitch_cor = -shifted_cor(&pitches, &p_onsets);
        chord.vel_cor = -shifted_cor(&velocities, &p_onsets);
        chord.pitch_vel_cor = shifted_cor(&velocities, &pitches);

        let top = notes.iter().map(|n| n.pitch).max().unwrap_or(0);
        let mut intervals: Vec<i32> = notes.iter().map(|n| top - n.pitch).collect();
        if let Some(pos) = intervals.iter().position(|&d| d == 0) {
            intervals.remove(pos);
        }
        for interval in intervals {
            let class = INTERVAL_CLASSES[interval_class(interval)];
            if let Some(mask) = interval_mask.get_mut(class) {
                for &i in group {
                    mask[i] = true;
                }
            }
        }

        per_group.push(chord);
    }

    let column = |f: fn(&ChordAsynchrony) -> f64| {
        let values: Vec<f64> = per_group.iter().map(f).collect();
        onsetwise_to_notewise(&values, &matched.groups, n)
    };

    let mut table = FeatureTable::new(n);
    table.push("delta", column(|c| c.delta));
    table.push("pitch_cor", column(|c| c.pitch_cor));
    table.push("vel_cor", column(|c| c.vel_cor));
    table.push("pitch_vel_cor", column(|c| c.pitch_vel_cor));
    table.push("voice_std", column(|c| c.voice_std));

    let no_cor: Vec<bool> = per_group.iter().map(|c| c.no_cor).collect();

    FeatureOutput::new(table)
        .with_extra(
            "no_cor_mask",
            ExtraArray::Flags(onsetwise_to_notewise(&no_cor, &matched.groups, n)),
        )
        .with_extra("interval_mask", ExtraArray::NamedFlags(interval_mask))
}
