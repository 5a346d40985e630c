//! Dynamics: how the played loudness follows the notated dynamics.
//!
//! Discrete markings (ppp..fff) are compared pairwise against the
//! velocities played where they appear, continuous ramps (crescendo,
//! diminuendo) are correlated with the velocity curve under them, and
//! loudness is correlated with local tempo.

use std::collections::BTreeMap;

use super::matched::{onsetwise_to_notewise, MatchedScore};
use super::{stats, Aggregation, ExtraArray, FeatureOptions, FeatureOutput, FeatureTable};
use crate::performance::Performance;
use crate::score::{LOUDNESS_DECR, LOUDNESS_INCR};

/// Ordered loudness scale, softest first.
pub const OLS: [&str; 8] = ["ppp", "pp", "p", "mp", "mf", "f", "ff", "fff"];

/// Tie-breaker added to the second of a compared pair.
const PAIR_EPSILON: f64 = 1e-5;

fn ols_rank(marking: &str) -> Option<usize> {
    OLS.iter().position(|m| *m == marking)
}

fn aggregate(values: &[f64], aggregation: Aggregation) -> f64 {
    match aggregation {
        Aggregation::Mean => stats::mean(values),
        Aggregation::Max => values.iter().copied().fold(0.0, f64::max),
    }
}

/// A discrete marking found in the score with the velocity played there.
#[derive(Debug, Clone)]
struct MarkingBeat {
    group: usize,
    rank: usize,
    velocity: f64,
}

pub fn dynamics_feature(
    matched: &MatchedScore,
    _performance: &Performance,
    options: &FeatureOptions,
) -> FeatureOutput {
    let n = matched.len();
    let groups = &matched.groups;

    let avg_vel: Vec<f64> = groups
        .groups
        .iter()
        .map(|g| {
            let v: Vec<f64> = g.iter().map(|&i| matched.notes[i].velocity as f64).collect();
            aggregate(&v, options.aggregation)
        })
        .collect();

    let tempo_cor = tempo_correlation(matched, &avg_vel, options.window_beats);

    // ── Discrete markings ───────────────────────────────────────────────
    let markings: Vec<MarkingBeat> = groups
        .groups
        .iter()
        .enumerate()
        .filter_map(|(k, g)| {
            let label = g.iter().find_map(|&i| matched.notes[i].constant_dyn.as_deref())?;
            Some(MarkingBeat {
                group: k,
                rank: ols_rank(label)?,
                velocity: avg_vel[k],
            })
        })
        .collect();

    let mut agreement = vec![0.0; groups.len()];
    let mut consistency = vec![0.0; groups.len()];
    let mut ramp_cor = vec![0.0; n];

    if markings.len() >= 2 {
        for pair in markings.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let tau = stats::kendall_tau(
                &[a.velocity, b.velocity + PAIR_EPSILON],
                &[a.rank as f64, b.rank as f64 + PAIR_EPSILON],
            );
            agreement[b.group] = tau.unwrap_or(0.0);
        }

        let mut by_marking: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
        for m in &markings {
            by_marking.entry(m.rank).or_default().push(m.velocity);
        }
        for m in &markings {
            consistency[m.group] = stats::std_dev(&by_marking[&m.rank]);
        }

        ramp_correlation(matched, LOUDNESS_INCR, 1.0, &mut ramp_cor);
        ramp_correlation(matched, LOUDNESS_DECR, -1.0, &mut ramp_cor);
    }

    let mut table = FeatureTable::new(n);
    table.push("agreement", onsetwise_to_notewise(&agreement, groups, n));
    table.push("consistency_std", onsetwise_to_notewise(&consistency, groups, n));
    table.push("ramp_cor", ramp_cor);
    table.push("tempo_cor", onsetwise_to_notewise(&tempo_cor, groups, n));

    FeatureOutput::new(table).with_extra("avg_vel", ExtraArray::Values(avg_vel))
}

/// Per onset group: correlation of tempo (1 / beat period) with loudness
/// over the groups within `window` beats. Zero when the window holds fewer
/// than two groups or either series is constant.
fn tempo_correlation(matched: &MatchedScore, avg_vel: &[f64], window: f64) -> Vec<f64> {
    let onsets = &matched.groups.onsets;
    let beat_periods: Vec<f64> = matched.group_heads().iter().map(|n| n.beat_period).collect();

    onsets
        .iter()
        .map(|&center| {
            let idx: Vec<usize> = (0..onsets.len())
                .filter(|&j| (onsets[j] - center).abs() <= window)
                .collect();
            let bp: Vec<f64> = idx.iter().map(|&j| beat_periods[j]).collect();
            let vel: Vec<f64> = idx.iter().map(|&j| avg_vel[j]).collect();
            let varies = |v: &[f64]| v.windows(2).any(|w| w[1] != w[0]);
            if idx.len() < 2 || !varies(&bp) || !varies(&vel) {
                return 0.0;
            }
            let tempo: Vec<f64> = bp.iter().map(|b| 1.0 / b).collect();
            stats::pearson(&tempo, &vel).filter(|c| c.is_finite()).unwrap_or(0.0)
        })
        .collect()
}

/// Score onsets where a ramp column starts or stops changing, paired up as
/// `(start, end)` spans.
fn ramp_spans(onsets: &[f64], ramp: &[f64]) -> Vec<(f64, f64)> {
    let changing: Vec<bool> = (0..ramp.len())
        .map(|k| {
            let prev = if k == 0 { ramp[0] } else { ramp[k - 1] };
            prev - ramp[k] != 0.0
        })
        .collect();
    let boundaries: Vec<f64> = (0..changing.len())
        .filter(|&k| {
            let prev = if k == 0 { changing[0] } else { changing[k - 1] };
            prev != changing[k]
        })
        .map(|k| onsets[k])
        .collect();
    boundaries.chunks_exact(2).map(|c| (c[0], c[1])).collect()
}

/// Correlate a ramp column with the mean velocity under each of its spans
/// and write `sign * cor` to the rows inside the span.
fn ramp_correlation(matched: &MatchedScore, column: &str, sign: f64, out: &mut [f64]) {
    let groups = &matched.groups;
    let heads = matched.group_heads();
    let ramp: Vec<f64> = heads.iter().map(|n| n.marking(column)).collect();
    if ramp.iter().all(|v| *v == 0.0) {
        return;
    }

    for (start, end) in ramp_spans(&groups.onsets, &ramp) {
        let inside: Vec<usize> = (0..groups.len())
            .filter(|&k| groups.onsets[k] >= start && groups.onsets[k] < end)
            .collect();
        let score_dyn: Vec<f64> = inside.iter().map(|&k| ramp[k]).collect();
        let perf_dyn: Vec<f64> = inside
            .iter()
            .map(|&k| {
                let v: Vec<f64> = groups.groups[k]
                    .iter()
                    .map(|&i| matched.notes[i].velocity as f64)
                    .collect();
                stats::mean(&v)
            })
            .collect();
        let min = perf_dyn.iter().copied().fold(f64::INFINITY, f64::min);
        let perf_dyn: Vec<f64> = perf_dyn.iter().map(|v| v - min).collect();

        let cor = if perf_dyn.iter().sum::<f64>() != 0.0 && score_dyn.iter().sum::<f64>() != 0.0 {
            stats::pearson(&score_dyn, &perf_dyn).unwrap_or(0.0)
        } else {
            0.0
        };

        for (k, group) in groups.groups.iter().enumerate() {
            if groups.onsets[k] >= start && groups.onsets[k] <= end {
                for &i in group {
                    out[i] = sign * cor;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::matched::tests::row;
    use crate::analyzer::matched::MatchedNote;

    fn marked(note: MatchedNote, name: &str, value: f64) -> MatchedNote {
        let mut note = note;
        note.markings.insert(name.to_string(), value);
        note
    }

    fn run(matched: &MatchedScore) -> FeatureOutput {
        dynamics_feature(matched, &Performance::default(), &FeatureOptions::default())
    }

    #[test]
    fn test_ramp_spans() {
        let onsets = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0];
        let ramp = [0.0, 0.0, 0.5, 1.0, 1.0, 1.0];
        assert_eq!(ramp_spans(&onsets, &ramp), vec![(2.0, 4.0)]);
    }

    #[test]
    fn test_agreement_follows_markings() {
        let matched = MatchedScore::from_notes(vec![
            marked(row("a", 0.0, 1.0, 60, 0.0, 0.5, 40), "loudness_direction.p", 1.0),
            marked(row("b", 1.0, 1.0, 60, 0.5, 0.5, 90), "loudness_direction.f", 1.0),
            marked(row("c", 2.0, 1.0, 60, 1.0, 0.5, 100), "loudness_direction.p", 1.0),
        ]);
        let out = run(&matched);
        let agreement = out.features.column("agreement").unwrap();
        assert_eq!(agreement, &[0.0, 1.0, -1.0]);

        // the two p beats were played at 40 and 100
        let consistency = out.features.column("consistency_std").unwrap();
        assert!((consistency[0] - 30.0).abs() < 1e-9);
        assert_eq!(consistency[1], 0.0);
    }

    #[test]
    fn test_single_marking_leaves_zeros() {
        let matched = MatchedScore::from_notes(vec![
            marked(row("a", 0.0, 1.0, 60, 0.0, 0.5, 40), "loudness_direction.p", 1.0),
            row("b", 1.0, 1.0, 60, 0.5, 0.5, 90),
        ]);
        let out = run(&matched);
        assert!(out.features.column("agreement").unwrap().iter().all(|v| *v == 0.0));
        assert!(out.features.column("ramp_cor").unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_crescendo_followed() {
        let ramp = [0.0, 0.0, 0.25, 0.5, 0.75, 1.0, 1.0, 1.0];
        let mut notes: Vec<MatchedNote> = ramp
            .iter()
            .enumerate()
            .map(|(k, r)| {
                let n = row(&k.to_string(), k as f64, 1.0, 60, k as f64 * 0.5, 0.5, 40 + 10 * k as i32);
                marked(n, LOUDNESS_INCR, *r)
            })
            .collect();
        notes[0].markings.insert("loudness_direction.p".into(), 1.0);
        notes[7].markings.insert("loudness_direction.f".into(), 1.0);

        let out = run(&MatchedScore::from_notes(notes));
        let ramp_cor = out.features.column("ramp_cor").unwrap();
        assert!(ramp_cor[3] > 0.9);
        assert_eq!(ramp_cor[0], 0.0);
    }

    #[test]
    fn test_tempo_cor_constant_tempo_is_zero() {
        let notes: Vec<MatchedNote> = (0..4)
            .map(|k| row(&k.to_string(), k as f64, 1.0, 60, k as f64 * 0.5, 0.5, 40 + 5 * k))
            .collect();
        let out = run(&MatchedScore::from_notes(notes));
        assert!(out.features.column("tempo_cor").unwrap().iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_avg_vel_extra_uses_aggregation() {
        let matched = MatchedScore::from_notes(vec![
            row("a", 0.0, 1.0, 60, 0.0, 0.5, 40),
            row("b", 0.0, 1.0, 64, 0.0, 0.5, 80),
        ]);
        let options = FeatureOptions {
            aggregation: Aggregation::Max,
            ..Default::default()
        };
        let out = dynamics_feature(&matched, &Performance::default(), &options);
        let Some(ExtraArray::Values(avg)) = out.extras.get("avg_vel") else {
            panic!("missing avg_vel");
        };
        assert_eq!(avg, &vec![80.0]);
    }
}
