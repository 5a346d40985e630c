//! Final ritardando shape.
//!
//! Tempo over the last beats of the piece is fit to the rubato model
//! `v(x) = (1 + (w^q - 1) x)^(1/q)`, with `x` normalized score time and
//! `v` tempo relative to its maximum. `w` is the final tempo ratio and
//! `q` the curvature.

use super::matched::MatchedScore;
use super::{stats, FeatureOptions, FeatureOutput, FeatureTable};
use crate::performance::Performance;

/// Starting point of the fit: `(w, q)`.
const INITIAL_GUESS: [f64; 2] = [0.5, -1.0];

/// Model tempo at normalized position `x`.
pub fn rubato_model(x: f64, w: f64, q: f64) -> f64 {
    (1.0 + (w.powf(q) - 1.0) * x).powf(1.0 / q)
}

/// Fit `(w, q)` to normalized points. `None` for fewer than two points or
/// a non-finite result.
pub fn fit_rubato(x: &[f64], y: &[f64]) -> Option<(f64, f64)> {
    if x.len() < 2 {
        return None;
    }
    let [w, q] = stats::least_squares_2d(
        |[w, q]| {
            x.iter()
                .zip(y)
                .map(|(&xi, &yi)| yi - rubato_model(xi, w, q))
                .collect()
        },
        INITIAL_GUESS,
    )?;
    (w.is_finite() && q.is_finite()).then_some((w, q))
}

pub fn phrasing_feature(
    matched: &MatchedScore,
    _performance: &Performance,
    options: &FeatureOptions,
) -> FeatureOutput {
    let n = matched.len();
    let mut w_col = vec![0.0; n];
    let mut q_col = vec![0.0; n];

    if let Some(&last) = matched.groups.onsets.last() {
        let heads = matched.group_heads();
        let tail: Vec<(f64, f64)> = matched
            .groups
            .onsets
            .iter()
            .zip(&heads)
            .filter(|(onset, _)| **onset >= last - options.phrase_window_beats)
            .map(|(onset, head)| (*onset, 60.0 / head.beat_period))
            .collect();

        if tail.len() >= 2 {
            let first = tail[0].0;
            let span = last - first;
            let max_tempo = tail.iter().map(|t| t.1).fold(f64::NEG_INFINITY, f64::max);
            let x: Vec<f64> = tail.iter().map(|t| (t.0 - first) / span).collect();
            let y: Vec<f64> = tail.iter().map(|t| t.1 / max_tempo).collect();

            match fit_rubato(&x, &y) {
                Some((w, q)) => {
                    w_col = vec![w; n];
                    q_col = vec![q; n];
                }
                None => log::debug!("Rubato fit did not converge, leaving zeros"),
            }
        }
    }

    let mut table = FeatureTable::new(n);
    table.push("rubato_w", w_col);
    table.push("rubato_q", q_col);
    FeatureOutput::new(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::matched::tests::row;

    #[test]
    fn test_model_endpoints() {
        assert!((rubato_model(0.0, 0.6, 2.0) - 1.0).abs() < 1e-12);
        assert!((rubato_model(1.0, 0.6, 2.0) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_fit_recovers_parameters() {
        let x: Vec<f64> = (0..9).map(|k| k as f64 / 8.0).collect();
        let y: Vec<f64> = x.iter().map(|&xi| rubato_model(xi, 0.7, -1.5)).collect();
        let (w, q) = fit_rubato(&x, &y).unwrap();
        assert!((w - 0.7).abs() < 1e-3, "w = {w}");
        assert!((q + 1.5).abs() < 1e-2, "q = {q}");
    }

    #[test]
    fn test_too_few_points() {
        assert!(fit_rubato(&[0.0], &[1.0]).is_none());
        let matched = MatchedScore::from_notes(vec![row("a", 0.0, 1.0, 60, 0.0, 0.5, 60)]);
        let out = phrasing_feature(&matched, &Performance::default(), &FeatureOptions::default());
        assert_eq!(out.features.column("rubato_w").unwrap(), &[0.0]);
    }

    #[test]
    fn test_ritardando_is_broadcast() {
        // beats 0..8, slowing down over the last four
        let mut p = 0.0;
        let notes: Vec<_> = (0..8)
            .map(|k| {
                let note = row(&k.to_string(), k as f64, 1.0, 60, p, 0.4, 60);
                p += if k < 4 { 0.5 } else { 0.5 + 0.1 * (k - 3) as f64 };
                note
            })
            .collect();
        let matched = MatchedScore::from_notes(notes);
        let out = phrasing_feature(&matched, &Performance::default(), &FeatureOptions::default());
        let w = out.features.column("rubato_w").unwrap();
        assert!(w.iter().all(|v| *v == w[0]));
        assert!(w[0] > 0.0 && w[0] < 1.0);
    }
}
