//! Score and performance joined through an alignment.
//!
//! Every extractor works on the same matched note array: one row per
//! `match` record, sorted by score onset, with the performance tempo
//! (beat period) and the discrete dynamics/articulation labels attached.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use super::stats;
use crate::alignment::Alignment;
use crate::performance::{PerformedNote, Performance};
use crate::score::{Score, ScoreNote, ARTICULATION, LOUDNESS_DIRECTION};

/// Beat period used when no tempo can be derived.
const FALLBACK_BEAT_PERIOD: f64 = 0.5;

/// One matched score/performance note pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedNote {
    pub score_id: String,
    pub performance_id: String,
    pub onset: f64,
    pub duration: f64,
    pub pitch: i32,
    pub voice: i32,
    pub p_onset: f64,
    pub p_duration: f64,
    pub velocity: i32,
    /// Seconds per beat at this note's onset.
    pub beat_period: f64,
    pub markings: BTreeMap<String, f64>,
    /// Discrete dynamics marking, only where it changes from the previous row.
    pub constant_dyn: Option<String>,
    pub articulation: Option<String>,
}

impl MatchedNote {
    fn new(snote: &ScoreNote, pnote: &PerformedNote) -> Self {
        Self {
            score_id: snote.id.clone(),
            performance_id: pnote.id.clone(),
            onset: snote.onset_beat,
            duration: snote.duration_beat,
            pitch: snote.pitch,
            voice: snote.voice,
            p_onset: pnote.onset_sec,
            p_duration: pnote.duration_sec,
            velocity: pnote.velocity,
            beat_period: FALLBACK_BEAT_PERIOD,
            markings: snote.markings.clone(),
            constant_dyn: None,
            articulation: None,
        }
    }

    pub fn offset(&self) -> f64 {
        self.onset + self.duration
    }

    pub fn p_offset(&self) -> f64 {
        self.p_onset + self.p_duration
    }

    pub fn marking(&self, name: &str) -> f64 {
        self.markings.get(name).copied().unwrap_or(0.0)
    }
}

/// Row indices grouped by exactly equal score onset, in ascending onset order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OnsetGroups {
    pub onsets: Vec<f64>,
    pub groups: Vec<Vec<usize>>,
}

impl OnsetGroups {
    pub fn from_onsets(onsets: &[f64]) -> Self {
        let mut order: Vec<usize> = (0..onsets.len()).collect();
        order.sort_by(|&a, &b| onsets[a].total_cmp(&onsets[b]).then(a.cmp(&b)));

        let mut result = Self::default();
        for i in order {
            match result.onsets.last() {
                Some(&last) if last == onsets[i] => {
                    if let Some(group) = result.groups.last_mut() {
                        group.push(i);
                    }
                }
                _ => {
                    result.onsets.push(onsets[i]);
                    result.groups.push(vec![i]);
                }
            }
        }
        result
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (f64, &[usize])> {
        self.onsets
            .iter()
            .copied()
            .zip(self.groups.iter().map(|g| g.as_slice()))
    }
}

/// Broadcast one value per onset group to one value per row.
pub fn onsetwise_to_notewise<T: Clone + Default>(
    values: &[T],
    groups: &OnsetGroups,
    n_rows: usize,
) -> Vec<T> {
    let mut out = vec![T::default(); n_rows];
    for (value, group) in values.iter().zip(&groups.groups) {
        for &i in group {
            out[i] = value.clone();
        }
    }
    out
}

/// The matched note array that every feature extractor consumes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchedScore {
    pub notes: Vec<MatchedNote>,
    pub groups: OnsetGroups,
    pub marking_names: Vec<String>,
}

impl MatchedScore {
    /// Join `score` and `performance` through the `match` records of
    /// `alignment`. Records naming an id missing on either side are skipped
    /// with a warning.
    pub fn build(score: &Score, performance: &Performance, alignment: &[Alignment]) -> Self {
        let score_by_id: HashMap<&str, &ScoreNote> =
            score.notes.iter().map(|n| (n.id.as_str(), n)).collect();
        let perf_by_id: HashMap<&str, &PerformedNote> =
            performance.notes.iter().map(|n| (n.id.as_str(), n)).collect();

        let mut notes = Vec::new();
        for record in alignment {
            let Alignment::Match {
                score_id,
                performance_id,
            } = record
            else {
                continue;
            };
            match (
                score_by_id.get(score_id.as_str()),
                perf_by_id.get(performance_id.as_str()),
            ) {
                (Some(s), Some(p)) => notes.push(MatchedNote::new(s, p)),
                (None, _) => log::warn!("Alignment names unknown score note {score_id}, skipping"),
                (_, None) => {
                    log::warn!("Alignment names unknown performed note {performance_id}, skipping")
                }
            }
        }

        Self::from_notes(notes)
    }

    /// Sort rows, group onsets and derive beat periods and labels.
    pub fn from_notes(mut notes: Vec<MatchedNote>) -> Self {
        notes.sort_by(|a, b| a.onset.total_cmp(&b.onset).then(a.pitch.cmp(&b.pitch)));

        let mut marking_names: Vec<String> = notes
            .iter()
            .flat_map(|n| n.markings.keys().cloned())
            .collect();
        marking_names.sort();
        marking_names.dedup();

        let onsets: Vec<f64> = notes.iter().map(|n| n.onset).collect();
        let groups = OnsetGroups::from_onsets(&onsets);

        let mut matched = Self {
            notes,
            groups,
            marking_names,
        };
        matched.assign_beat_periods();
        matched.assign_labels();
        matched
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// First row of each onset group, in group order.
    pub fn group_heads(&self) -> Vec<&MatchedNote> {
        self.groups.groups.iter().map(|g| &self.notes[g[0]]).collect()
    }

    fn assign_beat_periods(&mut self) {
        if self.groups.is_empty() {
            return;
        }
        let per_group = if self.groups.len() == 1 {
            let durs: Vec<f64> = self.notes.iter().map(|n| n.duration).collect();
            let p_durs: Vec<f64> = self.notes.iter().map(|n| n.p_duration).collect();
            let bp = stats::mean(&p_durs) / stats::mean(&durs);
            let bp = if bp.is_finite() && bp > 0.0 {
                bp
            } else {
                FALLBACK_BEAT_PERIOD
            };
            vec![bp]
        } else {
            let p_onsets: Vec<f64> = self
                .groups
                .groups
                .iter()
                .map(|g| stats::mean(&g.iter().map(|&i| self.notes[i].p_onset).collect::<Vec<_>>()))
                .collect();
            let p_onsets = monotonize(&self.groups.onsets, &p_onsets);
            let s = &self.groups.onsets;
            let mut bp: Vec<f64> = (0..s.len() - 1)
                .map(|k| (p_onsets[k + 1] - p_onsets[k]) / (s[k + 1] - s[k]))
                .collect();
            bp.push(bp[bp.len() - 1]);
            bp
        };

        let n = self.notes.len();
        for (i, bp) in onsetwise_to_notewise(&per_group, &self.groups, n)
            .into_iter()
            .enumerate()
        {
            self.notes[i].beat_period = bp;
        }
    }

    fn assign_labels(&mut self) {
        let dyn_fields: Vec<String> = self
            .marking_names
            .iter()
            .filter(|name| name.starts_with(LOUDNESS_DIRECTION))
            .cloned()
            .collect();
        let art_fields: Vec<String> = self
            .marking_names
            .iter()
            .filter(|name| name.starts_with(ARTICULATION))
            .cloned()
            .collect();

        let mut previous: Option<String> = None;
        for note in &mut self.notes {
            let label = first_set_marking(note, &dyn_fields);
            note.constant_dyn = if label != previous { label.clone() } else { None };
            previous = label;
            note.articulation = first_set_marking(note, &art_fields);
        }
    }
}

/// Name after the last `.` of the first field whose value is exactly 1.
fn first_set_marking(note: &MatchedNote, fields: &[String]) -> Option<String> {
    fields
        .iter()
        .find(|f| note.marking(f) == 1.0)
        .map(|f| f.rsplit('.').next().unwrap_or(f).to_string())
}

/// Make performed onsets strictly increasing. Values that do not exceed
/// the running maximum are re-derived by interpolating between their kept
/// neighbours on the score axis; trailing ones are extrapolated with the
/// slope of the last two kept points.
fn monotonize(score_onsets: &[f64], p_onsets: &[f64]) -> Vec<f64> {
    let n = p_onsets.len();
    let mut kept = vec![false; n];
    let mut running = f64::NEG_INFINITY;
    for (k, &p) in p_onsets.iter().enumerate() {
        if p > running {
            kept[k] = true;
            running = p;
        }
    }
    let kept_idx: Vec<usize> = (0..n).filter(|&k| kept[k]).collect();
    let xs: Vec<f64> = kept_idx.iter().map(|&k| score_onsets[k]).collect();
    let ys: Vec<f64> = kept_idx.iter().map(|&k| p_onsets[k]).collect();

    let last = kept_idx.len() - 1;
    let slope = if kept_idx.len() >= 2 {
        (ys[last] - ys[last - 1]) / (xs[last] - xs[last - 1])
    } else {
        FALLBACK_BEAT_PERIOD
    };

    (0..n)
        .map(|k| {
            if kept[k] {
                p_onsets[k]
            } else if score_onsets[k] > xs[last] {
                ys[last] + slope * (score_onsets[k] - xs[last])
            } else {
                stats::interp(score_onsets[k], &xs, &ys, ys[last])
            }
        })
        .collect()
}
