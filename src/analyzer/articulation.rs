//! Articulation: key overlap between consecutive notes of the lowest voice.
//!
//! Key overlap time (kot) is how long a note is held past the onset of the
//! note that follows it; key overlap ratio (kor) is kot over the
//! inter-onset interval, kept in [0, 5]. A negative kot means the note was
//! released before the next one started.

use std::collections::BTreeMap;

use super::asynchrony::{interval_class, INTERVAL_CLASSES};
use super::matched::{MatchedNote, MatchedScore};
use super::{ExtraArray, FeatureOptions, FeatureOutput, FeatureTable};
use crate::performance::Performance;
use crate::score::{SLUR_DECR, SLUR_INCR};

/// Value for notes with no computable overlap.
pub const NO_OVERLAP: f64 = -1.0;
/// Upper bound for both kor and kot.
pub const MAX_OVERLAP: f64 = 5.0;

/// Tolerance when matching a note's score offset to the next onset.
const ONSET_TOLERANCE: f64 = 1e-9;

/// Overlap of `note` with the note that follows it: `(kor, kot)`.
pub fn key_overlap(note: &MatchedNote, next: &MatchedNote) -> (f64, f64) {
    let kot = note.p_offset() - next.p_onset;
    let ioi = next.p_onset - note.p_onset;
    let kor = if ioi <= 0.0 { 0.0 } else { kot / ioi };
    (kor.clamp(0.0, MAX_OVERLAP), kot.min(MAX_OVERLAP))
}

/// The note following row `i` in the same voice: among rows at the next
/// higher onset of `voiced`, the one closest in pitch. `None` if the note
/// does not end where that onset starts.
fn next_note(matched: &MatchedScore, voiced: &[usize], i: usize) -> Option<usize> {
    let note = &matched.notes[i];
    let next_onset = voiced
        .iter()
        .map(|&j| matched.notes[j].onset)
        .filter(|&o| o > note.onset)
        .fold(f64::INFINITY, f64::min);
    if !next_onset.is_finite() || (next_onset - note.offset()).abs() > ONSET_TOLERANCE {
        return None;
    }
    voiced
        .iter()
        .copied()
        .filter(|&j| matched.notes[j].onset == next_onset)
        .min_by_key(|&j| (matched.notes[j].pitch - note.pitch).abs())
}

fn is_staccato(note: &MatchedNote) -> bool {
    matches!(
        note.articulation.as_deref(),
        Some("staccato") | Some("staccatissimo")
    )
}

/// Slur opens before `note` and closes at `next`.
fn is_legato(note: &MatchedNote, next: &MatchedNote) -> bool {
    next.marking(SLUR_INCR) - note.marking(SLUR_INCR) > 0.0
        && note.marking(SLUR_DECR) - next.marking(SLUR_DECR) > 0.0
}

#[derive(Debug, Default)]
struct ArticulationMask {
    legato: Vec<bool>,
    staccato: Vec<bool>,
    repeated: Vec<bool>,
    consonance: Vec<Option<String>>,
    direction: Vec<Option<String>>,
    register: Vec<f64>,
}

impl ArticulationMask {
    fn new(n: usize) -> Self {
        Self {
            legato: vec![false; n],
            staccato: vec![false; n],
            repeated: vec![false; n],
            consonance: vec![None; n],
            direction: vec![None; n],
            register: vec![NO_OVERLAP; n],
        }
    }

    fn record(&mut self, i: usize, note: &MatchedNote, next: &MatchedNote) {
        if is_staccato(note) {
            self.staccato[i] = true;
        } else if is_legato(note, next) {
            self.legato[i] = true;
        }
        self.repeated[i] = note.pitch == next.pitch;

        let interval = next.pitch - note.pitch;
        self.consonance[i] = Some(INTERVAL_CLASSES[interval_class(interval)].to_string());
        self.direction[i] = match interval.signum() {
            1 => Some("upward".to_string()),
            -1 => Some("downward".to_string()),
            _ => None,
        };
        self.register[i] = ((note.pitch / 12 - 1) + (next.pitch / 12 - 1)) as f64 / 2.0;
    }
}

pub fn articulation_feature(
    matched: &MatchedScore,
    _performance: &Performance,
    options: &FeatureOptions,
) -> FeatureOutput {
    let n = matched.len();
    let mut kor = vec![NO_OVERLAP; n];
    let mut kot = vec![NO_OVERLAP; n];
    let mut no_kor = vec![true; n];
    let mut mask = ArticulationMask::new(n);

    if let Some(lowest) = matched.notes.iter().map(|n| n.voice).min() {
        let voiced: Vec<usize> = (0..n).filter(|&i| matched.notes[i].voice == lowest).collect();
        for &i in &voiced {
            let Some(j) = next_note(matched, &voiced, i) else {
                continue;
            };
            let (note, next) = (&matched.notes[i], &matched.notes[j]);
            (kor[i], kot[i]) = key_overlap(note, next);
            no_kor[i] = false;
            if options.articulation_mask {
                mask.record(i, note, next);
            }
        }
    }

    let mut table = FeatureTable::new(n);
    table.push("kor", kor);
    table.push("kot", kot);

    let mut out = FeatureOutput::new(table).with_extra("no_kor_mask", ExtraArray::Flags(no_kor));
    if options.articulation_mask {
        let flags = BTreeMap::from([
            ("legato".to_string(), mask.legato),
            ("staccato".to_string(), mask.staccato),
            ("repeated".to_string(), mask.repeated),
        ]);
        out = out
            .with_extra("articulation_mask", ExtraArray::NamedFlags(flags))
            .with_extra("consonance", ExtraArray::Labels(mask.consonance))
            .with_extra("direction", ExtraArray::Labels(mask.direction))
            .with_extra("register", ExtraArray::Values(mask.register));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::matched::tests::row;

    fn run(matched: &MatchedScore, mask: bool) -> FeatureOutput {
        let options = FeatureOptions {
            articulation_mask: mask,
            ..Default::default()
        };
        articulation_feature(matched, &Performance::default(), &options)
    }

    #[test]
    fn test_full_overlap_is_one() {
        let matched = MatchedScore::from_notes(vec![
            row("a", 0.0, 1.0, 60, 0.0, 1.0, 60),
            row("b", 1.0, 1.0, 62, 0.5, 0.5, 60),
        ]);
        let out = run(&matched, false);
        let kor = out.features.column("kor").unwrap();
        let kot = out.features.column("kot").unwrap();
        assert!((kor[0] - 1.0).abs() < 1e-12);
        assert!((kot[0] - 0.5).abs() < 1e-12);
        // last note has no successor
        assert_eq!(kor[1], NO_OVERLAP);
    }

    #[test]
    fn test_kor_is_bounded() {
        let matched = MatchedScore::from_notes(vec![
            row("a", 0.0, 1.0, 60, 0.0, 9.0, 60),
            row("b", 1.0, 1.0, 62, 0.1, 0.5, 60),
            row("c", 2.0, 1.0, 64, 1.0, 0.1, 60),
            row("d", 3.0, 1.0, 65, 2.0, 0.5, 60),
        ]);
        let out = run(&matched, false);
        let kor = out.features.column("kor").unwrap();
        assert_eq!(kor[0], MAX_OVERLAP);
        assert_eq!(kor[2], 0.0);
        assert!(kor.iter().all(|k| *k == NO_OVERLAP || (0.0..=MAX_OVERLAP).contains(k)));
    }

    #[test]
    fn test_gap_in_score_has_no_successor() {
        let matched = MatchedScore::from_notes(vec![
            row("a", 0.0, 0.5, 60, 0.0, 0.3, 60),
            row("b", 1.0, 1.0, 62, 0.5, 0.5, 60),
        ]);
        let out = run(&matched, false);
        let Some(ExtraArray::Flags(no_kor)) = out.extras.get("no_kor_mask") else {
            panic!("missing no_kor_mask");
        };
        assert_eq!(no_kor, &vec![true, true]);
        assert_eq!(out.features.column("kot").unwrap()[0], NO_OVERLAP);
    }

    #[test]
    fn test_only_lowest_voice() {
        let mut upper = row("b", 0.0, 1.0, 72, 0.0, 1.0, 60);
        upper.voice = 2;
        let mut upper_next = row("d", 1.0, 1.0, 74, 0.5, 0.5, 60);
        upper_next.voice = 2;
        let matched = MatchedScore::from_notes(vec![
            row("a", 0.0, 1.0, 60, 0.0, 0.5, 60),
            upper,
            row("c", 1.0, 1.0, 62, 0.5, 0.5, 60),
            upper_next,
        ]);
        let out = run(&matched, false);
        let kor = out.features.column("kor").unwrap();
        // rows sorted by (onset, pitch): a, b, c, d
        assert_eq!(kor[0], 0.0);
        assert_eq!(kor[1], NO_OVERLAP);
    }

    #[test]
    fn test_mask_labels() {
        let mut a = row("a", 0.0, 1.0, 60, 0.0, 0.4, 60);
        a.markings.insert("articulation.staccato".into(), 1.0);
        let matched = MatchedScore::from_notes(vec![
            a,
            row("b", 1.0, 1.0, 67, 0.5, 0.5, 60),
            row("c", 2.0, 1.0, 67, 1.0, 0.5, 60),
        ]);
        let out = run(&matched, true);
        let Some(ExtraArray::NamedFlags(flags)) = out.extras.get("articulation_mask") else {
            panic!("missing articulation_mask");
        };
        assert_eq!(flags["staccato"], vec![true, false, false]);
        assert_eq!(flags["repeated"], vec![false, true, false]);

        let Some(ExtraArray::Labels(consonance)) = out.extras.get("consonance") else {
            panic!("missing consonance");
        };
        assert_eq!(consonance[0].as_deref(), Some("P5"));
        let Some(ExtraArray::Labels(direction)) = out.extras.get("direction") else {
            panic!("missing direction");
        };
        assert_eq!(direction[0].as_deref(), Some("upward"));
        // repeated note has no direction
        assert_eq!(direction[1], None);
        let Some(ExtraArray::Values(register)) = out.extras.get("register") else {
            panic!("missing register");
        };
        assert_eq!(register[0], 4.0);
    }

    #[test]
    fn test_legato_under_slur() {
        let mut a = row("a", 0.0, 1.0, 60, 0.0, 0.6, 60);
        let mut b = row("b", 1.0, 1.0, 62, 0.5, 0.5, 60);
        a.markings.insert(SLUR_DECR.into(), 1.0);
        b.markings.insert(SLUR_INCR.into(), 1.0);
        let matched = MatchedScore::from_notes(vec![a, b]);
        let out = run(&matched, true);
        let Some(ExtraArray::NamedFlags(flags)) = out.extras.get("articulation_mask") else {
            panic!("missing articulation_mask");
        };
        assert_eq!(flags["legato"], vec![true, false]);
    }
}
