use serde::Serialize;
use std::collections::BTreeMap;

use crate::matchfile::{MatchFile, SnoteLine};

/// Marking column prefixes, as used in score note arrays.
pub const LOUDNESS_DIRECTION: &str = "loudness_direction";
pub const ARTICULATION: &str = "articulation";

/// Continuous crescendo/decrescendo ramp columns.
pub const LOUDNESS_INCR: &str = "loudness_direction.loudness_incr";
pub const LOUDNESS_DECR: &str = "loudness_direction.loudness_decr";
pub const SLUR_INCR: &str = "slur.slur_incr";
pub const SLUR_DECR: &str = "slur.slur_decr";

const ARTICULATIONS: &[&str] = &[
    "accent",
    "marcato",
    "staccatissimo",
    "staccato",
    "strong-accent",
    "tenuto",
];

/// One notated note with its score markings.
///
/// Markings are named columns: one-hot flags such as
/// `loudness_direction.f` or `articulation.staccato`, and continuous ramps
/// such as [`LOUDNESS_INCR`]. A marking that is absent reads as 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreNote {
    pub id: String,
    pub onset_beat: f64,
    pub duration_beat: f64,
    pub pitch: i32,
    pub voice: i32,
    pub markings: BTreeMap<String, f64>,
}

impl ScoreNote {
    pub fn new(id: impl Into<String>, onset_beat: f64, duration_beat: f64, pitch: i32, voice: i32) -> Self {
        Self {
            id: id.into(),
            onset_beat,
            duration_beat,
            pitch,
            voice,
            markings: BTreeMap::new(),
        }
    }

    pub fn with_marking(mut self, name: impl Into<String>, value: f64) -> Self {
        self.markings.insert(name.into(), value);
        self
    }

    pub fn marking(&self, name: &str) -> f64 {
        self.markings.get(name).copied().unwrap_or(0.0)
    }
}

/// Flat score note array.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Score {
    pub notes: Vec<ScoreNote>,
}

impl Score {
    pub fn new(notes: Vec<ScoreNote>) -> Self {
        Self { notes }
    }

    /// Score notes of a match file. Unpitched anchors are left out.
    pub fn from_matchfile(mf: &MatchFile) -> Self {
        let notes = mf
            .snotes()
            .into_iter()
            .filter_map(|snote| {
                let note = score_note_from_snote(snote);
                if note.is_none() {
                    log::debug!("Skipping unpitched score note {}", snote.anchor);
                }
                note
            })
            .collect();
        Self { notes }
    }

    pub fn find(&self, id: &str) -> Option<&ScoreNote> {
        self.notes.iter().find(|n| n.id == id)
    }

    /// Sorted names of every marking column present on any note.
    pub fn marking_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .notes
            .iter()
            .flat_map(|n| n.markings.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// Voice from a `v<N>` attribute, else the staff number, else 1.
fn voice_from_attributes(attributes: &[String]) -> i32 {
    let numbered = |prefix: &str| {
        attributes
            .iter()
            .find_map(|a| a.strip_prefix(prefix).and_then(|n| n.parse::<i32>().ok()))
    };
    numbered("v").or_else(|| numbered("staff")).unwrap_or(1)
}

fn score_note_from_snote(snote: &SnoteLine) -> Option<ScoreNote> {
    let pitch = snote.midi_pitch()?;
    let mut note = ScoreNote::new(
        snote.anchor.clone(),
        snote.onset_in_beats,
        snote.duration_in_beats(),
        pitch,
        voice_from_attributes(&snote.score_attributes),
    );
    for attribute in &snote.score_attributes {
        if ARTICULATIONS.contains(&attribute.as_str()) {
            note.markings
                .insert(format!("{ARTICULATION}.{attribute}"), 1.0);
        }
    }
    Some(note)
}
