//! Score-note, performed-note and composite lines.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::MatchError;
use super::fields::{
    FieldType, FieldValue, FractionalDuration, PitchSpelling, format_float, format_list,
    format_modifier, format_optional_int, format_time, interpret_float, interpret_fractional,
    interpret_i32, interpret_list, interpret_string, midi_pitch_to_spelling,
};
use super::lines::{MatchLine, group};
use super::version::Version;

// ── Patterns ──────────────────────────────────────────────────────────
//
// Fragments carry a group-name prefix so that a score note and a performed
// note can share one composite pattern.

const SNOTE: &str = concat!(
    r"snote\((?P<s_anchor>[^,]+),",
    r"\[(?P<s_step>[^,\]]+),(?P<s_modifier>[^,\]]+)\],",
    r"(?P<s_octave>[^,]+),",
    r"(?P<s_measure>[^,:]+):(?P<s_beat>[^,]+),",
    r"(?P<s_offset>[^,]+),",
    r"(?P<s_duration>[^,]+),",
    r"(?P<s_onset_beats>[^,]+),",
    r"(?P<s_offset_beats>[^,]+),",
    r"\[(?P<s_attributes>[^\]]*)\]\)",
);

const NOTE_SPELLED: &str = concat!(
    r"note\((?P<n_id>[^,]+),",
    r"\[(?P<n_step>[^,\]]+),(?P<n_modifier>[^,\]]+)\],",
    r"(?P<n_octave>[^,]+),",
    r"(?P<n_onset>[^,]+),",
    r"(?P<n_offset>[^,]+),",
    r"(?P<n_velocity>[^,\)]+)\)",
);

const NOTE_ADJUSTED: &str = concat!(
    r"note\((?P<n_id>[^,]+),",
    r"\[(?P<n_step>[^,\]]+),(?P<n_modifier>[^,\]]+)\],",
    r"(?P<n_octave>[^,]+),",
    r"(?P<n_onset>[^,]+),",
    r"(?P<n_offset>[^,]+),",
    r"(?P<n_adj_offset>[^,]+),",
    r"(?P<n_velocity>[^,\)]+)\)",
);

const NOTE_MIDI: &str = concat!(
    r"note\((?P<n_id>[^,]+),",
    r"(?P<n_pitch>[^,\[]+),",
    r"(?P<n_onset>[^,]+),",
    r"(?P<n_offset>[^,]+),",
    r"(?P<n_velocity>[^,]+),",
    r"(?P<n_channel>[^,]+),",
    r"(?P<n_track>[^,\)]+)\)",
);

fn compile(pattern: String) -> Regex {
    Regex::new(&pattern).unwrap()
}

fn per_layout(wrap: fn(&str) -> String) -> [Regex; 3] {
    [
        compile(wrap(NOTE_SPELLED)),
        compile(wrap(NOTE_ADJUSTED)),
        compile(wrap(NOTE_MIDI)),
    ]
}

static SNOTE_RE: LazyLock<Regex> = LazyLock::new(|| compile(format!(r"^{SNOTE}\.?$")));
static DELETION_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(format!(r"^{SNOTE}-deletion\.$")));
static NOTE_RE: LazyLock<[Regex; 3]> = LazyLock::new(|| per_layout(|n| format!(r"^{n}\.?$")));
static PAIR_RE: LazyLock<[Regex; 3]> =
    LazyLock::new(|| per_layout(|n| format!(r"^{SNOTE}-{n}\.$")));
static INSERTION_RE: LazyLock<[Regex; 3]> =
    LazyLock::new(|| per_layout(|n| format!(r"^insertion-{n}\.$")));

/// Column layout of performed-note lines, which changed across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteLayout {
    /// `note(Id,[Name,Mod],Octave,Onset,Offset,Velocity)`
    Spelled,
    /// `note(Id,[Name,Mod],Octave,Onset,Offset,AdjOffset,Velocity)`
    AdjustedOffset,
    /// `note(Id,MidiPitch,Onset,Offset,Velocity,Channel,Track)`
    Midi,
}

impl NoteLayout {
    pub fn for_version(version: Version) -> Self {
        if version >= Version::LATEST {
            NoteLayout::Midi
        } else if version >= Version::ADJUSTED_OFFSET {
            NoteLayout::AdjustedOffset
        } else {
            NoteLayout::Spelled
        }
    }

    fn index(self) -> usize {
        match self {
            NoteLayout::Spelled => 0,
            NoteLayout::AdjustedOffset => 1,
            NoteLayout::Midi => 2,
        }
    }
}

fn captures<'t>(
    re: &Regex,
    text: &'t str,
    expected: &'static str,
) -> Result<Captures<'t>, MatchError> {
    re.captures(text.trim()).ok_or_else(|| MatchError::Pattern {
        expected,
        text: text.to_string(),
    })
}

// ── Score notes ───────────────────────────────────────────────────────

/// `snote(Anchor,[NoteName,Modifier],Octave,Measure:Beat,Offset,Duration,OnsetInBeats,OffsetInBeats,[Attributes])`
#[derive(Debug, Clone, PartialEq)]
pub struct SnoteLine {
    pub version: Version,
    pub anchor: String,
    pub spelling: PitchSpelling,
    pub measure: i32,
    pub beat: i32,
    pub offset: FractionalDuration,
    pub duration: FractionalDuration,
    pub onset_in_beats: f64,
    pub offset_in_beats: f64,
    pub score_attributes: Vec<String>,
}

impl SnoteLine {
    pub fn duration_in_beats(&self) -> f64 {
        self.offset_in_beats - self.onset_in_beats
    }

    pub fn duration_symbolic(&self) -> String {
        self.duration.to_string()
    }

    /// Undefined for unpitched anchors (no octave).
    pub fn midi_pitch(&self) -> Option<i32> {
        self.spelling.midi_pitch()
    }

    pub fn has_attribute(&self, attribute: &str) -> bool {
        self.score_attributes.iter().any(|a| a == attribute)
    }

    fn from_captures(caps: &Captures<'_>, version: Version) -> Result<Self, MatchError> {
        Ok(Self {
            version,
            anchor: interpret_string(group(caps, "s_anchor")),
            spelling: PitchSpelling::interpret(
                group(caps, "s_step"),
                group(caps, "s_modifier"),
                group(caps, "s_octave"),
            )?,
            measure: interpret_i32("Measure", group(caps, "s_measure"))?,
            beat: interpret_i32("Beat", group(caps, "s_beat"))?,
            offset: interpret_fractional("Offset", group(caps, "s_offset"))?,
            duration: interpret_fractional("Duration", group(caps, "s_duration"))?,
            onset_in_beats: interpret_float("OnsetInBeats", group(caps, "s_onset_beats"))?,
            offset_in_beats: interpret_float("OffsetInBeats", group(caps, "s_offset_beats"))?,
            score_attributes: interpret_list(group(caps, "s_attributes")),
        })
    }
}

impl MatchLine for SnoteLine {
    fn version(&self) -> Version {
        self.version
    }

    fn field_names(&self) -> Vec<&'static str> {
        vec![
            "Anchor",
            "NoteName",
            "Modifier",
            "Octave",
            "Measure",
            "Beat",
            "Offset",
            "Duration",
            "OnsetInBeats",
            "OffsetInBeats",
            "ScoreAttributesList",
        ]
    }

    fn field_types(&self) -> Vec<FieldType> {
        vec![
            FieldType::Str,
            FieldType::Str,
            FieldType::OptionalInt,
            FieldType::OptionalInt,
            FieldType::Int,
            FieldType::Int,
            FieldType::Fractional,
            FieldType::Fractional,
            FieldType::Float,
            FieldType::Float,
            FieldType::List,
        ]
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        let value = match name {
            "Anchor" => FieldValue::Str(self.anchor.clone()),
            "NoteName" => FieldValue::Str(self.spelling.step.clone()),
            "Modifier" => self.spelling.alter.into(),
            "Octave" => self.spelling.octave.into(),
            "Measure" => FieldValue::Int(self.measure as i64),
            "Beat" => FieldValue::Int(self.beat as i64),
            "Offset" => FieldValue::Fractional(self.offset.clone()),
            "Duration" => FieldValue::Fractional(self.duration.clone()),
            "OnsetInBeats" => FieldValue::Float(self.onset_in_beats),
            "OffsetInBeats" => FieldValue::Float(self.offset_in_beats),
            "ScoreAttributesList" => FieldValue::List(self.score_attributes.clone()),
            "DurationInBeats" => FieldValue::Float(self.duration_in_beats()),
            "DurationSymbolic" => FieldValue::Str(self.duration_symbolic()),
            "MidiPitch" => self.midi_pitch().into(),
            _ => return None,
        };
        Some(value)
    }

    fn from_matchline(text: &str, version: Version) -> Result<Self, MatchError> {
        let caps = captures(&SNOTE_RE, text, "snote")?;
        Self::from_captures(&caps, version)
    }

    fn matchline(&self) -> String {
        format!(
            "snote({},[{},{}],{},{}:{},{},{},{},{},{})",
            self.anchor,
            self.spelling.format_step(self.version),
            format_modifier(self.spelling.alter),
            format_optional_int(self.spelling.octave),
            self.measure,
            self.beat,
            self.offset,
            self.duration,
            format_float(self.onset_in_beats),
            format_float(self.offset_in_beats),
            format_list(&self.score_attributes),
        )
    }
}

// ── Performed notes ───────────────────────────────────────────────────

/// A performed note. Times are MIDI ticks; which columns are written depends
/// on the version (see [`NoteLayout`]).
#[derive(Debug, Clone, PartialEq)]
pub struct NoteLine {
    pub version: Version,
    pub id: String,
    /// Written spelling, only present in pre-1.0 layouts.
    pub spelling: Option<PitchSpelling>,
    pub midi_pitch: i32,
    pub onset: f64,
    pub offset: f64,
    /// Offset extended by the sustain pedal, 0.3.0 ≤ version < 1.0.0.
    pub adj_offset: Option<f64>,
    pub velocity: i32,
    pub channel: Option<i32>,
    pub track: Option<i32>,
}

impl NoteLine {
    pub fn layout(&self) -> NoteLayout {
        NoteLayout::for_version(self.version)
    }

    pub fn duration(&self) -> f64 {
        self.offset - self.onset
    }

    fn from_captures(caps: &Captures<'_>, version: Version) -> Result<Self, MatchError> {
        let layout = NoteLayout::for_version(version);
        let id = interpret_string(group(caps, "n_id"));
        let onset = interpret_float("Onset", group(caps, "n_onset"))?;
        let offset = interpret_float("Offset", group(caps, "n_offset"))?;
        let velocity = interpret_i32("Velocity", group(caps, "n_velocity"))?;

        if layout == NoteLayout::Midi {
            return Ok(Self {
                version,
                id,
                spelling: None,
                midi_pitch: interpret_i32("MidiPitch", group(caps, "n_pitch"))?,
                onset,
                offset,
                adj_offset: None,
                velocity,
                channel: Some(interpret_i32("Channel", group(caps, "n_channel"))?),
                track: Some(interpret_i32("Track", group(caps, "n_track"))?),
            });
        }

        let spelling = PitchSpelling::interpret(
            group(caps, "n_step"),
            group(caps, "n_modifier"),
            group(caps, "n_octave"),
        )?;
        let midi_pitch = spelling.midi_pitch().ok_or_else(|| MatchError::Field {
            field: "Octave",
            value: group(caps, "n_octave").to_string(),
        })?;
        let adj_offset = match layout {
            NoteLayout::AdjustedOffset => {
                Some(interpret_float("AdjOffset", group(caps, "n_adj_offset"))?)
            }
            _ => None,
        };

        Ok(Self {
            version,
            id,
            spelling: Some(spelling),
            midi_pitch,
            onset,
            offset,
            adj_offset,
            velocity,
            channel: None,
            track: None,
        })
    }

    fn spelling_or_derived(&self) -> PitchSpelling {
        self.spelling
            .clone()
            .unwrap_or_else(|| midi_pitch_to_spelling(self.midi_pitch))
    }
}

impl MatchLine for NoteLine {
    fn version(&self) -> Version {
        self.version
    }

    fn field_names(&self) -> Vec<&'static str> {
        match self.layout() {
            NoteLayout::Spelled => {
                vec!["Id", "NoteName", "Modifier", "Octave", "Onset", "Offset", "Velocity"]
            }
            NoteLayout::AdjustedOffset => vec![
                "Id", "NoteName", "Modifier", "Octave", "Onset", "Offset", "AdjOffset", "Velocity",
            ],
            NoteLayout::Midi => {
                vec!["Id", "MidiPitch", "Onset", "Offset", "Velocity", "Channel", "Track"]
            }
        }
    }

    fn field_types(&self) -> Vec<FieldType> {
        self.field_names()
            .into_iter()
            .map(|name| match name {
                "Id" | "NoteName" => FieldType::Str,
                "Modifier" | "Octave" => FieldType::OptionalInt,
                "Onset" | "Offset" | "AdjOffset" => FieldType::Float,
                _ => FieldType::Int,
            })
            .collect()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        let value = match name {
            "Id" => FieldValue::Str(self.id.clone()),
            "NoteName" => FieldValue::Str(self.spelling_or_derived().step),
            "Modifier" => self.spelling_or_derived().alter.into(),
            "Octave" => self.spelling_or_derived().octave.into(),
            "MidiPitch" => FieldValue::Int(self.midi_pitch as i64),
            "Onset" => FieldValue::Float(self.onset),
            "Offset" => FieldValue::Float(self.offset),
            "AdjOffset" => FieldValue::Float(self.adj_offset?),
            "Velocity" => FieldValue::Int(self.velocity as i64),
            "Channel" => FieldValue::Int(self.channel? as i64),
            "Track" => FieldValue::Int(self.track? as i64),
            "Duration" => FieldValue::Float(self.duration()),
            _ => return None,
        };
        Some(value)
    }

    fn from_matchline(text: &str, version: Version) -> Result<Self, MatchError> {
        let re = &NOTE_RE[NoteLayout::for_version(version).index()];
        let caps = captures(re, text, "note")?;
        Self::from_captures(&caps, version)
    }

    fn matchline(&self) -> String {
        match self.layout() {
            NoteLayout::Midi => format!(
                "note({},{},{},{},{},{},{})",
                self.id,
                self.midi_pitch,
                format_time(self.onset),
                format_time(self.offset),
                self.velocity,
                self.channel.unwrap_or(0),
                self.track.unwrap_or(0),
            ),
            layout => {
                let spelling = self.spelling_or_derived();
                let adj = match layout {
                    NoteLayout::AdjustedOffset => {
                        format!("{},", format_time(self.adj_offset.unwrap_or(self.offset)))
                    }
                    _ => String::new(),
                };
                format!(
                    "note({},[{},{}],{},{},{},{}{})",
                    self.id,
                    spelling.format_step(self.version),
                    format_modifier(spelling.alter),
                    format_optional_int(spelling.octave),
                    format_time(self.onset),
                    format_time(self.offset),
                    adj,
                    self.velocity,
                )
            }
        }
    }
}

// ── Composite lines ───────────────────────────────────────────────────

/// `snote(...)-note(...).`, a score note matched to a performed note.
#[derive(Debug, Clone, PartialEq)]
pub struct SnoteNoteLine {
    pub snote: SnoteLine,
    pub note: NoteLine,
}

impl MatchLine for SnoteNoteLine {
    fn version(&self) -> Version {
        self.snote.version
    }

    fn field_names(&self) -> Vec<&'static str> {
        let mut names = self.snote.field_names();
        names.extend(self.note.field_names());
        names
    }

    fn field_types(&self) -> Vec<FieldType> {
        let mut types = self.snote.field_types();
        types.extend(self.note.field_types());
        types
    }

    fn check_types(&self, verbose: bool) -> bool {
        let snote_ok = self.snote.check_types(verbose);
        let note_ok = self.note.check_types(verbose);
        snote_ok && note_ok
    }

    /// Score-note fields take precedence where names overlap.
    fn field(&self, name: &str) -> Option<FieldValue> {
        self.snote.field(name).or_else(|| self.note.field(name))
    }

    fn from_matchline(text: &str, version: Version) -> Result<Self, MatchError> {
        let re = &PAIR_RE[NoteLayout::for_version(version).index()];
        let caps = captures(re, text, "snote-note")?;
        Ok(Self {
            snote: SnoteLine::from_captures(&caps, version)?,
            note: NoteLine::from_captures(&caps, version)?,
        })
    }

    fn matchline(&self) -> String {
        format!("{}-{}.", self.snote.matchline(), self.note.matchline())
    }
}

/// `snote(...)-deletion.`, a score note that was not played.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletionLine {
    pub snote: SnoteLine,
}

impl MatchLine for DeletionLine {
    fn version(&self) -> Version {
        self.snote.version
    }

    fn field_names(&self) -> Vec<&'static str> {
        self.snote.field_names()
    }

    fn field_types(&self) -> Vec<FieldType> {
        self.snote.field_types()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        self.snote.field(name)
    }

    fn from_matchline(text: &str, version: Version) -> Result<Self, MatchError> {
        let caps = captures(&DELETION_RE, text, "snote-deletion")?;
        Ok(Self {
            snote: SnoteLine::from_captures(&caps, version)?,
        })
    }

    fn matchline(&self) -> String {
        format!("{}-deletion.", self.snote.matchline())
    }
}

/// `insertion-note(...).`, a performed note with no score counterpart.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertionLine {
    pub note: NoteLine,
}

impl MatchLine for InsertionLine {
    fn version(&self) -> Version {
        self.note.version
    }

    fn field_names(&self) -> Vec<&'static str> {
        self.note.field_names()
    }

    fn field_types(&self) -> Vec<FieldType> {
        self.note.field_types()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        self.note.field(name)
    }

    fn from_matchline(text: &str, version: Version) -> Result<Self, MatchError> {
        let re = &INSERTION_RE[NoteLayout::for_version(version).index()];
        let caps = captures(re, text, "insertion-note")?;
        Ok(Self {
            note: NoteLine::from_captures(&caps, version)?,
        })
    }

    fn matchline(&self) -> String {
        format!("insertion-{}.", self.note.matchline())
    }
}
