pub mod fields;
pub mod lines;
pub mod notes;
pub mod parser;
pub mod signatures;
pub mod version;

use std::path::Path;
use thiserror::Error;

pub use fields::{FieldType, FieldValue, FractionalDuration, PitchSpelling};
pub use lines::{InfoLine, InfoValue, MatchLine, MetaLine, PedalKind, PedalLine};
pub use notes::{DeletionLine, InsertionLine, NoteLayout, NoteLine, SnoteLine, SnoteNoteLine};
pub use parser::{Line, parse_matchline};
pub use signatures::{KeySignatureEntry, TimeSignatureEntry};
pub use version::Version;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Input does not fit the {expected} pattern: {text}")]
    Pattern { expected: &'static str, text: String },
    #[error("Unrecognized match line: {text}")]
    UnknownLine { text: String },
    #[error("Invalid value for {field}: {value:?}")]
    Field { field: &'static str, value: String },
    #[error("Invalid match file version: {0:?}")]
    InvalidVersion(String),
    #[error("All lines should have the same version: line {index} has {found}, expected {expected}")]
    VersionMismatch {
        expected: Version,
        found: Version,
        index: usize,
    },
    #[error("Match file has no lines")]
    Empty,
    #[error("Invalid mode. Expected \"major\" or \"minor\" but got {0:?}")]
    InvalidMode(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Line {line_number}: {source}")]
    AtLine {
        line_number: usize,
        #[source]
        source: Box<MatchError>,
    },
}

/// An ordered sequence of match lines sharing one version.
///
/// Storage order is the file order and is preserved on serialization. All
/// views are read-only projections over the stored lines.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchFile {
    pub lines: Vec<Line>,
    pub name: String,
}

impl MatchFile {
    /// Build from parsed lines, rejecting an empty list or mixed versions.
    pub fn new(lines: Vec<Line>) -> Result<Self, MatchError> {
        let first = lines.first().ok_or(MatchError::Empty)?.version();
        if let Some((index, line)) = lines
            .iter()
            .enumerate()
            .find(|(_, line)| line.version() != first)
        {
            return Err(MatchError::VersionMismatch {
                expected: first,
                found: line.version(),
                index,
            });
        }
        Ok(Self {
            lines,
            name: String::new(),
        })
    }

    /// Assemble from lines without validation, e.g. when writing a file
    /// line by line.
    pub fn from_lines(lines: Vec<Line>, name: impl Into<String>) -> Self {
        Self {
            lines,
            name: name.into(),
        }
    }

    /// Parse the text of a match file.
    ///
    /// The `matchFileVersion` info line is located first and its version is
    /// used for every line. Without one the latest version is assumed.
    pub fn parse(text: &str) -> Result<Self, MatchError> {
        let version = match find_version(text)? {
            Some(v) => v,
            None => {
                log::warn!("No matchFileVersion line found, assuming {}", Version::LATEST);
                Version::LATEST
            }
        };

        let mut lines = Vec::new();
        for (i, raw) in text.lines().enumerate() {
            if raw.trim().is_empty() {
                log::trace!("Skipping blank line {}", i + 1);
                continue;
            }
            let line = parse_matchline(raw, version).map_err(|e| MatchError::AtLine {
                line_number: i + 1,
                source: Box::new(e),
            })?;
            lines.push(line);
        }

        log::debug!("Parsed {} match lines (version {version})", lines.len());
        Self::new(lines)
    }

    pub fn load(path: &Path) -> Result<Self, MatchError> {
        let text = std::fs::read_to_string(path)?;
        let mut file = Self::parse(&text)?;
        file.name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(file)
    }

    pub fn version(&self) -> Version {
        self.lines.first().map_or(Version::LATEST, |l| l.version())
    }

    /// All performed notes (matched and inserted), in file order.
    pub fn notes(&self) -> Vec<&NoteLine> {
        self.lines.iter().filter_map(Line::note).collect()
    }

    /// All score notes (matched, deleted and bare), in file order.
    pub fn snotes(&self) -> Vec<&SnoteLine> {
        self.lines.iter().filter_map(Line::snote).collect()
    }

    pub fn note_pairs(&self) -> Vec<(&SnoteLine, &NoteLine)> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::SnoteNote(p) => Some((&p.snote, &p.note)),
                _ => None,
            })
            .collect()
    }

    pub fn insertions(&self) -> Vec<&NoteLine> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Insertion(i) => Some(&i.note),
                _ => None,
            })
            .collect()
    }

    pub fn deletions(&self) -> Vec<&SnoteLine> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Deletion(d) => Some(&d.snote),
                _ => None,
            })
            .collect()
    }

    fn pedal(&self, kind: PedalKind) -> Vec<&PedalLine> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Pedal(p) if p.kind == kind => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn sustain_pedal(&self) -> Vec<&PedalLine> {
        self.pedal(PedalKind::Sustain)
    }

    pub fn soft_pedal(&self) -> Vec<&PedalLine> {
        self.pedal(PedalKind::Soft)
    }

    pub fn info_lines(&self) -> Vec<&InfoLine> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Info(i) => Some(i),
                _ => None,
            })
            .collect()
    }

    /// Value of the first info line with this attribute.
    pub fn info(&self, attribute: &str) -> Option<&InfoValue> {
        self.info_lines()
            .into_iter()
            .find(|i| i.attribute == attribute)
            .map(|i| &i.value)
    }

    pub fn meta_lines(&self) -> Vec<&MetaLine> {
        self.lines
            .iter()
            .filter_map(|line| match line {
                Line::Meta(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    pub fn midi_clock_units(&self) -> Option<i64> {
        self.info("midiClockUnits").and_then(InfoValue::as_int)
    }

    pub fn midi_clock_rate(&self) -> Option<i64> {
        self.info("midiClockRate").and_then(InfoValue::as_int)
    }

    /// Earliest score onset in beats.
    pub fn first_onset(&self) -> Option<f64> {
        self.snotes()
            .iter()
            .map(|s| s.onset_in_beats)
            .min_by(|a, b| a.total_cmp(b))
    }

    pub fn first_bar(&self) -> Option<i32> {
        self.snotes().iter().map(|s| s.measure).min()
    }

    /// Canonical text of every line, in order, one per line.
    pub fn to_matchfile_text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.matchline());
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Path) -> Result<(), MatchError> {
        std::fs::write(path, self.to_matchfile_text())?;
        Ok(())
    }
}

fn find_version(text: &str) -> Result<Option<Version>, MatchError> {
    for (i, raw) in text.lines().enumerate() {
        let raw = raw.trim();
        if !raw.starts_with("info(matchFileVersion,") {
            continue;
        }
        let line = InfoLine::from_matchline(raw, Version::LATEST).map_err(|e| MatchError::AtLine {
            line_number: i + 1,
            source: Box::new(e),
        })?;
        if let InfoValue::Version(v) = line.value {
            return Ok(Some(v));
        }
    }
    Ok(None)
}
