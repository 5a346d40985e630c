use regex::{Captures, Regex};
use std::sync::LazyLock;

use super::MatchError;
use super::fields::{
    FieldType, FieldValue, format_float, format_float_decimals, format_list, interpret_float,
    interpret_i32, interpret_int, interpret_list, interpret_string, written_decimals,
};
use super::version::Version;

/// A single record of the match grammar.
///
/// Field names and types are declared per variant; values are read back by
/// name through [`MatchLine::field`]. Formatting with [`MatchLine::matchline`]
/// is the inverse of [`MatchLine::from_matchline`] for every parsed value.
pub trait MatchLine {
    fn version(&self) -> Version;

    /// Ordered field names, as they appear in the line.
    fn field_names(&self) -> Vec<&'static str>;

    /// Declared type of each field, parallel to [`MatchLine::field_names`].
    fn field_types(&self) -> Vec<FieldType>;

    fn field(&self, name: &str) -> Option<FieldValue>;

    fn from_matchline(text: &str, version: Version) -> Result<Self, MatchError>
    where
        Self: Sized;

    /// Canonical text of the line.
    fn matchline(&self) -> String;

    /// Whether every field holds a value of its declared type.
    fn check_types(&self, verbose: bool) -> bool {
        let mut ok = true;
        for (name, ty) in self.field_names().into_iter().zip(self.field_types()) {
            let value = self.field(name).unwrap_or(FieldValue::Missing);
            let accepted = ty.accepts(&value);
            if verbose {
                log::info!("{name}: {value:?} ({ty:?}) {}", if accepted { "ok" } else { "MISMATCH" });
            } else if !accepted {
                log::debug!("{name} holds {value:?}, expected {ty:?}");
            }
            ok &= accepted;
        }
        ok
    }
}

/// Text of a named capture group, empty if the group did not participate.
pub(crate) fn group<'t>(caps: &Captures<'t>, name: &str) -> &'t str {
    caps.name(name).map_or("", |m| m.as_str())
}

// ── Info lines ────────────────────────────────────────────────────────

static INFO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^info\((?P<attribute>[^,]+),(?P<value>.+)\)\.$").unwrap());

/// Value of a global `info(...)` line, typed by its attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum InfoValue {
    Str(String),
    Int(i64),
    Float(f64),
    List(Vec<String>),
    Version(Version),
}

impl InfoValue {
    /// Expected type of the value of a given info attribute.
    pub fn field_type(attribute: &str) -> FieldType {
        match attribute {
            "matchFileVersion" => FieldType::Version,
            "midiClockUnits" | "midiClockRate" => FieldType::Int,
            "approximateTempo" | "audioFirstNote" | "audioLastNote" => FieldType::Float,
            _ => FieldType::Str,
        }
    }

    pub fn interpret(attribute: &str, text: &str) -> Result<Self, MatchError> {
        let text = text.trim();
        match attribute {
            "matchFileVersion" => Ok(InfoValue::Version(text.parse()?)),
            "midiClockUnits" | "midiClockRate" => Ok(InfoValue::Int(interpret_int("Value", text)?)),
            "approximateTempo" | "audioFirstNote" | "audioLastNote" => {
                Ok(InfoValue::Float(interpret_float("Value", text)?))
            }
            "keySignature" | "timeSignature" | "subtitle" if text.starts_with('[') => {
                Ok(InfoValue::List(interpret_list(text)))
            }
            _ => Ok(InfoValue::Str(interpret_string(text))),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            InfoValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            InfoValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            InfoValue::Float(f) => Some(*f),
            InfoValue::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Textual content without list brackets, comma-joined.
    pub fn text(&self) -> String {
        match self {
            InfoValue::List(items) => items.join(","),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for InfoValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InfoValue::Str(s) => write!(f, "{s}"),
            InfoValue::Int(i) => write!(f, "{i}"),
            InfoValue::Float(x) => write!(f, "{}", format_float(*x)),
            InfoValue::List(items) => write!(f, "{}", format_list(items)),
            InfoValue::Version(v) => write!(f, "{v}"),
        }
    }
}

impl From<&InfoValue> for FieldValue {
    fn from(value: &InfoValue) -> Self {
        match value {
            InfoValue::Str(s) => FieldValue::Str(s.clone()),
            InfoValue::Int(i) => FieldValue::Int(*i),
            InfoValue::Float(x) => FieldValue::Float(*x),
            InfoValue::List(items) => FieldValue::List(items.clone()),
            InfoValue::Version(v) => FieldValue::Version(*v),
        }
    }
}

/// `info(Attribute,Value).`
#[derive(Debug, Clone, PartialEq)]
pub struct InfoLine {
    pub version: Version,
    pub attribute: String,
    pub value: InfoValue,
}

impl InfoLine {
    pub fn new(version: Version, attribute: impl Into<String>, value: InfoValue) -> Self {
        Self {
            version,
            attribute: attribute.into(),
            value,
        }
    }
}

impl MatchLine for InfoLine {
    fn version(&self) -> Version {
        self.version
    }

    fn field_names(&self) -> Vec<&'static str> {
        vec!["Attribute", "Value"]
    }

    fn field_types(&self) -> Vec<FieldType> {
        vec![FieldType::Str, InfoValue::field_type(&self.attribute)]
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "Attribute" => Some(FieldValue::Str(self.attribute.clone())),
            "Value" => Some((&self.value).into()),
            _ => None,
        }
    }

    fn from_matchline(text: &str, version: Version) -> Result<Self, MatchError> {
        let caps = INFO_RE.captures(text.trim()).ok_or_else(|| MatchError::Pattern {
            expected: "info",
            text: text.to_string(),
        })?;
        let attribute = interpret_string(group(&caps, "attribute"));
        let value = InfoValue::interpret(&attribute, group(&caps, "value"))?;
        Ok(Self {
            version,
            attribute,
            value,
        })
    }

    fn matchline(&self) -> String {
        format!("info({},{}).", self.attribute, self.value)
    }
}

// ── Meta lines ────────────────────────────────────────────────────────

static META_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^meta\((?P<attribute>[^,]+),(?P<value>[^,]+),(?P<bar>[^,]+),(?P<time>[^,\)]+)\)\.$",
    )
    .unwrap()
});

/// `meta(Attribute,Value,Bar,TimeInBeats).`, a score event anchored in time,
/// such as a time or key signature change.
#[derive(Debug, Clone, PartialEq)]
pub struct MetaLine {
    pub version: Version,
    pub attribute: String,
    pub value: String,
    pub bar: i32,
    pub time_in_beats: f64,
    /// Decimals `time_in_beats` was written with.
    pub time_decimals: Option<usize>,
}

impl MatchLine for MetaLine {
    fn version(&self) -> Version {
        self.version
    }

    fn field_names(&self) -> Vec<&'static str> {
        vec!["Attribute", "Value", "Bar", "TimeInBeats"]
    }

    fn field_types(&self) -> Vec<FieldType> {
        vec![FieldType::Str, FieldType::Str, FieldType::Int, FieldType::Float]
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "Attribute" => Some(FieldValue::Str(self.attribute.clone())),
            "Value" => Some(FieldValue::Str(self.value.clone())),
            "Bar" => Some(FieldValue::Int(self.bar as i64)),
            "TimeInBeats" => Some(FieldValue::Float(self.time_in_beats)),
            _ => None,
        }
    }

    fn from_matchline(text: &str, version: Version) -> Result<Self, MatchError> {
        let caps = META_RE.captures(text.trim()).ok_or_else(|| MatchError::Pattern {
            expected: "meta",
            text: text.to_string(),
        })?;
        Ok(Self {
            version,
            attribute: interpret_string(group(&caps, "attribute")),
            value: interpret_string(group(&caps, "value")),
            bar: interpret_i32("Bar", group(&caps, "bar"))?,
            time_in_beats: interpret_float("TimeInBeats", group(&caps, "time"))?,
            time_decimals: written_decimals(group(&caps, "time")),
        })
    }

    fn matchline(&self) -> String {
        format!(
            "meta({},{},{},{}).",
            self.attribute,
            self.value,
            self.bar,
            format_float_decimals(self.time_in_beats, self.time_decimals)
        )
    }
}

// ── Pedal lines ───────────────────────────────────────────────────────

static PEDAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<kind>sustain|soft)\((?P<time>[^,]+),(?P<value>[^,\)]+)\)\.$").unwrap()
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PedalKind {
    Sustain,
    Soft,
}

impl PedalKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            PedalKind::Sustain => "sustain",
            PedalKind::Soft => "soft",
        }
    }

    /// MIDI controller number carrying this pedal.
    pub fn controller(&self) -> u8 {
        match self {
            PedalKind::Sustain => 64,
            PedalKind::Soft => 67,
        }
    }
}

/// `sustain(Time,Value).` or `soft(Time,Value).`, time in MIDI ticks.
#[derive(Debug, Clone, PartialEq)]
pub struct PedalLine {
    pub version: Version,
    pub kind: PedalKind,
    pub time: i64,
    pub value: i32,
}

impl MatchLine for PedalLine {
    fn version(&self) -> Version {
        self.version
    }

    fn field_names(&self) -> Vec<&'static str> {
        vec!["Time", "Value"]
    }

    fn field_types(&self) -> Vec<FieldType> {
        vec![FieldType::Int, FieldType::Int]
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "Time" => Some(FieldValue::Int(self.time)),
            "Value" => Some(FieldValue::Int(self.value as i64)),
            _ => None,
        }
    }

    fn from_matchline(text: &str, version: Version) -> Result<Self, MatchError> {
        let caps = PEDAL_RE.captures(text.trim()).ok_or_else(|| MatchError::Pattern {
            expected: "pedal",
            text: text.to_string(),
        })?;
        let kind = match group(&caps, "kind") {
            "sustain" => PedalKind::Sustain,
            _ => PedalKind::Soft,
        };
        Ok(Self {
            version,
            kind,
            time: interpret_int("Time", group(&caps, "time"))?,
            value: interpret_i32("Value", group(&caps, "value"))?,
        })
    }

    fn matchline(&self) -> String {
        format!("{}({},{}).", self.kind.keyword(), self.time, self.value)
    }
}
