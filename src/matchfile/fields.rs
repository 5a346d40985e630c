//! Field values of match lines and their text conversions.
//!
//! Every field has an `interpret_*` function (text → value) and a `format_*`
//! function (value → canonical text). Formatting is a left inverse of
//! interpretation: interpreting formatted text yields the same value.

use num_rational::Ratio;
use serde::Serialize;
use std::fmt;

use super::version::Version;
use super::MatchError;

/// Declared type of a match line field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Str,
    Int,
    /// Integer or absent (e.g. the octave of an unpitched anchor).
    OptionalInt,
    Float,
    Fractional,
    List,
    Version,
}

impl FieldType {
    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (FieldType::Str, FieldValue::Str(_))
                | (FieldType::Int, FieldValue::Int(_))
                | (FieldType::OptionalInt, FieldValue::Int(_) | FieldValue::Missing)
                | (FieldType::Float, FieldValue::Float(_))
                | (FieldType::Fractional, FieldValue::Fractional(_))
                | (FieldType::List, FieldValue::List(_))
                | (FieldType::Version, FieldValue::Version(_))
        )
    }
}

/// A field value read back from a line by its declared name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
    Fractional(FractionalDuration),
    List(Vec<String>),
    Version(Version),
    Missing,
}

impl From<Option<i32>> for FieldValue {
    fn from(value: Option<i32>) -> Self {
        value.map_or(FieldValue::Missing, |v| FieldValue::Int(v as i64))
    }
}

// ── Symbolic durations ────────────────────────────────────────────────

/// Exact symbolic duration as written in a score-note line.
///
/// Keeps the written structure (`1/4`, `3/8/3` tuplets, `1/4+1/16` sums) so
/// that formatting reproduces it; [`FractionalDuration::value`] gives the
/// exact rational length in whole notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FractionalDuration {
    pub numerator: i64,
    pub denominator: i64,
    pub tuple_div: Option<i64>,
    /// Non-empty only for additive durations; then the other fields hold the total.
    pub components: Vec<FractionalDuration>,
}

impl FractionalDuration {
    pub fn new(numerator: i64, denominator: i64) -> Self {
        Self {
            numerator,
            denominator,
            tuple_div: None,
            components: Vec::new(),
        }
    }

    pub fn with_tuple_div(numerator: i64, denominator: i64, tuple_div: i64) -> Self {
        Self {
            tuple_div: Some(tuple_div),
            ..Self::new(numerator, denominator)
        }
    }

    /// Sum of several durations, written as `a+b+...`.
    pub fn sum(components: Vec<FractionalDuration>) -> Self {
        let total: Ratio<i64> = components.iter().map(|c| c.value()).sum();
        Self {
            numerator: *total.numer(),
            denominator: *total.denom(),
            tuple_div: None,
            components,
        }
    }

    pub fn value(&self) -> Ratio<i64> {
        let base = Ratio::new(self.numerator, self.denominator);
        match self.tuple_div {
            Some(t) => base / t,
            None => base,
        }
    }

    pub fn as_f64(&self) -> f64 {
        let v = self.value();
        *v.numer() as f64 / *v.denom() as f64
    }
}

impl fmt::Display for FractionalDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.components.is_empty() {
            let parts: Vec<String> = self.components.iter().map(|c| c.to_string()).collect();
            return write!(f, "{}", parts.join("+"));
        }
        match self.tuple_div {
            Some(t) => write!(f, "{}/{}/{}", self.numerator, self.denominator, t),
            None if self.denominator == 1 => write!(f, "{}", self.numerator),
            None => write!(f, "{}/{}", self.numerator, self.denominator),
        }
    }
}

pub fn interpret_fractional(field: &'static str, s: &str) -> Result<FractionalDuration, MatchError> {
    let s = s.trim();
    if s.contains('+') {
        let components = s
            .split('+')
            .map(|part| interpret_simple_fractional(field, part))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(FractionalDuration::sum(components));
    }
    interpret_simple_fractional(field, s)
}

fn interpret_simple_fractional(field: &'static str, s: &str) -> Result<FractionalDuration, MatchError> {
    let err = || MatchError::Field {
        field,
        value: s.to_string(),
    };
    let nums: Vec<i64> = s
        .trim()
        .split('/')
        .map(|p| p.trim().parse::<i64>())
        .collect::<Result<_, _>>()
        .map_err(|_| err())?;

    match nums.as_slice() {
        [n] => Ok(FractionalDuration::new(*n, 1)),
        [_, 0] | [_, _, 0] | [_, 0, _] => Err(err()),
        [n, d] => Ok(FractionalDuration::new(*n, *d)),
        [n, d, t] => Ok(FractionalDuration::with_tuple_div(*n, *d, *t)),
        _ => Err(err()),
    }
}

// ── Scalars ───────────────────────────────────────────────────────────

pub fn interpret_string(s: &str) -> String {
    s.trim().to_string()
}

pub fn interpret_int(field: &'static str, s: &str) -> Result<i64, MatchError> {
    s.trim().parse::<i64>().map_err(|_| MatchError::Field {
        field,
        value: s.to_string(),
    })
}

pub fn interpret_i32(field: &'static str, s: &str) -> Result<i32, MatchError> {
    s.trim().parse::<i32>().map_err(|_| MatchError::Field {
        field,
        value: s.to_string(),
    })
}

/// Integer or absent. `-`, `None` and the empty string mean absent.
pub fn interpret_optional_int(field: &'static str, s: &str) -> Result<Option<i32>, MatchError> {
    match s.trim() {
        "" | "-" | "None" => Ok(None),
        other => interpret_i32(field, other).map(Some),
    }
}

pub fn interpret_float(field: &'static str, s: &str) -> Result<f64, MatchError> {
    s.trim().parse::<f64>().map_err(|_| MatchError::Field {
        field,
        value: s.to_string(),
    })
}

/// Bracketed comma-separated list: `[staff1,fermata]`. Brackets are optional.
pub fn interpret_list(s: &str) -> Vec<String> {
    let inner = s.trim().trim_start_matches('[').trim_end_matches(']');
    if inner.trim().is_empty() {
        return Vec::new();
    }
    inner.split(',').map(|item| item.trim().to_string()).collect()
}

pub fn format_optional_int(value: Option<i32>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// Floats always keep a decimal point (`-1.0`, `0.25`).
pub fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

/// Number of digits after the decimal point in a written float, if any.
pub fn written_decimals(text: &str) -> Option<usize> {
    let text = text.trim();
    if text.contains(['e', 'E']) {
        return None;
    }
    text.split_once('.').map(|(_, frac)| frac.len())
}

/// `value` with a fixed number of decimals when one was written, else as
/// [`format_float`].
pub fn format_float_decimals(value: f64, decimals: Option<usize>) -> String {
    match decimals {
        Some(d) if value.is_finite() => format!("{value:.d$}"),
        _ => format_float(value),
    }
}

/// Times and other integral-by-default quantities: `471720` when whole, `1.5` otherwise.
pub fn format_time(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

pub fn format_list(items: &[String]) -> String {
    format!("[{}]", items.join(","))
}

// ── Pitch spelling ────────────────────────────────────────────────────

/// Accidental text for an alteration. Zero is the natural sign `n`.
pub fn format_modifier(alter: Option<i32>) -> String {
    match alter {
        None => "-".to_string(),
        Some(0) => "n".to_string(),
        Some(1) => "#".to_string(),
        Some(2) => "##".to_string(),
        Some(-1) => "b".to_string(),
        Some(-2) => "bb".to_string(),
        Some(other) => other.to_string(),
    }
}

pub fn interpret_modifier(s: &str) -> Result<Option<i32>, MatchError> {
    match s.trim() {
        "n" | "" => Ok(Some(0)),
        "#" | "s" => Ok(Some(1)),
        "##" | "x" => Ok(Some(2)),
        "b" | "f" => Ok(Some(-1)),
        "bb" => Ok(Some(-2)),
        "-" | "None" => Ok(None),
        other => other
            .parse::<i32>()
            .map(Some)
            .map_err(|_| MatchError::Field {
                field: "Modifier",
                value: other.to_string(),
            }),
    }
}

fn step_base(step: &str) -> Option<i32> {
    match step {
        "C" => Some(0),
        "D" => Some(2),
        "E" => Some(4),
        "F" => Some(5),
        "G" => Some(7),
        "A" => Some(9),
        "B" => Some(11),
        _ => None,
    }
}

/// MIDI pitch of a spelled note. `None` when the octave or step is unknown.
pub fn pitch_spelling_to_midi_pitch(step: &str, alter: Option<i32>, octave: Option<i32>) -> Option<i32> {
    let base = step_base(&step.to_uppercase())?;
    let octave = octave?;
    Some((octave + 1) * 12 + base + alter.unwrap_or(0))
}

/// Sharp-based spelling of a MIDI pitch, used when no spelling was written.
pub fn midi_pitch_to_spelling(pitch: i32) -> PitchSpelling {
    const STEPS: [(&str, i32); 12] = [
        ("C", 0),
        ("C", 1),
        ("D", 0),
        ("D", 1),
        ("E", 0),
        ("F", 0),
        ("F", 1),
        ("G", 0),
        ("G", 1),
        ("A", 0),
        ("A", 1),
        ("B", 0),
    ];
    let (step, alter) = STEPS[pitch.rem_euclid(12) as usize];
    PitchSpelling {
        step: step.to_string(),
        alter: Some(alter),
        octave: Some(pitch.div_euclid(12) - 1),
    }
}

/// Note name, accidental and octave as written in `[E,n],4`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PitchSpelling {
    /// Always upper-case.
    pub step: String,
    pub alter: Option<i32>,
    pub octave: Option<i32>,
}

impl PitchSpelling {
    pub fn interpret(step: &str, modifier: &str, octave: &str) -> Result<Self, MatchError> {
        Ok(Self {
            step: step.trim().to_uppercase(),
            alter: interpret_modifier(modifier)?,
            octave: interpret_optional_int("Octave", octave)?,
        })
    }

    pub fn midi_pitch(&self) -> Option<i32> {
        pitch_spelling_to_midi_pitch(&self.step, self.alter, self.octave)
    }

    /// Note name as written for a given version (lower-case before 0.3.0).
    pub fn format_step(&self, version: Version) -> String {
        if version < Version::ADJUSTED_OFFSET {
            self.step.to_lowercase()
        } else {
            self.step.to_uppercase()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fractional_simple() {
        let d = interpret_fractional("Duration", "1/4").unwrap();
        assert_eq!(d, FractionalDuration::new(1, 4));
        assert_eq!(d.to_string(), "1/4");
        assert_eq!(d.value(), Ratio::new(1, 4));
    }

    #[test]
    fn test_fractional_integer_has_no_denominator() {
        let d = interpret_fractional("Offset", "0").unwrap();
        assert_eq!(d.to_string(), "0");
        let d = FractionalDuration::new(3, 1);
        assert_eq!(d.to_string(), "3");
    }

    #[test]
    fn test_fractional_tuplet_and_sum() {
        let t = interpret_fractional("Duration", "1/8/3").unwrap();
        assert_eq!(t.tuple_div, Some(3));
        assert_eq!(t.value(), Ratio::new(1, 24));
        assert_eq!(t.to_string(), "1/8/3");

        let s = interpret_fractional("Duration", "1/4+1/16").unwrap();
        assert_eq!(s.value(), Ratio::new(5, 16));
        assert_eq!(s.to_string(), "1/4+1/16");
        assert_eq!(interpret_fractional("Duration", &s.to_string()).unwrap(), s);
    }

    #[test]
    fn test_fractional_rejects_zero_denominator() {
        assert!(interpret_fractional("Duration", "1/0").is_err());
        assert!(interpret_fractional("Duration", "quarter").is_err());
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(format_float(-1.0), "-1.0");
        assert_eq!(format_float(0.25), "0.25");
        assert_eq!(written_decimals("0.0000"), Some(4));
        assert_eq!(written_decimals("12"), None);
        assert_eq!(format_float_decimals(0.0, Some(4)), "0.0000");
        assert_eq!(format_float_decimals(2.5, None), "2.5");
        assert_eq!(format_time(471720.0), "471720");
        assert_eq!(format_time(1.5), "1.5");
    }

    #[test]
    fn test_list_round_trip() {
        let l = interpret_list("[staff1,fermata]");
        assert_eq!(l, vec!["staff1".to_string(), "fermata".to_string()]);
        assert_eq!(format_list(&l), "[staff1,fermata]");
        assert!(interpret_list("[]").is_empty());
    }

    #[test]
    fn test_modifier() {
        assert_eq!(interpret_modifier("n").unwrap(), Some(0));
        assert_eq!(interpret_modifier("#").unwrap(), Some(1));
        assert_eq!(interpret_modifier("bb").unwrap(), Some(-2));
        assert_eq!(format_modifier(Some(0)), "n");
        assert_eq!(format_modifier(Some(-1)), "b");
        assert!(interpret_modifier("?").is_err());
    }

    #[test]
    fn test_midi_pitch_from_spelling() {
        assert_eq!(pitch_spelling_to_midi_pitch("E", Some(0), Some(4)), Some(64));
        assert_eq!(pitch_spelling_to_midi_pitch("c", Some(1), Some(4)), Some(61));
        assert_eq!(pitch_spelling_to_midi_pitch("B", Some(-1), Some(3)), Some(58));
        assert_eq!(pitch_spelling_to_midi_pitch("E", Some(0), None), None);
    }

    #[test]
    fn test_field_type_accepts() {
        assert!(FieldType::OptionalInt.accepts(&FieldValue::Missing));
        assert!(FieldType::OptionalInt.accepts(&FieldValue::Int(4)));
        assert!(!FieldType::Int.accepts(&FieldValue::Missing));
        assert!(!FieldType::Float.accepts(&FieldValue::Int(1)));
    }
}
