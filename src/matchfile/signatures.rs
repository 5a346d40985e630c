//! Time and key signatures reconstructed from info and meta lines.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use super::{InfoValue, MatchError, MatchFile};

static TIME_SIG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([0-9]+)/([0-9]*)").unwrap());

static KEY_SIG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?P<step1>[A-G])(?P<alter1>[#b]*) ",
        r"(?P<mode1>[a-zA-Z]+)(?P<slash>/*)",
        r"(?P<step2>[A-G]*)(?P<alter2>[#b]*)",
        r"(?P<space2> *)(?P<mode2>[a-zA-Z]*)",
    ))
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSignatureEntry {
    /// Onset in beats.
    pub time: f64,
    pub bar: i32,
    pub numerator: u32,
    pub denominator: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeySignatureEntry {
    pub time: f64,
    pub bar: i32,
    /// One or two keys, e.g. `["C", "Am"]` for `C Maj/A min`.
    pub keys: Vec<String>,
}

fn parse_time_signature(text: &str) -> Option<(u32, u32)> {
    let caps = TIME_SIG_RE.captures(text)?;
    let numerator = caps.get(1)?.as_str().parse().ok()?;
    // "4/" has an empty denominator; treat it as a quarter.
    let denominator = caps.get(2)?.as_str().parse().unwrap_or(4);
    Some((numerator, denominator))
}

fn format_key(step: &str, alter: &str, mode: &str) -> Result<String, MatchError> {
    let suffix = match mode.to_lowercase().as_str() {
        "maj" | "" | "major" => "",
        "min" | "m" | "minor" => "m",
        _ => return Err(MatchError::InvalidMode(mode.to_string())),
    };
    Ok(format!("{step}{alter}{suffix}"))
}

/// Parse `"C Maj"`, `"Eb min"` or `"C Maj/A min"` into compact keys.
pub fn parse_key_signature(text: &str) -> Result<Vec<String>, MatchError> {
    let caps = KEY_SIG_RE.captures(text).ok_or_else(|| MatchError::Field {
        field: "keySignature",
        value: text.to_string(),
    })?;
    let get = |name: &str| caps.name(name).map_or("", |m| m.as_str());

    let mut keys = vec![format_key(get("step1"), get("alter1"), get("mode1"))?];
    if !get("step2").is_empty() {
        keys.push(format_key(get("step2"), get("alter2"), get("mode2"))?);
    }
    Ok(keys)
}

impl MatchFile {
    /// Time signatures in onset order, starting from the global info line
    /// and extended by `meta(timeSignature,...)` lines. Adjacent entries
    /// with the same signature are collapsed into the first.
    pub fn time_signatures(&self) -> Vec<TimeSignatureEntry> {
        let first_onset = self.first_onset().unwrap_or(0.0);
        let first_bar = self.first_bar().unwrap_or(0);
        let mut entries = Vec::new();

        if let Some((numerator, denominator)) = self
            .info("timeSignature")
            .map(InfoValue::text)
            .and_then(|t| parse_time_signature(&t))
        {
            entries.push(TimeSignatureEntry {
                time: first_onset,
                bar: first_bar,
                numerator,
                denominator,
            });
        }

        for meta in self.meta_lines() {
            if meta.attribute != "timeSignature" {
                continue;
            }
            match parse_time_signature(&meta.value) {
                Some((numerator, denominator)) => entries.push(TimeSignatureEntry {
                    time: meta.time_in_beats,
                    bar: meta.bar,
                    numerator,
                    denominator,
                }),
                None => log::warn!("Ignoring malformed time signature {:?} in bar {}", meta.value, meta.bar),
            }
        }

        entries.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.bar.cmp(&b.bar)));
        entries.dedup();

        let mut collapsed: Vec<TimeSignatureEntry> = Vec::with_capacity(entries.len());
        for entry in entries {
            match collapsed.last() {
                Some(prev)
                    if prev.numerator == entry.numerator
                        && prev.denominator == entry.denominator => {}
                _ => collapsed.push(entry),
            }
        }
        collapsed
    }

    /// Key signatures in file order: the global info line (first entry of
    /// its list) followed by `meta(keySignature,...)` lines, with adjacent
    /// duplicates collapsed.
    pub fn key_signatures(&self) -> Result<Vec<KeySignatureEntry>, MatchError> {
        let mut entries: Vec<KeySignatureEntry> = Vec::new();
        let mut push = |entry: KeySignatureEntry| {
            if entries.last().is_none_or(|prev| prev.keys != entry.keys) {
                entries.push(entry);
            }
        };

        for info in self.info_lines() {
            if info.attribute != "keySignature" {
                continue;
            }
            let text = match &info.value {
                InfoValue::List(items) => items.first().cloned().unwrap_or_default(),
                other => other.text().split(',').next().unwrap_or_default().to_string(),
            };
            push(KeySignatureEntry {
                time: self.first_onset().unwrap_or(0.0),
                bar: self.first_bar().unwrap_or(0),
                keys: parse_key_signature(&text)?,
            });
        }

        for meta in self.meta_lines() {
            if meta.attribute != "keySignature" {
                continue;
            }
            push(KeySignatureEntry {
                time: meta.time_in_beats,
                bar: meta.bar,
                keys: parse_key_signature(&meta.value)?,
            });
        }

        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchfile::tests::SAMPLE;

    #[test]
    fn test_key_signature_grammar() {
        assert_eq!(parse_key_signature("C Maj/A min").unwrap(), vec!["C", "Am"]);
        assert_eq!(parse_key_signature("Eb minor").unwrap(), vec!["Ebm"]);
        assert_eq!(parse_key_signature("F# major").unwrap(), vec!["F#"]);
    }

    #[test]
    fn test_invalid_key_mode() {
        let err = parse_key_signature("C dorian").unwrap_err();
        assert!(matches!(err, MatchError::InvalidMode(ref m) if m == "dorian"));
    }

    #[test]
    fn test_time_signatures_from_info_and_meta() {
        let mf = MatchFile::parse(SAMPLE).unwrap();
        let ts = mf.time_signatures();
        assert_eq!(ts.len(), 2);
        assert_eq!((ts[0].numerator, ts[0].denominator), (4, 4));
        assert_eq!((ts[0].time, ts[0].bar), (0.0, 1));
        assert_eq!((ts[1].numerator, ts[1].denominator), (3, 4));
        assert_eq!(ts[1].bar, 2);
    }

    #[test]
    fn test_adjacent_duplicate_time_signatures_collapse() {
        let text = format!(
            "{SAMPLE}meta(timeSignature,3/4,3,7.0).\nmeta(timeSignature,4/4,4,10.0).\n"
        );
        let mf = MatchFile::parse(&text).unwrap();
        let ts = mf.time_signatures();
        let sigs: Vec<(u32, f64)> = ts.iter().map(|t| (t.numerator, t.time)).collect();
        assert_eq!(sigs, vec![(4, 0.0), (3, 4.0), (4, 10.0)]);
    }

    #[test]
    fn test_key_signatures() {
        let text = format!(
            "{SAMPLE}meta(keySignature,C Maj/A min,2,4.0).\nmeta(keySignature,G Maj,3,7.0).\n"
        );
        let mf = MatchFile::parse(&text).unwrap();
        let ks = mf.key_signatures().unwrap();
        assert_eq!(ks.len(), 2);
        assert_eq!(ks[0].keys, vec!["C", "Am"]);
        assert_eq!(ks[1].keys, vec!["G"]);
        assert_eq!(ks[1].bar, 3);
    }
}
