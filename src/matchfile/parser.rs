use super::MatchError;
use super::fields::{FieldType, FieldValue};
use super::lines::{InfoLine, MatchLine, MetaLine, PedalLine};
use super::notes::{DeletionLine, InsertionLine, NoteLine, SnoteLine, SnoteNoteLine};
use super::version::Version;

/// Any line of a match file.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Info(InfoLine),
    Meta(MetaLine),
    Pedal(PedalLine),
    Snote(SnoteLine),
    Note(NoteLine),
    SnoteNote(SnoteNoteLine),
    Deletion(DeletionLine),
    Insertion(InsertionLine),
}

impl Line {
    fn inner(&self) -> &dyn MatchLine {
        match self {
            Line::Info(l) => l,
            Line::Meta(l) => l,
            Line::Pedal(l) => l,
            Line::Snote(l) => l,
            Line::Note(l) => l,
            Line::SnoteNote(l) => l,
            Line::Deletion(l) => l,
            Line::Insertion(l) => l,
        }
    }

    /// The score note carried by this line, if any.
    pub fn snote(&self) -> Option<&SnoteLine> {
        match self {
            Line::Snote(s) => Some(s),
            Line::SnoteNote(p) => Some(&p.snote),
            Line::Deletion(d) => Some(&d.snote),
            _ => None,
        }
    }

    /// The performed note carried by this line, if any.
    pub fn note(&self) -> Option<&NoteLine> {
        match self {
            Line::Note(n) => Some(n),
            Line::SnoteNote(p) => Some(&p.note),
            Line::Insertion(i) => Some(&i.note),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Line::Info(_) => "info",
            Line::Meta(_) => "meta",
            Line::Pedal(_) => "pedal",
            Line::Snote(_) => "snote",
            Line::Note(_) => "note",
            Line::SnoteNote(_) => "snote-note",
            Line::Deletion(_) => "deletion",
            Line::Insertion(_) => "insertion",
        }
    }
}

impl MatchLine for Line {
    fn version(&self) -> Version {
        self.inner().version()
    }

    fn field_names(&self) -> Vec<&'static str> {
        self.inner().field_names()
    }

    fn field_types(&self) -> Vec<FieldType> {
        self.inner().field_types()
    }

    fn field(&self, name: &str) -> Option<FieldValue> {
        self.inner().field(name)
    }

    fn check_types(&self, verbose: bool) -> bool {
        self.inner().check_types(verbose)
    }

    fn from_matchline(text: &str, version: Version) -> Result<Self, MatchError> {
        parse_matchline(text, version)
    }

    fn matchline(&self) -> String {
        self.inner().matchline()
    }
}

/// Parse one line of a match file.
///
/// Variants are tried in a fixed order, composites first, so that a pair line
/// is never taken for a bare score note.
pub fn parse_matchline(text: &str, version: Version) -> Result<Line, MatchError> {
    let text = text.trim();

    if text.starts_with("snote(") {
        if text.ends_with("-deletion.") {
            return DeletionLine::from_matchline(text, version).map(Line::Deletion);
        }
        if text.contains(")-note(") {
            return SnoteNoteLine::from_matchline(text, version).map(Line::SnoteNote);
        }
        return SnoteLine::from_matchline(text, version).map(Line::Snote);
    }
    if text.starts_with("insertion-") {
        return InsertionLine::from_matchline(text, version).map(Line::Insertion);
    }
    if text.starts_with("info(") {
        return InfoLine::from_matchline(text, version).map(Line::Info);
    }
    if text.starts_with("meta(") {
        return MetaLine::from_matchline(text, version).map(Line::Meta);
    }
    if text.starts_with("sustain(") || text.starts_with("soft(") {
        return PedalLine::from_matchline(text, version).map(Line::Pedal);
    }
    if text.starts_with("note(") {
        return NoteLine::from_matchline(text, version).map(Line::Note);
    }

    Err(MatchError::UnknownLine {
        text: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4() -> Version {
        Version::new(0, 4, 0)
    }

    #[test]
    fn test_dispatch_each_kind() {
        let cases = [
            ("info(midiClockUnits,480).", "info"),
            ("meta(keySignature,C Maj,1,0.0).", "meta"),
            ("sustain(100,127).", "pedal"),
            ("snote(1-1,[E,n],4,0:1,0,1/4,-1.0,0.0,[staff1])", "snote"),
            ("note(0,[E,n],4,471720,472397,472397,49)", "note"),
            (
                "snote(1-1,[E,n],4,0:1,0,1/4,-1.0,0.0,[staff1])-note(0,[E,n],4,471720,472397,472397,49).",
                "snote-note",
            ),
            ("snote(1-1,[E,n],4,0:1,0,1/4,-1.0,0.0,[staff1])-deletion.", "deletion"),
            ("insertion-note(5,[A,b],3,5000,5400,5600,33).", "insertion"),
        ];
        for (text, kind) in cases {
            let line = parse_matchline(text, v4()).unwrap();
            assert_eq!(line.kind(), kind, "{text}");
            assert_eq!(line.version(), v4());
        }
    }

    #[test]
    fn test_round_trip_every_variant() {
        let texts = [
            "info(matchFileVersion,4.0).",
            "info(timeSignature,[3/4]).",
            "meta(timeSignature,2/4,8,28.0).",
            "soft(20,40).",
            "snote(1-1,[E,n],4,0:1,0,1/4,-1.0,0.0,[staff1])-note(0,[E,n],4,471720,472397,472397,49).",
            "snote(4-2,[B,b],3,1:2,1/8/3,1/8/3,2.5,2.8333333333333335,[staff2,v2])-deletion.",
            "insertion-note(9,[D,#],6,900,950,1000,80).",
        ];
        for text in texts {
            let line = parse_matchline(text, v4()).unwrap();
            let reparsed = parse_matchline(&line.matchline(), v4()).unwrap();
            assert_eq!(reparsed, line, "{text}");
        }
    }

    #[test]
    fn test_unknown_line() {
        let err = parse_matchline("trill(1,2).", v4()).unwrap_err();
        assert!(matches!(err, MatchError::UnknownLine { .. }));
    }

    #[test]
    fn test_malformed_pair_reports_field() {
        let err = parse_matchline(
            "snote(1-1,[E,n],4,0:1,0,1/4,-1.0,0.0,[staff1])-note(0,[E,n],4,abc,472397,472397,49).",
            v4(),
        )
        .unwrap_err();
        assert!(matches!(err, MatchError::Field { field: "Onset", .. }));
    }
}
