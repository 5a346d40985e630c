use serde::{Deserialize, Serialize};

use crate::matchfile::{Line, MatchFile};

/// One score-performance correspondence record.
///
/// Serialized with a `label` tag, e.g.
/// `{"label":"match","score_id":"1-1","performance_id":"0"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "label", rename_all = "lowercase")]
pub enum Alignment {
    Match {
        score_id: String,
        performance_id: String,
    },
    /// Score note not played.
    Deletion { score_id: String },
    /// Played note with no score counterpart.
    Insertion { performance_id: String },
}

impl Alignment {
    pub fn score_id(&self) -> Option<&str> {
        match self {
            Alignment::Match { score_id, .. } | Alignment::Deletion { score_id } => Some(score_id),
            Alignment::Insertion { .. } => None,
        }
    }

    pub fn performance_id(&self) -> Option<&str> {
        match self {
            Alignment::Match { performance_id, .. } | Alignment::Insertion { performance_id } => {
                Some(performance_id)
            }
            Alignment::Deletion { .. } => None,
        }
    }
}

/// Alignment records of a match file in line order.
pub fn alignment_from_matchfile(mf: &MatchFile) -> Vec<Alignment> {
    mf.lines
        .iter()
        .filter_map(|line| match line {
            Line::SnoteNote(p) => Some(Alignment::Match {
                score_id: p.snote.anchor.clone(),
                performance_id: p.note.id.clone(),
            }),
            Line::Deletion(d) => Some(Alignment::Deletion {
                score_id: d.snote.anchor.clone(),
            }),
            Line::Insertion(i) => Some(Alignment::Insertion {
                performance_id: i.note.id.clone(),
            }),
            _ => None,
        })
        .collect()
}

pub fn alignment_from_json(text: &str) -> Result<Vec<Alignment>, serde_json::Error> {
    serde_json::from_str(text)
}

pub fn alignment_to_json(alignment: &[Alignment]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(alignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchfile::tests::SAMPLE;

    #[test]
    fn test_from_matchfile() {
        let mf = MatchFile::parse(SAMPLE).unwrap();
        let alignment = alignment_from_matchfile(&mf);
        assert_eq!(alignment.len(), 5);
        assert_eq!(
            alignment[0],
            Alignment::Match {
                score_id: "1-1".to_string(),
                performance_id: "0".to_string()
            }
        );
        assert_eq!(alignment[2].score_id(), Some("1-3"));
        assert_eq!(alignment[2].performance_id(), None);
        assert_eq!(alignment[3].performance_id(), Some("2"));
    }

    #[test]
    fn test_json_labels() {
        let json = r#"[
            {"label": "match", "score_id": "n1", "performance_id": "p1"},
            {"label": "deletion", "score_id": "n2"},
            {"label": "insertion", "performance_id": "p9"}
        ]"#;
        let alignment = alignment_from_json(json).unwrap();
        assert_eq!(alignment.len(), 3);
        assert!(matches!(alignment[1], Alignment::Deletion { .. }));

        let text = alignment_to_json(&alignment).unwrap();
        assert!(text.contains("\"label\": \"insertion\""));
        assert_eq!(alignment_from_json(&text).unwrap(), alignment);
    }

    #[test]
    fn test_unknown_label_rejected() {
        assert!(alignment_from_json(r#"[{"label": "ornament", "score_id": "x"}]"#).is_err());
    }
}
