pub mod articulation;
pub mod asynchrony;
pub mod dynamics;
pub mod matched;
pub mod pedal;
pub mod phrasing;
pub mod stats;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use thiserror::Error;

use crate::alignment::Alignment;
use crate::performance::Performance;
use crate::score::Score;
use matched::MatchedScore;

#[derive(Error, Debug)]
pub enum AnalyzeError {
    #[error("Unknown performance feature function: {0}")]
    UnknownFeature(String),
    #[error("Feature {extractor} returned {found} rows for {expected} matched notes")]
    RowCount {
        extractor: String,
        found: usize,
        expected: usize,
    },
    #[error("NaNs or Infs in feature {extractor}: {}", .columns.join(", "))]
    NonFinite {
        extractor: String,
        columns: Vec<String>,
    },
}

/// How velocities of simultaneous notes are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Mean,
    Max,
}

/// Tunables shared by every extractor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureOptions {
    /// Beats either side of an onset for tempo/dynamics correlation.
    pub window_beats: f64,
    pub aggregation: Aggregation,
    pub articulation_mask: bool,
    /// Final beats fitted by the phrasing extractor.
    pub phrase_window_beats: f64,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        Self {
            window_beats: 5.0,
            aggregation: Aggregation::Mean,
            articulation_mask: false,
            phrase_window_beats: 4.0,
        }
    }
}

// ── Feature tables ─────────────────────────────────────────────────────

/// Named f64 columns of equal length, one row per matched note.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureTable {
    n_rows: usize,
    columns: Vec<(String, Vec<f64>)>,
}

impl FeatureTable {
    pub fn new(n_rows: usize) -> Self {
        Self {
            n_rows,
            columns: Vec::new(),
        }
    }

    /// Append a column, replacing an existing one of the same name.
    pub fn push(&mut self, name: impl Into<String>, values: Vec<f64>) {
        let name = name.into();
        match self.columns.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = values,
            None => self.columns.push((name, values)),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[(String, Vec<f64>)] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Row-major view, one map per matched note.
    pub fn rows(&self) -> Vec<BTreeMap<&str, f64>> {
        (0..self.n_rows)
            .map(|i| {
                self.columns
                    .iter()
                    .map(|(n, v)| (n.as_str(), v.get(i).copied().unwrap_or(f64::NAN)))
                    .collect()
            })
            .collect()
    }
}

/// Secondary per-note or per-onset arrays returned next to the features.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExtraArray {
    Flags(Vec<bool>),
    Values(Vec<f64>),
    Labels(Vec<Option<String>>),
    NamedFlags(BTreeMap<String, Vec<bool>>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureOutput {
    pub features: FeatureTable,
    pub extras: BTreeMap<String, ExtraArray>,
}

impl FeatureOutput {
    pub fn new(features: FeatureTable) -> Self {
        Self {
            features,
            extras: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, name: impl Into<String>, extra: ExtraArray) -> Self {
        self.extras.insert(name.into(), extra);
        self
    }
}

// ── Registry ───────────────────────────────────────────────────────────

pub type FeatureFn = fn(&MatchedScore, &Performance, &FeatureOptions) -> FeatureOutput;

/// A named feature extractor. Column names in the combined table are
/// prefixed with `name`.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor {
    pub name: &'static str,
    pub description: &'static str,
    pub func: FeatureFn,
}

/// Built-in extractors in alphabetical order.
pub static EXTRACTORS: &[FeatureExtractor] = &[
    FeatureExtractor {
        name: "articulation_feature",
        description: "Key overlap ratio and time between consecutive notes of the lowest voice",
        func: articulation::articulation_feature,
    },
    FeatureExtractor {
        name: "asynchrony_feature",
        description: "Onset spread, voice drift and pitch/velocity correlations within chords",
        func: asynchrony::asynchrony_feature,
    },
    FeatureExtractor {
        name: "dynamics_feature",
        description: "Agreement of played velocity with notated dynamics and tempo",
        func: dynamics::dynamics_feature,
    },
    FeatureExtractor {
        name: "pedal_feature",
        description: "Sustain pedal level at note boundaries and distance to releases",
        func: pedal::pedal_feature,
    },
    FeatureExtractor {
        name: "phrasing_feature",
        description: "Rubato model fit of the final ritardando",
        func: phrasing::phrasing_feature,
    },
];

/// Names of the built-in extractors.
pub fn list_performance_feature_functions() -> Vec<&'static str> {
    EXTRACTORS.iter().map(|e| e.name).collect()
}

/// Look up a built-in extractor by full name, or without the `_feature`
/// suffix.
pub fn find_extractor(name: &str) -> Option<&'static FeatureExtractor> {
    EXTRACTORS
        .iter()
        .find(|e| e.name == name || e.name.strip_suffix("_feature") == Some(name))
}

/// An extractor named by string, or given directly.
#[derive(Debug, Clone)]
pub enum FeatureSpec {
    Name(String),
    Extractor(FeatureExtractor),
}

#[derive(Debug, Clone, Default)]
pub enum FeatureRequest {
    #[default]
    All,
    List(Vec<FeatureSpec>),
}

impl FeatureRequest {
    /// `"all"`, or a comma separated list of extractor names.
    pub fn from_names(names: &str) -> Self {
        if names.trim() == "all" {
            return FeatureRequest::All;
        }
        FeatureRequest::List(
            names
                .split(',')
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(|n| FeatureSpec::Name(n.to_string()))
                .collect(),
        )
    }

    /// Extractors in request order. An extractor named twice runs once.
    pub fn resolve(&self) -> Result<Vec<FeatureExtractor>, AnalyzeError> {
        let specs = match self {
            FeatureRequest::All => return Ok(EXTRACTORS.to_vec()),
            FeatureRequest::List(specs) => specs,
        };
        let mut resolved: Vec<FeatureExtractor> = Vec::with_capacity(specs.len());
        for spec in specs {
            let extractor = match spec {
                FeatureSpec::Name(name) => find_extractor(name)
                    .copied()
                    .ok_or_else(|| AnalyzeError::UnknownFeature(name.clone()))?,
                FeatureSpec::Extractor(e) => *e,
            };
            if resolved.iter().any(|r| r.name == extractor.name) {
                log::debug!("{} requested more than once", extractor.name);
                continue;
            }
            resolved.push(extractor);
        }
        Ok(resolved)
    }
}

// ── Orchestration ──────────────────────────────────────────────────────

/// Matched note array plus every requested feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceFeatures {
    pub matched: MatchedScore,
    /// Extractor columns, named `<extractor>.<column>`.
    pub features: FeatureTable,
    pub extras: BTreeMap<String, ExtraArray>,
}

impl PerformanceFeatures {
    /// Matched note columns followed by the feature columns.
    pub fn table(&self) -> FeatureTable {
        let notes = &self.matched.notes;
        let mut table = FeatureTable::new(notes.len());
        let col = |f: fn(&matched::MatchedNote) -> f64| notes.iter().map(f).collect::<Vec<f64>>();
        table.push("onset", col(|n| n.onset));
        table.push("duration", col(|n| n.duration));
        table.push("pitch", col(|n| n.pitch as f64));
        table.push("voice", col(|n| n.voice as f64));
        table.push("p_onset", col(|n| n.p_onset));
        table.push("p_duration", col(|n| n.p_duration));
        table.push("velocity", col(|n| n.velocity as f64));
        table.push("beat_period", col(|n| n.beat_period));
        for name in &self.matched.marking_names {
            table.push(name.clone(), notes.iter().map(|n| n.marking(name)).collect());
        }
        for (name, values) in self.features.columns() {
            table.push(name.clone(), values.clone());
        }
        table
    }
}

fn validate(extractor: &FeatureExtractor, output: &FeatureOutput, expected: usize) -> Result<(), AnalyzeError> {
    let table = &output.features;
    if table.is_empty() {
        return Ok(());
    }
    for (_, values) in table.columns() {
        if values.len() != expected {
            return Err(AnalyzeError::RowCount {
                extractor: extractor.name.to_string(),
                found: values.len(),
                expected,
            });
        }
    }
    let bad: Vec<String> = table
        .columns()
        .iter()
        .filter(|(_, v)| v.iter().any(|x| !x.is_finite()))
        .map(|(n, _)| n.clone())
        .collect();
    if !bad.is_empty() {
        return Err(AnalyzeError::NonFinite {
            extractor: extractor.name.to_string(),
            columns: bad,
        });
    }
    Ok(())
}

/// Join score and performance through `alignment` and run the requested
/// extractors over the matched notes.
pub fn compute_performance_features(
    score: &Score,
    performance: &Performance,
    alignment: &[Alignment],
    request: &FeatureRequest,
    options: &FeatureOptions,
) -> Result<PerformanceFeatures, AnalyzeError> {
    let extractors = request.resolve()?;
    let matched = MatchedScore::build(score, performance, alignment);
    log::info!(
        "Matched {} of {} score notes ({} onsets)",
        matched.len(),
        score.notes.len(),
        matched.groups.len()
    );

    let mut features = FeatureTable::new(matched.len());
    let mut extras = BTreeMap::new();

    for extractor in &extractors {
        let started = Instant::now();
        let output = (extractor.func)(&matched, performance, options);
        validate(extractor, &output, matched.len())?;
        log::debug!(
            "{}: {} columns in {:.1?}",
            extractor.name,
            output.features.columns().len(),
            started.elapsed()
        );

        for (name, values) in output.features.columns {
            features.push(format!("{}.{name}", extractor.name), values);
        }
        for (name, extra) in output.extras {
            if extras.contains_key(&name) {
                log::warn!("{}: extra '{name}' replaces an earlier one", extractor.name);
            }
            extras.insert(name, extra);
        }
    }

    Ok(PerformanceFeatures {
        matched,
        features,
        extras,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::alignment_from_matchfile;
    use crate::analyzer::matched::tests::row;
    use crate::config::ClockConfig;
    use crate::matchfile::tests::SAMPLE;
    use crate::matchfile::MatchFile;

    fn sample() -> (Score, Performance, Vec<Alignment>) {
        let mf = MatchFile::parse(SAMPLE).unwrap();
        (
            Score::from_matchfile(&mf),
            Performance::from_matchfile(&mf, &ClockConfig::default()),
            alignment_from_matchfile(&mf),
        )
    }

    #[test]
    fn test_registry_is_sorted() {
        let names = list_performance_feature_functions();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert_eq!(names.len(), 5);
        assert!(find_extractor("pedal").is_some());
        assert!(find_extractor("pedal_feature").is_some());
    }

    #[test]
    fn test_all_features_are_finite() {
        let (score, perf, alignment) = sample();
        let result = compute_performance_features(
            &score,
            &perf,
            &alignment,
            &FeatureRequest::All,
            &FeatureOptions::default(),
        )
        .unwrap();
        assert_eq!(result.matched.len(), 3);
        assert_eq!(result.features.n_rows(), 3);
        for (name, values) in result.features.columns() {
            assert_eq!(values.len(), 3, "{name}");
            assert!(values.iter().all(|v| v.is_finite()), "{name}");
        }
        assert!(result.features.column("asynchrony_feature.delta").is_some());
        assert!(result.features.column("articulation_feature.kor").is_some());
        assert!(result.extras.contains_key("no_cor_mask"));

        let table = result.table();
        assert_eq!(table.column("pitch").unwrap(), &[60.0, 64.0, 65.0]);
        assert!(table.column("pedal_feature.onset_value").is_some());
    }

    #[test]
    fn test_unknown_feature_is_rejected() {
        let (score, perf, alignment) = sample();
        let err = compute_performance_features(
            &score,
            &perf,
            &alignment,
            &FeatureRequest::from_names("asynchrony_feature,tempo_feature"),
            &FeatureOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, AnalyzeError::UnknownFeature(ref n) if n == "tempo_feature"));
    }

    fn short_feature(m: &MatchedScore, _: &Performance, _: &FeatureOptions) -> FeatureOutput {
        let mut table = FeatureTable::new(m.len());
        table.push("x", vec![0.0; m.len().saturating_sub(1)]);
        FeatureOutput::new(table)
    }

    fn nan_feature(m: &MatchedScore, _: &Performance, _: &FeatureOptions) -> FeatureOutput {
        let mut table = FeatureTable::new(m.len());
        table.push("ok", vec![0.0; m.len()]);
        table.push("bad", vec![f64::NAN; m.len()]);
        FeatureOutput::new(table)
    }

    #[test]
    fn test_custom_extractors_are_validated() {
        let (score, perf, alignment) = sample();
        let run = |func: FeatureFn| {
            let request = FeatureRequest::List(vec![FeatureSpec::Extractor(FeatureExtractor {
                name: "custom_feature",
                description: "test",
                func,
            })]);
            compute_performance_features(&score, &perf, &alignment, &request, &FeatureOptions::default())
        };

        let err = run(short_feature).unwrap_err();
        assert!(matches!(err, AnalyzeError::RowCount { found: 2, expected: 3, .. }));

        let err = run(nan_feature).unwrap_err();
        assert!(err.to_string().contains("custom_feature"));
        assert!(matches!(err, AnalyzeError::NonFinite { ref columns, .. } if columns == &["bad"]));
    }

    #[test]
    fn test_repeated_names_run_once() {
        let extractors = FeatureRequest::from_names("asynchrony,asynchrony_feature,pedal")
            .resolve()
            .unwrap();
        let names: Vec<&str> = extractors.iter().map(|e| e.name).collect();
        assert_eq!(names, ["asynchrony_feature", "pedal_feature"]);

        let (score, perf, alignment) = sample();
        let result = compute_performance_features(
            &score,
            &perf,
            &alignment,
            &FeatureRequest::from_names("asynchrony,asynchrony"),
            &FeatureOptions::default(),
        )
        .unwrap();
        assert_eq!(result.features.column_names().len(), 5);
    }

    /// Small deterministic generator for synthetic matched scores.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            self.0 >> 33
        }

        fn below(&mut self, n: u64) -> u64 {
            self.next() % n
        }

        fn unit(&mut self) -> f64 {
            self.below(1_000_000) as f64 / 1_000_000.0
        }
    }

    fn synthetic(rng: &mut Lcg, shape: u64) -> (MatchedScore, Performance) {
        let n = if shape == 0 { 1 } else { 1 + rng.below(12) as usize };
        let dynamics = ["pp", "p", "mf", "f", "ff"];
        let mut onset = 0.0;
        let mut p_onset = 0.0;
        let mut notes = Vec::with_capacity(n);
        for k in 0..n {
            // repeated onsets: chords of up to three notes
            if k > 0 && rng.below(3) != 0 {
                onset += [0.25, 0.5, 1.0][rng.below(3) as usize];
            }
            let duration = if shape == 1 { 0.0 } else { [0.25, 0.5, 1.0][rng.below(3) as usize] };
            p_onset = match shape {
                2 => 1.0,
                3 => p_onset - rng.unit(),
                _ => p_onset + rng.unit(),
            };
            let p_duration = if shape == 1 { 0.0 } else { rng.unit() };
            let pitch = 36 + rng.below(48) as i32;
            let velocity = 1 + rng.below(126) as i32;
            let mut note = row(&k.to_string(), onset, duration, pitch, p_onset, p_duration, velocity);
            if shape == 4 {
                note.voice = 1 + rng.below(3) as i32;
            }
            if rng.below(3) == 0 {
                let marking = dynamics[rng.below(dynamics.len() as u64) as usize];
                note.markings.insert(format!("{}.{marking}", crate::score::LOUDNESS_DIRECTION), 1.0);
            }
            if rng.below(2) == 0 {
                note.markings.insert(crate::score::LOUDNESS_INCR.into(), rng.unit());
            }
            if rng.below(4) == 0 {
                note.markings.insert("articulation.staccato".into(), 1.0);
            }
            notes.push(note);
        }

        let mut time = 0.0;
        let controls = (0..rng.below(6))
            .map(|_| {
                time += rng.unit();
                crate::performance::ControlChange {
                    time,
                    number: crate::performance::SUSTAIN_PEDAL,
                    value: rng.below(128) as i32,
                    track: 0,
                    channel: 0,
                }
            })
            .collect();
        (MatchedScore::from_notes(notes), Performance::new("synthetic", Vec::new(), controls))
    }

    #[test]
    fn test_every_extractor_is_finite_on_generated_scores() {
        let mut rng = Lcg(7);
        for case in 0..500 {
            let (matched, perf) = synthetic(&mut rng, case % 5);
            for mask in [false, true] {
                let options = FeatureOptions {
                    articulation_mask: mask,
                    aggregation: if case % 2 == 0 { Aggregation::Mean } else { Aggregation::Max },
                    ..Default::default()
                };
                for extractor in EXTRACTORS {
                    let output = (extractor.func)(&matched, &perf, &options);
                    if let Err(err) = validate(extractor, &output, matched.len()) {
                        panic!("case {case}: {err}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_from_names() {
        assert!(matches!(FeatureRequest::from_names("all"), FeatureRequest::All));
        let FeatureRequest::List(specs) = FeatureRequest::from_names("pedal_feature, phrasing_feature") else {
            panic!("expected a list");
        };
        assert_eq!(specs.len(), 2);
    }
}
