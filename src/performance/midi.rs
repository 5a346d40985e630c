//! MIDI import: performances (note on/off pairing in seconds) and metrical
//! score note arrays with track/channel based part and voice assignment.

use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;

use super::{ControlChange, Performance, PerformedNote};
use crate::score::{Score, ScoreNote};

#[derive(Error, Debug)]
pub enum MidiError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("MIDI decode error: {0}")]
    Decode(#[from] midly::Error),
    #[error("part_voice_assign_mode must be between 0 and 5, got {0}")]
    InvalidMode(i64),
}

/// Ticks per quarter assumed for SMPTE-timed files.
const FALLBACK_PPQ: u16 = 480;

/// Sounding notes are keyed by channel and pitch.
fn note_hash(channel: u8, pitch: u8) -> u16 {
    channel as u16 * 128 + pitch as u16
}

fn ticks_per_quarter(smf: &Smf<'_>) -> u16 {
    match smf.header.timing {
        Timing::Metrical(t) => t.as_int(),
        Timing::Timecode(..) => {
            log::warn!("SMPTE timing is not supported, assuming {FALLBACK_PPQ} ticks per quarter");
            FALLBACK_PPQ
        }
    }
}

/// Events of one track with absolute tick positions.
fn absolute_events<'a>(track: &[TrackEvent<'a>]) -> Vec<(u64, TrackEventKind<'a>)> {
    let mut tick = 0u64;
    track
        .iter()
        .map(|event| {
            tick += event.delta.as_int() as u64;
            (tick, event.kind)
        })
        .collect()
}

/// All tracks as one stream, ordered by tick (stable in track order).
fn merged_events<'a>(smf: &Smf<'a>) -> Vec<(u64, TrackEventKind<'a>)> {
    let mut events: Vec<(u64, TrackEventKind<'a>)> = smf
        .tracks
        .iter()
        .flat_map(|track| absolute_events(track))
        .collect();
    events.sort_by_key(|(tick, _)| *tick);
    events
}

// ── Tempo ─────────────────────────────────────────────────────────────

/// Piecewise-constant tempo over ticks.
#[derive(Debug, Clone)]
struct TempoMap {
    ppq: f64,
    /// (tick, seconds at tick, microseconds per quarter from tick on)
    segments: Vec<(u64, f64, f64)>,
}

impl TempoMap {
    fn new(ppq: u16, default_bpm: f64, mut changes: Vec<(u64, u32)>) -> Self {
        let ppq = ppq as f64;
        let mut segments = vec![(0u64, 0.0, 60.0 * 1e6 / default_bpm)];
        changes.sort_by_key(|(tick, _)| *tick);
        for (tick, mpq) in changes {
            let (t0, s0, m0) = segments[segments.len() - 1];
            let seconds = s0 + (tick - t0) as f64 * m0 / (ppq * 1e6);
            if tick == t0 {
                segments.pop();
            }
            segments.push((tick, seconds, mpq as f64));
        }
        Self { ppq, segments }
    }

    fn seconds(&self, tick: u64) -> f64 {
        let (t0, s0, mpq) = self
            .segments
            .iter()
            .rev()
            .find(|(t, _, _)| *t <= tick)
            .copied()
            .unwrap_or((0, 0.0, 500_000.0));
        s0 + (tick - t0) as f64 * mpq / (self.ppq * 1e6)
    }
}

fn tempo_changes(events: &[(u64, TrackEventKind<'_>)]) -> Vec<(u64, u32)> {
    events
        .iter()
        .filter_map(|(tick, kind)| match kind {
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => Some((*tick, t.as_int())),
            _ => None,
        })
        .collect()
}

// ── Performances ──────────────────────────────────────────────────────

/// Load a performance from a MIDI file.
///
/// Every note on (velocity > 0) is paired with the next note off (or note on
/// with velocity 0) of the same channel and pitch; note offs without a
/// sounding note are logged and dropped. Times are converted to seconds with
/// the file's tempo events, `default_bpm` applying before the first one.
pub fn load_performance_midi(path: &Path, default_bpm: f64, merge_tracks: bool) -> Result<Performance, MidiError> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    performance_from_midi_bytes(&bytes, &name, default_bpm, merge_tracks)
}

pub fn performance_from_midi_bytes(
    bytes: &[u8],
    name: &str,
    default_bpm: f64,
    merge_tracks: bool,
) -> Result<Performance, MidiError> {
    let smf = Smf::parse(bytes)?;
    let ppq = ticks_per_quarter(&smf);

    let streams: Vec<(usize, Vec<(u64, TrackEventKind<'_>)>)> = if merge_tracks {
        vec![(0, merged_events(&smf))]
    } else {
        smf.tracks
            .iter()
            .enumerate()
            .map(|(i, track)| (i, absolute_events(track)))
            .collect()
    };

    // In multi-track files the tempo map lives in its own track and governs all.
    let global_tempo = (smf.header.format == Format::Parallel && !merge_tracks)
        .then(|| TempoMap::new(ppq, default_bpm, tempo_changes(&merged_events(&smf))));

    let mut notes = Vec::new();
    let mut controls = Vec::new();

    for (track, events) in &streams {
        let tempo = global_tempo
            .clone()
            .unwrap_or_else(|| TempoMap::new(ppq, default_bpm, tempo_changes(events)));
        let track = *track as i32;
        let mut sounding: HashMap<u16, (f64, u8)> = HashMap::new();

        for (tick, kind) in events {
            let TrackEventKind::Midi { channel, message } = kind else {
                continue;
            };
            let t = tempo.seconds(*tick);
            let channel = channel.as_int();

            match *message {
                MidiMessage::Controller { controller, value } => controls.push(ControlChange {
                    time: t,
                    number: controller.as_int(),
                    value: value.as_int() as i32,
                    track,
                    channel: channel as i32,
                }),
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    sounding.insert(note_hash(channel, key.as_int()), (t, vel.as_int()));
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    let Some((onset, velocity)) = sounding.remove(&note_hash(channel, key.as_int())) else {
                        log::warn!(
                            "Ignoring note off without note on: track {track}, channel {channel}, pitch {} at tick {tick}",
                            key.as_int()
                        );
                        continue;
                    };
                    notes.push(PerformedNote {
                        id: String::new(),
                        pitch: key.as_int() as i32,
                        onset_sec: onset,
                        duration_sec: t - onset,
                        velocity: velocity as i32,
                        track,
                        channel: channel as i32,
                    });
                }
                _ => {}
            }
        }

        if !sounding.is_empty() {
            log::warn!("{} notes still sounding at the end of track {track}", sounding.len());
        }
    }

    notes.sort_by(|a, b| {
        a.onset_sec
            .total_cmp(&b.onset_sec)
            .then(a.pitch.cmp(&b.pitch))
            .then(a.offset_sec().total_cmp(&b.offset_sec()))
            .then(a.channel.cmp(&b.channel))
            .then(a.track.cmp(&b.track))
    });
    for (k, note) in notes.iter_mut().enumerate() {
        note.id = format!("n{k}");
    }
    controls.sort_by(|a, b| a.time.total_cmp(&b.time));

    log::debug!("Loaded {} notes and {} control changes from {name}", notes.len(), controls.len());
    Ok(Performance::new(name, notes, controls))
}

// ── Quantization ──────────────────────────────────────────────────────

/// Quantization unit. The result has the unit's type.
pub trait QuantizeUnit: Copy {
    fn quantize(value: f64, unit: Self) -> Self;
}

impl QuantizeUnit for i64 {
    fn quantize(value: f64, unit: Self) -> Self {
        let unit_f = unit as f64;
        (unit_f * (value / unit_f).round_ties_even()) as i64
    }
}

impl QuantizeUnit for f64 {
    fn quantize(value: f64, unit: Self) -> Self {
        unit * (value / unit).round_ties_even()
    }
}

/// Round `value` to the nearest multiple of `unit` (ties to even multiples).
pub fn quantize<U: QuantizeUnit>(value: f64, unit: U) -> U {
    U::quantize(value, unit)
}

// ── Score MIDI: part and voice assignment ─────────────────────────────

/// How tracks and channels of a score MIDI file map to parts and voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PartVoiceMode {
    /// 0: one part per track, voices by channel.
    PartPerTrackVoicePerChannel,
    /// 1: one part group per track, parts by channel (no voices).
    PartPerChannel,
    /// 2: a single part, voices by track (channels ignored).
    SinglePartVoicePerTrack,
    /// 3: one part per track, no voices (channels ignored).
    PartPerTrack,
    /// 4: a single part without voices.
    SinglePart,
    /// 5: one part per (track, channel) combination, no voices.
    PartPerTrackChannel,
}

impl TryFrom<i64> for PartVoiceMode {
    type Error = MidiError;

    fn try_from(mode: i64) -> Result<Self, Self::Error> {
        match mode {
            0 => Ok(Self::PartPerTrackVoicePerChannel),
            1 => Ok(Self::PartPerChannel),
            2 => Ok(Self::SinglePartVoicePerTrack),
            3 => Ok(Self::PartPerTrack),
            4 => Ok(Self::SinglePart),
            5 => Ok(Self::PartPerTrackChannel),
            other => Err(MidiError::InvalidMode(other)),
        }
    }
}

/// Part group, part and voice of one (track, channel) combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GroupPartVoice {
    pub group: Option<usize>,
    pub part: Option<usize>,
    pub voice: Option<usize>,
}

fn track_label(track_names: &HashMap<usize, String>, track: usize) -> String {
    track_names
        .get(&track)
        .cloned()
        .unwrap_or_else(|| format!("Track {}", track + 1))
}

/// Assign group, part and voice numbers to sorted (track, channel) pairs.
/// Parts and groups count from 0 in order of first appearance; voices from 1.
pub fn assign_group_part_voice(
    mode: PartVoiceMode,
    track_channels: &[(usize, u8)],
    track_names: &HashMap<usize, String>,
) -> (Vec<GroupPartVoice>, BTreeMap<usize, String>) {
    let mut part_of_track: HashMap<usize, usize> = HashMap::new();
    let mut part_of_channel: HashMap<u8, usize> = HashMap::new();
    let mut group_of_track: HashMap<usize, usize> = HashMap::new();
    let mut voices_of_track: HashMap<usize, HashMap<u8, usize>> = HashMap::new();
    let mut voice_of_track: HashMap<usize, usize> = HashMap::new();
    let mut part_names = BTreeMap::new();
    let mut assigned = Vec::with_capacity(track_channels.len());

    for (i, &(tr, ch)) in track_channels.iter().enumerate() {
        let mut gpv = GroupPartVoice::default();
        match mode {
            PartVoiceMode::PartPerTrackVoicePerChannel => {
                let n = part_of_track.len();
                let part = *part_of_track.entry(tr).or_insert(n);
                let voices = voices_of_track.entry(tr).or_default();
                let n = voices.len() + 1;
                gpv.voice = Some(*voices.entry(ch).or_insert(n));
                gpv.part = Some(part);
                part_names.insert(part, track_label(track_names, tr));
            }
            PartVoiceMode::PartPerChannel => {
                let n = group_of_track.len();
                gpv.group = Some(*group_of_track.entry(tr).or_insert(n));
                let n = part_of_channel.len();
                let part = *part_of_channel.entry(ch).or_insert(n);
                gpv.part = Some(part);
                part_names.insert(part, format!("ch={ch}"));
            }
            PartVoiceMode::SinglePartVoicePerTrack => {
                let n = voice_of_track.len() + 1;
                gpv.voice = Some(*voice_of_track.entry(tr).or_insert(n));
                gpv.part = Some(0);
            }
            PartVoiceMode::PartPerTrack => {
                let n = part_of_track.len();
                let part = *part_of_track.entry(tr).or_insert(n);
                gpv.part = Some(part);
                part_names.insert(part, track_label(track_names, tr));
            }
            PartVoiceMode::SinglePart => gpv.part = Some(0),
            PartVoiceMode::PartPerTrackChannel => {
                // Input pairs are unique, so the running index is the part.
                gpv.part = Some(i);
                part_names.insert(i, format!("{} ch={ch}", track_label(track_names, tr)));
            }
        }
        assigned.push(gpv);
    }

    (assigned, part_names)
}

/// A metrical note from a score MIDI file, times in ticks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MidiScoreNote {
    pub onset_div: i64,
    pub duration_div: i64,
    pub pitch: u8,
    pub track: usize,
    pub channel: u8,
    pub part: usize,
    pub voice: usize,
    pub ts_beats: u8,
    pub ts_beat_type: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MidiPart {
    pub name: Option<String>,
    pub notes: Vec<MidiScoreNote>,
}

/// Note arrays of a score MIDI file, one per part.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MidiScore {
    pub id: String,
    /// Ticks per quarter note.
    pub divs: u16,
    pub parts: Vec<MidiPart>,
}

impl MidiScore {
    /// Flatten into a score note array, onsets in quarter notes.
    /// Note ids are `P<part>_n<k>` in (onset, pitch) order within a part.
    pub fn to_score(&self) -> Score {
        let divs = self.divs.max(1) as f64;
        let mut notes = Vec::new();
        for (pi, part) in self.parts.iter().enumerate() {
            let mut sorted: Vec<&MidiScoreNote> = part.notes.iter().collect();
            sorted.sort_by_key(|n| (n.onset_div, n.pitch));
            for (k, n) in sorted.into_iter().enumerate() {
                notes.push(ScoreNote::new(
                    format!("P{:02}_n{k}", pi + 1),
                    n.onset_div as f64 / divs,
                    n.duration_div as f64 / divs,
                    n.pitch as i32,
                    n.voice as i32,
                ));
            }
        }
        Score::new(notes)
    }
}

pub fn load_score_midi(
    path: &Path,
    mode: PartVoiceMode,
    quantization_unit: Option<i64>,
) -> Result<MidiScore, MidiError> {
    let bytes = std::fs::read(path)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    score_from_midi_bytes(&bytes, &name, mode, quantization_unit)
}

/// (onset, pitch, duration) in ticks
type RawNote = (i64, u8, i64);

/// Time signatures (tick, numerator, denominator) of one track.
type TimeSigs = Vec<(i64, u8, u32)>;

fn time_signature_at(sigs: &TimeSigs, onset: i64) -> Option<(u8, u32)> {
    sigs.iter()
        .rev()
        .find(|(t, _, _)| *t <= onset)
        .map(|(_, n, d)| (*n, *d))
}

/// Read a metrical score from MIDI bytes. Tracks without notes contribute
/// their time signatures to every track; otherwise a track's own signatures
/// apply, and 4/4 is assumed before the first.
pub fn score_from_midi_bytes(
    bytes: &[u8],
    name: &str,
    mode: PartVoiceMode,
    quantization_unit: Option<i64>,
) -> Result<MidiScore, MidiError> {
    let smf = Smf::parse(bytes)?;
    let divs = ticks_per_quarter(&smf);

    let mut global_time_sigs: TimeSigs = Vec::new();
    let mut time_sigs_by_track: HashMap<usize, TimeSigs> = HashMap::new();
    let mut track_names: HashMap<usize, String> = HashMap::new();
    let mut notes_by_track_ch: BTreeMap<(usize, u8), Vec<RawNote>> = BTreeMap::new();

    for (track_nr, track) in smf.tracks.iter().enumerate() {
        let mut time_sigs = Vec::new();
        let mut notes: BTreeMap<u8, Vec<RawNote>> = BTreeMap::new();
        let mut sounding: HashMap<u16, i64> = HashMap::new();
        let mut track_name = None;

        for (tick, kind) in absolute_events(track) {
            let t = match quantization_unit {
                Some(unit) if unit > 0 => quantize(tick as f64, unit),
                _ => tick as i64,
            };
            match kind {
                TrackEventKind::Meta(MetaMessage::TimeSignature(num, den_pow, _, _)) => {
                    time_sigs.push((t, num, 1u32 << den_pow.min(31)));
                }
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) => {
                    track_name = Some(String::from_utf8_lossy(raw).into_owned());
                }
                TrackEventKind::Midi { channel, message } => {
                    let channel = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            sounding.insert(note_hash(channel, key.as_int()), t);
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            match sounding.remove(&note_hash(channel, key.as_int())) {
                                Some(onset) => notes
                                    .entry(channel)
                                    .or_default()
                                    .push((onset, key.as_int(), t - onset)),
                                None => log::warn!(
                                    "Ignoring note off without note on: track {track_nr}, channel {channel}, pitch {}",
                                    key.as_int()
                                ),
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        if notes.is_empty() {
            global_time_sigs.extend(time_sigs);
        } else {
            time_sigs_by_track.insert(track_nr, time_sigs);
            if let Some(n) = track_name {
                track_names.insert(track_nr, n);
            }
        }
        for (ch, ch_notes) in notes {
            notes_by_track_ch.insert((track_nr, ch), ch_notes);
        }
    }
    global_time_sigs.sort_by_key(|(t, _, _)| *t);

    let track_channels: Vec<(usize, u8)> = notes_by_track_ch.keys().copied().collect();
    let (assigned, part_names) = assign_group_part_voice(mode, &track_channels, &track_names);

    // Grouping of the final note arrays. Mode 0 overrides voices with the
    // channel and mode 2 with the track, as the grouping key takes over.
    let mut groups: BTreeMap<(i64, i64), MidiPart> = BTreeMap::new();
    for (&(track, channel), gpv) in track_channels.iter().zip(&assigned) {
        let part = gpv.part.unwrap_or(0);
        let (key, voice, part_name) = match mode {
            PartVoiceMode::PartPerTrackVoicePerChannel => {
                ((track as i64, 0), channel as usize, part_names.get(&part).cloned())
            }
            PartVoiceMode::PartPerChannel => {
                ((channel as i64, 0), gpv.voice.unwrap_or(0), part_names.get(&part).cloned())
            }
            PartVoiceMode::SinglePartVoicePerTrack => ((0, 0), track, None),
            PartVoiceMode::PartPerTrack => ((track as i64, 0), 0, part_names.get(&part).cloned()),
            PartVoiceMode::SinglePart => ((0, 0), gpv.voice.unwrap_or(0), None),
            PartVoiceMode::PartPerTrackChannel => (
                (track as i64, channel as i64),
                0,
                part_names.get(&part).cloned(),
            ),
        };

        let sigs = time_sigs_by_track
            .get(&track)
            .filter(|s| !s.is_empty())
            .unwrap_or(&global_time_sigs);
        let entry = groups.entry(key).or_insert_with(|| MidiPart {
            name: part_name,
            notes: Vec::new(),
        });
        for &(onset, pitch, duration) in notes_by_track_ch.get(&(track, channel)).into_iter().flatten() {
            let (ts_beats, ts_beat_type) = time_signature_at(sigs, onset).unwrap_or((4, 4));
            entry.notes.push(MidiScoreNote {
                onset_div: onset,
                duration_div: duration,
                pitch,
                track,
                channel,
                part,
                voice,
                ts_beats,
                ts_beat_type,
            });
        }
    }

    Ok(MidiScore {
        id: name.to_string(),
        divs,
        parts: groups.into_values().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vlq(mut value: u32) -> Vec<u8> {
        let mut bytes = vec![(value & 0x7F) as u8];
        value >>= 7;
        while value > 0 {
            bytes.insert(0, ((value & 0x7F) as u8) | 0x80);
            value >>= 7;
        }
        bytes
    }

    fn ev(delta: u32, data: &[u8]) -> Vec<u8> {
        let mut out = vlq(delta);
        out.extend_from_slice(data);
        out
    }

    fn smf(format: u16, ppq: u16, tracks: &[Vec<u8>]) -> Vec<u8> {
        let mut out = b"MThd".to_vec();
        out.extend(6u32.to_be_bytes());
        out.extend(format.to_be_bytes());
        out.extend((tracks.len() as u16).to_be_bytes());
        out.extend(ppq.to_be_bytes());
        for track in tracks {
            let mut data = track.clone();
            data.extend([0x00, 0xFF, 0x2F, 0x00]);
            out.extend(b"MTrk");
            out.extend((data.len() as u32).to_be_bytes());
            out.extend(data);
        }
        out
    }

    fn single_track() -> Vec<u8> {
        [
            ev(0, &[0x90, 60, 80]),
            ev(240, &[0xB0, 64, 127]),
            ev(240, &[0x80, 60, 0]),
            ev(0, &[0x80, 62, 0]), // unpaired
            ev(0, &[0x90, 64, 70]),
            ev(480, &[0x90, 64, 0]),
        ]
        .concat()
    }

    #[test]
    fn test_performance_default_tempo() {
        let bytes = smf(0, 480, &[single_track()]);
        let perf = performance_from_midi_bytes(&bytes, "take", 120.0, false).unwrap();
        assert_eq!(perf.id, "take");
        assert_eq!(perf.notes.len(), 2);

        let first = &perf.notes[0];
        assert_eq!(first.id, "n0");
        assert_eq!(first.pitch, 60);
        assert_eq!(first.velocity, 80);
        assert!((first.onset_sec - 0.0).abs() < 1e-12);
        assert!((first.duration_sec - 0.5).abs() < 1e-12);

        let second = &perf.notes[1];
        assert_eq!(second.id, "n1");
        assert!((second.onset_sec - 0.5).abs() < 1e-12);
        assert!((second.duration_sec - 0.5).abs() < 1e-12);

        assert_eq!(perf.controls.len(), 1);
        assert_eq!(perf.controls[0].number, 64);
        assert!((perf.controls[0].time - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_performance_tempo_change() {
        // 1,000,000 us per quarter = 60 bpm
        let track = [
            ev(0, &[0xFF, 0x51, 0x03, 0x0F, 0x42, 0x40]),
            ev(0, &[0x90, 67, 90]),
            ev(480, &[0x80, 67, 0]),
        ]
        .concat();
        let perf = performance_from_midi_bytes(&smf(0, 480, &[track]), "t", 120.0, false).unwrap();
        assert!((perf.notes[0].duration_sec - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_parallel_file_uses_global_tempo_track() {
        let tempo = ev(0, &[0xFF, 0x51, 0x03, 0x0F, 0x42, 0x40]);
        let notes = [ev(480, &[0x91, 50, 40]), ev(480, &[0x81, 50, 0])].concat();
        let perf = performance_from_midi_bytes(&smf(1, 480, &[tempo, notes]), "t", 120.0, false).unwrap();
        let n = &perf.notes[0];
        assert_eq!(n.track, 1);
        assert_eq!(n.channel, 1);
        assert!((n.onset_sec - 1.0).abs() < 1e-12);
        assert!((n.duration_sec - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_merge_tracks_reports_track_zero() {
        let a = [ev(0, &[0x90, 60, 80]), ev(480, &[0x80, 60, 0])].concat();
        let b = [ev(0, &[0x91, 48, 80]), ev(480, &[0x81, 48, 0])].concat();
        let perf = performance_from_midi_bytes(&smf(1, 480, &[a, b]), "t", 120.0, true).unwrap();
        assert_eq!(perf.notes.len(), 2);
        assert!(perf.notes.iter().all(|n| n.track == 0));
        // same onset: lower pitch sorts first
        assert_eq!(perf.notes[0].pitch, 48);
        assert_eq!(perf.notes[0].id, "n0");
    }

    #[test]
    fn test_quantize() {
        assert_eq!(quantize(13.3, 4i64), 12);
        assert!((quantize(3.3, 0.5) - 3.5).abs() < 1e-12);
        assert_eq!(quantize(6.0, 4i64), 8); // ties to even multiple
        assert_eq!(quantize(481.0, 240i64), 480);
    }

    #[test]
    fn test_part_voice_mode_from_int() {
        assert_eq!(PartVoiceMode::try_from(0).unwrap(), PartVoiceMode::PartPerTrackVoicePerChannel);
        assert_eq!(PartVoiceMode::try_from(5).unwrap(), PartVoiceMode::PartPerTrackChannel);
        let err = PartVoiceMode::try_from(6).unwrap_err();
        assert!(err.to_string().contains("must be between 0 and 5"));
    }

    #[test]
    fn test_assign_group_part_voice() {
        let combis = [(1usize, 0u8), (1, 3), (2, 0)];
        let names = HashMap::from([(1usize, "Piano".to_string())]);

        let (gpv, parts) = assign_group_part_voice(PartVoiceMode::PartPerTrackVoicePerChannel, &combis, &names);
        let pv: Vec<_> = gpv.iter().map(|g| (g.part, g.voice)).collect();
        assert_eq!(pv, vec![(Some(0), Some(1)), (Some(0), Some(2)), (Some(1), Some(1))]);
        assert_eq!(parts[&0], "Piano");
        assert_eq!(parts[&1], "Track 3");

        let (gpv, parts) = assign_group_part_voice(PartVoiceMode::PartPerChannel, &combis, &names);
        let gp: Vec<_> = gpv.iter().map(|g| (g.group, g.part)).collect();
        assert_eq!(gp, vec![(Some(0), Some(0)), (Some(0), Some(1)), (Some(1), Some(0))]);
        assert_eq!(parts[&1], "ch=3");

        let (gpv, _) = assign_group_part_voice(PartVoiceMode::SinglePartVoicePerTrack, &combis, &names);
        let v: Vec<_> = gpv.iter().map(|g| g.voice).collect();
        assert_eq!(v, vec![Some(1), Some(1), Some(2)]);

        let (gpv, parts) = assign_group_part_voice(PartVoiceMode::PartPerTrackChannel, &combis, &names);
        let p: Vec<_> = gpv.iter().map(|g| g.part).collect();
        assert_eq!(p, vec![Some(0), Some(1), Some(2)]);
        assert_eq!(parts[&1], "Piano ch=3");
    }

    fn two_track_score() -> Vec<u8> {
        let meta = ev(0, &[0xFF, 0x58, 0x04, 3, 2, 24, 8]); // 3/4
        let piano = [
            ev(0, &[0xFF, 0x03, 0x05, b'P', b'i', b'a', b'n', b'o']),
            ev(0, &[0x90, 60, 80]),
            ev(0, &[0x91, 48, 80]),
            ev(241, &[0x80, 60, 0]),
            ev(0, &[0x81, 48, 0]),
        ]
        .concat();
        let violin = [ev(480, &[0x92, 76, 80]), ev(480, &[0x82, 76, 0])].concat();
        smf(1, 480, &[meta, piano, violin])
    }

    #[test]
    fn test_score_modes_group_notes() {
        let bytes = two_track_score();

        let s0 = score_from_midi_bytes(&bytes, "s", PartVoiceMode::PartPerTrackVoicePerChannel, None).unwrap();
        assert_eq!(s0.parts.len(), 2);
        assert_eq!(s0.parts[0].name.as_deref(), Some("Piano"));
        let voices: Vec<usize> = s0.parts[0].notes.iter().map(|n| n.voice).collect();
        assert_eq!(voices, vec![0, 1]);
        assert_eq!(s0.parts[0].notes[0].ts_beats, 3);

        let s4 = score_from_midi_bytes(&bytes, "s", PartVoiceMode::SinglePart, None).unwrap();
        assert_eq!(s4.parts.len(), 1);
        assert_eq!(s4.parts[0].notes.len(), 3);

        let s5 = score_from_midi_bytes(&bytes, "s", PartVoiceMode::PartPerTrackChannel, None).unwrap();
        assert_eq!(s5.parts.len(), 3);
        assert_eq!(s5.parts[2].name.as_deref(), Some("Track 3 ch=2"));

        let s2 = score_from_midi_bytes(&bytes, "s", PartVoiceMode::SinglePartVoicePerTrack, None).unwrap();
        let voices: Vec<usize> = s2.parts[0].notes.iter().map(|n| n.voice).collect();
        assert_eq!(voices, vec![1, 1, 2]);
    }

    #[test]
    fn test_score_quantization_and_flattening() {
        let bytes = two_track_score();
        let midi_score = score_from_midi_bytes(&bytes, "s", PartVoiceMode::PartPerTrack, Some(240)).unwrap();
        let durations: Vec<i64> = midi_score.parts[0].notes.iter().map(|n| n.duration_div).collect();
        assert_eq!(durations, vec![240, 240]);

        let score = midi_score.to_score();
        assert_eq!(score.notes.len(), 3);
        assert_eq!(score.notes[0].id, "P01_n0");
        assert_eq!(score.notes[0].pitch, 48);
        assert!((score.notes[0].duration_beat - 0.5).abs() < 1e-12);
        assert!((score.notes[2].onset_beat - 1.0).abs() < 1e-12);
    }
}
