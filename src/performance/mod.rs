pub mod midi;

use serde::Serialize;

use crate::config::ClockConfig;
use crate::matchfile::MatchFile;

/// One sounded note, times in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformedNote {
    pub id: String,
    pub pitch: i32,
    pub onset_sec: f64,
    pub duration_sec: f64,
    pub velocity: i32,
    pub track: i32,
    pub channel: i32,
}

impl PerformedNote {
    pub fn offset_sec(&self) -> f64 {
        self.onset_sec + self.duration_sec
    }
}

/// A MIDI control change, time in seconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlChange {
    pub time: f64,
    pub number: u8,
    pub value: i32,
    pub track: i32,
    pub channel: i32,
}

/// Sustain pedal controller.
pub const SUSTAIN_PEDAL: u8 = 64;
/// Soft pedal controller.
pub const SOFT_PEDAL: u8 = 67;

/// Flat performed note array plus control changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Performance {
    pub id: String,
    pub notes: Vec<PerformedNote>,
    pub controls: Vec<ControlChange>,
}

impl Performance {
    pub fn new(id: impl Into<String>, notes: Vec<PerformedNote>, controls: Vec<ControlChange>) -> Self {
        Self {
            id: id.into(),
            notes,
            controls,
        }
    }

    pub fn find(&self, id: &str) -> Option<&PerformedNote> {
        self.notes.iter().find(|n| n.id == id)
    }

    /// Sustain pedal events in time order.
    pub fn sustain_events(&self) -> Vec<&ControlChange> {
        let mut events: Vec<&ControlChange> = self
            .controls
            .iter()
            .filter(|c| c.number == SUSTAIN_PEDAL)
            .collect();
        events.sort_by(|a, b| a.time.total_cmp(&b.time));
        events
    }

    /// Performed notes and pedal lines of a match file, converted from
    /// ticks to seconds with the file's `midiClockUnits`/`midiClockRate`
    /// (or the given defaults when those lines are missing).
    pub fn from_matchfile(mf: &MatchFile, clock: &ClockConfig) -> Self {
        let units = mf.midi_clock_units().unwrap_or(clock.midi_clock_units);
        let rate = mf.midi_clock_rate().unwrap_or(clock.midi_clock_rate);
        let seconds_per_tick = rate as f64 / (units as f64 * 1e6);

        let notes = mf
            .notes()
            .into_iter()
            .map(|n| PerformedNote {
                id: n.id.clone(),
                pitch: n.midi_pitch,
                onset_sec: n.onset * seconds_per_tick,
                duration_sec: n.duration() * seconds_per_tick,
                velocity: n.velocity,
                track: n.track.unwrap_or(0),
                channel: n.channel.unwrap_or(0),
            })
            .collect();

        let controls = mf
            .lines
            .iter()
            .filter_map(|line| match line {
                crate::matchfile::Line::Pedal(p) => Some(ControlChange {
                    time: p.time as f64 * seconds_per_tick,
                    number: p.kind.controller(),
                    value: p.value,
                    track: 0,
                    channel: 0,
                }),
                _ => None,
            })
            .collect();

        Self {
            id: mf.name.clone(),
            notes,
            controls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchfile::tests::SAMPLE;

    #[test]
    fn test_from_matchfile_converts_ticks() {
        let mf = MatchFile::parse(SAMPLE).unwrap();
        let perf = Performance::from_matchfile(&mf, &ClockConfig::default());
        assert_eq!(perf.notes.len(), 4);

        // 480 ticks per quarter at 500000 us per quarter: 960 ticks = 1 s
        let f = perf.find("3").unwrap();
        assert!((f.onset_sec - 1.0).abs() < 1e-12);
        assert!((f.duration_sec - 340.0 / 960.0).abs() < 1e-12);
        assert_eq!(f.pitch, 65);
        assert_eq!(f.velocity, 58);
    }

    #[test]
    fn test_pedal_lines_become_controls() {
        let mf = MatchFile::parse(SAMPLE).unwrap();
        let perf = Performance::from_matchfile(&mf, &ClockConfig::default());
        let sustain = perf.sustain_events();
        assert_eq!(sustain.len(), 2);
        assert_eq!(sustain[0].value, 80);
        assert!((sustain[1].time - 900.0 / 960.0).abs() < 1e-12);
    }

    #[test]
    fn test_clock_defaults_apply_without_info() {
        let text = "info(matchFileVersion,5.0).\ninsertion-note(0,[A,n],4,480,960,960,50).\n";
        let mf = MatchFile::parse(text).unwrap();
        let clock = ClockConfig {
            midi_clock_units: 240,
            midi_clock_rate: 1_000_000,
        };
        let perf = Performance::from_matchfile(&mf, &clock);
        assert!((perf.notes[0].onset_sec - 2.0).abs() < 1e-12);
        assert_eq!(perf.notes[0].pitch, 69);
    }
}
