use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use perfmatch::alignment::{alignment_from_json, alignment_from_matchfile, alignment_to_json};
use perfmatch::analyzer::{
    compute_performance_features, Aggregation, FeatureRequest, FeatureTable, EXTRACTORS,
};
use perfmatch::config::AppConfig;
use perfmatch::matchfile::MatchFile;
use perfmatch::performance::midi::{load_performance_midi, load_score_midi, PartVoiceMode};
use perfmatch::performance::Performance;
use perfmatch::score::Score;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "perfmatch", version, about = "Score-performance match files and expressive performance features")]
struct Cli {
    /// Config file (defaults to the XDG config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum AggregationArg {
    Mean,
    Max,
}

impl From<AggregationArg> for Aggregation {
    fn from(arg: AggregationArg) -> Self {
        match arg {
            AggregationArg::Mean => Aggregation::Mean,
            AggregationArg::Max => Aggregation::Max,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a match file, print a summary and verify it writes back unchanged
    Check {
        /// Match file to read
        file: PathBuf,
    },

    /// Compute expressive performance features from a match file
    Features {
        /// Match file holding score, performance and alignment
        file: PathBuf,

        /// Extractors to run: "all" or a comma separated list
        #[arg(short, long, default_value = "all")]
        features: String,

        /// Alignment JSON to use instead of the match file's own
        #[arg(long)]
        alignment: Option<PathBuf>,

        /// Window in beats for tempo/dynamics correlation
        #[arg(long)]
        window: Option<f64>,

        /// How velocities of simultaneous notes are combined
        #[arg(long, value_enum)]
        aggregation: Option<AggregationArg>,

        /// Also compute legato/staccato/interval masks
        #[arg(long)]
        articulation_mask: bool,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print the alignment of a match file as JSON
    Alignment {
        /// Match file to read
        file: PathBuf,
    },

    /// Summarize a MIDI file as a performance, or as a score with --score
    Midi {
        /// MIDI file to read
        file: PathBuf,

        /// Read as a metrical score instead of a performance
        #[arg(long)]
        score: bool,

        /// Part/voice assignment mode (0-5) for --score
        #[arg(long, default_value = "0")]
        mode: i64,

        /// Quantize score times to this many ticks
        #[arg(long)]
        quantize: Option<i64>,
    },

    /// List the available feature extractors
    List,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp(None)
        .init();

    // Load config file (optional, defaults if missing)
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };

    match cli.command {
        Commands::Check { file } => {
            let mf = load_match(&file)?;
            print_summary(&mf)?;

            let original = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mismatches = round_trip_mismatches(&original, &mf);
            if mismatches == 0 {
                println!("Round trip: OK");
            } else {
                anyhow::bail!("Round trip: {mismatches} lines differ after writing back");
            }
        }

        Commands::Features {
            file,
            features,
            alignment,
            window,
            aggregation,
            articulation_mask,
            json,
        } => {
            let mf = load_match(&file)?;
            let score = Score::from_matchfile(&mf);
            let performance = Performance::from_matchfile(&mf, &config.clock);
            let alignment = match alignment {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    alignment_from_json(&text).context("Invalid alignment JSON")?
                }
                None => alignment_from_matchfile(&mf),
            };

            let mut options = config.features.options();
            if let Some(w) = window {
                options.window_beats = w;
            }
            if let Some(a) = aggregation {
                options.aggregation = a.into();
            }
            options.articulation_mask |= articulation_mask;

            let result = compute_performance_features(
                &score,
                &performance,
                &alignment,
                &FeatureRequest::from_names(&features),
                &options,
            )
            .context("Feature extraction failed")?;

            if json {
                let out = serde_json::json!({
                    "rows": result.table().rows(),
                    "extras": result.extras,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                let ids: Vec<&str> = result.matched.notes.iter().map(|n| n.score_id.as_str()).collect();
                print_feature_table(&ids, &result.features);
            }
        }

        Commands::Alignment { file } => {
            let mf = load_match(&file)?;
            println!("{}", alignment_to_json(&alignment_from_matchfile(&mf))?);
        }

        Commands::Midi {
            file,
            score,
            mode,
            quantize,
        } => {
            if score {
                let mode = PartVoiceMode::try_from(mode)?;
                let midi_score = load_score_midi(&file, mode, quantize)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                println!("{} ({} ticks per quarter)", midi_score.id, midi_score.divs);
                for part in &midi_score.parts {
                    println!(
                        "  {:<20} {:>6} notes",
                        part.name.as_deref().unwrap_or("-"),
                        part.notes.len()
                    );
                }
            } else {
                let perf = load_performance_midi(&file, config.midi.default_bpm, config.midi.merge_tracks)
                    .with_context(|| format!("Failed to read {}", file.display()))?;
                let end = perf
                    .notes
                    .iter()
                    .map(|n| n.offset_sec())
                    .fold(0.0, f64::max);
                println!(
                    "{}: {} notes, {} control changes, {:.2}s",
                    perf.id,
                    perf.notes.len(),
                    perf.controls.len(),
                    end
                );
            }
        }

        Commands::List => {
            for extractor in EXTRACTORS {
                println!("{:<22} {}", extractor.name, extractor.description);
            }
        }
    }

    Ok(())
}

fn load_match(path: &Path) -> Result<MatchFile> {
    MatchFile::load(path).with_context(|| format!("Failed to parse {}", path.display()))
}

fn print_summary(mf: &MatchFile) -> Result<()> {
    println!("{}", mf.name);
    println!("  version:      {}", mf.version());
    println!("  lines:        {}", mf.lines.len());
    println!("  matched:      {}", mf.note_pairs().len());
    println!("  deletions:    {}", mf.deletions().len());
    println!("  insertions:   {}", mf.insertions().len());
    println!("  sustain:      {}", mf.sustain_pedal().len());
    println!("  soft:         {}", mf.soft_pedal().len());
    if let Some(onset) = mf.first_onset() {
        println!("  first onset:  {onset}");
    }
    for ts in mf.time_signatures() {
        println!(
            "  time sig:     {}/{} at bar {} (beat {})",
            ts.numerator, ts.denominator, ts.bar, ts.time
        );
    }
    for ks in mf.key_signatures().context("Invalid key signature")? {
        println!("  key sig:      {} at bar {}", ks.keys.join("/"), ks.bar);
    }
    Ok(())
}

/// Count non-blank input lines that do not come back identical.
fn round_trip_mismatches(original: &str, mf: &MatchFile) -> usize {
    let written = mf.to_matchfile_text();
    let input = original.lines().map(str::trim).filter(|l| !l.is_empty());
    let output = written.lines().map(str::trim).filter(|l| !l.is_empty());
    let mut mismatches = 0;
    for (i, (a, b)) in input.zip(output).enumerate() {
        if a != b {
            log::info!("Line {}: {a:?} written back as {b:?}", i + 1);
            mismatches += 1;
        }
    }
    mismatches
}

fn print_feature_table(ids: &[&str], table: &FeatureTable) {
    let names = table.column_names();
    print!("{:<10}", "note");
    for name in &names {
        print!(" {:>28}", name);
    }
    println!();
    for (i, id) in ids.iter().enumerate() {
        print!("{:<10}", id);
        for (_, values) in table.columns() {
            print!(" {:>28.4}", values[i]);
        }
        println!();
    }
}
