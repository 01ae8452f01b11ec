use anyhow::Result;
use clap::Parser;
use log::info;
use std::path::PathBuf;

use midi_roll::batch::{self, BatchConfig};
use midi_roll::pianoroll::DEFAULT_MAX_TICKS;
use midi_roll::timeline::EventOrder;

/// Convert a directory of MIDI files into sparse piano-roll matrices.
#[derive(Parser, Debug)]
struct Opt {
    /// Directory holding .mid / .midi files
    source: PathBuf,
    /// Directory for the converted rolls, created if missing
    dest: PathBuf,
    /// Order in which note events are applied to the roll
    #[arg(long, value_enum, default_value_t = EventOrder::Chronological)]
    order: EventOrder,
    /// Extension of the written files
    #[arg(long, default_value = "roll")]
    extension: String,
    /// Skip files whose roll would be longer than this many ticks
    #[arg(long, default_value_t = DEFAULT_MAX_TICKS)]
    max_ticks: usize,
    /// Worker threads (0 = one per core)
    #[arg(short, long, default_value_t = 0)]
    jobs: usize,
    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Opt {
    fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            order: self.order,
            extension: self.extension.trim_start_matches('.').to_string(),
            max_ticks: self.max_ticks,
            jobs: self.jobs,
        }
    }
}

fn main() -> Result<()> {
    let opt = Opt::parse();

    let level = match opt.verbose {
        0 => log::Level::Info,
        1 => log::Level::Debug,
        _ => log::Level::Trace,
    };
    simple_logger::init_with_level(level)?;

    let cfg = opt.batch_config();
    info!("{:?} -> {:?} ({:?} order)", opt.source, opt.dest, cfg.order);
    batch::run(&opt.source, &opt.dest, &cfg)?;

    Ok(())
}
