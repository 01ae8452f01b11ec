//! batch.rs
//!
//! Directory-to-directory conversion: every MIDI file in a source directory becomes a
//! sparse sustain roll in the destination directory.
//!
//! Files are independent, so they are converted in parallel. A file that fails (bad
//! bytes, no notes, too long) is logged and skipped; it never stops the batch.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::midi::EventFile;
use crate::pianoroll::{BuildOptions, DEFAULT_MAX_TICKS, build};
use crate::sparse::SparseMatrix;
use crate::timeline::{EventOrder, reconstruct};

const MIDI_EXTENSIONS: &[&str] = &["mid", "midi"];
const PROGRESS_EVERY: usize = 100;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchConfig {
    pub order: EventOrder,
    /// Extension of the written artifacts, without the dot.
    pub extension: String,
    pub max_ticks: usize,
    /// Worker threads, 0 lets rayon decide.
    pub jobs: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            order: EventOrder::default(),
            extension: "roll".to_string(),
            max_ticks: DEFAULT_MAX_TICKS,
            jobs: 0,
        }
    }
}

impl BatchConfig {
    fn build_options(&self) -> BuildOptions {
        BuildOptions { order: self.order, max_ticks: self.max_ticks }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub converted: usize,
    pub failed: usize,
    /// Files whose output name was already taken by an earlier file.
    pub skipped: usize,
}

/// MIDI files directly inside `source`, sorted by path.
pub fn discover(source: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(source).with_context(|| format!("reading {:?}", source))? {
        let path = entry?.path();
        if path.is_file() && is_midi(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn is_midi(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| MIDI_EXTENSIONS.iter().any(|m| e.eq_ignore_ascii_case(m)))
}

/// `dest/<name up to the first dot>.<extension>`
pub fn output_path(dest: &Path, source_file: &Path, extension: &str) -> Option<PathBuf> {
    let name = source_file.file_name()?.to_str()?;
    let base = name.split('.').next().filter(|b| !b.is_empty())?;
    Some(dest.join(format!("{}.{}", base, extension)))
}

/// Pair every file with its own output path.
///
/// Files are taken in the given order and the first one to claim an output path
/// keeps it, so `x.mid` wins over `x.midi` and `a.b.mid` over `a.c.mid`. Returns the
/// jobs, the number of files without a usable name, and the number of duplicates.
fn plan_outputs<'a>(
    files: &'a [PathBuf],
    dest: &Path,
    extension: &str,
) -> (Vec<(&'a Path, PathBuf)>, usize, usize) {
    let mut claimed = HashSet::new();
    let mut jobs = Vec::with_capacity(files.len());
    let (mut unnamed, mut duplicates) = (0, 0);

    for f in files {
        let Some(out) = output_path(dest, f, extension) else {
            warn!("Could not process {:?}: no usable file name", f);
            unnamed += 1;
            continue;
        };
        if !claimed.insert(out.clone()) {
            warn!("Skipping {:?}: {:?} is already written by another file", f, out);
            duplicates += 1;
            continue;
        }
        jobs.push((f.as_path(), out));
    }

    (jobs, unnamed, duplicates)
}

/// Convert one MIDI file and write its sustain roll to `out`.
///
/// Returns the number of sounding cells written.
pub fn convert_file(path: &Path, out: &Path, opts: &BuildOptions) -> Result<usize> {
    let bytes = fs::read(path).with_context(|| format!("reading {:?}", path))?;
    let file = EventFile::parse(&bytes).with_context(|| format!("parsing {:?}", path))?;
    debug!("{:?}: {} tracks", path, file.tracks.len());

    let notes = reconstruct(&file)?;
    let rolls = build(&notes, opts)?;

    let sparse = SparseMatrix::from_roll(&rolls.sustain);
    sparse.save(out).with_context(|| format!("writing {:?}", out))?;
    debug!(
        "{:?} -> {:?}: {} notes, {} ticks, {} cells",
        path, out, notes.len(), rolls.rows(), sparse.nnz()
    );
    Ok(sparse.nnz())
}

/// Convert every MIDI file in `source` into `dest`, creating `dest` if needed.
///
/// Only problems with the directories themselves are errors. Per-file failures are
/// logged and counted in the summary.
pub fn run(source: &Path, dest: &Path, cfg: &BatchConfig) -> Result<BatchSummary> {
    fs::create_dir_all(dest).with_context(|| format!("creating {:?}", dest))?;
    let files = discover(source)?;
    info!("found {} MIDI files in {:?}", files.len(), source);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(cfg.jobs)
        .build()
        .context("starting worker pool")?;

    let opts = cfg.build_options();
    let (jobs, unnamed, skipped) = plan_outputs(&files, dest, &cfg.extension);
    let done = AtomicUsize::new(0);
    let failed = AtomicUsize::new(unnamed);

    pool.install(|| {
        jobs.par_iter().for_each(|(f, out)| {
            if let Err(e) = convert_file(f, out, &opts) {
                warn!("Could not process {:?}: {:#}", f, e);
                failed.fetch_add(1, Ordering::Relaxed);
            }

            let n = done.fetch_add(1, Ordering::Relaxed) + 1;
            if n % PROGRESS_EVERY == 0 {
                info!("processed {} / {}", n, jobs.len());
            }
        });
    });

    let failed = failed.into_inner();
    let summary = BatchSummary { converted: jobs.len() + unnamed - failed, failed, skipped };
    info!(
        "converted {} files, {} failed, {} skipped",
        summary.converted, summary.failed, summary.skipped
    );
    Ok(summary)
}
