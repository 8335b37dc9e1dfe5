//! Host popularity ranks.
//!
//! The import phase reads a gzip file of `rank hostId` lines into a [`RankTable`].
//! `processHostRanksFile` produces that file from a raw host-rank listing whose first
//! column is the rank and whose last column is the reversed host name
//! (`com.example.www`).

use crate::config::{BUFFER_SIZE, HOST_RANKS_TIMING_FILE};
use crate::models::host_id;
use crate::timing::PhaseTimer;
use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

pub const PHASE: &str = "processHostRanksFile";

/// Host id to popularity rank. Read-only once loaded.
#[derive(Debug, Default, Clone)]
pub struct RankTable {
    ranks: FxHashMap<u64, u64>,
}

impl RankTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the table, keeping whatever was read before a failure.
    ///
    /// A missing or unreadable file gives an empty table; malformed lines are skipped.
    pub fn load(path: &Path) -> Self {
        let mut table = Self::new();
        info!(path = %path.display(), "Reading host rank file");

        let result = File::open(path)
            .with_context(|| format!("Failed to open rank file: {}", path.display()))
            .and_then(|file| {
                let reader = BufReader::with_capacity(
                    BUFFER_SIZE,
                    MultiGzDecoder::new(BufReader::with_capacity(BUFFER_SIZE, file)),
                );
                table.read_from(reader)
            });

        match result {
            Ok(skipped) => info!(
                hosts = table.len(),
                skipped, "Host rank file loaded"
            ),
            Err(e) => warn!(
                path = %path.display(),
                hosts = table.len(),
                error = %format!("{e:#}"),
                "Host rank file only partially loaded"
            ),
        }
        table
    }

    /// Adds every `rank hostId` line from `reader`. Returns the number of skipped lines.
    pub fn read_from<R: BufRead>(&mut self, reader: R) -> Result<u64> {
        let mut skipped = 0u64;
        for (idx, line) in reader.lines().enumerate() {
            let line = line.with_context(|| format!("Failed to read rank line {}", idx + 1))?;
            if line.trim().is_empty() {
                continue;
            }
            match parse_rank_line(&line) {
                Some((rank, host)) => {
                    self.ranks.insert(host, rank);
                }
                None => {
                    skipped += 1;
                    warn!(line = idx + 1, content = %line, "Skipping malformed rank line");
                }
            }
        }
        Ok(skipped)
    }

    pub fn insert(&mut self, host_id: u64, rank: u64) {
        self.ranks.insert(host_id, rank);
    }

    pub fn rank(&self, host_id: u64) -> Option<u64> {
        self.ranks.get(&host_id).copied()
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

/// Parses `"<rank> <hostId>"`.
pub fn parse_rank_line(line: &str) -> Option<(u64, u64)> {
    let mut parts = line.split_whitespace();
    let rank = parts.next()?.parse().ok()?;
    let host = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((rank, host))
}

/// Turns `com.example.www` into `www.example.com`.
pub fn unreverse_host(reversed: &str) -> String {
    reversed.rsplit('.').collect::<Vec<_>>().join(".")
}

/// Parses one raw host-rank line into `(rank, hostId)`. Comment lines give `None`.
pub fn parse_raw_host_rank(line: &str) -> Option<(u64, u64)> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = trimmed.split_whitespace().collect();
    if fields.len() < 2 {
        return None;
    }
    let rank = fields[0].parse().ok()?;
    let host = unreverse_host(fields[fields.len() - 1]);
    Some((rank, host_id(&host)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessSummary {
    pub lines_read: u64,
    pub skipped: u64,
    pub hosts_written: usize,
}

/// Converts a raw host-rank listing into the `rank hostId` file the import phase loads.
///
/// The best (lowest) rank wins when a host appears more than once; output is sorted by rank.
pub fn preprocess_host_ranks(input: &Path, output: &Path) -> Result<PreprocessSummary> {
    let file = File::open(input)
        .with_context(|| format!("Failed to open host rank listing: {}", input.display()))?;
    let reader = BufReader::with_capacity(
        BUFFER_SIZE,
        MultiGzDecoder::new(BufReader::with_capacity(BUFFER_SIZE, file)),
    );

    let mut best: FxHashMap<u64, u64> = FxHashMap::default();
    let mut lines_read = 0u64;
    let mut skipped = 0u64;

    for line in reader.lines() {
        let line = line.context("Failed to read host rank listing")?;
        lines_read += 1;
        match parse_raw_host_rank(&line) {
            Some((rank, host)) => {
                best.entry(host)
                    .and_modify(|r| *r = (*r).min(rank))
                    .or_insert(rank);
            }
            None => skipped += 1,
        }
    }

    let mut rows: Vec<(u64, u64)> = best.into_iter().map(|(host, rank)| (rank, host)).collect();
    rows.par_sort_unstable();

    let tmp_path = output.with_extension("tmp");
    let file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create rank file: {}", tmp_path.display()))?;
    let mut writer = GzEncoder::new(
        BufWriter::with_capacity(BUFFER_SIZE, file),
        Compression::default(),
    );
    for (rank, host) in &rows {
        writeln!(writer, "{rank} {host}")?;
    }
    writer
        .finish()
        .context("Failed to finish gzip stream")?
        .flush()?;

    std::fs::rename(&tmp_path, output)
        .with_context(|| format!("Failed to move rank file into place: {}", output.display()))?;

    let summary = PreprocessSummary {
        lines_read,
        skipped,
        hosts_written: rows.len(),
    };
    info!(
        lines = summary.lines_read,
        skipped = summary.skipped,
        hosts = summary.hosts_written,
        output = %output.display(),
        "Host rank file written"
    );
    Ok(summary)
}

/// Timed `processHostRanksFile` run.
pub fn run_host_ranks(input: &Path, output: &Path, log_dir: &Path) -> Result<PreprocessSummary> {
    let timer = PhaseTimer::start(PHASE);
    let summary = preprocess_host_ranks(input, output)?;
    timer.finish(log_dir, HOST_RANKS_TIMING_FILE);
    Ok(summary)
}
