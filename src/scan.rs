//! Scan phase: classify every conversion record of every archive in the work list.
//!
//! Output for archive `<key>` goes to `<key>.scanned`, one JSON document per line, and
//! only documents with at least one rule hit are written.

use crate::archive::{self, WetRecord};
use crate::config::{BUFFER_SIZE, MAX_PARAGRAPHS_PER_DOC, SCANNED_SUFFIX, SCAN_TIMING_FILE};
use crate::dispatch::{self, read_work_list, DispatchLimits};
use crate::models::{host_id, RuleHit, ScannedDocument};
use crate::stats::DispatchSummary;
use crate::taxonomy::{RuleMatch, Taxonomy};
use crate::timing::PhaseTimer;
use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use url::Url;

pub const PHASE: &str = "scan";

pub struct ScanConfig {
    pub work_list: PathBuf,
    pub log_dir: PathBuf,
    pub limits: DispatchLimits,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScanCounts {
    pub records: u64,
    pub documents: u64,
    pub classified: u64,
}

pub fn scanned_path(key: &str) -> PathBuf {
    PathBuf::from(format!("{key}{SCANNED_SUFFIX}"))
}

pub fn run_scan(config: &ScanConfig, taxonomy: Taxonomy) -> Result<DispatchSummary> {
    let keys = read_work_list(&config.work_list)?;
    info!(archives = keys.len(), rules = taxonomy.len(), "Starting scan");

    let timer = PhaseTimer::start(PHASE);
    let taxonomy = Arc::new(taxonomy);

    let summary = dispatch::run(PHASE, keys, &config.limits, |key: String| {
        let taxonomy = Arc::clone(&taxonomy);
        Ok(async move {
            let label = key.clone();
            let counts = tokio::task::spawn_blocking(move || scan_archive(&key, &taxonomy))
                .await
                .context("Scan worker stopped unexpectedly")??;
            debug!(
                archive = %label,
                records = counts.records,
                documents = counts.documents,
                classified = counts.classified,
                "Archive scanned"
            );
            anyhow::Ok(())
        })
    })?;

    timer.finish(&config.log_dir, SCAN_TIMING_FILE);
    info!("Scanning complete.");
    Ok(summary)
}

/// Scans one archive and writes its `.scanned` file.
pub fn scan_archive(key: &str, taxonomy: &Taxonomy) -> Result<ScanCounts> {
    let output = scanned_path(key);
    let tmp_path = output.with_extension("scanned.tmp");

    let result = scan_into(Path::new(key), &tmp_path, taxonomy);
    match result {
        Ok(counts) => {
            fs::rename(&tmp_path, &output).with_context(|| {
                format!("Failed to move scan output into place: {}", output.display())
            })?;
            Ok(counts)
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

fn scan_into(archive_path: &Path, tmp_path: &Path, taxonomy: &Taxonomy) -> Result<ScanCounts> {
    let reader = archive::open(archive_path)?;
    let file = File::create(tmp_path)
        .with_context(|| format!("Failed to create scan output: {}", tmp_path.display()))?;
    let mut writer = BufWriter::with_capacity(BUFFER_SIZE, file);
    let mut counts = ScanCounts::default();

    for record in reader {
        let record = record
            .with_context(|| format!("Malformed record in {}", archive_path.display()))?;
        counts.records += 1;
        if !record.is_conversion() {
            continue;
        }
        counts.documents += 1;

        if let Some(doc) = classify_record(&record, taxonomy) {
            serde_json::to_writer(&mut writer, &doc).context("Failed to write scan output")?;
            writer.write_all(b"\n")?;
            counts.classified += 1;
        }
    }

    writer.flush().context("Failed to flush scan output")?;
    Ok(counts)
}

/// Classifies one conversion record. `None` when it has no URI or no rule fires.
pub fn classify_record(record: &WetRecord, taxonomy: &Taxonomy) -> Option<ScannedDocument> {
    let url = record.target_uri()?;
    let lower = record.body.to_lowercase();
    let matches = taxonomy.classify_lowercase(&lower);
    if matches.is_empty() {
        return None;
    }

    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_default();

    Some(ScannedDocument {
        url: url.to_string(),
        host_id: host_id(&host),
        host,
        content_language: record.content_language().map(String::from),
        paragraphs: matching_paragraphs(&record.body, &matches, taxonomy),
        hits: matches
            .iter()
            .map(|m| RuleHit {
                rule: m.rule_index,
                matched: m.matched_patterns.len(),
            })
            .collect(),
    })
}

/// Lines of `body` on which at least one of the fired rules matches.
fn matching_paragraphs(body: &str, matches: &[RuleMatch], taxonomy: &Taxonomy) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let lower = line.to_lowercase();
            matches.iter().any(|m| {
                taxonomy
                    .get(m.rule_index)
                    .is_some_and(|entry| entry.matcher.is_match(&lower))
            })
        })
        .take(MAX_PARAGRAPHS_PER_DOC)
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(uri: &str, body: &str) -> WetRecord {
        WetRecord {
            headers: vec![
                ("WARC-Type".to_string(), "conversion".to_string()),
                ("WARC-Target-URI".to_string(), uri.to_string()),
                (
                    "WARC-Identified-Content-Language".to_string(),
                    "eng".to_string(),
                ),
            ],
            body: body.to_string(),
        }
    }

    fn taxonomy() -> Taxonomy {
        Taxonomy::parse(
            "en,left,climate,policy,*carbon.tax*,-satire\n\
             en,right,economy,jobs,jobs,wages\n",
        )
        .unwrap()
    }

    #[test]
    fn classified_record_keeps_hits_and_paragraphs() {
        let rec = record(
            "https://News.Example.com/story",
            "Headline\nThe Carbon Tax debate continues.\nUnrelated line\nJobs and wages rose.",
        );
        let doc = classify_record(&rec, &taxonomy()).unwrap();

        assert_eq!(doc.url, "https://News.Example.com/story");
        assert_eq!(doc.host, "news.example.com");
        assert_eq!(doc.host_id, host_id("news.example.com"));
        assert_eq!(doc.content_language.as_deref(), Some("eng"));
        assert_eq!(
            doc.hits,
            vec![RuleHit { rule: 0, matched: 1 }, RuleHit { rule: 1, matched: 2 }]
        );
        assert_eq!(
            doc.paragraphs,
            vec!["The Carbon Tax debate continues.", "Jobs and wages rose."]
        );
    }

    #[test]
    fn vetoed_record_is_dropped() {
        let rec = record("https://a.org/", "A satire piece on the carbon tax.");
        assert!(classify_record(&rec, &taxonomy()).is_none());
    }

    #[test]
    fn record_without_uri_is_dropped() {
        let rec = WetRecord {
            headers: vec![("WARC-Type".to_string(), "conversion".to_string())],
            body: "carbon tax".to_string(),
        };
        assert!(classify_record(&rec, &taxonomy()).is_none());
    }

    #[test]
    fn paragraphs_are_capped() {
        let body = "jobs\n".repeat(MAX_PARAGRAPHS_PER_DOC + 5);
        let doc = classify_record(&record("https://a.org/", &body), &taxonomy()).unwrap();
        assert_eq!(doc.paragraphs.len(), MAX_PARAGRAPHS_PER_DOC);
    }

    #[test]
    fn scanned_path_appends_suffix() {
        assert_eq!(
            scanned_path("crawl/a.warc.wet.gz"),
            PathBuf::from("crawl/a.warc.wet.gz.scanned")
        );
    }

    #[test]
    fn failed_scan_leaves_no_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let key = dir.path().join("broken.wet");
        fs::write(&key, "this is not an archive\n").unwrap();
        let key = key.to_str().unwrap();

        assert!(scan_archive(key, &taxonomy()).is_err());
        assert!(!scanned_path(key).exists());
        assert!(!scanned_path(key).with_extension("scanned.tmp").exists());
    }
}
