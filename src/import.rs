//! Import phase: load `.scanned` files into the search index.
//!
//! Order of operations: make sure the index exists, switch it to bulk mode, load the
//! host rank table, dispatch one task per scanned file, then restore live settings.

use crate::config::{SearchConfig, IMPORT_TIMING_FILE, SCANNED_SUFFIX};
use crate::dispatch::{dispatch, read_work_list, DispatchLimits};
use crate::lifecycle::with_bulk_load;
use crate::models::{Classification, IndexedDocument, ScannedDocument};
use crate::ranks::RankTable;
use crate::search::SearchClient;
use crate::stats::DispatchSummary;
use crate::taxonomy::Taxonomy;
use crate::timing::PhaseTimer;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

pub const PHASE: &str = "importToES";

pub struct ImportConfig {
    pub work_list: PathBuf,
    pub rank_file: PathBuf,
    pub index: String,
    pub search: SearchConfig,
    pub log_dir: PathBuf,
    pub limits: DispatchLimits,
    pub bulk_batch_size: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportCounts {
    pub documents: u64,
    pub indexed: u64,
    pub failed: u64,
    pub malformed: u64,
}

pub fn run_import(config: ImportConfig, taxonomy: Taxonomy) -> Result<DispatchSummary> {
    let files = read_work_list(&config.work_list)?;
    let client = SearchClient::new(&config.search)?;

    info!(
        files = files.len(),
        endpoint = %config.search,
        index = %config.index,
        "Starting import"
    );

    let rt = config.limits.build_runtime("acks-import-worker")?;
    let summary = rt.block_on(with_bulk_load(
        &client,
        &config.index,
        import_all(&config, &client, files, taxonomy),
    ))?;

    info!("importToES complete.");
    Ok(summary)
}

async fn import_all(
    config: &ImportConfig,
    client: &SearchClient,
    files: Vec<String>,
    taxonomy: Taxonomy,
) -> Result<DispatchSummary> {
    let timer = PhaseTimer::start(PHASE);

    let rank_file = config.rank_file.clone();
    let ranks = tokio::task::spawn_blocking(move || RankTable::load(&rank_file))
        .await
        .context("Rank table loader stopped unexpectedly")?;
    let ranks = Arc::new(ranks);
    let taxonomy = Arc::new(taxonomy);
    let batch_size = config.bulk_batch_size.max(1);

    let summary = dispatch(PHASE, files, &config.limits, |file: String| {
        let client = client.clone();
        let index = config.index.clone();
        let taxonomy = Arc::clone(&taxonomy);
        let ranks = Arc::clone(&ranks);
        let path = PathBuf::from(format!("{file}{SCANNED_SUFFIX}"));
        Ok(async move {
            let counts =
                import_scanned_file(&client, &index, &path, &taxonomy, &ranks, batch_size)
                    .await?;
            debug!(
                file = %path.display(),
                documents = counts.documents,
                indexed = counts.indexed,
                failed = counts.failed,
                "Scanned file imported"
            );
            anyhow::Ok(())
        })
    })
    .await?;

    timer.finish(&config.log_dir, IMPORT_TIMING_FILE);
    Ok(summary)
}

/// Streams one `.scanned` file into the index in `_bulk` batches.
pub async fn import_scanned_file(
    client: &SearchClient,
    index: &str,
    path: &Path,
    taxonomy: &Taxonomy,
    ranks: &RankTable,
    batch_size: usize,
) -> Result<ImportCounts> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open scanned file: {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();
    let mut batch = Vec::with_capacity(batch_size);
    let mut counts = ImportCounts::default();
    let mut line_no = 0u64;

    while let Some(line) = lines
        .next_line()
        .await
        .with_context(|| format!("Failed to read scanned file: {}", path.display()))?
    {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let scanned: ScannedDocument = match serde_json::from_str(&line) {
            Ok(doc) => doc,
            Err(e) => {
                counts.malformed += 1;
                warn!(file = %path.display(), line = line_no, error = %e, "Skipping malformed scanned document");
                continue;
            }
        };

        counts.documents += 1;
        batch.push(build_document(scanned, taxonomy, ranks));
        if batch.len() >= batch_size {
            send_batch(client, index, &mut batch, &mut counts).await?;
        }
    }
    send_batch(client, index, &mut batch, &mut counts).await?;

    if counts.failed > 0 {
        warn!(
            file = %path.display(),
            failed = counts.failed,
            "Some documents were rejected by the index"
        );
    }
    Ok(counts)
}

async fn send_batch(
    client: &SearchClient,
    index: &str,
    batch: &mut Vec<IndexedDocument>,
    counts: &mut ImportCounts,
) -> Result<()> {
    if batch.is_empty() {
        return Ok(());
    }
    let outcome = client.bulk_index(index, batch).await?;
    counts.indexed += outcome.indexed as u64;
    counts.failed += outcome.failed as u64;
    batch.clear();
    Ok(())
}

/// Resolves rule hits against the taxonomy and attaches the host rank.
pub fn build_document(
    scanned: ScannedDocument,
    taxonomy: &Taxonomy,
    ranks: &RankTable,
) -> IndexedDocument {
    let classifications = scanned
        .hits
        .iter()
        .filter_map(|hit| match taxonomy.get(hit.rule) {
            Some(entry) => Some(Classification {
                language: entry.rule.language.clone(),
                ideology_type: entry.rule.ideology_type.clone(),
                topic: entry.rule.topic.clone(),
                sub_topic: entry.rule.sub_topic.clone(),
                strength: entry.rule.strength(hit.matched),
            }),
            None => {
                warn!(url = %scanned.url, rule = hit.rule, "Scanned hit refers to unknown rule");
                None
            }
        })
        .collect();

    IndexedDocument {
        host_rank: ranks.rank(scanned.host_id),
        url: scanned.url,
        host: scanned.host,
        content_language: scanned.content_language,
        classifications,
        paragraphs: scanned.paragraphs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{host_id, RuleHit};

    fn taxonomy() -> Taxonomy {
        Taxonomy::parse(
            "en,left,climate,policy,*carbon.tax*,emissions\n\
             en,right,economy,jobs,jobs\n",
        )
        .unwrap()
    }

    fn scanned(hits: Vec<RuleHit>) -> ScannedDocument {
        ScannedDocument {
            url: "https://example.com/a".to_string(),
            host: "example.com".to_string(),
            host_id: host_id("example.com"),
            content_language: Some("eng".to_string()),
            hits,
            paragraphs: vec!["carbon tax".to_string()],
        }
    }

    #[test]
    fn build_document_resolves_labels_and_rank() {
        let mut ranks = RankTable::new();
        ranks.insert(host_id("example.com"), 17);

        let doc = build_document(
            scanned(vec![RuleHit { rule: 0, matched: 1 }, RuleHit { rule: 1, matched: 1 }]),
            &taxonomy(),
            &ranks,
        );

        assert_eq!(doc.host_rank, Some(17));
        assert_eq!(doc.classifications.len(), 2);
        assert_eq!(doc.classifications[0].topic, "climate");
        assert!((doc.classifications[0].strength - 0.5).abs() < f32::EPSILON);
        assert_eq!(doc.classifications[1].ideology_type, "right");
        assert!((doc.classifications[1].strength - 1.0).abs() < f32::EPSILON);
        assert_eq!(doc.paragraphs, vec!["carbon tax"]);
    }

    #[test]
    fn build_document_without_rank() {
        let doc = build_document(
            scanned(vec![RuleHit { rule: 1, matched: 1 }]),
            &taxonomy(),
            &RankTable::new(),
        );
        assert_eq!(doc.host_rank, None);
    }

    #[test]
    fn unknown_rule_is_skipped() {
        let doc = build_document(
            scanned(vec![RuleHit { rule: 9, matched: 1 }, RuleHit { rule: 0, matched: 2 }]),
            &taxonomy(),
            &RankTable::new(),
        );
        assert_eq!(doc.classifications.len(), 1);
        assert_eq!(doc.classifications[0].sub_topic, "policy");
    }

    #[tokio::test]
    async fn missing_scanned_file_fails_task() {
        let client = SearchClient::new(&SearchConfig::default()).unwrap();
        let result = import_scanned_file(
            &client,
            "urls",
            Path::new("/nonexistent/a.scanned"),
            &taxonomy(),
            &RankTable::new(),
            10,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn file_without_documents_sends_nothing() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("empty.scanned");
        std::fs::write(&path, "\nnot json\n\n").unwrap();
        let client = SearchClient::new(&SearchConfig {
            protocol: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1,
        })
        .unwrap();

        let counts = import_scanned_file(&client, "urls", &path, &taxonomy(), &RankTable::new(), 10)
            .await
            .unwrap();
        assert_eq!(counts.documents, 0);
        assert_eq!(counts.malformed, 1);
        assert_eq!(counts.indexed, 0);
    }
}
