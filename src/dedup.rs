//! Reoccurring paragraph detection.
//!
//! Each shard task walks one slice of the index with a scroll, counts identical stored
//! paragraphs and writes those seen at least `min_occurrences` times to
//! `reoccurringParagraphs_<shard>.csv`. Boilerplate such as cookie banners and
//! navigation text shows up here first.

use crate::config::{
    SearchConfig, BUFFER_SIZE, DEDUP_SCROLL_KEEPALIVE, DEDUP_SCROLL_PAGE, DEDUP_TIMING_FILE,
};
use crate::dispatch::{self, DispatchLimits};
use crate::recover::log_and_continue;
use crate::search::{ScrollSource, SearchClient};
use crate::stats::DispatchSummary;
use crate::timing::PhaseTimer;
use anyhow::{Context, Result};
use csv::Writer;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const PHASE: &str = "findReoccurringParagraphs";

const PARAGRAPHS_FIELD: &str = "paragraphs";

pub struct DedupConfig {
    pub index: String,
    pub search: SearchConfig,
    pub log_dir: PathBuf,
    pub output_dir: PathBuf,
    pub shards: u32,
    pub min_occurrences: u32,
    pub limits: DispatchLimits,
}

/// Occurrence count per distinct trimmed paragraph.
#[derive(Debug, Default)]
pub struct ParagraphCounts {
    counts: FxHashMap<String, u32>,
}

impl ParagraphCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, paragraph: &str) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            return;
        }
        match self.counts.get_mut(paragraph) {
            Some(count) => *count += 1,
            None => {
                self.counts.insert(paragraph.to_string(), 1);
            }
        }
    }

    pub fn count(&self, paragraph: &str) -> u32 {
        self.counts.get(paragraph.trim()).copied().unwrap_or(0)
    }

    /// Adds every paragraph stored in one document `_source`.
    pub fn add_source(&mut self, source: &Value) {
        if let Some(paragraphs) = source.get(PARAGRAPHS_FIELD).and_then(Value::as_array) {
            for paragraph in paragraphs.iter().filter_map(Value::as_str) {
                self.add(paragraph);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Paragraphs seen at least `min` times, most frequent first.
    pub fn reoccurring(&self, min: u32) -> Vec<(u32, &str)> {
        let mut out: Vec<(u32, &str)> = self
            .counts
            .iter()
            .filter(|(_, count)| **count >= min)
            .map(|(text, count)| (*count, text.as_str()))
            .collect();
        out.sort_unstable_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        out
    }
}

pub fn shard_output_path(output_dir: &Path, shard: u32) -> PathBuf {
    output_dir.join(format!("reoccurringParagraphs_{shard}.csv"))
}

pub fn run_dedup(config: &DedupConfig) -> Result<DispatchSummary> {
    let client = SearchClient::new(&config.search)?;
    let shards: Vec<u32> = (0..config.shards.max(1)).collect();
    let slices = shards.len() as u32;
    info!(
        shards = slices,
        endpoint = %config.search,
        index = %config.index,
        "Starting paragraph dedup"
    );

    let timer = PhaseTimer::start(PHASE);
    let summary = dispatch::run(PHASE, shards, &config.limits, |shard: u32| {
        let client = client.clone();
        let index = config.index.clone();
        let output = shard_output_path(&config.output_dir, shard);
        let min_occurrences = config.min_occurrences;
        Ok(async move {
            let counts = collect_paragraph_counts(&client, &index, shard, slices).await?;
            let written = tokio::task::spawn_blocking(move || {
                write_reoccurring(&output, &counts, min_occurrences)
            })
            .await
            .context("CSV writer stopped unexpectedly")??;
            info!(shard, distinct = written.0, reoccurring = written.1, "Shard done");
            anyhow::Ok(())
        })
    })?;

    timer.finish(&config.log_dir, DEDUP_TIMING_FILE);
    info!("findReoccurringParagraphs complete.");
    Ok(summary)
}

/// Scrolls through one slice of `index`, counting paragraphs.
///
/// The last scroll cursor seen is cleared whether the walk finishes or fails.
pub async fn collect_paragraph_counts<S: ScrollSource + ?Sized>(
    source: &S,
    index: &str,
    slice: u32,
    slices: u32,
) -> Result<ParagraphCounts> {
    let mut counts = ParagraphCounts::new();
    let mut page = source
        .open_scroll(
            index,
            slice,
            slices,
            DEDUP_SCROLL_PAGE,
            DEDUP_SCROLL_KEEPALIVE,
            &[PARAGRAPHS_FIELD],
        )
        .await?;
    let mut cursor = page.scroll_id.clone();
    let mut documents = 0u64;

    let walked = loop {
        if page.sources.is_empty() {
            break Ok(());
        }
        documents += page.sources.len() as u64;
        for doc in &page.sources {
            counts.add_source(doc);
        }
        debug!(slice, documents, distinct = counts.len(), "Scroll page counted");

        let Some(scroll_id) = cursor.clone() else {
            break Ok(());
        };
        match source
            .continue_scroll(&scroll_id, DEDUP_SCROLL_KEEPALIVE)
            .await
        {
            Ok(next) => {
                if next.scroll_id.is_some() {
                    cursor = next.scroll_id.clone();
                }
                page = next;
            }
            Err(e) => break Err(e),
        }
    };

    if let Some(scroll_id) = cursor {
        log_and_continue(PHASE, "clearScroll", source.clear_scroll(&scroll_id).await);
    }
    walked?;
    Ok(counts)
}

/// Writes the `count,paragraph` CSV. Returns (distinct paragraphs, rows written).
pub fn write_reoccurring(
    path: &Path,
    counts: &ParagraphCounts,
    min_occurrences: u32,
) -> Result<(usize, usize)> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = Writer::from_writer(BufWriter::with_capacity(BUFFER_SIZE, file));
    writer.write_record(["count", "paragraph"])?;

    let rows = counts.reoccurring(min_occurrences);
    for &(count, paragraph) in &rows {
        writer.write_record([count.to_string().as_str(), paragraph])?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok((counts.len(), rows.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use crate::search::ScrollPage;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn counts_identical_paragraphs() {
        let mut counts = ParagraphCounts::new();
        counts.add("Accept all cookies");
        counts.add("  Accept all cookies ");
        counts.add("A unique sentence.");
        counts.add("   ");
        assert_eq!(counts.len(), 2);
        assert_eq!(counts.reoccurring(2), vec![(2, "Accept all cookies")]);
    }

    #[test]
    fn reoccurring_sorted_by_count() {
        let mut counts = ParagraphCounts::new();
        for _ in 0..3 {
            counts.add("Subscribe now");
        }
        for _ in 0..5 {
            counts.add("Share this");
        }
        counts.add("once");
        assert_eq!(
            counts.reoccurring(2),
            vec![(5, "Share this"), (3, "Subscribe now")]
        );
        assert_eq!(counts.reoccurring(1).len(), 3);
    }

    #[test]
    fn source_without_paragraphs_is_ignored() {
        let mut counts = ParagraphCounts::new();
        counts.add_source(&json!({ "url": "https://a.org/" }));
        counts.add_source(&json!({ "paragraphs": ["x1", 7, "x1"] }));
        assert_eq!(counts.reoccurring(2), vec![(2, "x1")]);
    }

    #[test]
    fn distinct_paragraphs_never_share_a_count() {
        let mut counts = ParagraphCounts::new();
        for i in 0..10_000 {
            let paragraph = format!("paragraph number {i}");
            counts.add(&paragraph);
            counts.add(&paragraph);
        }
        assert_eq!(counts.len(), 10_000);
        assert_eq!(counts.count("paragraph number 0"), 2);
        assert_eq!(counts.count("paragraph number 9999"), 2);
        assert_eq!(counts.count("paragraph number 10000"), 0);
        assert_eq!(counts.reoccurring(3).len(), 0);
    }

    /// Serves canned pages; `fail_after` makes the nth continuation fail.
    #[derive(Default)]
    struct FakeScroll {
        pages: Mutex<Vec<ScrollPage>>,
        fail_after: Option<usize>,
        continued: Mutex<usize>,
        cleared: Mutex<Vec<String>>,
    }

    impl FakeScroll {
        fn new(pages: Vec<ScrollPage>, fail_after: Option<usize>) -> Self {
            let mut pages = pages;
            pages.reverse();
            Self {
                pages: Mutex::new(pages),
                fail_after,
                ..Self::default()
            }
        }

        fn next_page(&self) -> ScrollPage {
            self.pages.lock().unwrap().pop().unwrap_or_default()
        }
    }

    #[async_trait]
    impl ScrollSource for FakeScroll {
        async fn open_scroll(
            &self,
            _index: &str,
            _slice: u32,
            _slices: u32,
            _page_size: usize,
            _keep_alive: &str,
            _fields: &[&str],
        ) -> Result<ScrollPage> {
            Ok(self.next_page())
        }

        async fn continue_scroll(&self, _scroll_id: &str, _keep_alive: &str) -> Result<ScrollPage> {
            let mut continued = self.continued.lock().unwrap();
            *continued += 1;
            if self.fail_after == Some(*continued) {
                bail!("scroll context lost");
            }
            Ok(self.next_page())
        }

        async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
            self.cleared.lock().unwrap().push(scroll_id.to_string());
            Ok(())
        }
    }

    fn page(id: &str, paragraphs: &[&str]) -> ScrollPage {
        ScrollPage {
            scroll_id: Some(id.to_string()),
            sources: vec![json!({ "paragraphs": paragraphs })],
        }
    }

    #[tokio::test]
    async fn scroll_walk_counts_every_page_and_clears() {
        let source = FakeScroll::new(
            vec![
                page("c1", &["Share this", "intro"]),
                page("c2", &["Share this"]),
                ScrollPage {
                    scroll_id: Some("c3".to_string()),
                    sources: Vec::new(),
                },
            ],
            None,
        );

        let counts = collect_paragraph_counts(&source, "urls", 0, 2).await.unwrap();
        assert_eq!(counts.count("Share this"), 2);
        assert_eq!(counts.count("intro"), 1);
        assert_eq!(*source.cleared.lock().unwrap(), vec!["c3"]);
    }

    #[tokio::test]
    async fn failed_continuation_still_clears_scroll() {
        let source = FakeScroll::new(
            vec![page("c1", &["a paragraph"]), page("c2", &["a paragraph"])],
            Some(1),
        );

        let result = collect_paragraph_counts(&source, "urls", 1, 2).await;
        assert!(result.is_err());
        assert_eq!(*source.cleared.lock().unwrap(), vec!["c1"]);
    }

    #[test]
    fn writes_csv_with_header() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = shard_output_path(&dir.path().join("out"), 1);
        let mut counts = ParagraphCounts::new();
        counts.add("Read more, click here");
        counts.add("Read more, click here");
        counts.add("single");

        let (distinct, rows) = write_reoccurring(&path, &counts, 2).unwrap();
        assert_eq!((distinct, rows), (2, 1));
        assert!(path.ends_with("reoccurringParagraphs_1.csv"));

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "count,paragraph\n2,\"Read more, click here\"\n");
    }
}
