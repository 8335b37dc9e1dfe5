//! Acks: topic classification of web crawl archives and search-index loading
//!
//! The crate runs one of four batch phases per invocation:
//!
//! 1. **scan** -- Classify every conversion record of each WET archive in a work list
//!    against the taxonomy and write the hits to `<archive>.scanned`
//! 2. **importToES** -- Load `.scanned` files into the search index with host ranks
//!    attached, with the index switched to bulk-load settings for the duration
//! 3. **processHostRanksFile** -- Turn a raw host-rank listing into the compact
//!    `rank hostId` file the import phase reads
//! 4. **findReoccurringParagraphs** -- Count paragraphs repeated across indexed
//!    documents, one sliced scroll per shard
//!
//! # Architecture
//!
//! - **Compiled taxonomy** -- Each configuration line becomes a rule plus a `RegexSet`
//!   matcher; compilation failure aborts before any work is done
//! - **Bounded dispatch** -- A semaphore caps in-flight tasks independently of the
//!   worker pool size, so long work lists never queue unbounded futures
//! - **Per-item isolation** -- Failed, panicking or timed-out tasks are logged and
//!   counted; the batch always runs to the end
//! - **Read-only sharing** -- Taxonomy and rank table are shared through `Arc` without locks
//!
//! # Key Modules
//!
//! - [`taxonomy`] -- Rule configuration parsing and pattern compilation
//! - [`dispatch`] -- Bounded concurrent task dispatch with a completion barrier
//! - [`lifecycle`] -- Index creation and bulk-load settings around an import
//! - [`ranks`] -- Host rank table loading and preprocessing
//! - [`archive`] -- Streaming WET record reader
//! - [`search`] -- HTTP client for the search index
//! - [`scan`], [`import`], [`dedup`] -- Phase orchestrators
//! - [`models`] -- Scanned and indexed document records
//! - [`stats`] -- Atomic dispatch counters
//! - [`timing`] -- Phase duration reports
//! - [`config`] -- Constants and endpoint configuration
//!
//! # Example Usage
//!
//! ```bash
//! acks -v scan archives.txt taxonomy.csv
//! acks -v importToES archives.txt taxonomy.csv ranks.txt.gz --es-host 10.0.0.5
//! acks processHostRanksFile host-ranks.txt.gz ranks.txt.gz
//! acks findReoccurringParagraphs --shards 4 --min-occurrences 10
//! ```

pub mod archive;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod import;
pub mod lifecycle;
pub mod models;
pub mod ranks;
pub mod recover;
pub mod scan;
pub mod search;
pub mod stats;
pub mod taxonomy;
pub mod timing;
