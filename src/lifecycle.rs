//! Index lifecycle around bulk loads.
//!
//! Before an import the index is created if missing and switched to bulk mode (no
//! refresh, no replicas); afterwards refresh and one replica are restored. None of
//! these calls abort the import: a failure is logged and the load goes ahead without
//! the optimization.

use crate::config::{BULK_REFRESH_INTERVAL, BULK_REPLICAS, LIVE_REFRESH_INTERVAL, LIVE_REPLICAS};
use crate::recover::log_and_continue;
use crate::search::{IndexAdmin, IndexSettings};
use std::future::Future;
use tracing::info;

const PHASE: &str = "importToES";

/// Settings for entering (`true`) or leaving (`false`) bulk-load mode.
pub fn bulk_load_settings(enabled: bool) -> IndexSettings {
    if enabled {
        IndexSettings {
            refresh_interval: BULK_REFRESH_INTERVAL.to_string(),
            number_of_replicas: BULK_REPLICAS,
        }
    } else {
        IndexSettings {
            refresh_interval: LIVE_REFRESH_INTERVAL.to_string(),
            number_of_replicas: LIVE_REPLICAS,
        }
    }
}

/// Creates `index` with default settings unless it already exists.
///
/// Returns whether the index is known to exist afterwards.
pub async fn ensure_index_exists<A: IndexAdmin + ?Sized>(admin: &A, index: &str) -> bool {
    let Some(exists) =
        log_and_continue(PHASE, "ensureIndexIsCreated", admin.index_exists(index).await)
    else {
        return false;
    };
    if exists {
        return true;
    }

    info!(index, "Creating missing index");
    log_and_continue(PHASE, "ensureIndexIsCreated", admin.create_index(index).await).is_some()
}

/// Applies the bulk-load or live settings. Returns whether they were applied.
pub async fn set_bulk_load_mode<A: IndexAdmin + ?Sized>(
    admin: &A,
    index: &str,
    enabled: bool,
) -> bool {
    let settings = bulk_load_settings(enabled);
    let operation = if enabled {
        "disableIndexRefreshAndReplicas"
    } else {
        "enableIndexRefreshAndReplicas"
    };
    info!(
        index,
        refresh_interval = %settings.refresh_interval,
        replicas = settings.number_of_replicas,
        "{operation}"
    );
    log_and_continue(PHASE, operation, admin.put_settings(index, &settings).await).is_some()
}

/// Runs `load` with the index in bulk mode, restoring live settings afterwards
/// whatever `load` returns.
pub async fn with_bulk_load<A, F, T>(admin: &A, index: &str, load: F) -> T
where
    A: IndexAdmin + ?Sized,
    F: Future<Output = T>,
{
    ensure_index_exists(admin, index).await;
    set_bulk_load_mode(admin, index, true).await;
    let result = load.await;
    set_bulk_load_mode(admin, index, false).await;
    result
}
