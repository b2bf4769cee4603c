// Retention cleaner - keeps the newest N backups in a store, deletes the rest

use super::types::{BackupRecord, CleanupReport, FailedDeletion, RetentionPolicy};
use crate::storage::{ObjectStore, StoreError};
use tracing::{debug, info, warn};

/// Apply `policy` to the backups held by `store`.
///
/// Keys that do not parse as backup filenames are left alone. Deletion is
/// best effort: a failed delete is recorded in the report and the remaining
/// candidates are still processed. Only a failed listing is an error.
pub async fn clean(
    store: &dyn ObjectStore,
    policy: RetentionPolicy,
) -> Result<CleanupReport, StoreError> {
    let mut report = CleanupReport::default();
    if policy.is_unlimited() {
        return Ok(report);
    }

    let keys = store.list().await?;

    let mut records = Vec::with_capacity(keys.len());
    for key in keys {
        match BackupRecord::parse(&key) {
            Ok(record) => records.push(record),
            Err(e) => {
                debug!(key = %key, error = %e, "Skipping object that is not a backup");
                report.skipped += 1;
            }
        }
    }

    // Sort by capture time (newest first)
    records.sort_by(BackupRecord::newest_first);

    if records.len() <= policy.keep_last {
        report.retained = records.len();
        debug!(
            backups = records.len(),
            keep_last = policy.keep_last,
            "Nothing to clean up"
        );
        return Ok(report);
    }

    let candidates = records.split_off(policy.keep_last);
    report.retained = records.len();

    for record in candidates {
        match store.delete(&record.filename).await {
            Ok(()) => {
                info!(filename = %record.filename, "Deleted old backup");
                report.deleted.push(record.filename);
            }
            Err(e) => {
                warn!(filename = %record.filename, error = %e, "Failed to delete old backup");
                report.failed.push(FailedDeletion {
                    filename: record.filename,
                    error: e.to_string(),
                });
            }
        }
    }

    info!(
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        retained = report.retained,
        backend = store.backend(),
        "Cleanup completed"
    );

    Ok(report)
}
